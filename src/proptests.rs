use std::collections::BTreeSet;

use geo::{polygon, MultiPoint, Point};
use proptest::prelude::*;

use crate::*;

#[derive(Default)]
struct Pixels(Vec<(i64, i64)>);

impl LineObserver for Pixels {
    fn pixel_found(&mut self, x: f64, y: f64) {
        // 单位像素、原点为0时地理坐标就是行列号
        self.0.push((x as i64, y as i64));
    }
}

impl CellSink for Pixels {
    fn cell_found(&mut self, col: i64, row: i64) {
        self.0.push((col, row));
    }
}

fn coord() -> impl Strategy<Value = f64> {
    -50.0..50.0f64
}

/// 落在像素内部、离边界至少 0.1 的坐标
fn inner(cell: i64) -> impl Strategy<Value = f64> {
    (0.1..0.9f64).prop_map(move |f| cell as f64 + f)
}

proptest! {
    #[test]
    fn lines_are_connected(x1 in coord(), y1 in coord(), x2 in coord(), y2 in coord()) {
        let rasterizer = LineRasterizer::new(0., 0., 1., 1.);
        let mut pixels = Pixels::default();
        rasterizer.line(x1, y1, x2, y2, true, &mut pixels);

        prop_assert!(!pixels.0.is_empty());
        for pair in pixels.0.windows(2) {
            let (dc, dr) = (pair[1].0 - pair[0].0, pair[1].1 - pair[0].1);
            prop_assert!(dc.abs() <= 1 && dr.abs() <= 1 && (dc, dr) != (0, 0), "{:?}", pair);
        }
    }

    #[test]
    fn lines_run_from_start_to_end(
        c1 in -40i64..40, r1 in -40i64..40, c2 in -40i64..40, r2 in -40i64..40,
        fx1 in 0.1..0.9f64, fy1 in 0.1..0.9f64, fx2 in 0.1..0.9f64, fy2 in 0.1..0.9f64,
    ) {
        let rasterizer = LineRasterizer::new(0., 0., 1., 1.);
        let (x1, y1) = (c1 as f64 + fx1, r1 as f64 + fy1);
        let (x2, y2) = (c2 as f64 + fx2, r2 as f64 + fy2);

        let mut with_end = Pixels::default();
        rasterizer.line(x1, y1, x2, y2, true, &mut with_end);
        let steps = (c2 - c1).abs().max((r2 - r1).abs()) as usize;
        prop_assert_eq!(with_end.0.len(), steps + 1);
        prop_assert_eq!(with_end.0.first().copied(), Some((c1, r1)));
        prop_assert_eq!(with_end.0.last().copied(), Some((c2, r2)));

        let mut without_end = Pixels::default();
        rasterizer.line(x1, y1, x2, y2, false, &mut without_end);
        prop_assert_eq!(&without_end.0[..], &with_end.0[..steps]);
    }

    #[test]
    fn segment_within_one_pixel(
        col in -20i64..20, row in -20i64..20,
        x1 in inner(0), y1 in inner(0), x2 in inner(0), y2 in inner(0),
    ) {
        let rasterizer = LineRasterizer::new(0., 0., 1., 1.);
        let offset = |v: f64, cell: i64| v + cell as f64;

        let mut pixels = Pixels::default();
        rasterizer.line(offset(x1, col), offset(y1, row), offset(x2, col), offset(y2, row), false, &mut pixels);
        prop_assert!(pixels.0.is_empty());

        rasterizer.line(offset(x1, col), offset(y1, row), offset(x2, col), offset(y2, row), true, &mut pixels);
        prop_assert_eq!(pixels.0, vec![(col, row)]);
    }

    #[test]
    fn quadtree_emits_each_cell_once(
        ax in 0.0..16.0f64, ay in 0.0..16.0f64,
        bx in 0.0..16.0f64, by in 0.0..16.0f64,
        cx in 0.0..16.0f64, cy in 0.0..16.0f64,
        proportion in 0.0..=1.0f64,
    ) {
        let triangle = polygon![(x: ax, y: ay), (x: bx, y: by), (x: cx, y: cy), (x: ax, y: ay)];
        let doubled = (bx - ax) * (cy - ay) - (cx - ax) * (by - ay);
        prop_assume!(doubled.abs() > 0.5);

        let grid = Grid::new(16, 16, (0., 0.), (1., 1.));
        let engine = GeoEngine;
        let quadtree = Quadtree::new(grid, &engine, proportion);
        let mut cells = Pixels::default();
        let mut stats = QuadStats::default();
        quadtree.rasterize_polygon(&triangle, &mut cells, &mut stats);

        let distinct: BTreeSet<_> = cells.0.iter().copied().collect();
        prop_assert_eq!(distinct.len(), cells.0.len());
        prop_assert_eq!(stats.area_violations, 0);

        let env = quadtree.envelope(&triangle);
        prop_assert!(env.is_some());
        if let Some(env) = env {
            for &(col, row) in &cells.0 {
                prop_assert!(col >= env.col && col < env.col + env.cols);
                prop_assert!(row >= env.row && row < env.row + env.rows);
            }
        }
    }

    #[test]
    fn quadrants_cover_the_rect_exactly(col in -5i64..5, row in -5i64..5, cols in 1i64..12, rows in 1i64..12) {
        let rect = GridRect::new(col, row, cols, rows);
        let mut cells: Vec<(i64, i64)> = [rect.upper_left(), rect.upper_right(), rect.lower_left(), rect.lower_right()]
            .iter()
            .flat_map(|q| q.cells())
            .collect();
        cells.sort();
        let mut expected: Vec<(i64, i64)> = rect.cells().collect();
        expected.sort();
        if cols == 1 && rows == 1 {
            prop_assert!(cells.len() <= 1);
        } else {
            prop_assert_eq!(cells, expected);
        }
    }

    #[test]
    fn visited_set_is_idempotent(cells in prop::collection::vec((0i64..8, 0i64..8), 0..64)) {
        let mut set = PixelVisitedSet::new();
        let fresh = cells.iter().filter(|&&(c, r)| set.insert(c, r)).count();
        let distinct: BTreeSet<_> = cells.iter().copied().collect();
        prop_assert_eq!(fresh, distinct.len());
        prop_assert_eq!(set.len(), distinct.len());
        for &(c, r) in &cells {
            prop_assert!(set.contains(c, r));
            prop_assert!(!set.insert(c, r));
        }
    }

    #[test]
    fn traversal_reports_distinct_pixels(points in prop::collection::vec((0.0..8.0f64, 0.0..8.0f64), 1..40)) {
        struct Count(usize);
        impl Observer for Count {
            fn is_simple(&self) -> bool {
                true
            }
            fn add_pixel(&mut self, _event: &TraversalEvent<'_>) {
                self.0 += 1;
            }
        }

        let raster = MemRaster::new("base", (8, 8, 1), (0., 0.), (1., 1.), 0u8);
        let grid = raster.grid();
        let multipoint: MultiPoint<f64> = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
        let mut layer = MemLayer::from_features(
            "points",
            vec![
                Feature::new(0, Some(multipoint.clone().into())),
                Feature::new(1, Some(multipoint.into())),
            ],
        );
        let mut count = Count(0);
        let result = {
            let mut traverser = Traverser::new();
            traverser.set_layer(&mut layer);
            traverser.add_raster(&raster).and_then(|_| {
                traverser.add_observer(&mut count);
                traverser.traverse()
            })
        };
        prop_assert_eq!(result, Ok(()));

        let distinct: BTreeSet<_> = points
            .iter()
            .map(|&(x, y)| grid.to_col_row(x, y))
            .filter(|&(c, r)| grid.contains_cell(c, r))
            .collect();
        prop_assert_eq!(count.0, 2 * distinct.len());
    }
}
