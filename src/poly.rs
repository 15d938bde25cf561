use geo::{Area, BoundingRect, Coord, Geometry, Polygon, Rect};
use log::{trace, warn};

use crate::{
    engine::{to_wkt, GeometryEngine},
    raster::Grid,
};

/// 多边形面积允许超过矩形面积的相对容差
const AREA_TOLERANCE: f64 = 1.0001;

/// 网格上以像素为单位的矩形
///
/// `(col, row)` 是左上角像素，`cols`、`rows` 是列数和行数。
/// 四叉树的每一层都重新计算，没有持久的标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridRect {
    pub col: i64,
    pub row: i64,
    pub cols: i64,
    pub rows: i64,
}

impl GridRect {
    pub fn new(col: i64, row: i64, cols: i64, rows: i64) -> Self {
        GridRect {
            col,
            row,
            cols,
            rows,
        }
    }

    /// 没有任何像素
    pub fn is_empty(&self) -> bool {
        self.cols <= 0 || self.rows <= 0
    }

    /// 矩形的地理面积（绝对值）
    pub fn area(&self, grid: &Grid) -> f64 {
        (self.cols as f64 * grid.pix_x_size * self.rows as f64 * grid.pix_y_size).abs()
    }

    /// 矩形覆盖的地理范围
    pub fn bounds(&self, grid: &Grid) -> Rect<f64> {
        let (x, y) = grid.to_grid_xy(self.col, self.row);
        let (x2, y2) = grid.to_grid_xy(self.col + self.cols, self.row + self.rows);
        Rect::new(Coord { x, y }, Coord { x: x2, y: y2 })
    }

    /// 矩形对应的多边形
    pub fn polygon(&self, grid: &Grid) -> Polygon<f64> {
        self.bounds(grid).to_polygon()
    }

    fn halves(&self) -> (i64, i64) {
        (self.cols >> 1, self.rows >> 1)
    }

    /// 左上象限：前 `cols/2` 列、前 `rows/2` 行
    pub fn upper_left(&self) -> GridRect {
        let (cols2, rows2) = self.halves();
        GridRect::new(self.col, self.row, cols2, rows2)
    }

    pub fn upper_right(&self) -> GridRect {
        let (cols2, rows2) = self.halves();
        GridRect::new(self.col + cols2, self.row, self.cols - cols2, rows2)
    }

    pub fn lower_left(&self) -> GridRect {
        let (cols2, rows2) = self.halves();
        GridRect::new(self.col, self.row + rows2, cols2, self.rows - rows2)
    }

    /// 右下象限，吸收行列数为奇数时多出的一行和一列
    ///
    /// 单个像素没有可再分的象限，此时返回空矩形。
    pub fn lower_right(&self) -> GridRect {
        if self.cols <= 1 && self.rows <= 1 {
            return GridRect::new(self.col, self.row, 0, 0);
        }
        let (cols2, rows2) = self.halves();
        GridRect::new(
            self.col + cols2,
            self.row + rows2,
            self.cols - cols2,
            self.rows - rows2,
        )
    }

    /// 按行优先顺序迭代矩形内的所有像素
    pub fn cells(&self) -> impl Iterator<Item = (i64, i64)> {
        let GridRect {
            col,
            row,
            cols,
            rows,
        } = *self;
        (0..rows.max(0)).flat_map(move |i| (0..cols.max(0)).map(move |j| (col + j, row + i)))
    }
}

/// 接收四叉树判定为覆盖的像素
pub trait CellSink {
    fn cell_found(&mut self, col: i64, row: i64);
}

/// 四叉树栅格化过程中出现的异常计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuadStats {
    /// 象限求交失败的次数
    pub topology_errors: usize,
    /// 多边形面积超出矩形面积的次数
    pub area_violations: usize,
}

/// 基于四叉树的多边形栅格化器
///
/// 从多边形外包矩形对应的像素矩形开始，比较多边形与矩形的面积：
/// 覆盖足够完整时整块报告，覆盖太少时整块丢弃，否则分成四个象限递归。
/// 递归顺序为左上、右上、左下、右下，因此像素并不是按行优先顺序报告的。
///
/// # 示例
///
/// ```rust
/// use geo::polygon;
/// use geo_extract::{CellSink, GeoEngine, Grid, QuadStats, Quadtree};
///
/// struct Cells(Vec<(i64, i64)>);
/// impl CellSink for Cells {
///     fn cell_found(&mut self, col: i64, row: i64) {
///         self.0.push((col, row));
///     }
/// }
///
/// let grid = Grid::new(4, 4, (0., 0.), (1., 1.));
/// let quadtree = Quadtree::new(grid, &GeoEngine, 0.5);
/// let square = polygon![(x: 0., y: 0.), (x: 2., y: 0.), (x: 2., y: 2.), (x: 0., y: 2.), (x: 0., y: 0.)];
/// let mut cells = Cells(vec![]);
/// quadtree.rasterize_polygon(&square, &mut cells, &mut QuadStats::default());
/// cells.0.sort();
/// assert_eq!(cells.0, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
/// ```
#[derive(Debug)]
pub struct Quadtree<'e, E: GeometryEngine + ?Sized> {
    grid: Grid,
    engine: &'e E,
    pixel_proportion: f64,
    dump_polys: bool,
}

impl<'e, E: GeometryEngine + ?Sized> Quadtree<'e, E> {
    /// 创建四叉树栅格化器
    ///
    /// # 参数
    /// * `grid` - 栅格网格
    /// * `engine` - 用于象限求交的几何引擎
    /// * `pixel_proportion` - 像素被计入所需的最小覆盖比例，取值 `[0, 1]`；
    ///   为0时与多边形有任何面积相交的像素都会被计入
    pub fn new(grid: Grid, engine: &'e E, pixel_proportion: f64) -> Self {
        Quadtree {
            grid,
            engine,
            pixel_proportion,
            dump_polys: false,
        }
    }

    /// 求交失败时是否以 WKT 输出相关的几何
    pub fn dump_polys(mut self, dump: bool) -> Self {
        self.dump_polys = dump;
        self
    }

    /// 多边形外包矩形所覆盖的像素矩形
    pub fn envelope(&self, polygon: &Polygon<f64>) -> Option<GridRect> {
        let env = polygon.bounding_rect()?;
        let (c0, r0) = self.grid.to_col_row(env.min().x, env.min().y);
        let (c1, r1) = self.grid.to_col_row(env.max().x, env.max().y);
        let (min_col, max_col) = (c0.min(c1), c0.max(c1));
        let (min_row, max_row) = (r0.min(r1), r0.max(r1));
        Some(GridRect::new(
            min_col,
            min_row,
            max_col - min_col + 1,
            max_row - min_row + 1,
        ))
    }

    /// 栅格化一个有效多边形
    pub fn rasterize_polygon<S>(&self, polygon: &Polygon<f64>, sink: &mut S, stats: &mut QuadStats)
    where
        S: CellSink + ?Sized,
    {
        if let Some(rect) = self.envelope(polygon) {
            self.rasterize_poly(rect, polygon, sink, stats);
        }
    }

    /// 对矩形 `rect` 与其内的多边形 `polygon` 应用覆盖规则
    pub fn rasterize_poly<S>(
        &self,
        rect: GridRect,
        polygon: &Polygon<f64>,
        sink: &mut S,
        stats: &mut QuadStats,
    ) where
        S: CellSink + ?Sized,
    {
        if rect.is_empty() {
            return;
        }
        let pix_area = self.grid.pixel_area();
        let min_area = self.pixel_proportion * pix_area;
        let area_e = rect.area(&self.grid);
        let mut area_i = polygon.unsigned_area();

        if area_i > area_e * AREA_TOLERANCE {
            warn!(
                "多边形面积 {} 超过矩形 {:?} 的面积 {}，按矩形面积处理",
                area_i, rect, area_e
            );
            stats.area_violations += 1;
            area_i = area_e;
        }

        // 未覆盖部分小于一个像素所能排除的面积：整块计入
        if area_i >= area_e - (pix_area - min_area) {
            self.dispatch_rect(rect, sink);
            return;
        }

        if self.pixel_proportion > 0. {
            if area_i < min_area {
                return;
            }
        } else if rect.cols == 1 && rect.rows == 1 {
            self.dispatch_rect(rect, sink);
            return;
        }

        for quadrant in [
            rect.upper_left(),
            rect.upper_right(),
            rect.lower_left(),
            rect.lower_right(),
        ] {
            if let Some(part) = self.intersect(quadrant, polygon, stats) {
                self.rasterize_geometry(quadrant, &part, sink, stats);
            }
        }
    }

    /// 按几何类型分派：多边形应用覆盖规则，多多边形和集合逐个处理成员
    pub fn rasterize_geometry<S>(
        &self,
        rect: GridRect,
        geometry: &Geometry<f64>,
        sink: &mut S,
        stats: &mut QuadStats,
    ) where
        S: CellSink + ?Sized,
    {
        if rect.is_empty() {
            return;
        }
        match geometry {
            Geometry::Polygon(p) => self.rasterize_poly(rect, p, sink, stats),
            Geometry::Rect(r) => self.rasterize_poly(rect, &r.to_polygon(), sink, stats),
            Geometry::Triangle(t) => self.rasterize_poly(rect, &t.to_polygon(), sink, stats),
            Geometry::MultiPolygon(mp) => {
                for p in mp {
                    self.rasterize_poly(rect, p, sink, stats);
                }
            }
            Geometry::GeometryCollection(gc) => {
                for g in gc {
                    self.rasterize_geometry(rect, g, sink, stats);
                }
            }
            other => warn!("忽略象限交集中的非面状几何: {:?}", geometry_type(other)),
        }
    }

    fn intersect(
        &self,
        quadrant: GridRect,
        polygon: &Polygon<f64>,
        stats: &mut QuadStats,
    ) -> Option<Geometry<f64>> {
        if quadrant.is_empty() {
            return None;
        }
        let bounds = quadrant.bounds(&self.grid);
        let geometry = Geometry::Polygon(polygon.clone());
        match self.engine.intersection(&geometry, &bounds) {
            Ok(part) => part,
            Err(e) => {
                warn!("象限 {:?} 求交失败: {}", quadrant, e);
                if self.dump_polys {
                    warn!("pix_poly = {}", to_wkt(&Geometry::Rect(bounds)));
                    warn!("geos_poly = {}", to_wkt(&geometry));
                }
                stats.topology_errors += 1;
                None
            }
        }
    }

    fn dispatch_rect<S>(&self, rect: GridRect, sink: &mut S)
    where
        S: CellSink + ?Sized,
    {
        trace!("整块计入 {:?}", rect);
        for (col, row) in rect.cells() {
            sink.cell_found(col, row);
        }
    }
}

/// 几何类型名称，用于日志
pub(crate) fn geometry_type(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadrants_partition_the_rect() {
        for &(cols, rows) in &[(1, 1), (1, 5), (2, 2), (3, 3), (7, 4), (8, 1)] {
            let rect = GridRect::new(10, 20, cols, rows);
            let quadrants = [
                rect.upper_left(),
                rect.upper_right(),
                rect.lower_left(),
                rect.lower_right(),
            ];
            let mut cells: Vec<_> = quadrants.iter().flat_map(|q| q.cells()).collect();
            cells.sort();
            let mut expected: Vec<_> = rect.cells().collect();
            expected.sort();
            if cols == 1 && rows == 1 {
                assert!(cells.is_empty());
            } else {
                assert_eq!(cells, expected, "{}x{}", cols, rows);
            }
        }
    }

    #[test]
    fn rect_area_uses_signed_pixel_size() {
        let grid = Grid::new(10, 10, (0., 10.), (2., -0.5));
        assert_eq!(GridRect::new(0, 0, 3, 4).area(&grid), 12.);
        assert_eq!(
            GridRect::new(1, 1, 1, 1).bounds(&grid),
            Rect::new(Coord { x: 2., y: 9.5 }, Coord { x: 4., y: 9. })
        );
    }
}
