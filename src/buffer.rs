//! 几何缓冲区
//!
//! 缓冲区由每个顶点处的圆和每条边两侧的矩形合并而成；
//! 多边形向外缓冲时再并上自身，向内缓冲时从自身减去边界附近的这一带。

use std::f64::consts::PI;

use geo::{BooleanOps, Coord, Geometry, Line, LineString, MultiPolygon, Polygon};
use itertools::Itertools;

/// 以 `center` 为圆心、`radius` 为半径的正多边形近似圆
fn disc(center: Coord<f64>, radius: f64, quadrant_segments: u32) -> Polygon<f64> {
    let n = 4 * quadrant_segments as usize;
    let ring: Vec<Coord<f64>> = (0..n)
        .map(|k| {
            let theta = 2. * PI * k as f64 / n as f64;
            Coord {
                x: center.x + radius * theta.cos(),
                y: center.y + radius * theta.sin(),
            }
        })
        .collect();
    Polygon::new(LineString::new(ring), vec![])
}

/// 线段两侧各 `radius` 宽的矩形
fn segment_band(line: &Line<f64>, radius: f64) -> Option<Polygon<f64>> {
    let d = line.delta();
    let len = (d.x * d.x + d.y * d.y).sqrt();
    if len == 0. {
        return None;
    }
    let n = Coord {
        x: -d.y / len * radius,
        y: d.x / len * radius,
    };
    Some(Polygon::new(
        LineString::new(vec![
            line.start + n,
            line.end + n,
            line.end - n,
            line.start - n,
        ]),
        vec![],
    ))
}

/// 几何中的孤立点、线和多边形
#[derive(Default)]
struct Parts {
    points: Vec<Coord<f64>>,
    paths: Vec<LineString<f64>>,
    polygons: Vec<Polygon<f64>>,
}

impl Parts {
    fn collect(&mut self, geometry: &Geometry<f64>) {
        match geometry {
            Geometry::Point(p) => self.points.push(p.0),
            Geometry::MultiPoint(mp) => self.points.extend(mp.iter().map(|p| p.0)),
            Geometry::Line(l) => self.paths.push(LineString::from(*l)),
            Geometry::LineString(ls) => self.paths.push(ls.clone()),
            Geometry::MultiLineString(mls) => self.paths.extend(mls.iter().cloned()),
            Geometry::Polygon(p) => self.polygons.push(p.clone()),
            Geometry::MultiPolygon(mp) => self.polygons.extend(mp.iter().cloned()),
            Geometry::Rect(r) => self.polygons.push(r.to_polygon()),
            Geometry::Triangle(t) => self.polygons.push(t.to_polygon()),
            Geometry::GeometryCollection(gc) => gc.iter().for_each(|g| self.collect(g)),
        }
    }
}

/// 沿 `paths` 的宽为 `2 * radius` 的带状区域
fn tube<'a>(
    paths: impl Iterator<Item = &'a LineString<f64>>,
    points: &[Coord<f64>],
    radius: f64,
    quadrant_segments: u32,
) -> Option<MultiPolygon<f64>> {
    let mut pieces: Vec<MultiPolygon<f64>> = points
        .iter()
        .map(|c| MultiPolygon::new(vec![disc(*c, radius, quadrant_segments)]))
        .collect();
    for path in paths {
        pieces.extend(
            path.coords()
                .map(|c| MultiPolygon::new(vec![disc(*c, radius, quadrant_segments)])),
        );
        pieces.extend(
            path.lines()
                .filter_map(|l| segment_band(&l, radius))
                .map(|p| MultiPolygon::new(vec![p])),
        );
    }
    pieces.into_iter().tree_reduce(|a, b| a.union(&b))
}

fn into_geometry(mut mp: MultiPolygon<f64>) -> Option<Geometry<f64>> {
    match mp.0.len() {
        0 => None,
        1 => mp.0.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(mp)),
    }
}

/// 计算几何的缓冲区，结果为空时返回 `None`
///
/// 距离为0时多边形原样返回，点和线没有面积，结果为空。
pub(crate) fn buffer(
    geometry: &Geometry<f64>,
    distance: f64,
    quadrant_segments: u32,
) -> Option<Geometry<f64>> {
    let mut parts = Parts::default();
    parts.collect(geometry);
    let area = MultiPolygon::new(parts.polygons.clone());

    if distance == 0. {
        return into_geometry(area);
    }
    let radius = distance.abs();
    if distance > 0. {
        let rings = parts
            .polygons
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()));
        let tube = tube(
            parts.paths.iter().chain(rings),
            &parts.points,
            radius,
            quadrant_segments,
        );
        let grown = match tube {
            Some(tube) => area.union(&tube),
            None => area,
        };
        into_geometry(grown)
    } else {
        let rings = parts
            .polygons
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()));
        match tube(rings, &[], radius, quadrant_segments) {
            Some(tube) => into_geometry(area.difference(&tube)),
            None => into_geometry(area),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, polygon, Area};

    #[test]
    fn point_buffer_is_a_disc() {
        let g = Geometry::Point(point!(x: 0., y: 0.));
        let b = buffer(&g, 1., 8).unwrap();
        // 内接正32边形的面积
        let expected = 0.5 * 32. * (2. * PI / 32.).sin();
        // 布尔运算内部按定点数取整，只要求相对误差
        assert!((b.unsigned_area() - expected).abs() < expected * 1e-7);
        assert_eq!(buffer(&g, 0., 8), None);
    }

    #[test]
    fn square_grows_and_shrinks() {
        let g = Geometry::Polygon(polygon![(x: 0., y: 0.), (x: 4., y: 0.), (x: 4., y: 4.), (x: 0., y: 4.), (x: 0., y: 0.)]);
        let grown = buffer(&g, 1., 8).unwrap().unsigned_area();
        assert!(grown > 16. + 4. * 4. && grown < 16. + 4. * 4. + PI);
        let shrunk = buffer(&g, -1., 8).unwrap().unsigned_area();
        assert!((shrunk - 4.).abs() < 4. * 1e-7);
        assert_eq!(buffer(&g, -3., 8), None);
    }
}
