use geo::{
    line_intersection::{line_intersection, LineIntersection},
    Area, BooleanOps, BoundingRect, Coord, CoordsIter, Geometry, GeometryCollection, Line,
    LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon, Rect,
};
use thiserror::Error;

use crate::{buffer, noding};

/// 几何引擎的拓扑错误
///
/// 求交、缓冲或多边形重建失败时由 [GeometryEngine] 返回，
/// 调用者据此跳过当前要素或当前象限，而不是中止整个遍历。
#[derive(Error, Clone, Debug, PartialEq)]
pub enum TopologyError {
    /// 几何中含有 NaN 或无穷大的坐标
    #[error("几何包含非有限坐标")]
    NonFiniteCoordinate,

    /// 缓冲参数无效
    #[error("无效的缓冲参数: 距离 {distance}, 象限分段数 {quadrant_segments}")]
    InvalidBuffer {
        distance: f64,
        quadrant_segments: u32,
    },

    /// 无法从线网重建多边形
    #[error("多边形化失败: {0}")]
    Polygonize(String),
}

/// 遍历所需的几何运算
///
/// 只包含求交、面积、外包矩形、有效性检查、缓冲和自相交多边形的拆分，
/// 遍历器和四叉树通过这个接口调用几何运算，便于注入其它实现。
pub trait GeometryEngine {
    /// 几何与矩形的交集，交集为空时返回 `Ok(None)`
    fn intersection(
        &self,
        geometry: &Geometry<f64>,
        rect: &Rect<f64>,
    ) -> Result<Option<Geometry<f64>>, TopologyError>;

    /// 多边形在拓扑上是否有效
    fn is_valid(&self, polygon: &Polygon<f64>) -> bool;

    /// 几何的缓冲区
    ///
    /// 圆弧用每四分之一圆 `quadrant_segments` 段折线近似，结果为空时返回 `Ok(None)`。
    fn buffer(
        &self,
        geometry: &Geometry<f64>,
        distance: f64,
        quadrant_segments: u32,
    ) -> Result<Option<Geometry<f64>>, TopologyError>;

    /// 把自相交的外环打断并重新构造成若干个有效多边形
    fn explode(&self, ring: &LineString<f64>) -> Result<Vec<Polygon<f64>>, TopologyError>;

    /// 几何的面积（无符号）
    fn area(&self, geometry: &Geometry<f64>) -> f64 {
        geometry.unsigned_area()
    }

    /// 几何的外包矩形，空几何返回 `None`
    fn envelope(&self, geometry: &Geometry<f64>) -> Option<Rect<f64>> {
        geometry.bounding_rect()
    }
}

/// 基于 [geo] 的几何引擎
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeoEngine;

impl GeometryEngine for GeoEngine {
    fn intersection(
        &self,
        geometry: &Geometry<f64>,
        rect: &Rect<f64>,
    ) -> Result<Option<Geometry<f64>>, TopologyError> {
        if !is_finite(geometry) {
            return Err(TopologyError::NonFiniteCoordinate);
        }
        Ok(clip(geometry, rect))
    }

    fn is_valid(&self, polygon: &Polygon<f64>) -> bool {
        polygon_is_valid(polygon)
    }

    fn buffer(
        &self,
        geometry: &Geometry<f64>,
        distance: f64,
        quadrant_segments: u32,
    ) -> Result<Option<Geometry<f64>>, TopologyError> {
        if !distance.is_finite() || quadrant_segments == 0 {
            return Err(TopologyError::InvalidBuffer {
                distance,
                quadrant_segments,
            });
        }
        if !is_finite(geometry) {
            return Err(TopologyError::NonFiniteCoordinate);
        }
        Ok(buffer::buffer(geometry, distance, quadrant_segments))
    }

    fn explode(&self, ring: &LineString<f64>) -> Result<Vec<Polygon<f64>>, TopologyError> {
        if ring.coords().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(TopologyError::NonFiniteCoordinate);
        }
        noding::polygonize_ring(ring)
    }
}

fn is_finite(geometry: &Geometry<f64>) -> bool {
    geometry
        .coords_iter()
        .all(|c| c.x.is_finite() && c.y.is_finite())
}

fn point_in_rect(c: Coord<f64>, rect: &Rect<f64>) -> bool {
    c.x >= rect.min().x && c.x <= rect.max().x && c.y >= rect.min().y && c.y <= rect.max().y
}

fn rect_contains_rect(outer: &Rect<f64>, inner: &Rect<f64>) -> bool {
    point_in_rect(inner.min(), outer) && point_in_rect(inner.max(), outer)
}

fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && a.max().x >= b.min().x && a.min().y <= b.max().y && a.max().y >= b.min().y
}

fn clip(geometry: &Geometry<f64>, rect: &Rect<f64>) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::Point(p) => point_in_rect(p.0, rect).then_some(Geometry::Point(*p)),
        Geometry::MultiPoint(mp) => {
            let mut kept: Vec<Point<f64>> = mp.iter().filter(|p| point_in_rect(p.0, rect)).copied().collect();
            match kept.len() {
                0 => None,
                1 => kept.pop().map(Geometry::Point),
                _ => Some(Geometry::MultiPoint(MultiPoint::new(kept))),
            }
        }
        Geometry::Line(line) => clip_lines(MultiLineString::new(vec![LineString::from(*line)]), rect),
        Geometry::LineString(ls) => clip_lines(MultiLineString::new(vec![ls.clone()]), rect),
        Geometry::MultiLineString(mls) => clip_lines(mls.clone(), rect),
        Geometry::Polygon(poly) => clip_polygons(MultiPolygon::new(vec![poly.clone()]), rect),
        Geometry::MultiPolygon(mp) => clip_polygons(mp.clone(), rect),
        Geometry::Rect(r) => clip_polygons(MultiPolygon::new(vec![r.to_polygon()]), rect),
        Geometry::Triangle(t) => clip_polygons(MultiPolygon::new(vec![t.to_polygon()]), rect),
        Geometry::GeometryCollection(gc) => {
            let members: Vec<Geometry<f64>> = gc.iter().filter_map(|g| clip(g, rect)).collect();
            if members.is_empty() {
                None
            } else {
                Some(Geometry::GeometryCollection(GeometryCollection::from(members)))
            }
        }
    }
}

fn clip_lines(lines: MultiLineString<f64>, rect: &Rect<f64>) -> Option<Geometry<f64>> {
    let bbox = lines.bounding_rect()?;
    if !rects_overlap(&bbox, rect) {
        return None;
    }
    let lines = if rect_contains_rect(rect, &bbox) {
        lines
    } else {
        rect.to_polygon().clip(&lines, false)
    };
    let mut parts: Vec<LineString<f64>> = lines.into_iter().filter(|ls| ls.0.len() >= 2).collect();
    match parts.len() {
        0 => None,
        1 => parts.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(parts))),
    }
}

fn clip_polygons(polygons: MultiPolygon<f64>, rect: &Rect<f64>) -> Option<Geometry<f64>> {
    let bbox = polygons.bounding_rect()?;
    if !rects_overlap(&bbox, rect) {
        return None;
    }
    // 完全落在矩形内的多边形原样返回，无效多边形因此能保留到后续的拆分步骤
    let polygons = if rect_contains_rect(rect, &bbox) {
        polygons
    } else {
        polygons.intersection(&MultiPolygon::new(vec![rect.to_polygon()]))
    };
    // 自相交多边形的净面积可能为零，只按外包矩形丢弃退化的部分
    let mut parts: Vec<Polygon<f64>> = polygons.into_iter().filter(has_extent).collect();
    match parts.len() {
        0 => None,
        1 => parts.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(parts))),
    }
}

fn has_extent(polygon: &Polygon<f64>) -> bool {
    polygon.exterior().0.len() >= 4
        && polygon
            .bounding_rect()
            .is_some_and(|b| b.width() > 0. && b.height() > 0.)
}

/// 环上长度不为零的边
fn ring_edges(ring: &LineString<f64>) -> Vec<Line<f64>> {
    ring.lines().filter(|l| l.start != l.end).collect()
}

fn ring_is_simple(edges: &[Line<f64>]) -> bool {
    let n = edges.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(edges[i], edges[j]) {
                None => {}
                Some(LineIntersection::Collinear { .. }) => return false,
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    if !adjacent {
                        return false;
                    }
                    let shared = if j == i + 1 { edges[i].end } else { edges[i].start };
                    if intersection != shared {
                        return false;
                    }
                }
            }
        }
    }
    true
}

fn rings_cross(a: &[Line<f64>], b: &[Line<f64>]) -> bool {
    a.iter().any(|ea| {
        b.iter().any(|eb| {
            matches!(
                line_intersection(*ea, *eb),
                Some(LineIntersection::Collinear { .. })
                    | Some(LineIntersection::SinglePoint { is_proper: true, .. })
            )
        })
    })
}

fn polygon_is_valid(polygon: &Polygon<f64>) -> bool {
    let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .collect();
    let mut edges = Vec::with_capacity(rings.len());
    for ring in &rings {
        if !ring.is_closed() || ring.0.len() < 4 {
            return false;
        }
        let ring_edges = ring_edges(ring);
        if ring_edges.len() < 3 || !ring_is_simple(&ring_edges) {
            return false;
        }
        edges.push(ring_edges);
    }
    if Polygon::new(polygon.exterior().clone(), vec![]).unsigned_area() == 0. {
        return false;
    }
    for i in 0..edges.len() {
        for j in (i + 1)..edges.len() {
            if rings_cross(&edges[i], &edges[j]) {
                return false;
            }
        }
    }
    true
}

/// 几何的 WKT 文本，用于调试输出
pub(crate) fn to_wkt(geometry: &Geometry<f64>) -> String {
    use wkt::ToWkt;
    geometry.wkt_string()
}
