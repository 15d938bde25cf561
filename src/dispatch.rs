use std::fmt;

use geo::{Geometry, LineString, Polygon};
use log::{debug, warn};

use crate::{
    engine::{to_wkt, GeometryEngine},
    line::{LineObserver, LineRasterizer},
    poly::{CellSink, QuadStats, Quadtree},
};

/// 一次遍历的汇总计数
///
/// 每次遍历开始时清零。要素类型计数只统计交集几何的最外层类型，
/// 几何集合中的成员不重复计入。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub num_intersecting_features: usize,
    pub num_point_features: usize,
    pub num_multipoint_features: usize,
    pub num_linestring_features: usize,
    pub num_multilinestring_features: usize,
    pub num_polygon_features: usize,
    pub num_invalid_polys: usize,
    pub num_polys_with_internal_ring: usize,
    pub num_polys_exploded: usize,
    pub num_sub_polys: usize,
    pub num_multipolygon_features: usize,
    pub num_geometrycollection_features: usize,
    pub num_processed_pixels: usize,
    pub num_topology_errors: usize,
    pub num_area_violations: usize,
}

impl Summary {
    fn absorb(&mut self, stats: QuadStats) {
        self.num_topology_errors += stats.topology_errors;
        self.num_area_violations += stats.area_violations;
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "汇总:")?;
        writeln!(f, "  相交要素: {}", self.num_intersecting_features)?;
        let rows = [
            ("      Points", self.num_point_features),
            ("      MultiPoints", self.num_multipoint_features),
            ("      LineStrings", self.num_linestring_features),
            ("      MultiLineStrings", self.num_multilinestring_features),
            ("      Polygons", self.num_polygon_features),
            ("          无效", self.num_invalid_polys),
            ("          带内环", self.num_polys_with_internal_ring),
            ("          已拆分", self.num_polys_exploded),
            ("          子多边形", self.num_sub_polys),
            ("      MultiPolygons", self.num_multipolygon_features),
            ("      GeometryCollections", self.num_geometrycollection_features),
            ("  拓扑错误", self.num_topology_errors),
            ("  面积异常", self.num_area_violations),
        ];
        for (label, count) in rows {
            if count > 0 {
                writeln!(f, "{}: {}", label, count)?;
            }
        }
        writeln!(f)?;
        write!(f, "  处理的像素: {}", self.num_processed_pixels)
    }
}

/// 交集几何的类型分派器
///
/// 点直接交给像素接收者，线交给 [LineRasterizer]，多边形交给 [Quadtree]；
/// 无效多边形按配置跳过或拆分成有效的子多边形。
pub(crate) struct Dispatcher<'e, E: GeometryEngine + ?Sized> {
    engine: &'e E,
    quadtree: Quadtree<'e, E>,
    line: LineRasterizer,
    skip_invalid_polys: bool,
    dump_polys: bool,
}

impl<'e, E: GeometryEngine + ?Sized> Dispatcher<'e, E> {
    pub(crate) fn new(
        engine: &'e E,
        quadtree: Quadtree<'e, E>,
        line: LineRasterizer,
        skip_invalid_polys: bool,
        dump_polys: bool,
    ) -> Self {
        Dispatcher {
            engine,
            quadtree: quadtree.dump_polys(dump_polys),
            line,
            skip_invalid_polys,
            dump_polys,
        }
    }

    /// 按类型处理交集几何
    ///
    /// `count` 为 `true` 时计入对应类型的要素数，几何集合的成员以 `false` 递归。
    pub(crate) fn process_geometry<S>(
        &self,
        geometry: &Geometry<f64>,
        count: bool,
        sink: &mut S,
        summary: &mut Summary,
    ) where
        S: CellSink + LineObserver,
    {
        let tally = |counter: &mut usize| {
            if count {
                *counter += 1;
            }
        };
        match geometry {
            Geometry::Point(p) => {
                tally(&mut summary.num_point_features);
                sink.pixel_found(p.x(), p.y());
            }
            Geometry::MultiPoint(mp) => {
                tally(&mut summary.num_multipoint_features);
                for p in mp {
                    sink.pixel_found(p.x(), p.y());
                }
            }
            Geometry::Line(l) => {
                tally(&mut summary.num_linestring_features);
                self.line.line(l.start.x, l.start.y, l.end.x, l.end.y, true, sink);
            }
            Geometry::LineString(ls) => {
                tally(&mut summary.num_linestring_features);
                self.process_line_string(ls, sink);
            }
            Geometry::MultiLineString(mls) => {
                tally(&mut summary.num_multilinestring_features);
                for ls in mls {
                    self.process_line_string(ls, sink);
                }
            }
            Geometry::Polygon(p) => {
                tally(&mut summary.num_polygon_features);
                self.process_polygon(p, sink, summary);
            }
            Geometry::Rect(r) => {
                tally(&mut summary.num_polygon_features);
                self.process_polygon(&r.to_polygon(), sink, summary);
            }
            Geometry::Triangle(t) => {
                tally(&mut summary.num_polygon_features);
                self.process_polygon(&t.to_polygon(), sink, summary);
            }
            Geometry::MultiPolygon(mp) => {
                tally(&mut summary.num_multipolygon_features);
                for p in mp {
                    self.process_polygon(p, sink, summary);
                }
            }
            Geometry::GeometryCollection(gc) => {
                tally(&mut summary.num_geometrycollection_features);
                for g in gc {
                    self.process_geometry(g, false, sink, summary);
                }
            }
        }
    }

    /// 逐段栅格化线串，只有最后一段报告终点像素
    fn process_line_string<S>(&self, ls: &LineString<f64>, sink: &mut S)
    where
        S: LineObserver,
    {
        let n = ls.0.len();
        for (i, pair) in ls.0.windows(2).enumerate() {
            let last = i + 2 == n;
            self.line
                .line(pair[0].x, pair[0].y, pair[1].x, pair[1].y, last, sink);
        }
    }

    fn process_polygon<S>(&self, polygon: &Polygon<f64>, sink: &mut S, summary: &mut Summary)
    where
        S: CellSink,
    {
        let mut stats = QuadStats::default();
        if self.engine.is_valid(polygon) {
            if !polygon.interiors().is_empty() {
                debug!("有效多边形带有 {} 个内环", polygon.interiors().len());
            }
            self.quadtree.rasterize_polygon(polygon, sink, &mut stats);
            summary.absorb(stats);
            return;
        }

        summary.num_invalid_polys += 1;
        let dump = || to_wkt(&Geometry::Polygon(polygon.clone()));
        if self.skip_invalid_polys {
            if self.dump_polys {
                warn!("跳过无效多边形: {}", dump());
            } else {
                debug!("跳过无效多边形");
            }
        } else if !polygon.interiors().is_empty() {
            warn!(
                "无效多边形带有 {} 个内环，无法拆分",
                polygon.interiors().len()
            );
            summary.num_polys_with_internal_ring += 1;
        } else {
            match self.engine.explode(polygon.exterior()) {
                Ok(parts) => {
                    debug!("外环拆分为 {} 个子多边形", parts.len());
                    summary.num_polys_exploded += 1;
                    summary.num_sub_polys += parts.len();
                    for part in &parts {
                        self.quadtree.rasterize_polygon(part, sink, &mut stats);
                    }
                }
                Err(e) => {
                    warn!("无法拆分多边形: {}", e);
                    if self.dump_polys {
                        warn!("geos_poly = {}", dump());
                    }
                    stats.topology_errors += 1;
                }
            }
        }
        summary.absorb(stats);
    }
}
