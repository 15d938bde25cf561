//! 自相交环的打断与多边形重建
//!
//! 把环拆成两点线段，在所有交点处打断，合并重复的边并去掉悬挂边，
//! 然后沿平面图的面逐个追踪出有效的子多边形。

use std::collections::BTreeSet;

use geo::{
    line_intersection::{line_intersection, LineIntersection},
    Area, BoundingRect, Coord, Line, LineString, Polygon,
};

use crate::engine::TopologyError;

/// 节点合并的相对容差
const NODE_TOLERANCE: f64 = 1e-9;

struct Graph {
    nodes: Vec<Coord<f64>>,
    tolerance: f64,
}

impl Graph {
    /// 返回与 `c` 重合的已有节点，没有时新建节点
    fn node(&mut self, c: Coord<f64>) -> usize {
        let tol = self.tolerance;
        if let Some(i) = self
            .nodes
            .iter()
            .position(|n| (n.x - c.x).abs() <= tol && (n.y - c.y).abs() <= tol)
        {
            return i;
        }
        self.nodes.push(c);
        self.nodes.len() - 1
    }
}

/// 线段上点的参数位置
fn param(line: &Line<f64>, c: Coord<f64>) -> f64 {
    let d = line.delta();
    let len2 = d.x * d.x + d.y * d.y;
    ((c.x - line.start.x) * d.x + (c.y - line.start.y) * d.y) / len2
}

/// 在所有交点处打断线段，返回去重后的无向边
fn node_segments(graph: &mut Graph, segments: &[Line<f64>]) -> BTreeSet<(usize, usize)> {
    let mut edges = BTreeSet::new();
    for (i, seg) in segments.iter().enumerate() {
        let mut cuts = vec![seg.start, seg.end];
        for (j, other) in segments.iter().enumerate() {
            if i == j {
                continue;
            }
            match line_intersection(*seg, *other) {
                Some(LineIntersection::SinglePoint { intersection, .. }) => cuts.push(intersection),
                Some(LineIntersection::Collinear { intersection }) => {
                    cuts.push(intersection.start);
                    cuts.push(intersection.end);
                }
                None => {}
            }
        }
        cuts.sort_by(|a, b| param(seg, *a).total_cmp(&param(seg, *b)));
        let ids: Vec<usize> = cuts.into_iter().map(|c| graph.node(c)).collect();
        for pair in ids.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a != b {
                edges.insert((a.min(b), a.max(b)));
            }
        }
    }
    edges
}

/// 反复删除度为1的节点上的边
fn prune_dangles(edges: &mut BTreeSet<(usize, usize)>, num_nodes: usize) {
    loop {
        let mut degree = vec![0usize; num_nodes];
        for &(a, b) in edges.iter() {
            degree[a] += 1;
            degree[b] += 1;
        }
        let before = edges.len();
        edges.retain(|&(a, b)| degree[a] > 1 && degree[b] > 1);
        if edges.len() == before {
            break;
        }
    }
}

/// 打断自相交的环并重建出其中所有的有界面
///
/// 结果中的多边形都没有内环，按面追踪的顺序排列。
pub(crate) fn polygonize_ring(ring: &LineString<f64>) -> Result<Vec<Polygon<f64>>, TopologyError> {
    let segments: Vec<Line<f64>> = ring.lines().filter(|l| l.start != l.end).collect();
    if segments.is_empty() {
        return Ok(vec![]);
    }
    let extent = ring
        .bounding_rect()
        .map(|r| r.width().max(r.height()))
        .unwrap_or(0.);
    let mut graph = Graph {
        nodes: vec![],
        tolerance: NODE_TOLERANCE * extent.max(1.),
    };
    let mut edges = node_segments(&mut graph, &segments);
    prune_dangles(&mut edges, graph.nodes.len());

    // 每个节点的邻居按极角从小到大排列
    let nodes = &graph.nodes;
    let mut neighbours: Vec<Vec<usize>> = vec![vec![]; nodes.len()];
    for &(a, b) in &edges {
        neighbours[a].push(b);
        neighbours[b].push(a);
    }
    for (n, list) in neighbours.iter_mut().enumerate() {
        let origin = nodes[n];
        list.sort_by(|&p, &q| {
            let ap = (nodes[p].y - origin.y).atan2(nodes[p].x - origin.x);
            let aq = (nodes[q].y - origin.y).atan2(nodes[q].x - origin.x);
            ap.total_cmp(&aq)
        });
    }

    let mut visited: BTreeSet<(usize, usize)> = BTreeSet::new();
    let mut polygons = vec![];
    for &(a, b) in &edges {
        for start in [(a, b), (b, a)] {
            if visited.contains(&start) {
                continue;
            }
            let mut face = vec![nodes[start.0]];
            let (mut u, mut v) = start;
            loop {
                if !visited.insert((u, v)) {
                    return Err(TopologyError::Polygonize(format!(
                        "边 {}-{} 被重复追踪",
                        u, v
                    )));
                }
                face.push(nodes[v]);
                let around = &neighbours[v];
                let at = around.iter().position(|&w| w == u).ok_or_else(|| {
                    TopologyError::Polygonize(format!("节点 {} 缺少邻居 {}", v, u))
                })?;
                // 取 u 顺时针方向的下一条边，面始终位于前进方向的左侧
                let w = around[(at + around.len() - 1) % around.len()];
                u = v;
                v = w;
                if (u, v) == start {
                    break;
                }
            }
            let polygon = Polygon::new(LineString::new(face), vec![]);
            if polygon.signed_area() > 0. {
                polygons.push(polygon);
            }
        }
    }
    Ok(polygons)
}
