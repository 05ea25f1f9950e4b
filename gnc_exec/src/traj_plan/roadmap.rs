//! Lightweight bypass strategies: the single waypoint skirt and the sparse probabilistic
//! roadmap.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::trace;
use nalgebra::{UnitQuaternion, Vector3};
use ordered_float::NotNan;

use util::maths::{any_perpendicular, clamp, try_unit};

use super::{bvh::Bvh, safety::SafetyBox, Params};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Result of a roadmap search.
#[derive(Debug, Clone)]
pub struct RoadmapSearch {
    pub points_m: Option<Vec<Vector3<f64>>>,
    pub num_nodes: usize,
    pub num_edges: usize,
}

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    index: usize,
    f_cost: NotNan<f64>,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Bypass the first obstacle on the straight line with one intermediate waypoint.
///
/// The waypoint is offset sideways from the obstacle centre by its bounding radius plus a margin,
/// on both lateral sides in turn. The first side giving a fully clear two segment path is used.
pub fn skirt(
    start_m: &Vector3<f64>,
    goal_m: &Vector3<f64>,
    bvh: &Bvh,
    params: &Params,
) -> Option<Vec<Vector3<f64>>> {
    let (hit, _) = bvh.first_hit(start_m, goal_m)?;
    let sb = &bvh.boxes()[hit];

    let dir = try_unit(&(goal_m - start_m))?;
    let centre = sb.centre_m();

    // Lateral is the direction from the line to the obstacle centre, flipped to go round it
    let along = (centre - start_m).dot(&dir);
    let closest_on_line = start_m + dir * along;
    let lateral = try_unit(&(closest_on_line - centre)).unwrap_or_else(|| any_perpendicular(&dir));

    let offset_m = sb.bounding_radius_m() + params.skirt_margin_m;

    for side in &[1.0, -1.0] {
        let waypoint = centre + lateral * (offset_m * side);
        if bvh.is_clear(start_m, &waypoint) && bvh.is_clear(&waypoint, goal_m) {
            trace!("Skirt around box {} succeeded on side {}", hit, side);
            return Some(vec![*start_m, waypoint, *goal_m]);
        }
    }

    None
}

/// Search a sparse roadmap built from anchor points around the boxes near the straight line.
pub fn roadmap(
    start_m: &Vector3<f64>,
    goal_m: &Vector3<f64>,
    bvh: &Bvh,
    params: &Params,
) -> RoadmapSearch {
    let mut nodes = vec![*start_m, *goal_m];
    for anchor in anchor_points(start_m, goal_m, bvh.boxes(), params) {
        if nodes.len() >= params.prm_max_nodes {
            break;
        }
        if !bvh.boxes().iter().any(|sb| sb.contains(&anchor)) {
            nodes.push(anchor);
        }
    }

    // Connect each node to its nearest neighbours with clear edges
    let n = nodes.len();
    let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let mut num_edges = 0;
    let mut by_distance: Vec<(usize, f64)> = Vec::with_capacity(n);

    for i in 0..n {
        by_distance.clear();
        by_distance.extend(
            (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, (nodes[j] - nodes[i]).norm())),
        );
        by_distance.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        for &(j, d) in by_distance.iter().take(params.prm_k_neighbours) {
            if adjacency[i].iter().any(|(k, _)| *k == j) {
                continue;
            }
            if bvh.is_clear(&nodes[i], &nodes[j]) {
                adjacency[i].push((j, d));
                adjacency[j].push((i, d));
                num_edges += 1;
            }
        }
    }

    let points_m = graph_astar(&nodes, &adjacency, 0, 1)
        .map(|indices| indices.into_iter().map(|i| nodes[i]).collect());

    trace!("Roadmap with {} nodes and {} edges", n, num_edges);

    RoadmapSearch {
        points_m,
        num_nodes: n,
        num_edges,
    }
}

/// Candidate roadmap nodes around each box close to the straight line: its corners and face
/// centres pushed out by a margin, and a ring in the plane perpendicular to the line.
fn anchor_points(
    start_m: &Vector3<f64>,
    goal_m: &Vector3<f64>,
    boxes: &[SafetyBox],
    params: &Params,
) -> Vec<Vector3<f64>> {
    let dir = try_unit(&(goal_m - start_m)).unwrap_or_else(Vector3::x);
    let ring_axis = any_perpendicular(&dir);

    // Closest boxes first, so the node cap drops far away anchors
    let mut near: Vec<(&SafetyBox, f64)> = boxes
        .iter()
        .map(|sb| (sb, point_segment_distance(&sb.centre_m(), start_m, goal_m)))
        .filter(|(sb, d)| *d <= sb.bounding_radius_m() + params.prm_near_distance_m)
        .collect();
    near.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    let mut anchors = Vec::new();
    for (sb, _) in near {
        let grown = sb.inflated(params.prm_margin_m);
        let c = grown.centre_m();
        let h = grown.half_extents_m();

        for i in 0..8 {
            let sx = if i & 1 != 0 { 1.0 } else { -1.0 };
            let sy = if i & 2 != 0 { 1.0 } else { -1.0 };
            let sz = if i & 4 != 0 { 1.0 } else { -1.0 };
            anchors.push(c + Vector3::new(sx * h.x, sy * h.y, sz * h.z));
        }

        for axis in 0..3 {
            for s in &[1.0, -1.0] {
                let mut p = c;
                p[axis] += s * h[axis];
                anchors.push(p);
            }
        }

        let radius = grown.bounding_radius_m();
        let ring_count = params.prm_ring_points.max(1);
        for k in 0..ring_count {
            let angle = std::f64::consts::TAU * (k as f64) / (ring_count as f64);
            let rot = UnitQuaternion::from_scaled_axis(dir * angle);
            anchors.push(c + rot.transform_vector(&ring_axis) * radius);
        }
    }

    anchors
}

/// A* over an explicit graph, returning node indices from `start` to `goal`.
fn graph_astar(
    nodes: &[Vector3<f64>],
    adjacency: &[Vec<(usize, f64)>],
    start: usize,
    goal: usize,
) -> Option<Vec<usize>> {
    let n = nodes.len();
    let mut g_costs = vec![std::f64::INFINITY; n];
    let mut parents: Vec<Option<usize>> = vec![None; n];
    let mut closed = vec![false; n];
    let mut heap = BinaryHeap::new();

    g_costs[start] = 0.0;
    heap.push(OpenNode {
        index: start,
        f_cost: NotNan::new((nodes[goal] - nodes[start]).norm()).ok()?,
    });

    while let Some(node) = heap.pop() {
        if closed[node.index] {
            continue;
        }
        closed[node.index] = true;

        if node.index == goal {
            let mut path = vec![goal];
            let mut cur = goal;
            while let Some(p) = parents[cur] {
                path.push(p);
                cur = p;
            }
            path.reverse();
            return Some(path);
        }

        for &(next, d) in &adjacency[node.index] {
            let next_g = g_costs[node.index] + d;
            if closed[next] || next_g >= g_costs[next] {
                continue;
            }
            if let Ok(f_cost) = NotNan::new(next_g + (nodes[goal] - nodes[next]).norm()) {
                g_costs[next] = next_g;
                parents[next] = Some(node.index);
                heap.push(OpenNode { index: next, f_cost });
            }
        }
    }

    None
}

/// Distance from a point to the segment `a -> b`.
pub fn point_segment_distance(p: &Vector3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    let t = if len_sq > 0.0 {
        clamp((p - a).dot(&ab) / len_sq, 0.0, 1.0)
    } else {
        0.0
    };
    (a + ab * t - p).norm()
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.f_cost == other.f_cost
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other.f_cost.cmp(&self.f_cost)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cube(c: Vector3<f64>, h: f64) -> SafetyBox {
        SafetyBox::from_corners(c - Vector3::repeat(h), c + Vector3::repeat(h), false)
    }

    #[test]
    fn test_skirt_single_obstacle() {
        let params = Params::default();
        let boxes = [cube(Vector3::new(10.0, 0.5, 0.0), 2.0)];
        let bvh = Bvh::new(&boxes, 1e-6);

        let start = Vector3::zeros();
        let goal = Vector3::new(20.0, 0.0, 0.0);
        let path = skirt(&start, &goal, &bvh, &params).unwrap();

        assert_eq!(path.len(), 3);
        assert!(bvh.is_polyline_clear(&path));

        // Went round the side away from the obstacle centre
        assert!(path[1].y < 0.0);
    }

    #[test]
    fn test_skirt_not_needed() {
        let bvh = Bvh::new(&[cube(Vector3::new(10.0, 10.0, 0.0), 1.0)], 1e-6);
        assert!(skirt(&Vector3::zeros(), &Vector3::new(20.0, 0.0, 0.0), &bvh, &Params::default()).is_none());
    }

    #[test]
    fn test_roadmap_through_gap() {
        let params = Params::default();

        // Two boxes leaving no room for a single skirt waypoint
        let boxes = [
            cube(Vector3::new(10.0, 0.0, 0.0), 2.0),
            cube(Vector3::new(10.0, 6.0, 0.0), 2.0),
            cube(Vector3::new(10.0, -6.0, 0.0), 2.0),
        ];
        let bvh = Bvh::new(&boxes, 1e-6);

        let start = Vector3::zeros();
        let goal = Vector3::new(20.0, 0.0, 0.0);
        let res = roadmap(&start, &goal, &bvh, &params);

        let pts = res.points_m.unwrap();
        assert_eq!(pts[0], start);
        assert_eq!(*pts.last().unwrap(), goal);
        assert!(bvh.is_polyline_clear(&pts));
        assert!(res.num_nodes <= params.prm_max_nodes);
    }

    #[test]
    fn test_point_segment_distance() {
        let a = Vector3::zeros();
        let b = Vector3::new(10.0, 0.0, 0.0);
        assert_eq!(point_segment_distance(&Vector3::new(5.0, 3.0, 0.0), &a, &b), 3.0);
        assert_eq!(point_segment_distance(&Vector3::new(-4.0, 3.0, 0.0), &a, &b), 5.0);
    }
}
