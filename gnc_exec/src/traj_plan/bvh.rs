//! Bounding volume hierarchy over safety boxes, for fast segment queries.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;

use super::safety::{segment_entry_t, SafetyBox};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum number of boxes held in a leaf.
const LEAF_SIZE: usize = 2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A static BVH, built once per planning query.
#[derive(Debug, Clone)]
pub struct Bvh {
    boxes: Vec<SafetyBox>,

    /// Box indices, ordered so every leaf refers to a contiguous run
    order: Vec<usize>,

    nodes: Vec<Node>,

    epsilon_m: f64,
}

#[derive(Debug, Clone)]
struct Node {
    min_m: Vector3<f64>,
    max_m: Vector3<f64>,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf { first: usize, count: usize },
    Inner { left: usize, right: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Bvh {
    /// Build the hierarchy with a median split along the longest axis of the box centres.
    pub fn new(boxes: &[SafetyBox], epsilon_m: f64) -> Self {
        let mut bvh = Self {
            boxes: boxes.to_vec(),
            order: (0..boxes.len()).collect(),
            nodes: Vec::with_capacity(2 * boxes.len()),
            epsilon_m,
        };

        if !boxes.is_empty() {
            bvh.build(0, boxes.len());
        }

        bvh
    }

    pub fn boxes(&self) -> &[SafetyBox] {
        &self.boxes
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// True if the segment intersects any box.
    pub fn segment_hits_any(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        let mut hit = false;
        self.visit(a, b, |_, _| {
            hit = true;
            false
        });
        hit
    }

    /// True if the segment is clear of every box.
    pub fn is_clear(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        !self.segment_hits_any(a, b)
    }

    /// True if every segment of the polyline is clear.
    pub fn is_polyline_clear(&self, points_m: &[Vector3<f64>]) -> bool {
        points_m.windows(2).all(|w| self.is_clear(&w[0], &w[1]))
    }

    /// First box hit along the segment, as `(box index, entry parameter)`.
    pub fn first_hit(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        self.visit(a, b, |i, t| {
            if best.map_or(true, |(_, bt)| t < bt) {
                best = Some((i, t));
            }
            true
        });
        best
    }

    // ---- PRIVATE ----

    /// Visit every box hit by the segment, stopping early if `f` returns false.
    fn visit<F: FnMut(usize, f64) -> bool>(&self, a: &Vector3<f64>, b: &Vector3<f64>, mut f: F) {
        if self.nodes.is_empty() {
            return;
        }

        let mut stack = vec![0usize];
        while let Some(ni) = stack.pop() {
            let node = &self.nodes[ni];
            if segment_entry_t(a, b, &node.min_m, &node.max_m, self.epsilon_m).is_none() {
                continue;
            }

            match node.kind {
                NodeKind::Leaf { first, count } => {
                    for &bi in &self.order[first..first + count] {
                        let sb = &self.boxes[bi];
                        if let Some(t) = segment_entry_t(a, b, &sb.min_m, &sb.max_m, self.epsilon_m) {
                            if !f(bi, t) {
                                return;
                            }
                        }
                    }
                }
                NodeKind::Inner { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
    }

    /// Recursively build the node covering `order[first..first + count]`, returning its index.
    fn build(&mut self, first: usize, count: usize) -> usize {
        let run = &self.order[first..first + count];

        let mut min_m = Vector3::repeat(std::f64::INFINITY);
        let mut max_m = Vector3::repeat(std::f64::NEG_INFINITY);
        let mut cmin = min_m;
        let mut cmax = max_m;
        for &bi in run {
            let sb = &self.boxes[bi];
            min_m = min_m.inf(&sb.min_m);
            max_m = max_m.sup(&sb.max_m);
            let c = sb.centre_m();
            cmin = cmin.inf(&c);
            cmax = cmax.sup(&c);
        }

        let index = self.nodes.len();
        self.nodes.push(Node {
            min_m,
            max_m,
            kind: NodeKind::Leaf { first, count },
        });

        if count <= LEAF_SIZE {
            return index;
        }

        let axis = (cmax - cmin).imax();
        let boxes = &self.boxes;
        self.order[first..first + count].sort_by(|&i, &j| {
            boxes[i].centre_m()[axis]
                .partial_cmp(&boxes[j].centre_m()[axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let half = count / 2;
        let left = self.build(first, half);
        let right = self.build(first + half, count - half);
        self.nodes[index].kind = NodeKind::Inner { left, right };

        index
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::traj_plan::safety::does_line_intersect_any_safety_box;
    use proptest::prelude::*;

    fn cube(c: [f64; 3], h: f64) -> SafetyBox {
        let c = Vector3::from(c);
        SafetyBox::from_corners(c - Vector3::repeat(h), c + Vector3::repeat(h), false)
    }

    #[test]
    fn test_first_hit() {
        let boxes = vec![
            cube([10.0, 0.0, 0.0], 1.0),
            cube([5.0, 0.0, 0.0], 1.0),
            cube([5.0, 10.0, 0.0], 1.0),
            cube([20.0, 0.0, 0.0], 1.0),
        ];
        let bvh = Bvh::new(&boxes, 1e-6);

        let (i, t) = bvh.first_hit(&Vector3::zeros(), &Vector3::new(30.0, 0.0, 0.0)).unwrap();
        assert_eq!(i, 1);
        assert!((t - 4.0 / 30.0).abs() < 1e-6);

        assert!(bvh.first_hit(&Vector3::new(0.0, 5.0, 0.0), &Vector3::new(30.0, 5.0, 0.0)).is_none());
        assert!(Bvh::new(&[], 1e-6).is_clear(&Vector3::zeros(), &Vector3::x()));
    }

    proptest! {
        #[test]
        fn test_matches_brute_force(
            centres in prop::collection::vec(prop::array::uniform3(-20.0..20.0f64), 0..30),
            a in prop::array::uniform3(-25.0..25.0f64),
            b in prop::array::uniform3(-25.0..25.0f64),
        ) {
            let boxes: Vec<SafetyBox> = centres.iter().map(|c| cube(*c, 1.5)).collect();
            let bvh = Bvh::new(&boxes, 1e-6);
            let (a, b) = (Vector3::from(a), Vector3::from(b));
            prop_assert_eq!(
                bvh.segment_hits_any(&a, &b),
                does_line_intersect_any_safety_box(&a, &b, &boxes, 1e-6)
            );
        }
    }
}
