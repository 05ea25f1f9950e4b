//! Sparse voxel occupancy grid and A* search over it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use log::trace;
use nalgebra::Vector3;
use ordered_float::NotNan;

use super::safety::SafetyBox;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Integer voxel coordinates.
pub type Cell = [i64; 3];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An occupancy grid over a bounded region, rebuilt for every query.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    /// Minimum corner of the grid
    origin_m: Vector3<f64>,

    voxel_m: f64,

    /// Number of cells along each axis
    dims: Cell,

    blocked: HashSet<Cell>,
}

/// Result of a grid search.
#[derive(Debug, Clone)]
pub struct GridSearch {
    /// Waypoints from the exact start to the exact goal, if the goal was reached
    pub points_m: Option<Vec<Vector3<f64>>>,

    /// Number of nodes expanded
    pub expansions: usize,
}

/// An A* open set entry.
#[derive(Debug, Clone, Copy)]
struct OpenNode {
    cell: Cell,
    f_cost: NotNan<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VoxelGrid {
    /// Build a grid covering `[min_m, max_m]`.
    ///
    /// The voxel size starts at `voxel_m` and grows until the grid has no more than `max_cells`
    /// cells. Every cell overlapping a box is blocked.
    pub fn new(
        min_m: Vector3<f64>,
        max_m: Vector3<f64>,
        voxel_m: f64,
        max_cells: usize,
        boxes: &[SafetyBox],
    ) -> Self {
        let extent = (max_m - min_m).map(|e| e.max(0.0));
        let max_cells = max_cells.max(1) as f64;

        // Smallest voxel meeting the budget, then round the dimensions up
        let volume = extent.x.max(1e-3) * extent.y.max(1e-3) * extent.z.max(1e-3);
        let mut voxel_m = voxel_m.max((volume / max_cells).cbrt()).max(1e-3);
        let mut dims = Self::dims_for(&extent, voxel_m);
        while (dims[0] * dims[1] * dims[2]) as f64 > max_cells {
            voxel_m *= 1.1;
            dims = Self::dims_for(&extent, voxel_m);
        }

        let mut grid = Self {
            origin_m: min_m,
            voxel_m,
            dims,
            blocked: HashSet::new(),
        };

        for sb in boxes {
            grid.block_box(sb);
        }

        grid
    }

    pub fn voxel_m(&self) -> f64 {
        self.voxel_m
    }

    pub fn num_cells(&self) -> i64 {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn num_blocked(&self) -> usize {
        self.blocked.len()
    }

    /// Cell containing the point, `None` if outside the grid.
    pub fn cell_of(&self, point_m: &Vector3<f64>) -> Option<Cell> {
        let rel = (point_m - self.origin_m) / self.voxel_m;
        let cell = [rel.x.floor() as i64, rel.y.floor() as i64, rel.z.floor() as i64];
        if self.in_bounds(&cell) {
            Some(cell)
        } else {
            None
        }
    }

    /// World position of the cell centre.
    pub fn centre_m(&self, cell: &Cell) -> Vector3<f64> {
        self.origin_m
            + Vector3::new(
                cell[0] as f64 + 0.5,
                cell[1] as f64 + 0.5,
                cell[2] as f64 + 0.5,
            ) * self.voxel_m
    }

    /// True if the cell is inside the grid and not blocked.
    pub fn is_free(&self, cell: &Cell) -> bool {
        self.in_bounds(cell) && !self.blocked.contains(cell)
    }

    /// True if every cell the segment passes through is free, sampling at a quarter voxel.
    pub fn is_segment_free(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        let len = (b - a).norm();
        let steps = ((len / (0.25 * self.voxel_m)).ceil() as usize).max(1);
        (0..=steps).all(|k| {
            let p = a + (b - a) * (k as f64 / steps as f64);
            self.cell_of(&p).map_or(false, |c| self.is_free(&c))
        })
    }

    /// A* from `start_m` to `goal_m` over the 26-connected grid.
    ///
    /// The goal is reached when a free cell's centre is within `accept_radius_m` of it, or the
    /// goal's own cell is reached. The start cell is always expanded even if blocked, so a craft
    /// that sits slightly inside an inflated box can still leave it. Diagonal moves which would
    /// cut past a blocked orthogonal neighbour are not allowed.
    pub fn astar(
        &self,
        start_m: &Vector3<f64>,
        goal_m: &Vector3<f64>,
        accept_radius_m: f64,
        max_expansions: usize,
    ) -> GridSearch {
        let mut expansions = 0;

        let (start, goal) = match (self.cell_of(start_m), self.cell_of(goal_m)) {
            (Some(s), Some(g)) => (s, g),
            _ => {
                trace!("Grid search endpoints outside grid");
                return GridSearch {
                    points_m: None,
                    expansions,
                };
            }
        };

        let mut heap = BinaryHeap::new();
        let mut g_costs: HashMap<Cell, f64> = HashMap::new();
        let mut parents: HashMap<Cell, Cell> = HashMap::new();
        let mut closed: HashSet<Cell> = HashSet::new();

        g_costs.insert(start, 0.0);
        if let Ok(f_cost) = NotNan::new((self.centre_m(&start) - goal_m).norm()) {
            heap.push(OpenNode { cell: start, f_cost });
        }

        let mut reached: Option<Cell> = None;

        while let Some(node) = heap.pop() {
            if !closed.insert(node.cell) {
                continue;
            }

            let centre = self.centre_m(&node.cell);
            if node.cell == goal || (centre - goal_m).norm() <= accept_radius_m {
                reached = Some(node.cell);
                break;
            }

            expansions += 1;
            if expansions > max_expansions {
                trace!("Grid search hit the expansion cap ({})", max_expansions);
                break;
            }

            let g = g_costs.get(&node.cell).copied().unwrap_or(std::f64::INFINITY);

            for d in NEIGHBOURS.iter() {
                let next = [node.cell[0] + d[0], node.cell[1] + d[1], node.cell[2] + d[2]];
                if closed.contains(&next) || !self.is_free(&next) || self.cuts_corner(&node.cell, d) {
                    continue;
                }

                let step = (d[0].abs() + d[1].abs() + d[2].abs()) as f64;
                let next_g = g + step.sqrt() * self.voxel_m;

                if next_g >= g_costs.get(&next).copied().unwrap_or(std::f64::INFINITY) {
                    continue;
                }

                if let Ok(f_cost) = NotNan::new(next_g + (self.centre_m(&next) - goal_m).norm()) {
                    g_costs.insert(next, next_g);
                    parents.insert(next, node.cell);
                    heap.push(OpenNode { cell: next, f_cost });
                }
            }
        }

        let points_m = reached.map(|end| {
            // Walk back up the parents
            let mut cells = vec![end];
            let mut cur = end;
            while let Some(p) = parents.get(&cur) {
                cells.push(*p);
                cur = *p;
            }
            cells.reverse();

            // Exact endpoints replace the start and end cell centres
            let mut points = Vec::with_capacity(cells.len() + 1);
            points.push(*start_m);
            for c in &cells[1..] {
                points.push(self.centre_m(c));
            }
            if cells.len() > 1 {
                points.pop();
            }
            points.push(*goal_m);
            points
        });

        GridSearch {
            points_m,
            expansions,
        }
    }

    // ---- PRIVATE ----

    fn dims_for(extent: &Vector3<f64>, voxel_m: f64) -> Cell {
        [
            ((extent.x / voxel_m).ceil() as i64).max(1),
            ((extent.y / voxel_m).ceil() as i64).max(1),
            ((extent.z / voxel_m).ceil() as i64).max(1),
        ]
    }

    fn in_bounds(&self, cell: &Cell) -> bool {
        (0..3).all(|i| cell[i] >= 0 && cell[i] < self.dims[i])
    }

    fn block_box(&mut self, sb: &SafetyBox) {
        let lo = (sb.min_m - self.origin_m) / self.voxel_m;
        let hi = (sb.max_m - self.origin_m) / self.voxel_m;

        let lo = [
            (lo.x.floor() as i64).max(0),
            (lo.y.floor() as i64).max(0),
            (lo.z.floor() as i64).max(0),
        ];
        let hi = [
            (hi.x.floor() as i64).min(self.dims[0] - 1),
            (hi.y.floor() as i64).min(self.dims[1] - 1),
            (hi.z.floor() as i64).min(self.dims[2] - 1),
        ];

        for x in lo[0]..=hi[0] {
            for y in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    self.blocked.insert([x, y, z]);
                }
            }
        }
    }

    /// True if moving by `d` from `cell` would pass a blocked cell sharing only an edge or
    /// corner with the move.
    fn cuts_corner(&self, cell: &Cell, d: &Cell) -> bool {
        let nonzero = d.iter().filter(|c| **c != 0).count();
        if nonzero < 2 {
            return false;
        }

        // Every partial move (a strict, non-empty subset of the axes) must be free
        for mask in 1..7u8 {
            let partial = [
                if mask & 1 != 0 { d[0] } else { 0 },
                if mask & 2 != 0 { d[1] } else { 0 },
                if mask & 4 != 0 { d[2] } else { 0 },
            ];
            if partial == [0, 0, 0] || partial == *d {
                continue;
            }
            let c = [cell[0] + partial[0], cell[1] + partial[1], cell[2] + partial[2]];
            if !self.is_free(&c) {
                return true;
            }
        }

        false
    }
}

/// The 26 neighbour offsets.
#[rustfmt::skip]
const NEIGHBOURS: [Cell; 26] = [
    [-1, -1, -1], [-1, -1, 0], [-1, -1, 1],
    [-1, 0, -1], [-1, 0, 0], [-1, 0, 1],
    [-1, 1, -1], [-1, 1, 0], [-1, 1, 1],
    [0, -1, -1], [0, -1, 0], [0, -1, 1],
    [0, 0, -1], [0, 0, 1],
    [0, 1, -1], [0, 1, 0], [0, 1, 1],
    [1, -1, -1], [1, -1, 0], [1, -1, 1],
    [1, 0, -1], [1, 0, 0], [1, 0, 1],
    [1, 1, -1], [1, 1, 0], [1, 1, 1],
];

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
        // Reversed so the max-heap pops the cheapest node
        other.f_cost.cmp(&self.f_cost)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn wall() -> SafetyBox {
        // A wall across x = 5 with a gap above z = 4
        SafetyBox::from_corners(Vector3::new(4.5, -10.0, -10.0), Vector3::new(5.5, 10.0, 4.0), false)
    }

    #[test]
    fn test_voxel_size_adapts_to_budget() {
        let grid = VoxelGrid::new(Vector3::zeros(), Vector3::repeat(100.0), 0.1, 1000, &[]);
        assert!(grid.num_cells() <= 1000);
        assert!(grid.voxel_m() >= 10.0 - 1e-9);
    }

    #[test]
    fn test_astar_around_wall() {
        let boxes = [wall()];
        let grid = VoxelGrid::new(
            Vector3::new(-2.0, -3.0, -3.0),
            Vector3::new(12.0, 3.0, 8.0),
            0.5,
            100_000,
            &boxes,
        );

        let start = Vector3::new(0.0, 0.0, 0.0);
        let goal = Vector3::new(10.0, 0.0, 0.0);
        let res = grid.astar(&start, &goal, 0.5, 100_000);
        let pts = res.points_m.unwrap();

        assert_eq!(pts[0], start);
        assert_eq!(*pts.last().unwrap(), goal);

        // Every grid segment stays out of the wall (the final hop to the exact goal may not be
        // grid aligned but the goal is in free space here)
        for w in pts.windows(2) {
            assert!(!boxes[0].intersects_segment(&w[0], &w[1], 1e-9));
        }

        // Had to climb over it
        assert!(pts.iter().any(|p| p.z > 4.0));
    }

    #[test]
    fn test_astar_blocked() {
        // The wall fills the whole grid cross section
        let boxes = [SafetyBox::from_corners(
            Vector3::new(4.5, -10.0, -10.0),
            Vector3::new(5.5, 10.0, 10.0),
            false,
        )];
        let grid = VoxelGrid::new(Vector3::repeat(-2.0), Vector3::new(12.0, 2.0, 2.0), 0.5, 100_000, &boxes);
        let res = grid.astar(&Vector3::zeros(), &Vector3::new(10.0, 0.0, 0.0), 0.5, 100_000);
        assert!(res.points_m.is_none());
        assert!(res.expansions > 0);
    }

    #[test]
    fn test_no_corner_cutting() {
        let grid = VoxelGrid::new(
            Vector3::zeros(),
            Vector3::repeat(3.0),
            1.0,
            1000,
            &[SafetyBox::from_corners(Vector3::new(1.2, 0.2, 0.2), Vector3::new(1.8, 0.8, 2.8), false)],
        );
        // Blocked cell [1, 0, z] means the diagonal from [0, 0, z] to [1, 1, z] cuts its edge
        assert!(grid.cuts_corner(&[0, 0, 0], &[1, 1, 0]));
        assert!(!grid.cuts_corner(&[0, 1, 0], &[1, 1, 0]));
    }
}
