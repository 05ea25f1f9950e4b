//! Path post-processing: line of sight shortcutting, corner rounding, grid shortcutting and
//! spline refitting. Every step only ever accepts changes which keep the path clear.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;

use crate::path::{catmull_rom_centripetal, dedup_consecutive, polyline_length, resample_polyline};
use util::maths::try_unit;

use super::{bvh::Bvh, grid::VoxelGrid, Params};

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run the full post-processing pipeline over a clear path.
pub fn post_process(
    points_m: Vec<Vector3<f64>>,
    bvh: &Bvh,
    grid: Option<&VoxelGrid>,
    params: &Params,
) -> Vec<Vector3<f64>> {
    let mut points = dedup_consecutive(&points_m);

    los_shortcut(&mut points, bvh, params.shortcut_max_iters);
    points = round_corners(&points, bvh, params.corner_trim_steps);
    los_shortcut(&mut points, bvh, params.shortcut_max_iters);

    if let Some(grid) = grid {
        points = grid_shortcut(&points, bvh, grid);
    }

    if params.spline_refit {
        if let Some(refit) = spline_refit(&points, bvh, params) {
            points = refit;
        }
    }

    points
}

/// Remove middle points whose neighbours can see each other, repeating until nothing changes
/// or the iteration cap is hit.
pub fn los_shortcut(points_m: &mut Vec<Vector3<f64>>, bvh: &Bvh, max_iters: usize) {
    for _ in 0..max_iters {
        let mut changed = false;
        let mut i = 0;

        while i + 2 < points_m.len() {
            if bvh.is_clear(&points_m[i], &points_m[i + 2]) {
                points_m.remove(i + 1);
                changed = true;
            } else {
                i += 1;
            }
        }

        if !changed {
            break;
        }
    }
}

/// Replace each interior vertex with two points cut back along its adjoining segments.
///
/// For each vertex a grid of trim distances (as fractions of half the shorter adjoining segment)
/// is searched on both sides, and the pair giving the shortest total perimeter while keeping the
/// cut clear is used. Vertices which can't be cut are kept.
pub fn round_corners(points_m: &[Vector3<f64>], bvh: &Bvh, trim_steps: usize) -> Vec<Vector3<f64>> {
    if points_m.len() < 3 || trim_steps == 0 {
        return points_m.to_vec();
    }

    let mut out = vec![points_m[0]];

    for w in points_m.windows(3) {
        let (vertex, next) = (w[1], w[2]);

        // The previous vertex may already have been cut, measure from what we actually have
        let from = out[out.len() - 1];

        let (to_prev, to_next) = match (try_unit(&(from - vertex)), try_unit(&(next - vertex))) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                out.push(vertex);
                continue;
            }
        };

        let max_trim_m = 0.5 * (from - vertex).norm().min((next - vertex).norm());

        let mut best: Option<(f64, Vector3<f64>, Vector3<f64>)> = None;
        for i in 1..=trim_steps {
            for j in 1..=trim_steps {
                let a = vertex + to_prev * (max_trim_m * i as f64 / trim_steps as f64);
                let b = vertex + to_next * (max_trim_m * j as f64 / trim_steps as f64);

                let perimeter = (a - from).norm() + (b - a).norm() + (next - b).norm();
                if best.map_or(false, |(p, _, _)| p <= perimeter) {
                    continue;
                }
                if bvh.is_clear(&a, &b) {
                    best = Some((perimeter, a, b));
                }
            }
        }

        match best {
            Some((_, a, b)) => {
                out.push(a);
                out.push(b);
            }
            None => out.push(vertex),
        }
    }

    out.push(points_m[points_m.len() - 1]);
    dedup_consecutive(&out)
}

/// Greedy furthest-visible shortcut using the grid's occupancy as well as the boxes.
pub fn grid_shortcut(points_m: &[Vector3<f64>], bvh: &Bvh, grid: &VoxelGrid) -> Vec<Vector3<f64>> {
    if points_m.len() < 3 {
        return points_m.to_vec();
    }

    let mut out = vec![points_m[0]];
    let mut i = 0;
    let last = points_m.len() - 1;

    while i < last {
        // Furthest point reachable in a straight line, falling back to the next point
        let mut j = last;
        while j > i + 1 {
            let (a, b) = (&points_m[i], &points_m[j]);
            if bvh.is_clear(a, b) && grid.is_segment_free(a, b) {
                break;
            }
            j -= 1;
        }
        out.push(points_m[j]);
        i = j;
    }

    out
}

/// Fit a centripetal spline through the path and resample it, accepting the result only if it is
/// clear and no more than `spline_max_growth` times the original length.
pub fn spline_refit(points_m: &[Vector3<f64>], bvh: &Bvh, params: &Params) -> Option<Vec<Vector3<f64>>> {
    if points_m.len() < 3 {
        return None;
    }

    let mut dense = Vec::new();
    catmull_rom_centripetal(points_m, params.spline_subdivisions, &mut dense);

    let mut resampled = Vec::new();
    resample_polyline(&dense, params.spline_spacing_m, params.spline_max_points, &mut resampled);

    let original_m = polyline_length(points_m);
    let refit_m = polyline_length(&resampled);

    if refit_m <= original_m * params.spline_max_growth && bvh.is_polyline_clear(&resampled) {
        Some(resampled)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::traj_plan::safety::SafetyBox;

    fn blocker() -> Bvh {
        Bvh::new(
            &[SafetyBox::from_corners(
                Vector3::new(4.0, -1.0, -1.0),
                Vector3::new(6.0, 1.0, 1.0),
                false,
            )],
            1e-6,
        )
    }

    #[test]
    fn test_los_shortcut() {
        let bvh = Bvh::new(&[], 1e-6);
        let mut pts = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(3.0, 1.0, 0.0),
        ];
        los_shortcut(&mut pts, &bvh, 8);
        assert_eq!(pts, vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(3.0, 1.0, 0.0)]);

        // With a blocker in the way the detour point stays
        let bvh = blocker();
        let mut pts = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(5.0, 3.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
        ];
        los_shortcut(&mut pts, &bvh, 8);
        assert_eq!(pts.len(), 3);
    }

    #[test]
    fn test_round_corners_shortens_and_stays_clear() {
        let bvh = blocker();
        let pts = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(5.0, 5.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
        ];

        let rounded = round_corners(&pts, &bvh, 5);
        assert_eq!(rounded[0], pts[0]);
        assert_eq!(*rounded.last().unwrap(), pts[2]);
        assert_eq!(rounded.len(), 4);
        assert!(polyline_length(&rounded) < polyline_length(&pts));
        assert!(bvh.is_polyline_clear(&rounded));
    }

    #[test]
    fn test_spline_refit_growth_limit() {
        let bvh = Bvh::new(&[], 1e-6);
        let mut params = Params::default();
        let pts = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(5.0, 5.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
        ];

        let refit = spline_refit(&pts, &bvh, &params).unwrap();
        assert_eq!(refit[0], pts[0]);
        assert_eq!(*refit.last().unwrap(), pts[2]);

        // Refuse any growth at all and a curved refit can't be accepted
        params.spline_max_growth = 0.5;
        assert!(spline_refit(&pts, &bvh, &params).is_none());
    }
}
