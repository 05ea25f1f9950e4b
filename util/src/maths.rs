//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Vector3, UnitQuaternion};
use num_traits::Float;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Below this norm a vector is treated as having no direction.
pub const DIRECTION_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Clamp a value into `[min, max]`.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    value.max(min).min(max)
}

/// Scale the vector down so its norm does not exceed `max_norm`, keeping its direction.
///
/// A non-positive `max_norm` disables the limit.
pub fn clamp_norm(v: &Vector3<f64>, max_norm: f64) -> Vector3<f64> {
    let n = v.norm();
    if max_norm > 0.0 && n > max_norm {
        v * (max_norm / n)
    } else {
        *v
    }
}

/// Normalise the vector, returning `None` when it has (almost) no length.
pub fn try_unit(v: &Vector3<f64>) -> Option<Vector3<f64>> {
    v.try_normalize(DIRECTION_EPSILON)
}

/// Return any unit vector perpendicular to `v`.
pub fn any_perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    // Cross with the axis least aligned with v
    let a = v.abs();
    let other = if a.x <= a.y && a.x <= a.z {
        Vector3::x()
    } else if a.y <= a.z {
        Vector3::y()
    } else {
        Vector3::z()
    };

    try_unit(&v.cross(&other)).unwrap_or_else(Vector3::x)
}

/// Error rotation from `current` to `target` expressed as a scaled axis in the body frame of
/// `current`, always taking the shortest arc.
pub fn attitude_error_body(
    current: &UnitQuaternion<f64>,
    target: &UnitQuaternion<f64>,
) -> Vector3<f64> {
    let mut q_err = current.inverse() * target;

    // q and -q are the same rotation, pick the one with positive scalar part
    if q_err.w < 0.0 {
        q_err = UnitQuaternion::new_unchecked(-q_err.into_inner());
    }

    q_err.scaled_axis()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(2.0, -1.0, 1.0), 1.0);
        assert_eq!(clamp(-2.0, -1.0, 1.0), -1.0);
        assert_eq!(clamp(0.25, -1.0, 1.0), 0.25);
    }

    #[test]
    fn test_clamp_norm() {
        let v = Vector3::new(3.0, 4.0, 0.0);
        assert!((clamp_norm(&v, 1.0).norm() - 1.0).abs() < 1e-12);
        assert_eq!(clamp_norm(&v, 10.0), v);
        assert_eq!(clamp_norm(&v, 0.0), v);
    }

    #[test]
    fn test_any_perpendicular() {
        for v in &[Vector3::x(), Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.0, 0.0, -5.0)] {
            let p = any_perpendicular(v);
            assert!(p.dot(v).abs() < 1e-9);
            assert!((p.norm() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_attitude_error_shortest_arc() {
        let current = UnitQuaternion::identity();
        let target = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3);
        let err = attitude_error_body(&current, &target);
        assert!((err - Vector3::new(0.0, 0.0, 0.3)).norm() < 1e-9);

        // Same rotation with the quaternion sign flipped still gives the short way round
        let flipped = UnitQuaternion::new_unchecked(-target.into_inner());
        let err = attitude_error_body(&current, &flipped);
        assert!((err - Vector3::new(0.0, 0.0, 0.3)).norm() < 1e-9);
    }
}
