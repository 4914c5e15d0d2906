/*!
Math aliases and small vector helpers shared by the solvers.

This module intentionally contains no movement logic. Conventions:
- World axes are Z-up; "planar" and "horizontal" mean the XY components.
- Distances are centimeters, time is seconds.
- Facing is the body-local +X axis rotated by the body orientation (yaw).
*/

use nalgebra as na;

/// Common math aliases for clarity and consistency.
pub type Vec3 = na::Vector3<f32>;
pub type Quat = na::UnitQuaternion<f32>;
pub type Iso = na::Isometry3<f32>;

/// Practical small number for world-space comparisons.
pub const KINDA_SMALL: f32 = 1.0e-4;

/// Tiny number for squared-magnitude and divide-by-zero guards.
pub const SMALL: f32 = 1.0e-8;

/// Build an isometry from a translation and rotation.
#[inline]
pub fn iso(translation: Vec3, rotation: Quat) -> Iso {
    Iso::from_parts(
        na::Translation3::new(translation.x, translation.y, translation.z),
        rotation,
    )
}

/// Copy of `v` with the vertical component removed.
#[inline]
pub fn horizontal(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.y, 0.0)
}

/// Planar (XY) length of `v`.
#[inline]
pub fn size_2d(v: Vec3) -> f32 {
    (v.x * v.x + v.y * v.y).sqrt()
}

/// Squared planar (XY) length of `v`.
#[inline]
pub fn size_sq_2d(v: Vec3) -> f32 {
    v.x * v.x + v.y * v.y
}

/// True if every component of `v` is within `tolerance` of zero.
#[inline]
pub fn is_nearly_zero(v: Vec3, tolerance: f32) -> bool {
    v.x.abs() <= tolerance && v.y.abs() <= tolerance && v.z.abs() <= tolerance
}

/// Normalized copy of `v`, or zero if `v` is too small to normalize.
#[inline]
pub fn safe_normal(v: Vec3) -> Vec3 {
    let len_sq = v.norm_squared();
    if len_sq > SMALL {
        v / len_sq.sqrt()
    } else {
        Vec3::zeros()
    }
}

/// Normalized planar copy of `v` (Z forced to zero), or zero if too small.
#[inline]
pub fn safe_normal_2d(v: Vec3) -> Vec3 {
    safe_normal(horizontal(v))
}

/// Clamp the magnitude of `v` to at most `max_size`.
#[inline]
pub fn clamp_to_max_size(v: Vec3, max_size: f32) -> Vec3 {
    if max_size < KINDA_SMALL {
        return Vec3::zeros();
    }
    let len_sq = v.norm_squared();
    if len_sq > max_size * max_size {
        v * (max_size / len_sq.sqrt())
    } else {
        v
    }
}

/// Project `v` onto the plane defined by the (unit) `normal`.
#[inline]
pub fn plane_project(v: Vec3, normal: Vec3) -> Vec3 {
    v - normal * v.dot(&normal)
}

/// True if all components are finite (rejects NaN and infinities).
#[inline]
pub fn is_finite(v: Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// Yaw-only rotation (about +Z) facing the planar direction of `delta`.
///
/// Returns `None` if the planar delta is too small to define a direction.
#[inline]
pub fn yaw_from_planar_delta(delta: Vec3) -> Option<Quat> {
    if size_sq_2d(delta) <= SMALL {
        return None;
    }
    let yaw = delta.y.atan2(delta.x);
    Some(na::UnitQuaternion::from_axis_angle(&Vec3::z_axis(), yaw))
}

/// Yaw angle (radians about +Z) of a rotation, assuming an upright body.
#[inline]
pub fn yaw_of(rotation: &Quat) -> f32 {
    let fwd = rotation * Vec3::x();
    fwd.y.atan2(fwd.x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_to_max_size_preserves_direction() {
        let v = Vec3::new(3.0, 4.0, 0.0);
        let clamped = clamp_to_max_size(v, 1.0);
        assert!((clamped.norm() - 1.0).abs() < 1.0e-6);
        assert!((safe_normal(clamped) - safe_normal(v)).norm() < 1.0e-6);

        // Under the limit, the vector passes through untouched.
        let small = Vec3::new(0.1, 0.0, 0.0);
        assert_eq!(clamp_to_max_size(small, 1.0), small);
    }

    #[test]
    fn plane_project_removes_normal_component() {
        let n = Vec3::z();
        let v = Vec3::new(1.0, 2.0, 3.0);
        let p = plane_project(v, n);
        assert!(p.z.abs() < 1.0e-6);
        assert!((p.x - 1.0).abs() < 1.0e-6 && (p.y - 2.0).abs() < 1.0e-6);
    }

    #[test]
    fn safe_normal_of_tiny_vector_is_zero() {
        assert_eq!(safe_normal(Vec3::new(1.0e-8, 0.0, 0.0)), Vec3::zeros());
    }

    #[test]
    fn yaw_round_trip() {
        let q = yaw_from_planar_delta(Vec3::new(0.0, 1.0, 0.0)).unwrap();
        assert!((yaw_of(&q) - std::f32::consts::FRAC_PI_2).abs() < 1.0e-5);
    }
}
