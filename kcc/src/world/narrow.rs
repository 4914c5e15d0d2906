//! Thin wrappers over parry3d narrow-phase queries.
//!
//! All casts report both contact normals in world space: the normal on the
//! moving shape (used for the capsule-side `normal`) and the normal on the
//! target (the face `impact_normal`). Witness points come back in each
//! shape's local frame and are transformed here.

use nalgebra as na;
use parry3d::{
    query::{self, Ray, ShapeCastOptions, ShapeCastStatus},
    shape as pshape,
    shape::Shape,
};

use super::StaticShape;
use crate::math::{Iso, Vec3, iso};

/// World-space result of one shape cast.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CastHit {
    /// Fraction of the cast translation, in [0, 1].
    pub toi: f32,
    /// Contact point on the target surface.
    pub impact_point: Vec3,
    /// Outward normal on the moving shape at the contact.
    pub normal_on_moving: Vec3,
    /// Outward normal on the target surface at the contact.
    pub normal_on_target: Vec3,
    /// The shapes were already intersecting at the start of the cast.
    pub penetrating: bool,
}

/// Overlap separation data for a shape pair in contact.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ContactHit {
    /// Penetration depth (positive when overlapping).
    pub depth: f32,
    /// Outward normal on the target, i.e. the direction that separates the
    /// moving shape from it.
    pub push_normal: Vec3,
    pub impact_point: Vec3,
}

/// World-space ray hit.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RayHit {
    pub toi: f32,
    pub normal: Vec3,
    pub point: Vec3,
}

fn cast_shape_pair(
    moving_iso: &Iso,
    moving: &dyn Shape,
    vel: Vec3,
    target_iso: &Iso,
    target: &dyn Shape,
) -> Option<CastHit> {
    let mut opts = ShapeCastOptions::with_max_time_of_impact(1.0);
    opts.stop_at_penetration = true;

    let hit = query::cast_shapes(
        moving_iso,
        &vel,
        moving,
        target_iso,
        &na::Vector3::zeros(),
        target,
        opts,
    )
    .ok()??;

    let penetrating = hit.status == ShapeCastStatus::PenetratingOrWithinTargetDist;
    let impact_point = target_iso.transform_point(&hit.witness2);

    Some(CastHit {
        toi: hit.time_of_impact,
        impact_point: impact_point.coords,
        normal_on_moving: moving_iso.rotation * hit.normal1.into_inner(),
        normal_on_target: target_iso.rotation * hit.normal2.into_inner(),
        penetrating,
    })
}

/// Resolve a static shape into a parry shape and world isometry, then run `f`.
fn with_parry_shape<R>(shape: &StaticShape, f: impl FnOnce(&Iso, &dyn Shape) -> R) -> R {
    match *shape {
        StaticShape::Plane { normal, dist } => {
            let unit_n = na::Unit::new_normalize(normal);
            let plane = pshape::HalfSpace { normal: unit_n };
            let plane_iso = iso(normal * dist, na::UnitQuaternion::identity());
            f(&plane_iso, &plane)
        }
        StaticShape::Cuboid {
            half_extents,
            translation,
            rotation,
        } => {
            let cuboid = pshape::Cuboid::new(half_extents);
            f(&iso(translation, rotation), &cuboid)
        }
        StaticShape::Ball {
            radius,
            translation,
        } => {
            let ball = pshape::Ball::new(radius);
            f(&iso(translation, na::UnitQuaternion::identity()), &ball)
        }
        StaticShape::Capsule {
            radius,
            half_height,
            translation,
            rotation,
        } => {
            let capsule = pshape::Capsule::new_z((half_height - radius).max(0.0), radius);
            f(&iso(translation, rotation), &capsule)
        }
    }
}

/// Cast a moving upright capsule against one static shape.
///
/// `vel` is the full world-space translation for the cast; the returned `toi`
/// is the fraction of it.
pub(crate) fn cast_capsule_against_static(
    capsule_iso: &Iso,
    capsule: &pshape::Capsule,
    vel: Vec3,
    shape: &StaticShape,
) -> Option<CastHit> {
    with_parry_shape(shape, |target_iso, target| {
        cast_shape_pair(capsule_iso, capsule, vel, target_iso, target)
    })
}

/// Cast a moving oriented box against one static shape.
pub(crate) fn cast_box_against_static(
    box_iso: &Iso,
    half_extents: Vec3,
    vel: Vec3,
    shape: &StaticShape,
) -> Option<CastHit> {
    let cuboid = pshape::Cuboid::new(half_extents);
    with_parry_shape(shape, |target_iso, target| {
        cast_shape_pair(box_iso, &cuboid, vel, target_iso, target)
    })
}

/// Closest-point/overlap query used to measure penetration depth after a cast
/// reports an initial overlap.
pub(crate) fn contact_capsule_against_static(
    capsule_iso: &Iso,
    capsule: &pshape::Capsule,
    shape: &StaticShape,
) -> Option<ContactHit> {
    with_parry_shape(shape, |target_iso, target| {
        let contact = query::contact(capsule_iso, capsule, target_iso, target, 0.0).ok()??;
        if contact.dist >= 0.0 {
            return None;
        }
        Some(ContactHit {
            depth: -contact.dist,
            push_normal: contact.normal2.into_inner(),
            impact_point: contact.point2.coords,
        })
    })
}

/// Ray cast against one static shape. `dir` is unnormalized; `toi` is the
/// fraction of it, capped at 1.
pub(crate) fn ray_against_static(origin: Vec3, dir: Vec3, shape: &StaticShape) -> Option<RayHit> {
    with_parry_shape(shape, |target_iso, target| {
        let ray = Ray::new(na::Point3::from(origin), dir);
        let hit = target.cast_ray_and_get_normal(target_iso, &ray, 1.0, true)?;
        Some(RayHit {
            toi: hit.time_of_impact,
            normal: hit.normal,
            point: origin + dir * hit.time_of_impact,
        })
    })
}

/// True if the capsule intersects the static shape.
pub(crate) fn overlap_capsule_against_static(
    capsule_iso: &Iso,
    capsule: &pshape::Capsule,
    shape: &StaticShape,
) -> bool {
    with_parry_shape(shape, |target_iso, target| {
        query::intersection_test(capsule_iso, capsule, target_iso, target).unwrap_or(false)
    })
}
