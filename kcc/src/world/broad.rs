//! Broad-phase acceleration over immutable (or rarely mutated) world statics.
//!
//! Finite shapes are indexed in a BVH by world-space AABB; planes are infinite
//! and kept in a separate index list that every query visits.

use nalgebra as na;
use parry3d::{
    bounding_volume::Aabb,
    partitioning::{Bvh, BvhBuildStrategy},
    shape as pshape,
};

use super::StaticShape;
use crate::math::Vec3;

pub struct WorldAccel {
    /// BVH over finite static shapes (AABBs).
    bvh: Bvh,
    /// Indices into the original shape slice for the BVH leaves.
    non_plane_indices: Vec<usize>,
    /// Indices into the original shape slice for planes.
    plane_indices: Vec<usize>,
}

impl WorldAccel {
    /// Build an accelerator over `shapes`. Finite shapes get a world-space
    /// AABB and a BVH leaf; planes go to `plane_indices`.
    pub fn build(shapes: &[StaticShape]) -> Self {
        let mut aabbs: Vec<Aabb> = Vec::new();
        let mut non_plane_indices: Vec<usize> = Vec::new();
        let mut plane_indices: Vec<usize> = Vec::new();

        for (i, shape) in shapes.iter().enumerate() {
            match shape.world_aabb() {
                Some(aabb) => {
                    aabbs.push(aabb);
                    non_plane_indices.push(i);
                }
                None => plane_indices.push(i),
            }
        }

        Self {
            bvh: Bvh::from_leaves(BvhBuildStrategy::Binned, &aabbs),
            non_plane_indices,
            plane_indices,
        }
    }

    #[inline]
    pub fn plane_indices(&self) -> &[usize] {
        &self.plane_indices
    }

    /// Candidate shape indices whose AABB intersects `query`, referencing the
    /// original shape slice.
    pub fn candidates(&self, query: &Aabb) -> Vec<usize> {
        self.bvh
            .intersect_aabb(query)
            .map(|leaf| self.non_plane_indices[leaf as usize])
            .collect()
    }
}

/// Swept AABB for an upright capsule moving from `start` by `delta`, inflated
/// by `margin` to conservatively include near misses.
pub fn swept_capsule_aabb(half_height: f32, radius: f32, start: Vec3, delta: Vec3, margin: f32) -> Aabb {
    let capsule = pshape::Capsule::new_z((half_height - radius).max(0.0), radius);

    let iso_start = na::Isometry3::from_parts(
        na::Translation3::new(start.x, start.y, start.z),
        na::UnitQuaternion::identity(),
    );
    let end = start + delta;
    let iso_end = na::Isometry3::from_parts(
        na::Translation3::new(end.x, end.y, end.z),
        na::UnitQuaternion::identity(),
    );

    use parry3d::shape::Shape as _;
    let mut swept = merge(&capsule.aabb(&iso_start), &capsule.aabb(&iso_end));

    if margin > 0.0 {
        let m = na::Vector3::new(margin, margin, margin);
        swept.mins -= m;
        swept.maxs += m;
    }

    swept
}

fn merge(a: &Aabb, b: &Aabb) -> Aabb {
    Aabb {
        mins: na::Point3::new(
            a.mins.x.min(b.mins.x),
            a.mins.y.min(b.mins.y),
            a.mins.z.min(b.mins.z),
        ),
        maxs: na::Point3::new(
            a.maxs.x.max(b.maxs.x),
            a.maxs.y.max(b.maxs.y),
            a.maxs.z.max(b.maxs.z),
        ),
    }
}
