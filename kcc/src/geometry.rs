/*!
Geometry query interface consumed by the solvers.

The simulator core never performs collision detection itself: every sweep,
ray, and overlap goes through the [`GeometryOracle`] trait, and the only
operation that mutates a body's position is the solver-side move primitive
built on top of it. The crate ships a parry3d-backed reference implementation
in [`crate::world`]; hosts with their own collision scene implement this trait
instead.

Conventions
- Capsules are upright (axis +Z); body yaw never changes the swept shape.
- `HitResult::time` is the fraction of the attempted motion completed before
  the hit, in `[0, 1]`.
- `normal` opposes the motion at the capsule surface and can differ from
  `impact_normal` when an edge is struck; both are unit length.
*/

use crate::math::Vec3;
use nalgebra as na;

/// Opaque identifier of a surface known to the oracle.
pub type SurfaceId = u64;

/// Capsule dimensions for a kinematic actor.
///
/// `half_height` is the full half height including the hemispherical caps, so
/// it is never less than `radius`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CapsuleDims {
    pub radius: f32,
    pub half_height: f32,
}

impl CapsuleDims {
    #[inline]
    pub fn new(radius: f32, half_height: f32) -> Self {
        Self {
            radius,
            half_height: half_height.max(radius),
        }
    }

    /// Half length of the cylindrical section.
    #[inline]
    pub fn cylinder_half_height(&self) -> f32 {
        (self.half_height - self.radius).max(0.0)
    }

    /// True if the capsule has degenerated to (almost) nothing.
    #[inline]
    pub fn is_nearly_zero(&self) -> bool {
        self.radius <= 0.01 || self.half_height <= 0.01
    }
}

/// Per-surface override of the walkable-slope threshold.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum WalkableSlopeOverride {
    /// Use the body's configured threshold.
    #[default]
    Default,
    /// Allow walking on steeper slopes than the body default; the lower
    /// threshold wins.
    Increase { walkable_z: f32 },
    /// Restrict to shallower slopes than the body default; the higher
    /// threshold wins.
    Decrease { walkable_z: f32 },
    /// Never walkable, regardless of slope.
    Unwalkable,
}

impl WalkableSlopeOverride {
    /// Effective walkable-floor Z threshold given the body default.
    #[inline]
    pub fn modify_walkable_floor_z(self, default_z: f32) -> f32 {
        match self {
            Self::Default => default_z,
            Self::Increase { walkable_z } => default_z.min(walkable_z),
            Self::Decrease { walkable_z } => default_z.max(walkable_z),
            // No real normal can reach this threshold.
            Self::Unwalkable => 2.0,
        }
    }
}

/// Capability metadata for a hit surface, supplied by the oracle with every
/// hit so the solvers never need to inspect world objects themselves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceInfo {
    pub id: SurfaceId,
    pub slope_override: WalkableSlopeOverride,
    /// Characters may climb this surface via the step-up path.
    pub can_step_up: bool,
    /// The surface belongs to another character.
    pub is_pawn: bool,
    /// The surface can move (dynamic bases track their transform per tick).
    pub is_dynamic: bool,
}

impl Default for SurfaceInfo {
    fn default() -> Self {
        Self {
            id: 0,
            slope_override: WalkableSlopeOverride::Default,
            can_step_up: true,
            is_pawn: false,
            is_dynamic: false,
        }
    }
}

/// First blocking contact reported by a sweep, line trace, or move.
#[derive(Clone, Copy, Debug)]
pub struct HitResult {
    pub blocking: bool,
    /// The query started overlapping this surface.
    pub start_penetrating: bool,
    /// Fraction of the attempted motion completed before the hit, in [0, 1].
    pub time: f32,
    pub trace_start: Vec3,
    pub trace_end: Vec3,
    /// Center of the swept shape when the hit occurred.
    pub location: Vec3,
    /// Contact point on the hit surface.
    pub impact_point: Vec3,
    /// Surface (face) normal at the contact.
    pub impact_normal: Vec3,
    /// Normal opposing the motion at the capsule surface; differs from
    /// `impact_normal` on edge contacts.
    pub normal: Vec3,
    /// Overlap depth when `start_penetrating` is set.
    pub penetration_depth: f32,
    pub surface: SurfaceInfo,
}

impl HitResult {
    /// A completed move with no contact.
    #[inline]
    pub fn miss(start: Vec3, end: Vec3) -> Self {
        Self {
            blocking: false,
            start_penetrating: false,
            time: 1.0,
            trace_start: start,
            trace_end: end,
            location: end,
            impact_point: end,
            impact_normal: Vec3::zeros(),
            normal: Vec3::zeros(),
            penetration_depth: 0.0,
            surface: SurfaceInfo::default(),
        }
    }

    /// A blocking hit that is usable for slide/deflection math (not an
    /// initial-penetration report).
    #[inline]
    pub fn is_valid_blocking_hit(&self) -> bool {
        self.blocking && !self.start_penetrating
    }
}

impl Default for HitResult {
    fn default() -> Self {
        Self::miss(Vec3::zeros(), Vec3::zeros())
    }
}

/// Query filter threaded through oracle calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryFilter {
    /// Surface to skip entirely. Used while following a movement base so the
    /// body does not collide with the platform carrying it.
    pub ignore: Option<SurfaceId>,
}

/// Fluid/atmosphere properties at a world location.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicsVolume {
    pub is_water: bool,
    /// Maximum fall speed along gravity, cm/s.
    pub terminal_velocity: f32,
    pub fluid_friction: f32,
}

impl Default for PhysicsVolume {
    fn default() -> Self {
        Self {
            is_water: false,
            terminal_velocity: 4000.0,
            fluid_friction: 0.3,
        }
    }
}

/// Collision and world-state queries the solvers depend on.
///
/// All methods are synchronous and read-only with respect to the oracle;
/// implementations must be deterministic for a given world state.
pub trait GeometryOracle {
    /// Sweep an upright capsule from `start` to `end` and report the earliest
    /// blocking hit, if any.
    fn sweep_capsule(
        &self,
        capsule: CapsuleDims,
        start: Vec3,
        end: Vec3,
        filter: QueryFilter,
    ) -> Option<HitResult>;

    /// Sweep an oriented box. Only used for floor probes when flat-base floor
    /// checks are enabled; the default falls back to a capsule enclosing the
    /// box, which is adequate when the host never enables that option.
    fn sweep_box(
        &self,
        half_extents: Vec3,
        rotation: na::UnitQuaternion<f32>,
        start: Vec3,
        end: Vec3,
        filter: QueryFilter,
    ) -> Option<HitResult> {
        let _ = rotation;
        let radius = half_extents.x.hypot(half_extents.y);
        self.sweep_capsule(
            CapsuleDims::new(radius, half_extents.z + radius),
            start,
            end,
            filter,
        )
    }

    /// First blocking hit along a ray.
    fn line_trace(&self, start: Vec3, end: Vec3, filter: QueryFilter) -> Option<HitResult>;

    /// True if an upright capsule at `location`, inflated by `inflation`,
    /// overlaps any blocking geometry.
    fn overlap_capsule(
        &self,
        capsule: CapsuleDims,
        location: Vec3,
        inflation: f32,
        filter: QueryFilter,
    ) -> bool;

    /// Current world transform of a surface. `None` if the surface no longer
    /// exists (dangling base references are cleared by the solver).
    fn surface_transform(&self, surface: SurfaceId) -> Option<(Vec3, na::UnitQuaternion<f32>)>;

    /// Instantaneous linear velocity of a surface; zero for static geometry.
    fn surface_velocity(&self, _surface: SurfaceId) -> Vec3 {
        Vec3::zeros()
    }

    /// Fluid properties at a location.
    fn physics_volume(&self, _location: Vec3) -> PhysicsVolume {
        PhysicsVolume::default()
    }

    /// Whether navigation data is available. NavWalking silently downgrades
    /// to Walking without it.
    fn has_nav_data(&self) -> bool {
        false
    }

    /// Project a point onto the navigation floor, returning the floor point.
    fn find_nav_floor(&self, _location: Vec3) -> Option<Vec3> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slope_override_picks_the_stricter_or_looser_bound() {
        let z = 0.71;
        assert_eq!(
            WalkableSlopeOverride::Default.modify_walkable_floor_z(z),
            0.71
        );
        // Increase allows steeper slopes: lower threshold wins.
        assert_eq!(
            WalkableSlopeOverride::Increase { walkable_z: 0.5 }.modify_walkable_floor_z(z),
            0.5
        );
        assert_eq!(
            WalkableSlopeOverride::Increase { walkable_z: 0.9 }.modify_walkable_floor_z(z),
            0.71
        );
        // Decrease restricts: higher threshold wins.
        assert_eq!(
            WalkableSlopeOverride::Decrease { walkable_z: 0.9 }.modify_walkable_floor_z(z),
            0.9
        );
        // Unwalkable can never be satisfied by a unit normal.
        assert!(WalkableSlopeOverride::Unwalkable.modify_walkable_floor_z(z) > 1.0);
    }

    #[test]
    fn capsule_dims_clamp_half_height_to_radius() {
        let dims = CapsuleDims::new(34.0, 10.0);
        assert_eq!(dims.half_height, 34.0);
        assert_eq!(dims.cylinder_half_height(), 0.0);
    }
}
