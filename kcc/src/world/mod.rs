/*!
Reference geometry oracle backed by parry3d.

`StaticWorld` holds a set of world shapes with per-surface capability
metadata, a BVH broad phase over the finite shapes, and optional water
volumes. It implements [`GeometryOracle`] and is what the scenario tests (and
hosts without their own collision scene) run the solvers against.

The world is "static" in the collision sense: shapes never appear or vanish
mid-tick, but surfaces flagged dynamic may have their transform and velocity
updated between ticks (moving platforms).
*/

pub mod broad;
mod narrow;

use nalgebra as na;
use parry3d::{bounding_volume::Aabb, shape as pshape};

use crate::geometry::{
    CapsuleDims, GeometryOracle, HitResult, PhysicsVolume, QueryFilter, SurfaceId, SurfaceInfo,
};
use crate::math::{Quat, SMALL, Vec3, iso};

use broad::WorldAccel;
use narrow::CastHit;

/// Static collision shapes supported by the reference world.
///
/// Planes are infinite: `normal . x = dist` in world space. All other shapes
/// carry their own world pose.
#[derive(Clone, Copy, Debug)]
pub enum StaticShape {
    Plane {
        /// World-space unit normal.
        normal: Vec3,
        /// Offset along the normal.
        dist: f32,
    },
    Cuboid {
        half_extents: Vec3,
        translation: Vec3,
        rotation: Quat,
    },
    Ball {
        radius: f32,
        translation: Vec3,
    },
    Capsule {
        radius: f32,
        /// Half height including caps, axis +Z.
        half_height: f32,
        translation: Vec3,
        rotation: Quat,
    },
}

impl StaticShape {
    /// Horizontal plane through `z`, facing up.
    #[inline]
    pub fn floor(z: f32) -> Self {
        Self::Plane {
            normal: Vec3::z(),
            dist: z,
        }
    }

    /// Axis-aligned box.
    #[inline]
    pub fn cuboid(half_extents: Vec3, translation: Vec3) -> Self {
        Self::Cuboid {
            half_extents,
            translation,
            rotation: Quat::identity(),
        }
    }

    /// World-space AABB, or `None` for infinite shapes.
    pub(crate) fn world_aabb(&self) -> Option<Aabb> {
        use parry3d::shape::Shape as _;
        match *self {
            StaticShape::Plane { .. } => None,
            StaticShape::Cuboid {
                half_extents,
                translation,
                rotation,
            } => Some(pshape::Cuboid::new(half_extents).aabb(&iso(translation, rotation))),
            StaticShape::Ball {
                radius,
                translation,
            } => Some(pshape::Ball::new(radius).aabb(&iso(translation, Quat::identity()))),
            StaticShape::Capsule {
                radius,
                half_height,
                translation,
                rotation,
            } => Some(
                pshape::Capsule::new_z((half_height - radius).max(0.0), radius)
                    .aabb(&iso(translation, rotation)),
            ),
        }
    }

    fn set_pose(&mut self, new_translation: Vec3, new_rotation: Quat) {
        match self {
            StaticShape::Plane { normal, dist } => {
                *normal = new_rotation * Vec3::z();
                *dist = normal.dot(&new_translation);
            }
            StaticShape::Cuboid {
                translation,
                rotation,
                ..
            }
            | StaticShape::Capsule {
                translation,
                rotation,
                ..
            } => {
                *translation = new_translation;
                *rotation = new_rotation;
            }
            StaticShape::Ball { translation, .. } => *translation = new_translation,
        }
    }

    fn pose(&self) -> (Vec3, Quat) {
        match *self {
            StaticShape::Plane { normal, dist } => (normal * dist, Quat::identity()),
            StaticShape::Cuboid {
                translation,
                rotation,
                ..
            }
            | StaticShape::Capsule {
                translation,
                rotation,
                ..
            } => (translation, rotation),
            StaticShape::Ball { translation, .. } => (translation, Quat::identity()),
        }
    }
}

/// Axis-aligned water region.
#[derive(Clone, Copy, Debug)]
struct WaterVolume {
    min: Vec3,
    max: Vec3,
    volume: PhysicsVolume,
}

pub struct StaticWorld {
    shapes: Vec<StaticShape>,
    surfaces: Vec<SurfaceInfo>,
    velocities: Vec<Vec3>,
    accel: WorldAccel,
    water: Vec<WaterVolume>,
    nav_floor_z: Option<f32>,
}

impl Default for StaticWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticWorld {
    pub fn new() -> Self {
        Self {
            shapes: Vec::new(),
            surfaces: Vec::new(),
            velocities: Vec::new(),
            accel: WorldAccel::build(&[]),
            water: Vec::new(),
            nav_floor_z: None,
        }
    }

    /// Add a shape with default surface metadata.
    pub fn add(&mut self, shape: StaticShape) -> SurfaceId {
        self.add_with(shape, SurfaceInfo::default())
    }

    /// Add a shape with explicit surface metadata (the id field is assigned
    /// by the world).
    pub fn add_with(&mut self, shape: StaticShape, mut surface: SurfaceInfo) -> SurfaceId {
        let id = (self.shapes.len() + 1) as SurfaceId;
        surface.id = id;
        self.shapes.push(shape);
        self.surfaces.push(surface);
        self.velocities.push(Vec3::zeros());
        self.accel = WorldAccel::build(&self.shapes);
        id
    }

    /// Declare an axis-aligned water region.
    pub fn add_water_volume(&mut self, min: Vec3, max: Vec3) {
        self.water.push(WaterVolume {
            min,
            max,
            volume: PhysicsVolume {
                is_water: true,
                ..PhysicsVolume::default()
            },
        });
    }

    /// Enable trivial navigation data: an infinite nav floor at `z`.
    pub fn set_nav_floor(&mut self, z: f32) {
        self.nav_floor_z = Some(z);
    }

    /// Move a (dynamic) surface to a new pose between ticks.
    pub fn set_surface_pose(&mut self, surface: SurfaceId, translation: Vec3, rotation: Quat) {
        if let Some(shape) = self.shapes.get_mut(surface as usize - 1) {
            shape.set_pose(translation, rotation);
            self.accel = WorldAccel::build(&self.shapes);
        }
    }

    /// Set the instantaneous velocity reported for a surface.
    pub fn set_surface_velocity(&mut self, surface: SurfaceId, velocity: Vec3) {
        if let Some(v) = self.velocities.get_mut(surface as usize - 1) {
            *v = velocity;
        }
    }

    #[inline]
    fn surface_index(surface: SurfaceId) -> Option<usize> {
        (surface > 0).then(|| surface as usize - 1)
    }

    /// Run `cast` against planes plus broad-phase candidates, keeping the
    /// earliest hit and its shape index.
    fn cast_best(
        &self,
        swept: &Aabb,
        filter: QueryFilter,
        mut cast: impl FnMut(&StaticShape) -> Option<CastHit>,
    ) -> Option<(usize, CastHit)> {
        let mut best: Option<(usize, CastHit)> = None;
        let mut consider = |idx: usize, cast: &mut dyn FnMut(&StaticShape) -> Option<CastHit>| {
            if filter.ignore == Some((idx + 1) as SurfaceId) {
                return;
            }
            if let Some(hit) = cast(&self.shapes[idx]) {
                if best.as_ref().map_or(true, |(_, b)| hit.toi < b.toi) {
                    best = Some((idx, hit));
                }
            }
        };

        for &idx in self.accel.plane_indices() {
            consider(idx, &mut cast);
        }
        for idx in self.accel.candidates(swept) {
            consider(idx, &mut cast);
        }
        best
    }

    /// Convert a cast into the full hit report the solvers consume.
    fn hit_from_cast(
        &self,
        idx: usize,
        cast: CastHit,
        capsule: Option<(&pshape::Capsule, &crate::math::Iso)>,
        start: Vec3,
        end: Vec3,
    ) -> HitResult {
        let delta = end - start;
        let surface = self.surfaces[idx];

        if cast.penetrating {
            // Measure the overlap so the caller can depenetrate.
            let (depth, push_normal, impact_point) = match capsule
                .and_then(|(shape, at)| {
                    narrow::contact_capsule_against_static(at, shape, &self.shapes[idx])
                }) {
                Some(contact) => (contact.depth, contact.push_normal, contact.impact_point),
                // Shallow or grazing overlap the contact query cannot see.
                None => (0.0, -crate::math::safe_normal(delta), cast.impact_point),
            };
            return HitResult {
                blocking: true,
                start_penetrating: true,
                time: 0.0,
                trace_start: start,
                trace_end: end,
                location: start,
                impact_point,
                impact_normal: push_normal,
                normal: push_normal,
                penetration_depth: depth,
                surface,
            };
        }

        // Normals oppose the motion: the capsule-side normal points back into
        // the capsule, the target-side normal is the struck face.
        let mut normal = -cast.normal_on_moving;
        let mut impact_normal = cast.normal_on_target;
        if normal.dot(&delta) > 0.0 {
            normal = -normal;
        }
        if impact_normal.dot(&delta) > 0.0 {
            impact_normal = -impact_normal;
        }

        HitResult {
            blocking: true,
            start_penetrating: false,
            time: cast.toi,
            trace_start: start,
            trace_end: end,
            location: start + delta * cast.toi,
            impact_point: cast.impact_point,
            impact_normal,
            normal,
            penetration_depth: 0.0,
            surface,
        }
    }
}

impl GeometryOracle for StaticWorld {
    fn sweep_capsule(
        &self,
        capsule: CapsuleDims,
        start: Vec3,
        end: Vec3,
        filter: QueryFilter,
    ) -> Option<HitResult> {
        let delta = end - start;
        if delta.norm_squared() <= SMALL || capsule.is_nearly_zero() {
            return None;
        }

        let shape = pshape::Capsule::new_z(capsule.cylinder_half_height(), capsule.radius);
        let capsule_iso = iso(start, Quat::identity());
        let swept = broad::swept_capsule_aabb(capsule.half_height, capsule.radius, start, delta, 0.0);

        let (idx, cast) = self.cast_best(&swept, filter, |target| {
            narrow::cast_capsule_against_static(&capsule_iso, &shape, delta, target)
        })?;

        Some(self.hit_from_cast(idx, cast, Some((&shape, &capsule_iso)), start, end))
    }

    fn sweep_box(
        &self,
        half_extents: Vec3,
        rotation: Quat,
        start: Vec3,
        end: Vec3,
        filter: QueryFilter,
    ) -> Option<HitResult> {
        let delta = end - start;
        if delta.norm_squared() <= SMALL {
            return None;
        }

        let box_iso = iso(start, rotation);
        let radius = half_extents.norm();
        let swept = broad::swept_capsule_aabb(radius, radius, start, delta, 0.0);

        let (idx, cast) = self.cast_best(&swept, filter, |target| {
            narrow::cast_box_against_static(&box_iso, half_extents, delta, target)
        })?;

        Some(self.hit_from_cast(idx, cast, None, start, end))
    }

    fn line_trace(&self, start: Vec3, end: Vec3, filter: QueryFilter) -> Option<HitResult> {
        let delta = end - start;
        if delta.norm_squared() <= SMALL {
            return None;
        }

        let swept = Aabb::new(
            na::Point3::new(
                start.x.min(end.x),
                start.y.min(end.y),
                start.z.min(end.z),
            ),
            na::Point3::new(
                start.x.max(end.x),
                start.y.max(end.y),
                start.z.max(end.z),
            ),
        );

        let mut best: Option<(usize, narrow::RayHit)> = None;
        let mut consider = |idx: usize| {
            if filter.ignore == Some((idx + 1) as SurfaceId) {
                return;
            }
            if let Some(hit) = narrow::ray_against_static(start, delta, &self.shapes[idx]) {
                if best.as_ref().map_or(true, |(_, b)| hit.toi < b.toi) {
                    best = Some((idx, hit));
                }
            }
        };
        for &idx in self.accel.plane_indices() {
            consider(idx);
        }
        for idx in self.accel.candidates(&swept) {
            consider(idx);
        }

        let (idx, ray) = best?;
        let mut normal = ray.normal;
        if normal.dot(&delta) > 0.0 {
            normal = -normal;
        }
        Some(HitResult {
            blocking: true,
            start_penetrating: ray.toi <= 0.0,
            time: ray.toi,
            trace_start: start,
            trace_end: end,
            location: ray.point,
            impact_point: ray.point,
            // Line traces report the same normal for both fields.
            impact_normal: normal,
            normal,
            penetration_depth: 0.0,
            surface: self.surfaces[idx],
        })
    }

    fn overlap_capsule(
        &self,
        capsule: CapsuleDims,
        location: Vec3,
        inflation: f32,
        filter: QueryFilter,
    ) -> bool {
        let dims = CapsuleDims::new(
            (capsule.radius + inflation).max(0.0),
            (capsule.half_height + inflation).max(0.0),
        );
        if dims.is_nearly_zero() {
            return false;
        }
        let shape = pshape::Capsule::new_z(dims.cylinder_half_height(), dims.radius);
        let capsule_iso = iso(location, Quat::identity());
        let query =
            broad::swept_capsule_aabb(dims.half_height, dims.radius, location, Vec3::zeros(), 0.0);

        let check = |idx: usize| -> bool {
            filter.ignore != Some((idx + 1) as SurfaceId)
                && narrow::overlap_capsule_against_static(&capsule_iso, &shape, &self.shapes[idx])
        };
        self.accel.plane_indices().iter().any(|&idx| check(idx))
            || self.accel.candidates(&query).into_iter().any(check)
    }

    fn surface_transform(&self, surface: SurfaceId) -> Option<(Vec3, Quat)> {
        Self::surface_index(surface).and_then(|i| self.shapes.get(i).map(StaticShape::pose))
    }

    fn surface_velocity(&self, surface: SurfaceId) -> Vec3 {
        Self::surface_index(surface)
            .and_then(|i| self.velocities.get(i).copied())
            .unwrap_or_else(Vec3::zeros)
    }

    fn physics_volume(&self, location: Vec3) -> PhysicsVolume {
        for w in &self.water {
            if location.x >= w.min.x
                && location.x <= w.max.x
                && location.y >= w.min.y
                && location.y <= w.max.y
                && location.z >= w.min.z
                && location.z <= w.max.z
            {
                return w.volume;
            }
        }
        PhysicsVolume::default()
    }

    fn has_nav_data(&self) -> bool {
        self.nav_floor_z.is_some()
    }

    fn find_nav_floor(&self, location: Vec3) -> Option<Vec3> {
        self.nav_floor_z
            .map(|z| Vec3::new(location.x, location.y, z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capsule() -> CapsuleDims {
        CapsuleDims::new(34.0, 88.0)
    }

    #[test]
    fn downward_sweep_hits_floor_plane() {
        let mut world = StaticWorld::new();
        world.add(StaticShape::floor(0.0));

        // Capsule bottom starts 50 above the floor; sweep down 100.
        let start = Vec3::new(0.0, 0.0, 138.0);
        let end = Vec3::new(0.0, 0.0, 38.0);
        let hit = world
            .sweep_capsule(capsule(), start, end, QueryFilter::default())
            .expect("floor hit");

        assert!(hit.blocking && !hit.start_penetrating);
        assert!((hit.time - 0.5).abs() < 1.0e-3, "time {}", hit.time);
        assert!((hit.impact_normal.z - 1.0).abs() < 1.0e-3);
        assert!(hit.impact_point.z.abs() < 1.0e-2);
    }

    #[test]
    fn sweep_misses_disjoint_geometry() {
        let mut world = StaticWorld::new();
        world.add(StaticShape::cuboid(
            Vec3::new(50.0, 50.0, 50.0),
            Vec3::new(1000.0, 0.0, 0.0),
        ));
        let hit = world.sweep_capsule(
            capsule(),
            Vec3::new(0.0, 0.0, 88.0),
            Vec3::new(100.0, 0.0, 88.0),
            QueryFilter::default(),
        );
        assert!(hit.is_none());
    }

    #[test]
    fn sweep_into_wall_reports_wall_normal() {
        let mut world = StaticWorld::new();
        // Wall face at x = 100.
        world.add(StaticShape::cuboid(
            Vec3::new(50.0, 200.0, 200.0),
            Vec3::new(150.0, 0.0, 200.0),
        ));

        let hit = world
            .sweep_capsule(
                capsule(),
                Vec3::new(0.0, 0.0, 88.0),
                Vec3::new(200.0, 0.0, 88.0),
                QueryFilter::default(),
            )
            .expect("wall hit");
        assert!((hit.impact_normal.x + 1.0).abs() < 1.0e-3);
        // Capsule radius is 34, so the center stops 34 short of the face.
        assert!((hit.location.x - 66.0).abs() < 0.5, "x {}", hit.location.x);
    }

    #[test]
    fn starting_inside_geometry_reports_penetration() {
        let mut world = StaticWorld::new();
        world.add(StaticShape::cuboid(
            Vec3::new(100.0, 100.0, 10.0),
            Vec3::new(0.0, 0.0, 0.0),
        ));

        // Capsule bottom is 5 below the box top (z = 10).
        let start = Vec3::new(0.0, 0.0, 93.0);
        let hit = world
            .sweep_capsule(
                capsule(),
                start,
                start + Vec3::new(0.0, 0.0, -10.0),
                QueryFilter::default(),
            )
            .expect("penetrating hit");
        assert!(hit.start_penetrating);
        assert!(hit.penetration_depth > 1.0, "depth {}", hit.penetration_depth);
        assert!(hit.normal.z > 0.9, "push normal {:?}", hit.normal);
    }

    #[test]
    fn line_trace_hits_floor_and_ignores_filtered_surface() {
        let mut world = StaticWorld::new();
        let floor = world.add(StaticShape::floor(0.0));

        let hit = world
            .line_trace(
                Vec3::new(0.0, 0.0, 100.0),
                Vec3::new(0.0, 0.0, -100.0),
                QueryFilter::default(),
            )
            .expect("ray hit");
        assert!((hit.time - 0.5).abs() < 1.0e-3);
        assert!((hit.normal.z - 1.0).abs() < 1.0e-3);

        let filtered = world.line_trace(
            Vec3::new(0.0, 0.0, 100.0),
            Vec3::new(0.0, 0.0, -100.0),
            QueryFilter {
                ignore: Some(floor),
            },
        );
        assert!(filtered.is_none());
    }

    #[test]
    fn overlap_detects_contained_capsule_only() {
        let mut world = StaticWorld::new();
        world.add(StaticShape::cuboid(
            Vec3::new(50.0, 50.0, 50.0),
            Vec3::new(0.0, 0.0, 0.0),
        ));
        assert!(world.overlap_capsule(
            capsule(),
            Vec3::new(0.0, 0.0, 60.0),
            0.0,
            QueryFilter::default()
        ));
        assert!(!world.overlap_capsule(
            capsule(),
            Vec3::new(0.0, 0.0, 200.0),
            0.0,
            QueryFilter::default()
        ));
        // Inflation closes a small gap.
        assert!(world.overlap_capsule(
            capsule(),
            Vec3::new(0.0, 0.0, 140.0),
            5.0,
            QueryFilter::default()
        ));
    }

    #[test]
    fn water_volume_lookup() {
        let mut world = StaticWorld::new();
        world.add_water_volume(Vec3::new(-100.0, -100.0, -100.0), Vec3::new(100.0, 100.0, 0.0));
        assert!(world.physics_volume(Vec3::new(0.0, 0.0, -50.0)).is_water);
        assert!(!world.physics_volume(Vec3::new(0.0, 0.0, 50.0)).is_water);
    }

    #[test]
    fn dynamic_surface_pose_and_velocity_round_trip() {
        let mut world = StaticWorld::new();
        let id = world.add_with(
            StaticShape::cuboid(Vec3::new(100.0, 100.0, 10.0), Vec3::zeros()),
            SurfaceInfo {
                is_dynamic: true,
                ..SurfaceInfo::default()
            },
        );
        world.set_surface_pose(id, Vec3::new(0.0, 0.0, 25.0), Quat::identity());
        world.set_surface_velocity(id, Vec3::new(50.0, 0.0, 0.0));
        let (loc, _) = world.surface_transform(id).unwrap();
        assert_eq!(loc.z, 25.0);
        assert_eq!(world.surface_velocity(id).x, 50.0);
    }
}
