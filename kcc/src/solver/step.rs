//! Step-up: treat a blocking hit as a climbable ledge.
//!
//! The attempt is an up / forward / down sweep sequence run inside a
//! [`MoveBatch`] transaction. Every rejection rolls the whole sequence back,
//! so a failed step-up leaves the transform bit-for-bit unchanged.

use super::{MoveBatch, Solver, StepDownResult};
use crate::body::KinematicBody;
use crate::config::{MAX_FLOOR_DIST, MAX_STEP_SIDE_Z};
use crate::geometry::HitResult;
use crate::math::{SMALL, Vec3, safe_normal};

use super::floor::is_within_edge_tolerance;

impl Solver<'_> {
    /// Whether a blocking hit is a candidate for stepping up, based on mode
    /// and the surface's capability flag.
    pub(crate) fn can_step_up(&self, body: &KinematicBody, hit: &HitResult) -> bool {
        if !hit.is_valid_blocking_hit() || body.is_falling() {
            return false;
        }
        hit.surface.can_step_up
    }

    /// Attempt to step over the barrier reported by `in_hit`, moving by
    /// `delta` at the raised height and settling back down.
    ///
    /// On success the transform is at the stepped position and
    /// `out_step_down` (when provided) may carry a floor computed by the
    /// descent. On failure the transform is exactly as before the call.
    pub(crate) fn step_up(
        &mut self,
        body: &mut KinematicBody,
        gravity_dir: Vec3,
        delta: Vec3,
        in_hit: &HitResult,
        mut out_step_down: Option<&mut StepDownResult>,
    ) -> bool {
        if !self.can_step_up(body, in_hit) || body.config.max_step_height <= 0.0 {
            return false;
        }
        if gravity_dir.norm_squared() <= SMALL {
            log::warn!("step_up: degenerate gravity direction, skipping");
            return false;
        }
        let gravity_dir = safe_normal(gravity_dir);

        let old_location = body.position;
        let pawn_radius = body.capsule_radius;
        let pawn_half_height = body.capsule_half_height;

        // Don't bother if the top of the capsule is what hit.
        let initial_impact_z = in_hit.impact_point.z;
        if initial_impact_z > old_location.z + (pawn_half_height - pawn_radius) {
            return false;
        }

        let mut step_travel_up_height = body.config.max_step_height;
        let mut step_travel_down_height = step_travel_up_height;
        let step_side_z = -in_hit.impact_normal.dot(&gravity_dir);
        let mut pawn_initial_floor_base_z = old_location.z - pawn_half_height;
        let mut pawn_floor_point_z = pawn_initial_floor_base_z;

        if body.is_moving_on_ground() && body.current_floor.is_walkable_floor() {
            // The capsule floats a variable amount above the floor, so the
            // step height is enforced from the actual floor contact.
            let floor_dist = body.current_floor.distance_to_floor().max(0.0);
            pawn_initial_floor_base_z -= floor_dist;
            step_travel_up_height = (step_travel_up_height - floor_dist).max(0.0);
            step_travel_down_height = body.config.max_step_height + MAX_FLOOR_DIST * 2.0;

            let hit_vertical_face =
                !is_within_edge_tolerance(in_hit.location, in_hit.impact_point, pawn_radius);
            if !body.current_floor.line_trace && !hit_vertical_face {
                pawn_floor_point_z = body.current_floor.hit.impact_point.z;
            } else {
                // Base the floor point on the capsule bottom lowered by the
                // hover distance.
                pawn_floor_point_z -= body.current_floor.floor_dist;
            }
        }

        // Nothing to climb if the impact is below the walkable floor base.
        if initial_impact_z <= pawn_initial_floor_base_z {
            return false;
        }

        let mut scope = MoveBatch::begin(body);
        let rotation = body.orientation;

        // Up.
        let sweep_up_hit =
            self.move_updated_component(body, -gravity_dir * step_travel_up_height, rotation, true);
        if sweep_up_hit.start_penetrating {
            scope.revert(body);
            return false;
        }

        // Forward.
        scope.record(body);
        let mut hit = self.move_updated_component(body, delta, rotation, true);
        if hit.blocking {
            if hit.start_penetrating {
                scope.revert(body);
                return false;
            }

            // Blocked above and ahead: notify about the upward hit too; the
            // forward hit gets handled below either way.
            if sweep_up_hit.blocking {
                let up_copy = sweep_up_hit;
                self.handle_impact(body, &up_copy, 0.0, Vec3::zeros());
            }
            let hit_copy = hit;
            self.handle_impact(body, &hit_copy, 0.0, delta);

            // Slide along the obstruction at the raised height.
            let forward_hit_time = hit.time;
            let forward_slide_amount =
                self.slide_along_surface(body, delta, 1.0 - hit.time, hit_copy.normal, &mut hit, true);

            // If neither the forward move nor the slide got anywhere, the
            // step-up is pointless.
            if forward_hit_time == 0.0 && forward_slide_amount == 0.0 {
                scope.revert(body);
                return false;
            }
        }

        // Down.
        scope.record(body);
        let hit =
            self.move_updated_component(body, gravity_dir * step_travel_down_height, rotation, true);
        if hit.start_penetrating {
            scope.revert(body);
            return false;
        }

        let mut step_down_result = StepDownResult::default();
        if hit.is_valid_blocking_hit() {
            // Reject if the sequence gained more height than a step allows.
            let delta_z = hit.impact_point.z - pawn_floor_point_z;
            if delta_z > body.config.max_step_height {
                scope.revert(body);
                return false;
            }

            if !self.is_walkable(body, &hit) {
                // An unwalkable normal opposing the move is a wall, not a
                // step.
                if delta.dot(&hit.impact_normal) < 0.0 {
                    scope.revert(body);
                    return false;
                }
                // Stepping down onto an unwalkable surface is fine (we slide
                // off), but not if it leaves us higher than we started.
                if hit.location.z > old_location.z {
                    scope.revert(body);
                    return false;
                }
            }

            // Landing near the capsule edge is not a stable result; keep this
            // consistent with the floor probes.
            if !is_within_edge_tolerance(hit.location, hit.impact_point, pawn_radius) {
                scope.revert(body);
                return false;
            }

            // Don't climb onto surfaces that refuse to carry us.
            if delta_z > 0.0 && !self.can_step_up(body, &hit) {
                scope.revert(body);
                return false;
            }

            // Validate the floor here so the caller can skip its own probe.
            if out_step_down.is_some() {
                let position = body.position;
                let floor = self.find_floor(body, position, false, Some(&hit));

                if hit.location.z > old_location.z {
                    // An actual stair step we cannot perch on (rare): abort
                    // and slide along the stair face instead.
                    if !floor.blocking_hit && step_side_z < MAX_STEP_SIDE_Z {
                        scope.revert(body);
                        return false;
                    }
                }

                step_down_result = StepDownResult {
                    computed_floor: true,
                    floor,
                };
            }
        }

        if let Some(out) = out_step_down.as_deref_mut() {
            *out = step_down_result;
        }

        // The vertical portion of this move must not feed the
        // velocity-from-displacement recompute.
        body.just_teleported |= !body.config.maintain_horizontal_ground_velocity;

        scope.commit();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::MovementMode;
    use crate::config::SolverConfig;
    use crate::geometry::{GeometryOracle, SurfaceInfo};
    use crate::world::{StaticShape, StaticWorld};

    // Ground box top at z = 0 plus a step of the given height in front of
    // the body at x >= 50.
    fn world_with_step(step_height: f32) -> StaticWorld {
        let mut world = StaticWorld::new();
        world.add(StaticShape::cuboid(
            Vec3::new(2000.0, 2000.0, 100.0),
            Vec3::new(0.0, 0.0, -100.0),
        ));
        world.add(StaticShape::cuboid(
            Vec3::new(100.0, 200.0, step_height * 0.5),
            Vec3::new(150.0, 0.0, step_height * 0.5),
        ));
        world
    }

    fn grounded_body(solver: &mut Solver<'_>, x: f32) -> KinematicBody {
        let mut body = KinematicBody::new(Vec3::new(x, 0.0, 90.15), 34.0, 88.0);
        body.movement_mode = MovementMode::Walking;
        let position = body.position;
        body.current_floor = solver.find_floor(&mut body, position, false, None);
        assert!(body.current_floor.is_walkable_floor());
        body
    }

    fn forward_hit(world: &StaticWorld, body: &KinematicBody, delta: Vec3) -> HitResult {
        world
            .sweep_capsule(
                body.capsule(),
                body.position,
                body.position + delta,
                Default::default(),
            )
            .expect("expected to hit the step face")
    }

    #[test]
    fn climbs_a_legal_step() {
        let world = world_with_step(20.0);
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        // Standing just shy of the step face at x = 50.
        let mut body = grounded_body(&mut solver, 10.0);

        let delta = Vec3::new(20.0, 0.0, 0.0);
        let hit = forward_hit(&world, &body, delta);
        let mut step_down = StepDownResult::default();
        let climbed = solver.step_up(
            &mut body,
            Vec3::new(0.0, 0.0, -1.0),
            delta,
            &hit,
            Some(&mut step_down),
        );

        assert!(climbed);
        // Ended up on top of the 20-high step, past the face.
        assert!(body.position.z > 90.15 + 10.0, "z {}", body.position.z);
        assert!(body.position.x > 10.0);
        assert!(step_down.computed_floor);
        assert!(step_down.floor.is_walkable_floor());
    }

    #[test]
    fn rejects_an_unclimbable_wall_atomically() {
        let world = world_with_step(80.0);
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        // Standing flush against the 80-high wall: the raised forward sweep
        // cannot travel and the slide has nowhere to go.
        let mut body = grounded_body(&mut solver, 15.95);

        let saved_position = body.position;
        let saved_orientation = body.orientation;

        let delta = Vec3::new(20.0, 0.0, 0.0);
        let hit = forward_hit(&world, &body, delta);
        let mut step_down = StepDownResult::default();
        let climbed = solver.step_up(
            &mut body,
            Vec3::new(0.0, 0.0, -1.0),
            delta,
            &hit,
            Some(&mut step_down),
        );

        assert!(!climbed);
        // Bit-for-bit rollback.
        assert_eq!(body.position, saved_position);
        assert_eq!(body.orientation, saved_orientation);
        assert!(!step_down.computed_floor);
    }

    #[test]
    fn refuses_surfaces_that_forbid_stepping() {
        let mut world = StaticWorld::new();
        world.add(StaticShape::cuboid(
            Vec3::new(2000.0, 2000.0, 100.0),
            Vec3::new(0.0, 0.0, -100.0),
        ));
        world.add_with(
            StaticShape::cuboid(Vec3::new(100.0, 200.0, 10.0), Vec3::new(150.0, 0.0, 10.0)),
            SurfaceInfo {
                can_step_up: false,
                ..SurfaceInfo::default()
            },
        );
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        let mut body = grounded_body(&mut solver, 10.0);

        let saved_position = body.position;
        let delta = Vec3::new(20.0, 0.0, 0.0);
        let hit = forward_hit(&world, &body, delta);
        let climbed = solver.step_up(&mut body, Vec3::new(0.0, 0.0, -1.0), delta, &hit, None);

        assert!(!climbed);
        assert_eq!(body.position, saved_position);
    }

    #[test]
    fn zero_gravity_direction_degrades_gracefully() {
        let world = world_with_step(20.0);
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        let mut body = grounded_body(&mut solver, 10.0);

        let delta = Vec3::new(20.0, 0.0, 0.0);
        let hit = forward_hit(&world, &body, delta);
        assert!(!solver.step_up(&mut body, Vec3::zeros(), delta, &hit, None));
    }
}
