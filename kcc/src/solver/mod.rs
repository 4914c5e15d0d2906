/*!
Stateless movement solver.

[`Solver`] bundles the injected geometry oracle, the per-tick
[`SolverConfig`], and the event sink for one tick; all per-actor state lives
on the [`KinematicBody`] passed into every call. The sub-modules split the
work by concern:

- `moving`:   the move primitive, penetration recovery, move transactions
- `velocity`: the shared velocity model and braking
- `floor`:    floor probing, perch validation, floor-height adjustment
- `slide`:    slide vectors, two-wall resolution, impact notifications
- `step`:     step-up with atomic rollback
- `walking`:  the ground integrator and ledge policy
- `falling`:  the airborne integrator and landing detection
- `swim_fly`: flying, swimming, nav-walking, custom dispatch
- `modes`:    the movement-mode transition machine
*/

mod falling;
mod floor;
mod modes;
mod moving;
mod slide;
mod step;
mod swim_fly;
mod velocity;
mod walking;

pub use moving::MoveBatch;

use crate::body::{FloorResult, KinematicBody, MovementBase, MovementMode};
use crate::config::{MIN_TICK_TIME, MOVE_SKIN, SolverConfig};
use crate::events::MovementEvent;
use crate::geometry::{CapsuleDims, GeometryOracle, QueryFilter, SurfaceId, SurfaceInfo};
use crate::math::{SMALL, Vec3, is_finite, iso, yaw_from_planar_delta, yaw_of};
use nalgebra as na;

/// Floor computed as a side effect of a step-down, so the caller can skip its
/// own probe.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StepDownResult {
    pub computed_floor: bool,
    pub floor: FloorResult,
}

/// One tick's worth of solver context: oracle, per-tick config, event sink.
///
/// Construct one per tick (or borrow one from [`crate::simulator::Simulator`])
/// and call [`Solver::perform_movement`] per body.
pub struct Solver<'a> {
    pub(crate) world: &'a dyn GeometryOracle,
    pub(crate) config: SolverConfig,
    pub(crate) events: &'a mut Vec<MovementEvent>,
    /// Surface skipped by move sweeps, guarded around based-movement updates.
    pub(crate) move_ignore: Option<SurfaceId>,
}

impl<'a> Solver<'a> {
    pub fn new(
        world: &'a dyn GeometryOracle,
        config: SolverConfig,
        events: &'a mut Vec<MovementEvent>,
    ) -> Self {
        Self {
            world,
            config,
            events,
            move_ignore: None,
        }
    }

    #[inline]
    pub(crate) fn query_filter(&self) -> QueryFilter {
        QueryFilter {
            ignore: self.move_ignore,
        }
    }

    /// Scrub recoverable numeric corruption and decide whether this body can
    /// be simulated at all this tick.
    pub(crate) fn has_valid_data(&self, body: &mut KinematicBody) -> bool {
        if !is_finite(body.velocity) {
            log::error!("body {:?}: velocity is NaN/Inf, zeroing", body.id);
            body.velocity = Vec3::zeros();
        }
        if !is_finite(body.acceleration) {
            log::error!("body {:?}: acceleration is NaN/Inf, zeroing", body.id);
            body.acceleration = Vec3::zeros();
        }
        if !is_finite(body.position) {
            // A corrupt transform cannot be repaired locally; freeze the body.
            log::error!("body {:?}: position is NaN/Inf, skipping simulation", body.id);
            return false;
        }
        true
    }

    /// Run one full movement tick for a body.
    pub fn perform_movement(&mut self, body: &mut KinematicBody, delta_time: f32) {
        if !self.has_valid_data(body) {
            return;
        }
        if body.movement_mode == MovementMode::None {
            body.clear_accumulated_forces();
            return;
        }
        // Ticks below the minimum are a strict no-op.
        if delta_time < MIN_TICK_TIME {
            return;
        }

        // Force a floor update if something moved us since our last update.
        body.force_next_floor_check |=
            body.is_moving_on_ground() && body.position != body.last_update_location;

        let old_velocity = body.velocity;
        let old_location = body.position;

        self.update_based_movement(body, delta_time);
        self.apply_accumulated_forces(body, delta_time);
        self.handle_pending_launch(body);

        self.apply_root_motion_to_velocity(body, delta_time);

        self.start_new_physics(body, delta_time, 0);
        if !self.has_valid_data(body) {
            return;
        }

        self.physics_rotation(body, delta_time);

        // Requested velocity is consumed each tick; path following re-requests.
        body.requested_velocity = None;

        self.events.push(MovementEvent::MovementUpdated {
            body: body.id,
            delta: body.position - old_location,
            old_velocity,
        });

        self.maybe_save_base_location(body);
        body.last_update_location = body.position;
        body.last_update_rotation = body.orientation;
        body.last_update_velocity = body.velocity;
    }

    /// Dispatch to the solver for the active mode. Re-entered on mode changes
    /// with the remaining time and the iteration count so far.
    pub(crate) fn start_new_physics(
        &mut self,
        body: &mut KinematicBody,
        delta_time: f32,
        iterations: u32,
    ) {
        if delta_time < MIN_TICK_TIME
            || iterations >= body.config.max_simulation_iterations
            || !self.has_valid_data(body)
        {
            return;
        }

        let saved_in_progress = body.movement_in_progress;
        body.movement_in_progress = true;

        match body.movement_mode {
            MovementMode::None => {}
            MovementMode::Walking => self.phys_walking(body, delta_time, iterations),
            MovementMode::NavWalking => self.phys_nav_walking(body, delta_time, iterations),
            MovementMode::Falling => self.phys_falling(body, delta_time, iterations),
            MovementMode::Flying => self.phys_flying(body, delta_time, iterations),
            MovementMode::Swimming => self.phys_swimming(body, delta_time, iterations),
            MovementMode::Custom => self.phys_custom(body, delta_time, iterations),
        }

        body.movement_in_progress = saved_in_progress;
    }

    /// Sub-step sizer: subdivide while the iteration budget lasts, then hand
    /// out all remaining time rather than stall.
    pub(crate) fn simulation_time_step(
        &self,
        body: &mut KinematicBody,
        remaining_time: f32,
        iterations: u32,
    ) -> f32 {
        let mut remaining = remaining_time;
        if remaining > body.config.max_simulation_time_step {
            if iterations < body.config.max_simulation_iterations {
                remaining = body.config.max_simulation_time_step.min(remaining * 0.5);
            } else {
                // Throttled: the first occurrences, then every 16th.
                body.time_step_warning_count += 1;
                if body.time_step_warning_count <= 100 || body.time_step_warning_count & 15 == 0 {
                    log::warn!(
                        "simulation_time_step: body {:?} hit max iterations {} with {:.6}s remaining > max sub-step {:.3}s",
                        body.id,
                        body.config.max_simulation_iterations,
                        remaining,
                        body.config.max_simulation_time_step,
                    );
                }
            }
        }
        remaining.max(MIN_TICK_TIME)
    }

    fn apply_accumulated_forces(&mut self, body: &mut KinematicBody, delta_time: f32) {
        let impulse = body.pending_impulse;
        let force = body.pending_force;
        if impulse.z != 0.0 || force.z != 0.0 {
            // Lift off only if the applied momentum beats gravity this tick.
            let gravity_z = body.gravity_z();
            if body.is_moving_on_ground()
                && impulse.z + force.z * delta_time + gravity_z * delta_time > SMALL
            {
                self.set_movement_mode(body, MovementMode::Falling, 0);
            }
        }
        body.velocity += impulse + force * delta_time;
        body.pending_impulse = Vec3::zeros();
        body.pending_force = Vec3::zeros();
    }

    fn handle_pending_launch(&mut self, body: &mut KinematicBody) {
        if let Some(velocity) = body.pending_launch_velocity.take() {
            body.velocity = velocity;
            body.notify_apex = velocity.z > 0.0;
            self.set_movement_mode(body, MovementMode::Falling, 0);
            body.force_next_floor_check = true;
        }
    }

    /// Velocity override from an external root-motion source. Applied before
    /// physics and again per sub-step; vertical override velocity can lift a
    /// grounded body into the air.
    pub(crate) fn apply_root_motion_to_velocity(
        &mut self,
        body: &mut KinematicBody,
        delta_time: f32,
    ) {
        let Some(root_velocity) = body.root_motion_velocity else {
            return;
        };
        if delta_time <= 0.0 {
            return;
        }

        let old_velocity = body.velocity;
        let mut velocity = root_velocity;
        if body.is_falling() {
            // Keep the gravity-driven vertical component.
            velocity.z = old_velocity.z;
        }
        body.velocity = velocity;

        let applied_delta_z = body.velocity.z - old_velocity.z;
        if body.is_moving_on_ground() {
            let liftoff_bound = (body.gravity_z() * delta_time).max(SMALL);
            if applied_delta_z > liftoff_bound {
                self.set_movement_mode(body, MovementMode::Falling, 0);
            }
        }
    }

    /// Yaw-rate-limited turn toward the acceleration direction.
    pub(crate) fn physics_rotation(&mut self, body: &mut KinematicBody, delta_time: f32) {
        if !body.config.orient_rotation_to_movement {
            return;
        }
        let Some(desired) = yaw_from_planar_delta(body.acceleration) else {
            return;
        };

        let current_yaw = yaw_of(&body.orientation);
        let desired_yaw = yaw_of(&desired);
        let mut delta = desired_yaw - current_yaw;
        // Shortest arc.
        while delta > std::f32::consts::PI {
            delta -= std::f32::consts::TAU;
        }
        while delta < -std::f32::consts::PI {
            delta += std::f32::consts::TAU;
        }

        let max_step = body.config.rotation_rate_yaw.to_radians() * delta_time;
        // Negative rate means instant turns.
        let new_yaw = if max_step < 0.0 || delta.abs() <= max_step {
            desired_yaw
        } else {
            current_yaw + max_step.copysign(delta)
        };
        body.orientation = na::UnitQuaternion::from_axis_angle(&Vec3::z_axis(), new_yaw);
    }

    /// Adopt (or drop) a supporting base from a floor surface.
    pub(crate) fn set_base(&mut self, body: &mut KinematicBody, surface: Option<SurfaceInfo>) {
        body.movement_base = surface.map(|s| MovementBase {
            surface: s.id,
            is_dynamic: s.is_dynamic,
        });
        // Seed the cached base transform so the first based move has a
        // meaningful reference.
        self.maybe_save_base_location(body);
    }

    pub(crate) fn set_base_from_floor(&mut self, body: &mut KinematicBody) {
        if body.current_floor.is_walkable_floor() {
            let surface = body.current_floor.hit.surface;
            self.set_base(body, Some(surface));
        } else {
            self.set_base(body, None);
        }
    }

    pub(crate) fn maybe_save_base_location(&mut self, body: &mut KinematicBody) {
        if let Some(base) = body.movement_base {
            if let Some((location, rotation)) = self.world.surface_transform(base.surface) {
                body.old_base_location = location;
                body.old_base_quat = rotation;
            }
        }
    }

    /// Follow a dynamic base: transform the body through the base's motion
    /// since the last tick, ignoring collision with the base itself.
    fn update_based_movement(&mut self, body: &mut KinematicBody, _delta_time: f32) {
        let Some(base) = body.movement_base else {
            return;
        };
        if !base.is_dynamic {
            return;
        }
        let Some((new_base_location, new_base_quat)) = self.world.surface_transform(base.surface)
        else {
            // The base no longer exists.
            body.movement_base = None;
            return;
        };

        let rotation_changed = body.old_base_quat.angle_to(&new_base_quat) > 1.0e-8;
        if !rotation_changed && new_base_location == body.old_base_location {
            return;
        }

        let saved_ignore = self.move_ignore;
        self.move_ignore = Some(base.surface);

        // Transform the capsule base point (not its center) through the base
        // delta, then move to follow.
        let old_local_to_world = iso(body.old_base_location, body.old_base_quat);
        let new_local_to_world = iso(new_base_location, new_base_quat);
        let base_offset = Vec3::new(0.0, 0.0, body.capsule_half_height);

        let feet = na::Point3::from(body.position - base_offset);
        let local = old_local_to_world.inverse_transform_point(&feet);
        let new_world = new_local_to_world.transform_point(&local).coords + base_offset;
        let mut delta_position = new_world - body.position;

        // Skip round-trip XY error when the base only moved vertically.
        let base_move = new_base_location - body.old_base_location;
        if !rotation_changed && base_move.x == 0.0 && base_move.y == 0.0 {
            delta_position.x = 0.0;
            delta_position.y = 0.0;
        }

        if rotation_changed {
            // Follow yaw only; the body stays upright.
            let delta_quat = new_base_quat * body.old_base_quat.inverse();
            let new_yaw = yaw_of(&(delta_quat * body.orientation));
            body.orientation = na::UnitQuaternion::from_axis_angle(&Vec3::z_axis(), new_yaw);
        }

        if delta_position.norm_squared() > SMALL {
            let rotation = body.orientation;
            self.safe_move_updated_component(body, delta_position, rotation, true);
        }

        self.move_ignore = saved_ignore;
    }

    /// Shrink the capsule to the crouched half height, keeping the feet
    /// planted while grounded.
    pub fn crouch(&mut self, body: &mut KinematicBody) {
        if body.is_crouched || !self.has_valid_data(body) {
            return;
        }
        let crouched = body.config.crouched_half_height.max(body.capsule_radius);
        if crouched >= body.capsule_half_height {
            body.is_crouched = true;
            return;
        }
        let height_delta = body.capsule_half_height - crouched;
        body.capsule_half_height = crouched;
        if body.is_moving_on_ground() {
            body.position.z -= height_delta;
        }
        body.is_crouched = true;
        body.force_next_floor_check = true;
    }

    /// Restore the standing capsule if there is room; returns false and stays
    /// crouched when blocked.
    pub fn uncrouch(&mut self, body: &mut KinematicBody) -> bool {
        if !body.is_crouched {
            return true;
        }
        let standing = body.default_half_height;
        let height_delta = standing - body.capsule_half_height;
        let stand_position = if body.is_moving_on_ground() {
            body.position + Vec3::new(0.0, 0.0, height_delta)
        } else {
            body.position
        };

        // Slightly shrunken test so resting contacts don't block standing up.
        let dims = CapsuleDims::new(body.capsule_radius, standing);
        let filter = self.query_filter();
        if self
            .world
            .overlap_capsule(dims, stand_position, -MOVE_SKIN, filter)
        {
            return false;
        }

        body.position = stand_position;
        body.capsule_half_height = standing;
        body.is_crouched = false;
        body.force_next_floor_check = true;
        true
    }

}
