//! Flying, swimming, nav-walking, and custom-mode dispatch.
//!
//! Swimming is intentionally shallow: buoyancy is a single scalar against
//! gravity and there is no waterline tracking; enter/leave transitions are
//! fully modeled. Nav walking projects onto the oracle's navigation floor and
//! downgrades to Walking whenever nav data disappears.

use super::Solver;
use crate::body::{KinematicBody, MovementMode};
use crate::config::{MIN_FLOOR_DIST, MIN_TICK_TIME};
use crate::math::{Vec3, clamp_to_max_size, horizontal, is_nearly_zero, safe_normal, KINDA_SMALL};

impl Solver<'_> {
    /// Free 3D movement without gravity. Shallow impacts may be stepped over;
    /// everything else slides.
    pub(crate) fn phys_flying(
        &mut self,
        body: &mut KinematicBody,
        delta_time: f32,
        _iterations: u32,
    ) {
        if delta_time < MIN_TICK_TIME {
            return;
        }

        if !body.has_root_motion() {
            let friction = 0.5 * self.world.physics_volume(body.position).fluid_friction;
            let braking = body.max_braking_deceleration();
            self.calc_velocity(body, delta_time, friction, true, braking);
        }
        self.apply_root_motion_to_velocity(body, delta_time);

        body.just_teleported = false;

        let mut old_location = body.position;
        let rotation = body.orientation;
        let adjusted = body.velocity * delta_time;
        let mut hit = self.safe_move_updated_component(body, adjusted, rotation, true);

        if hit.time < 1.0 {
            let gravity_dir = Vec3::new(0.0, 0.0, -1.0);
            let velocity_dir = safe_normal(body.velocity);
            let up_down = gravity_dir.dot(&velocity_dir);

            let mut stepped_up = false;
            if hit.impact_normal.z.abs() < 0.2
                && up_down < 0.5
                && up_down > -0.2
                && self.can_step_up(body, &hit)
            {
                // Mostly-lateral motion into a wall face: try the step.
                let step_z = body.position.z;
                let hit_copy = hit;
                stepped_up =
                    self.step_up(body, gravity_dir, adjusted * (1.0 - hit.time), &hit_copy, None);
                if stepped_up {
                    // Keep the vertical displacement out of the velocity
                    // recompute below.
                    old_location.z = body.position.z + (old_location.z - step_z);
                }
            }

            if !stepped_up {
                let hit_copy = hit;
                self.handle_impact(body, &hit_copy, delta_time, adjusted);
                self.slide_along_surface(body, adjusted, 1.0 - hit.time, hit_copy.normal, &mut hit, true);
            }
        }

        if !body.just_teleported && !body.has_root_motion() {
            body.velocity = (body.position - old_location) / delta_time;
        }
    }

    /// Swimming through a water volume. Leaves the water by handing off to
    /// falling; buoyancy cancels `buoyancy * gravity`.
    pub(crate) fn phys_swimming(
        &mut self,
        body: &mut KinematicBody,
        delta_time: f32,
        iterations: u32,
    ) {
        if delta_time < MIN_TICK_TIME {
            return;
        }

        if !(body.config.can_ever_swim && self.is_in_water(body)) {
            // Out of the water: fall, and let a floor catch us.
            self.set_movement_mode(body, MovementMode::Falling, 0);
            self.start_new_physics(body, delta_time, iterations);
            return;
        }

        let volume = self.world.physics_volume(body.position);
        body.just_teleported = false;

        if !body.has_root_motion() {
            let friction = 0.5 * volume.fluid_friction;
            let braking = body.max_braking_deceleration();
            self.calc_velocity(body, delta_time, friction, true, braking);
        }

        // Residual gravity for non-neutral buoyancy, capped by the volume's
        // terminal velocity.
        let gravity_dz = body.gravity_z() * delta_time * (1.0 - body.config.buoyancy);
        body.velocity.z += gravity_dz;
        if body.velocity.z < -volume.terminal_velocity {
            body.velocity.z = -volume.terminal_velocity;
        }

        self.apply_root_motion_to_velocity(body, delta_time);

        let old_location = body.position;
        let rotation = body.orientation;
        let adjusted = body.velocity * delta_time;
        let mut hit = self.safe_move_updated_component(body, adjusted, rotation, true);

        if hit.is_valid_blocking_hit() {
            let hit_copy = hit;
            self.handle_impact(body, &hit_copy, delta_time, adjusted);
            self.slide_along_surface(body, adjusted, 1.0 - hit.time, hit_copy.normal, &mut hit, true);
        }

        if !body.just_teleported && !body.has_root_motion() && delta_time >= MIN_TICK_TIME {
            body.velocity = (body.position - old_location) / delta_time;
        }
    }

    /// Hand off to swimming after a move carried the body into water.
    pub(crate) fn start_swimming(
        &mut self,
        body: &mut KinematicBody,
        old_location: Vec3,
        old_velocity: Vec3,
        time_tick: f32,
        remaining_time: f32,
        iterations: u32,
    ) {
        if remaining_time < MIN_TICK_TIME || time_tick < MIN_TICK_TIME {
            return;
        }

        if !body.has_root_motion() && !body.just_teleported {
            // Average velocity over the move; the end velocity carries twice
            // the acceleration of the average.
            body.velocity = (body.position - old_location) / time_tick;
            body.velocity = 2.0 * body.velocity - old_velocity;
            let terminal = self.world.physics_volume(body.position).terminal_velocity;
            body.velocity = clamp_to_max_size(body.velocity, terminal);
        }

        self.set_movement_mode(body, MovementMode::Swimming, 0);
        self.start_new_physics(body, remaining_time, iterations);
    }

    /// Ground movement constrained to the navigation floor.
    pub(crate) fn phys_nav_walking(
        &mut self,
        body: &mut KinematicBody,
        delta_time: f32,
        mut iterations: u32,
    ) {
        if delta_time < MIN_TICK_TIME {
            return;
        }

        self.maintain_horizontal_ground_velocity(body);
        body.acceleration.z = 0.0;

        if !body.has_root_motion() {
            let friction = body.config.ground_friction;
            let braking = body.max_braking_deceleration();
            self.calc_velocity(body, delta_time, friction, false, braking);
        }
        self.apply_root_motion_to_velocity(body, delta_time);

        if body.is_falling() {
            // The velocity override lifted us off the ground.
            self.start_new_physics(body, delta_time, iterations);
            return;
        }

        iterations += 1;

        let desired_move = horizontal(body.velocity);
        let old_location = body.position;
        let delta_move = desired_move * delta_time;

        if !self.world.has_nav_data() {
            self.set_movement_mode(body, MovementMode::Walking, 0);
            return;
        }

        let adjusted_dest = old_location + delta_move;
        match self.world.find_nav_floor(adjusted_dest) {
            Some(nav_point) => {
                // Keep the capsule floating just above the nav floor.
                let new_location = Vec3::new(
                    adjusted_dest.x,
                    adjusted_dest.y,
                    nav_point.z + body.capsule_half_height + MIN_FLOOR_DIST,
                );
                let adjusted_delta = new_location - old_location;

                if !is_nearly_zero(adjusted_delta, KINDA_SMALL) {
                    let rotation = body.orientation;
                    self.safe_move_updated_component(body, adjusted_delta, rotation, true);
                }

                // Update velocity to reflect the actual move.
                if !body.just_teleported && !body.has_root_motion() {
                    body.velocity = (body.position - old_location) / delta_time;
                    self.maintain_horizontal_ground_velocity(body);
                }
                body.just_teleported = false;
            }
            None => {
                // Walked off the navigable world.
                self.start_falling(body, iterations, delta_time, delta_time, delta_move, old_location);
            }
        }
    }

    /// Custom modes are externally defined; without a handler the body holds
    /// still for the tick.
    pub(crate) fn phys_custom(&mut self, body: &mut KinematicBody, _delta_time: f32, _iterations: u32) {
        log::debug!(
            "custom movement mode {} has no built-in solver; body {:?} unchanged",
            body.custom_movement_mode,
            body.id
        );
    }
}
