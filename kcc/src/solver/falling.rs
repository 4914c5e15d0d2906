//! Airborne movement: gravity integration with air control, wall deflection,
//! two-wall corner handling, and landing detection.
//!
//! The integrator keeps a parallel "velocity without air control" so that
//! after an impact the air-control share of the motion can be re-limited
//! against the wall instead of being discarded or allowed to push the body up
//! the surface.

use super::Solver;
use crate::body::{KinematicBody, MovementMode};
use crate::config::{MIN_TICK_TIME, VERTICAL_SLOPE_NORMAL_Z};
use crate::events::MovementEvent;
use crate::geometry::HitResult;
use crate::math::{
    KINDA_SMALL, Vec3, clamp_to_max_size, horizontal, is_nearly_zero, safe_normal, safe_normal_2d,
    size_sq_2d,
};

use super::floor::is_within_edge_tolerance;

impl Solver<'_> {
    /// Lateral input acceleration while airborne: Z removed, scaled by air
    /// control, clamped to max acceleration.
    pub(crate) fn get_falling_lateral_acceleration(&self, body: &KinematicBody) -> Vec3 {
        let mut fall_acceleration = horizontal(body.acceleration);

        // A falling body has limited ability to alter its path.
        if !body.has_root_motion() && size_sq_2d(fall_acceleration) > 0.0 {
            let air_control = body.config.air_control;
            fall_acceleration = self.get_air_control(body, air_control, fall_acceleration);
            fall_acceleration = clamp_to_max_size(fall_acceleration, body.config.max_acceleration);
        }

        fall_acceleration
    }

    /// Air control with the low-speed boost applied.
    fn get_air_control(
        &self,
        body: &KinematicBody,
        mut tick_air_control: f32,
        fall_acceleration: Vec3,
    ) -> Vec3 {
        if tick_air_control != 0.0 {
            // Allow a burst of initial acceleration.
            let threshold = body.config.air_control_boost_velocity_threshold;
            if body.config.air_control_boost_multiplier > 0.0
                && size_sq_2d(body.velocity) < threshold * threshold
            {
                tick_air_control =
                    (body.config.air_control_boost_multiplier * tick_air_control).min(1.0);
            }
        }

        tick_air_control * fall_acceleration
    }

    /// Whether a blocking hit is a spot the body can land on: walkable,
    /// below the lower hemisphere, inside the edge tolerance, and confirmed
    /// by a full floor probe.
    pub(crate) fn is_valid_landing_spot(
        &mut self,
        body: &mut KinematicBody,
        capsule_location: Vec3,
        hit: &HitResult,
    ) -> bool {
        if !hit.blocking {
            return false;
        }

        if !hit.start_penetrating {
            if !self.is_walkable(body, hit) {
                return false;
            }

            // Reject hits above the lower hemisphere; those happen while
            // sliding down a vertical surface.
            let lower_hemisphere_z = hit.location.z - body.capsule_half_height + body.capsule_radius;
            if hit.impact_point.z >= lower_hemisphere_z {
                return false;
            }

            // Reject hits barely on the cusp of the capsule radius.
            if !is_within_edge_tolerance(hit.location, hit.impact_point, body.capsule_radius) {
                return false;
            }
        } else {
            // Penetration along a near-horizontal normal is an adjustment
            // next to a wall or overhang; don't pop to the floor.
            if hit.normal.z < KINDA_SMALL {
                return false;
            }
        }

        let floor = self.find_floor(body, capsule_location, false, Some(hit));
        floor.is_walkable_floor()
    }

    /// Whether an invalid landing hit might still convert into a landing via
    /// a downward floor probe: an edge contact on the lower hemisphere where
    /// the contact normal and impact normal disagree.
    pub(crate) fn should_check_for_valid_landing_spot(
        &self,
        body: &KinematicBody,
        hit: &HitResult,
    ) -> bool {
        if hit.normal.z > KINDA_SMALL && !is_nearly_zero(hit.normal - hit.impact_normal, KINDA_SMALL)
        {
            let position = body.position;
            if is_within_edge_tolerance(position, hit.impact_point, body.capsule_radius) {
                return true;
            }
        }
        false
    }

    /// Touch down: emit the landing notification, pick the post-landing mode,
    /// and continue physics with the remaining time.
    pub(crate) fn process_landed(
        &mut self,
        body: &mut KinematicBody,
        hit: &HitResult,
        remaining_time: f32,
        iterations: u32,
    ) {
        self.events.push(MovementEvent::Landed {
            body: body.id,
            hit: *hit,
        });

        if body.is_falling() {
            if body.ground_movement_mode == MovementMode::NavWalking && !self.world.has_nav_data() {
                // Without nav data, NavWalking would bounce straight back to
                // falling forever.
                log::debug!(
                    "body {:?} landed wanting NavWalking without nav data; using Walking",
                    body.id
                );
                body.ground_movement_mode = MovementMode::Walking;
            }
            self.set_post_landed_physics(body, hit);
        }

        self.start_new_physics(body, remaining_time, iterations);
    }

    fn set_post_landed_physics(&mut self, body: &mut KinematicBody, _hit: &HitResult) {
        if body.config.can_ever_swim && self.is_in_water(body) {
            self.set_movement_mode(body, MovementMode::Swimming, 0);
        } else {
            match body.config.default_land_movement_mode {
                MovementMode::Walking | MovementMode::NavWalking | MovementMode::Falling => {
                    let ground_mode = body.ground_movement_mode;
                    self.set_movement_mode(body, ground_mode, 0);
                }
                _ => self.set_default_movement_mode(body),
            }
        }
    }

    pub(crate) fn phys_falling(
        &mut self,
        body: &mut KinematicBody,
        delta_time: f32,
        mut iterations: u32,
    ) {
        if delta_time < MIN_TICK_TIME {
            return;
        }

        let fall_acceleration = {
            let mut accel = self.get_falling_lateral_acceleration(body);
            accel.z = 0.0;
            accel
        };
        let has_air_control = size_sq_2d(fall_acceleration) > 0.0;

        let mut remaining_time = delta_time;
        while remaining_time >= MIN_TICK_TIME && iterations < body.config.max_simulation_iterations
        {
            iterations += 1;
            let time_tick = self.simulation_time_step(body, remaining_time, iterations);
            remaining_time -= time_tick;

            let old_location = body.position;
            let rotation = body.orientation;
            body.just_teleported = false;

            let old_velocity = body.velocity;
            let mut velocity_no_air_control = body.velocity;

            // Apply input.
            if !body.has_root_motion() {
                let max_decel = body.max_braking_deceleration();
                let lateral_friction = body.config.falling_lateral_friction;

                if has_air_control {
                    // Find the velocity we'd have with no input at all, to
                    // isolate the air-control contribution later.
                    let saved_acceleration = body.acceleration;
                    let saved_velocity = body.velocity;
                    body.acceleration = Vec3::zeros();
                    body.velocity.z = 0.0;
                    self.calc_velocity(body, time_tick, lateral_friction, false, max_decel);
                    velocity_no_air_control =
                        Vec3::new(body.velocity.x, body.velocity.y, old_velocity.z);
                    body.acceleration = saved_acceleration;
                    body.velocity = saved_velocity;
                }

                // Actual velocity, with the lateral fall acceleration.
                {
                    let saved_acceleration = body.acceleration;
                    body.acceleration = fall_acceleration;
                    body.velocity.z = 0.0;
                    self.calc_velocity(body, time_tick, lateral_friction, false, max_decel);
                    body.velocity.z = old_velocity.z;
                    body.acceleration = saved_acceleration;
                }

                if !has_air_control {
                    velocity_no_air_control = body.velocity;
                }
            }

            // Gravity, with terminal velocity, into both velocity variants.
            let gravity = Vec3::new(0.0, 0.0, body.gravity_z());
            body.velocity = self.new_fall_velocity(body, body.velocity, gravity, time_tick);
            velocity_no_air_control =
                self.new_fall_velocity(body, velocity_no_air_control, gravity, time_tick);
            let air_control_accel = (body.velocity - velocity_no_air_control) / time_tick;

            self.apply_root_motion_to_velocity(body, time_tick);

            if body.notify_apex && body.velocity.z <= 0.0 {
                // Just passed the apex: now heading down.
                body.notify_apex = false;
                self.events.push(MovementEvent::JumpApex { body: body.id });
            }

            // Trapezoidal average keeps the integration stable under changing
            // gravity.
            let mut adjusted = 0.5 * (old_velocity + body.velocity) * time_tick;
            let mut hit = self.safe_move_updated_component(body, adjusted, rotation, true);

            let mut last_move_time_slice = time_tick;
            let mut sub_time_tick_remaining = time_tick * (1.0 - hit.time);

            if body.config.can_ever_swim && self.is_in_water(body) {
                // Just entered the water.
                remaining_time += sub_time_tick_remaining;
                self.start_swimming(
                    body,
                    old_location,
                    old_velocity,
                    time_tick,
                    remaining_time,
                    iterations,
                );
                return;
            } else if hit.blocking {
                let position = body.position;
                if self.is_valid_landing_spot(body, position, &hit) {
                    remaining_time += sub_time_tick_remaining;
                    let hit_copy = hit;
                    self.process_landed(body, &hit_copy, remaining_time, iterations);
                    return;
                } else {
                    // Deflect from the full-step velocity, not the trapezoid
                    // delta, so the slide keeps the whole gravity effect.
                    adjusted = body.velocity * time_tick;

                    // An edge impact can misreport a walkable ledge; a proper
                    // floor probe may still produce a landing.
                    if !hit.start_penetrating && self.should_check_for_valid_landing_spot(body, &hit)
                    {
                        let pawn_location = body.position;
                        let floor = self.find_floor(body, pawn_location, false, None);
                        if floor.is_walkable_floor()
                            && self.is_valid_landing_spot(body, pawn_location, &floor.hit)
                        {
                            remaining_time += sub_time_tick_remaining;
                            let floor_hit = floor.hit;
                            self.process_landed(body, &floor_hit, remaining_time, iterations);
                            return;
                        }
                    }

                    let hit_copy = hit;
                    self.handle_impact(body, &hit_copy, last_move_time_slice, adjusted);

                    // We reached the wall using air control; re-limit it so
                    // the deflection cannot keep pushing into (and up) the
                    // surface.
                    if has_air_control {
                        let air_control_delta_v =
                            self.limit_air_control(body, air_control_accel, &hit_copy, false)
                                * last_move_time_slice;
                        adjusted = (velocity_no_air_control + air_control_delta_v)
                            * last_move_time_slice;
                    }

                    let old_hit_normal = hit.normal;
                    let old_hit_impact_normal = hit.impact_normal;
                    let mut delta =
                        self.compute_slide_vector(body, adjusted, 1.0 - hit.time, old_hit_normal, &hit);

                    // Velocity after deflection (gravity component only under
                    // a root-motion override).
                    if sub_time_tick_remaining > KINDA_SMALL && !body.just_teleported {
                        let new_velocity = delta / sub_time_tick_remaining;
                        body.velocity = if body.has_root_motion() {
                            Vec3::new(body.velocity.x, body.velocity.y, new_velocity.z)
                        } else {
                            new_velocity
                        };
                    }

                    if sub_time_tick_remaining > KINDA_SMALL && delta.dot(&adjusted) > 0.0 {
                        // Move in the deflected direction.
                        hit = self.safe_move_updated_component(body, delta, rotation, true);

                        if hit.blocking {
                            // Hit a second wall.
                            last_move_time_slice = sub_time_tick_remaining;
                            sub_time_tick_remaining *= 1.0 - hit.time;

                            let position = body.position;
                            if self.is_valid_landing_spot(body, position, &hit) {
                                remaining_time += sub_time_tick_remaining;
                                let hit_copy = hit;
                                self.process_landed(body, &hit_copy, remaining_time, iterations);
                                return;
                            }

                            let hit_copy = hit;
                            self.handle_impact(body, &hit_copy, last_move_time_slice, delta);

                            // Act as if there was no air control on the last
                            // move when computing the new deflection.
                            if has_air_control && hit.normal.z > VERTICAL_SLOPE_NORMAL_Z {
                                let last_move_no_air_control =
                                    velocity_no_air_control * last_move_time_slice;
                                delta = self.compute_slide_vector(
                                    body,
                                    last_move_no_air_control,
                                    1.0,
                                    old_hit_normal,
                                    &hit,
                                );
                            }

                            self.two_wall_adjust(body, &mut delta, &hit, old_hit_normal);

                            // Limit air control but allow a slide along the
                            // second wall.
                            if has_air_control {
                                let air_control_delta_v =
                                    self.limit_air_control(body, air_control_accel, &hit, false)
                                        * sub_time_tick_remaining;
                                // Only if not back into the first wall.
                                if air_control_delta_v.dot(&old_hit_normal) > 0.0 {
                                    delta += air_control_delta_v * sub_time_tick_remaining;
                                }
                            }

                            if sub_time_tick_remaining > KINDA_SMALL && !body.just_teleported {
                                let new_velocity = delta / sub_time_tick_remaining;
                                body.velocity = if body.has_root_motion() {
                                    Vec3::new(body.velocity.x, body.velocity.y, new_velocity.z)
                                } else {
                                    new_velocity
                                };
                            }

                            // Straddling two opposing unwalkable slopes is a
                            // ditch: force a landing attempt.
                            let ditch = old_hit_impact_normal.z > 0.0
                                && hit.impact_normal.z > 0.0
                                && delta.z.abs() <= KINDA_SMALL
                                && hit.impact_normal.dot(&old_hit_impact_normal) < 0.0;

                            hit = self.safe_move_updated_component(body, delta, rotation, true);
                            if hit.time == 0.0 {
                                // Wedged in place: try to side-step.
                                let mut side_delta =
                                    safe_normal_2d(old_hit_normal + hit.impact_normal);
                                if is_nearly_zero(side_delta, KINDA_SMALL) {
                                    side_delta = safe_normal(Vec3::new(
                                        old_hit_normal.y,
                                        -old_hit_normal.x,
                                        0.0,
                                    ));
                                }
                                hit = self.safe_move_updated_component(body, side_delta, rotation, true);
                            }

                            let position = body.position;
                            if ditch || self.is_valid_landing_spot(body, position, &hit) || hit.time == 0.0
                            {
                                remaining_time = 0.0;
                                let hit_copy = hit;
                                self.process_landed(body, &hit_copy, remaining_time, iterations);
                                return;
                            } else if self.perch_radius_threshold(body) > 0.0
                                && hit.time == 1.0
                                && old_hit_impact_normal.z >= body.config.walkable_floor_z
                            {
                                // A virtual ditch inside the perch radius can
                                // stall progress entirely; kick sideways and
                                // up to break the deadlock. Drawn from the
                                // body's seeded generator.
                                let pawn_location = body.position;
                                let z_moved_dist = (pawn_location.z - old_location.z).abs();
                                let moved_dist_2d_sq = size_sq_2d(pawn_location - old_location);
                                if z_moved_dist <= 0.2 * time_tick && moved_dist_2d_sq <= 4.0 * time_tick
                                {
                                    let max_speed = body.max_speed();
                                    body.velocity.x +=
                                        0.25 * max_speed * (body.rng.next_f32() - 0.5);
                                    body.velocity.y +=
                                        0.25 * max_speed * (body.rng.next_f32() - 0.5);
                                    body.velocity.z = (body.config.jump_z_velocity * 0.25).max(1.0);
                                    let kick_delta = body.velocity * time_tick;
                                    self.safe_move_updated_component(body, kick_delta, rotation, true);
                                }
                            }
                        }
                    }
                }
            }

            // Zero out lateral float-noise drift.
            if size_sq_2d(body.velocity) <= KINDA_SMALL * 10.0 {
                body.velocity.x = 0.0;
                body.velocity.y = 0.0;
            }
        }
    }
}
