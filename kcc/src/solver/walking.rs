//! Ground movement: the sub-stepped walking integrator, ramp-projected floor
//! moves, and the ledge policy.
//!
//! Each sub-step computes a velocity, moves along the floor (stepping over
//! barriers where possible), re-probes the floor, and then recomputes the
//! velocity from the actual collision-adjusted displacement. Mode hand-offs
//! refund the unused portion of the consumed sub-step so no simulation time
//! is created or destroyed.

use super::{Solver, StepDownResult};
use crate::body::{FloorResult, KinematicBody, MovementBase, MovementMode};
use crate::config::{LEDGE_CHECK_THRESHOLD, MAX_FLOOR_DIST, MIN_TICK_TIME};
use crate::events::MovementEvent;
use crate::math::{
    KINDA_SMALL, Vec3, horizontal, is_nearly_zero, safe_normal, safe_normal_2d, size_2d,
};

impl Solver<'_> {
    pub(crate) fn phys_walking(
        &mut self,
        body: &mut KinematicBody,
        delta_time: f32,
        mut iterations: u32,
    ) {
        if delta_time < MIN_TICK_TIME {
            return;
        }
        if !body.collision_enabled {
            return;
        }

        body.just_teleported = false;
        let mut checked_fall = false;
        let mut tried_ledge_move = false;
        let mut remaining_time = delta_time;

        while remaining_time >= MIN_TICK_TIME && iterations < body.config.max_simulation_iterations
        {
            iterations += 1;
            body.just_teleported = false;
            let time_tick = self.simulation_time_step(body, remaining_time, iterations);
            remaining_time -= time_tick;

            // Snapshot for a potential revert.
            let old_base = body.movement_base;
            let previous_base_location = old_base
                .and_then(|b| self.world.surface_transform(b.surface))
                .map(|(location, _)| location)
                .unwrap_or_else(Vec3::zeros);
            let old_location = body.position;
            let old_floor = body.current_floor;

            // Ground velocity is planar.
            self.maintain_horizontal_ground_velocity(body);
            let old_velocity = body.velocity;
            body.acceleration.z = 0.0;

            if !body.has_root_motion() {
                let friction = body.config.ground_friction;
                let braking = body.max_braking_deceleration();
                self.calc_velocity(body, time_tick, friction, false, braking);
            }
            self.apply_root_motion_to_velocity(body, time_tick);

            if body.is_falling() {
                // The velocity override lifted us off the ground. No movement
                // happened, so refund the sub-step and restart with the full
                // slice.
                self.start_new_physics(body, remaining_time + time_tick, iterations - 1);
                return;
            }

            // Move parameters for this sub-step.
            let move_velocity = body.velocity;
            let delta = move_velocity * time_tick;
            let zero_delta = is_nearly_zero(delta, KINDA_SMALL);
            let mut step_down = StepDownResult::default();

            if zero_delta {
                remaining_time = 0.0;
            } else {
                self.move_along_floor(body, move_velocity, time_tick, &mut step_down);

                if body.is_falling() {
                    // Ran off the walkable world mid-move; refund the unmoved
                    // share of this sub-step.
                    let desired_dist = delta.norm();
                    if desired_dist > KINDA_SMALL {
                        let actual_dist = size_2d(body.position - old_location);
                        remaining_time +=
                            time_tick * (1.0 - (actual_dist / desired_dist).min(1.0));
                    }
                    self.start_new_physics(body, remaining_time, iterations);
                    return;
                } else if body.config.can_ever_swim && self.is_in_water(body) {
                    self.start_swimming(
                        body,
                        old_location,
                        old_velocity,
                        time_tick,
                        remaining_time,
                        iterations,
                    );
                    return;
                }
            }

            // Update floor: a step-down may have already computed it.
            if step_down.computed_floor {
                body.current_floor = step_down.floor;
            } else {
                let position = body.position;
                body.current_floor = self.find_floor(body, position, zero_delta, None);
            }

            // Ledge policy: when walking off ledges is not allowed, try to
            // slide along the edge before considering a fall.
            let check_ledges = !body.can_walk_off_ledges();
            if check_ledges && !body.current_floor.is_walkable_floor() {
                let gravity_dir = Vec3::new(0.0, 0.0, -1.0);
                let new_delta = if tried_ledge_move {
                    Vec3::zeros()
                } else {
                    self.get_ledge_move(body, old_location, delta, gravity_dir)
                };

                if new_delta != Vec3::zeros() {
                    // Redirect along the ledge: revert this move, then retry
                    // the sub-step sideways.
                    self.revert_move(
                        body,
                        old_location,
                        old_base,
                        previous_base_location,
                        &old_floor,
                        false,
                    );
                    tried_ledge_move = true;
                    body.velocity = new_delta / time_tick;
                    remaining_time += time_tick;
                    continue;
                } else {
                    let must_jump = !checked_fall
                        || zero_delta
                        || old_base.map_or(true, |b| b.is_dynamic);

                    // Never leave the body dangling past the edge: undo the
                    // move before deciding.
                    self.revert_move(
                        body,
                        old_location,
                        old_base,
                        previous_base_location,
                        &old_floor,
                        !must_jump,
                    );
                    if must_jump
                        && self.check_fall(
                            body,
                            &old_floor,
                            delta,
                            old_location,
                            remaining_time,
                            time_tick,
                            iterations,
                            true,
                        )
                    {
                        return;
                    }
                    checked_fall = true;
                    remaining_time = 0.0;
                    break;
                }
            } else {
                // Validate the floor check.
                if body.current_floor.is_walkable_floor() {
                    if self.should_catch_air(&old_floor, &body.current_floor) {
                        self.events.push(MovementEvent::WalkedOffLedge {
                            body: body.id,
                            previous_floor_impact_normal: old_floor.hit.impact_normal,
                            previous_floor_contact_normal: old_floor.hit.normal,
                            location: old_location,
                            time_delta: time_tick,
                        });
                        if body.is_moving_on_ground() {
                            // Still walking: fall. A different mode means an
                            // observer already chose one to keep.
                            self.start_falling(
                                body,
                                iterations,
                                remaining_time,
                                time_tick,
                                delta,
                                old_location,
                            );
                        }
                        return;
                    }

                    self.adjust_floor_height(body);
                    self.set_base_from_floor(body);
                } else if body.current_floor.hit.start_penetrating && remaining_time <= 0.0 {
                    // The floor check failed inside penetration. Don't try to
                    // move down; pop out of the floor instead.
                    let mut hit = body.current_floor.hit;
                    hit.trace_end = hit.trace_start + Vec3::new(0.0, 0.0, MAX_FLOOR_DIST);
                    let adjustment = self.penetration_adjustment(body, &hit);
                    let rotation = body.orientation;
                    self.resolve_penetration(body, adjustment, &hit, rotation);
                    body.force_next_floor_check = true;
                }

                // Check if we just entered water.
                if body.config.can_ever_swim && self.is_in_water(body) {
                    let velocity = body.velocity;
                    self.start_swimming(
                        body,
                        old_location,
                        velocity,
                        time_tick,
                        remaining_time,
                        iterations,
                    );
                    return;
                }

                // See if we need to start falling.
                if !body.current_floor.is_walkable_floor()
                    && !body.current_floor.hit.start_penetrating
                {
                    let must_jump = !checked_fall
                        || body.just_teleported
                        || zero_delta
                        || old_base.map_or(true, |b| b.is_dynamic);
                    if must_jump
                        && self.check_fall(
                            body,
                            &old_floor,
                            delta,
                            old_location,
                            remaining_time,
                            time_tick,
                            iterations,
                            true,
                        )
                    {
                        return;
                    }
                    checked_fall = true;
                }
            }

            // Make velocity reflect the actual move, so walking speed tracks
            // collision-adjusted motion rather than the request.
            if body.is_moving_on_ground()
                && !body.just_teleported
                && !body.has_root_motion()
                && time_tick >= MIN_TICK_TIME
            {
                body.velocity = (body.position - old_location) / time_tick;
            }

            // If we didn't move at all, further iterations are stuck too.
            if body.position == old_location {
                remaining_time = 0.0;
                break;
            }
        }

        if body.is_moving_on_ground() {
            self.maintain_horizontal_ground_velocity(body);
        }
    }

    /// Move along the current walkable floor, projecting the planar delta
    /// onto ramps and stepping over barriers when possible.
    pub(crate) fn move_along_floor(
        &mut self,
        body: &mut KinematicBody,
        in_velocity: Vec3,
        delta_seconds: f32,
        out_step_down: &mut StepDownResult,
    ) {
        if !body.current_floor.is_walkable_floor() {
            return;
        }

        let delta = horizontal(in_velocity) * delta_seconds;
        let floor_hit = body.current_floor.hit;
        let floor_is_line = body.current_floor.line_trace;
        let mut ramp_vector =
            self.compute_ground_movement_delta(body, delta, &floor_hit, floor_is_line);
        let rotation = body.orientation;
        let mut hit = self.safe_move_updated_component(body, ramp_vector, rotation, true);
        let mut last_move_time_slice = delta_seconds;

        if hit.start_penetrating {
            // Stuck even after recovery: use the hit as a deflection surface
            // so the update doesn't visibly hitch.
            let hit_copy = hit;
            self.handle_impact(body, &hit_copy, 0.0, delta);
            self.slide_along_surface(body, delta, 1.0, hit_copy.normal, &mut hit, true);

            if hit.start_penetrating {
                log::warn!("body {:?} stuck in geometry at {:?}", body.id, body.position);
            }
        } else if hit.is_valid_blocking_hit() {
            // Hit something: most likely another ramp, possibly a barrier.
            let mut percent_time_applied = hit.time;
            if hit.time > 0.0 && hit.normal.z > KINDA_SMALL && self.is_walkable(body, &hit) {
                // Another walkable ramp; keep going along it.
                let initial_percent_remaining = 1.0 - percent_time_applied;
                ramp_vector = self.compute_ground_movement_delta(
                    body,
                    delta * initial_percent_remaining,
                    &hit,
                    false,
                );
                last_move_time_slice *= initial_percent_remaining;
                hit = self.safe_move_updated_component(body, ramp_vector, rotation, true);

                let second_hit_percent = hit.time * initial_percent_remaining;
                percent_time_applied =
                    (percent_time_applied + second_hit_percent).clamp(0.0, 1.0);
            }

            if hit.is_valid_blocking_hit() {
                let hit_is_current_base = body
                    .movement_base
                    .is_some_and(|b| b.surface == hit.surface.id);
                if self.can_step_up(body, &hit) || hit_is_current_base {
                    // A barrier: try to step over it.
                    let gravity_dir = Vec3::new(0.0, 0.0, -1.0);
                    let hit_copy = hit;
                    if !self.step_up(
                        body,
                        gravity_dir,
                        delta * (1.0 - percent_time_applied),
                        &hit_copy,
                        Some(out_step_down),
                    ) {
                        self.handle_impact(body, &hit_copy, last_move_time_slice, ramp_vector);
                        self.slide_along_surface(
                            body,
                            delta,
                            1.0 - percent_time_applied,
                            hit_copy.normal,
                            &mut hit,
                            true,
                        );
                    } else {
                        // The vertical part of a step must not feed the
                        // velocity recompute.
                        body.just_teleported |= !body.config.maintain_horizontal_ground_velocity;
                    }
                } else if !hit.surface.can_step_up {
                    let hit_copy = hit;
                    self.handle_impact(body, &hit_copy, last_move_time_slice, ramp_vector);
                    self.slide_along_surface(
                        body,
                        delta,
                        1.0 - percent_time_applied,
                        hit_copy.normal,
                        &mut hit,
                        true,
                    );
                }
            }
        }
    }

    /// Project a horizontal move onto the plane of a walkable ramp.
    pub(crate) fn compute_ground_movement_delta(
        &self,
        body: &KinematicBody,
        delta: Vec3,
        ramp_hit: &crate::geometry::HitResult,
        hit_from_line_trace: bool,
    ) -> Vec3 {
        let floor_normal = ramp_hit.impact_normal;
        let contact_normal = ramp_hit.normal;

        if floor_normal.z < 1.0 - KINDA_SMALL
            && floor_normal.z > KINDA_SMALL
            && contact_normal.z > KINDA_SMALL
            && !hit_from_line_trace
            && self.is_walkable(body, ramp_hit)
        {
            let floor_dot_delta = floor_normal.dot(&delta);
            let ramp_movement = Vec3::new(delta.x, delta.y, -floor_dot_delta / floor_normal.z);

            if body.config.maintain_horizontal_ground_velocity {
                return ramp_movement;
            } else {
                return safe_normal(ramp_movement) * delta.norm();
            }
        }

        delta
    }

    /// Try lateral redirections (left, then right, perpendicular to the
    /// intended delta) that keep the body on walkable ground.
    pub(crate) fn get_ledge_move(
        &mut self,
        body: &KinematicBody,
        old_location: Vec3,
        delta: Vec3,
        gravity_dir: Vec3,
    ) -> Vec3 {
        if delta == Vec3::zeros() {
            return Vec3::zeros();
        }

        let mut side_dir = Vec3::new(delta.y, -delta.x, 0.0);

        // Try left.
        if self.check_ledge_direction(body, old_location, side_dir, gravity_dir) {
            return side_dir;
        }

        // Try right.
        side_dir = -side_dir;
        if self.check_ledge_direction(body, old_location, side_dir, gravity_dir) {
            return side_dir;
        }

        Vec3::zeros()
    }

    /// A side-step direction is viable when the path is clear (or walkable)
    /// and there is walkable ground within step height below the destination.
    fn check_ledge_direction(
        &mut self,
        body: &KinematicBody,
        old_location: Vec3,
        side_step: Vec3,
        gravity_dir: Vec3,
    ) -> bool {
        let side_dest = old_location + side_step;
        let capsule = body.capsule();
        let filter = self.query_filter();

        match self.world.sweep_capsule(capsule, old_location, side_dest, filter) {
            Some(hit) => self.is_walkable(body, &hit),
            None => {
                let down = side_dest
                    + gravity_dir * (body.config.max_step_height + LEDGE_CHECK_THRESHOLD);
                match self.world.sweep_capsule(capsule, side_dest, down, filter) {
                    Some(hit) => hit.time < 1.0 && self.is_walkable(body, &hit),
                    None => false,
                }
            }
        }
    }

    /// The fall decision shared by the two ledge decision points. `must_jump`
    /// forces the fall even when walking off ledges is disallowed.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn check_fall(
        &mut self,
        body: &mut KinematicBody,
        old_floor: &FloorResult,
        delta: Vec3,
        old_location: Vec3,
        remaining_time: f32,
        time_tick: f32,
        iterations: u32,
        must_jump: bool,
    ) -> bool {
        if must_jump || body.can_walk_off_ledges() {
            self.events.push(MovementEvent::WalkedOffLedge {
                body: body.id,
                previous_floor_impact_normal: old_floor.hit.impact_normal,
                previous_floor_contact_normal: old_floor.hit.normal,
                location: old_location,
                time_delta: time_tick,
            });
            if body.is_moving_on_ground() {
                // If still walking, fall. Another mode means an observer set
                // one it wants to keep.
                self.start_falling(body, iterations, remaining_time, time_tick, delta, old_location);
            }
            return true;
        }
        false
    }

    /// Hook: detect catching air off a ramp crest even though the new floor
    /// is walkable. The default never triggers.
    fn should_catch_air(&self, _old_floor: &FloorResult, _new_floor: &FloorResult) -> bool {
        false
    }

    /// Enter falling, refunding the share of the sub-step that produced no
    /// movement.
    pub(crate) fn start_falling(
        &mut self,
        body: &mut KinematicBody,
        iterations: u32,
        remaining_time: f32,
        time_tick: f32,
        delta: Vec3,
        sub_location: Vec3,
    ) {
        let desired_dist = delta.norm();
        let remaining_time = if desired_dist < KINDA_SMALL {
            0.0
        } else {
            let actual_dist = size_2d(body.position - sub_location);
            remaining_time + time_tick * (1.0 - (actual_dist / desired_dist).min(1.0))
        };

        if body.is_moving_on_ground() {
            self.set_movement_mode(body, MovementMode::Falling, 0);
        }
        self.start_new_physics(body, remaining_time, iterations);
    }

    /// Undo a sub-step move, restoring the base only if it could not have
    /// moved or changed in a physics-affecting way.
    pub(crate) fn revert_move(
        &mut self,
        body: &mut KinematicBody,
        old_location: Vec3,
        old_base: Option<MovementBase>,
        previous_base_location: Vec3,
        old_floor: &FloorResult,
        fail_move: bool,
    ) {
        body.position = old_location;
        body.just_teleported = false;

        let restore_base = match old_base {
            Some(base) if !base.is_dynamic => self.world.surface_transform(base.surface).is_some(),
            Some(base) => self
                .world
                .surface_transform(base.surface)
                .is_some_and(|(location, _)| location == previous_base_location),
            None => false,
        };

        if restore_base {
            body.current_floor = *old_floor;
            body.movement_base = old_base;
        } else {
            body.movement_base = None;
        }

        if fail_move {
            // End movement now.
            body.velocity = Vec3::zeros();
            body.acceleration = Vec3::zeros();
        }
    }

    /// Keep ground velocity strictly horizontal.
    pub(crate) fn maintain_horizontal_ground_velocity(&self, body: &mut KinematicBody) {
        if body.velocity.z != 0.0 {
            if body.config.maintain_horizontal_ground_velocity {
                // Ramp movement already preserved the horizontal magnitude.
                body.velocity.z = 0.0;
            } else {
                // Rescale to horizontal, keeping the 3D magnitude.
                body.velocity = safe_normal_2d(body.velocity) * body.velocity.norm();
            }
        }
    }
}
