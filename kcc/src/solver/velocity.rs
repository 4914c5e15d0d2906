//! Velocity model shared by the ground, falling, flying, and swimming
//! integrators, plus the sub-stepped braking it relies on.

use super::Solver;
use crate::body::KinematicBody;
use crate::config::{BRAKE_TO_STOP_VELOCITY, BRAKING_SUB_STEP_TIME, MIN_TICK_TIME};
use crate::math::{KINDA_SMALL, SMALL, Vec3, clamp_to_max_size, plane_project, safe_normal};

impl Solver<'_> {
    /// Compute a new velocity from acceleration, friction, and braking.
    ///
    /// Skipped entirely under a root-motion override or when velocity is
    /// externally authoritative. `friction` affects the ability to change
    /// direction; `braking_deceleration` applies when there is no input or
    /// the body exceeds max speed.
    pub(crate) fn calc_velocity(
        &mut self,
        body: &mut KinematicBody,
        delta_time: f32,
        friction: f32,
        fluid: bool,
        braking_deceleration: f32,
    ) {
        if body.has_root_motion() || body.external_velocity_authority || delta_time < MIN_TICK_TIME
        {
            return;
        }

        let friction = friction.max(0.0);
        let max_accel = body.config.max_acceleration;
        let mut max_speed = body.max_speed();

        // Path following may have requested movement.
        let mut requested_acceleration = Vec3::zeros();
        let mut requested_speed = 0.0;
        let mut zero_requested_acceleration = true;
        if let Some((accel, speed)) =
            self.apply_requested_move(body, delta_time, max_accel, max_speed, friction)
        {
            requested_acceleration = clamp_to_max_size(accel, max_accel);
            requested_speed = speed;
            zero_requested_acceleration = false;
        }

        if body.config.force_max_accel {
            // Force acceleration at full magnitude, in direction preference
            // order: acceleration, velocity, then facing.
            if body.acceleration.norm_squared() > SMALL {
                body.acceleration = safe_normal(body.acceleration) * max_accel;
            } else if body.velocity.norm_squared() > SMALL {
                body.acceleration = safe_normal(body.velocity) * max_accel;
            } else {
                body.acceleration = (body.orientation * Vec3::x()) * max_accel;
            }
            body.analog_input_modifier = 1.0;
        }

        // The requested move ignores the analog modifier; everything below
        // uses the fully modified value.
        max_speed = requested_speed
            .max(max_speed * body.analog_input_modifier)
            .max(body.min_analog_speed());

        let zero_acceleration = body.acceleration == Vec3::zeros();
        let velocity_over_max = body.is_exceeding_max_speed(max_speed);

        if (zero_acceleration && zero_requested_acceleration) || velocity_over_max {
            // Brake: no input, or over max speed and needing to slow to it.
            let old_velocity = body.velocity;
            let braking_friction = if body.config.use_separate_braking_friction {
                body.config.braking_friction
            } else {
                friction
            };
            self.apply_velocity_braking(body, delta_time, braking_friction, braking_deceleration);

            // Don't let braking drop us below max speed if we started above it
            // while accelerating along our motion.
            if velocity_over_max
                && body.velocity.norm_squared() < max_speed * max_speed
                && body.acceleration.dot(&old_velocity) > 0.0
            {
                body.velocity = safe_normal(old_velocity) * max_speed;
            }
        } else if !zero_acceleration {
            // Friction affects our ability to change direction. Input only;
            // path following handled its own turn above.
            let accel_dir = safe_normal(body.acceleration);
            let vel_size = body.velocity.norm();
            body.velocity -=
                (body.velocity - accel_dir * vel_size) * (delta_time * friction).min(1.0);
        }

        if fluid {
            body.velocity *= 1.0 - (friction * delta_time).min(1.0);
        }

        // Integrate, clamping to max speed — but never slow a body already
        // over it faster than braking would.
        let new_max_speed = if body.is_exceeding_max_speed(max_speed) {
            body.velocity.norm()
        } else {
            max_speed
        };
        body.velocity += body.acceleration * delta_time;
        body.velocity += requested_acceleration * delta_time;
        body.velocity = clamp_to_max_size(body.velocity, new_max_speed);
    }

    /// Merge a path-following requested velocity into an acceleration
    /// contribution (or a direct assignment when configured/decelerating).
    /// Returns the requested acceleration and speed when one was active.
    fn apply_requested_move(
        &self,
        body: &mut KinematicBody,
        delta_time: f32,
        max_accel: f32,
        max_speed: f32,
        friction: f32,
    ) -> Option<(Vec3, f32)> {
        let requested = body.requested_velocity?;
        let requested_speed_sq = requested.norm_squared();
        if requested_speed_sq < KINDA_SMALL {
            return None;
        }

        let mut requested_speed = requested_speed_sq.sqrt();
        let move_dir = requested / requested_speed;
        requested_speed = if body.config.requested_move_with_max_speed {
            max_speed
        } else {
            requested_speed.min(max_speed)
        };
        let move_velocity = move_dir * requested_speed;

        let mut new_acceleration = Vec3::zeros();
        let current_speed_sq = body.velocity.norm_squared();
        if body.config.requested_move_use_acceleration
            && current_speed_sq < (requested_speed * 1.01) * (requested_speed * 1.01)
        {
            // Turn in the same manner as with input acceleration.
            let vel_size = current_speed_sq.sqrt();
            body.velocity -=
                (body.velocity - move_dir * vel_size) * (delta_time * friction).min(1.0);

            // How much acceleration gets us to the requested velocity?
            new_acceleration =
                clamp_to_max_size((move_velocity - body.velocity) / delta_time, max_accel);
        } else {
            // Set velocity directly; decelerating instantly avoids sliding
            // through the destination when braking can't keep up.
            body.velocity = move_velocity;
        }

        Some((new_acceleration, requested_speed))
    }

    /// Decelerate toward a stop without ever reversing direction.
    ///
    /// Braking is integrated in sub-steps for consistent results at low frame
    /// rates, and stops dead the moment the velocity direction would flip.
    pub(crate) fn apply_velocity_braking(
        &mut self,
        body: &mut KinematicBody,
        delta_time: f32,
        friction: f32,
        braking_deceleration: f32,
    ) {
        if body.velocity == Vec3::zeros() || body.has_root_motion() || delta_time < MIN_TICK_TIME {
            return;
        }

        let friction = (friction * body.config.braking_friction_factor).max(0.0);
        let braking_deceleration = braking_deceleration.max(0.0);
        let zero_friction = friction == 0.0;
        let zero_braking = braking_deceleration == 0.0;
        if zero_friction && zero_braking {
            return;
        }

        let old_velocity = body.velocity;
        let reverse_accel = if zero_braking {
            Vec3::zeros()
        } else {
            -braking_deceleration * safe_normal(body.velocity)
        };

        let mut remaining_time = delta_time;
        while remaining_time >= MIN_TICK_TIME {
            // Zero friction is constant deceleration; no iteration needed.
            let dt = if remaining_time > BRAKING_SUB_STEP_TIME && !zero_friction {
                BRAKING_SUB_STEP_TIME.min(remaining_time * 0.5)
            } else {
                remaining_time
            };
            remaining_time -= dt;

            body.velocity += (-friction * body.velocity + reverse_accel) * dt;

            // Never reverse direction.
            if body.velocity.dot(&old_velocity) <= 0.0 {
                body.velocity = Vec3::zeros();
                return;
            }
        }

        // Snap to zero when nearly stopped, or below the stop threshold while
        // actively braking.
        let speed_sq = body.velocity.norm_squared();
        if speed_sq <= KINDA_SMALL
            || (!zero_braking && speed_sq <= BRAKE_TO_STOP_VELOCITY * BRAKE_TO_STOP_VELOCITY)
        {
            body.velocity = Vec3::zeros();
        }
    }

    /// Integrate gravity into a falling velocity, clamped to the volume's
    /// terminal velocity along the gravity direction.
    pub(crate) fn new_fall_velocity(
        &self,
        body: &KinematicBody,
        initial_velocity: Vec3,
        gravity: Vec3,
        delta_time: f32,
    ) -> Vec3 {
        let mut result = initial_velocity;
        if gravity.norm_squared() > 0.0 {
            result += gravity * delta_time;

            let gravity_dir = safe_normal(gravity);
            let terminal_limit = self
                .world
                .physics_volume(body.position)
                .terminal_velocity
                .abs();
            if result.dot(&gravity_dir) > terminal_limit {
                result = plane_project(result, gravity_dir) + gravity_dir * terminal_limit;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::body::KinematicBody;
    use crate::config::SolverConfig;
    use crate::math::Vec3;
    use crate::solver::Solver;
    use crate::world::StaticWorld;

    fn body() -> KinematicBody {
        KinematicBody::new(Vec3::new(0.0, 0.0, 90.0), 34.0, 88.0)
    }

    fn with_solver<R>(f: impl FnOnce(&mut Solver<'_>, &mut KinematicBody) -> R) -> R {
        let world = StaticWorld::new();
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        let mut body = body();
        f(&mut solver, &mut body)
    }

    #[test]
    fn accelerates_toward_max_speed_and_clamps() {
        with_solver(|solver, body| {
            body.acceleration = Vec3::new(2048.0, 0.0, 0.0);
            for _ in 0..120 {
                solver.calc_velocity(body, 1.0 / 60.0, 8.0, false, 2048.0);
            }
            // Converged to max walk speed along +X, within the 1% tolerance.
            assert!(body.velocity.x > 595.0 && body.velocity.x <= 600.0 * 1.01);
            assert!(body.velocity.y.abs() < 1.0e-3);
        });
    }

    #[test]
    fn braking_never_reverses_direction() {
        with_solver(|solver, body| {
            let initial = Vec3::new(300.0, 120.0, 0.0);
            body.velocity = initial;
            for _ in 0..200 {
                let before = body.velocity;
                solver.apply_velocity_braking(body, 1.0 / 30.0, 8.0, 2048.0);
                // Direction never flips, magnitude never grows.
                assert!(body.velocity.dot(&initial) >= 0.0);
                assert!(body.velocity.norm() <= before.norm() + 1.0e-3);
            }
            assert_eq!(body.velocity, Vec3::zeros());
        });
    }

    #[test]
    fn braking_ignores_root_motion_override() {
        with_solver(|solver, body| {
            body.velocity = Vec3::new(300.0, 0.0, 0.0);
            body.root_motion_velocity = Some(Vec3::new(100.0, 0.0, 0.0));
            solver.apply_velocity_braking(body, 0.1, 8.0, 2048.0);
            assert_eq!(body.velocity.x, 300.0);
        });
    }

    #[test]
    fn zero_acceleration_brakes_to_a_stop() {
        with_solver(|solver, body| {
            body.velocity = Vec3::new(600.0, 0.0, 0.0);
            for _ in 0..120 {
                solver.calc_velocity(body, 1.0 / 60.0, 8.0, false, 2048.0);
            }
            assert_eq!(body.velocity, Vec3::zeros());
        });
    }

    #[test]
    fn speed_clamp_holds_after_calc_velocity() {
        with_solver(|solver, body| {
            // Start over max speed with no input: braking rules apply, and the
            // result never exceeds the prior speed.
            body.velocity = Vec3::new(900.0, 0.0, 0.0);
            solver.calc_velocity(body, 1.0 / 60.0, 0.0, false, 0.0);
            assert!(body.velocity.norm() <= 900.0 + 1.0e-3);

            // With input below max speed, the clamp is max speed (1% slack).
            body.velocity = Vec3::new(500.0, 0.0, 0.0);
            body.acceleration = Vec3::new(2048.0, 0.0, 0.0);
            solver.calc_velocity(body, 1.0, 8.0, false, 2048.0);
            assert!(body.velocity.norm() <= 600.0 * 1.01);
        });
    }

    #[test]
    fn requested_velocity_drives_body_without_input() {
        with_solver(|solver, body| {
            body.requested_velocity = Some(Vec3::new(400.0, 0.0, 0.0));
            for _ in 0..120 {
                solver.calc_velocity(body, 1.0 / 60.0, 8.0, false, 2048.0);
            }
            // Settles at the requested speed, not max speed.
            assert!((body.velocity.x - 400.0).abs() < 20.0, "{}", body.velocity.x);
        });
    }

    #[test]
    fn force_max_accel_uses_facing_when_idle() {
        with_solver(|solver, body| {
            body.config.force_max_accel = true;
            solver.calc_velocity(body, 1.0 / 60.0, 8.0, false, 2048.0);
            // No input and no velocity: accelerate along facing (+X).
            assert!(body.acceleration.x > 0.0);
            assert!(body.velocity.x > 0.0);
        });
    }

    #[test]
    fn fall_velocity_respects_terminal_velocity() {
        with_solver(|solver, body| {
            let gravity = Vec3::new(0.0, 0.0, -980.0);
            let mut velocity = Vec3::zeros();
            for _ in 0..600 {
                velocity = solver.new_fall_velocity(body, velocity, gravity, 1.0 / 60.0);
            }
            assert!((velocity.z + 4000.0).abs() < 1.0, "{}", velocity.z);
        });
    }
}
