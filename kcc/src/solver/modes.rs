//! The movement-mode transition machine.
//!
//! `set_movement_mode` is the only legal transition entry point. Entry side
//! effects run in `on_movement_mode_changed`: entering a ground mode flattens
//! velocity and re-probes the floor, entering Falling imparts the base's
//! velocity and drops floor/base, entering None kills velocity and every
//! queued request.

use super::Solver;
use crate::body::{KinematicBody, MovementMode};
use crate::events::MovementEvent;
use crate::math::Vec3;

impl Solver<'_> {
    /// Request a movement mode change. No-op when nothing changes; NavWalking
    /// silently downgrades to Walking without navigation data.
    pub fn set_movement_mode(
        &mut self,
        body: &mut KinematicBody,
        new_mode: MovementMode,
        new_custom_mode: u8,
    ) {
        let mut new_mode = new_mode;
        let mut new_custom_mode = new_custom_mode;
        if new_mode != MovementMode::Custom {
            new_custom_mode = 0;
        }

        if new_mode == MovementMode::NavWalking && !self.world.has_nav_data() {
            new_mode = MovementMode::Walking;
        }

        // Do nothing if nothing is changing; custom sub-mode changes count.
        if body.movement_mode == new_mode
            && (new_mode != MovementMode::Custom || new_custom_mode == body.custom_movement_mode)
        {
            return;
        }

        let previous = body.movement_mode;
        let previous_custom = body.custom_movement_mode;
        body.movement_mode = new_mode;
        body.custom_movement_mode = new_custom_mode;

        if !self.has_valid_data(body) {
            return;
        }

        self.on_movement_mode_changed(body, previous, previous_custom);
    }

    fn on_movement_mode_changed(
        &mut self,
        body: &mut KinematicBody,
        previous: MovementMode,
        previous_custom: u8,
    ) {
        match body.movement_mode {
            MovementMode::Walking => {
                // Ground movement is planar, and needs a current floor and
                // base so the first tick in the new mode is not stale.
                body.velocity.z = 0.0;
                body.ground_movement_mode = MovementMode::Walking;

                let position = body.position;
                body.current_floor = self.find_floor(body, position, false, None);
                self.adjust_floor_height(body);
                self.set_base_from_floor(body);
            }
            MovementMode::NavWalking => {
                body.velocity.z = 0.0;
                body.ground_movement_mode = MovementMode::NavWalking;
            }
            _ => {
                body.current_floor.clear();

                if body.movement_mode == MovementMode::Falling {
                    // Leaving a moving platform keeps its momentum.
                    let imparted = self.imparted_movement_base_velocity(body);
                    body.velocity += imparted;
                }

                self.set_base(body, None);

                if body.movement_mode == MovementMode::None {
                    // Kill velocity and every queued request.
                    body.velocity = Vec3::zeros();
                    body.acceleration = Vec3::zeros();
                    body.requested_velocity = None;
                    body.root_motion_velocity = None;
                    body.pending_launch_velocity = None;
                    body.clear_accumulated_forces();
                }
            }
        }

        self.events.push(MovementEvent::MovementModeChanged {
            body: body.id,
            previous,
            previous_custom,
            current: body.movement_mode,
            current_custom: body.custom_movement_mode,
        });
    }

    /// Base velocity carried into the air when leaving the ground, filtered
    /// by the per-axis impart switches.
    pub(crate) fn imparted_movement_base_velocity(&self, body: &KinematicBody) -> Vec3 {
        let mut result = Vec3::zeros();
        if let Some(base) = body.movement_base {
            if base.is_dynamic {
                let base_velocity = self.world.surface_velocity(base.surface);
                if body.config.impart_base_velocity_x {
                    result.x = base_velocity.x;
                }
                if body.config.impart_base_velocity_y {
                    result.y = base_velocity.y;
                }
                if body.config.impart_base_velocity_z {
                    result.z = base_velocity.z;
                }
            }
        }
        result
    }

    /// Resolve the default mode for the body's surroundings: water mode in
    /// water, otherwise the default land mode, falling through to Falling
    /// when walking has no floor here.
    pub fn set_default_movement_mode(&mut self, body: &mut KinematicBody) {
        if body.config.can_ever_swim && self.is_in_water(body) {
            let water_mode = body.config.default_water_movement_mode;
            self.set_movement_mode(body, water_mode, 0);
        } else if body.movement_mode != body.config.default_land_movement_mode {
            let saved_velocity_z = body.velocity.z;
            let land_mode = body.config.default_land_movement_mode;
            self.set_movement_mode(body, land_mode, 0);

            // Avoid a one-tick walking state when walking fails here.
            if body.movement_mode == MovementMode::Walking && body.movement_base.is_none() {
                // Keep the transient state from zeroing vertical velocity.
                body.velocity.z = saved_velocity_z;
                self.set_movement_mode(body, MovementMode::Falling, 0);
            }
        }
    }

    /// Whether the body currently stands in a water volume.
    pub(crate) fn is_in_water(&self, body: &KinematicBody) -> bool {
        self.world.physics_volume(body.position).is_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::geometry::SurfaceInfo;
    use crate::world::{StaticShape, StaticWorld};

    fn flat_world() -> StaticWorld {
        let mut world = StaticWorld::new();
        world.add(StaticShape::floor(0.0));
        world
    }

    #[test]
    fn same_mode_transition_is_a_no_op() {
        let world = flat_world();
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        let mut body = KinematicBody::new(Vec3::new(0.0, 0.0, 90.0), 34.0, 88.0);

        solver.set_movement_mode(&mut body, MovementMode::Walking, 0);
        assert!(events.is_empty(), "no event for a no-op transition");
    }

    #[test]
    fn custom_sub_mode_is_zero_outside_custom() {
        let world = flat_world();
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        let mut body = KinematicBody::new(Vec3::new(0.0, 0.0, 90.0), 34.0, 88.0);

        solver.set_movement_mode(&mut body, MovementMode::Custom, 3);
        assert_eq!(body.movement_mode, MovementMode::Custom);
        assert_eq!(body.custom_movement_mode, 3);

        // Sub-mode change within Custom is a real transition.
        solver.set_movement_mode(&mut body, MovementMode::Custom, 5);
        assert_eq!(body.custom_movement_mode, 5);

        // Leaving Custom resets the sub-mode even if one was passed.
        solver.set_movement_mode(&mut body, MovementMode::Flying, 9);
        assert_eq!(body.movement_mode, MovementMode::Flying);
        assert_eq!(body.custom_movement_mode, 0);
    }

    #[test]
    fn nav_walking_downgrades_without_nav_data() {
        let world = flat_world();
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        let mut body = KinematicBody::new(Vec3::new(0.0, 0.0, 90.0), 34.0, 88.0);
        body.movement_mode = MovementMode::Falling;

        solver.set_movement_mode(&mut body, MovementMode::NavWalking, 0);
        assert_eq!(body.movement_mode, MovementMode::Walking);

        // With nav data present the mode sticks.
        let mut world = flat_world();
        world.set_nav_floor(0.0);
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        body.movement_mode = MovementMode::Falling;
        solver.set_movement_mode(&mut body, MovementMode::NavWalking, 0);
        assert_eq!(body.movement_mode, MovementMode::NavWalking);
    }

    #[test]
    fn entering_walking_probes_floor_and_flattens_velocity() {
        let world = flat_world();
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        let mut body = KinematicBody::new(Vec3::new(0.0, 0.0, 90.0), 34.0, 88.0);
        body.movement_mode = MovementMode::Falling;
        body.velocity = Vec3::new(100.0, 0.0, -500.0);

        solver.set_movement_mode(&mut body, MovementMode::Walking, 0);
        assert_eq!(body.velocity.z, 0.0);
        assert!(body.current_floor.is_walkable_floor());
        assert!(body.movement_base.is_some());
    }

    #[test]
    fn entering_falling_imparts_dynamic_base_velocity() {
        let mut world = StaticWorld::new();
        let platform = world.add_with(
            StaticShape::cuboid(Vec3::new(200.0, 200.0, 10.0), Vec3::new(0.0, 0.0, -10.0)),
            SurfaceInfo {
                is_dynamic: true,
                ..SurfaceInfo::default()
            },
        );
        world.set_surface_velocity(platform, Vec3::new(150.0, 0.0, 0.0));

        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        let mut body = KinematicBody::new(Vec3::new(0.0, 0.0, 90.0), 34.0, 88.0);
        body.movement_mode = MovementMode::Falling;

        // Land first so the platform becomes the base.
        solver.set_movement_mode(&mut body, MovementMode::Walking, 0);
        assert!(body.movement_base.is_some());

        // Jumping off carries the platform's momentum.
        solver.set_movement_mode(&mut body, MovementMode::Falling, 0);
        assert!((body.velocity.x - 150.0).abs() < 1.0e-3);
        assert!(body.movement_base.is_none());
        assert!(!body.current_floor.blocking_hit);
    }

    #[test]
    fn entering_none_clears_velocity_and_requests() {
        let world = flat_world();
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        let mut body = KinematicBody::new(Vec3::new(0.0, 0.0, 90.0), 34.0, 88.0);
        body.velocity = Vec3::new(100.0, 0.0, 0.0);
        body.acceleration = Vec3::new(500.0, 0.0, 0.0);
        body.requested_velocity = Some(Vec3::new(1.0, 0.0, 0.0));
        body.add_impulse(Vec3::new(0.0, 0.0, 400.0));

        solver.set_movement_mode(&mut body, MovementMode::None, 0);
        assert_eq!(body.velocity, Vec3::zeros());
        assert_eq!(body.acceleration, Vec3::zeros());
        assert!(body.requested_velocity.is_none());
        assert_eq!(body.pending_impulse, Vec3::zeros());
    }

    #[test]
    fn mode_change_event_carries_both_modes() {
        let world = flat_world();
        let mut events = Vec::new();
        let mut solver = Solver::new(&world, SolverConfig::default(), &mut events);
        let mut body = KinematicBody::new(Vec3::new(0.0, 0.0, 90.0), 34.0, 88.0);

        solver.set_movement_mode(&mut body, MovementMode::Falling, 0);
        let event = events.last().expect("mode change event");
        match event {
            MovementEvent::MovementModeChanged {
                previous, current, ..
            } => {
                assert_eq!(*previous, MovementMode::Walking);
                assert_eq!(*current, MovementMode::Falling);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
