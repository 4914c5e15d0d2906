/*!
Top-level driver: a registry of kinematic bodies advanced in registration
order, with a queue of movement events drained by the caller after each tick.

The simulator owns no world: the geometry oracle is injected into every tick,
so the same body set can be stepped against any scene. Iteration order is the
stable registration order, keeping runs reproducible.
*/

use crate::body::{BodyId, KinematicBody, MovementMode};
use crate::config::SolverConfig;
use crate::events::MovementEvent;
use crate::geometry::GeometryOracle;
use crate::solver::Solver;

pub struct Simulator {
    bodies: Vec<KinematicBody>,
    next_id: u64,
    events: Vec<MovementEvent>,
    /// Per-tick solver toggles, resolved once per tick.
    pub solver_config: SolverConfig,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            bodies: Vec::new(),
            next_id: 1,
            events: Vec::new(),
            solver_config: SolverConfig::default(),
        }
    }

    /// Add a body to the simulation; it keeps its registration slot (and
    /// therefore its tick order) until unregistered.
    pub fn register_body(&mut self, mut body: KinematicBody) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        body.id = id;
        self.bodies.push(body);
        id
    }

    /// Remove a body, returning its final state.
    pub fn unregister_body(&mut self, id: BodyId) -> Option<KinematicBody> {
        let index = self.bodies.iter().position(|b| b.id == id)?;
        Some(self.bodies.remove(index))
    }

    pub fn body(&self, id: BodyId) -> Option<&KinematicBody> {
        self.bodies.iter().find(|b| b.id == id)
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut KinematicBody> {
        self.bodies.iter_mut().find(|b| b.id == id)
    }

    pub fn bodies(&self) -> &[KinematicBody] {
        &self.bodies
    }

    /// Advance every registered body by `delta_time`, in registration order.
    pub fn tick(&mut self, world: &dyn GeometryOracle, delta_time: f32) {
        let config = self.solver_config;
        for body in &mut self.bodies {
            let mut solver = Solver::new(world, config, &mut self.events);
            solver.perform_movement(body, delta_time);
        }
    }

    /// Change a body's movement mode through the transition machinery.
    pub fn set_movement_mode(
        &mut self,
        world: &dyn GeometryOracle,
        id: BodyId,
        mode: MovementMode,
        custom_mode: u8,
    ) {
        let config = self.solver_config;
        if let Some(body) = self.bodies.iter_mut().find(|b| b.id == id) {
            let mut solver = Solver::new(world, config, &mut self.events);
            solver.set_movement_mode(body, mode, custom_mode);
        }
    }

    /// Crouch a body (shrinks the capsule).
    pub fn crouch(&mut self, world: &dyn GeometryOracle, id: BodyId) {
        let config = self.solver_config;
        if let Some(body) = self.bodies.iter_mut().find(|b| b.id == id) {
            let mut solver = Solver::new(world, config, &mut self.events);
            solver.crouch(body);
        }
    }

    /// Restore a crouched body to standing height; returns false when there
    /// is not enough room.
    pub fn uncrouch(&mut self, world: &dyn GeometryOracle, id: BodyId) -> bool {
        let config = self.solver_config;
        match self.bodies.iter_mut().find(|b| b.id == id) {
            Some(body) => {
                let mut solver = Solver::new(world, config, &mut self.events);
                solver.uncrouch(body)
            }
            None => false,
        }
    }

    /// Take every event queued since the last drain, in emission order.
    pub fn drain_events(&mut self) -> Vec<MovementEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SurfaceInfo;
    use crate::math::{Vec3, safe_normal};
    use crate::world::{StaticShape, StaticWorld};

    const RADIUS: f32 = 34.0;
    const HALF_HEIGHT: f32 = 88.0;
    // Standing height over a floor at z = 0: capsule bottom in the middle of
    // the hover band.
    const STAND_Z: f32 = HALF_HEIGHT + 2.15;

    fn flat_world() -> StaticWorld {
        let mut world = StaticWorld::new();
        world.add(StaticShape::floor(0.0));
        world
    }

    fn standing_body() -> KinematicBody {
        KinematicBody::new(Vec3::new(0.0, 0.0, STAND_Z), RADIUS, HALF_HEIGHT)
    }

    fn count_landed(events: &[MovementEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, MovementEvent::Landed { .. }))
            .count()
    }

    #[test]
    fn zero_dt_tick_changes_nothing() {
        let world = flat_world();
        let mut sim = Simulator::new();
        let id = sim.register_body(standing_body());
        sim.tick(&world, 0.016); // settle

        let before_pos = sim.body(id).unwrap().position;
        let before_vel = sim.body(id).unwrap().velocity;
        let before_mode = sim.body(id).unwrap().movement_mode;
        sim.drain_events();

        sim.tick(&world, 0.0);
        sim.tick(&world, 1.0e-9);

        let body = sim.body(id).unwrap();
        assert_eq!(body.position, before_pos);
        assert_eq!(body.velocity, before_vel);
        assert_eq!(body.movement_mode, before_mode);
        assert!(sim.drain_events().is_empty());
    }

    #[test]
    fn resting_body_stays_put() {
        let world = flat_world();
        let mut sim = Simulator::new();
        let id = sim.register_body(standing_body());

        for _ in 0..10 {
            sim.tick(&world, 0.016);
        }

        let body = sim.body(id).unwrap();
        assert_eq!(body.movement_mode, MovementMode::Walking);
        assert_eq!(body.velocity, Vec3::zeros());
        assert!((body.position.x).abs() < 1.0e-3);
        assert!((body.position.y).abs() < 1.0e-3);
        // Hover height stays inside the floor band.
        let hover = body.position.z - HALF_HEIGHT;
        assert!((1.7..=2.6).contains(&hover), "hover {hover}");
        assert!(body.current_floor.is_walkable_floor());
    }

    #[test]
    fn accelerating_walk_approaches_max_speed_without_z_drift() {
        let world = flat_world();
        let mut sim = Simulator::new();
        let id = sim.register_body(standing_body());

        let mut last_x = 0.0;
        for _ in 0..20 {
            sim.body_mut(id).unwrap().acceleration = Vec3::new(500.0, 0.0, 0.0);
            sim.tick(&world, 0.1);

            let body = sim.body(id).unwrap();
            assert!(body.position.x >= last_x, "monotonic advance along +X");
            last_x = body.position.x;
        }

        let body = sim.body(id).unwrap();
        assert_eq!(body.movement_mode, MovementMode::Walking);
        // Velocity approaches max walk speed along +X.
        assert!(body.velocity.x > 550.0 && body.velocity.x <= 600.0 * 1.01);
        assert!(body.velocity.y.abs() < 1.0e-2);
        // No vertical drift while walking the flat floor.
        assert!((body.position.z - STAND_Z).abs() < 1.0, "z {}", body.position.z);
    }

    #[test]
    fn falling_body_lands_exactly_once() {
        let world = flat_world();
        let mut sim = Simulator::new();
        let mut body = standing_body();
        // Drop from 300 above the standing height.
        body.position.z = STAND_Z + 300.0;
        body.movement_mode = MovementMode::Falling;
        let id = sim.register_body(body);

        // t = sqrt(2h/g) ~ 0.78s; give it 1.5s of ticks.
        let mut events = Vec::new();
        for _ in 0..94 {
            sim.tick(&world, 0.016);
            events.extend(sim.drain_events());
        }

        let body = sim.body(id).unwrap();
        assert_eq!(body.movement_mode, MovementMode::Walking);
        assert_eq!(count_landed(&events), 1, "landed exactly once");
        assert!(body.current_floor.is_walkable_floor());
        // Vertical velocity resets after landing.
        assert!(body.velocity.z.abs() < 1.0e-3);
        // Landed notification precedes the mode-change notification.
        let landed_at = events
            .iter()
            .position(|e| matches!(e, MovementEvent::Landed { .. }))
            .unwrap();
        let mode_change_at = events
            .iter()
            .position(|e| matches!(e, MovementEvent::MovementModeChanged { .. }))
            .unwrap();
        assert!(landed_at < mode_change_at);
    }

    #[test]
    fn landing_time_matches_kinematics() {
        let world = flat_world();
        let mut sim = Simulator::new();
        let mut body = standing_body();
        let drop_height = 300.0;
        body.position.z = STAND_Z + drop_height;
        body.movement_mode = MovementMode::Falling;
        let id = sim.register_body(body);

        let dt = 0.016;
        let mut landed_tick = None;
        for tick_index in 0..200 {
            sim.tick(&world, dt);
            if count_landed(&sim.drain_events()) > 0 {
                landed_tick = Some(tick_index);
                break;
            }
        }
        let landed_tick = landed_tick.expect("body never landed") as f32;
        let expected = (2.0 * drop_height / 980.0).sqrt();
        let actual = landed_tick * dt;
        // One tick of tolerance on either side.
        assert!(
            (actual - expected).abs() <= 2.0 * dt,
            "landed after {actual}s, expected ~{expected}s"
        );
        let _ = id;
    }

    #[test]
    fn unwalkable_slope_deflects_instead_of_stopping() {
        let mut world = flat_world();
        // A steep wall-like slope ahead: normal (0.99, 0, 0.14).
        world.add(StaticShape::Plane {
            normal: safe_normal(Vec3::new(-0.99, 0.0, 0.14)),
            dist: -150.0,
        });

        let mut sim = Simulator::new();
        let id = sim.register_body(standing_body());

        // Drive at the wall at a 45-degree angle.
        let mut pre_impact_speed: f32 = 0.0;
        for _ in 0..40 {
            sim.body_mut(id).unwrap().acceleration =
                safe_normal(Vec3::new(1.0, 1.0, 0.0)) * 2048.0;
            let speed = sim.body(id).unwrap().velocity.norm();
            pre_impact_speed = pre_impact_speed.max(speed);
            sim.tick(&world, 0.05);
        }

        let body = sim.body(id).unwrap();
        // The body slid along the wall rather than stopping dead.
        assert!(body.velocity.norm() > 50.0, "slide speed {}", body.velocity.norm());
        assert!(body.position.y > 50.0, "slid along the wall: y {}", body.position.y);
        // Never faster than the pre-impact speed, and still on the ground.
        assert!(body.velocity.norm() <= pre_impact_speed * 1.01);
        assert_eq!(body.movement_mode, MovementMode::Walking);
    }

    #[test]
    fn ledge_lock_reverts_and_falls_when_no_side_path_exists() {
        let mut world = StaticWorld::new();
        // A pedestal: the body cannot leave it sideways anywhere.
        world.add(StaticShape::cuboid(
            Vec3::new(60.0, 60.0, 50.0),
            Vec3::new(0.0, 0.0, -50.0),
        ));
        let mut sim = Simulator::new();
        let mut body = standing_body();
        body.config.can_walk_off_ledges = false;
        let id = sim.register_body(body);
        sim.tick(&world, 0.016); // settle and acquire the floor
        sim.drain_events();

        // March toward the edge until the ledge logic triggers.
        let mut events = Vec::new();
        for _ in 0..60 {
            sim.body_mut(id).unwrap().acceleration = Vec3::new(2048.0, 0.0, 0.0);
            sim.tick(&world, 0.05);
            events.extend(sim.drain_events());
            if sim.body(id).unwrap().movement_mode == MovementMode::Falling {
                break;
            }
        }

        let body = sim.body(id).unwrap();
        // With no side path, the first ledge failure falls (and the sub-step
        // move was reverted first, so the fall starts from on the pedestal,
        // not dangling past its edge).
        assert_eq!(body.movement_mode, MovementMode::Falling);
        assert!(events
            .iter()
            .any(|e| matches!(e, MovementEvent::WalkedOffLedge { .. })));
    }

    #[test]
    fn walks_off_a_ledge_into_falling_by_default() {
        let mut world = StaticWorld::new();
        world.add(StaticShape::cuboid(
            Vec3::new(100.0, 200.0, 50.0),
            Vec3::new(0.0, 0.0, -50.0),
        ));
        let mut sim = Simulator::new();
        let id = sim.register_body(standing_body());
        sim.tick(&world, 0.016);
        sim.drain_events();

        let mut events = Vec::new();
        for _ in 0..80 {
            sim.body_mut(id).unwrap().acceleration = Vec3::new(2048.0, 0.0, 0.0);
            sim.tick(&world, 0.05);
            events.extend(sim.drain_events());
            if sim.body(id).unwrap().movement_mode == MovementMode::Falling {
                break;
            }
        }

        assert_eq!(sim.body(id).unwrap().movement_mode, MovementMode::Falling);
        assert!(events
            .iter()
            .any(|e| matches!(e, MovementEvent::WalkedOffLedge { .. })));
    }

    #[test]
    fn walks_up_a_step() {
        let mut world = flat_world();
        // Step face at x = 150, top at z = 20, long enough not to run off.
        world.add(StaticShape::cuboid(
            Vec3::new(1000.0, 200.0, 10.0),
            Vec3::new(1150.0, 0.0, 10.0),
        ));
        let mut sim = Simulator::new();
        let id = sim.register_body(standing_body());

        for _ in 0..40 {
            sim.body_mut(id).unwrap().acceleration = Vec3::new(2048.0, 0.0, 0.0);
            sim.tick(&world, 0.05);
        }

        let body = sim.body(id).unwrap();
        assert_eq!(body.movement_mode, MovementMode::Walking);
        // On top of the 20-high step.
        assert!(body.position.x > 160.0, "x {}", body.position.x);
        assert!(
            (body.position.z - (STAND_Z + 20.0)).abs() < 1.5,
            "z {}",
            body.position.z
        );
    }

    #[test]
    fn launch_enters_falling_and_fires_apex_event() {
        let world = flat_world();
        let mut sim = Simulator::new();
        let id = sim.register_body(standing_body());
        sim.tick(&world, 0.016);
        sim.drain_events();

        sim.body_mut(id).unwrap().launch(Vec3::new(0.0, 0.0, 420.0));
        sim.tick(&world, 0.016);
        assert_eq!(sim.body(id).unwrap().movement_mode, MovementMode::Falling);
        assert!(sim.body(id).unwrap().velocity.z > 0.0);

        // Run until the apex notification fires.
        let mut saw_apex = false;
        let mut saw_landed = false;
        for _ in 0..120 {
            sim.tick(&world, 0.016);
            for event in sim.drain_events() {
                match event {
                    MovementEvent::JumpApex { .. } => saw_apex = true,
                    MovementEvent::Landed { .. } => saw_landed = true,
                    _ => {}
                }
            }
        }
        assert!(saw_apex, "apex notification fired");
        assert!(saw_landed, "came back down and landed");
        assert_eq!(sim.body(id).unwrap().movement_mode, MovementMode::Walking);
    }

    #[test]
    fn flying_ignores_gravity_and_slides_along_walls() {
        let mut world = flat_world();
        // Wall face at x = 200.
        world.add(StaticShape::cuboid(
            Vec3::new(50.0, 400.0, 400.0),
            Vec3::new(250.0, 0.0, 400.0),
        ));
        let mut sim = Simulator::new();
        let mut body = standing_body();
        body.position.z = 300.0;
        body.movement_mode = MovementMode::Flying;
        let id = sim.register_body(body);

        for _ in 0..40 {
            sim.body_mut(id).unwrap().acceleration =
                safe_normal(Vec3::new(1.0, 0.3, 0.0)) * 2048.0;
            sim.tick(&world, 0.05);
        }

        let body = sim.body(id).unwrap();
        assert_eq!(body.movement_mode, MovementMode::Flying);
        // No gravity: height held.
        assert!((body.position.z - 300.0).abs() < 2.0, "z {}", body.position.z);
        // Blocked at the wall but sliding along it in +Y.
        assert!(body.position.x < 200.0 - RADIUS + 1.0);
        assert!(body.position.y > 100.0, "y {}", body.position.y);
    }

    #[test]
    fn rides_a_moving_platform_and_inherits_its_velocity_on_launch() {
        let mut world = StaticWorld::new();
        let platform = world.add_with(
            StaticShape::cuboid(Vec3::new(150.0, 150.0, 10.0), Vec3::new(0.0, 0.0, -10.0)),
            SurfaceInfo {
                is_dynamic: true,
                ..SurfaceInfo::default()
            },
        );
        world.set_surface_velocity(platform, Vec3::new(100.0, 0.0, 0.0));

        let mut sim = Simulator::new();
        let id = sim.register_body(standing_body());
        sim.tick(&world, 0.016); // acquire the base

        // Move the platform forward 10 per tick and let the body follow.
        let mut platform_x = 0.0;
        for _ in 0..10 {
            platform_x += 10.0;
            world.set_surface_pose(
                platform,
                Vec3::new(platform_x, 0.0, -10.0),
                crate::math::Quat::identity(),
            );
            sim.tick(&world, 0.1);
        }

        let body = sim.body(id).unwrap();
        assert!(
            (body.position.x - platform_x).abs() < 15.0,
            "followed platform: body x {}, platform x {}",
            body.position.x,
            platform_x
        );

        // Jumping off imparts the platform velocity.
        sim.body_mut(id).unwrap().launch(Vec3::new(0.0, 0.0, 400.0));
        sim.tick(&world, 0.016);
        let body = sim.body(id).unwrap();
        assert_eq!(body.movement_mode, MovementMode::Falling);
        assert!(body.velocity.x > 90.0, "imparted x velocity {}", body.velocity.x);
    }

    #[test]
    fn crouch_shrinks_and_uncrouch_respects_ceilings() {
        let mut world = flat_world();
        // A ceiling slab over x < 500, leaving 130 of clearance: room for a
        // crouched body (80 tall) but not a standing one (176 tall).
        world.add(StaticShape::cuboid(
            Vec3::new(500.0, 500.0, 10.0),
            Vec3::new(0.0, 0.0, 140.0),
        ));

        let mut sim = Simulator::new();
        // Start in the open, then crouch and duck under the slab.
        let mut body = standing_body();
        body.position.x = 700.0;
        let id = sim.register_body(body);
        sim.tick(&world, 0.016);

        sim.crouch(&world, id);
        sim.tick(&world, 0.016);
        let body = sim.body(id).unwrap();
        assert!(body.is_crouched);
        assert_eq!(body.capsule_half_height, 40.0);

        // Under the slab there is no room to stand back up.
        sim.body_mut(id).unwrap().position.x = 0.0;
        sim.tick(&world, 0.016);
        assert!(!sim.uncrouch(&world, id));
        assert!(sim.body(id).unwrap().is_crouched);

        // Back in the open, standing succeeds and restores the capsule.
        sim.body_mut(id).unwrap().position.x = 700.0;
        sim.tick(&world, 0.016);
        assert!(sim.uncrouch(&world, id));
        let body = sim.body(id).unwrap();
        assert!(!body.is_crouched);
        assert_eq!(body.capsule_half_height, HALF_HEIGHT);
    }

    #[test]
    fn swims_through_water_and_falls_out_of_it() {
        let mut world = StaticWorld::new();
        world.add(StaticShape::floor(-500.0));
        world.add_water_volume(
            Vec3::new(-1000.0, -1000.0, -400.0),
            Vec3::new(1000.0, 1000.0, -100.0),
        );

        let mut sim = Simulator::new();
        let mut body = standing_body();
        body.position.z = 0.0;
        body.movement_mode = MovementMode::Falling;
        let id = sim.register_body(body);

        // Fall into the water: mode hands off to swimming.
        let mut entered_water = false;
        for _ in 0..120 {
            sim.tick(&world, 0.016);
            if sim.body(id).unwrap().movement_mode == MovementMode::Swimming {
                entered_water = true;
                break;
            }
        }
        assert!(entered_water, "handed off to swimming");

        // Neutral buoyancy: once the entry velocity is gone, gravity no
        // longer pulls the body down.
        sim.body_mut(id).unwrap().velocity = Vec3::zeros();
        let z_before = sim.body(id).unwrap().position.z;
        for _ in 0..30 {
            sim.tick(&world, 0.016);
        }
        let body = sim.body(id).unwrap();
        assert!(
            (body.position.z - z_before).abs() < 1.0,
            "no sink while neutrally buoyant"
        );

        // Teleport above the surface: swimming hands back to falling.
        sim.body_mut(id).unwrap().position.z = 0.0;
        sim.tick(&world, 0.016);
        assert_ne!(sim.body(id).unwrap().movement_mode, MovementMode::Swimming);
    }

    #[test]
    fn mode_invariant_holds_across_a_chaotic_run() {
        let mut world = flat_world();
        world.add(StaticShape::cuboid(
            Vec3::new(100.0, 100.0, 40.0),
            Vec3::new(300.0, 0.0, 40.0),
        ));
        let mut sim = Simulator::new();
        let id = sim.register_body(standing_body());

        for i in 0..200 {
            let dir = (i as f32 * 0.37).sin();
            sim.body_mut(id).unwrap().acceleration =
                Vec3::new(2048.0 * dir, 2048.0 * (1.0 - dir.abs()), 0.0);
            if i == 50 {
                sim.body_mut(id).unwrap().launch(Vec3::new(0.0, 0.0, 420.0));
            }
            sim.tick(&world, 0.033);

            let body = sim.body(id).unwrap();
            if body.movement_mode != MovementMode::Custom {
                assert_eq!(body.custom_movement_mode, 0);
            }
            // Any tick that ends walking has a walkable floor.
            if body.movement_mode == MovementMode::Walking {
                assert!(body.current_floor.is_walkable_floor());
            }
            assert!(body.velocity.norm().is_finite());
        }
    }

    #[test]
    fn registration_order_is_stable_and_unregister_returns_state() {
        let world = flat_world();
        let mut sim = Simulator::new();
        let a = sim.register_body(standing_body());
        let b = sim.register_body(standing_body());
        let c = sim.register_body(standing_body());

        assert_eq!(
            sim.bodies().iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![a, b, c]
        );

        let removed = sim.unregister_body(b).expect("body existed");
        assert_eq!(removed.id, b);
        assert_eq!(
            sim.bodies().iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![a, c]
        );
        assert!(sim.unregister_body(b).is_none());
        let _ = world;
    }

    #[test]
    fn deterministic_replay_with_equal_seeds() {
        let run = || {
            let world = flat_world();
            let mut sim = Simulator::new();
            let mut body = standing_body();
            body = body.with_rng_seed(42);
            let id = sim.register_body(body);
            for i in 0..100 {
                sim.body_mut(id).unwrap().acceleration =
                    Vec3::new((i as f32).sin() * 2048.0, (i as f32).cos() * 2048.0, 0.0);
                if i % 30 == 10 {
                    sim.body_mut(id).unwrap().launch(Vec3::new(0.0, 0.0, 300.0));
                }
                sim.tick(&world, 0.033);
            }
            let b = sim.body(id).unwrap();
            (b.position, b.velocity)
        };

        let (p1, v1) = run();
        let (p2, v2) = run();
        assert_eq!(p1, p2);
        assert_eq!(v1, v2);
    }
}
