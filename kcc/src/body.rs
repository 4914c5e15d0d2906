/*!
Per-actor simulation state.

A [`KinematicBody`] owns everything the solvers mutate for one actor:
transform, velocity, movement mode, cached floor, base reference, capsule
dimensions, per-tick flags, and its tunables. The solvers hold no state of
their own; a body passed by reference is the entire mutable surface of a tick.
*/

use crate::config::MoveConfig;
use crate::geometry::{CapsuleDims, HitResult, SurfaceId};
use crate::math::{Quat, Vec3};
use crate::rng::XorShift64;

/// Stable identifier assigned when a body is registered with the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct BodyId(pub u64);

/// Active movement mode. Exactly one mode is active at a time;
/// `custom_movement_mode` on the body is meaningful only in `Custom`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MovementMode {
    /// No movement: input and physics are ignored entirely.
    None,
    /// Walking on a walkable floor.
    #[default]
    Walking,
    /// Walking constrained to navigation data.
    NavWalking,
    /// Airborne, under gravity.
    Falling,
    /// Swimming through a water volume.
    Swimming,
    /// Free 3D movement without gravity.
    Flying,
    /// Externally defined behavior, discriminated by `custom_movement_mode`.
    Custom,
}

/// Result of a floor probe beneath the capsule.
///
/// `floor_dist` / `line_dist` are only meaningful when `blocking_hit` is set;
/// `walkable_floor` implies `blocking_hit`. Cached across ticks only as a
/// hint, and invalidated whenever the body moves outside the solver's control.
#[derive(Clone, Copy, Debug, Default)]
pub struct FloorResult {
    pub blocking_hit: bool,
    pub walkable_floor: bool,
    /// The result came from the line-trace fallback rather than the sweep.
    pub line_trace: bool,
    /// Vertical distance from the capsule bottom to the swept floor contact.
    pub floor_dist: f32,
    /// Vertical distance from the capsule bottom to the line-trace contact.
    pub line_dist: f32,
    pub hit: HitResult,
}

impl FloorResult {
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// A floor we can stand on.
    #[inline]
    pub fn is_walkable_floor(&self) -> bool {
        self.blocking_hit && self.walkable_floor
    }

    /// Distance used for step/perch math; prefers the line result when the
    /// sweep fell back to a line trace.
    #[inline]
    pub fn distance_to_floor(&self) -> f32 {
        if self.line_trace {
            self.line_dist
        } else {
            self.floor_dist
        }
    }

    pub fn set_from_sweep(&mut self, hit: &HitResult, sweep_floor_dist: f32, walkable: bool) {
        self.blocking_hit = hit.blocking && !hit.start_penetrating;
        self.walkable_floor = walkable;
        self.line_trace = false;
        self.floor_dist = sweep_floor_dist;
        self.line_dist = 0.0;
        self.hit = *hit;
    }

    /// Adopt a line-trace hit while keeping the sweep's positional fields,
    /// which later height adjustment relies on.
    pub fn set_from_line_trace(
        &mut self,
        hit: &HitResult,
        sweep_floor_dist: f32,
        line_dist: f32,
        walkable: bool,
    ) {
        if self.hit.blocking && hit.blocking {
            let old = self.hit;
            self.hit = *hit;
            self.hit.time = old.time;
            self.hit.impact_point = old.impact_point;
            self.hit.location = old.location;
            self.hit.trace_start = old.trace_start;
            self.hit.trace_end = old.trace_end;

            self.line_trace = true;
            self.floor_dist = sweep_floor_dist;
            self.line_dist = line_dist;
            self.walkable_floor = walkable;
        }
    }
}

/// Weak reference to the surface currently supporting the body.
///
/// Lifetime of the underlying object is external; the solver drops the
/// reference when the oracle no longer resolves it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MovementBase {
    pub surface: SurfaceId,
    pub is_dynamic: bool,
}

/// Mutable simulation state for one actor.
pub struct KinematicBody {
    pub id: BodyId,

    /// Capsule center in world space. Mutated only by the solver's move
    /// primitive; external writes must be followed by a floor-check
    /// invalidation (the tick detects this and forces one).
    pub position: Vec3,
    /// Yaw orientation; the capsule shape itself is rotation-invariant.
    pub orientation: Quat,
    pub velocity: Vec3,
    /// Input intent for this tick, set by the controlling layer before the
    /// tick runs.
    pub acceleration: Vec3,
    /// Scale on max speed from analog input magnitude, in [0, 1].
    pub analog_input_modifier: f32,

    pub movement_mode: MovementMode,
    /// Sub-mode discriminator; zero unless `movement_mode == Custom`.
    pub custom_movement_mode: u8,
    /// Which ground variant to return to when landing.
    pub ground_movement_mode: MovementMode,

    pub capsule_radius: f32,
    pub capsule_half_height: f32,
    /// Standing half height, restored by uncrouch.
    pub(crate) default_half_height: f32,
    pub is_crouched: bool,
    /// Disables every geometry query for this body (probes report no floor).
    pub collision_enabled: bool,

    pub current_floor: FloorResult,
    pub movement_base: Option<MovementBase>,
    pub old_base_location: Vec3,
    pub old_base_quat: Quat,

    // Per-tick transient flags.
    pub just_teleported: bool,
    pub movement_in_progress: bool,
    pub force_next_floor_check: bool,
    /// Emit a jump-apex event on the next downward velocity crossing.
    pub notify_apex: bool,

    // External overrides and requests.
    /// Opaque root-motion velocity override; suppresses the velocity model.
    pub root_motion_velocity: Option<Vec3>,
    /// Path-following requested velocity, merged by the velocity model.
    pub requested_velocity: Option<Vec3>,
    /// Velocity is authoritative from elsewhere (e.g. a remote simulation);
    /// the velocity model leaves it untouched.
    pub external_velocity_authority: bool,
    /// Deferred launch, applied at the start of the next tick.
    pub pending_launch_velocity: Option<Vec3>,
    pub(crate) pending_impulse: Vec3,
    pub(crate) pending_force: Vec3,

    // Bookkeeping for external-move detection and end-of-tick notifications.
    pub(crate) last_update_location: Vec3,
    pub(crate) last_update_rotation: Quat,
    pub(crate) last_update_velocity: Vec3,

    pub config: MoveConfig,
    pub(crate) rng: XorShift64,
    pub(crate) time_step_warning_count: u32,
}

impl KinematicBody {
    pub fn new(position: Vec3, capsule_radius: f32, capsule_half_height: f32) -> Self {
        let half_height = capsule_half_height.max(capsule_radius);
        Self {
            id: BodyId::default(),
            position,
            orientation: Quat::identity(),
            velocity: Vec3::zeros(),
            acceleration: Vec3::zeros(),
            analog_input_modifier: 1.0,
            movement_mode: MovementMode::Walking,
            custom_movement_mode: 0,
            ground_movement_mode: MovementMode::Walking,
            capsule_radius,
            capsule_half_height: half_height,
            default_half_height: half_height,
            is_crouched: false,
            collision_enabled: true,
            current_floor: FloorResult::default(),
            movement_base: None,
            old_base_location: Vec3::zeros(),
            old_base_quat: Quat::identity(),
            just_teleported: false,
            movement_in_progress: false,
            force_next_floor_check: true,
            notify_apex: false,
            root_motion_velocity: None,
            requested_velocity: None,
            external_velocity_authority: false,
            pending_launch_velocity: None,
            pending_impulse: Vec3::zeros(),
            pending_force: Vec3::zeros(),
            last_update_location: position,
            last_update_rotation: Quat::identity(),
            last_update_velocity: Vec3::zeros(),
            config: MoveConfig::default(),
            rng: XorShift64::new(0x9E37_79B9_7F4A_7C15),
            time_step_warning_count: 0,
        }
    }

    pub fn with_config(mut self, config: MoveConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed the deterministic jitter generator; replays with equal seeds and
    /// inputs are bit-stable.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = XorShift64::new(seed);
        self
    }

    #[inline]
    pub fn capsule(&self) -> CapsuleDims {
        CapsuleDims::new(self.capsule_radius, self.capsule_half_height)
    }

    #[inline]
    pub fn is_moving_on_ground(&self) -> bool {
        matches!(
            self.movement_mode,
            MovementMode::Walking | MovementMode::NavWalking
        )
    }

    #[inline]
    pub fn is_falling(&self) -> bool {
        self.movement_mode == MovementMode::Falling
    }

    #[inline]
    pub fn is_flying(&self) -> bool {
        self.movement_mode == MovementMode::Flying
    }

    #[inline]
    pub fn is_swimming(&self) -> bool {
        self.movement_mode == MovementMode::Swimming
    }

    #[inline]
    pub fn has_root_motion(&self) -> bool {
        self.root_motion_velocity.is_some()
    }

    /// Max speed for the active movement mode.
    pub fn max_speed(&self) -> f32 {
        match self.movement_mode {
            MovementMode::Walking | MovementMode::NavWalking => {
                if self.is_crouched {
                    self.config.max_walk_speed_crouched
                } else {
                    self.config.max_walk_speed
                }
            }
            MovementMode::Falling => self.config.max_walk_speed,
            MovementMode::Swimming => self.config.max_swim_speed,
            MovementMode::Flying => self.config.max_fly_speed,
            MovementMode::Custom => self.config.max_custom_speed,
            MovementMode::None => 0.0,
        }
    }

    /// Braking deceleration for the active movement mode.
    pub fn max_braking_deceleration(&self) -> f32 {
        match self.movement_mode {
            MovementMode::Walking | MovementMode::NavWalking => {
                self.config.braking_deceleration_walking
            }
            MovementMode::Falling => self.config.braking_deceleration_falling,
            MovementMode::Swimming => self.config.braking_deceleration_swimming,
            MovementMode::Flying => self.config.braking_deceleration_flying,
            MovementMode::Custom | MovementMode::None => 0.0,
        }
    }

    /// Floor on scaled max speed from analog input, per mode.
    pub fn min_analog_speed(&self) -> f32 {
        match self.movement_mode {
            MovementMode::Walking | MovementMode::NavWalking | MovementMode::Falling => {
                self.config.min_analog_walk_speed
            }
            _ => 0.0,
        }
    }

    /// Effective gravity along Z.
    #[inline]
    pub fn gravity_z(&self) -> f32 {
        self.config.gravity_z * self.config.gravity_scale
    }

    /// True if speed exceeds `max_speed` beyond the 1% numeric tolerance.
    pub fn is_exceeding_max_speed(&self, max_speed: f32) -> bool {
        let max_speed = max_speed.max(0.0);
        self.velocity.norm_squared() > max_speed * max_speed * 1.01
    }

    /// Whether walking off a ledge is currently permitted.
    pub fn can_walk_off_ledges(&self) -> bool {
        if self.is_crouched && !self.config.can_walk_off_ledges_when_crouching {
            return false;
        }
        self.config.can_walk_off_ledges
    }

    /// Queue an impulse (instant velocity change), applied next tick.
    pub fn add_impulse(&mut self, impulse: Vec3) {
        self.pending_impulse += impulse;
    }

    /// Queue a continuous force for the next tick (integrated over dt).
    pub fn add_force(&mut self, force: Vec3) {
        self.pending_force += force;
    }

    /// Request a launch: velocity is replaced and the body enters Falling at
    /// the start of the next tick.
    pub fn launch(&mut self, velocity: Vec3) {
        self.pending_launch_velocity = Some(velocity);
    }

    /// Drop all queued impulses and forces.
    pub fn clear_accumulated_forces(&mut self) {
        self.pending_impulse = Vec3::zeros();
        self.pending_force = Vec3::zeros();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_speed_follows_mode_and_crouch() {
        let mut body = KinematicBody::new(Vec3::zeros(), 34.0, 88.0);
        assert_eq!(body.max_speed(), 600.0);
        body.is_crouched = true;
        assert_eq!(body.max_speed(), 300.0);
        body.is_crouched = false;
        body.movement_mode = MovementMode::Swimming;
        assert_eq!(body.max_speed(), 300.0);
        body.movement_mode = MovementMode::None;
        assert_eq!(body.max_speed(), 0.0);
    }

    #[test]
    fn exceeding_max_speed_uses_one_percent_tolerance() {
        let mut body = KinematicBody::new(Vec3::zeros(), 34.0, 88.0);
        body.velocity = Vec3::new(600.0, 0.0, 0.0);
        assert!(!body.is_exceeding_max_speed(600.0));
        // Just under the 1% squared tolerance still passes.
        body.velocity = Vec3::new(602.0, 0.0, 0.0);
        assert!(!body.is_exceeding_max_speed(600.0));
        body.velocity = Vec3::new(610.0, 0.0, 0.0);
        assert!(body.is_exceeding_max_speed(600.0));
    }

    #[test]
    fn floor_result_distance_prefers_line_result() {
        let mut floor = FloorResult::default();
        let mut hit = HitResult::default();
        hit.blocking = true;
        floor.set_from_sweep(&hit, 5.0, true);
        assert_eq!(floor.distance_to_floor(), 5.0);
        floor.set_from_line_trace(&hit, 5.0, 2.0, true);
        assert!(floor.line_trace);
        assert_eq!(floor.distance_to_floor(), 2.0);
    }

    #[test]
    fn crouch_blocks_walking_off_ledges_when_configured() {
        let mut body = KinematicBody::new(Vec3::zeros(), 34.0, 88.0);
        assert!(body.can_walk_off_ledges());
        body.is_crouched = true;
        assert!(!body.can_walk_off_ledges());
        body.config.can_walk_off_ledges_when_crouching = true;
        assert!(body.can_walk_off_ledges());
    }
}
