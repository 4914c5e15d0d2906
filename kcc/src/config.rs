/*!
Movement tunables and simulation constants.

These constants centralize the parameters used by the floor resolver, the
ground/falling integrators, and the slide/step logic. Keeping them together
makes tuning easier and helps ensure deterministic behavior across platforms.

Notes
- Distances are in centimeters, time in seconds, world axes Z-up.
- `MoveConfig` is per body and treated as immutable for the duration of a tick.
- `SolverConfig` carries the per-tick toggles that used to live in ambient
  global switches; the driver resolves them once per tick and passes them in.
*/

use crate::body::MovementMode;

/// Minimum delta time considered for a simulation step. Steps below this are
/// ignored entirely (also avoids divide-by-zero inside the integrators).
pub const MIN_TICK_TIME: f32 = 1.0e-6;

/// Lower edge of the floor hover band. Height adjustment aims for the middle
/// of `[MIN_FLOOR_DIST, MAX_FLOOR_DIST]`.
pub const MIN_FLOOR_DIST: f32 = 1.9;

/// Upper edge of the floor hover band, and the extra reach given to floor
/// probes so a height adjustment cannot immediately invalidate the result.
pub const MAX_FLOOR_DIST: f32 = 2.4;

/// Braking snaps velocity to zero once it falls below this speed.
pub const BRAKE_TO_STOP_VELOCITY: f32 = 10.0;

/// Floor-probe hits within this planar distance of the capsule's outer radius
/// are rejected as edge contacts and re-probed with a slimmer capsule.
pub const SWEEP_EDGE_REJECT_DISTANCE: f32 = 0.15;

/// Maximum Z for a surface normal to still count as the vertical side of a
/// step (used when validating the floor after a step-up).
pub const MAX_STEP_SIDE_Z: f32 = 0.08;

/// A slope is treated as vertical if |normal.z| is at or below this threshold.
/// Accounts for precision problems that sometimes angle normals slightly off
/// horizontal for vertical surfaces.
pub const VERTICAL_SLOPE_NORMAL_Z: f32 = 0.001;

/// Extra downward reach when validating the far side of a ledge side-step.
pub const LEDGE_CHECK_THRESHOLD: f32 = 4.0;

/// Braking is integrated in sub-steps no longer than this, for consistent
/// results at low frame rates.
pub const BRAKING_SUB_STEP_TIME: f32 = 1.0 / 33.0;

/// Separation kept from surfaces when a sweep-move stops at a contact, so the
/// next query does not start touching.
pub const MOVE_SKIN: f32 = 0.1;

/// Per-body movement tunables.
///
/// Defaults reproduce the stock behavior the integrators were tuned around;
/// hosts override fields per actor as needed. All speeds are cm/s, all
/// accelerations cm/s^2.
#[derive(Clone, Copy, Debug)]
pub struct MoveConfig {
    /// Maximum ground speed (also caps lateral speed while falling).
    pub max_walk_speed: f32,
    /// Maximum ground speed while crouched.
    pub max_walk_speed_crouched: f32,
    pub max_swim_speed: f32,
    pub max_fly_speed: f32,
    /// Maximum speed reported for custom movement modes.
    pub max_custom_speed: f32,
    /// Lower bound on scaled max speed when analog input is nearly zero.
    pub min_analog_walk_speed: f32,

    pub max_acceleration: f32,
    /// Multiplier on friction while braking.
    pub braking_friction_factor: f32,
    /// Friction used while braking when `use_separate_braking_friction` is set,
    /// instead of the friction passed by the current movement mode.
    pub braking_friction: f32,
    pub use_separate_braking_friction: bool,
    pub braking_deceleration_walking: f32,
    pub braking_deceleration_falling: f32,
    pub braking_deceleration_swimming: f32,
    pub braking_deceleration_flying: f32,

    /// Ground friction; affects both braking and direction changes.
    pub ground_friction: f32,
    /// Lateral friction applied while falling.
    pub falling_lateral_friction: f32,

    /// Fraction of input acceleration usable while airborne.
    pub air_control: f32,
    /// Air control is boosted by this factor while lateral speed is below
    /// `air_control_boost_velocity_threshold`.
    pub air_control_boost_multiplier: f32,
    pub air_control_boost_velocity_threshold: f32,

    /// World gravity (negative Z), before `gravity_scale`.
    pub gravity_z: f32,
    pub gravity_scale: f32,
    /// Reference jump impulse; the falling solver's anti-stall kick derives
    /// its upward component from this.
    pub jump_z_velocity: f32,
    /// Fraction of gravity cancelled while swimming (1 = neutral buoyancy).
    pub buoyancy: f32,

    /// Maximum ledge height the body can step up onto.
    pub max_step_height: f32,
    /// Minimum Z of a walkable impact normal (cosine of the max slope angle).
    pub walkable_floor_z: f32,

    /// Distance from the capsule edge inside which floor contacts count as
    /// fully supported. Zero disables perching.
    pub perch_radius_threshold: f32,
    /// Extra downward probe distance allowed when validating a perch.
    pub perch_additional_height: f32,

    pub can_walk_off_ledges: bool,
    pub can_walk_off_ledges_when_crouching: bool,
    /// Capsule half height while crouched.
    pub crouched_half_height: f32,

    /// Keep the horizontal components of ground velocity through ramp and
    /// floor-height adjustments, instead of rescaling the full 3D velocity.
    pub maintain_horizontal_ground_velocity: bool,

    pub impart_base_velocity_x: bool,
    pub impart_base_velocity_y: bool,
    pub impart_base_velocity_z: bool,

    /// Probe for the floor every ground tick, even when stationary.
    pub always_check_floor: bool,
    /// Use an inscribed box instead of the capsule for floor probes, so the
    /// body does not slide off edges on the capsule's curvature.
    pub use_flat_base_for_floor_checks: bool,
    /// Snap acceleration to max magnitude along the current intent direction.
    pub force_max_accel: bool,

    /// Upper bound on one simulation sub-step. The final iteration may exceed
    /// this rather than drop remaining time.
    pub max_simulation_time_step: f32,
    /// Sub-step budget per tick.
    pub max_simulation_iterations: u32,

    pub max_depenetration_with_geometry: f32,
    pub max_depenetration_with_pawn: f32,

    /// Turn toward the acceleration direction at `rotation_rate_yaw`.
    pub orient_rotation_to_movement: bool,
    /// Yaw rate in degrees per second.
    pub rotation_rate_yaw: f32,

    /// Path-following requested velocity is applied at max speed rather than
    /// the requested magnitude.
    pub requested_move_with_max_speed: bool,
    /// Reach requested velocity through acceleration instead of assignment.
    pub requested_move_use_acceleration: bool,

    pub default_land_movement_mode: MovementMode,
    pub default_water_movement_mode: MovementMode,
    pub can_ever_swim: bool,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            max_walk_speed: 600.0,
            max_walk_speed_crouched: 300.0,
            max_swim_speed: 300.0,
            max_fly_speed: 600.0,
            max_custom_speed: 600.0,
            min_analog_walk_speed: 0.0,

            max_acceleration: 2048.0,
            braking_friction_factor: 2.0,
            braking_friction: 0.0,
            use_separate_braking_friction: false,
            braking_deceleration_walking: 2048.0,
            braking_deceleration_falling: 0.0,
            braking_deceleration_swimming: 0.0,
            braking_deceleration_flying: 0.0,

            ground_friction: 8.0,
            falling_lateral_friction: 0.0,

            air_control: 0.05,
            air_control_boost_multiplier: 2.0,
            air_control_boost_velocity_threshold: 25.0,

            gravity_z: -980.0,
            gravity_scale: 1.0,
            jump_z_velocity: 420.0,
            buoyancy: 1.0,

            max_step_height: 45.0,
            walkable_floor_z: 0.71,

            perch_radius_threshold: 0.0,
            perch_additional_height: 40.0,

            can_walk_off_ledges: true,
            can_walk_off_ledges_when_crouching: false,
            crouched_half_height: 40.0,

            maintain_horizontal_ground_velocity: true,

            impart_base_velocity_x: true,
            impart_base_velocity_y: true,
            impart_base_velocity_z: true,

            always_check_floor: true,
            use_flat_base_for_floor_checks: false,
            force_max_accel: false,

            max_simulation_time_step: 0.05,
            max_simulation_iterations: 8,

            max_depenetration_with_geometry: 500.0,
            max_depenetration_with_pawn: 100.0,

            orient_rotation_to_movement: false,
            rotation_rate_yaw: 360.0,

            requested_move_with_max_speed: false,
            requested_move_use_acceleration: true,

            default_land_movement_mode: MovementMode::Walking,
            default_water_movement_mode: MovementMode::Swimming,
            can_ever_swim: true,
        }
    }
}

/// Per-tick solver toggles, resolved once by the driver and passed into every
/// tick rather than read from ambient global state.
#[derive(Clone, Copy, Debug)]
pub struct SolverConfig {
    /// Allow moves that start inside geometry to proceed when they separate
    /// from the overlap, instead of reporting a blocking hit at time zero.
    pub ignore_first_blocking_overlap: bool,
    /// Extra pull-back applied on top of the reported penetration depth when
    /// resolving an overlap.
    pub penetration_pullback_distance: f32,
    /// Inflation applied to the overlap test that guards depenetration
    /// teleports, making the test slightly more restrictive than the sweep.
    pub penetration_overlap_inflation: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            ignore_first_blocking_overlap: false,
            penetration_pullback_distance: 0.125,
            penetration_overlap_inflation: 0.1,
        }
    }
}
