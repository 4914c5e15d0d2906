//! Movement notifications.
//!
//! The solvers emit one-way observer events into a queue owned by the
//! [`crate::simulator::Simulator`]; the caller drains it after each tick.
//! Within one tick, events are pushed in the order the underlying conditions
//! occurred ("landed" precedes the mode change it causes, impacts precede
//! deflections, "movement updated" is last for each body).

use crate::body::{BodyId, MovementMode};
use crate::geometry::{HitResult, SurfaceId};
use crate::math::Vec3;

#[derive(Clone, Copy, Debug)]
pub enum MovementEvent {
    /// A falling body touched down on a walkable surface.
    Landed { body: BodyId, hit: HitResult },
    /// Vertical velocity crossed below zero while falling with apex
    /// notification armed.
    JumpApex { body: BodyId },
    /// A walking body ran off an edge and is about to fall.
    WalkedOffLedge {
        body: BodyId,
        previous_floor_impact_normal: Vec3,
        previous_floor_contact_normal: Vec3,
        location: Vec3,
        time_delta: f32,
    },
    /// The movement mode changed; emitted after the new mode's entry effects.
    MovementModeChanged {
        body: BodyId,
        previous: MovementMode,
        previous_custom: u8,
        current: MovementMode,
        current_custom: u8,
    },
    /// A move was blocked by an obstacle.
    MoveBlocked { body: BodyId, hit: HitResult },
    /// The blocking obstacle was another character.
    BumpedPawn { body: BodyId, surface: SurfaceId },
    /// End-of-tick summary of the body's net motion.
    MovementUpdated {
        body: BodyId,
        delta: Vec3,
        old_velocity: Vec3,
    },
}
