/*!
Deterministic, fixed-timestep kinematic capsule movement simulation.

Given a capsule-shaped actor, an input acceleration, and a world that answers
shape-sweep and overlap queries, the solvers compute the actor's new position,
orientation, and velocity for one tick: walking with floor detection,
stepping, and sliding; falling with air control and landing detection;
swimming, flying, and an explicit movement-mode state machine.

Architecture
- [`body::KinematicBody`] holds all per-actor state; the solvers are
  stateless and operate on it through an injected [`geometry::GeometryOracle`].
- [`solver::Solver`] bundles the oracle, the per-tick [`config::SolverConfig`],
  and the event sink for one tick.
- [`simulator::Simulator`] drives registered bodies in stable registration
  order and queues [`events::MovementEvent`]s for the caller to drain.
- [`world::StaticWorld`] is a parry3d-backed reference oracle for hosts (and
  tests) without their own collision scene.

Conventions: Z-up, centimeters, seconds. The capsule is always upright; body
orientation is yaw only.
*/

pub mod body;
pub mod config;
pub mod events;
pub mod geometry;
pub mod math;
pub mod rng;
pub mod simulator;
pub mod solver;
pub mod world;

pub use body::{BodyId, FloorResult, KinematicBody, MovementBase, MovementMode};
pub use config::{MoveConfig, SolverConfig};
pub use events::MovementEvent;
pub use geometry::{
    CapsuleDims, GeometryOracle, HitResult, PhysicsVolume, QueryFilter, SurfaceId, SurfaceInfo,
    WalkableSlopeOverride,
};
pub use math::{Quat, Vec3};
pub use simulator::Simulator;
pub use solver::Solver;
pub use world::{StaticShape, StaticWorld};
