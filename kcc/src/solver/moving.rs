//! The move primitive and penetration recovery.
//!
//! `move_updated_component` is the only operation that writes a body's
//! position. Sweep moves stop just short of contact (`MOVE_SKIN`) so the next
//! query does not start touching; moves that begin inside geometry are
//! reported as penetrating and recovered by `resolve_penetration`, which runs
//! an escalating ladder of strategies and accepts "still stuck" as a
//! survivable outcome.

use super::Solver;
use crate::body::KinematicBody;
use crate::config::MOVE_SKIN;
use crate::geometry::HitResult;
use crate::math::{Quat, SMALL, Vec3, clamp_to_max_size};

/// Reversible scope over a body transform.
///
/// Intermediate moves append snapshots to an undo log; `revert` restores the
/// state at `begin`, so a failed multi-move sequence (step-up) has zero side
/// effects on the transform.
pub struct MoveBatch {
    log: Vec<(Vec3, Quat)>,
}

impl MoveBatch {
    pub fn begin(body: &KinematicBody) -> Self {
        Self {
            log: vec![(body.position, body.orientation)],
        }
    }

    /// Record the transform before another intermediate move.
    pub fn record(&mut self, body: &KinematicBody) {
        self.log.push((body.position, body.orientation));
    }

    /// Roll every recorded move back.
    pub fn revert(self, body: &mut KinematicBody) {
        let (position, orientation) = self.log[0];
        body.position = position;
        body.orientation = orientation;
    }

    /// Keep the applied moves.
    pub fn commit(self) {}
}

impl Solver<'_> {
    /// Move the body by `delta`, optionally sweeping. Returns the blocking
    /// hit, or a miss covering the full delta.
    ///
    /// A sweep that starts inside geometry does not move and reports
    /// `start_penetrating`; callers go through
    /// [`Solver::safe_move_updated_component`] to recover.
    pub(crate) fn move_updated_component(
        &mut self,
        body: &mut KinematicBody,
        delta: Vec3,
        new_rotation: Quat,
        sweep: bool,
    ) -> HitResult {
        body.orientation = new_rotation;
        let start = body.position;
        let end = start + delta;

        if !sweep || delta.norm_squared() <= SMALL {
            body.position = end;
            return HitResult::miss(start, end);
        }

        let filter = self.query_filter();
        let Some(hit) = self.world.sweep_capsule(body.capsule(), start, end, filter) else {
            body.position = end;
            return HitResult::miss(start, end);
        };

        if hit.start_penetrating {
            if self.config.ignore_first_blocking_overlap && hit.normal.dot(&delta) >= 0.0 {
                // Separating from the initial overlap; let the move through.
                body.position = end;
                return HitResult::miss(start, end);
            }
            return hit;
        }

        let dist = delta.norm();
        let dir = delta / dist;
        // Stop just short of the contact.
        let travel = (dist * hit.time - MOVE_SKIN).max(0.0);
        body.position = start + dir * travel;

        let mut out = hit;
        out.time = travel / dist;
        out.location = body.position;
        out
    }

    /// Sweep move with automatic depenetration retry.
    pub(crate) fn safe_move_updated_component(
        &mut self,
        body: &mut KinematicBody,
        delta: Vec3,
        new_rotation: Quat,
        sweep: bool,
    ) -> HitResult {
        let mut hit = self.move_updated_component(body, delta, new_rotation, sweep);

        if hit.start_penetrating {
            let adjustment = self.penetration_adjustment(body, &hit);
            if self.resolve_penetration(body, adjustment, &hit, new_rotation) {
                // Retry the original move from the resolved position.
                hit = self.move_updated_component(body, delta, new_rotation, sweep);
            }
        }

        hit
    }

    /// Proposed pull-out vector for a penetrating hit.
    pub(crate) fn penetration_adjustment(&self, body: &KinematicBody, hit: &HitResult) -> Vec3 {
        if !hit.start_penetrating {
            return Vec3::zeros();
        }

        let depth = if hit.penetration_depth > 0.0 {
            hit.penetration_depth
        } else {
            0.125
        };
        let adjustment = hit.normal * (depth + self.config.penetration_pullback_distance);

        let max_distance = if hit.surface.is_pawn {
            body.config.max_depenetration_with_pawn
        } else {
            body.config.max_depenetration_with_geometry
        };
        clamp_to_max_size(adjustment, max_distance)
    }

    /// Try to get out of an initial overlap: teleport if the adjusted spot is
    /// free, otherwise sweep out, combine MTDs, and finally sweep along the
    /// originally attempted move. A body that stays stuck is accepted and
    /// keeps simulating.
    pub(crate) fn resolve_penetration(
        &mut self,
        body: &mut KinematicBody,
        proposed_adjustment: Vec3,
        hit: &HitResult,
        new_rotation: Quat,
    ) -> bool {
        let adjustment = proposed_adjustment;
        if adjustment.norm_squared() <= SMALL {
            return body.just_teleported;
        }

        log::debug!(
            "resolve_penetration: body {:?} at {:?} inside surface {} by {:.3}",
            body.id,
            body.position,
            hit.surface.id,
            hit.penetration_depth,
        );

        // A slightly inflated overlap test guards the teleport, so precision
        // differences between overlap and sweep cannot land us in a new
        // overlap.
        let filter = self.query_filter();
        let test_location = hit.trace_start + adjustment;
        let encroached = self.world.overlap_capsule(
            body.capsule(),
            test_location,
            self.config.penetration_overlap_inflation,
            filter,
        );

        if !encroached {
            // Move without sweeping.
            self.move_updated_component(body, adjustment, new_rotation, false);
            body.just_teleported = true;
            return true;
        }

        // Sweep out as far as possible.
        let before = body.position;
        let sweep_hit = self.move_updated_component(body, adjustment, new_rotation, true);
        let mut moved = body.position != before;

        if !moved && sweep_hit.start_penetrating {
            // Combine the two MTDs to escape a multi-surface overlap.
            let second_adjustment = self.penetration_adjustment(body, &sweep_hit);
            let combined = adjustment + second_adjustment;
            if second_adjustment != adjustment && combined.norm_squared() > SMALL {
                let before = body.position;
                self.move_updated_component(body, combined, new_rotation, true);
                moved = body.position != before;
            }
        }

        if !moved {
            // Last resort: the adjustment plus the attempted move direction.
            let move_delta = hit.trace_end - hit.trace_start;
            if move_delta.norm_squared() > SMALL {
                let before = body.position;
                self.move_updated_component(body, adjustment + move_delta, new_rotation, true);
                moved = body.position != before;
            }
        }

        if !moved {
            log::debug!(
                "resolve_penetration: body {:?} could not be freed, continuing stuck",
                body.id
            );
        }

        body.just_teleported |= moved;
        body.just_teleported
    }
}
