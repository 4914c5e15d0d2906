//! Floor probing, perch validation, and floor-height adjustment.
//!
//! The probe is two-phase: a downward capsule sweep with a shrunken capsule
//! (tolerates starting on a surface and penetration recovery), then a line
//! trace from the capsule center when the sweep result is unusable. Edge
//! contacts near the capsule's outer radius are rejected and re-probed with a
//! slimmer capsule, and may then go through perch validation.

use super::Solver;
use crate::body::{FloorResult, KinematicBody};
use crate::config::{MAX_FLOOR_DIST, MIN_FLOOR_DIST, SWEEP_EDGE_REJECT_DISTANCE};
use crate::geometry::{CapsuleDims, HitResult};
use crate::math::{KINDA_SMALL, Quat, Vec3, size_sq_2d};

/// Reject hits whose planar distance from the capsule center is within
/// tolerance of the radius: those are edge contacts, not support.
pub(crate) fn is_within_edge_tolerance(
    capsule_location: Vec3,
    impact_point: Vec3,
    capsule_radius: f32,
) -> bool {
    let dist_sq = size_sq_2d(impact_point - capsule_location);
    let reduced_radius = (capsule_radius - SWEEP_EDGE_REJECT_DISTANCE)
        .max(SWEEP_EDGE_REJECT_DISTANCE + KINDA_SMALL);
    dist_sq < reduced_radius * reduced_radius
}

impl Solver<'_> {
    /// Walkability of a blocking hit: the impact normal's Z must meet the
    /// effective threshold (per-surface override applied) and the surface
    /// must not be vertical.
    pub(crate) fn is_walkable(&self, body: &KinematicBody, hit: &HitResult) -> bool {
        if !hit.is_valid_blocking_hit() {
            // No hit, or starting in penetration.
            return false;
        }
        // Never walk up vertical surfaces.
        if hit.impact_normal.z < KINDA_SMALL {
            return false;
        }
        let test_z = hit
            .surface
            .slope_override
            .modify_walkable_floor_z(body.config.walkable_floor_z);
        hit.impact_normal.z >= test_z
    }

    #[inline]
    pub(crate) fn perch_radius_threshold(&self, body: &KinematicBody) -> f32 {
        body.config.perch_radius_threshold.max(0.0)
    }

    /// Radius inside which floor contacts count as fully supported.
    #[inline]
    pub(crate) fn valid_perch_radius(&self, body: &KinematicBody) -> f32 {
        (body.capsule_radius - self.perch_radius_threshold(body)).clamp(0.11, body.capsule_radius)
    }

    /// Probe for a walkable floor below `capsule_location`.
    ///
    /// While stationary on a stable, still-valid base the cached floor is
    /// reused instead of re-probing. A blocking sweep result near the capsule
    /// edge goes through perch validation, which can either rescue the floor
    /// (stand nudged-in on a ledge) or invalidate it (forces a fall).
    pub(crate) fn find_floor(
        &mut self,
        body: &mut KinematicBody,
        capsule_location: Vec3,
        zero_delta: bool,
        downward_sweep_hint: Option<&HitResult>,
    ) -> FloorResult {
        let mut result = FloorResult::default();

        // No collision, no floor.
        if !body.collision_enabled {
            return result;
        }

        // Probe slightly deeper while walking so a floor-height adjustment
        // cannot immediately invalidate the result.
        let height_check_adjust = if body.is_moving_on_ground() {
            MAX_FLOOR_DIST + KINDA_SMALL
        } else {
            -MAX_FLOOR_DIST
        };
        let sweep_trace_dist = MAX_FLOOR_DIST.max(body.config.max_step_height + height_check_adjust);
        let line_trace_dist = sweep_trace_dist;
        let mut need_to_validate_floor = true;

        if sweep_trace_dist > 0.0 || line_trace_dist > 0.0 {
            if body.config.always_check_floor
                || !zero_delta
                || body.force_next_floor_check
                || body.just_teleported
            {
                body.force_next_floor_check = false;
                result = self.compute_floor_dist(
                    body,
                    capsule_location,
                    line_trace_dist,
                    sweep_trace_dist,
                    body.capsule_radius,
                    downward_sweep_hint,
                );
            } else {
                // Stationary skip path: keep the cached floor while the base
                // is static and still resolvable.
                let base = body.movement_base;
                if let Some(base) = base {
                    body.force_next_floor_check =
                        base.is_dynamic || self.world.surface_transform(base.surface).is_none();
                }

                if base.is_some() && !body.force_next_floor_check {
                    result = body.current_floor;
                    need_to_validate_floor = false;
                } else {
                    body.force_next_floor_check = false;
                    result = self.compute_floor_dist(
                        body,
                        capsule_location,
                        line_trace_dist,
                        sweep_trace_dist,
                        body.capsule_radius,
                        downward_sweep_hint,
                    );
                }
            }
        }

        // The sweep result may be an edge contact; see if we should perch.
        if need_to_validate_floor && result.blocking_hit && !result.line_trace {
            if self.should_compute_perch_result(body, &result.hit, true) {
                let mut max_perch_floor_dist =
                    MAX_FLOOR_DIST.max(body.config.max_step_height + height_check_adjust);
                if body.is_moving_on_ground() {
                    max_perch_floor_dist += body.config.perch_additional_height.max(0.0);
                }

                let perch_radius = self.valid_perch_radius(body);
                if let Some(perch) =
                    self.compute_perch_result(body, perch_radius, &result.hit, max_perch_floor_dist)
                {
                    // Don't let the height adjustment push us past the max
                    // perch distance, or we would fall next tick.
                    let avg_floor_dist = (MIN_FLOOR_DIST + MAX_FLOOR_DIST) * 0.5;
                    let move_up_dist = avg_floor_dist - result.floor_dist;
                    if move_up_dist + perch.floor_dist >= max_perch_floor_dist {
                        result.floor_dist = avg_floor_dist;
                    }

                    // The full capsule sits on an unwalkable edge, but the
                    // nudged-in probe can stand: adopt its walkable normal.
                    if !result.walkable_floor {
                        let line_dist = perch.floor_dist.min(perch.line_dist);
                        let floor_dist = result.floor_dist;
                        result.set_from_line_trace(&perch.hit, floor_dist, line_dist, true);
                    }
                } else {
                    // Unwalkable and no perch: invalidate so we start falling.
                    result.walkable_floor = false;
                }
            }
        }

        result
    }

    /// Two-phase floor distance computation. See module docs.
    ///
    /// `downward_sweep_hint` short-circuits the sweep when a vertical
    /// downward sweep from the motion step already qualifies.
    pub(crate) fn compute_floor_dist(
        &mut self,
        body: &KinematicBody,
        capsule_location: Vec3,
        line_distance: f32,
        sweep_distance: f32,
        sweep_radius: f32,
        downward_sweep_hint: Option<&HitResult>,
    ) -> FloorResult {
        let mut result = FloorResult::default();
        let pawn_radius = body.capsule_radius;
        let pawn_half_height = body.capsule_half_height;

        let mut skip_sweep = false;
        if let Some(hint) = downward_sweep_hint {
            if hint.is_valid_blocking_hit()
                && hint.trace_start.z > hint.trace_end.z
                && size_sq_2d(hint.trace_start - hint.trace_end) <= KINDA_SMALL
            {
                // Reject hits barely on the cusp of the capsule radius.
                if is_within_edge_tolerance(hint.location, hint.impact_point, pawn_radius) {
                    // Don't run a redundant sweep, usable or not.
                    skip_sweep = true;

                    let walkable = self.is_walkable(body, hint);
                    let floor_dist = capsule_location.z - hint.location.z;
                    result.set_from_sweep(hint, floor_dist, walkable);
                    if walkable {
                        return result;
                    }
                }
            }
        }

        // The sweep must reach at least as far as the line trace, or the
        // combined result cannot be interpreted.
        if sweep_distance < line_distance {
            debug_assert!(sweep_distance >= line_distance);
            log::warn!(
                "compute_floor_dist: sweep distance {:.2} < line distance {:.2}, aborting probe",
                sweep_distance,
                line_distance
            );
            return result;
        }

        if !skip_sweep && sweep_distance > 0.0 && sweep_radius > 0.0 {
            // Shorter capsule avoids sweeps giving weird results if we start
            // on a surface, and lets us adjust out of penetrations.
            const SHRINK_SCALE: f32 = 0.9;
            const SHRINK_SCALE_OVERLAP: f32 = 0.1;
            let mut shrink_height = (pawn_half_height - pawn_radius) * (1.0 - SHRINK_SCALE);
            let mut trace_dist = sweep_distance + shrink_height;
            let mut capsule = CapsuleDims::new(sweep_radius, pawn_half_height - shrink_height);

            let mut hit = self.floor_sweep_test(
                body,
                capsule_location,
                capsule_location + Vec3::new(0.0, 0.0, -trace_dist),
                capsule,
            );

            if let Some(first) = hit {
                // Reject hits adjacent to us; only the bottom portion of the
                // capsule counts as support.
                if first.start_penetrating
                    || !is_within_edge_tolerance(capsule_location, first.impact_point, capsule.radius)
                {
                    // Slimmer and shorter capsule avoids the adjacent object.
                    let reduced_radius =
                        (capsule.radius - SWEEP_EDGE_REJECT_DISTANCE - KINDA_SMALL).max(0.0);
                    if reduced_radius > 0.01 {
                        shrink_height = (pawn_half_height - pawn_radius) * (1.0 - SHRINK_SCALE_OVERLAP);
                        trace_dist = sweep_distance + shrink_height;
                        capsule = CapsuleDims::new(
                            reduced_radius,
                            (pawn_half_height - shrink_height).max(reduced_radius),
                        );
                        hit = self.floor_sweep_test(
                            body,
                            capsule_location,
                            capsule_location + Vec3::new(0.0, 0.0, -trace_dist),
                            capsule,
                        );
                    }
                }
            }

            if let Some(h) = hit {
                // The capsule was shrunk for the trace, so shorten the
                // reported distance accordingly. Negative distances are
                // allowed: they pull us out of penetration.
                let max_penetration_adjust = MAX_FLOOR_DIST.max(pawn_radius);
                let sweep_result = (h.time * trace_dist - shrink_height).max(-max_penetration_adjust);

                result.set_from_sweep(&h, sweep_result, false);
                if h.is_valid_blocking_hit()
                    && self.is_walkable(body, &h)
                    && sweep_result <= sweep_distance
                {
                    result.walkable_floor = true;
                    return result;
                }
            }
        }

        // The sweep reaches further than the line trace, so if it missed
        // cleanly there is nothing for the line to find. A sweep stuck in
        // penetration still wants the line fallback.
        if !result.blocking_hit && !result.hit.start_penetrating {
            result.floor_dist = sweep_distance;
            return result;
        }

        // Line trace from the capsule center.
        if line_distance > 0.0 {
            let line_shrink_height = pawn_half_height;
            let line_trace_dist = line_distance + line_shrink_height;
            let down = Vec3::new(0.0, 0.0, -line_trace_dist);
            let filter = self.query_filter();

            if let Some(h) = self
                .world
                .line_trace(capsule_location, capsule_location + down, filter)
            {
                if h.time > 0.0 {
                    let max_penetration_adjust = MAX_FLOOR_DIST.max(pawn_radius);
                    let line_result =
                        (h.time * line_trace_dist - line_shrink_height).max(-max_penetration_adjust);

                    result.blocking_hit = true;
                    if line_result <= line_distance && self.is_walkable(body, &h) {
                        let sweep_floor_dist = result.floor_dist;
                        result.set_from_line_trace(&h, sweep_floor_dist, line_result, true);
                        return result;
                    }
                }
            }
        }

        // No acceptable hits.
        result.walkable_floor = false;
        result.floor_dist = sweep_distance;
        result
    }

    /// Downward floor sweep, optionally with the inscribed-box shape.
    fn floor_sweep_test(
        &self,
        body: &KinematicBody,
        start: Vec3,
        end: Vec3,
        capsule: CapsuleDims,
    ) -> Option<HitResult> {
        let filter = self.query_filter();
        if !body.config.use_flat_base_for_floor_checks {
            self.world.sweep_capsule(capsule, start, end, filter)
        } else {
            // A box enclosed by the capsule, so the flat base does not hang
            // onto edges by its curvature. Corners along the major axes
            // first, then axis-aligned.
            let half_extents = Vec3::new(
                capsule.radius * 0.707,
                capsule.radius * 0.707,
                capsule.half_height,
            );
            let rotated = Quat::from_axis_angle(&Vec3::z_axis(), -std::f32::consts::FRAC_PI_4);
            self.world
                .sweep_box(half_extents, rotated, start, end, filter)
                .or_else(|| {
                    self.world
                        .sweep_box(half_extents, Quat::identity(), start, end, filter)
                })
        }
    }

    /// Whether a sweep hit is an edge contact worth validating with a perch
    /// probe.
    pub(crate) fn should_compute_perch_result(
        &self,
        body: &KinematicBody,
        in_hit: &HitResult,
        check_radius: bool,
    ) -> bool {
        if !in_hit.is_valid_blocking_hit() {
            return false;
        }
        // Don't attempt perching with a negligible edge radius.
        if self.perch_radius_threshold(body) <= SWEEP_EDGE_REJECT_DISTANCE {
            return false;
        }
        if check_radius {
            let dist_sq = size_sq_2d(in_hit.impact_point - in_hit.location);
            let stand_on_edge_radius = self.valid_perch_radius(body);
            if dist_sq <= stand_on_edge_radius * stand_on_edge_radius {
                // Contact is already within the supported radius.
                return false;
            }
        }
        true
    }

    /// Re-probe with the shrunken perch radius to see whether the body could
    /// stand here if nudged inward. `None` means the spot cannot support a
    /// perch.
    pub(crate) fn compute_perch_result(
        &mut self,
        body: &KinematicBody,
        test_radius: f32,
        in_hit: &HitResult,
        max_floor_dist: f32,
    ) -> Option<FloorResult> {
        if max_floor_dist <= 0.0 {
            return None;
        }

        // Sweep further than requested: the reduced radius could miss hits
        // the normal radius would contact.
        let pawn_half_height = body.capsule_half_height;
        let in_hit_above_base =
            (in_hit.impact_point.z - (in_hit.location.z - pawn_half_height)).max(0.0);
        let perch_line_dist = (max_floor_dist - in_hit_above_base).max(0.0);
        let perch_sweep_dist = max_floor_dist.max(0.0);
        let actual_sweep_dist = perch_sweep_dist + body.capsule_radius;

        let perch_floor = self.compute_floor_dist(
            body,
            in_hit.location,
            perch_line_dist,
            actual_sweep_dist,
            test_radius,
            None,
        );

        if !perch_floor.is_walkable_floor() {
            return None;
        }
        if in_hit_above_base + perch_floor.floor_dist > max_floor_dist {
            // Hit something past the max distance.
            return None;
        }
        Some(perch_floor)
    }

    /// Nudge the capsule vertically toward the middle of the floor hover
    /// band. A nudge invalidates floor caching, so the next probe is forced.
    pub(crate) fn adjust_floor_height(&mut self, body: &mut KinematicBody) {
        // A probe that found nothing needs no adjustment.
        if !body.current_floor.is_walkable_floor() {
            return;
        }

        let mut old_floor_dist = body.current_floor.floor_dist;
        if body.current_floor.line_trace {
            if old_floor_dist < MIN_FLOOR_DIST && body.current_floor.line_dist >= MIN_FLOOR_DIST {
                // Raising onto the sweep contact would scale an unwalkable
                // wall.
                log::debug!(
                    "adjust_floor_height: skipping, line trace with small sweep distance (line {:.2}, sweep {:.2})",
                    body.current_floor.line_dist,
                    body.current_floor.floor_dist
                );
                return;
            }
            // The sweep was unwalkable or penetrating; use the line distance
            // for the vertical adjustment.
            old_floor_dist = body.current_floor.line_dist;
        }

        if (MIN_FLOOR_DIST..=MAX_FLOOR_DIST).contains(&old_floor_dist) {
            return;
        }

        let initial_z = body.position.z;
        let avg_floor_dist = (MIN_FLOOR_DIST + MAX_FLOOR_DIST) * 0.5;
        let move_dist = avg_floor_dist - old_floor_dist;
        let rotation = body.orientation;
        let adjust_hit =
            self.safe_move_updated_component(body, Vec3::new(0.0, 0.0, move_dist), rotation, true);

        if !adjust_hit.is_valid_blocking_hit() {
            body.current_floor.floor_dist += move_dist;
        } else if move_dist > 0.0 {
            let current_z = body.position.z;
            body.current_floor.floor_dist += current_z - initial_z;
        } else {
            let current_z = body.position.z;
            body.current_floor.floor_dist = current_z - adjust_hit.location.z;
            if self.is_walkable(body, &adjust_hit) {
                let floor_dist = body.current_floor.floor_dist;
                body.current_floor.set_from_sweep(&adjust_hit, floor_dist, true);
            }
        }

        // Don't recompute velocity from this vertical adjustment, and make
        // sure the floor is re-probed next time (especially after moving out
        // of penetration).
        body.just_teleported |=
            !body.config.maintain_horizontal_ground_velocity || old_floor_dist < 0.0;
        body.force_next_floor_check = true;
    }
}
