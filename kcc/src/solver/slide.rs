//! Surface sliding, two-wall corner resolution, slope-boost limiting, air
//! control limiting, and impact notifications.

use super::Solver;
use crate::body::KinematicBody;
use crate::config::{MIN_FLOOR_DIST, VERTICAL_SLOPE_NORMAL_Z};
use crate::events::MovementEvent;
use crate::geometry::HitResult;
use crate::math::{
    KINDA_SMALL, Vec3, horizontal, is_nearly_zero, plane_project, safe_normal, safe_normal_2d,
};

impl Solver<'_> {
    /// Deflect `delta` along the surface plane, scaled by the remaining time
    /// fraction. While falling, additionally limits slope boosting.
    pub(crate) fn compute_slide_vector(
        &self,
        body: &KinematicBody,
        delta: Vec3,
        time: f32,
        normal: Vec3,
        hit: &HitResult,
    ) -> Vec3 {
        let result = plane_project(delta, normal) * time;
        if body.is_falling() {
            self.handle_slope_boosting(body, result, delta, time, normal, hit)
        } else {
            result
        }
    }

    /// Keep a falling deflection from climbing higher than the original move
    /// intended, redistributing the clipped rise as a horizontal slide.
    fn handle_slope_boosting(
        &self,
        _body: &KinematicBody,
        slide_result: Vec3,
        delta: Vec3,
        time: f32,
        normal: Vec3,
        _hit: &HitResult,
    ) -> Vec3 {
        let mut result = slide_result;
        if result.z > 0.0 {
            let z_limit = delta.z * time;
            if result.z - z_limit > KINDA_SMALL {
                if z_limit > 0.0 {
                    // Rescale the entire vector, not just Z, or the direction
                    // changes and likely heads right back into the impact.
                    let up_percent = z_limit / result.z;
                    result *= up_percent;
                } else {
                    // Heading down but deflecting up: no vertical motion at
                    // all.
                    result = Vec3::zeros();
                }

                // Make the remainder horizontal and parallel to the surface.
                let remainder_xy = horizontal(slide_result - result);
                let normal_xy = safe_normal_2d(normal);
                result += plane_project(remainder_xy, normal_xy);
            }
        }
        result
    }

    /// Resolve a slide direction after hitting a second surface in the same
    /// sub-step.
    pub(crate) fn two_wall_adjust(
        &self,
        body: &KinematicBody,
        delta: &mut Vec3,
        hit: &HitResult,
        old_hit_normal: Vec3,
    ) {
        let in_delta = *delta;
        let hit_normal = hit.normal;

        if old_hit_normal.dot(&hit_normal) <= 0.0 {
            // Corner of 90 degrees or less: slide along the crease.
            let desired_dir = *delta;
            let new_dir = safe_normal(hit_normal.cross(&old_hit_normal));
            *delta = new_dir * delta.dot(&new_dir) * (1.0 - hit.time);
            if desired_dir.dot(delta) < 0.0 {
                *delta = -*delta;
            }
        } else {
            // Open corner: re-slide against the new wall.
            let desired_dir = *delta;
            *delta = self.compute_slide_vector(body, *delta, 1.0 - hit.time, hit_normal, hit);
            if delta.dot(&desired_dir) <= 0.0 {
                *delta = Vec3::zeros();
            } else if (hit_normal.dot(&old_hit_normal) - 1.0).abs() < KINDA_SMALL {
                // Same wall again even after adjusting to move along it;
                // nudge away to cope with precision issues.
                *delta += hit_normal * 0.01;
            }
        }

        if body.is_moving_on_ground() {
            // Allow slides up walkable surfaces, but treat unwalkable ones as
            // vertical barriers.
            if delta.z > 0.0 {
                if (hit.normal.z >= body.config.walkable_floor_z || self.is_walkable(body, hit))
                    && hit.normal.z > KINDA_SMALL
                {
                    // Maintain horizontal motion up the slope.
                    let time = 1.0 - hit.time;
                    let scaled_delta = safe_normal(*delta) * in_delta.norm();
                    *delta =
                        Vec3::new(in_delta.x, in_delta.y, scaled_delta.z / hit.normal.z) * time;
                } else {
                    delta.z = 0.0;
                }
            } else if delta.z < 0.0 {
                // Don't push into the floor when already at minimum distance.
                if body.current_floor.floor_dist < MIN_FLOOR_DIST && body.current_floor.blocking_hit
                {
                    delta.z = 0.0;
                }
            }
        }
    }

    /// Slide along a blocking surface, handling a second impact with the
    /// two-wall adjustment. Returns the fraction of `time` actually applied.
    pub(crate) fn slide_along_surface(
        &mut self,
        body: &mut KinematicBody,
        delta: Vec3,
        time: f32,
        in_normal: Vec3,
        hit: &mut HitResult,
        handle_impact: bool,
    ) -> f32 {
        if !hit.blocking {
            return 0.0;
        }

        let mut normal = in_normal;
        if body.is_moving_on_ground() {
            // Grounded bodies flatten the slide plane: never up an unwalkable
            // surface, never down into the floor.
            if normal.z > 0.0 {
                if !self.is_walkable(body, hit) {
                    normal = safe_normal_2d(normal);
                }
            } else if normal.z < -KINDA_SMALL {
                if body.current_floor.floor_dist < MIN_FLOOR_DIST && body.current_floor.blocking_hit
                {
                    let floor_normal = body.current_floor.hit.normal;
                    let floor_opposed_to_movement =
                        delta.dot(&floor_normal) < 0.0 && floor_normal.z < 1.0 - KINDA_SMALL;
                    if floor_opposed_to_movement {
                        normal = floor_normal;
                    }
                    normal = safe_normal_2d(normal);
                }
            }
        }

        let old_hit_normal = normal;
        let mut slide_delta = self.compute_slide_vector(body, delta, time, normal, hit);

        if slide_delta.dot(&delta) > 0.0 {
            let rotation = body.orientation;
            *hit = self.safe_move_updated_component(body, slide_delta, rotation, true);

            let first_hit_percent = hit.time;
            let mut percent_time_applied = first_hit_percent;

            if hit.is_valid_blocking_hit() {
                if handle_impact {
                    let hit_copy = *hit;
                    self.handle_impact(body, &hit_copy, first_hit_percent * time, slide_delta);
                }

                // Second surface in the same move: combine the two normals.
                self.two_wall_adjust(body, &mut slide_delta, hit, old_hit_normal);

                // Only proceed if the new direction is meaningful and not a
                // reversal of the original attempt.
                if !is_nearly_zero(slide_delta, 1.0e-3) && slide_delta.dot(&delta) > 0.0 {
                    *hit = self.safe_move_updated_component(body, slide_delta, rotation, true);
                    let second_hit_percent = hit.time * (1.0 - first_hit_percent);
                    percent_time_applied += second_hit_percent;

                    if handle_impact && hit.blocking {
                        let hit_copy = *hit;
                        self.handle_impact(body, &hit_copy, second_hit_percent * time, slide_delta);
                    }
                }
            }

            return percent_time_applied.clamp(0.0, 1.0);
        }

        0.0
    }

    /// Re-limit air-control acceleration after an impact, allowing movement
    /// parallel to the wall but not into it.
    pub(crate) fn limit_air_control(
        &mut self,
        body: &mut KinematicBody,
        fall_acceleration: Vec3,
        hit: &HitResult,
        check_landing_spot: bool,
    ) -> Vec3 {
        let mut result = fall_acceleration;

        if hit.is_valid_blocking_hit() && hit.normal.z > VERTICAL_SLOPE_NORMAL_Z {
            let landing = check_landing_spot && {
                let location = hit.location;
                self.is_valid_landing_spot(body, location, hit)
            };
            if !landing && fall_acceleration.dot(&hit.normal) < 0.0 {
                // Pushing into the wall may boost us up it; keep only the
                // parallel component.
                let normal_2d = safe_normal_2d(hit.normal);
                result = plane_project(fall_acceleration, normal_2d);
            }
        } else if hit.start_penetrating {
            // Only allow acceleration that separates from the overlap.
            return if result.dot(&hit.normal) > 0.0 {
                result
            } else {
                Vec3::zeros()
            };
        }

        result
    }

    /// Queue obstruction notifications for a blocking impact.
    pub(crate) fn handle_impact(
        &mut self,
        body: &KinematicBody,
        hit: &HitResult,
        _time_slice: f32,
        _move_delta: Vec3,
    ) {
        self.events.push(MovementEvent::MoveBlocked {
            body: body.id,
            hit: *hit,
        });
        if hit.surface.is_pawn {
            self.events.push(MovementEvent::BumpedPawn {
                body: body.id,
                surface: hit.surface.id,
            });
        }
    }
}
