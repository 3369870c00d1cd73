//! Parameterized Trajectory Generators (PTGs).
//!
//! A PTG is a family of feasible trajectories indexed by a single
//! continuous parameter `alpha` and bounded by a reference distance. It
//! supplies the workspace ↔ TP-Space mappings used by the reactive
//! planner and the canonical velocity command for each direction.
//!
//! # Key types
//!
//! - [`Ptg`]: the capability set consumed by the planner
//! - [`ArcPtg`]: constant-curvature differential-drive family
//! - [`ClearanceDiagram`]: lateral headroom per direction and distance

mod arc;
mod clearance;

pub use arc::{ArcPtg, ArcPtgConfig};
pub use clearance::ClearanceDiagram;

use std::f32::consts::PI;

use crate::core::types::{Pose2D, Twist2D};
use crate::interface::VelCmd;

/// Map a path index to its trajectory parameter `alpha` in [-π, π).
///
/// Paths are spread uniformly; index `k` maps to the center of its
/// angular slot.
#[inline]
pub fn index_to_alpha(k: usize, count: usize) -> f32 {
    PI * (-1.0 + 2.0 * (k as f32 + 0.5) / count as f32)
}

/// Map a trajectory parameter `alpha` to the nearest path index.
#[inline]
pub fn alpha_to_index(alpha: f32, count: usize) -> usize {
    let alpha = crate::core::math::normalize_angle(alpha);
    let k = (0.5 * (count as f32 * (1.0 + alpha / PI) - 1.0)).round();
    (k.max(0.0) as usize).min(count - 1)
}

/// A family of kinematically feasible trajectories.
///
/// Implementations are owned by the planner; one instance per PTG slot.
/// All distances handed to and from the trait are meters unless the
/// method name says normalized.
pub trait Ptg: Send {
    /// Human-readable description for logs.
    fn description(&self) -> String;

    /// Precompute internal tables. Idempotent; called once before the
    /// first planning iteration.
    fn initialize(&mut self);

    /// Number of discrete path directions `K`.
    fn alpha_count(&self) -> usize;

    /// Nearest path index for a direction.
    fn alpha_to_index(&self, alpha: f32) -> usize {
        alpha_to_index(alpha, self.alpha_count())
    }

    /// Direction of a path index.
    fn index_to_alpha(&self, k: usize) -> f32 {
        index_to_alpha(k, self.alpha_count())
    }

    /// Inverse map from a workspace point to TP-Space.
    ///
    /// Returns `(k, d_norm)` with `d_norm` in [0, 1], or `None` when the
    /// point is outside the PTG's reachable domain.
    fn inverse_map_ws2tp(&self, x: f32, y: f32) -> Option<(usize, f32)>;

    /// Discrete trajectory step covering `dist` meters along path `k`,
    /// or `None` when the distance exceeds the path.
    fn path_step_for_dist(&self, k: usize, dist: f32) -> Option<usize>;

    /// Number of discrete steps of path `k`.
    fn path_step_count(&self, k: usize) -> usize;

    /// Robot-relative pose after `step` steps along path `k`.
    fn path_pose(&self, k: usize, step: usize) -> Pose2D;

    /// Distance traveled after `step` steps along path `k`, in meters.
    fn path_dist(&self, k: usize, step: usize) -> f32;

    /// Duration of one trajectory step, in seconds.
    fn path_step_duration(&self) -> f64;

    /// Whether the workspace point at `(k, step)` has a unique TP-Space
    /// preimage.
    fn is_bijective_at(&self, k: usize, step: usize) -> bool;

    /// Reference distance (maximum obstacle distance considered), meters.
    fn ref_distance(&self) -> f32;

    /// Whether the family supports "keep executing the last command".
    fn supports_nop_cmd(&self) -> bool;

    /// Max age of the last command for a continuation along path `k`,
    /// in seconds.
    fn max_time_in_nop_cmd(&self, k: usize) -> f64;

    /// Canonical full-speed velocity command for path `k`.
    fn direction_to_motion_command(&self, k: usize) -> VelCmd;

    /// Feed the current body-frame robot velocity.
    fn update_current_robot_vel(&mut self, vel_local: &Twist2D);

    /// Static priority of this PTG in candidate scoring.
    fn score_priority(&self) -> f64 {
        1.0
    }

    /// Relative priority of reaching `(target_k, target_d_norm)` through
    /// this PTG.
    fn eval_path_relative_priority(&self, _target_k: usize, _target_d_norm: f32) -> f64 {
        1.0
    }

    /// Fill `out` with the per-direction maximum obstacle-free distance,
    /// in meters (the free value before any obstacle is transformed).
    fn init_tp_obstacles(&self, out: &mut Vec<f32>);

    /// Reset `out` to an all-free clearance diagram for this PTG.
    fn init_clearance_diagram(&self, out: &mut ClearanceDiagram);

    /// Post-process the clearance diagram once the (normalized)
    /// TP-obstacles are final.
    fn update_clearance_post(&self, clearance: &mut ClearanceDiagram, tp_obstacles_norm: &[f32]) {
        for (k, &free) in tp_obstacles_norm.iter().enumerate() {
            clearance.cap_beyond(k, free);
        }
    }
}
