//! Full-evaluation holonomic method.
//!
//! Scores every TP-Space direction with a weighted set of factors and
//! picks the best one. Slower but steadier than force-field methods,
//! and the usual default.

use crate::config::FullEvalConfig;
use crate::core::math::angle_diff;
use crate::holonomic::{HoloInput, HoloLogRecord, HoloOutput, HolonomicMethod};
use crate::ptg::index_to_alpha;

/// Per-direction multi-factor scorer.
pub struct FullEval {
    cfg: FullEvalConfig,
    approach_slowdown: bool,
    /// Direction chosen on the previous call, for hysteresis.
    last_direction: Option<f32>,
}

impl FullEval {
    /// Create the method with its configuration.
    pub fn new(cfg: FullEvalConfig) -> Self {
        Self {
            cfg,
            approach_slowdown: true,
            last_direction: None,
        }
    }
}

impl HolonomicMethod for FullEval {
    fn name(&self) -> &'static str {
        "FullEval"
    }

    fn enable_approach_target_slowdown(&mut self, enable: bool) {
        self.approach_slowdown = enable;
    }

    fn navigate(&mut self, input: &HoloInput<'_>) -> HoloOutput {
        let n = input.obstacles.len();
        let target_dist = f64::from(input.target.norm());
        let target_dir = if input.target.x != 0.0 || input.target.y != 0.0 {
            input.target.y.atan2(input.target.x)
        } else {
            0.0
        };

        let w = &self.cfg.factor_weights;
        let mut evals = vec![0.0f64; n];
        let mut best: Option<(usize, f64)> = None;

        for (k, eval) in evals.iter_mut().enumerate() {
            let free = f64::from(input.obstacles[k]).min(input.max_obstacle_dist);
            if free < self.cfg.too_close_obstacle * target_dist.min(1.0) {
                continue; // heading into an obstacle: not eligible
            }

            let alpha = index_to_alpha(k, n);

            // Factor 0: obstacle-free distance along this direction.
            let f0 = free;

            // Factor 1: alignment of the direction with the target.
            let f1 = 1.0 - f64::from(angle_diff(alpha, target_dir).abs()) / std::f64::consts::PI;

            // Factor 2: whether the target distance is clear along this
            // direction (saturates once past the target).
            let f2 = if free > target_dist + 0.05 {
                1.0
            } else {
                free / (target_dist + 0.05)
            };

            // Factor 3: hysteresis toward the previously chosen direction.
            let f3 = match self.last_direction {
                Some(last) => (-f64::from(angle_diff(alpha, last).abs()) / 0.5).exp(),
                None => 1.0,
            };

            // Factor 4: lateral clearance.
            let f4 = input
                .clearance
                .map(|cd| cd.get(k, (target_dist as f32).min(0.99)))
                .unwrap_or(1.0);

            let score = w[0] * f0 + w[1] * f1 + w[2] * f2 + w[3] * f3 + w[4] * f4;
            *eval = score;

            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((k, score));
            }
        }

        let Some((best_k, best_score)) = best else {
            // Completely blocked: report a stop.
            return HoloOutput {
                desired_direction: 0.0,
                desired_speed: 0.0,
                log: HoloLogRecord {
                    method: self.name().to_string(),
                    desired_direction: 0.0,
                    desired_speed: 0.0,
                    dir_evals: evals,
                },
            };
        };
        debug_assert!(best_score >= 0.0);

        let direction = index_to_alpha(best_k, n);
        let mut speed = input.max_robot_speed;
        if self.approach_slowdown && target_dist < self.cfg.target_slowdown_distance {
            speed *= (target_dist / self.cfg.target_slowdown_distance).max(0.05);
        }

        self.last_direction = Some(direction);

        HoloOutput {
            desired_direction: direction,
            desired_speed: speed,
            log: HoloLogRecord {
                method: self.name().to_string(),
                desired_direction: direction,
                desired_speed: speed,
                dir_evals: evals,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Point2D;

    fn free_input(obstacles: &[f32], target: Point2D) -> HoloInput<'_> {
        HoloInput {
            obstacles,
            target,
            clearance: None,
            max_obstacle_dist: 1.0,
            max_robot_speed: 1.0,
        }
    }

    #[test]
    fn test_heads_to_target_in_free_space() {
        let mut m = FullEval::new(FullEvalConfig::default());
        let obstacles = vec![1.0f32; 61];
        let out = m.navigate(&free_input(&obstacles, Point2D::new(0.9, 0.0)));

        assert!(out.desired_direction.abs() < 0.1);
        assert!(out.desired_speed > 0.5);
    }

    #[test]
    fn test_avoids_blocked_target_direction() {
        let mut m = FullEval::new(FullEvalConfig::default());
        let n = 61usize;
        let mut obstacles = vec![1.0f32; n];
        // Block a cone around straight-ahead.
        for k in 0..n {
            if index_to_alpha(k, n).abs() < 0.3 {
                obstacles[k] = 0.05;
            }
        }
        let out = m.navigate(&free_input(&obstacles, Point2D::new(0.9, 0.0)));

        assert!(out.desired_direction.abs() > 0.2);
        assert!(out.desired_speed > 0.0);
    }

    #[test]
    fn test_fully_blocked_stops() {
        let mut m = FullEval::new(FullEvalConfig::default());
        let obstacles = vec![0.01f32; 61];
        let out = m.navigate(&free_input(&obstacles, Point2D::new(0.9, 0.0)));
        assert_eq!(out.desired_speed, 0.0);
    }

    #[test]
    fn test_approach_slowdown_toggle() {
        let obstacles = vec![1.0f32; 61];
        let near_target = Point2D::new(0.1, 0.0);

        let mut slow = FullEval::new(FullEvalConfig::default());
        let out_slow = slow.navigate(&free_input(&obstacles, near_target));

        let mut fast = FullEval::new(FullEvalConfig::default());
        fast.enable_approach_target_slowdown(false);
        let out_fast = fast.navigate(&free_input(&obstacles, near_target));

        assert!(out_slow.desired_speed < out_fast.desired_speed);
        assert_eq!(out_fast.desired_speed, 1.0);
    }
}
