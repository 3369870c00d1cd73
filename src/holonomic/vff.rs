//! Virtual force field holonomic method.
//!
//! The target attracts, nearby obstacles repel; the resultant force
//! picks direction and speed. Cheap and smooth, but prone to local
//! minima in cluttered spaces.

use crate::config::VffConfig;
use crate::holonomic::{HoloInput, HoloLogRecord, HoloOutput, HolonomicMethod};
use crate::ptg::index_to_alpha;

/// Force-field planner.
pub struct Vff {
    cfg: VffConfig,
    approach_slowdown: bool,
}

impl Vff {
    /// Create the method with its configuration.
    pub fn new(cfg: VffConfig) -> Self {
        Self {
            cfg,
            approach_slowdown: true,
        }
    }
}

impl HolonomicMethod for Vff {
    fn name(&self) -> &'static str {
        "VFF"
    }

    fn enable_approach_target_slowdown(&mut self, enable: bool) {
        self.approach_slowdown = enable;
    }

    fn navigate(&mut self, input: &HoloInput<'_>) -> HoloOutput {
        let n = input.obstacles.len();
        let target_dist = f64::from(input.target.norm());

        // Repulsive forces: each blocked direction pushes away with a
        // magnitude growing as the obstacle gets closer. Scaled by
        // sector count so the field strength doesn't depend on the PTG
        // resolution.
        let per_sector = if n > 0 {
            2.0 * self.cfg.target_attractive_force / n as f64
        } else {
            0.0
        };
        let mut fx = 0.0f64;
        let mut fy = 0.0f64;
        for k in 0..n {
            let d = f64::from(input.obstacles[k]);
            if d >= self.cfg.obstacle_max_distance {
                continue;
            }
            let magnitude =
                per_sector * (self.cfg.obstacle_max_distance - d) / self.cfg.obstacle_max_distance;
            let alpha = f64::from(index_to_alpha(k, n));
            fx -= magnitude * alpha.cos();
            fy -= magnitude * alpha.sin();
        }

        // Target attraction.
        if target_dist > 0.0 {
            fx += self.cfg.target_attractive_force * f64::from(input.target.x) / target_dist;
            fy += self.cfg.target_attractive_force * f64::from(input.target.y) / target_dist;
        }

        let magnitude = (fx * fx + fy * fy).sqrt();
        let desired_direction = if magnitude > 1e-9 {
            fy.atan2(fx) as f32
        } else {
            0.0
        };

        let mut speed =
            input.max_robot_speed * (magnitude / self.cfg.target_attractive_force).min(1.0);
        if self.approach_slowdown {
            speed = speed.min(input.max_robot_speed * target_dist.max(0.05).min(1.0));
        }

        HoloOutput {
            desired_direction,
            desired_speed: speed,
            log: HoloLogRecord {
                method: self.name().to_string(),
                desired_direction,
                desired_speed: speed,
                dir_evals: Vec::new(),
            },
        }
    }
}
