//! Holonomic sub-planners operating in TP-Space.
//!
//! A holonomic method plans under the fiction that the robot is
//! omnidirectional: given the per-direction obstacle-free distances and
//! a target, both normalized to [0, 1], it picks a direction and a
//! speed. One instance runs per PTG each planning iteration.
//!
//! Methods are registered by name and built from configuration via
//! [`create`].

mod full_eval;
mod vff;

pub use full_eval::FullEval;
pub use vff::Vff;

use serde::{Deserialize, Serialize};

use crate::config::NavigatorConfig;
use crate::core::types::Point2D;
use crate::error::{NavError, Result};
use crate::ptg::ClearanceDiagram;

/// Input of one holonomic planning call.
pub struct HoloInput<'a> {
    /// Obstacle-free distance per direction, normalized to [0, 1].
    pub obstacles: &'a [f32],
    /// Target in TP-Space, with norm in [0, 1].
    pub target: Point2D,
    /// Optional clearance diagram of the associated PTG.
    pub clearance: Option<&'a ClearanceDiagram>,
    /// Maximum obstacle distance (normalized units).
    pub max_obstacle_dist: f64,
    /// Maximum speed of the output (normalized units).
    pub max_robot_speed: f64,
}

/// Output of one holonomic planning call.
pub struct HoloOutput {
    /// Chosen direction in [-π, π).
    pub desired_direction: f32,
    /// Chosen speed in [0, max_robot_speed].
    pub desired_speed: f64,
    /// Method-specific log record.
    pub log: HoloLogRecord,
}

/// What a holonomic method stores into the navigation log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoloLogRecord {
    /// Name of the method that produced this record.
    pub method: String,
    /// Chosen direction.
    pub desired_direction: f32,
    /// Chosen speed.
    pub desired_speed: f64,
    /// Per-direction evaluation, when the method scores directions.
    pub dir_evals: Vec<f64>,
}

/// A reactive planner in TP-Space.
pub trait HolonomicMethod: Send {
    /// Registered name of the method.
    fn name(&self) -> &'static str;

    /// Enable or disable slowing down when approaching the target.
    ///
    /// Disabled while the current goal is an intermediary waypoint, so
    /// the robot transits waypoints at full speed.
    fn enable_approach_target_slowdown(&mut self, enable: bool);

    /// Plan one step in TP-Space.
    fn navigate(&mut self, input: &HoloInput<'_>) -> HoloOutput;
}

/// Build a registered holonomic method by name.
pub fn create(name: &str, cfg: &NavigatorConfig) -> Result<Box<dyn HolonomicMethod>> {
    match name {
        "FullEval" => Ok(Box::new(FullEval::new(cfg.full_eval.clone()))),
        "VFF" => Ok(Box::new(Vff::new(cfg.vff.clone()))),
        other => Err(NavError::Config(format!(
            "Unknown holonomic method `{}` (known: FullEval, VFF)",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_cfg(method: &str) -> NavigatorConfig {
        NavigatorConfig::from_toml(&format!(
            r#"
            [planner]
            holonomic_method = "{}"
            motion_decider_method = "WeightedScores"
            ref_distance = 4.0
            "#,
            method
        ))
        .unwrap()
    }

    #[test]
    fn test_create_by_name() {
        let cfg = minimal_cfg("FullEval");
        assert_eq!(create("FullEval", &cfg).unwrap().name(), "FullEval");
        assert_eq!(create("VFF", &cfg).unwrap().name(), "VFF");
    }

    #[test]
    fn test_create_unknown_fails() {
        let cfg = minimal_cfg("FullEval");
        assert!(matches!(
            create("NoSuchMethod", &cfg),
            Err(NavError::Config(_))
        ));
    }
}
