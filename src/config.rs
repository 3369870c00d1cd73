//! Configuration loading for marga-nav.
//!
//! The configuration is a TOML file with one section per layer. The
//! `[planner]` section carries three required keys (`holonomic_method`,
//! `motion_decider_method` and `ref_distance`); everything else has a
//! default. A missing required key is surfaced as a configuration error
//! and the navigator stays uninitialized.

use serde::Deserialize;
use std::path::Path;

use crate::error::{NavError, Result};
use crate::interface::SpeedLimits;

/// Main configuration structure.
#[derive(Clone, Debug, Deserialize)]
pub struct NavigatorConfig {
    /// State machine / target-reach parameters
    #[serde(default)]
    pub nav: NavCoreConfig,

    /// Waypoint sequencer parameters
    #[serde(default)]
    pub waypoints: WaypointConfig,

    /// Reactive planner parameters (required section)
    pub planner: PlannerConfig,

    /// Full-evaluation holonomic method parameters
    #[serde(default)]
    pub full_eval: FullEvalConfig,

    /// Virtual-force-field holonomic method parameters
    #[serde(default)]
    pub vff: VffConfig,

    /// Weighted-scores motion decider parameters
    #[serde(default)]
    pub weighted_scores: WeightedScoresConfig,
}

impl NavigatorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NavError::Config(format!("Failed to read config file: {}", e)))?;
        let config: NavigatorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: NavigatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.planner.ref_distance <= 0.0 {
            return Err(NavError::Config("ref_distance must be > 0".into()));
        }
        if self.planner.secure_distance_end <= self.planner.secure_distance_start {
            return Err(NavError::Config(
                "secure_distance_end must be > secure_distance_start".into(),
            ));
        }
        Ok(())
    }
}

/// Parameters of the navigator state machine.
#[derive(Clone, Debug, Deserialize)]
pub struct NavCoreConfig {
    /// Distance to target at which the end-of-navigation event fires.
    /// 0 means "use the request's allowed_distance".
    #[serde(default)]
    pub dist_to_target_for_sending_event: f32,

    /// Abort navigation if the distance to target has not decreased for
    /// this long (seconds).
    #[serde(default = "default_alarm_timeout")]
    pub alarm_seems_not_approaching_target_timeout: f64,
}

impl Default for NavCoreConfig {
    fn default() -> Self {
        Self {
            dist_to_target_for_sending_event: 0.0,
            alarm_seems_not_approaching_target_timeout: default_alarm_timeout(),
        }
    }
}

/// Parameters of the waypoint sequencer.
#[derive(Clone, Debug, Deserialize)]
pub struct WaypointConfig {
    /// Max distance to "foresee" waypoints for skipping (meters).
    /// Negative means unlimited.
    #[serde(default = "default_max_skip_distance")]
    pub max_distance_to_allow_skip_waypoint: f32,

    /// Consecutive cycles a future waypoint must be seen reachable
    /// before it becomes the active goal.
    #[serde(default = "default_min_timesteps_skip")]
    pub min_timesteps_confirm_skip_waypoints: u32,
}

impl Default for WaypointConfig {
    fn default() -> Self {
        Self {
            max_distance_to_allow_skip_waypoint: default_max_skip_distance(),
            min_timesteps_confirm_skip_waypoints: default_min_timesteps_skip(),
        }
    }
}

/// Parameters of the PTG-based reactive planner.
#[derive(Clone, Debug, Deserialize)]
pub struct PlannerConfig {
    /// Name of the registered holonomic sub-planner (required).
    pub holonomic_method: String,

    /// Name of the registered motion decider (required).
    pub motion_decider_method: String,

    /// PTG reference distance: maximum obstacle distance considered,
    /// in meters (required).
    pub ref_distance: f32,

    /// Time constant (seconds) of the low-pass filter applied to
    /// kinematic velocity commands. 0 disables filtering.
    #[serde(default)]
    pub speedfilter_tau: f64,

    /// Start of the security slowdown ramp, in normalized distance [0,1].
    #[serde(default = "default_secure_distance_start")]
    pub secure_distance_start: f32,

    /// End of the security slowdown ramp, in normalized distance [0,1].
    /// Must be greater than `secure_distance_start`.
    #[serde(default = "default_secure_distance_end")]
    pub secure_distance_end: f32,

    /// Whether to extrapolate robot poses to compensate sensor and
    /// actuation delays.
    #[serde(default)]
    pub use_delays_model: bool,

    /// Max mismatch between the predicted and the actual robot path
    /// before a command continuation is discarded (meters).
    #[serde(default = "default_max_predicted_actual")]
    pub max_distance_predicted_actual_path: f32,

    /// Min normalized free distance [0,1] past the current pose required
    /// to allow a command continuation.
    #[serde(default = "default_min_free_space_continuation")]
    pub min_normalized_free_space_for_ptg_continuation: f64,

    /// Whether to filter the workspace obstacle cloud before the
    /// TP-Space transform.
    #[serde(default = "default_true")]
    pub enable_obstacle_filtering: bool,

    /// Whether to compute clearance diagrams (off by default, costly).
    #[serde(default)]
    pub evaluate_clearance: bool,

    /// Max relative displacement (meters) up to which the continuation
    /// candidate uses time-based path-step prediction instead of the
    /// inverse workspace-to-TP map.
    #[serde(default = "default_max_timebased_prediction")]
    pub max_dist_for_timebased_path_prediction: f32,

    /// Absolute kinematic speed caps.
    #[serde(default)]
    pub robot_absolute_speed_limits: SpeedLimits,

    /// Whether to write per-iteration log record files.
    #[serde(default)]
    pub enable_log_file: bool,

    /// Directory for `log_<NNN>.reactivenavlog` files.
    #[serde(default = "default_log_directory")]
    pub log_directory: String,
}

/// Parameters of the full-evaluation holonomic method.
#[derive(Clone, Debug, Deserialize)]
pub struct FullEvalConfig {
    /// Weights for the per-direction factors:
    /// [free-space, target alignment, target reachability, hysteresis, clearance]
    #[serde(default = "default_full_eval_weights")]
    pub factor_weights: [f64; 5],

    /// Directions with free space below this fraction of the target
    /// distance are not eligible.
    #[serde(default = "default_too_close_obstacle")]
    pub too_close_obstacle: f64,

    /// Start slowing down when the target is nearer than this
    /// normalized distance.
    #[serde(default = "default_target_slowdown_distance")]
    pub target_slowdown_distance: f64,
}

impl Default for FullEvalConfig {
    fn default() -> Self {
        Self {
            factor_weights: default_full_eval_weights(),
            too_close_obstacle: default_too_close_obstacle(),
            target_slowdown_distance: default_target_slowdown_distance(),
        }
    }
}

/// Parameters of the virtual-force-field holonomic method.
#[derive(Clone, Debug, Deserialize)]
pub struct VffConfig {
    /// Attractive force toward the target.
    #[serde(default = "default_target_attractive_force")]
    pub target_attractive_force: f64,

    /// Obstacles nearer than this normalized distance start repelling.
    #[serde(default = "default_obstacle_max_distance")]
    pub obstacle_max_distance: f64,
}

impl Default for VffConfig {
    fn default() -> Self {
        Self {
            target_attractive_force: default_target_attractive_force(),
            obstacle_max_distance: default_obstacle_max_distance(),
        }
    }
}

/// Parameters of the weighted-scores motion decider.
#[derive(Clone, Debug, Deserialize)]
pub struct WeightedScoresConfig {
    /// Weight of the collision-free distance score.
    #[serde(default = "default_w_colfree")]
    pub weight_collision_free_distance: f64,

    /// Weight of the (inverted) final Euclidean distance score.
    #[serde(default = "default_w_dist_eucl")]
    pub weight_dist_eucl_final: f64,

    /// Weight of the hysteresis score.
    #[serde(default = "default_w_hysteresis")]
    pub weight_hysteresis: f64,

    /// Weight of the clearance score.
    #[serde(default = "default_w_clearance")]
    pub weight_clearance: f64,

    /// Weight of the (inverted) ETA score.
    #[serde(default = "default_w_eta")]
    pub weight_eta: f64,

    /// Candidates with collision-free distance below this are discarded.
    #[serde(default = "default_min_colfree")]
    pub min_collision_free_distance: f64,

    /// Command continuations with min(colfree, clearance) below this
    /// are discarded.
    #[serde(default = "default_min_free_space_continuation")]
    pub min_continuation_free_space: f64,
}

impl Default for WeightedScoresConfig {
    fn default() -> Self {
        Self {
            weight_collision_free_distance: default_w_colfree(),
            weight_dist_eucl_final: default_w_dist_eucl(),
            weight_hysteresis: default_w_hysteresis(),
            weight_clearance: default_w_clearance(),
            weight_eta: default_w_eta(),
            min_collision_free_distance: default_min_colfree(),
            min_continuation_free_space: default_min_free_space_continuation(),
        }
    }
}

// Default value functions
fn default_alarm_timeout() -> f64 {
    30.0
}
fn default_max_skip_distance() -> f32 {
    -1.0
}
fn default_min_timesteps_skip() -> u32 {
    1
}
fn default_secure_distance_start() -> f32 {
    0.05
}
fn default_secure_distance_end() -> f32 {
    0.20
}
fn default_max_predicted_actual() -> f32 {
    0.15
}
fn default_min_free_space_continuation() -> f64 {
    0.2
}
fn default_true() -> bool {
    true
}
fn default_max_timebased_prediction() -> f32 {
    2.0
}
fn default_log_directory() -> String {
    "reactivenav-logs".to_string()
}
fn default_full_eval_weights() -> [f64; 5] {
    [1.0, 2.0, 2.0, 0.5, 1.0]
}
fn default_too_close_obstacle() -> f64 {
    0.15
}
fn default_target_slowdown_distance() -> f64 {
    0.6
}
fn default_target_attractive_force() -> f64 {
    7.5
}
fn default_obstacle_max_distance() -> f64 {
    1.0
}
fn default_w_colfree() -> f64 {
    2.0
}
fn default_w_dist_eucl() -> f64 {
    1.0
}
fn default_w_hysteresis() -> f64 {
    0.5
}
fn default_w_clearance() -> f64 {
    1.0
}
fn default_w_eta() -> f64 {
    0.25
}
fn default_min_colfree() -> f64 {
    0.05
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [planner]
        holonomic_method = "FullEval"
        motion_decider_method = "WeightedScores"
        ref_distance = 4.0
    "#;

    #[test]
    fn test_minimal_config_parses() {
        let cfg = NavigatorConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.planner.holonomic_method, "FullEval");
        assert_eq!(cfg.planner.ref_distance, 4.0);
        assert_eq!(cfg.nav.alarm_seems_not_approaching_target_timeout, 30.0);
        assert_eq!(cfg.waypoints.max_distance_to_allow_skip_waypoint, -1.0);
        assert!(!cfg.planner.use_delays_model);
        assert_eq!(cfg.planner.secure_distance_start, 0.05);
        assert_eq!(cfg.planner.secure_distance_end, 0.20);
    }

    #[test]
    fn test_missing_required_key_fails() {
        let res = NavigatorConfig::from_toml(
            r#"
            [planner]
            holonomic_method = "FullEval"
            ref_distance = 4.0
            "#,
        );
        assert!(matches!(res, Err(NavError::Config(_))));
    }

    #[test]
    fn test_missing_planner_section_fails() {
        assert!(NavigatorConfig::from_toml("[nav]\n").is_err());
    }

    #[test]
    fn test_bad_secure_distances_rejected() {
        let res = NavigatorConfig::from_toml(
            r#"
            [planner]
            holonomic_method = "FullEval"
            motion_decider_method = "WeightedScores"
            ref_distance = 4.0
            secure_distance_start = 0.3
            secure_distance_end = 0.2
            "#,
        );
        assert!(matches!(res, Err(NavError::Config(_))));
    }
}
