//! Multi-objective motion deciders.
//!
//! The decider is the single place where the scoring properties of the
//! movement candidates are combined into a scalar. The planner imposes
//! no combination policy; deciders are registered by name and built
//! from configuration via [`create`].

mod weighted;

pub use weighted::WeightedScores;

use crate::config::NavigatorConfig;
use crate::error::{NavError, Result};
use crate::reactive::CandidateMovement;

/// A pluggable candidate selector.
pub trait MotionDecider: Send {
    /// Registered name of the decider.
    fn name(&self) -> &'static str;

    /// Pick the best candidate.
    ///
    /// Returns the winning index (or `None` when no candidate is
    /// viable) and one evaluation value per candidate for the log.
    /// Candidates with `speed <= 0` are never selected.
    fn decide(&mut self, candidates: &[CandidateMovement]) -> (Option<usize>, Vec<f64>);
}

/// Build a registered motion decider by name.
pub fn create(name: &str, cfg: &NavigatorConfig) -> Result<Box<dyn MotionDecider>> {
    match name {
        "WeightedScores" => Ok(Box::new(WeightedScores::new(cfg.weighted_scores.clone()))),
        other => Err(NavError::Config(format!(
            "Unknown motion decider `{}` (known: WeightedScores)",
            other
        ))),
    }
}
