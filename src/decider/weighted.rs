//! Weighted-sum motion decider with hard constraints.

use crate::config::WeightedScoresConfig;
use crate::decider::MotionDecider;
use crate::reactive::CandidateMovement;

/// Weighted sum over the candidate property bag.
///
/// Distance-like properties (`dist_eucl_final`, `eta`) enter inverted
/// so that every term rewards larger values; the per-candidate sum is
/// scaled by `ptg_priority`. Hard constraints discard candidates with
/// non-positive speed, insufficient collision-free distance, and
/// command continuations too close to obstacles.
pub struct WeightedScores {
    cfg: WeightedScoresConfig,
}

impl WeightedScores {
    /// Create the decider with its configuration.
    pub fn new(cfg: WeightedScoresConfig) -> Self {
        Self { cfg }
    }

    fn evaluate(&self, cm: &CandidateMovement) -> f64 {
        if cm.speed <= 0.0 {
            return 0.0;
        }

        let colfree = cm.prop("colision_free_distance").unwrap_or(0.0);
        if colfree < self.cfg.min_collision_free_distance {
            return 0.0;
        }

        let clearance = cm.prop("clearance").unwrap_or(1.0);

        // Don't trust a command continuation when already tight on space.
        if cm.prop("is_PTG_cont").unwrap_or(0.0) != 0.0
            && colfree.min(clearance) < self.cfg.min_continuation_free_space
        {
            return 0.0;
        }

        let dist_eucl = cm.prop("dist_eucl_final").unwrap_or(f64::INFINITY);
        let hysteresis = cm.prop("hysteresis").unwrap_or(0.0);
        let eta = cm.prop("eta").unwrap_or(0.0).max(0.0);
        let priority = cm.prop("ptg_priority").unwrap_or(1.0);

        let score = self.cfg.weight_collision_free_distance * colfree
            + self.cfg.weight_dist_eucl_final / (1.0 + dist_eucl)
            + self.cfg.weight_hysteresis * hysteresis
            + self.cfg.weight_clearance * clearance
            + self.cfg.weight_eta / (1.0 + eta);

        score * priority
    }
}

impl MotionDecider for WeightedScores {
    fn name(&self) -> &'static str {
        "WeightedScores"
    }

    fn decide(&mut self, candidates: &[CandidateMovement]) -> (Option<usize>, Vec<f64>) {
        let evaluations: Vec<f64> = candidates.iter().map(|cm| self.evaluate(cm)).collect();

        let best = evaluations
            .iter()
            .enumerate()
            .filter(|&(_, &e)| e > 0.0)
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i);

        (best, evaluations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeightedScoresConfig;

    fn candidate(speed: f64, colfree: f64, dist_eucl: f64) -> CandidateMovement {
        let mut cm = CandidateMovement::new(Some(0), 0.0, speed);
        cm.set_prop("colision_free_distance", colfree);
        cm.set_prop("dist_eucl_final", dist_eucl);
        cm.set_prop("hysteresis", 0.0);
        cm.set_prop("clearance", 1.0);
        cm.set_prop("eta", 1.0);
        cm.set_prop("ptg_priority", 1.0);
        cm
    }

    fn decider() -> WeightedScores {
        WeightedScores::new(WeightedScoresConfig::default())
    }

    #[test]
    fn test_negative_speed_filtered() {
        let mut d = decider();
        let (best, evals) = d.decide(&[candidate(-0.01, 1.0, 0.1)]);
        assert!(best.is_none());
        assert_eq!(evals[0], 0.0);
    }

    #[test]
    fn test_prefers_closer_final_distance() {
        let mut d = decider();
        let far = candidate(1.0, 1.0, 3.0);
        let near = candidate(1.0, 1.0, 0.2);
        let (best, evals) = d.decide(&[far, near]);
        assert_eq!(best, Some(1));
        assert!(evals[1] > evals[0]);
    }

    #[test]
    fn test_colfree_floor_discards() {
        let mut d = decider();
        let (best, _) = d.decide(&[candidate(1.0, 0.01, 0.1)]);
        assert!(best.is_none());
    }

    #[test]
    fn test_continuation_needs_free_space() {
        let mut d = decider();
        let mut tight = candidate(1.0, 0.1, 0.1);
        tight.set_prop("is_PTG_cont", 1.0);
        let mut ok = candidate(1.0, 0.5, 0.1);
        ok.set_prop("is_PTG_cont", 1.0);

        let (best, evals) = d.decide(&[tight, ok]);
        assert_eq!(best, Some(1));
        assert_eq!(evals[0], 0.0);
    }

    #[test]
    fn test_empty_candidate_list() {
        let mut d = decider();
        let (best, evals) = d.decide(&[]);
        assert!(best.is_none());
        assert!(evals.is_empty());
    }
}
