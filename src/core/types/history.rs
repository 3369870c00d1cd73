//! Sliding window of recent robot poses with linear interpolation.

use crate::core::math::angle_lerp;
use crate::core::types::Pose2D;

/// Poses older than this relative to the newest sample are evicted.
const MAX_AGE_SECS: f64 = 20.0;

/// Extrapolation tolerance when querying slightly outside the window.
const QUERY_SLACK_SECS: f64 = 0.5;

/// Time-ordered sliding window of robot poses.
///
/// Samples are keyed by robot navigation time and interpolated linearly
/// (shortest-path interpolation for the heading). The window keeps the
/// last 20 seconds of motion.
#[derive(Debug, Clone, Default)]
pub struct PoseHistory {
    samples: Vec<(f64, Pose2D)>,
}

impl PoseHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the history holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Remove all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Most recent sample, if any.
    pub fn latest(&self) -> Option<&(f64, Pose2D)> {
        self.samples.last()
    }

    /// Sample immediately before the most recent one, if any.
    pub fn previous(&self) -> Option<&(f64, Pose2D)> {
        if self.samples.len() >= 2 {
            self.samples.get(self.samples.len() - 2)
        } else {
            None
        }
    }

    /// Append a pose sample and evict entries older than the window.
    ///
    /// Out-of-order samples (time not after the newest) are dropped,
    /// keeping the sequence monotone.
    pub fn push(&mut self, time: f64, pose: Pose2D) {
        if let Some((last_t, _)) = self.samples.last()
            && time <= *last_t
        {
            return;
        }
        self.samples.push((time, pose));

        // Keep at least one sample even if it is old.
        while self.samples.len() > 1 && time - self.samples[0].0 > MAX_AGE_SECS {
            self.samples.remove(0);
        }
    }

    /// Interpolate the robot pose at `time`.
    ///
    /// Requires at least one sample. Queries up to 0.5 s outside the
    /// stored range clamp to the nearest endpoint; anything farther
    /// returns `None`.
    pub fn interpolate(&self, time: f64) -> Option<Pose2D> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;

        if time <= first.0 {
            return (first.0 - time <= QUERY_SLACK_SECS).then_some(first.1);
        }
        if time >= last.0 {
            return (time - last.0 <= QUERY_SLACK_SECS).then_some(last.1);
        }

        // Binary search for the bracketing pair.
        let idx = self
            .samples
            .partition_point(|(t, _)| *t < time);
        let (t0, p0) = self.samples[idx - 1];
        let (t1, p1) = self.samples[idx];

        let f = ((time - t0) / (t1 - t0)) as f32;
        Some(Pose2D::new(
            p0.x + f * (p1.x - p0.x),
            p0.y + f * (p1.y - p0.y),
            angle_lerp(p0.theta, p1.theta, f),
        ))
    }
}
