//! Core data types for 2D navigation.

mod history;
mod pose;
mod twist;

pub use history::PoseHistory;
pub use pose::{Point2D, Pose2D};
pub use twist::{PoseVelSample, Twist2D};

use serde::{Deserialize, Serialize};

/// Generic timestamp wrapper for any data type.
///
/// Timestamps are seconds from the robot's monotonic navigation clock
/// (simulation time on simulated robots).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timestamped<T> {
    /// The wrapped data
    pub data: T,
    /// Robot navigation time in seconds
    pub time: f64,
}

impl<T> Timestamped<T> {
    /// Create a new timestamped value.
    #[inline]
    pub fn new(data: T, time: f64) -> Self {
        Self { data, time }
    }
}
