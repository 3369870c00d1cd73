//! Waypoint sequences and their navigation status.

use serde::{Deserialize, Serialize};

use crate::core::types::{Point2D, Pose2D};

/// One waypoint of a multi-target navigation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waypoint {
    /// Target position in the global frame.
    pub target: Point2D,
    /// Optional heading to adopt at the waypoint (radians).
    pub target_heading: Option<f32>,
    /// Distance at which the waypoint counts as reached (must be > 0).
    pub allowed_distance: f32,
    /// Whether the sequencer may skip past this waypoint when a further
    /// one is already reachable. `false` makes it a barrier.
    pub allow_skip: bool,
}

impl Waypoint {
    /// Create a waypoint without a target heading.
    pub fn new(x: f32, y: f32, allowed_distance: f32, allow_skip: bool) -> Self {
        Self {
            target: Point2D::new(x, y),
            target_heading: None,
            allowed_distance,
            allow_skip,
        }
    }

    /// Set the target heading.
    pub fn with_heading(mut self, heading: f32) -> Self {
        self.target_heading = Some(heading);
        self
    }

    /// Whether the waypoint parameters make sense.
    pub fn is_valid(&self) -> bool {
        self.allowed_distance > 0.0 && self.target.x.is_finite() && self.target.y.is_finite()
    }
}

/// A waypoint plus its navigation status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointStatus {
    /// The waypoint definition.
    pub waypoint: Waypoint,
    /// Whether the waypoint has been reached or skipped-as-reached.
    /// Never transitions back to false.
    pub reached: bool,
    /// Consecutive cycles this waypoint has been seen reachable, used
    /// to debounce the skip-ahead policy.
    pub counter_seen_reachable: u32,
}

impl WaypointStatus {
    fn new(waypoint: Waypoint) -> Self {
        Self {
            waypoint,
            reached: false,
            counter_seen_reachable: 0,
        }
    }
}

/// Status of a whole waypoint navigation.
///
/// `current_goal` is monotone non-decreasing; `final_reached` implies
/// the last waypoint is the goal and is marked reached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaypointStatusSequence {
    /// Per-waypoint status, in request order.
    pub waypoints: Vec<WaypointStatus>,
    /// Index of the active goal; `None` until the first cycle.
    pub current_goal: Option<usize>,
    /// Whether the final waypoint has been reached.
    pub final_reached: bool,
    /// Robot pose observed on the previous sequencer cycle.
    pub last_robot_pose: Option<Pose2D>,
}

impl WaypointStatusSequence {
    /// Fresh status for a new waypoint request.
    pub fn from_waypoints(waypoints: Vec<Waypoint>) -> Self {
        Self {
            waypoints: waypoints.into_iter().map(WaypointStatus::new).collect(),
            current_goal: None,
            final_reached: false,
            last_robot_pose: None,
        }
    }

    /// Number of waypoints.
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// Whether the sequence holds no waypoints.
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// How many waypoints have been reached so far.
    pub fn reached_count(&self) -> usize {
        self.waypoints.iter().filter(|w| w.reached).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waypoint_validity() {
        assert!(Waypoint::new(1.0, 2.0, 0.3, true).is_valid());
        assert!(!Waypoint::new(1.0, 2.0, 0.0, true).is_valid());
        assert!(!Waypoint::new(f32::NAN, 2.0, 0.3, true).is_valid());
    }

    #[test]
    fn test_fresh_sequence_defaults() {
        let seq = WaypointStatusSequence::from_waypoints(vec![
            Waypoint::new(1.0, 0.0, 0.2, true),
            Waypoint::new(2.0, 0.0, 0.2, false),
        ]);
        assert_eq!(seq.len(), 2);
        assert!(seq.current_goal.is_none());
        assert!(!seq.final_reached);
        assert_eq!(seq.reached_count(), 0);
        assert_eq!(seq.waypoints[0].counter_seen_reachable, 0);
    }
}
