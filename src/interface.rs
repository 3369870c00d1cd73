//! Robot-facing interfaces: velocity commands, kinematic limits, the
//! robot abstraction consumed by the navigator, and the obstacle source.
//!
//! The navigator drives a robot exclusively through [`RobotInterface`];
//! the robot object is shared with the host and never owned by the
//! navigation stack.

use serde::{Deserialize, Serialize};

use crate::core::types::{Point2D, Pose2D, Timestamped, Twist2D};
use crate::error::Result;

/// Kinematic velocity command.
///
/// Closed set of command kinds: differential-drive (v, w) and
/// holonomic (vx, vy, omega). A stop is the all-zero command of
/// either kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VelCmd {
    /// Differential drive: linear (m/s) and angular (rad/s) speed.
    DiffDrive { v: f32, w: f32 },
    /// Holonomic: linear velocities (m/s) and angular speed (rad/s).
    Holo { vx: f32, vy: f32, omega: f32 },
}

impl VelCmd {
    /// Whether two commands are of the same kinematic kind.
    pub fn same_kind(&self, other: &VelCmd) -> bool {
        matches!(
            (self, other),
            (VelCmd::DiffDrive { .. }, VelCmd::DiffDrive { .. })
                | (VelCmd::Holo { .. }, VelCmd::Holo { .. })
        )
    }

    /// Command components as a flat slice-like vector.
    pub fn components(&self) -> Vec<f32> {
        match *self {
            VelCmd::DiffDrive { v, w } => vec![v, w],
            VelCmd::Holo { vx, vy, omega } => vec![vx, vy, omega],
        }
    }

    /// Magnitude of the linear part.
    pub fn linear_norm(&self) -> f32 {
        match *self {
            VelCmd::DiffDrive { v, .. } => v.abs(),
            VelCmd::Holo { vx, vy, .. } => (vx * vx + vy * vy).sqrt(),
        }
    }

    /// Magnitude of the angular part.
    pub fn angular_norm(&self) -> f32 {
        match *self {
            VelCmd::DiffDrive { w, .. } => w.abs(),
            VelCmd::Holo { omega, .. } => omega.abs(),
        }
    }

    /// Scale every component by `s`.
    pub fn scaled(&self, s: f32) -> VelCmd {
        match *self {
            VelCmd::DiffDrive { v, w } => VelCmd::DiffDrive { v: v * s, w: w * s },
            VelCmd::Holo { vx, vy, omega } => VelCmd::Holo {
                vx: vx * s,
                vy: vy * s,
                omega: omega * s,
            },
        }
    }

    /// The stop command of the same kind.
    pub fn to_stop(&self) -> VelCmd {
        self.scaled(0.0)
    }

    /// Whether the command is (numerically) a stop.
    pub fn is_stop(&self) -> bool {
        self.components().iter().all(|c| c.abs() < 1e-6)
    }

    /// Blend with the previously issued command and clip against the
    /// absolute limits.
    ///
    /// `beta` in [0, 1] weights the new command: `beta = 1` passes it
    /// through untouched, `beta = 0` repeats the last one. Blending is
    /// only meaningful between commands of the same kind; otherwise the
    /// new command is used as-is. Clipping preserves the curvature by
    /// scaling all components together.
    ///
    /// Returns the processed command and the effective residual scale of
    /// its linear speed with respect to the unprocessed input, so callers
    /// can keep derived quantities (ETA, speed scale) consistent.
    pub fn blend_and_limit(&self, last: Option<&VelCmd>, beta: f64, limits: &SpeedLimits) -> (VelCmd, f64) {
        let beta = beta.clamp(0.0, 1.0) as f32;

        let blended = match last {
            Some(prev) if prev.same_kind(self) => match (*self, *prev) {
                (VelCmd::DiffDrive { v, w }, VelCmd::DiffDrive { v: pv, w: pw }) => {
                    VelCmd::DiffDrive {
                        v: beta * v + (1.0 - beta) * pv,
                        w: beta * w + (1.0 - beta) * pw,
                    }
                }
                (
                    VelCmd::Holo { vx, vy, omega },
                    VelCmd::Holo {
                        vx: px,
                        vy: py,
                        omega: po,
                    },
                ) => VelCmd::Holo {
                    vx: beta * vx + (1.0 - beta) * px,
                    vy: beta * vy + (1.0 - beta) * py,
                    omega: beta * omega + (1.0 - beta) * po,
                },
                _ => unreachable!("same_kind checked above"),
            },
            _ => *self,
        };

        // Clip keeping the ratio between components.
        let mut clip = 1.0f32;
        let lin = blended.linear_norm();
        if lin > limits.max_linear_vel && lin > 0.0 {
            clip = clip.min(limits.max_linear_vel / lin);
        }
        let ang = blended.angular_norm();
        if ang > limits.max_angular_vel && ang > 0.0 {
            clip = clip.min(limits.max_angular_vel / ang);
        }
        let limited = blended.scaled(clip);

        let raw_lin = self.linear_norm();
        let scale = if raw_lin > 1e-6 {
            (limited.linear_norm() / raw_lin) as f64
        } else {
            1.0
        };

        (limited, scale)
    }
}

/// Absolute kinematic speed caps of the robot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpeedLimits {
    /// Maximum linear velocity magnitude (m/s)
    #[serde(default = "default_max_linear")]
    pub max_linear_vel: f32,
    /// Maximum angular velocity magnitude (rad/s)
    #[serde(default = "default_max_angular")]
    pub max_angular_vel: f32,
}

fn default_max_linear() -> f32 {
    0.3
}
fn default_max_angular() -> f32 {
    1.0
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            max_linear_vel: default_max_linear(),
            max_angular_vel: default_max_angular(),
        }
    }
}

/// Abstraction of the robot consumed by the navigator.
///
/// The navigator borrows the robot (shared reference semantics); it
/// queries state, sends velocity commands and reports navigation events
/// through this trait. Event sinks default to no-ops.
pub trait RobotInterface: Send + Sync {
    /// Current pose, global-frame velocity and the robot-clock timestamp
    /// of the estimate.
    fn get_current_pose_and_speeds(&self) -> Result<(Pose2D, Twist2D, f64)>;

    /// Monotonic navigation time in seconds.
    ///
    /// Wall-clock on real robots, simulation time in simulators.
    fn get_navigation_time(&self) -> f64;

    /// Submit a new velocity command. Returns false on failure.
    fn change_speeds(&self, cmd: &VelCmd) -> bool;

    /// Ask the robot to keep executing the last velocity command.
    fn change_speeds_nop(&self) -> bool;

    /// Stop the robot. Returns false on failure.
    fn stop(&self, is_emergency: bool) -> bool;

    /// Start the robot-side watchdog; its expiry must stop the robot
    /// independently of the navigator.
    fn start_watchdog(&self, _period_ms: u32) {}

    /// Stop the robot-side watchdog.
    fn stop_watchdog(&self) {}

    /// Command used when an emergency stop must be recorded.
    fn get_emergency_stop_cmd(&self) -> VelCmd {
        VelCmd::DiffDrive { v: 0.0, w: 0.0 }
    }

    /// A navigation has started.
    fn send_navigation_start_event(&self) {}

    /// The navigation target has been reached.
    fn send_navigation_end_event(&self) {}

    /// The navigation aborted due to an error.
    fn send_navigation_end_due_to_error_event(&self) {}

    /// No progress toward the target within the alarm window.
    fn send_way_seems_blocked_event(&self) {}

    /// Waypoint `idx` has been reached (or skipped as reached).
    fn send_waypoint_reached_event(&self, _idx: usize) {}

    /// Waypoint `idx` is the new active goal.
    fn send_new_waypoint_target_event(&self, _idx: usize) {}
}

/// Source of workspace obstacle observations.
///
/// Implemented by the host with whatever sensor pipeline it has; the
/// planner calls it once per iteration. Points are expressed in the
/// robot frame at observation time.
pub trait ObstacleSource: Send {
    /// Acquire the current obstacle cloud with its observation timestamp.
    fn sense(&mut self) -> Result<Timestamped<Vec<Point2D>>>;
}
