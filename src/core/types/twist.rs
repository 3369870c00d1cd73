//! Velocity types and the combined pose/velocity sample.

use serde::{Deserialize, Serialize};

use super::Pose2D;

/// 2D velocity: linear (vx, vy) in m/s and angular (omega) in rad/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Twist2D {
    /// Linear velocity along X (m/s)
    pub vx: f32,
    /// Linear velocity along Y (m/s)
    pub vy: f32,
    /// Angular velocity (rad/s)
    pub omega: f32,
}

impl Twist2D {
    /// Create a new twist.
    #[inline]
    pub fn new(vx: f32, vy: f32, omega: f32) -> Self {
        Self { vx, vy, omega }
    }

    /// Zero velocity.
    #[inline]
    pub fn zero() -> Self {
        Self {
            vx: 0.0,
            vy: 0.0,
            omega: 0.0,
        }
    }

    /// Rotate the linear part of the twist by `angle` radians.
    ///
    /// Rotating a global-frame twist by `-pose.theta` yields the
    /// body-frame (local) twist.
    #[inline]
    pub fn rotated(&self, angle: f32) -> Twist2D {
        let (sin_a, cos_a) = angle.sin_cos();
        Twist2D {
            vx: self.vx * cos_a - self.vy * sin_a,
            vy: self.vx * sin_a + self.vy * cos_a,
            omega: self.omega,
        }
    }

    /// Magnitude of the linear velocity.
    #[inline]
    pub fn linear_norm(&self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }
}

impl Default for Twist2D {
    fn default() -> Self {
        Self::zero()
    }
}

/// A pose/velocity estimate queried from the robot.
///
/// Holds the pose, the velocity in the global frame, the same velocity
/// rotated into the body frame, and the robot-clock timestamp of the
/// estimate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoseVelSample {
    /// Robot pose in the global frame
    pub pose: Pose2D,
    /// Velocity in the global frame
    pub vel_global: Twist2D,
    /// Velocity in the body frame (global rotated by -theta)
    pub vel_local: Twist2D,
    /// Robot navigation time of the estimate (seconds)
    pub time: f64,
}

impl PoseVelSample {
    /// Build a sample from a pose and a global-frame velocity.
    pub fn new(pose: Pose2D, vel_global: Twist2D, time: f64) -> Self {
        Self {
            pose,
            vel_global,
            vel_local: vel_global.rotated(-pose.theta),
            time,
        }
    }
}

impl Default for PoseVelSample {
    fn default() -> Self {
        Self {
            pose: Pose2D::identity(),
            vel_global: Twist2D::zero(),
            vel_local: Twist2D::zero(),
            time: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_twist_rotation() {
        let t = Twist2D::new(1.0, 0.0, 0.3);
        let r = t.rotated(FRAC_PI_2);
        assert_relative_eq!(r.vx, 0.0, epsilon = 1e-6);
        assert_relative_eq!(r.vy, 1.0, epsilon = 1e-6);
        assert_relative_eq!(r.omega, 0.3);
    }

    #[test]
    fn test_sample_local_velocity() {
        // Robot facing +Y, moving along global +Y: locally moving along +X.
        let pose = Pose2D::new(0.0, 0.0, FRAC_PI_2);
        let sample = PoseVelSample::new(pose, Twist2D::new(0.0, 0.5, 0.0), 1.0);
        assert_relative_eq!(sample.vel_local.vx, 0.5, epsilon = 1e-6);
        assert_relative_eq!(sample.vel_local.vy, 0.0, epsilon = 1e-6);
    }
}
