//! Pose and point types.

use serde::{Deserialize, Serialize};

/// A 2D point in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    /// X coordinate in meters
    pub x: f32,
    /// Y coordinate in meters
    pub y: f32,
}

impl Point2D {
    /// Create a new point.
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared distance to another point (avoids sqrt).
    #[inline]
    pub fn distance_squared(&self, other: &Point2D) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point2D) -> f32 {
        self.distance_squared(other).sqrt()
    }

    /// Euclidean norm (distance from the origin).
    #[inline]
    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

impl Default for Point2D {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

/// Robot pose in 2D space.
///
/// Position (x, y) in meters and heading (theta) in radians,
/// normalized to [-π, π].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    /// X position in meters
    pub x: f32,
    /// Y position in meters
    pub y: f32,
    /// Heading in radians, normalized to [-π, π]
    pub theta: f32,
}

impl Pose2D {
    /// Create a new pose with theta normalized to [-π, π].
    #[inline]
    pub fn new(x: f32, y: f32, theta: f32) -> Self {
        Self {
            x,
            y,
            theta: crate::core::math::normalize_angle(theta),
        }
    }

    /// Identity pose at origin with zero heading.
    #[inline]
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
        }
    }

    /// Position part of the pose.
    #[inline]
    pub fn point(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Compose two poses: self ⊕ other
    ///
    /// Applies `other` transform relative to `self` frame.
    #[inline]
    pub fn compose(&self, other: &Pose2D) -> Pose2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Pose2D::new(
            self.x + other.x * cos_t - other.y * sin_t,
            self.y + other.x * sin_t + other.y * cos_t,
            self.theta + other.theta,
        )
    }

    /// Inverse of this pose.
    ///
    /// Returns the transform that undoes this pose.
    #[inline]
    pub fn inverse(&self) -> Pose2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Pose2D::new(
            -self.x * cos_t - self.y * sin_t,
            self.x * sin_t - self.y * cos_t,
            -self.theta,
        )
    }

    /// Express this pose relative to `base`: base⁻¹ ⊕ self.
    #[inline]
    pub fn relative_to(&self, base: &Pose2D) -> Pose2D {
        base.inverse().compose(self)
    }

    /// Transform a point from local frame to global frame.
    #[inline]
    pub fn transform_point(&self, point: &Point2D) -> Point2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Point2D::new(
            self.x + point.x * cos_t - point.y * sin_t,
            self.y + point.x * sin_t + point.y * cos_t,
        )
    }

    /// Transform a point from global frame to local frame.
    #[inline]
    pub fn inverse_transform_point(&self, point: &Point2D) -> Point2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        let dx = point.x - self.x;
        let dy = point.y - self.y;
        Point2D::new(dx * cos_t + dy * sin_t, -dx * sin_t + dy * cos_t)
    }

    /// Planar distance to a point, ignoring heading.
    #[inline]
    pub fn distance_2d(&self, x: f32, y: f32) -> f32 {
        let dx = self.x - x;
        let dy = self.y - y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl Default for Pose2D {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_pose_compose_identity() {
        let p = Pose2D::new(1.0, 2.0, 0.5);
        let result = p.compose(&Pose2D::identity());
        assert_relative_eq!(result.x, p.x);
        assert_relative_eq!(result.y, p.y);
        assert_relative_eq!(result.theta, p.theta);
    }

    #[test]
    fn test_pose_inverse_roundtrip() {
        let p = Pose2D::new(1.0, 2.0, 0.5);
        let result = p.compose(&p.inverse());
        assert_relative_eq!(result.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(result.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(result.theta, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_relative_to() {
        let base = Pose2D::new(1.0, 0.0, FRAC_PI_2);
        let p = Pose2D::new(1.0, 1.0, FRAC_PI_2);
        let rel = p.relative_to(&base);
        assert_relative_eq!(rel.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(rel.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(rel.theta, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_transform_point_roundtrip() {
        let pose = Pose2D::new(1.0, 2.0, 0.7);
        let p = Point2D::new(0.5, -0.3);
        let global = pose.transform_point(&p);
        let back = pose.inverse_transform_point(&global);
        assert_relative_eq!(back.x, p.x, epsilon = 1e-6);
        assert_relative_eq!(back.y, p.y, epsilon = 1e-6);
    }
}
