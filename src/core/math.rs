//! Angle arithmetic and the segment-distance primitive behind the
//! target-reach tests.
//!
//! Headings, trajectory parameters and TP-Space directions all live on
//! the circle; every comparison between two of them has to go through
//! the principal range [-π, π] or the wrap-around at ±π corrupts the
//! result.

use std::f32::consts::{PI, TAU};

use crate::core::types::Point2D;

/// Wrap an angle into the principal range [-π, π].
#[inline]
pub fn normalize_angle(angle: f32) -> f32 {
    let mut a = angle;
    if a.abs() > 3.0 * TAU {
        // Far off the range (accumulated odometry, integrated rates):
        // cut down to within one turn before the fine adjustment.
        a %= TAU;
    }
    while a > PI {
        a -= TAU;
    }
    while a < -PI {
        a += TAU;
    }
    a
}

/// Signed rotation that carries the heading `from` onto `to`, taking
/// the short way around the circle.
#[inline]
pub fn angle_diff(from: f32, to: f32) -> f32 {
    normalize_angle(to - from)
}

/// Blend two headings by factor `t` in [0, 1], moving from `from`
/// toward `to` along the short arc.
#[inline]
pub fn angle_lerp(from: f32, to: f32, t: f32) -> f32 {
    normalize_angle(from + t * angle_diff(from, to))
}

/// Distance from point `p` to the segment `a`-`b`.
///
/// Handles the degenerate case where `a == b` (plain point distance).
pub fn point_segment_distance(p: Point2D, a: Point2D, b: Point2D) -> f32 {
    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let len_sq = abx * abx + aby * aby;

    if len_sq <= f32::EPSILON {
        return p.distance(&a);
    }

    // Project p onto the segment, clamped to [0, 1].
    let t = (((p.x - a.x) * abx + (p.y - a.y) * aby) / len_sq).clamp(0.0, 1.0);
    let proj = Point2D::new(a.x + t * abx, a.y + t * aby);
    p.distance(&proj)
}
