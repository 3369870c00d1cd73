//! Constant-curvature differential-drive PTG family.
//!
//! Each path index `k` maps to an arc of constant curvature: linear
//! speed `±v_max` and angular speed proportional to `alpha`. `k_dir`
//! selects the forward (+1) or backward (-1) variant of the family.
//! Arc geometry is closed-form, so the inverse workspace → TP-Space
//! map is exact.

use serde::Deserialize;
use std::f32::consts::PI;

use crate::core::types::{Pose2D, Twist2D};
use crate::interface::VelCmd;
use crate::ptg::{alpha_to_index, index_to_alpha, ClearanceDiagram, Ptg};

/// Threshold below which a path is treated as straight.
const MIN_CURVATURE_W: f32 = 1e-6;

/// Lateral slack for the straight-path inverse map (meters).
const STRAIGHT_EPS_M: f32 = 1e-4;

/// Parameters of the arc PTG family.
#[derive(Clone, Debug, Deserialize)]
pub struct ArcPtgConfig {
    /// +1 for forward paths, -1 for backward paths.
    #[serde(default = "default_k_dir")]
    pub k_dir: i8,

    /// Linear speed magnitude of the canonical commands (m/s).
    #[serde(default = "default_v_max")]
    pub v_max: f32,

    /// Angular speed magnitude at |alpha| = π (rad/s).
    #[serde(default = "default_w_max")]
    pub w_max: f32,

    /// Number of discrete path directions.
    #[serde(default = "default_alpha_count")]
    pub alpha_count: usize,

    /// Reference distance (meters).
    #[serde(default = "default_ref_distance")]
    pub ref_distance: f32,

    /// Duration of one trajectory step (seconds).
    #[serde(default = "default_step_duration")]
    pub step_duration: f64,

    /// Whether continuations of the last command are supported.
    #[serde(default = "default_true")]
    pub supports_nop: bool,

    /// Max age of the last command for a continuation (seconds).
    #[serde(default = "default_max_nop_time")]
    pub max_nop_time: f64,

    /// Static scoring priority.
    #[serde(default = "default_priority")]
    pub score_priority: f64,
}

fn default_k_dir() -> i8 {
    1
}
fn default_v_max() -> f32 {
    0.3
}
fn default_w_max() -> f32 {
    1.0
}
fn default_alpha_count() -> usize {
    121
}
fn default_ref_distance() -> f32 {
    4.0
}
fn default_step_duration() -> f64 {
    0.05
}
fn default_true() -> bool {
    true
}
fn default_max_nop_time() -> f64 {
    1.0
}
fn default_priority() -> f64 {
    1.0
}

impl Default for ArcPtgConfig {
    fn default() -> Self {
        Self {
            k_dir: default_k_dir(),
            v_max: default_v_max(),
            w_max: default_w_max(),
            alpha_count: default_alpha_count(),
            ref_distance: default_ref_distance(),
            step_duration: default_step_duration(),
            supports_nop: default_true(),
            max_nop_time: default_max_nop_time(),
            score_priority: default_priority(),
        }
    }
}

/// One precomputed path of the family.
#[derive(Clone, Copy, Debug)]
struct ArcPath {
    v: f32,
    w: f32,
    n_steps: usize,
}

/// Constant-curvature diff-drive PTG.
pub struct ArcPtg {
    cfg: ArcPtgConfig,
    paths: Vec<ArcPath>,
    cur_vel_local: Twist2D,
}

impl ArcPtg {
    /// Create the family and precompute its path table.
    pub fn new(cfg: ArcPtgConfig) -> Self {
        let mut ptg = Self {
            cfg,
            paths: Vec::new(),
            cur_vel_local: Twist2D::zero(),
        };
        ptg.rebuild();
        ptg
    }

    fn sign(&self) -> f32 {
        if self.cfg.k_dir >= 0 { 1.0 } else { -1.0 }
    }

    fn rebuild(&mut self) {
        let dt = self.cfg.step_duration as f32;
        let sign = self.sign();

        self.paths = (0..self.cfg.alpha_count)
            .map(|k| {
                let alpha = index_to_alpha(k, self.cfg.alpha_count);
                let v = self.cfg.v_max * sign;
                let w = self.cfg.w_max * (alpha / PI) * sign;

                // Paths end at the reference distance, or at a half turn
                // for tight arcs (the trajectory stops being bijective
                // past that point).
                let mut t_end = self.cfg.ref_distance / v.abs();
                if w.abs() > MIN_CURVATURE_W {
                    t_end = t_end.min(PI / w.abs());
                }
                let n_steps = ((t_end / dt).floor() as usize).max(1);

                ArcPath { v, w, n_steps }
            })
            .collect();
    }

    fn path(&self, k: usize) -> &ArcPath {
        &self.paths[k.min(self.paths.len() - 1)]
    }
}

impl Ptg for ArcPtg {
    fn description(&self) -> String {
        format!(
            "ArcPtg(K={:+}, v_max={:.2}, w_max={:.2})",
            self.cfg.k_dir, self.cfg.v_max, self.cfg.w_max
        )
    }

    fn initialize(&mut self) {
        // Path table already built in new(); recompute for idempotence
        // after config edits.
        self.rebuild();
    }

    fn alpha_count(&self) -> usize {
        self.cfg.alpha_count
    }

    fn inverse_map_ws2tp(&self, x: f32, y: f32) -> Option<(usize, f32)> {
        let sign = self.sign();
        let v = self.cfg.v_max * sign;

        if x.abs() < STRAIGHT_EPS_M && y.abs() < STRAIGHT_EPS_M {
            return Some((alpha_to_index(0.0, self.cfg.alpha_count), 0.0));
        }

        if y.abs() < STRAIGHT_EPS_M {
            // Straight segment along the heading axis.
            if x * sign < 0.0 {
                return None;
            }
            let d = (x.abs() / self.cfg.ref_distance).min(1.0);
            return Some((alpha_to_index(0.0, self.cfg.alpha_count), d));
        }

        // The unique arc through the origin (tangent to the heading
        // axis) and (x, y) has its center at (0, R):
        let r = (x * x + y * y) / (2.0 * y);
        let w = v / r;
        let alpha = PI * self.cfg.v_max / (r * self.cfg.w_max);
        if alpha.abs() > PI {
            return None; // tighter than the minimum turning radius
        }

        // Turned angle at which the arc passes through the point; the
        // point is reachable only if that happens moving forward in time.
        let phi = (x / r).atan2(1.0 - y / r);
        let t = phi / w;
        if t < 0.0 {
            return None;
        }

        let d = ((v.abs() * t) / self.cfg.ref_distance).min(1.0);
        Some((alpha_to_index(alpha, self.cfg.alpha_count), d))
    }

    fn path_step_for_dist(&self, k: usize, dist: f32) -> Option<usize> {
        if dist < 0.0 {
            return None;
        }
        let p = self.path(k);
        let step = (dist / (p.v.abs() * self.cfg.step_duration as f32)).round() as usize;
        (step <= p.n_steps).then_some(step)
    }

    fn path_step_count(&self, k: usize) -> usize {
        self.path(k).n_steps
    }

    fn path_pose(&self, k: usize, step: usize) -> Pose2D {
        let p = self.path(k);
        let t = self.cfg.step_duration as f32 * step.min(p.n_steps) as f32;

        if p.w.abs() < MIN_CURVATURE_W {
            Pose2D::new(p.v * t, 0.0, 0.0)
        } else {
            let r = p.v / p.w;
            let phi = p.w * t;
            Pose2D::new(r * phi.sin(), r * (1.0 - phi.cos()), phi)
        }
    }

    fn path_dist(&self, k: usize, step: usize) -> f32 {
        let p = self.path(k);
        p.v.abs() * self.cfg.step_duration as f32 * step.min(p.n_steps) as f32
    }

    fn path_step_duration(&self) -> f64 {
        self.cfg.step_duration
    }

    fn is_bijective_at(&self, k: usize, step: usize) -> bool {
        let p = self.path(k);
        if step > p.n_steps {
            return false;
        }
        // Arcs lose uniqueness at the antipodal point of the circle.
        let phi = p.w.abs() * self.cfg.step_duration as f32 * step as f32;
        phi < PI * 0.999
    }

    fn ref_distance(&self) -> f32 {
        self.cfg.ref_distance
    }

    fn supports_nop_cmd(&self) -> bool {
        self.cfg.supports_nop
    }

    fn max_time_in_nop_cmd(&self, _k: usize) -> f64 {
        self.cfg.max_nop_time
    }

    fn direction_to_motion_command(&self, k: usize) -> VelCmd {
        let p = self.path(k);
        VelCmd::DiffDrive { v: p.v, w: p.w }
    }

    fn update_current_robot_vel(&mut self, vel_local: &Twist2D) {
        self.cur_vel_local = *vel_local;
    }

    fn score_priority(&self) -> f64 {
        self.cfg.score_priority
    }

    fn init_tp_obstacles(&self, out: &mut Vec<f32>) {
        out.clear();
        out.extend((0..self.cfg.alpha_count).map(|k| self.path_dist(k, self.path(k).n_steps)));
    }

    fn init_clearance_diagram(&self, out: &mut ClearanceDiagram) {
        *out = ClearanceDiagram::new(self.cfg.alpha_count, 20);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn forward_ptg() -> ArcPtg {
        ArcPtg::new(ArcPtgConfig::default())
    }

    #[test]
    fn test_straight_path_geometry() {
        let ptg = forward_ptg();
        let k0 = ptg.alpha_to_index(0.0);
        // The center path is (nearly) straight.
        let pose = ptg.path_pose(k0, 20);
        assert!(pose.x > 0.0);
        assert!(pose.y.abs() < 0.05);
    }

    #[test]
    fn test_inverse_map_straight_ahead() {
        let ptg = forward_ptg();
        let (k, d) = ptg.inverse_map_ws2tp(2.0, 0.0).unwrap();
        assert_eq!(k, ptg.alpha_to_index(0.0));
        assert_relative_eq!(d, 2.0 / ptg.ref_distance(), epsilon = 1e-5);
    }

    #[test]
    fn test_inverse_map_behind_is_out_of_domain() {
        let ptg = forward_ptg();
        assert!(ptg.inverse_map_ws2tp(-2.0, 0.0).is_none());
    }

    #[test]
    fn test_backward_family_mirrors_domain() {
        let ptg = ArcPtg::new(ArcPtgConfig {
            k_dir: -1,
            ..Default::default()
        });
        assert!(ptg.inverse_map_ws2tp(-2.0, 0.0).is_some());
        assert!(ptg.inverse_map_ws2tp(2.0, 0.0).is_none());
    }

    #[test]
    fn test_path_pose_inverse_roundtrip() {
        let ptg = forward_ptg();
        let count = ptg.alpha_count();
        // Sample a few directions and distances across the family.
        for k in [10, count / 2, count / 2 + 7, count - 10] {
            for d in [0.2f32, 0.5, 0.8] {
                let dist = d * ptg.ref_distance();
                let Some(step) = ptg.path_step_for_dist(k, dist) else {
                    continue; // path shorter than ref distance (tight arc)
                };
                let pose = ptg.path_pose(k, step);
                let (k2, d2) = ptg
                    .inverse_map_ws2tp(pose.x, pose.y)
                    .expect("path point must be in domain");

                assert!(
                    (k2 as i32 - k as i32).abs() <= 1,
                    "k={} -> k2={} (d={})",
                    k,
                    k2,
                    d
                );
                let d_back = ptg.path_dist(k, step) / ptg.ref_distance();
                assert_relative_eq!(d2, d_back, epsilon = 0.02);
            }
        }
    }

    #[test]
    fn test_bijectivity_limits() {
        let ptg = forward_ptg();
        // Straight path: bijective everywhere in range.
        let k0 = ptg.alpha_to_index(0.0);
        assert!(ptg.is_bijective_at(k0, ptg.path_step_count(k0)));

        // Tightest arc: not bijective at its very end (half turn).
        let last = ptg.alpha_count() - 1;
        let end = ptg.path_step_count(last);
        assert!(!ptg.is_bijective_at(last, end + 10));
    }

    #[test]
    fn test_tp_obstacle_init_bounded_by_ref() {
        let ptg = forward_ptg();
        let mut obs = Vec::new();
        ptg.init_tp_obstacles(&mut obs);
        assert_eq!(obs.len(), ptg.alpha_count());
        for &d in &obs {
            assert!(d > 0.0 && d <= ptg.ref_distance() + 1e-4);
        }
    }

    #[test]
    fn test_motion_command_direction() {
        let ptg = forward_ptg();
        let left = ptg.direction_to_motion_command(ptg.alpha_count() - 1);
        match left {
            VelCmd::DiffDrive { v, w } => {
                assert!(v > 0.0);
                assert!(w > 0.0); // positive alpha turns left
            }
            _ => panic!("unexpected cmd kind"),
        }
    }
}
