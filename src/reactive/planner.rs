//! The per-iteration reactive decision pipeline.
//!
//! Each call to [`ReactivePlanner::step`] runs one control iteration:
//! obstacle sensing, optional delay compensation, one TP-Space view and
//! holonomic run per PTG, evaluation of the "keep last command"
//! continuation, multi-objective selection and command emission. Fatal
//! conditions (sensing or actuation failures) trigger an emergency stop
//! and are reported to the navigator through the returned error; they
//! never panic.

use std::time::Instant;

use crate::config::{NavigatorConfig, PlannerConfig};
use crate::core::math::angle_diff;
use crate::core::types::{Point2D, Pose2D, PoseHistory, PoseVelSample, Twist2D};
use crate::decider::{self, MotionDecider};
use crate::error::{NavError, Result};
use crate::holonomic::{self, HoloInput, HolonomicMethod};
use crate::interface::{ObstacleSource, RobotInterface, VelCmd};
use crate::logrecord::{LogRecord, LogWriter, PtgLogInfo};
use crate::ptg::{ClearanceDiagram, Ptg};
use crate::reactive::candidate::CandidateMovement;
use crate::reactive::filter::{ESTIM_LOWPASS_ALPHA, LowPassFilter};

/// Obstacle views older than this cannot back a reachability answer.
const MAX_INFO_AGE_FOR_REACHABILITY: f64 = 0.5;

/// Warn when a delay-model offset grows beyond this (seconds).
const MAX_SANE_DELAY_OFFSET: f64 = 1.25;

/// TP-Space view of one PTG for the current cycle.
#[derive(Debug, Clone, Default)]
pub(crate) struct PtgInfo {
    /// Whether the target maps into this PTG's domain.
    pub valid_tp: bool,
    /// Path index of the target.
    pub target_k: usize,
    /// Direction of the target path.
    pub target_alpha: f32,
    /// Normalized target distance in [0, 1].
    pub target_d_norm: f32,
    /// Target as a TP-Space point.
    pub tp_target: Point2D,
    /// Normalized obstacle-free distance per direction.
    pub tp_obstacles: Vec<f32>,
    /// Clearance diagram, when enabled.
    pub clearance: Option<ClearanceDiagram>,
}

/// Snapshot of the last successfully sent velocity command.
#[derive(Debug, Clone)]
struct SentCmd {
    ptg_index: usize,
    alpha_index: usize,
    tp_target_k: usize,
    pose_vel: PoseVelSample,
    time_sent: f64,
    colfree_dist_move_k: f64,
    speed_scale: f64,
}

/// Everything the navigator hands the planner for one iteration.
pub(crate) struct IterationInput<'a> {
    pub pose_vel: &'a PoseVelSample,
    pub target: Pose2D,
    pub target_is_intermediary: bool,
    pub restrict_ptg_indices: &'a [usize],
    pub history: &'a PoseHistory,
}

/// PTG-based reactive planner.
///
/// Owns the PTGs, one holonomic method instance per PTG, the motion
/// decider, the obstacle source, the delay estimators and the log
/// writer. The navigator drives it once per cycle while navigating.
pub struct ReactivePlanner {
    cfg: PlannerConfig,
    ptgs: Vec<Box<dyn Ptg>>,
    holo: Vec<Box<dyn HolonomicMethod>>,
    decider: Box<dyn MotionDecider>,
    obstacle_source: Box<dyn ObstacleSource>,

    ws_obstacles: Vec<Point2D>,
    ws_obstacles_time: Option<f64>,
    info_per_ptg: Vec<PtgInfo>,
    info_per_ptg_time: Option<f64>,

    last_sent_cmd: Option<SentCmd>,
    last_vel_cmd: Option<VelCmd>,
    last_target: Option<Pose2D>,
    ptgs_must_init: bool,

    mean_execution_period: LowPassFilter,
    mean_execution_time: LowPassFilter,
    tim_change_speed_avg: LowPassFilter,
    timoff_obstacles_avg: LowPassFilter,
    timoff_pose_vel_age_avg: LowPassFilter,
    timoff_send_vel_cmd_avg: LowPassFilter,
    prev_iter_start: Option<f64>,

    log_writer: Option<LogWriter>,
    keep_log_records: bool,
    last_log: Option<LogRecord>,
}

impl ReactivePlanner {
    /// Build the planner from configuration, the PTG set and the
    /// obstacle source. Fails on an empty PTG set or an unknown
    /// holonomic/decider name.
    pub fn new(
        cfg: &NavigatorConfig,
        ptgs: Vec<Box<dyn Ptg>>,
        obstacle_source: Box<dyn ObstacleSource>,
    ) -> Result<Self> {
        if ptgs.is_empty() {
            return Err(NavError::Config("At least one PTG is required".into()));
        }

        let holo = (0..ptgs.len())
            .map(|_| holonomic::create(&cfg.planner.holonomic_method, cfg))
            .collect::<Result<Vec<_>>>()?;
        let decider = decider::create(&cfg.planner.motion_decider_method, cfg)?;

        let log_writer = if cfg.planner.enable_log_file {
            Some(LogWriter::create_in(std::path::Path::new(
                &cfg.planner.log_directory,
            ))?)
        } else {
            None
        };

        Ok(Self {
            cfg: cfg.planner.clone(),
            ptgs,
            holo,
            decider,
            obstacle_source,
            ws_obstacles: Vec::new(),
            ws_obstacles_time: None,
            info_per_ptg: Vec::new(),
            info_per_ptg_time: None,
            last_sent_cmd: None,
            last_vel_cmd: None,
            last_target: None,
            ptgs_must_init: true,
            mean_execution_period: LowPassFilter::with_initial(ESTIM_LOWPASS_ALPHA, 0.1),
            mean_execution_time: LowPassFilter::with_initial(ESTIM_LOWPASS_ALPHA, 0.1),
            tim_change_speed_avg: LowPassFilter::new(ESTIM_LOWPASS_ALPHA),
            timoff_obstacles_avg: LowPassFilter::new(ESTIM_LOWPASS_ALPHA),
            timoff_pose_vel_age_avg: LowPassFilter::new(ESTIM_LOWPASS_ALPHA),
            timoff_send_vel_cmd_avg: LowPassFilter::new(ESTIM_LOWPASS_ALPHA),
            prev_iter_start: None,
            log_writer,
            keep_log_records: false,
            last_log: None,
        })
    }

    /// Number of PTGs.
    pub fn ptg_count(&self) -> usize {
        self.ptgs.len()
    }

    /// Keep a copy of every record even when file logging is off.
    pub fn set_keep_log_records(&mut self, keep: bool) {
        self.keep_log_records = keep;
    }

    /// Copy of the most recent log record, if any.
    pub fn last_log_record(&self) -> Option<LogRecord> {
        self.last_log.clone()
    }

    /// Reset per-navigation state. Called when a new navigation starts.
    pub(crate) fn on_start_new_navigation(&mut self) {
        self.last_sent_cmd = None;
    }

    /// Forget the last sent command (e.g. after a cancel stop).
    pub(crate) fn clear_last_sent_cmd(&mut self) {
        self.last_sent_cmd = None;
    }

    /// Whether a point relative to the robot is reachable through a
    /// direct collision-free PTG path, judged on the TP-Space views of
    /// the latest iteration. Stale views (older than 0.5 s) answer no.
    pub(crate) fn waypoint_is_reachable(&self, wp_local: Point2D, now: f64) -> bool {
        let n = self.ptgs.len();
        if self.info_per_ptg.len() < n {
            return false;
        }
        match self.info_per_ptg_time {
            Some(t) if now - t <= MAX_INFO_AGE_FOR_REACHABILITY => {}
            _ => return false,
        }

        for (ptg, info) in self.ptgs.iter().zip(&self.info_per_ptg) {
            if info.tp_obstacles.len() != ptg.alpha_count() {
                continue; // PTG not evaluated this cycle (target out of domain, ...)
            }
            if let Some((k, d_norm)) = ptg.inverse_map_ws2tp(wp_local.x, wp_local.y)
                && f64::from(info.tp_obstacles[k]) > 1.01 * f64::from(d_norm)
            {
                return true;
            }
        }
        false
    }

    /// Emergency stop plus error logging; the caller transitions the
    /// state machine.
    fn do_emergency_stop(&mut self, robot: &dyn RobotInterface, msg: &str) {
        if !robot.stop(true) {
            log::error!("Emergency stop request failed");
        }
        self.last_sent_cmd = None;
        log::error!("{}", msg);
    }

    /// Write a minimal record for an iteration aborted before the
    /// decision pipeline could run (e.g. pose read failure).
    pub(crate) fn log_aborted_iteration(&mut self, robot: &dyn RobotInterface, msg: &str) {
        let n = self.ptgs.len();
        let mut rec = LogRecord {
            n_ptgs: n,
            info_per_ptg: vec![PtgLogInfo::default(); n + 1],
            selected_ptg: -1,
            cmd_vel: Some(robot.get_emergency_stop_cmd()),
            ..Default::default()
        };
        rec.additional_debug_msgs
            .insert("abort".into(), msg.to_string());
        rec.timestamps
            .insert("tim_start_iteration".into(), robot.get_navigation_time());
        self.write_record(rec);
    }

    fn write_record(&mut self, rec: LogRecord) {
        if let Some(writer) = &mut self.log_writer
            && let Err(e) = writer.write_record(&rec)
        {
            log::error!("Failed to write navigation log record: {}", e);
        }
        if self.keep_log_records || self.log_writer.is_some() {
            self.last_log = Some(rec);
        }
    }

    /// Fill the record fields shared by every exit path and write it.
    fn finalize_record(
        &mut self,
        mut rec: LogRecord,
        pose_vel: &PoseVelSample,
        rel_target: Point2D,
        execution_time: f64,
        tim_change_speed: f64,
    ) {
        rec.robot_pose = pose_vel.pose;
        rec.cur_vel = pose_vel.vel_global;
        rec.cur_vel_local = pose_vel.vel_local;
        rec.ws_target_relative = rel_target;
        rec.ws_obstacles = self.ws_obstacles.clone();

        rec.values.insert(
            "estimatedExecutionPeriod".into(),
            self.mean_execution_period.last(),
        );
        rec.values.insert("executionTime".into(), execution_time);
        rec.values
            .insert("executionTime_avr".into(), self.mean_execution_time.last());
        rec.values
            .insert("time_changeSpeeds()".into(), tim_change_speed);
        rec.values.insert(
            "time_changeSpeeds()_avr".into(),
            self.tim_change_speed_avg.last(),
        );

        if let Some(last) = &self.last_sent_cmd {
            rec.ptg_last_k_nop = last.alpha_index;
            rec.ptg_last_vel_local = last.pose_vel.vel_local;
            rec.values
                .insert("last_cmd_tp_target_k".into(), last.tp_target_k as f64);
        }

        self.write_record(rec);
    }

    /// Run one reactive iteration.
    ///
    /// On a fatal failure the robot has already been emergency-stopped
    /// and a log record written; the returned error tells the navigator
    /// to transition to its error state.
    pub(crate) fn step(
        &mut self,
        robot: &dyn RobotInterface,
        input: IterationInput<'_>,
    ) -> Result<()> {
        let n_ptgs = self.ptgs.len();
        let tim_start = robot.get_navigation_time();

        let mut rec = LogRecord {
            n_ptgs,
            info_per_ptg: vec![PtgLogInfo::default(); n_ptgs + 1],
            selected_ptg: -1,
            ptg_index_nop: -1,
            ..Default::default()
        };
        rec.timestamps
            .insert("tim_start_iteration".into(), tim_start);
        rec.timestamps
            .insert("curPoseAndVel".into(), input.pose_vel.time);

        // P1: a changed target invalidates the continuation option.
        let target_changed = self.last_target != Some(input.target);
        self.last_target = Some(input.target);

        // P2: idempotent PTG initialization.
        if self.ptgs_must_init {
            for ptg in &mut self.ptgs {
                ptg.initialize();
            }
            self.ptgs_must_init = false;
        }

        // P3: kinematic state update.
        for ptg in &mut self.ptgs {
            ptg.update_current_robot_vel(&input.pose_vel.vel_local);
        }

        // P4: obstacle sensing.
        match self.obstacle_source.sense() {
            Ok(obs) => {
                self.ws_obstacles = obs.data;
                self.ws_obstacles_time = Some(obs.time);
                if self.cfg.enable_obstacle_filtering {
                    filter_obstacles(&mut self.ws_obstacles);
                }
            }
            Err(e) => {
                let msg = format!("Error sensing obstacles: {}", e);
                self.do_emergency_stop(robot, &msg);
                rec.cmd_vel = Some(robot.get_emergency_stop_cmd());
                rec.additional_debug_msgs.insert("abort".into(), msg.clone());
                self.finalize_record(rec, input.pose_vel, Point2D::default(), 0.0, 0.0);
                return Err(NavError::Robot(msg));
            }
        }

        // P5: delay compensation.
        let mut rel_pose_sense = Pose2D::identity();
        let mut rel_pose_vel_cmd = Pose2D::identity();
        if self.cfg.use_delays_model {
            let timoff_obstacles = tim_start - self.ws_obstacles_time.unwrap_or(tim_start);
            self.timoff_obstacles_avg.filter(timoff_obstacles);
            rec.values
                .insert("timoff_obstacles".into(), timoff_obstacles);
            rec.values.insert(
                "timoff_obstacles_avr".into(),
                self.timoff_obstacles_avg.last(),
            );
            if let Some(t) = self.ws_obstacles_time {
                rec.timestamps.insert("obstacles".into(), t);
            }

            let timoff_pose_age = tim_start - input.pose_vel.time;
            self.timoff_pose_vel_age_avg.filter(timoff_pose_age);
            rec.values
                .insert("timoff_curPoseVelAge".into(), timoff_pose_age);
            rec.values.insert(
                "timoff_curPoseVelAge_avr".into(),
                self.timoff_pose_vel_age_avg.last(),
            );

            let timoff_pose2sense = timoff_obstacles - timoff_pose_age;
            let timoff_pose2velcmd = self.timoff_send_vel_cmd_avg.last()
                + 0.5 * self.tim_change_speed_avg.last()
                - timoff_pose_age;
            rec.values
                .insert("timoff_pose2sense".into(), timoff_pose2sense);
            rec.values
                .insert("timoff_pose2VelCmd".into(), timoff_pose2velcmd);

            if timoff_pose2sense.abs() > MAX_SANE_DELAY_OFFSET {
                log::warn!(
                    "timoff_pose2sense={:.3} is too large; path extrapolation may be inaccurate",
                    timoff_pose2sense
                );
            }
            if timoff_pose2velcmd.abs() > MAX_SANE_DELAY_OFFSET {
                log::warn!(
                    "timoff_pose2VelCmd={:.3} is too large; path extrapolation may be inaccurate",
                    timoff_pose2velcmd
                );
            }

            rel_pose_sense = extrapolate_pose_increment(&input.pose_vel.vel_local, timoff_pose2sense);
            rel_pose_vel_cmd =
                extrapolate_pose_increment(&input.pose_vel.vel_local, timoff_pose2velcmd);
        }
        rec.rel_pose_sense = rel_pose_sense;
        rec.rel_pose_vel_cmd = rel_pose_vel_cmd;

        // Planning origin: where the robot will be when the command
        // lands, expressed in the frame the obstacles were sensed in.
        let rel_pose_ptg_origin = rel_pose_vel_cmd.relative_to(&rel_pose_sense);
        let rel_target = input
            .target
            .relative_to(&input.pose_vel.pose.compose(&rel_pose_vel_cmd));

        self.info_per_ptg = vec![PtgInfo::default(); n_ptgs + 1];
        self.info_per_ptg_time = Some(tim_start);
        let mut candidates: Vec<CandidateMovement> =
            (0..=n_ptgs).map(|_| CandidateMovement::infeasible()).collect();

        // P6: one candidate per PTG.
        for i in 0..n_ptgs {
            let restricted = !input.restrict_ptg_indices.is_empty()
                && !input.restrict_ptg_indices.contains(&i);
            let ctx = CandidateCtx {
                cfg: &self.cfg,
                last_sent: self.last_sent_cmd.as_ref(),
                last_vel_cmd: self.last_vel_cmd.as_ref(),
                rel_target,
                rel_pose_ptg_origin,
                is_continuation: false,
                rel_cur_pose_nop: Pose2D::identity(),
                cur_pose: input.pose_vel.pose,
                cur_vel_local: input.pose_vel.vel_local,
                tim_start,
                now: robot.get_navigation_time(),
                intermediary: input.target_is_intermediary,
                slot_index: i,
                ptg_index: i,
                restricted,
                ws_obstacles: &self.ws_obstacles,
            };
            build_movement_candidate(
                &*self.ptgs[i],
                &mut *self.holo[i],
                &ctx,
                &mut self.info_per_ptg[i],
                &mut candidates[i],
                &mut rec,
            );
        }

        // P7: the continuation ("keep last command") candidate.
        let mut nop_state: Option<(usize, Pose2D, Pose2D)> = None;
        if let Some(last) = &self.last_sent_cmd
            && !target_changed
            && self.ptgs[last.ptg_index].supports_nop_cmd()
        {
            let nop_age = tim_start - last.time_sent;
            let nop_max = self.ptgs[last.ptg_index].max_time_in_nop_cmd(last.alpha_index);
            if nop_age < nop_max {
                nop_state = Some((last.ptg_index, Pose2D::identity(), Pose2D::identity()));
            } else {
                rec.additional_debug_msgs.insert(
                    "PTG_cont".into(),
                    format!(
                        "PTG-continuation not allowed: previous command timed-out (At={:.3} > Max_At={:.3})",
                        nop_age, nop_max
                    ),
                );
            }
        }

        if let Some((nop_ptg_index, _, _)) = nop_state {
            let last = self.last_sent_cmd.clone().expect("checked above");
            let t_send_corrected = last.time_sent + self.tim_change_speed_avg.last();

            match input.history.interpolate(t_send_corrected) {
                Some(pose_at_send) => {
                    // The continuation is judged with the kinematic state
                    // the PTG had when the command was issued.
                    self.ptgs[nop_ptg_index].update_current_robot_vel(&last.pose_vel.vel_local);

                    let rel_target_nop = input.target.relative_to(&pose_at_send);
                    let rel_pose_ptg_origin_nop =
                        pose_at_send.relative_to(&input.pose_vel.pose.compose(&rel_pose_sense));
                    let rel_cur_pose_nop = input.pose_vel.pose.relative_to(&pose_at_send);
                    nop_state = Some((nop_ptg_index, rel_cur_pose_nop, rel_pose_ptg_origin_nop));

                    rec.additional_debug_msgs.insert(
                        "robot_pose_at_send_cmd".into(),
                        format!(
                            "({:.3}, {:.3}, {:.3})",
                            pose_at_send.x, pose_at_send.y, pose_at_send.theta
                        ),
                    );

                    let ctx = CandidateCtx {
                        cfg: &self.cfg,
                        last_sent: Some(&last),
                        last_vel_cmd: self.last_vel_cmd.as_ref(),
                        rel_target: rel_target_nop,
                        rel_pose_ptg_origin: rel_pose_ptg_origin_nop,
                        is_continuation: true,
                        rel_cur_pose_nop,
                        cur_pose: input.pose_vel.pose,
                        cur_vel_local: input.pose_vel.vel_local,
                        tim_start,
                        now: robot.get_navigation_time(),
                        intermediary: input.target_is_intermediary,
                        slot_index: n_ptgs,
                        ptg_index: nop_ptg_index,
                        restricted: false,
                        ws_obstacles: &self.ws_obstacles,
                    };
                    build_movement_candidate(
                        &*self.ptgs[nop_ptg_index],
                        &mut *self.holo[nop_ptg_index],
                        &ctx,
                        &mut self.info_per_ptg[n_ptgs],
                        &mut candidates[n_ptgs],
                        &mut rec,
                    );
                }
                None => {
                    // Can't interpolate the pose at send time.
                    candidates[n_ptgs].invalidate();
                    rec.additional_debug_msgs.insert(
                        "PTG_cont".into(),
                        "PTG-continuation not allowed: cannot interpolate robot pose at last send time"
                            .into(),
                    );
                }
            }
        }
        if let Some((_, rel_cur_pose_nop, rel_pose_ptg_origin_nop)) = nop_state {
            rec.rel_cur_pose_nop = rel_cur_pose_nop;
            rec.rel_pose_ptg_origin_nop = rel_pose_ptg_origin_nop;
        }

        // P8: multi-objective selection.
        let (best, evaluations) = self.decider.decide(&candidates);
        for (slot, eval) in evaluations.iter().enumerate() {
            if let Some(info) = rec.info_per_ptg.get_mut(slot) {
                info.evaluation = *eval;
            }
        }
        rec.selected_ptg = best.map(|b| b as i32).unwrap_or(-1);
        let best_is_nop = best == Some(n_ptgs);

        // P9: command emission.
        let mut tim_change_speed = 0.0;
        if best_is_nop {
            rec.cmd_is_nop = true;
            rec.ptg_index_nop = self
                .last_sent_cmd
                .as_ref()
                .map(|c| c.ptg_index as i32)
                .unwrap_or(-1);
            if !robot.change_speeds_nop() {
                let msg = "Error in change_speeds_nop(), stopping robot".to_string();
                self.do_emergency_stop(robot, &msg);
                rec.cmd_vel = Some(robot.get_emergency_stop_cmd());
                self.finalize_record(rec, input.pose_vel, rel_target.point(), 0.0, 0.0);
                return Err(NavError::Robot(msg));
            }
            // The previously sent command stays in force untouched.
        } else {
            let new_cmd = best.map(|b| self.generate_vel_cmd(&candidates[b]));

            match new_cmd {
                Some((cmd, eff_scale)) if !cmd.is_stop() => {
                    let b = best.expect("candidate exists");
                    let tim_send = robot.get_navigation_time();
                    rec.timestamps.insert("tim_send_cmd_vel".into(), tim_send);

                    if !robot.change_speeds(&cmd) {
                        let msg = "Error in change_speeds(), stopping robot".to_string();
                        self.do_emergency_stop(robot, &msg);
                        rec.cmd_vel = Some(robot.get_emergency_stop_cmd());
                        self.finalize_record(rec, input.pose_vel, rel_target.point(), 0.0, 0.0);
                        return Err(NavError::Robot(msg));
                    }

                    tim_change_speed = robot.get_navigation_time() - tim_send;
                    self.tim_change_speed_avg.filter(tim_change_speed);

                    let info = &self.info_per_ptg[b];
                    let alpha_index = self.ptgs[b].alpha_to_index(candidates[b].direction);
                    self.last_sent_cmd = Some(SentCmd {
                        ptg_index: b,
                        alpha_index,
                        tp_target_k: info.target_k,
                        pose_vel: *input.pose_vel,
                        time_sent: tim_send,
                        colfree_dist_move_k: info
                            .tp_obstacles
                            .get(alpha_index)
                            .map(|&v| f64::from(v))
                            .unwrap_or(0.0),
                        speed_scale: eff_scale,
                    });

                    let timoff_send = tim_send - tim_start;
                    self.timoff_send_vel_cmd_avg.filter(timoff_send);
                    rec.values.insert("timoff_sendVelCmd".into(), timoff_send);
                    rec.values.insert(
                        "timoff_sendVelCmd_avr".into(),
                        self.timoff_send_vel_cmd_avg.last(),
                    );
                    rec.cmd_vel = Some(cmd);
                }
                _ => {
                    // No viable candidate, or the command reduces to a
                    // stop: security pause. The robot halts but the
                    // navigation stays active.
                    log::debug!("Best velocity command is STOP (no way found), stopping robot");
                    if !robot.stop(true) {
                        log::error!("stop() request failed during security pause");
                    }
                    rec.cmd_vel = Some(robot.get_emergency_stop_cmd());
                    self.last_sent_cmd = None;
                }
            }
        }

        // P10: statistics and bookkeeping.
        let execution_time = robot.get_navigation_time() - tim_start;
        self.mean_execution_time.filter(execution_time);

        if let Some(prev_start) = self.prev_iter_start {
            let period = tim_start - prev_start;
            if period > 1.5 * self.mean_execution_period.last() {
                log::warn!(
                    "Timing warning: execution period {:.1} ms is far above the average of {:.1} ms",
                    period * 1e3,
                    self.mean_execution_period.last() * 1e3
                );
            }
            self.mean_execution_period.filter(period);
        }
        self.prev_iter_start = Some(tim_start);

        self.finalize_record(
            rec,
            input.pose_vel,
            rel_target.point(),
            execution_time,
            tim_change_speed,
        );
        Ok(())
    }

    /// Turn the selected candidate into a concrete velocity command:
    /// canonical PTG command, scaled by the candidate speed, β-blended
    /// with the previous command and clipped to the absolute limits
    /// (in that order).
    ///
    /// `Δt` in `β = Δt / (Δt + τ)` is the EMA of the execution period,
    /// matching the rolling estimate used for the delay model.
    fn generate_vel_cmd(&mut self, cm: &CandidateMovement) -> (VelCmd, f64) {
        let ptg = &self.ptgs[cm.ptg_index.expect("selected candidate has a PTG")];

        if cm.speed <= 0.0 {
            let stop = ptg.direction_to_motion_command(0).to_stop();
            self.last_vel_cmd = Some(stop);
            return (stop, 1.0);
        }

        let k = ptg.alpha_to_index(cm.direction);
        let raw = ptg.direction_to_motion_command(k).scaled(cm.speed as f32);

        let beta = if self.cfg.speedfilter_tau > 0.0 {
            let dt = self.mean_execution_period.last();
            dt / (dt + self.cfg.speedfilter_tau)
        } else {
            1.0
        };

        let (cmd, residual_scale) = raw.blend_and_limit(
            self.last_vel_cmd.as_ref(),
            beta,
            &self.cfg.robot_absolute_speed_limits,
        );
        self.last_vel_cmd = Some(cmd);

        (cmd, cm.speed * residual_scale)
    }
}

/// Context shared by the regular and the continuation candidate builds.
struct CandidateCtx<'a> {
    cfg: &'a PlannerConfig,
    last_sent: Option<&'a SentCmd>,
    last_vel_cmd: Option<&'a VelCmd>,
    rel_target: Pose2D,
    rel_pose_ptg_origin: Pose2D,
    is_continuation: bool,
    rel_cur_pose_nop: Pose2D,
    cur_pose: Pose2D,
    cur_vel_local: Twist2D,
    tim_start: f64,
    now: f64,
    intermediary: bool,
    slot_index: usize,
    ptg_index: usize,
    restricted: bool,
    ws_obstacles: &'a [Point2D],
}

/// Build one movement candidate: TP-Space view, holonomic run (or the
/// fixed continuation direction), security ramp and scoring.
fn build_movement_candidate(
    ptg: &dyn Ptg,
    holo: &mut dyn HolonomicMethod,
    ctx: &CandidateCtx<'_>,
    info: &mut PtgInfo,
    cm: &mut CandidateMovement,
    rec: &mut LogRecord,
) {
    cm.ptg_index = Some(ctx.ptg_index);

    rec.info_per_ptg[ctx.slot_index].ptg_desc = if ctx.is_continuation {
        format!("NOP continuation (prev PTG idx={})", ctx.ptg_index)
    } else {
        ptg.description()
    };

    // Validity: per-request PTG restriction, then target-in-domain.
    info.valid_tp = !ctx.restricted;
    if info.valid_tp {
        match ptg.inverse_map_ws2tp(ctx.rel_target.x, ctx.rel_target.y) {
            Some((k, d_norm)) => {
                info.target_k = k;
                info.target_d_norm = d_norm;
            }
            None => info.valid_tp = false,
        }
    }
    if !info.valid_tp {
        cm.invalidate();
        rec.additional_debug_msgs.insert(
            format!("mov_candidate_{}", ctx.slot_index),
            "PTG discarded since target is out of domain.".into(),
        );
        return;
    }

    info.target_alpha = ptg.index_to_alpha(info.target_k);
    info.tp_target = Point2D::new(
        info.target_alpha.cos() * info.target_d_norm,
        info.target_alpha.sin() * info.target_d_norm,
    );

    // Workspace obstacles into TP-Space, then normalize to [0, 1].
    let transform_start = Instant::now();
    ptg.init_tp_obstacles(&mut info.tp_obstacles);
    let mut clearance = if ctx.cfg.evaluate_clearance {
        let mut cd = ClearanceDiagram::empty();
        ptg.init_clearance_diagram(&mut cd);
        Some(cd)
    } else {
        None
    };

    let origin_inv = ctx.rel_pose_ptg_origin.inverse();
    let ref_dist = ptg.ref_distance();
    for p in ctx.ws_obstacles {
        let q = origin_inv.transform_point(p);
        if let Some((k, d_norm)) = ptg.inverse_map_ws2tp(q.x, q.y) {
            let d_m = d_norm * ref_dist;
            if d_m < info.tp_obstacles[k] {
                info.tp_obstacles[k] = d_m;
            }
            if let Some(cd) = clearance.as_mut() {
                update_clearance_from_obstacle(ptg, cd, k, d_norm);
            }
        }
    }
    let inv_ref = 1.0 / ref_dist;
    for v in &mut info.tp_obstacles {
        *v = (*v * inv_ref).clamp(0.0, 1.0);
    }
    if let Some(cd) = clearance.as_mut() {
        ptg.update_clearance_post(cd, &info.tp_obstacles);
    }
    let time_tp_transform = transform_start.elapsed().as_secs_f64();

    // Holonomic run, or the fixed direction of the continuation.
    let mut holo_log = None;
    let mut time_holonomic = 0.0;
    if !ctx.is_continuation {
        let holo_start = Instant::now();

        // Keep full speed through intermediary waypoints.
        holo.enable_approach_target_slowdown(!ctx.intermediary);

        let out = holo.navigate(&HoloInput {
            obstacles: &info.tp_obstacles,
            target: info.tp_target,
            clearance: clearance.as_ref(),
            max_obstacle_dist: 1.0,
            max_robot_speed: 1.0,
        });
        cm.direction = out.desired_direction;
        cm.speed = out.desired_speed;
        holo_log = Some(out.log);

        // Security slowdown ramp: never drive through an obstacle.
        let k_dir = ptg.alpha_to_index(cm.direction);
        let mut obs_free = f64::from(info.tp_obstacles[k_dir]);

        // Account for the distance covered during future continuation
        // iterations, to slow down accordingly *now*.
        if ptg.supports_nop_cmd() {
            let v = f64::from(ctx.cur_vel_local.linear_norm());
            let lookahead = v * ptg.max_time_in_nop_cmd(k_dir) / f64::from(ref_dist);
            obs_free = obs_free.min((obs_free - lookahead).max(0.90));
        }

        let s0 = f64::from(ctx.cfg.secure_distance_start);
        let s1 = f64::from(ctx.cfg.secure_distance_end);
        let vel_scale = if obs_free >= s1 {
            1.0
        } else if obs_free <= s0 {
            0.0
        } else {
            (obs_free - s0) / (s1 - s0)
        };
        cm.speed *= vel_scale;

        time_holonomic = holo_start.elapsed().as_secs_f64();
    } else {
        let last = ctx.last_sent.expect("continuation implies a sent command");
        cm.direction = ptg.index_to_alpha(last.alpha_index);
        cm.speed = 1.0;
    }

    calc_move_candidate_scores(ptg, ctx, info, clearance.as_ref(), cm, rec);

    cm.set_prop(
        "original_col_free_dist",
        if ctx.is_continuation {
            ctx.last_sent.map(|l| l.colfree_dist_move_k).unwrap_or(0.0)
        } else {
            0.0
        },
    );

    info.clearance = clearance;

    // Log slot.
    let slot = &mut rec.info_per_ptg[ctx.slot_index];
    slot.tp_obstacles = info.tp_obstacles.clone();
    slot.tp_target = info.tp_target;
    slot.clearance = info.clearance.clone();
    slot.holo_log = holo_log;
    slot.desired_direction = cm.direction;
    slot.desired_speed = cm.speed;
    slot.time_tp_transform = time_tp_transform;
    slot.time_holonomic = time_holonomic;
    slot.eval_factors = cm.props.clone();
}

/// Compute the scoring properties of a candidate.
fn calc_move_candidate_scores(
    ptg: &dyn Ptg,
    ctx: &CandidateCtx<'_>,
    info: &PtgInfo,
    clearance: Option<&ClearanceDiagram>,
    cm: &mut CandidateMovement,
    rec: &mut LogRecord,
) {
    let ref_dist = f64::from(ptg.ref_distance());
    let tp_target = info.tp_target;
    let target_dir = if tp_target.x != 0.0 || tp_target.y != 0.0 {
        tp_target.y.atan2(tp_target.x)
    } else {
        0.0
    };
    let target_k = ptg.alpha_to_index(target_dir);
    let target_d_norm = f64::from(tp_target.norm());
    let move_k = ptg.alpha_to_index(cm.direction);
    let obstacles = &info.tp_obstacles;

    // End pose of the chosen trajectory. Clamp just short of the target
    // distance so curved paths don't evaluate "past" the target.
    let d = f64::from(obstacles[move_k]).min(0.99 * target_d_norm);
    let n_step = ptg
        .path_step_for_dist(move_k, (d * ref_dist) as f32)
        .unwrap_or_else(|| ptg.path_step_count(move_k));
    let end_pose = ptg.path_pose(move_k, n_step);

    cm.set_prop("ptg_idx", ctx.ptg_index as f64);
    cm.set_prop("ref_dist", ref_dist);
    cm.set_prop("target_dir", f64::from(target_dir));
    cm.set_prop("target_k", target_k as f64);
    cm.set_prop("target_d_norm", target_d_norm);
    cm.set_prop("move_k", move_k as f64);
    cm.set_prop("is_PTG_cont", if ctx.is_continuation { 1.0 } else { 0.0 });
    cm.set_prop("num_paths", obstacles.len() as f64);
    cm.set_prop("WS_target_x", f64::from(ctx.rel_target.x));
    cm.set_prop("WS_target_y", f64::from(ctx.rel_target.y));
    cm.set_prop("robpose_x", f64::from(end_pose.x));
    cm.set_prop("robpose_y", f64::from(end_pose.y));
    cm.set_prop("robpose_phi", f64::from(end_pose.theta));
    cm.set_prop(
        "ptg_priority",
        ptg.score_priority() * ptg.eval_path_relative_priority(target_k, target_d_norm as f32),
    );

    // Factor: collision-free distance along the chosen direction. When
    // heading straight at the target with the path to it clear, the
    // obstacles past the target don't count against the candidate.
    let mut colfree = if move_k == target_k
        && target_d_norm > 0.0
        && f64::from(obstacles[move_k]) > target_d_norm + 0.05
    {
        (f64::from(obstacles[move_k]) / (target_d_norm + 0.05)).clamp(0.0, 1.0)
    } else {
        f64::from(obstacles[move_k])
    };

    // Continuation candidates only count the free space *past* the
    // robot's current position along the path, which is no longer at
    // the TP-Space origin.
    if ctx.is_continuation
        && !eval_continuation_colfree(ptg, ctx, info, cm, rec, move_k, &mut colfree)
    {
        return; // candidate invalidated inside
    }

    cm.set_prop("colision_free_distance", colfree);

    cm.set_prop(
        "dist_eucl_final",
        f64::from(
            ((ctx.rel_target.x - end_pose.x).powi(2) + (ctx.rel_target.y - end_pose.y).powi(2))
                .sqrt(),
        ),
    );

    // Factor: hysteresis. PTGs that support continuations score it as
    // "is this the continuation"; otherwise by command similarity.
    let mut hysteresis = 0.0;
    if ptg.supports_nop_cmd() {
        hysteresis = if ctx.is_continuation { 1.0 } else { 0.0 };
    } else if let Some(last_cmd) = ctx.last_vel_cmd {
        let desired = ptg.direction_to_motion_command(move_k);
        if desired.same_kind(last_cmd) {
            let mut simil: f64 = 0.5;
            for (a, b) in desired.components().iter().zip(last_cmd.components()) {
                simil = simil.min((-f64::from((a - b).abs()) / 0.20).exp());
            }
            hysteresis = simil;
        }
    }
    cm.set_prop("hysteresis", hysteresis);

    let clearance_val = clearance
        .map(|cd| cd.get(move_k, (1.01 * target_d_norm) as f32))
        .unwrap_or(1.0);
    cm.set_prop("clearance", clearance_val);

    // Factor: ETA to the target point (or closest obstacle, whichever
    // comes first). Continuations discount the time already executed.
    let mut eta = 0.0;
    if cm.speed > 0.0
        && let Some(target_step) = ptg.path_step_for_dist(move_k, (d * ref_dist) as f32)
    {
        eta = ptg.path_step_duration() * target_step as f64 * cm.speed;
        if ctx.is_continuation
            && let Some(last) = ctx.last_sent
        {
            eta -= ctx.tim_start - last.time_sent;
        }
    }
    cm.set_prop("eta", eta);
}

/// Continuation-specific collision-free distance: locate the robot in
/// TP-Space (time-based for short displacements, inverse-map plus
/// bijectivity checks otherwise), verify the predicted path matches the
/// real one, and reduce the free distance by the progress already made.
///
/// Returns false when the continuation was invalidated.
fn eval_continuation_colfree(
    ptg: &dyn Ptg,
    ctx: &CandidateCtx<'_>,
    info: &PtgInfo,
    cm: &mut CandidateMovement,
    rec: &mut LogRecord,
    move_k: usize,
    colfree: &mut f64,
) -> bool {
    let last = ctx.last_sent.expect("continuation implies a sent command");
    let ref_dist = ptg.ref_distance();
    let rel = ctx.rel_cur_pose_nop;
    let obstacles = &info.tp_obstacles;

    let mut cur_k;
    let mut cur_norm_d: f64;
    let mut ws_point_is_unique = true;
    let max_d = ctx.cfg.max_dist_for_timebased_path_prediction;
    let is_time_based = rel.x.abs() <= max_d && rel.y.abs() <= max_d;

    if is_time_based {
        // Where the robot should be by now, by elapsed time alone.
        let nop_elapsed = last.speed_scale * (ctx.tim_start - last.time_sent);
        rec.additional_debug_msgs
            .insert("PTG_eval.NOP_At".into(), format!("{:.6} s", nop_elapsed));
        cur_k = move_k;
        let cur_step = ((nop_elapsed / ptg.path_step_duration()).round() as usize)
            .min(ptg.path_step_count(cur_k));
        cur_norm_d = f64::from(ptg.path_dist(cur_k, cur_step) / ref_dist);
    } else {
        match ptg.inverse_map_ws2tp(rel.x, rel.y) {
            Some((k, d_norm)) => {
                cur_k = k;
                cur_norm_d = f64::from(d_norm);
            }
            None => {
                cm.invalidate();
                rec.additional_debug_msgs.insert(
                    "PTG_eval".into(),
                    "PTG-continuation not allowed, cur. pose out of PTG domain.".into(),
                );
                return false;
            }
        }

        match ptg.path_step_for_dist(last.alpha_index, cur_norm_d as f32 * ref_dist) {
            Some(step) => {
                let mut cur_step = step;

                // The continuation direction can only be trusted where
                // the TP-Space point has a unique workspace preimage,
                // both at the located step and the time-predicted one.
                ws_point_is_unique = ptg.is_bijective_at(cur_k, cur_step);
                let predicted_step = (((ctx.now - last.time_sent) / ptg.path_step_duration())
                    .round() as usize)
                    .min(ptg.path_step_count(move_k));
                ws_point_is_unique =
                    ws_point_is_unique && ptg.is_bijective_at(move_k, predicted_step);
                rec.additional_debug_msgs.insert(
                    "PTG_eval.bijective".into(),
                    format!(
                        "isBijectiveAt(): k={} step={} -> {}",
                        cur_k,
                        cur_step,
                        if ws_point_is_unique { "yes" } else { "no" }
                    ),
                );

                if !ws_point_is_unique {
                    // Fall back to the originally commanded direction.
                    cur_k = move_k;
                    cur_step = predicted_step;
                    cur_norm_d = f64::from(ptg.path_dist(cur_k, cur_step) / ref_dist);
                }

                let predicted_rel = ptg.path_pose(last.alpha_index, cur_step);
                let predicted_global = last.pose_vel.pose.compose(&predicted_rel);
                let mismatch = predicted_global.distance_2d(ctx.cur_pose.x, ctx.cur_pose.y);
                rec.additional_debug_msgs.insert(
                    "PTG_eval.PTGcont".into(),
                    format!("mismatchDistance={:.3} cm", 1e2 * mismatch),
                );

                if mismatch > ctx.cfg.max_distance_predicted_actual_path {
                    cm.invalidate();
                    rec.additional_debug_msgs.insert(
                        "PTG_eval".into(),
                        "PTG-continuation not allowed, mismatchDistance above threshold.".into(),
                    );
                    return false;
                }
            }
            None => {
                cm.invalidate();
                rec.additional_debug_msgs.insert(
                    "PTG_eval".into(),
                    "PTG-continuation not allowed, couldn't get PTG step for cur. robot pose."
                        .into(),
                );
                return false;
            }
        }
    }

    // Record where the robot sits in TP-Space for this continuation.
    let cur_alpha = ptg.index_to_alpha(cur_k);
    rec.info_per_ptg[ctx.slot_index].tp_robot = Point2D::new(
        cur_alpha.cos() * cur_norm_d as f32,
        cur_alpha.sin() * cur_norm_d as f32,
    );

    // Path following isn't perfect: the robot may sit on `cur_k` rather
    // than the commanded `move_k`; take the least favorable of the two
    // when the mapping was unique.
    *colfree = if ws_point_is_unique {
        f64::from(obstacles[move_k].min(obstacles[cur_k]))
    } else {
        f64::from(obstacles[move_k])
    };

    // Discount the progress already made, unless the "obstacle" is just
    // the reference-distance truncation of the path.
    if *colfree < 0.99 {
        *colfree -= cur_norm_d;
    }

    true
}

/// Linear twist integration: relative pose increment after `dt` seconds
/// at the given body-frame velocity.
fn extrapolate_pose_increment(vel_local: &Twist2D, dt: f64) -> Pose2D {
    let dt = dt as f32;
    Pose2D::new(vel_local.vx * dt, vel_local.vy * dt, vel_local.omega * dt)
}

/// Obstacle cloud filter: drop duplicate points on a 1 cm grid, keeping
/// the transform cost bounded on dense sensors.
fn filter_obstacles(points: &mut Vec<Point2D>) {
    const GRID: f32 = 0.01;
    points.sort_by(|a, b| {
        let ka = ((a.x / GRID) as i32, (a.y / GRID) as i32);
        let kb = ((b.x / GRID) as i32, (b.y / GRID) as i32);
        ka.cmp(&kb)
    });
    points.dedup_by(|a, b| {
        (a.x / GRID) as i32 == (b.x / GRID) as i32 && (a.y / GRID) as i32 == (b.y / GRID) as i32
    });
}

/// Record an obstacle's lateral headroom into the clearance diagram of
/// every nearby direction.
fn update_clearance_from_obstacle(
    ptg: &dyn Ptg,
    cd: &mut ClearanceDiagram,
    obs_k: usize,
    obs_d_norm: f32,
) {
    let alpha_obs = ptg.index_to_alpha(obs_k);
    for k in 0..ptg.alpha_count() {
        let da = angle_diff(ptg.index_to_alpha(k), alpha_obs);
        if da.abs() >= std::f32::consts::FRAC_PI_2 {
            continue; // obstacle is behind this direction's half-plane
        }
        let along = obs_d_norm * da.cos();
        let lateral = obs_d_norm * da.sin().abs();
        cd.update(k, along, lateral);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Timestamped;

    struct NoObstacles;
    impl ObstacleSource for NoObstacles {
        fn sense(&mut self) -> Result<Timestamped<Vec<Point2D>>> {
            Ok(Timestamped::new(Vec::new(), 0.0))
        }
    }

    fn test_cfg() -> NavigatorConfig {
        NavigatorConfig::from_toml(
            r#"
            [planner]
            holonomic_method = "FullEval"
            motion_decider_method = "WeightedScores"
            ref_distance = 4.0
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_planner_requires_ptgs() {
        let res = ReactivePlanner::new(&test_cfg(), Vec::new(), Box::new(NoObstacles));
        assert!(matches!(res, Err(NavError::Config(_))));
    }

    #[test]
    fn test_planner_rejects_unknown_holonomic() {
        let cfg = NavigatorConfig::from_toml(
            r#"
            [planner]
            holonomic_method = "DoesNotExist"
            motion_decider_method = "WeightedScores"
            ref_distance = 4.0
            "#,
        )
        .unwrap();
        let ptgs: Vec<Box<dyn Ptg>> =
            vec![Box::new(crate::ptg::ArcPtg::new(Default::default()))];
        assert!(ReactivePlanner::new(&cfg, ptgs, Box::new(NoObstacles)).is_err());
    }

    #[test]
    fn test_filter_obstacles_dedups() {
        let mut pts = vec![
            Point2D::new(1.0, 1.0),
            Point2D::new(1.001, 1.002),
            Point2D::new(2.0, 2.0),
        ];
        filter_obstacles(&mut pts);
        assert_eq!(pts.len(), 2);
    }

    #[test]
    fn test_extrapolation_zero_dt() {
        let p = extrapolate_pose_increment(&Twist2D::new(1.0, 0.0, 0.5), 0.0);
        assert_eq!(p, Pose2D::identity());
    }

    #[test]
    fn test_reachability_requires_fresh_info() {
        let ptgs: Vec<Box<dyn Ptg>> =
            vec![Box::new(crate::ptg::ArcPtg::new(Default::default()))];
        let planner = ReactivePlanner::new(&test_cfg(), ptgs, Box::new(NoObstacles)).unwrap();
        // Never stepped: no TP-Space views yet.
        assert!(!planner.waypoint_is_reachable(Point2D::new(1.0, 0.0), 0.0));
    }
}
