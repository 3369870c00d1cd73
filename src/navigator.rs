//! The reactive navigator: lifecycle state machine, waypoint sequencer
//! and per-cycle orchestration of the reactive planner.
//!
//! The host drives navigation by calling [`ReactiveNavigator::step`] at
//! a roughly fixed cadence from one thread; every public operation may
//! be invoked from any thread. Two locks protect the state: one on the
//! waypoint status (so [`ReactiveNavigator::get_waypoint_status`] never
//! waits on a planning cycle) and one on the navigation core. The
//! waypoint lock is always acquired before the core lock, never the
//! reverse. The sequencer hands new goals to the core directly instead
//! of re-entering `navigate()`, so no lock recursion exists.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{NavCoreConfig, NavigatorConfig, WaypointConfig};
use crate::core::math::point_segment_distance;
use crate::core::types::{Point2D, Pose2D, PoseHistory, PoseVelSample};
use crate::error::{NavError, Result};
use crate::interface::{ObstacleSource, RobotInterface};
use crate::logrecord::LogRecord;
use crate::ptg::Ptg;
use crate::reactive::planner::{IterationInput, ReactivePlanner};
use crate::waypoints::{Waypoint, WaypointStatusSequence};

/// Pose queries closer than this in time reuse the previous sample.
const MIN_TIME_BETWEEN_POSE_UPDATES: f64 = 20e-3;

/// Watchdog period requested from the robot while navigating (ms).
const WATCHDOG_PERIOD_MS: u32 = 1000;

/// Navigator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NavState {
    /// No active navigation.
    #[default]
    Idle,
    /// Executing reactive iterations toward a target.
    Navigating,
    /// Navigation paused; resume() continues it.
    Suspended,
    /// A fatal condition occurred; reset_nav_error() recovers.
    NavError,
}

/// A single-target navigation request.
#[derive(Debug, Clone)]
pub struct NavRequest {
    /// Target pose. Only the heading of waypoint targets is meaningful.
    pub target: Pose2D,
    /// Distance at which the target counts as reached.
    pub allowed_distance: f32,
    /// When true, the target is expressed relative to the robot pose at
    /// the instant the request is accepted.
    pub target_is_relative: bool,
    /// Intermediary waypoints don't stop the robot nor fire the
    /// end-of-navigation event.
    pub target_is_intermediary: bool,
    /// When non-empty, only the listed PTG indices are considered.
    pub restrict_ptg_indices: Vec<usize>,
}

impl NavRequest {
    /// Request toward an absolute target position.
    pub fn new(x: f32, y: f32, allowed_distance: f32) -> Self {
        Self {
            target: Pose2D::new(x, y, 0.0),
            allowed_distance,
            target_is_relative: false,
            target_is_intermediary: false,
            restrict_ptg_indices: Vec::new(),
        }
    }
}

/// Navigation core: every field the state machine works on.
struct NavCore {
    cfg: NavCoreConfig,
    wp_cfg: WaypointConfig,
    state: NavState,
    last_state: NavState,
    request: Option<NavRequest>,
    nav_end_event_sent: bool,
    last_target_reached: bool,
    pose_vel: PoseVelSample,
    have_pose_vel: bool,
    last_pose_update_robot_time: f64,
    history: PoseHistory,
    alarm_min_dist: f32,
    alarm_min_dist_time: f64,
    planner: ReactivePlanner,
}

/// PTG-based reactive navigator.
///
/// Owns the planner (PTGs, holonomic methods, decider) and the waypoint
/// state; borrows the robot through a shared [`RobotInterface`].
pub struct ReactiveNavigator {
    robot: Arc<dyn RobotInterface>,
    waypoints: Mutex<Option<WaypointStatusSequence>>,
    core: Mutex<NavCore>,
}

impl ReactiveNavigator {
    /// Build a navigator from configuration, the PTG set and the
    /// obstacle source.
    ///
    /// Fails on configuration errors (missing required keys, unknown
    /// plugin names, empty PTG set); nothing is left half-initialized.
    pub fn new(
        robot: Arc<dyn RobotInterface>,
        ptgs: Vec<Box<dyn Ptg>>,
        obstacle_source: Box<dyn ObstacleSource>,
        cfg: &NavigatorConfig,
    ) -> Result<Self> {
        cfg.validate()?;
        let planner = ReactivePlanner::new(cfg, ptgs, obstacle_source)?;

        Ok(Self {
            robot,
            waypoints: Mutex::new(None),
            core: Mutex::new(NavCore {
                cfg: cfg.nav.clone(),
                wp_cfg: cfg.waypoints.clone(),
                state: NavState::Idle,
                last_state: NavState::Idle,
                request: None,
                nav_end_event_sent: false,
                last_target_reached: false,
                pose_vel: PoseVelSample::default(),
                have_pose_vel: false,
                last_pose_update_robot_time: f64::NEG_INFINITY,
                history: PoseHistory::new(),
                alarm_min_dist: f32::MAX,
                alarm_min_dist_time: 0.0,
                planner,
            }),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NavState {
        self.core.lock().state
    }

    /// Start a single-target navigation.
    ///
    /// Accepted from any state except `NavError`; replaces any waypoint
    /// navigation in progress.
    pub fn navigate(&self, request: &NavRequest) -> Result<()> {
        let mut wps = self.waypoints.lock();
        let mut core = self.core.lock();
        *wps = None;
        core.start_navigation(self.robot.as_ref(), request.clone())
    }

    /// Start a waypoint-list navigation.
    ///
    /// The list is only stored here; the first `step()` promotes the
    /// initial goal and starts the underlying single-target navigation.
    pub fn navigate_waypoints(&self, waypoints: Vec<Waypoint>) -> Result<()> {
        if waypoints.is_empty() {
            return Err(NavError::Config("List of waypoints is empty".into()));
        }
        if let Some(bad) = waypoints.iter().position(|w| !w.is_valid()) {
            return Err(NavError::Config(format!("Waypoint #{} is invalid", bad)));
        }

        let mut wps = self.waypoints.lock();
        *wps = Some(WaypointStatusSequence::from_waypoints(waypoints));
        Ok(())
    }

    /// Cancel the current navigation and stop the robot.
    pub fn cancel(&self) {
        let mut wps = self.waypoints.lock();
        let mut core = self.core.lock();
        *wps = None;
        core.cancel(self.robot.as_ref());
    }

    /// Pause the current navigation.
    pub fn suspend(&self) {
        let mut core = self.core.lock();
        log::debug!("suspend() called");
        if core.state == NavState::Navigating {
            core.state = NavState::Suspended;
        }
    }

    /// Resume a suspended navigation.
    pub fn resume(&self) {
        let mut core = self.core.lock();
        log::debug!("resume() called");
        if core.state == NavState::Suspended {
            core.state = NavState::Navigating;
        }
    }

    /// Leave the error state (back to `Idle`).
    pub fn reset_nav_error(&self) {
        let mut core = self.core.lock();
        log::debug!("reset_nav_error() called");
        if core.state == NavState::NavError {
            core.state = NavState::Idle;
            core.last_state = NavState::Idle;
        }
    }

    /// Snapshot of the waypoint navigation status, if one is active.
    ///
    /// Only takes the waypoint lock, so it never waits for a planning
    /// cycle to finish.
    pub fn get_waypoint_status(&self) -> Option<WaypointStatusSequence> {
        self.waypoints.lock().clone()
    }

    /// Whether a robot-relative point is reachable through a direct
    /// collision-free PTG path, judged on the latest obstacle views.
    pub fn is_relative_point_reachable(&self, wp_local: Point2D) -> bool {
        let core = self.core.lock();
        core.planner
            .waypoint_is_reachable(wp_local, self.robot.get_navigation_time())
    }

    /// Copy of the most recent per-iteration log record.
    pub fn last_log_record(&self) -> Option<LogRecord> {
        self.core.lock().planner.last_log_record()
    }

    /// Keep log records in memory even when file logging is off.
    pub fn set_keep_log_records(&self, keep: bool) {
        self.core.lock().planner.set_keep_log_records(keep);
    }

    /// Run one navigation cycle.
    ///
    /// Must be called periodically by the host. Outside `Navigating`
    /// only state-edge actions run; fatal conditions are captured
    /// internally and never propagate out.
    pub fn step(&self) {
        let mut wps = self.waypoints.lock();
        let mut core = self.core.lock();
        let robot = self.robot.as_ref();

        // Waypoint sequencing runs first so waypoint events precede the
        // end-of-navigation events of the same cycle. It idles while in
        // the error state.
        if core.state != NavState::NavError
            && let Some(seq) = wps.as_mut()
        {
            core.waypoint_sequencer_step(robot, seq);
        }

        core.navigation_step(robot);
    }
}

impl NavCore {
    /// Accept a navigation request and enter `Navigating`.
    ///
    /// Performs the Navigating-entry actions inline (watchdog, pose
    /// history reset, start event) so that events triggered later in
    /// the same cycle observe a started navigation.
    fn start_navigation(&mut self, robot: &dyn RobotInterface, mut request: NavRequest) -> Result<()> {
        if self.state == NavState::NavError {
            return Err(NavError::Planner(
                "Cannot start a navigation from the error state; call reset_nav_error() first"
                    .into(),
            ));
        }

        self.nav_end_event_sent = false;
        self.last_target_reached = false;

        if request.target_is_relative {
            if let Err(e) = self.update_pose_vel(robot) {
                self.handle_pose_failure(robot, &e);
                return Err(e);
            }
            request.target = self.pose_vel.pose.compose(&request.target);
            request.target_is_relative = false;
        }

        // Entry actions are keyed on the last *observed* state so that
        // the momentary Idle dip between consecutive waypoint targets
        // doesn't restart the watchdog or re-announce the navigation.
        if self.last_state != NavState::Navigating {
            log::info!("Starting navigation. Watchdog initiated.");
            robot.start_watchdog(WATCHDOG_PERIOD_MS);
            self.history.clear();
            self.last_pose_update_robot_time = f64::NEG_INFINITY;
            self.planner.on_start_new_navigation();
            robot.send_navigation_start_event();
        }
        self.state = NavState::Navigating;
        self.last_state = NavState::Navigating;

        self.alarm_min_dist = f32::MAX;
        self.alarm_min_dist_time = robot.get_navigation_time();

        log::debug!(
            "navigate() -> target=({:.3},{:.3}) allowed_dist={:.3} intermediary={}",
            request.target.x,
            request.target.y,
            request.allowed_distance,
            request.target_is_intermediary
        );
        self.request = Some(request);
        Ok(())
    }

    fn cancel(&mut self, robot: &dyn RobotInterface) {
        log::debug!("cancel() called");
        self.state = NavState::Idle;
        self.last_target_reached = false;
        self.request = None;
        self.planner.clear_last_sent_cmd();
        if !robot.stop(false) {
            log::error!("stop() request failed during cancel");
        }
    }

    /// Query the robot pose/velocity unless the previous sample is
    /// fresh enough (guards against recursion and over-fast hosts).
    fn update_pose_vel(&mut self, robot: &dyn RobotInterface) -> Result<()> {
        let now = robot.get_navigation_time();
        if self.last_pose_update_robot_time.is_finite() {
            let age = now - self.last_pose_update_robot_time;
            if age < MIN_TIME_BETWEEN_POSE_UPDATES {
                log::debug!(
                    "update_pose_vel: reusing sample queried {:.1} ms ago",
                    age * 1e3
                );
                return Ok(());
            }
        }

        let (pose, vel_global, timestamp) = robot
            .get_current_pose_and_speeds()
            .map_err(|e| NavError::Robot(format!("Error querying robot pose and speeds: {}", e)))?;

        self.pose_vel = PoseVelSample::new(pose, vel_global, timestamp);
        self.have_pose_vel = true;
        self.last_pose_update_robot_time = now;
        self.history.push(timestamp, pose);
        Ok(())
    }

    /// A pose query failed: emergency-stop, log the aborted iteration
    /// and enter the error state.
    fn handle_pose_failure(&mut self, robot: &dyn RobotInterface, err: &NavError) {
        let msg = err.to_string();
        self.planner.log_aborted_iteration(robot, &msg);
        if !robot.stop(true) {
            log::error!("Emergency stop request failed");
        }
        self.planner.clear_last_sent_cmd();
        self.state = NavState::NavError;
        log::error!("{}", msg);
    }

    /// One cycle of the waypoint sequencer (runs before the state
    /// machine).
    fn waypoint_sequencer_step(
        &mut self,
        robot: &dyn RobotInterface,
        wps: &mut WaypointStatusSequence,
    ) {
        if wps.is_empty() || wps.final_reached {
            return;
        }

        if let Err(e) = self.update_pose_vel(robot) {
            self.handle_pose_failure(robot, &e);
            return;
        }
        if !self.have_pose_vel {
            return;
        }

        let prev_goal = wps.current_goal;
        let cur_point = self.pose_vel.pose.point();
        let seg_prev = wps
            .last_robot_pose
            .map(|p| p.point())
            .unwrap_or(cur_point);
        wps.last_robot_pose = Some(self.pose_vel.pose);

        // 1) Default policy: go through the waypoints one by one.
        if let Some(goal) = wps.current_goal {
            let wp = &wps.waypoints[goal];
            let dist = point_segment_distance(wp.waypoint.target, cur_point, seg_prev);
            if dist < wp.waypoint.allowed_distance || self.last_target_reached {
                log::debug!(
                    "Waypoint {}/{} reached (segment dist {:.3} m, allowed {:.3} m, state-machine reach: {})",
                    goal + 1,
                    wps.len(),
                    dist,
                    wp.waypoint.allowed_distance,
                    self.last_target_reached
                );
                wps.waypoints[goal].reached = true;
                robot.send_waypoint_reached_event(goal);

                if goal + 1 < wps.len() {
                    wps.current_goal = Some(goal + 1);
                } else {
                    wps.final_reached = true;
                }
            }
        }

        // 2) Skip-ahead policy: promote to the most advanced waypoint
        //    confirmed reachable, never crossing a barrier.
        if !wps.final_reached
            && let Some(goal) = wps.current_goal
        {
            let now = robot.get_navigation_time();
            let mut most_advanced = goal;

            for idx in goal..wps.len() {
                let target = wps.waypoints[idx].waypoint.target;
                let wp_local = self.pose_vel.pose.inverse_transform_point(&target);

                let max_skip = self.wp_cfg.max_distance_to_allow_skip_waypoint;
                if max_skip < 0.0 || wp_local.norm() <= max_skip {
                    if self.planner.waypoint_is_reachable(wp_local, now) {
                        let wp = &mut wps.waypoints[idx];
                        wp.counter_seen_reachable += 1;
                        if wp.counter_seen_reachable
                            >= self.wp_cfg.min_timesteps_confirm_skip_waypoints
                        {
                            most_advanced = idx;
                        }
                    } else {
                        wps.waypoints[idx].counter_seen_reachable = 0;
                    }
                }

                if !wps.waypoints[idx].waypoint.allow_skip {
                    break; // barrier: don't look further ahead
                }
            }

            if most_advanced > goal {
                wps.current_goal = Some(most_advanced);
                for k in goal..most_advanced {
                    wps.waypoints[k].reached = true;
                    robot.send_waypoint_reached_event(k);
                }
            }
        }

        // 3) Not started yet: begin with the first waypoint.
        if wps.current_goal.is_none() {
            wps.current_goal = Some(0);
        }

        // 4) Goal changed: hand a single-target request to the state
        //    machine.
        if wps.current_goal != prev_goal
            && let Some(goal) = wps.current_goal
        {
            let wp = &wps.waypoints[goal].waypoint;
            let is_final = goal + 1 == wps.len();
            let request = NavRequest {
                target: Pose2D::new(wp.target.x, wp.target.y, wp.target_heading.unwrap_or(0.0)),
                allowed_distance: wp.allowed_distance,
                target_is_relative: false,
                target_is_intermediary: !is_final,
                restrict_ptg_indices: Vec::new(),
            };
            if let Err(e) = self.start_navigation(robot, request) {
                log::error!("Failed to start navigation to waypoint {}: {}", goal, e);
                return;
            }
            robot.send_new_waypoint_target_event(goal);
        }
    }

    /// One cycle of the lifecycle state machine.
    fn navigation_step(&mut self, robot: &dyn RobotInterface) {
        let state_at_entry = self.state;

        match self.state {
            NavState::Idle | NavState::Suspended => {
                if self.last_state == NavState::Navigating {
                    log::info!("Navigation stopped.");
                    if self.state == NavState::Suspended && !robot.stop(false) {
                        log::error!("stop() request failed while suspending");
                    }
                    robot.stop_watchdog();
                }
            }

            NavState::NavError => {
                if self.last_state == NavState::Navigating {
                    robot.send_navigation_end_due_to_error_event();
                    log::error!("Stopping navigation due to the error state");
                    if !robot.stop(false) {
                        log::error!("stop() request failed on error-state entry");
                    }
                    robot.stop_watchdog();
                }
            }

            NavState::Navigating => self.navigating_step(robot),
        }

        self.last_state = state_at_entry;
    }

    /// The `Navigating` body: pose update, reach test, bad-approach
    /// alarm and one reactive planner iteration.
    fn navigating_step(&mut self, robot: &dyn RobotInterface) {
        if self.last_state != NavState::Navigating {
            // Entered outside start_navigation(), i.e. via resume().
            log::info!("Navigation resumed. Watchdog initiated.");
            robot.start_watchdog(WATCHDOG_PERIOD_MS);
            self.history.clear();
            self.last_pose_update_robot_time = f64::NEG_INFINITY;
            self.planner.on_start_new_navigation();
            robot.send_navigation_start_event();
        }

        let Some(request) = self.request.clone() else {
            log::warn!("Navigating without an active request; going idle");
            self.state = NavState::Idle;
            return;
        };

        if let Err(e) = self.update_pose_vel(robot) {
            self.handle_pose_failure(robot, &e);
            return;
        }
        if self.history.is_empty() {
            return;
        }

        // Reach test on the segment spanned since the previous pose, so
        // fast robots can't step across the acceptance radius.
        let cur_point = self.pose_vel.pose.point();
        let prev_point = self
            .history
            .previous()
            .map(|(_, p)| p.point())
            .unwrap_or(cur_point);
        let target_dist =
            point_segment_distance(request.target.point(), cur_point, prev_point);

        let event_dist = if self.cfg.dist_to_target_for_sending_event > 0.0 {
            self.cfg.dist_to_target_for_sending_event
        } else {
            request.allowed_distance
        };
        if !request.target_is_intermediary && !self.nav_end_event_sent && target_dist < event_dist
        {
            self.nav_end_event_sent = true;
            robot.send_navigation_end_event();
        }

        if target_dist < request.allowed_distance {
            self.last_target_reached = true;
            if !request.target_is_intermediary {
                if !robot.stop(false) {
                    log::error!("stop() request failed on target reach");
                }
                if !self.nav_end_event_sent {
                    self.nav_end_event_sent = true;
                    robot.send_navigation_end_event();
                }
            }
            self.state = NavState::Idle;
            log::info!(
                "Navigation target ({:.3},{:.3}) was reached",
                request.target.x,
                request.target.y
            );
            return;
        }

        // Bad-approach alarm: abort when the distance to the target has
        // not made a new minimum within the timeout.
        let now = robot.get_navigation_time();
        if target_dist < self.alarm_min_dist {
            self.alarm_min_dist = target_dist;
            self.alarm_min_dist_time = now;
        } else if now - self.alarm_min_dist_time
            > self.cfg.alarm_seems_not_approaching_target_timeout
        {
            log::warn!("Timeout approaching the target; aborting navigation");
            self.state = NavState::NavError;
            robot.send_way_seems_blocked_event();
            return;
        }

        // The reactive iteration proper.
        let input = IterationInput {
            pose_vel: &self.pose_vel,
            target: request.target,
            target_is_intermediary: request.target_is_intermediary,
            restrict_ptg_indices: &request.restrict_ptg_indices,
            history: &self.history,
        };
        if let Err(e) = self.planner.step(robot, input) {
            log::error!("Reactive planner failure: {}", e);
            self.state = NavState::NavError;
        }
    }
}
