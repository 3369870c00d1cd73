//! Shared test fixtures: a simulated differential-drive robot and
//! scripted obstacle sources.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use marga_nav::{
    NavError, NavigatorConfig, ObstacleSource, Point2D, Pose2D, Result, RobotInterface,
    Timestamped, Twist2D, VelCmd,
};

/// Events recorded from the navigator, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    NavStart,
    NavEnd,
    NavErrorEnd,
    WayBlocked,
    WaypointReached(usize),
    NewWaypointTarget(usize),
}

/// Commands recorded from the navigator, in emission order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cmd {
    Speeds(f32, f32),
    Nop,
    Stop { emergency: bool },
}

#[derive(Debug)]
struct SimState {
    pose: Pose2D,
    vel: (f32, f32),
    time: f64,
    frozen: bool,
    pose_queries: u32,
    fail_pose_after: Option<u32>,
    fail_change_speeds: bool,
    events: Vec<Event>,
    cmds: Vec<Cmd>,
}

/// Kinematic simulation of a differential-drive robot driven by the
/// navigator's commands, with scripted failures.
pub struct MockRobot {
    state: Mutex<SimState>,
}

impl MockRobot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimState {
                pose: Pose2D::identity(),
                vel: (0.0, 0.0),
                time: 0.0,
                frozen: false,
                pose_queries: 0,
                fail_pose_after: None,
                fail_change_speeds: false,
                events: Vec::new(),
                cmds: Vec::new(),
            }),
        })
    }

    /// Advance simulation time, integrating the current command.
    pub fn advance(&self, dt: f64) {
        let mut s = self.state.lock();
        s.time += dt;
        if s.frozen {
            return;
        }
        let (v, w) = s.vel;
        let dt = dt as f32;
        if w.abs() < 1e-6 {
            s.pose = Pose2D::new(
                s.pose.x + v * s.pose.theta.cos() * dt,
                s.pose.y + v * s.pose.theta.sin() * dt,
                s.pose.theta,
            );
        } else {
            let theta1 = s.pose.theta + w * dt;
            s.pose = Pose2D::new(
                s.pose.x + v / w * (theta1.sin() - s.pose.theta.sin()),
                s.pose.y - v / w * (theta1.cos() - s.pose.theta.cos()),
                theta1,
            );
        }
    }

    pub fn pose(&self) -> Pose2D {
        self.state.lock().pose
    }

    pub fn time(&self) -> f64 {
        self.state.lock().time
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn cmds(&self) -> Vec<Cmd> {
        self.state.lock().cmds.clone()
    }

    /// Freeze the pose (commands no longer move the robot).
    pub fn set_frozen(&self, frozen: bool) {
        self.state.lock().frozen = frozen;
    }

    /// Make pose queries fail after the first `n` successful ones.
    pub fn fail_pose_after(&self, n: u32) {
        self.state.lock().fail_pose_after = Some(n);
    }

    pub fn count_events(&self, ev: Event) -> usize {
        self.state.lock().events.iter().filter(|&&e| e == ev).count()
    }

    /// Index of the first occurrence of an event, if any.
    pub fn event_index(&self, ev: Event) -> Option<usize> {
        self.state.lock().events.iter().position(|&e| e == ev)
    }
}

impl RobotInterface for MockRobot {
    fn get_current_pose_and_speeds(&self) -> Result<(Pose2D, Twist2D, f64)> {
        let mut s = self.state.lock();
        s.pose_queries += 1;
        if let Some(n) = s.fail_pose_after
            && s.pose_queries > n
        {
            return Err(NavError::Robot("simulated sensor failure".into()));
        }
        let (v, w) = s.vel;
        let vel_local = Twist2D::new(v, 0.0, w);
        Ok((s.pose, vel_local.rotated(s.pose.theta), s.time))
    }

    fn get_navigation_time(&self) -> f64 {
        self.state.lock().time
    }

    fn change_speeds(&self, cmd: &VelCmd) -> bool {
        let mut s = self.state.lock();
        if s.fail_change_speeds {
            return false;
        }
        if let VelCmd::DiffDrive { v, w } = *cmd {
            s.vel = (v, w);
            s.cmds.push(Cmd::Speeds(v, w));
        }
        true
    }

    fn change_speeds_nop(&self) -> bool {
        self.state.lock().cmds.push(Cmd::Nop);
        true
    }

    fn stop(&self, is_emergency: bool) -> bool {
        let mut s = self.state.lock();
        s.vel = (0.0, 0.0);
        s.cmds.push(Cmd::Stop {
            emergency: is_emergency,
        });
        true
    }

    fn send_navigation_start_event(&self) {
        self.state.lock().events.push(Event::NavStart);
    }

    fn send_navigation_end_event(&self) {
        self.state.lock().events.push(Event::NavEnd);
    }

    fn send_navigation_end_due_to_error_event(&self) {
        self.state.lock().events.push(Event::NavErrorEnd);
    }

    fn send_way_seems_blocked_event(&self) {
        self.state.lock().events.push(Event::WayBlocked);
    }

    fn send_waypoint_reached_event(&self, idx: usize) {
        self.state.lock().events.push(Event::WaypointReached(idx));
    }

    fn send_new_waypoint_target_event(&self, idx: usize) {
        self.state.lock().events.push(Event::NewWaypointTarget(idx));
    }
}

/// Obstacle source backed by a fixed set of global-frame points,
/// re-expressed in the robot frame at every sense.
pub struct SimObstacles {
    robot: Arc<MockRobot>,
    points: Vec<Point2D>,
}

impl SimObstacles {
    pub fn free_space(robot: Arc<MockRobot>) -> Box<Self> {
        Box::new(Self {
            robot,
            points: Vec::new(),
        })
    }

    pub fn with_points(robot: Arc<MockRobot>, points: Vec<Point2D>) -> Box<Self> {
        Box::new(Self { robot, points })
    }
}

impl ObstacleSource for SimObstacles {
    fn sense(&mut self) -> Result<Timestamped<Vec<Point2D>>> {
        let pose = self.robot.pose();
        let local = self
            .points
            .iter()
            .map(|p| pose.inverse_transform_point(p))
            .collect();
        Ok(Timestamped::new(local, self.robot.time()))
    }
}

/// Baseline configuration for the tests; callers append extra TOML
/// lines to the relevant sections.
pub fn config(extra_planner: &str, extra_sections: &str) -> NavigatorConfig {
    NavigatorConfig::from_toml(&format!(
        r#"
        [planner]
        holonomic_method = "FullEval"
        motion_decider_method = "WeightedScores"
        ref_distance = 4.0
        {extra_planner}
        {extra_sections}
        "#
    ))
    .unwrap()
}
