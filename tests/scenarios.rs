//! End-to-end navigation scenarios on a simulated robot.
//!
//! Each test drives a [`marga_nav::ReactiveNavigator`] through its
//! public API with a kinematic mock robot, checking the state machine,
//! waypoint sequencing, event ordering and logging contracts.
//!
//! Run with: `cargo test --test scenarios`

mod common;

use common::{Cmd, Event, MockRobot, SimObstacles, config};
use marga_nav::{NavRequest, NavState, Point2D, ReactiveNavigator, Waypoint};

/// Control period of the simulated host loop (10 Hz).
const STEP_DT: f64 = 0.1;

/// Step the navigator until `pred` holds or `max_cycles` elapse.
/// Returns the number of cycles executed.
fn run_until(
    nav: &ReactiveNavigator,
    robot: &MockRobot,
    max_cycles: usize,
    mut pred: impl FnMut() -> bool,
) -> usize {
    for i in 0..max_cycles {
        nav.step();
        robot.advance(STEP_DT);
        if pred() {
            return i + 1;
        }
    }
    max_cycles
}

fn forward_ptgs() -> Vec<Box<dyn marga_nav::Ptg>> {
    vec![Box::new(marga_nav::ArcPtg::new(Default::default()))]
}

// ============================================================================
// Scenario 1: straight line, free space
// ============================================================================

#[test]
fn test_straight_line_free_space() {
    let robot = MockRobot::new();
    let cfg = config("", "");
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();

    nav.navigate_waypoints(vec![Waypoint::new(2.0, 0.0, 0.1, false)])
        .unwrap();

    let cycles = run_until(&nav, &robot, 600, || nav.state() == NavState::Idle);
    assert!(cycles < 600, "navigation did not finish");

    // The robot ended near the target.
    let pose = robot.pose();
    assert!(pose.distance_2d(2.0, 0.0) < 0.2, "ended at {:?}", pose);

    // Forward motion commands were streamed.
    let forward_cmds = robot
        .cmds()
        .iter()
        .filter(|c| matches!(c, Cmd::Speeds(v, _) if *v > 0.0))
        .count();
    assert!(forward_cmds > 1);

    // Event contract: start, then waypoint 0 reached, then end.
    let start = robot.event_index(Event::NavStart).unwrap();
    let target0 = robot.event_index(Event::NewWaypointTarget(0)).unwrap();
    let reached0 = robot.event_index(Event::WaypointReached(0)).unwrap();
    let end = robot.event_index(Event::NavEnd).unwrap();
    assert!(start < target0, "navigation_start precedes new_waypoint_target");
    assert!(reached0 < end, "waypoint_reached precedes navigation_end");
    assert_eq!(robot.count_events(Event::NavEnd), 1);
    assert_eq!(robot.count_events(Event::WaypointReached(0)), 1);

    let status = nav.get_waypoint_status().unwrap();
    assert!(status.final_reached);
    assert!(status.waypoints[0].reached);
}

// ============================================================================
// Scenario 2: skip-ahead over reachable waypoints
// ============================================================================

#[test]
fn test_skip_waypoints() {
    let robot = MockRobot::new();
    let cfg = config(
        "",
        "[waypoints]\nmin_timesteps_confirm_skip_waypoints = 2\n",
    );
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();

    nav.navigate_waypoints(vec![
        Waypoint::new(1.0, 0.0, 0.3, true),
        Waypoint::new(2.0, 0.0, 0.3, true),
        Waypoint::new(3.0, 0.0, 0.3, false),
    ])
    .unwrap();

    // A few cycles: one to populate the TP-Space views, two to confirm
    // reachability of the later waypoints.
    run_until(&nav, &robot, 10, || {
        nav.get_waypoint_status().unwrap().current_goal == Some(2)
    });

    let status = nav.get_waypoint_status().unwrap();
    assert_eq!(status.current_goal, Some(2));
    assert!(status.waypoints[0].reached);
    assert!(status.waypoints[1].reached);
    assert!(!status.final_reached);

    // Skipped waypoints were reported in index order, before the new
    // goal announcement.
    let r0 = robot.event_index(Event::WaypointReached(0)).unwrap();
    let r1 = robot.event_index(Event::WaypointReached(1)).unwrap();
    let t2 = robot.event_index(Event::NewWaypointTarget(2)).unwrap();
    assert!(r0 < r1 && r1 < t2);
}

// ============================================================================
// Scenario 3: a barrier waypoint is never skipped
// ============================================================================

#[test]
fn test_barrier_waypoint() {
    let robot = MockRobot::new();
    let cfg = config("", "");
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();

    nav.navigate_waypoints(vec![
        Waypoint::new(1.0, 0.0, 0.3, false),
        Waypoint::new(5.0, 0.0, 0.3, true),
    ])
    .unwrap();

    // While far from waypoint 0, the goal must stay on it even though
    // waypoint 1 may look reachable.
    for _ in 0..5 {
        nav.step();
        robot.advance(STEP_DT);
        assert_eq!(nav.get_waypoint_status().unwrap().current_goal, Some(0));
    }

    // Eventually waypoint 0 is reached and only then the goal advances.
    run_until(&nav, &robot, 600, || {
        nav.get_waypoint_status().unwrap().current_goal == Some(1)
    });
    let status = nav.get_waypoint_status().unwrap();
    assert_eq!(status.current_goal, Some(1));
    assert!(status.waypoints[0].reached);

    let r0 = robot.event_index(Event::WaypointReached(0)).unwrap();
    let t1 = robot.event_index(Event::NewWaypointTarget(1)).unwrap();
    assert!(r0 < t1);
}

// ============================================================================
// Scenario 4: continuation (NOP) of the previous command
// ============================================================================

#[test]
fn test_nop_continuation_keeps_last_command() {
    let robot = MockRobot::new();
    let cfg = config("use_delays_model = true", "");
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();
    nav.set_keep_log_records(true);

    nav.navigate(&NavRequest::new(3.0, 0.0, 0.1)).unwrap();

    // First cycle sends a fresh command.
    nav.step();
    robot.advance(STEP_DT);
    assert!(matches!(robot.cmds().as_slice(), [Cmd::Speeds(v, _)] if *v > 0.0));

    // Second cycle: same target, last command still young and bijective
    // along a straight path, zero mismatch -> the continuation wins.
    nav.step();
    let cmds = robot.cmds();
    assert_eq!(cmds.len(), 2);
    assert_eq!(cmds[1], Cmd::Nop);

    let rec = nav.last_log_record().unwrap();
    assert!(rec.cmd_is_nop);
    assert!(rec.cmd_vel.is_none());
    assert_eq!(rec.ptg_index_nop, 0);
    // The continuation slot carries its own evaluation.
    assert!(rec.info_per_ptg[rec.n_ptgs].evaluation > 0.0);
}

// ============================================================================
// Scenario 5: bad-approach alarm
// ============================================================================

#[test]
fn test_approach_timeout_aborts() {
    let robot = MockRobot::new();
    robot.set_frozen(true);
    let cfg = config(
        "",
        "[nav]\nalarm_seems_not_approaching_target_timeout = 1.0\n",
    );
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();

    nav.navigate(&NavRequest::new(5.0, 0.0, 0.1)).unwrap();

    // 10 Hz stepping with a frozen pose: the alarm must fire after ~1 s.
    run_until(&nav, &robot, 30, || nav.state() == NavState::NavError);

    assert_eq!(nav.state(), NavState::NavError);
    assert_eq!(robot.count_events(Event::WayBlocked), 1);

    // One more cycle runs the error-entry edge actions.
    nav.step();
    assert_eq!(robot.count_events(Event::NavErrorEnd), 1);
    assert_eq!(robot.count_events(Event::WayBlocked), 1);
}

// ============================================================================
// Scenario 6: pose sensor failure
// ============================================================================

#[test]
fn test_sensor_failure_emergency_stops() {
    let robot = MockRobot::new();
    let logdir = tempfile::tempdir().unwrap();
    let cfg = config(
        &format!(
            "enable_log_file = true\nlog_directory = {:?}",
            logdir.path().to_string_lossy()
        ),
        "",
    );
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();

    nav.navigate(&NavRequest::new(2.0, 0.0, 0.1)).unwrap();
    robot.fail_pose_after(2); // third pose query fails

    for _ in 0..3 {
        nav.step();
        robot.advance(STEP_DT);
    }

    assert_eq!(nav.state(), NavState::NavError);
    assert!(robot.cmds().contains(&Cmd::Stop { emergency: true }));

    // A record exists for every iteration, including the aborted one.
    let log_path = logdir.path().join("log_001.reactivenavlog");
    let records = marga_nav::read_log_records(&log_path).unwrap();
    assert_eq!(records.len(), 3);
    assert!(
        records[2]
            .additional_debug_msgs
            .get("abort")
            .is_some_and(|m| m.contains("sensor"))
    );
}

// ============================================================================
// Cancellation and error recovery
// ============================================================================

#[test]
fn test_cancel_goes_idle_and_stops_commands() {
    let robot = MockRobot::new();
    let cfg = config("", "");
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();

    nav.navigate(&NavRequest::new(3.0, 0.0, 0.1)).unwrap();
    run_until(&nav, &robot, 3, || false);

    nav.cancel();
    assert_eq!(nav.state(), NavState::Idle);
    assert!(robot.cmds().contains(&Cmd::Stop { emergency: false }));

    // No further motion commands after cancel.
    let cmds_at_cancel = robot.cmds().len();
    run_until(&nav, &robot, 5, || false);
    assert_eq!(robot.cmds().len(), cmds_at_cancel);
    assert!(nav.get_waypoint_status().is_none());
}

#[test]
fn test_nav_error_requires_reset() {
    let robot = MockRobot::new();
    let cfg = config("", "");
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();

    nav.navigate(&NavRequest::new(2.0, 0.0, 0.1)).unwrap();
    robot.fail_pose_after(1);
    run_until(&nav, &robot, 5, || nav.state() == NavState::NavError);
    assert_eq!(nav.state(), NavState::NavError);

    // navigate() is refused while in the error state.
    assert!(nav.navigate(&NavRequest::new(1.0, 0.0, 0.1)).is_err());

    nav.reset_nav_error();
    assert_eq!(nav.state(), NavState::Idle);
}

#[test]
fn test_suspend_resume() {
    let robot = MockRobot::new();
    let cfg = config("", "");
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();

    nav.navigate(&NavRequest::new(3.0, 0.0, 0.1)).unwrap();
    run_until(&nav, &robot, 2, || false);

    nav.suspend();
    assert_eq!(nav.state(), NavState::Suspended);
    // The suspension edge stops the robot on the next cycle.
    nav.step();
    assert!(robot.cmds().contains(&Cmd::Stop { emergency: false }));

    nav.resume();
    assert_eq!(nav.state(), NavState::Navigating);
    let cmds_before = robot.cmds().len();
    run_until(&nav, &robot, 3, || false);
    assert!(robot.cmds().len() > cmds_before, "motion resumed");
}

// ============================================================================
// Blocked space: security pause, not an error
// ============================================================================

#[test]
fn test_fully_blocked_security_pause() {
    let robot = MockRobot::new();
    // A dense wall right in front of the robot: every trajectory of the
    // forward PTG crosses it within a few centimeters.
    let wall: Vec<Point2D> = (-200..=200)
        .map(|i| Point2D::new(0.2, i as f32 * 0.0005))
        .collect();

    // Filtering off so the wall stays dense enough to block every path.
    let cfg = config("enable_obstacle_filtering = false", "");
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::with_points(robot.clone(), wall),
        &cfg,
    )
    .unwrap();
    nav.set_keep_log_records(true);

    nav.navigate(&NavRequest::new(2.0, 0.0, 0.1)).unwrap();
    run_until(&nav, &robot, 3, || false);

    // The robot paused but the navigation stays alive.
    assert_eq!(nav.state(), NavState::Navigating);
    assert!(robot.cmds().contains(&Cmd::Stop { emergency: true }));
    assert!(robot.pose().distance_2d(0.0, 0.0) < 1e-3);

    // No candidate was selected.
    let rec = nav.last_log_record().unwrap();
    assert_eq!(rec.selected_ptg, -1);
}

// ============================================================================
// Logging contract
// ============================================================================

#[test]
fn test_log_records_normalized_tp_obstacles() {
    let robot = MockRobot::new();
    let points = vec![
        Point2D::new(1.0, 0.0),
        Point2D::new(1.5, 0.5),
        Point2D::new(0.8, -0.4),
    ];
    let cfg = config("evaluate_clearance = true", "");
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::with_points(robot.clone(), points),
        &cfg,
    )
    .unwrap();
    nav.set_keep_log_records(true);

    nav.navigate(&NavRequest::new(3.0, 0.0, 0.1)).unwrap();
    nav.step();

    let rec = nav.last_log_record().unwrap();
    assert_eq!(rec.n_ptgs, 1);
    assert_eq!(rec.info_per_ptg.len(), 2);

    let info = &rec.info_per_ptg[0];
    assert!(!info.tp_obstacles.is_empty());
    for &d in &info.tp_obstacles {
        assert!((0.0..=1.0).contains(&d), "TP obstacle {} out of range", d);
    }
    // The obstacle straight ahead shortened the forward free distance.
    let k0 = info.tp_obstacles.len() / 2;
    assert!(info.tp_obstacles[k0] < 0.5);

    assert!(info.holo_log.is_some());
    assert!(info.clearance.is_some());
    assert!(rec.timestamps.contains_key("tim_start_iteration"));
    assert!(rec.values.contains_key("executionTime"));
}

#[test]
fn test_no_delay_model_keeps_identity_extrapolation() {
    let robot = MockRobot::new();
    let cfg = config("", "");
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();
    nav.set_keep_log_records(true);

    nav.navigate(&NavRequest::new(2.0, 0.0, 0.1)).unwrap();
    run_until(&nav, &robot, 3, || false);

    let rec = nav.last_log_record().unwrap();
    assert_eq!(rec.rel_pose_sense, marga_nav::Pose2D::identity());
    assert_eq!(rec.rel_pose_vel_cmd, marga_nav::Pose2D::identity());
}

#[test]
fn test_log_records_disabled_by_default() {
    let robot = MockRobot::new();
    let cfg = config("", "");
    let nav = ReactiveNavigator::new(
        robot.clone(),
        forward_ptgs(),
        SimObstacles::free_space(robot.clone()),
        &cfg,
    )
    .unwrap();

    nav.navigate(&NavRequest::new(2.0, 0.0, 0.1)).unwrap();
    run_until(&nav, &robot, 2, || false);

    assert!(nav.last_log_record().is_none());
}
