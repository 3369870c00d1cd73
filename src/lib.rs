//! MargaNav - Reactive PTG-based navigation core for mobile robots
//!
//! Given a list of waypoints, a continually updated pose/velocity
//! estimate and a stream of obstacle observations, the navigator picks
//! one kinematic velocity command per control cycle (or explicitly
//! keeps the previous one) that moves the robot toward the active
//! waypoint while avoiding obstacles and honoring the robot's
//! kinematic constraints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  navigator/                         │  ← Lifecycle + waypoint sequencing
//! │       (state machine, alarms, pose history)         │
//! └─────────────────────────────────────────────────────┘
//!                          │ one iteration per step()
//! ┌─────────────────────────────────────────────────────┐
//! │                  reactive/                          │  ← Decision pipeline
//! │   (TP-Space views, candidates, delay model, log)    │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌───────────────┬─────────────────┬───────────────────┐
//! │     ptg/      │   holonomic/    │     decider/      │  ← Pluggable capabilities
//! │ (trajectories)│  (TP planners)  │ (multi-objective) │
//! └───────────────┴─────────────────┴───────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, math)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The host supplies a [`RobotInterface`] (pose/velocity queries,
//! command submission, event sinks) and an [`ObstacleSource`], then
//! calls [`ReactiveNavigator::step`] at a roughly fixed cadence.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use marga_nav::{ArcPtg, NavRequest, NavigatorConfig, ReactiveNavigator};
//! # use marga_nav::{ObstacleSource, RobotInterface};
//! # fn robot() -> Arc<dyn RobotInterface> { unimplemented!() }
//! # fn obstacles() -> Box<dyn ObstacleSource> { unimplemented!() }
//!
//! # fn main() -> marga_nav::Result<()> {
//! let cfg = NavigatorConfig::load(std::path::Path::new("marga.toml"))?;
//! let ptgs: Vec<Box<dyn marga_nav::Ptg>> =
//!     vec![Box::new(ArcPtg::new(Default::default()))];
//!
//! let nav = ReactiveNavigator::new(robot(), ptgs, obstacles(), &cfg)?;
//! nav.navigate(&NavRequest::new(2.0, 0.0, 0.1))?;
//! loop {
//!     nav.step(); // call at ~10 Hz
//! }
//! # }
//! ```

pub mod config;
pub mod core;
pub mod decider;
pub mod error;
pub mod holonomic;
pub mod interface;
pub mod logrecord;
pub mod navigator;
pub mod ptg;
pub mod reactive;
pub mod waypoints;

pub use config::NavigatorConfig;
pub use core::types::{Point2D, Pose2D, PoseVelSample, Timestamped, Twist2D};
pub use decider::MotionDecider;
pub use error::{NavError, Result};
pub use holonomic::HolonomicMethod;
pub use interface::{ObstacleSource, RobotInterface, SpeedLimits, VelCmd};
pub use logrecord::{LogRecord, read_log_records};
pub use navigator::{NavRequest, NavState, ReactiveNavigator};
pub use ptg::{ArcPtg, ArcPtgConfig, ClearanceDiagram, Ptg};
pub use reactive::ReactivePlanner;
pub use waypoints::{Waypoint, WaypointStatus, WaypointStatusSequence};
