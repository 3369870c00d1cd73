//! Per-iteration navigation log records.
//!
//! One [`LogRecord`] is produced per planning iteration and appended to
//! a `log_<NNN>.reactivenavlog` file as a length-prefixed postcard
//! frame:
//!
//! ```text
//! [len:u32 LE][postcard payload] ...
//! ```
//!
//! Files are numbered with the smallest non-colliding 3-digit integer
//! starting at 1, inside a configurable directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::core::types::{Point2D, Pose2D, Twist2D};
use crate::error::Result;
use crate::holonomic::HoloLogRecord;
use crate::interface::VelCmd;
use crate::ptg::ClearanceDiagram;

/// Per-PTG slot of a log record.
///
/// Slot `n_ptgs` (one past the real PTGs) describes the evaluation of
/// the "keep last command" option when it was considered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PtgLogInfo {
    /// PTG description, or a continuation note for the extra slot.
    pub ptg_desc: String,
    /// Normalized TP-Space obstacle distances.
    pub tp_obstacles: Vec<f32>,
    /// Target in TP-Space.
    pub tp_target: Point2D,
    /// Robot location in TP-Space (continuation slot only).
    pub tp_robot: Point2D,
    /// Clearance diagram, when clearance evaluation is enabled.
    pub clearance: Option<ClearanceDiagram>,
    /// Log record of the holonomic method run on this PTG.
    pub holo_log: Option<HoloLogRecord>,
    /// Scalar evaluation assigned by the motion decider.
    pub evaluation: f64,
    /// Scoring properties of the candidate built on this PTG.
    pub eval_factors: BTreeMap<String, f64>,
    /// Direction chosen by the holonomic method.
    pub desired_direction: f32,
    /// Speed chosen by the holonomic method.
    pub desired_speed: f64,
    /// Seconds spent on the workspace → TP-Space transform.
    pub time_tp_transform: f64,
    /// Seconds spent inside the holonomic method.
    pub time_holonomic: f64,
}

/// Everything the planner knew and decided in one iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogRecord {
    /// Robot pose at the start of the iteration.
    pub robot_pose: Pose2D,
    /// Velocity in the global frame.
    pub cur_vel: Twist2D,
    /// Velocity in the body frame.
    pub cur_vel_local: Twist2D,
    /// Target relative to the planning origin.
    pub ws_target_relative: Point2D,
    /// Index of the selected candidate (-1: none viable).
    pub selected_ptg: i32,
    /// The emitted command, if a new one was sent.
    pub cmd_vel: Option<VelCmd>,
    /// Whether the decision was to keep the previous command.
    pub cmd_is_nop: bool,
    /// Number of real PTG slots (the record holds one extra).
    pub n_ptgs: usize,
    /// Workspace obstacle cloud used this iteration.
    pub ws_obstacles: Vec<Point2D>,
    /// Per-PTG information; length `n_ptgs + 1`.
    pub info_per_ptg: Vec<PtgLogInfo>,
    /// Extrapolated relative pose at obstacle-sense time.
    pub rel_pose_sense: Pose2D,
    /// Extrapolated relative pose at command-arrival time.
    pub rel_pose_vel_cmd: Pose2D,
    /// Current pose relative to the pose at the last command send.
    pub rel_cur_pose_nop: Pose2D,
    /// Planning origin of the continuation slot.
    pub rel_pose_ptg_origin_nop: Pose2D,
    /// PTG index of the continuation, -1 when not selected.
    pub ptg_index_nop: i32,
    /// Path index of the last sent command.
    pub ptg_last_k_nop: usize,
    /// Body-frame velocity at the last command send.
    pub ptg_last_vel_local: Twist2D,
    /// Named scalar diagnostics (delay estimates, timings, ...).
    pub values: BTreeMap<String, f64>,
    /// Named robot-clock timestamps.
    pub timestamps: BTreeMap<String, f64>,
    /// Free-form diagnostics from the decision pipeline.
    pub additional_debug_msgs: BTreeMap<String, String>,
}

/// Appends log records to a `.reactivenavlog` file.
pub struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogWriter {
    /// Open a new log file inside `dir`, picking the smallest
    /// non-colliding `log_<NNN>.reactivenavlog` name (NNN ≥ 1).
    pub fn create_in(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut n = 1u32;
        let path = loop {
            let candidate = dir.join(format!("log_{:03}.reactivenavlog", n));
            if !candidate.exists() {
                break candidate;
            }
            n += 1;
        };

        let writer = BufWriter::new(File::create(&path)?);
        log::debug!("Navigation log file: {:?}", path);
        Ok(Self { path, writer })
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it.
    pub fn write_record(&mut self, record: &LogRecord) -> Result<()> {
        let payload = postcard::to_allocvec(record)?;
        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Read back every record of a `.reactivenavlog` file.
pub fn read_log_records(path: &Path) -> Result<Vec<LogRecord>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        records.push(postcard::from_bytes(&payload)?);
    }

    Ok(records)
}
