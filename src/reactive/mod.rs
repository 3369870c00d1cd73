//! PTG-based reactive planning.
//!
//! One [`planner::ReactivePlanner`] instance runs the per-iteration
//! decision pipeline: transform workspace obstacles into each PTG's
//! TP-Space, run a holonomic sub-planner per view, score every
//! candidate movement, and let the motion decider pick one — including
//! the option of keeping the previously issued command.

mod candidate;
mod filter;
pub(crate) mod planner;

pub use candidate::CandidateMovement;
pub use filter::LowPassFilter;
pub use planner::ReactivePlanner;
