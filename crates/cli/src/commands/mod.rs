//! CLI commands for the straddle controller.

pub mod replay;
pub mod thresholds;

pub use replay::{run_replay, ReplayArgs};
pub use thresholds::{run_thresholds, ThresholdsArgs};
