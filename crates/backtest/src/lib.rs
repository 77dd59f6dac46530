//! Paper adapters for running the straddle controller without a broker.

pub mod data_provider;
pub mod execution;
pub mod ladder;

pub use data_provider::{ChannelTickSource, CsvTickSource};
pub use execution::{OrderRecord, PaperOrderCoordinator};
pub use ladder::StaticStrikeLadder;
