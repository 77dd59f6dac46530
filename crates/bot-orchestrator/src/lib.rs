//! Lifecycle host for straddle controller instances.
//!
//! One actor per instance owns the lifecycle; a separate evaluator task feeds
//! samples to the shared state machine so `stop()` can bound its wait on an
//! in-flight order call.

pub mod commands;
pub mod events;
pub mod handle;
pub mod registry;
pub mod strategy_actor;

pub use commands::{InstanceConfig, InstanceState, StrategyCommand};
pub use events::{InstanceStatus, StrategyEvent, RECENT_EVENTS};
pub use handle::StrategyHandle;
pub use registry::StrategyRegistry;
pub use strategy_actor::{spawn_instance, Collaborators, StrategyActor};
