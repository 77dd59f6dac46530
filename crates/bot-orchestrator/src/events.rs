use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use straddle_core::StrategyConfig;
use straddle_engine::{Snapshot, Transition, Trend};

use crate::commands::InstanceState;

/// Number of events kept in [`InstanceStatus::recent_events`].
pub const RECENT_EVENTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StrategyEvent {
    /// Lifecycle state changed
    StateChanged {
        state: InstanceState,
        timestamp: DateTime<Utc>,
    },

    /// A transition was committed after its order instruction succeeded
    TransitionApplied {
        transition: Transition,
        leg: u8,
        trend: Trend,
        price: Option<Decimal>,
        timestamp: DateTime<Utc>,
    },

    /// An order instruction failed; the transition will be re-planned
    OrderFailed {
        transition: Transition,
        attempts: u32,
        message: String,
        timestamp: DateTime<Utc>,
    },

    ParametersChanged {
        config: StrategyConfig,
        timestamp: DateTime<Utc>,
    },

    /// The tick feed closed on its own
    FeedClosed { timestamp: DateTime<Utc> },

    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub instance_id: String,
    pub state: InstanceState,
    pub last_heartbeat: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,

    /// Controller state as of the last evaluated sample
    pub snapshot: Option<Snapshot>,

    /// Samples discarded while paused, across all runs
    pub paused_drops: u64,

    // Recent events (last 10)
    pub recent_events: Vec<StrategyEvent>,

    pub error: Option<String>,
}

impl InstanceStatus {
    #[must_use]
    pub fn created(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            state: InstanceState::Created,
            last_heartbeat: Utc::now(),
            started_at: None,
            snapshot: None,
            paused_drops: 0,
            recent_events: Vec::new(),
            error: None,
        }
    }
}
