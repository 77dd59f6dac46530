use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use straddle_core::{AppConfig, RuntimeSettings, StraddleResult, StrategyConfig};
use straddle_engine::{Snapshot, Transition};

use crate::events::InstanceStatus;

pub type Reply<T> = oneshot::Sender<StraddleResult<T>>;

#[derive(Debug)]
pub enum StrategyCommand {
    Start(Reply<()>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop {
        timeout: Duration,
        reply: Reply<()>,
    },
    UpdateParameters {
        config: Box<StrategyConfig>,
        reply: Reply<()>,
    },
    AtmUpdated {
        new_atm: Decimal,
        reply: Reply<Option<Transition>>,
    },
    Snapshot(Reply<Snapshot>),
    GetStatus(oneshot::Sender<InstanceStatus>),
    Shutdown,
}

/// Everything needed to host one controller instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub instance_id: String,
    pub symbol: String,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl InstanceConfig {
    #[must_use]
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            instance_id: app.instance.instance_id.clone(),
            symbol: app.instance.symbol.clone(),
            strategy: app.strategy.clone(),
            runtime: app.runtime.clone(),
        }
    }

    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.stop_timeout_ms)
    }
}

/// Lifecycle of a hosted instance.
///
/// `Created -> Running <-> Paused -> Stopped`; `Stopped` and `Error` can be
/// started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Created,
    Running,
    Paused,
    Stopped,
    Error,
}

impl InstanceState {
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Created | Self::Stopped | Self::Error)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
