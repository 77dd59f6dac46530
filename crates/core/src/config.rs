use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{StraddleError, StraddleResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub instance: InstanceSettings,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub ladder: LadderSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSettings {
    pub instance_id: String,
    /// Underlying whose strike ladder and price stream drive the instance.
    pub symbol: String,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            instance_id: "jodi-atm-nifty".to_string(),
            symbol: "NIFTY".to_string(),
        }
    }
}

/// Tunable parameters of the straddle controller.
///
/// All price-like fields are in underlying points. `strike_interval` is the
/// fallback spacing used when the strike ladder does not report one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_offset")]
    pub offset: Decimal,
    #[serde(default = "default_threshold")]
    pub threshold: Decimal,
    #[serde(default)]
    pub adjustment_points: Decimal,
    #[serde(default = "default_strike_interval")]
    pub strike_interval: Decimal,
    #[serde(default = "default_base_quantity")]
    pub base_quantity: Decimal,
}

fn default_offset() -> Decimal {
    Decimal::from(10)
}

fn default_threshold() -> Decimal {
    Decimal::from(15)
}

fn default_strike_interval() -> Decimal {
    Decimal::from(100)
}

fn default_base_quantity() -> Decimal {
    Decimal::from(100)
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            offset: default_offset(),
            threshold: default_threshold(),
            adjustment_points: Decimal::ZERO,
            strike_interval: default_strike_interval(),
            base_quantity: default_base_quantity(),
        }
    }
}

impl StrategyConfig {
    /// Checks the parameter constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for negative offset/threshold/adjustment points
    /// or a non-positive strike interval/base quantity.
    pub fn validate(&self) -> StraddleResult<()> {
        let non_negative = [
            ("offset", self.offset),
            ("threshold", self.threshold),
            ("adjustment_points", self.adjustment_points),
        ];
        for (field, value) in non_negative {
            if value < Decimal::ZERO {
                return Err(StraddleError::config(field, format!("must be >= 0, got {value}")));
            }
        }

        let positive = [
            ("strike_interval", self.strike_interval),
            ("base_quantity", self.base_quantity),
        ];
        for (field, value) in positive {
            if value <= Decimal::ZERO {
                return Err(StraddleError::config(field, format!("must be > 0, got {value}")));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub command_buffer: usize,
    /// Capacity of the per-instance tick queue.
    pub tick_buffer: usize,
    pub event_buffer: usize,
    /// Default bound on how long `stop()` waits for an in-flight order call.
    pub stop_timeout_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            command_buffer: 32,
            tick_buffer: 1024,
            event_buffer: 1000,
            stop_timeout_ms: 5_000,
        }
    }
}

/// Static strike ladder used by the paper adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderSettings {
    pub underlying_token: String,
    pub spot: Decimal,
    pub strike_interval: Decimal,
    /// Number of strikes listed on each side of the ATM.
    pub strikes_each_side: u32,
}

impl Default for LadderSettings {
    fn default() -> Self {
        Self {
            underlying_token: "26000".to_string(),
            spot: Decimal::from(22000),
            strike_interval: Decimal::from(50),
            strikes_each_side: 20,
        }
    }
}
