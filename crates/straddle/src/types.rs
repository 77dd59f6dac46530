//! Types for the straddle controller state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use straddle_core::StraddleError;

use crate::skew::PositionSkew;

/// Highest leg the controller can reach before only a reference reset is possible.
pub const MAX_LEG: u8 = 4;

/// Directional state of the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trend {
    #[default]
    Neutral,
    Bullish,
    Bearish,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Neutral => write!(f, "neutral"),
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
        }
    }
}

/// Decision points for the current leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub bullish_dp: Decimal,
    pub bearish_dp: Decimal,
    /// Zero at leg 0.
    pub reversal_p: Decimal,
}

/// Leg/trend state of one reference cycle.
///
/// Only the state machine mutates it; everything else sees copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub(crate) leg: u8,
    pub(crate) trend: Trend,
    pub(crate) thresholds: Thresholds,
    pub(crate) first_entry_placed: bool,
}

impl RuntimeState {
    pub(crate) const fn neutral(thresholds: Thresholds) -> Self {
        Self {
            leg: 0,
            trend: Trend::Neutral,
            thresholds,
            first_entry_placed: false,
        }
    }

    #[must_use]
    pub const fn leg(&self) -> u8 {
        self.leg
    }

    #[must_use]
    pub const fn trend(&self) -> Trend {
        self.trend
    }

    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    #[must_use]
    pub const fn first_entry_placed(&self) -> bool {
        self.first_entry_placed
    }
}

/// A state change the controller commits once its order instruction succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// Sell the straddle at the current ATM.
    InitialEntry,
    /// Neutral to leg 1 in `trend`.
    Enter { trend: Trend },
    /// One more leg in the current trend.
    Extend { trend: Trend, to_leg: u8 },
    /// One leg back against the current trend; `to_leg == 0` returns to neutral.
    Retreat { trend: Trend, to_leg: u8 },
    /// Reset boundary breached at the last leg; close everything and re-center.
    Reset { trend: Trend, new_atm: Decimal },
    /// The ladder's ATM moved at least one strike away from the reference.
    AtmShift { new_atm: Decimal },
}

impl Transition {
    /// Short name used in logs and order failure reports.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::InitialEntry => "initial_entry",
            Self::Enter { .. } => "enter",
            Self::Extend { .. } => "extend",
            Self::Retreat { .. } => "retreat",
            Self::Reset { .. } => "reset",
            Self::AtmShift { .. } => "atm_shift",
        }
    }
}

/// A transition whose order instruction failed; the state was not advanced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionFailure {
    pub transition: Transition,
    /// Consecutive samples on which this same transition failed. Resets to 1
    /// after any sample that commits, plans nothing, or plans a different
    /// transition.
    pub attempts: u32,
    pub error: StraddleError,
}

/// Result of evaluating one price sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The sample was for another instrument and was discarded.
    Stale,
    Evaluated {
        applied: Vec<Transition>,
        failure: Option<TransitionFailure>,
    },
}

impl TickOutcome {
    #[must_use]
    pub fn applied(&self) -> &[Transition] {
        match self {
            Self::Stale => &[],
            Self::Evaluated { applied, .. } => applied,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&TransitionFailure> {
        match self {
            Self::Stale => None,
            Self::Evaluated { failure, .. } => failure.as_ref(),
        }
    }
}

/// Read-only view of the controller, taken atomically between samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub leg: u8,
    pub trend: Trend,
    pub current_atm: Decimal,
    pub adjusted_reference: Decimal,
    pub bullish_dp: Decimal,
    pub bearish_dp: Decimal,
    pub reversal_p: Decimal,
    pub upper_reset_boundary: Decimal,
    pub lower_reset_boundary: Decimal,
    pub first_entry_placed: bool,
    pub call_id: String,
    pub put_id: String,
    /// Contracts the open legs sold into, leg 1 first.
    pub leg_contracts: Vec<String>,
    pub skew: PositionSkew,
    pub last_price: Option<Decimal>,
    pub stale_ticks: u64,
}
