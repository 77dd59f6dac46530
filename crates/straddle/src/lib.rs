//! Dynamic ATM straddle trend controller.
//!
//! Sells a straddle at the at-the-money strike, then follows the underlying:
//! - Tracks the ATM reference and its reset boundaries
//! - Derives decision and reversal points for each leg
//! - Skews quantity toward the trend side one leg at a time, up to leg 4
//! - Closes everything and re-centers when the last leg's boundary breaks
//!
//! All arithmetic is on `Decimal`, so identical inputs give identical state.

pub mod machine;
pub mod reference;
pub mod skew;
pub mod thresholds;
pub mod types;

pub use machine::TrendStateMachine;
pub use reference::{AtmReferenceTracker, ReferenceState};
pub use skew::{leg_shift_quantity, PositionSkew, LEG_SHIFT_FRACTION};
pub use thresholds::{compute_thresholds, reversal_multiplier, strike_multiplier};
pub use types::{
    RuntimeState, Snapshot, Thresholds, TickOutcome, Transition, TransitionFailure, Trend, MAX_LEG,
};
