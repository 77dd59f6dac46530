use std::time::Duration;

use thiserror::Error;

/// Errors raised by the straddle controller and its lifecycle host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StraddleError {
    /// A configuration value violates its constraint. State is left unchanged.
    #[error("invalid configuration: {field} {reason}")]
    ConfigInvalid {
        /// Offending field name.
        field: &'static str,
        /// Constraint that was violated.
        reason: String,
    },

    /// Strike/reference lookup failed or produced an unusable reference.
    #[error("reference unavailable: {0}")]
    ReferenceUnavailable(String),

    /// The order coordinator rejected an instruction. The transition that
    /// issued it was not committed.
    #[error("order action {action} failed: {message}")]
    OrderActionFailed {
        /// Instruction that failed (`initial_straddle`, `shift`, `close_all`).
        action: &'static str,
        /// Coordinator error message.
        message: String,
    },

    /// A lifecycle operation was requested in a state that does not allow it.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Requested operation.
        operation: &'static str,
        /// Current lifecycle state.
        state: String,
    },

    /// The tick source refused the subscription on start.
    #[error("tick source failed: {0}")]
    TickSourceFailed(String),

    /// `stop()` gave up waiting for an in-flight order call.
    #[error("stop timed out after {0:?} waiting for in-flight order call")]
    StopTimeout(Duration),

    /// The instance actor is gone.
    #[error("strategy instance channel closed")]
    ChannelClosed,
}

impl StraddleError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field,
            reason: reason.into(),
        }
    }

    /// Wraps a coordinator failure.
    #[must_use]
    pub fn order_failed(action: &'static str, err: &anyhow::Error) -> Self {
        Self::OrderActionFailed {
            action,
            message: format!("{err:#}"),
        }
    }
}

pub type StraddleResult<T> = std::result::Result<T, StraddleError>;
