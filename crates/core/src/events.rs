use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A price sample for a subscribed instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Exchange token of the instrument the price belongs to.
    pub token: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    #[must_use]
    pub fn new(token: impl Into<String>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            price,
            timestamp,
        }
    }
}

/// Call and put contracts listed at one strike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionPair {
    pub call_id: String,
    pub put_id: String,
}

/// ATM view of an underlying's strike ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtmInfo {
    /// Token carrying the underlying's price stream.
    pub underlying_token: String,
    pub atm_strike: Decimal,
    /// Spacing between adjacent strikes; zero when the ladder has fewer than two strikes.
    pub strike_interval: Decimal,
    pub options: OptionPair,
}
