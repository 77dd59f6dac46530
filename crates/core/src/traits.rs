use crate::events::{AtmInfo, OptionPair, PriceTick};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

/// Delivers underlying price samples over a channel.
#[async_trait]
pub trait TickSource: Send + Sync {
    /// Starts delivery for `token`. Samples arrive in the order the source
    /// produced them; the stream ends when the returned receiver yields `None`.
    async fn subscribe(&self, token: &str) -> Result<mpsc::Receiver<PriceTick>>;

    async fn unsubscribe(&self, token: &str) -> Result<()>;
}

/// Executes the order instructions issued by the controller.
///
/// Every call resolves before the controller commits the transition that
/// issued it. Retrying is the caller's job.
#[async_trait]
pub trait OrderCoordinator: Send + Sync {
    /// Sells `quantity` of both the call and the put.
    async fn place_initial_straddle(&self, call_id: &str, put_id: &str, quantity: Decimal)
        -> Result<()>;

    /// Moves `quantity` of short exposure from `from_id` to `to_id`.
    async fn shift_quantity(&self, from_id: &str, to_id: &str, quantity: Decimal) -> Result<()>;

    /// Flattens every open position in `ids`.
    async fn close_all(&self, ids: &[String]) -> Result<()>;
}

/// Strike ladder lookup for an underlying.
#[async_trait]
pub trait StrikeLookup: Send + Sync {
    /// Resolves the current ATM strike and its option pair.
    async fn resolve_atm(&self, symbol: &str) -> Result<AtmInfo>;

    /// Resolves the option pair listed at `strike`, if the ladder has one.
    async fn option_pair(&self, symbol: &str, strike: Decimal) -> Result<Option<OptionPair>>;
}
