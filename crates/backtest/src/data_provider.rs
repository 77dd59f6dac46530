use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use straddle_core::{PriceTick, TickSource};

const DEFAULT_CAPACITY: usize = 1024;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Replays recorded ticks from a CSV file.
///
/// Every row is delivered to each subscriber, including rows for other
/// tokens, the way a shared market data socket would.
pub struct CsvTickSource {
    ticks: Vec<PriceTick>,
    capacity: usize,
    pace: Option<Duration>,
    feeds: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl CsvTickSource {
    /// Loads ticks from a CSV file with a `timestamp,token,price` header.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The CSV file cannot be opened
    /// - A row has fewer than three columns
    /// - Timestamp parsing fails
    /// - Decimal parsing fails for the price
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open tick file {}", path.display()))?;
        let mut ticks = Vec::new();

        for (row, result) in reader.records().enumerate() {
            let record = result?;
            if record.len() < 3 {
                anyhow::bail!("row {}: expected timestamp,token,price", row + 1);
            }
            let timestamp: DateTime<Utc> = record[0]
                .trim()
                .parse()
                .with_context(|| format!("row {}: bad timestamp", row + 1))?;
            let token = record[1].trim().to_string();
            let price = Decimal::from_str(record[2].trim())
                .with_context(|| format!("row {}: bad price", row + 1))?;
            ticks.push(PriceTick::new(token, price, timestamp));
        }

        // Stable, so same-timestamp rows keep file order
        ticks.sort_by_key(|t| t.timestamp);

        info!(path = %path.display(), ticks = ticks.len(), "Loaded tick file");
        Ok(Self::from_ticks(ticks))
    }

    #[must_use]
    pub fn from_ticks(ticks: Vec<PriceTick>) -> Self {
        Self {
            ticks,
            capacity: DEFAULT_CAPACITY,
            pace: None,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Sleeps `pace` between ticks instead of replaying as fast as the
    /// receiver drains them.
    #[must_use]
    pub const fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

#[async_trait]
impl TickSource for CsvTickSource {
    async fn subscribe(&self, token: &str) -> Result<mpsc::Receiver<PriceTick>> {
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let ticks = self.ticks.clone();
        let pace = self.pace;

        let feed = tokio::spawn(async move {
            for tick in ticks {
                if tx.send(tick).await.is_err() {
                    break;
                }
                if let Some(pace) = pace {
                    tokio::time::sleep(pace).await;
                }
            }
        });

        if let Some(previous) = locked(&self.feeds).insert(token.to_string(), feed) {
            previous.abort();
        }
        debug!(token, "Replay feed started");
        Ok(rx)
    }

    async fn unsubscribe(&self, token: &str) -> Result<()> {
        if let Some(feed) = locked(&self.feeds).remove(token) {
            feed.abort();
            debug!(token, "Replay feed stopped");
        }
        Ok(())
    }
}

/// Push-driven tick source for live wiring and tests.
///
/// Ticks passed to [`publish`](Self::publish) go to every active subscriber.
#[derive(Debug)]
pub struct ChannelTickSource {
    capacity: usize,
    subscribers: Mutex<HashMap<String, mpsc::Sender<PriceTick>>>,
}

impl Default for ChannelTickSource {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChannelTickSource {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Sends `tick` to every subscriber. Returns how many received it.
    pub async fn publish(&self, tick: PriceTick) -> usize {
        let senders: Vec<(String, mpsc::Sender<PriceTick>)> = locked(&self.subscribers)
            .iter()
            .map(|(token, tx)| (token.clone(), tx.clone()))
            .collect();

        let mut delivered = 0;
        for (token, tx) in senders {
            if tx.send(tick.clone()).await.is_ok() {
                delivered += 1;
            } else {
                locked(&self.subscribers).remove(&token);
            }
        }
        delivered
    }

    #[must_use]
    pub fn is_subscribed(&self, token: &str) -> bool {
        locked(&self.subscribers).contains_key(token)
    }
}

#[async_trait]
impl TickSource for ChannelTickSource {
    async fn subscribe(&self, token: &str) -> Result<mpsc::Receiver<PriceTick>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        locked(&self.subscribers).insert(token.to_string(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, token: &str) -> Result<()> {
        locked(&self.subscribers).remove(token);
        Ok(())
    }
}
