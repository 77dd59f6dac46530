use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use straddle_core::{StraddleError, StraddleResult, StrategyConfig};
use straddle_engine::{Snapshot, Transition};

use crate::commands::{InstanceState, StrategyCommand};
use crate::events::{InstanceStatus, StrategyEvent};

/// Cloneable control surface of one controller instance.
#[derive(Clone)]
pub struct StrategyHandle {
    instance_id: String,
    stop_timeout: Duration,
    tx: mpsc::Sender<StrategyCommand>,
    event_tx: broadcast::Sender<StrategyEvent>,
    status_rx: watch::Receiver<InstanceStatus>,
}

impl StrategyHandle {
    #[must_use]
    pub const fn new(
        instance_id: String,
        stop_timeout: Duration,
        tx: mpsc::Sender<StrategyCommand>,
        event_tx: broadcast::Sender<StrategyEvent>,
        status_rx: watch::Receiver<InstanceStatus>,
    ) -> Self {
        Self {
            instance_id,
            stop_timeout,
            tx,
            event_tx,
            status_rx,
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> StrategyCommand,
    ) -> StraddleResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(command(tx))
            .await
            .map_err(|_| StraddleError::ChannelClosed)?;
        rx.await.map_err(|_| StraddleError::ChannelClosed)
    }

    /// Resolves the ATM reference, subscribes to the underlying and starts
    /// evaluating samples.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the instance is `Created`, `Stopped` or
    /// `Error`; `ReferenceUnavailable` or `TickSourceFailed` when startup fails.
    pub async fn start(&self) -> StraddleResult<()> {
        self.request(StrategyCommand::Start).await?
    }

    /// Drops incoming samples until [`resume`](Self::resume).
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the instance is `Running`.
    pub async fn pause(&self) -> StraddleResult<()> {
        self.request(StrategyCommand::Pause).await?
    }

    /// Continues evaluation on the preserved state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the instance is `Paused`.
    pub async fn resume(&self) -> StraddleResult<()> {
        self.request(StrategyCommand::Resume).await?
    }

    /// Stops with the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`stop_with_timeout`](Self::stop_with_timeout).
    pub async fn stop(&self) -> StraddleResult<()> {
        self.stop_with_timeout(self.stop_timeout).await
    }

    /// Discards queued samples, waits up to `timeout` for an in-flight order
    /// call and unsubscribes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless `Running` or `Paused`, and `StopTimeout`
    /// (leaving the instance in `Error`) when the in-flight call outlives `timeout`.
    pub async fn stop_with_timeout(&self, timeout: Duration) -> StraddleResult<()> {
        self.request(|reply| StrategyCommand::Stop { timeout, reply })
            .await?
    }

    /// Applies new parameters from the next sample on.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` and keeps the current parameters when `config` is invalid.
    pub async fn update_parameters(&self, config: StrategyConfig) -> StraddleResult<()> {
        self.request(|reply| StrategyCommand::UpdateParameters {
            config: Box::new(config),
            reply,
        })
        .await?
    }

    /// Reports a new ATM from the strike ladder.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless active, or the order/reference error that
    /// prevented the shift.
    pub async fn on_atm_updated(&self, new_atm: Decimal) -> StraddleResult<Option<Transition>> {
        self.request(|reply| StrategyCommand::AtmUpdated { new_atm, reply })
            .await?
    }

    /// Reads the controller state between samples.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` before the first start.
    pub async fn snapshot(&self) -> StraddleResult<Snapshot> {
        self.request(StrategyCommand::Snapshot).await?
    }

    /// # Errors
    ///
    /// Returns `ChannelClosed` if the instance has shut down.
    pub async fn get_status(&self) -> StraddleResult<InstanceStatus> {
        self.request(StrategyCommand::GetStatus).await
    }

    /// Latest published status without a round trip to the actor.
    #[must_use]
    pub fn latest_status(&self) -> InstanceStatus {
        self.status_rx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<StrategyEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<InstanceStatus> {
        self.status_rx.clone()
    }

    /// Waits until the instance reaches `state`.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` if the instance shuts down first.
    pub async fn wait_for_state(&self, state: InstanceState) -> StraddleResult<InstanceStatus> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|status| status.state == state)
            .await
            .map_err(|_| StraddleError::ChannelClosed)?;
        Ok(status.clone())
    }

    /// # Errors
    ///
    /// Returns `ChannelClosed` if the instance has already shut down.
    pub async fn shutdown(&self) -> StraddleResult<()> {
        self.tx
            .send(StrategyCommand::Shutdown)
            .await
            .map_err(|_| StraddleError::ChannelClosed)
    }
}
