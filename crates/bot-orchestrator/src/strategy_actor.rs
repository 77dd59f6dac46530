use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use straddle_core::{
    OrderCoordinator, PriceTick, StraddleError, StraddleResult, StrategyConfig, StrikeLookup,
    TickSource,
};
use straddle_engine::{Snapshot, TickOutcome, Transition, TrendStateMachine};

use crate::commands::{InstanceConfig, InstanceState, Reply, StrategyCommand};
use crate::events::{InstanceStatus, StrategyEvent, RECENT_EVENTS};
use crate::handle::StrategyHandle;

/// External collaborators an instance is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub ticks: Arc<dyn TickSource>,
    pub orders: Arc<dyn OrderCoordinator>,
    pub strikes: Arc<dyn StrikeLookup>,
}

type SharedMachine = Arc<Mutex<TrendStateMachine>>;

/// Work the evaluator runs between samples, in the order it was sent.
#[derive(Debug)]
enum Control {
    Reconfigure {
        config: StrategyConfig,
        reply: Reply<()>,
    },
    AtmUpdated {
        new_atm: Decimal,
        reply: Reply<Option<Transition>>,
    },
}

impl Control {
    fn reject(self, error: StraddleError) {
        match self {
            Self::Reconfigure { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::AtmUpdated { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// Message from the evaluator back to the actor.
#[derive(Debug)]
enum Report {
    Evaluated {
        run: u64,
        outcome: TickOutcome,
        snapshot: Snapshot,
    },
    AtmShift {
        run: u64,
        transition: Transition,
        snapshot: Snapshot,
    },
    Reconfigured {
        run: u64,
        config: StrategyConfig,
        snapshot: Snapshot,
    },
    DroppedWhilePaused {
        run: u64,
    },
    FeedClosed {
        run: u64,
    },
}

/// The tick-consuming task of a running instance.
struct Evaluator {
    task: JoinHandle<()>,
    cancel: watch::Sender<bool>,
    controls: mpsc::UnboundedSender<Control>,
    paused: Arc<AtomicBool>,
    token: String,
}

/// Validates `config` and spawns an instance in `Created`.
///
/// # Errors
///
/// Returns `ConfigInvalid` when the strategy parameters are invalid.
pub fn spawn_instance(
    config: InstanceConfig,
    collaborators: Collaborators,
) -> StraddleResult<StrategyHandle> {
    config.strategy.validate()?;

    let (tx, rx) = mpsc::channel(config.runtime.command_buffer.max(1));
    let (event_tx, _event_rx) = broadcast::channel(config.runtime.event_buffer.max(1));
    let (status_tx, status_rx) = watch::channel(InstanceStatus::created(&config.instance_id));

    let handle = StrategyHandle::new(
        config.instance_id.clone(),
        config.stop_timeout(),
        tx,
        event_tx.clone(),
        status_rx,
    );

    let actor = StrategyActor::new(config, collaborators, rx, event_tx, status_tx);
    tokio::spawn(actor.run());

    Ok(handle)
}

pub struct StrategyActor {
    config: InstanceConfig,
    collaborators: Collaborators,
    state: InstanceState,
    rx: mpsc::Receiver<StrategyCommand>,

    machine: Option<SharedMachine>,
    evaluator: Option<Evaluator>,
    run: u64,
    started_at: Option<DateTime<Utc>>,

    report_tx: mpsc::UnboundedSender<Report>,
    report_rx: mpsc::UnboundedReceiver<Report>,

    // Event streaming
    event_tx: broadcast::Sender<StrategyEvent>,
    status_tx: watch::Sender<InstanceStatus>,
    recent_events: VecDeque<StrategyEvent>,
    last_snapshot: Option<Snapshot>,
    last_error: Option<String>,
    paused_drops: u64,
}

impl StrategyActor {
    #[must_use]
    pub fn new(
        config: InstanceConfig,
        collaborators: Collaborators,
        rx: mpsc::Receiver<StrategyCommand>,
        event_tx: broadcast::Sender<StrategyEvent>,
        status_tx: watch::Sender<InstanceStatus>,
    ) -> Self {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        Self {
            config,
            collaborators,
            state: InstanceState::Created,
            rx,
            machine: None,
            evaluator: None,
            run: 0,
            started_at: None,
            report_tx,
            report_rx,
            event_tx,
            status_tx,
            recent_events: VecDeque::with_capacity(RECENT_EVENTS),
            last_snapshot: None,
            last_error: None,
            paused_drops: 0,
        }
    }

    /// Runs the actor's command loop until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!(instance_id = %self.config.instance_id, "Strategy instance created");

        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if matches!(cmd, StrategyCommand::Shutdown) {
                        info!(instance_id = %self.config.instance_id, "Shutting down");
                        break;
                    }
                    self.handle_command(cmd).await;
                }
                Some(report) = self.report_rx.recv() => self.handle_report(report).await,
            }
        }

        if let Some(evaluator) = self.evaluator.take() {
            let _ = evaluator.cancel.send(true);
            evaluator.task.abort();
            self.unsubscribe(&evaluator.token).await;
        }
        info!(instance_id = %self.config.instance_id, "Strategy instance stopped");
    }

    async fn handle_command(&mut self, cmd: StrategyCommand) {
        match cmd {
            StrategyCommand::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            StrategyCommand::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            StrategyCommand::Resume(reply) => {
                let _ = reply.send(self.resume());
            }
            StrategyCommand::Stop { timeout, reply } => {
                let result = self.stop(timeout).await;
                let _ = reply.send(result);
            }
            StrategyCommand::UpdateParameters { config, reply } => {
                self.update_parameters(*config, reply);
            }
            StrategyCommand::AtmUpdated { new_atm, reply } => {
                self.atm_updated(new_atm, reply);
            }
            StrategyCommand::Snapshot(reply) => self.snapshot(reply),
            StrategyCommand::GetStatus(reply) => {
                let _ = reply.send(self.status());
            }
            StrategyCommand::Shutdown => {}
        }
    }

    async fn start(&mut self) -> StraddleResult<()> {
        self.require("start", self.state.can_start())?;
        let id = self.config.instance_id.clone();
        info!(instance_id = %id, symbol = %self.config.symbol, "Starting strategy instance");

        let machine = match TrendStateMachine::start(
            &self.config.symbol,
            self.config.strategy.clone(),
            self.collaborators.orders.clone(),
            self.collaborators.strikes.clone(),
        )
        .await
        {
            Ok(machine) => machine,
            Err(e) => {
                self.fail(format!("Initialization failed: {e}"));
                return Err(e);
            }
        };

        let token = machine.underlying_token().to_string();
        let ticks = match self.collaborators.ticks.subscribe(&token).await {
            Ok(ticks) => ticks,
            Err(e) => {
                let err = StraddleError::TickSourceFailed(format!("{token}: {e:#}"));
                self.fail(format!("Initialization failed: {err}"));
                return Err(err);
            }
        };

        self.last_snapshot = Some(machine.snapshot());
        let machine = Arc::new(Mutex::new(machine));
        self.run += 1;

        let (cancel, cancel_rx) = watch::channel(false);
        let (controls, controls_rx) = mpsc::unbounded_channel();
        let paused = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(evaluate(
            EvaluatorContext {
                instance_id: id.clone(),
                run: self.run,
                machine: machine.clone(),
                paused: paused.clone(),
                reports: self.report_tx.clone(),
            },
            ticks,
            controls_rx,
            cancel_rx,
        ));

        self.machine = Some(machine);
        self.evaluator = Some(Evaluator {
            task,
            cancel,
            controls,
            paused,
            token: token.clone(),
        });
        self.started_at = Some(Utc::now());
        self.last_error = None;
        self.set_state(InstanceState::Running);
        info!(instance_id = %id, token = %token, "Strategy instance running");
        Ok(())
    }

    fn pause(&mut self) -> StraddleResult<()> {
        self.require("pause", self.state == InstanceState::Running)?;
        if let Some(evaluator) = &self.evaluator {
            evaluator.paused.store(true, Ordering::SeqCst);
        }
        info!(instance_id = %self.config.instance_id, "Strategy instance paused");
        self.set_state(InstanceState::Paused);
        Ok(())
    }

    fn resume(&mut self) -> StraddleResult<()> {
        self.require("resume", self.state == InstanceState::Paused)?;
        if let Some(evaluator) = &self.evaluator {
            evaluator.paused.store(false, Ordering::SeqCst);
        }
        info!(instance_id = %self.config.instance_id, "Strategy instance resumed");
        self.set_state(InstanceState::Running);
        Ok(())
    }

    /// Discards queued samples and controls, waits up to `timeout` for the unit
    /// being evaluated, then unsubscribes.
    async fn stop(&mut self, timeout: Duration) -> StraddleResult<()> {
        self.require("stop", self.state.is_active())?;
        let Some(mut evaluator) = self.evaluator.take() else {
            self.set_state(InstanceState::Stopped);
            return Ok(());
        };

        let _ = evaluator.cancel.send(true);
        let joined = tokio::time::timeout(timeout, &mut evaluator.task).await;
        self.unsubscribe(&evaluator.token).await;

        if joined.is_err() {
            evaluator.task.abort();
            let err = StraddleError::StopTimeout(timeout);
            self.fail(err.to_string());
            return Err(err);
        }

        info!(instance_id = %self.config.instance_id, "Strategy instance stopped");
        self.set_state(InstanceState::Stopped);
        Ok(())
    }

    fn update_parameters(&mut self, config: StrategyConfig, reply: Reply<()>) {
        if let Err(e) = config.validate() {
            warn!(instance_id = %self.config.instance_id, error = %e, "Rejected parameter change");
            let _ = reply.send(Err(e));
            return;
        }

        if self.state.is_active() {
            // Recorded once the evaluator has applied it
            self.send_control("update parameters", Control::Reconfigure { config, reply });
            return;
        }

        // Picked up by the next start()
        self.record_parameters(config);
        self.publish_status();
        let _ = reply.send(Ok(()));
    }

    fn atm_updated(&self, new_atm: Decimal, reply: Reply<Option<Transition>>) {
        if let Err(e) = self.require("update ATM", self.state.is_active()) {
            let _ = reply.send(Err(e));
            return;
        }
        self.send_control("update ATM", Control::AtmUpdated { new_atm, reply });
    }

    fn send_control(&self, operation: &'static str, control: Control) {
        let Some(evaluator) = &self.evaluator else {
            control.reject(self.invalid(operation));
            return;
        };
        if let Err(mpsc::error::SendError(control)) = evaluator.controls.send(control) {
            control.reject(self.invalid(operation));
        }
    }

    fn record_parameters(&mut self, config: StrategyConfig) {
        self.config.strategy = config.clone();
        self.add_event(StrategyEvent::ParametersChanged {
            config,
            timestamp: Utc::now(),
        });
    }

    fn snapshot(&self, reply: Reply<Snapshot>) {
        let Some(machine) = self.machine.clone() else {
            let _ = reply.send(Err(self.invalid("snapshot")));
            return;
        };
        // Taken under the machine lock, so never between a call and its commit
        tokio::spawn(async move {
            let snapshot = machine.lock().await.snapshot();
            let _ = reply.send(Ok(snapshot));
        });
    }

    async fn handle_report(&mut self, report: Report) {
        match report {
            Report::Evaluated {
                run,
                outcome,
                snapshot,
            } => {
                let price = snapshot.last_price;
                if let TickOutcome::Evaluated { applied, failure } = outcome {
                    for transition in applied {
                        self.add_event(StrategyEvent::TransitionApplied {
                            transition,
                            leg: snapshot.leg,
                            trend: snapshot.trend,
                            price,
                            timestamp: Utc::now(),
                        });
                    }
                    if let Some(failure) = failure {
                        self.add_event(StrategyEvent::OrderFailed {
                            transition: failure.transition,
                            attempts: failure.attempts,
                            message: failure.error.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }
                self.accept_snapshot(run, snapshot);
            }
            Report::AtmShift {
                run,
                transition,
                snapshot,
            } => {
                self.add_event(StrategyEvent::TransitionApplied {
                    transition,
                    leg: snapshot.leg,
                    trend: snapshot.trend,
                    price: snapshot.last_price,
                    timestamp: Utc::now(),
                });
                self.accept_snapshot(run, snapshot);
            }
            Report::Reconfigured {
                run,
                config,
                snapshot,
            } => {
                if run == self.run {
                    self.record_parameters(config);
                }
                self.accept_snapshot(run, snapshot);
            }
            Report::DroppedWhilePaused { run } => {
                if run == self.run {
                    self.paused_drops += 1;
                    self.publish_status();
                }
            }
            Report::FeedClosed { run } => {
                if run != self.run || !self.state.is_active() {
                    return;
                }
                info!(instance_id = %self.config.instance_id, "Tick feed closed");
                if let Some(evaluator) = self.evaluator.take() {
                    self.unsubscribe(&evaluator.token).await;
                }
                self.add_event(StrategyEvent::FeedClosed {
                    timestamp: Utc::now(),
                });
                self.set_state(InstanceState::Stopped);
            }
        }
    }

    fn accept_snapshot(&mut self, run: u64, snapshot: Snapshot) {
        if run == self.run {
            self.last_snapshot = Some(snapshot);
        }
        self.publish_status();
    }

    async fn unsubscribe(&self, token: &str) {
        if let Err(e) = self.collaborators.ticks.unsubscribe(token).await {
            warn!(instance_id = %self.config.instance_id, token, error = %e, "Unsubscribe failed");
        }
    }

    fn invalid(&self, operation: &'static str) -> StraddleError {
        StraddleError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    fn require(&self, operation: &'static str, allowed: bool) -> StraddleResult<()> {
        if allowed {
            return Ok(());
        }
        warn!(
            instance_id = %self.config.instance_id,
            operation,
            state = %self.state,
            "Rejected lifecycle command"
        );
        Err(self.invalid(operation))
    }

    fn set_state(&mut self, state: InstanceState) {
        self.state = state;
        self.add_event(StrategyEvent::StateChanged {
            state,
            timestamp: Utc::now(),
        });
        self.publish_status();
    }

    fn fail(&mut self, message: String) {
        error!(instance_id = %self.config.instance_id, %message, "Strategy instance error");
        self.last_error = Some(message.clone());
        self.add_event(StrategyEvent::Error {
            message,
            timestamp: Utc::now(),
        });
        self.set_state(InstanceState::Error);
    }

    /// Adds an event to recent events and broadcasts it
    fn add_event(&mut self, event: StrategyEvent) {
        if self.recent_events.len() >= RECENT_EVENTS {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(event.clone());

        // Broadcast to subscribers (ignore if no receivers)
        let _ = self.event_tx.send(event);
    }

    fn status(&self) -> InstanceStatus {
        InstanceStatus {
            instance_id: self.config.instance_id.clone(),
            state: self.state,
            last_heartbeat: Utc::now(),
            started_at: self.started_at,
            snapshot: self.last_snapshot.clone(),
            paused_drops: self.paused_drops,
            recent_events: self.recent_events.iter().cloned().collect(),
            error: self.last_error.clone(),
        }
    }

    fn publish_status(&self) {
        let _ = self.status_tx.send(self.status());
    }
}

struct EvaluatorContext {
    instance_id: String,
    run: u64,
    machine: SharedMachine,
    paused: Arc<AtomicBool>,
    reports: mpsc::UnboundedSender<Report>,
}

/// Feeds samples and controls to the machine one at a time.
///
/// Samples are evaluated in arrival order. Cancellation is checked between
/// units only, so an order call in flight always finishes (or is aborted by
/// the caller); everything still queued is discarded.
async fn evaluate(
    ctx: EvaluatorContext,
    mut ticks: mpsc::Receiver<PriceTick>,
    mut controls: mpsc::UnboundedReceiver<Control>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            Some(control) = controls.recv() => run_control(&ctx, control).await,
            tick = ticks.recv() => {
                let Some(tick) = tick else {
                    let _ = ctx.reports.send(Report::FeedClosed { run: ctx.run });
                    break;
                };
                evaluate_tick(&ctx, &tick).await;
            }
        }
    }

    controls.close();
    while let Ok(control) = controls.try_recv() {
        control.reject(StraddleError::InvalidState {
            operation: "apply control",
            state: "stopping".to_string(),
        });
    }
}

async fn evaluate_tick(ctx: &EvaluatorContext, tick: &PriceTick) {
    if ctx.paused.load(Ordering::SeqCst) {
        debug!(instance_id = %ctx.instance_id, price = %tick.price, "Paused, dropping sample");
        let _ = ctx.reports.send(Report::DroppedWhilePaused { run: ctx.run });
        return;
    }

    let mut machine = ctx.machine.lock().await;
    let outcome = machine.on_price(tick).await;
    let snapshot = machine.snapshot();
    drop(machine);

    let _ = ctx.reports.send(Report::Evaluated {
        run: ctx.run,
        outcome,
        snapshot,
    });
}

async fn run_control(ctx: &EvaluatorContext, control: Control) {
    let mut machine = ctx.machine.lock().await;
    match control {
        Control::Reconfigure { config, reply } => {
            let result = machine.apply_config(config.clone());
            if result.is_ok() {
                let _ = ctx.reports.send(Report::Reconfigured {
                    run: ctx.run,
                    config,
                    snapshot: machine.snapshot(),
                });
            }
            let _ = reply.send(result);
        }
        Control::AtmUpdated { new_atm, reply } => {
            let result = machine.on_atm_updated(new_atm).await;
            if let Ok(Some(transition)) = result {
                let _ = ctx.reports.send(Report::AtmShift {
                    run: ctx.run,
                    transition,
                    snapshot: machine.snapshot(),
                });
            }
            let _ = reply.send(result);
        }
    }
}
