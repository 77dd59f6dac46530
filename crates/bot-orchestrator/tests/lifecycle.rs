use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{Notify, Semaphore};

use straddle_core::{
    OrderCoordinator, PriceTick, RuntimeSettings, StraddleError, StrategyConfig,
};
use straddle_engine::{Snapshot, Transition, Trend};
use straddle_orchestrator::{
    spawn_instance, Collaborators, InstanceConfig, InstanceState, StrategyEvent, StrategyHandle,
};
use straddle_paper::{
    ChannelTickSource, CsvTickSource, OrderRecord, PaperOrderCoordinator, StaticStrikeLadder,
};

const TOKEN: &str = "26000";

fn worked_config() -> InstanceConfig {
    InstanceConfig {
        instance_id: "it".to_string(),
        symbol: "NIFTY".to_string(),
        strategy: StrategyConfig {
            offset: dec!(10),
            threshold: dec!(15),
            adjustment_points: dec!(5),
            strike_interval: dec!(50),
            base_quantity: dec!(100),
        },
        runtime: RuntimeSettings::default(),
    }
}

fn ladder() -> Arc<StaticStrikeLadder> {
    Arc::new(StaticStrikeLadder::new("NIFTY", TOKEN, dec!(22000), dec!(50), 20))
}

struct Rig {
    handle: StrategyHandle,
    feed: Arc<ChannelTickSource>,
    paper: Arc<PaperOrderCoordinator>,
}

fn rig_with(orders: Arc<dyn OrderCoordinator>, paper: Arc<PaperOrderCoordinator>) -> Rig {
    let feed = Arc::new(ChannelTickSource::new(64));
    let handle = spawn_instance(
        worked_config(),
        Collaborators {
            ticks: feed.clone(),
            orders,
            strikes: ladder(),
        },
    )
    .unwrap();
    Rig {
        handle,
        feed,
        paper,
    }
}

fn rig() -> Rig {
    let paper = Arc::new(PaperOrderCoordinator::new());
    rig_with(paper.clone(), paper)
}

async fn publish(feed: &ChannelTickSource, price: Decimal) {
    feed.publish(PriceTick::new(TOKEN, price, Utc::now())).await;
}

/// Polls snapshots until `done` holds or two seconds pass.
async fn wait_snapshot(handle: &StrategyHandle, done: impl Fn(&Snapshot) -> bool) -> Snapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = handle.snapshot().await.unwrap();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached, last snapshot: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn running_instance_follows_worked_example() {
    let rig = rig();
    rig.handle.start().await.unwrap();
    assert!(rig.feed.is_subscribed(TOKEN));

    publish(&rig.feed, dec!(22000)).await;
    publish(&rig.feed, dec!(22060)).await;

    let snapshot = wait_snapshot(&rig.handle, |s| s.last_price == Some(dec!(22060))).await;
    assert_eq!(snapshot.trend, Trend::Bullish);
    assert_eq!(snapshot.leg, 1);
    assert_eq!(snapshot.reversal_p, dec!(22015));
    assert_eq!(rig.paper.short_quantity("NIFTY-22000-CE"), dec!(100));
    assert_eq!(rig.paper.short_quantity("NIFTY-22050-CE"), dec!(25));
    assert_eq!(rig.paper.short_quantity("NIFTY-22000-PE"), dec!(75));
}

#[tokio::test]
async fn lifecycle_commands_respect_state() {
    let rig = rig();
    let err = rig.handle.pause().await.unwrap_err();
    assert!(matches!(err, StraddleError::InvalidState { operation: "pause", .. }));

    rig.handle.start().await.unwrap();
    assert!(matches!(
        rig.handle.start().await,
        Err(StraddleError::InvalidState { .. })
    ));
    assert!(matches!(
        rig.handle.resume().await,
        Err(StraddleError::InvalidState { .. })
    ));

    rig.handle.pause().await.unwrap();
    assert_eq!(rig.handle.latest_status().state, InstanceState::Paused);
    rig.handle.stop().await.unwrap();
    assert_eq!(rig.handle.latest_status().state, InstanceState::Stopped);
    assert!(!rig.feed.is_subscribed(TOKEN));
}

#[tokio::test]
async fn paused_samples_are_dropped() {
    let rig = rig();
    rig.handle.start().await.unwrap();
    publish(&rig.feed, dec!(22000)).await;
    wait_snapshot(&rig.handle, |s| s.first_entry_placed).await;

    rig.handle.pause().await.unwrap();
    publish(&rig.feed, dec!(22100)).await;

    let mut status = rig.handle.subscribe_status();
    status.wait_for(|s| s.paused_drops == 1).await.unwrap();

    rig.handle.resume().await.unwrap();
    publish(&rig.feed, dec!(22010)).await;
    let snapshot = wait_snapshot(&rig.handle, |s| s.last_price == Some(dec!(22010))).await;
    assert_eq!(snapshot.trend, Trend::Neutral);
    assert_eq!(snapshot.leg, 0);
}

#[tokio::test]
async fn order_failures_are_reported_and_retried() {
    let rig = rig();
    let mut events = rig.handle.subscribe_events();
    rig.handle.start().await.unwrap();

    publish(&rig.feed, dec!(22000)).await;
    wait_snapshot(&rig.handle, |s| s.first_entry_placed).await;

    rig.paper.fail_next(1);
    publish(&rig.feed, dec!(22060)).await;
    publish(&rig.feed, dec!(22061)).await;

    let mut failures = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            StrategyEvent::OrderFailed {
                transition,
                attempts,
                ..
            } => failures.push((transition, attempts)),
            StrategyEvent::TransitionApplied {
                transition: Transition::Enter { .. },
                price,
                ..
            } => {
                assert_eq!(price, Some(dec!(22061)));
                break;
            }
            _ => {}
        }
    }
    assert_eq!(
        failures,
        vec![(
            Transition::Enter {
                trend: Trend::Bullish
            },
            1
        )]
    );
    assert_eq!(rig.handle.latest_status().state, InstanceState::Running);
}

#[tokio::test]
async fn parameter_changes_are_validated_and_applied() {
    let rig = rig();
    rig.handle.start().await.unwrap();

    let mut bad = worked_config().strategy;
    bad.offset = dec!(-1);
    assert!(matches!(
        rig.handle.update_parameters(bad).await,
        Err(StraddleError::ConfigInvalid { field: "offset", .. })
    ));

    let mut wider = worked_config().strategy;
    wider.threshold = dec!(40);
    rig.handle.update_parameters(wider).await.unwrap();

    let snapshot = rig.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.bullish_dp, dec!(22075));
}

#[tokio::test]
async fn parameter_changes_apply_in_arrival_order() {
    let rig = rig();
    rig.handle.start().await.unwrap();

    let mut first = worked_config().strategy;
    first.threshold = dec!(40);
    let mut second = worked_config().strategy;
    second.threshold = dec!(20);

    let (a, b) = tokio::join!(
        rig.handle.update_parameters(first.clone()),
        rig.handle.update_parameters(second.clone())
    );
    a.unwrap();
    b.unwrap();

    // 21995 + 10 + 20 + 0.6 * 50
    assert_eq!(rig.handle.snapshot().await.unwrap().bullish_dp, dec!(22055));

    let mut status = rig.handle.subscribe_status();
    let status = tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| {
            s.recent_events
                .iter()
                .filter(|e| matches!(e, StrategyEvent::ParametersChanged { .. }))
                .count()
                == 2
        }),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    let applied: Vec<StrategyConfig> = status
        .recent_events
        .into_iter()
        .filter_map(|e| match e {
            StrategyEvent::ParametersChanged { config, .. } => Some(config),
            _ => None,
        })
        .collect();
    assert_eq!(applied, vec![first, second]);
}

#[tokio::test]
async fn external_atm_shift_recenters() {
    let rig = rig();
    rig.handle.start().await.unwrap();
    publish(&rig.feed, dec!(22000)).await;
    wait_snapshot(&rig.handle, |s| s.first_entry_placed).await;

    assert_eq!(rig.handle.on_atm_updated(dec!(22030)).await.unwrap(), None);
    let shifted = rig.handle.on_atm_updated(dec!(22100)).await.unwrap();
    assert_eq!(
        shifted,
        Some(Transition::AtmShift {
            new_atm: dec!(22100)
        })
    );

    let snapshot = rig.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.current_atm, dec!(22100));
    assert!(!snapshot.first_entry_placed);
    assert!(rig.paper.open_positions().is_empty());
}

#[tokio::test]
async fn restart_begins_a_fresh_cycle() {
    let rig = rig();
    rig.handle.start().await.unwrap();
    publish(&rig.feed, dec!(22000)).await;
    publish(&rig.feed, dec!(22060)).await;
    wait_snapshot(&rig.handle, |s| s.leg == 1).await;

    rig.handle.stop().await.unwrap();
    rig.handle.start().await.unwrap();

    let snapshot = rig.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.leg, 0);
    assert_eq!(snapshot.trend, Trend::Neutral);
    assert!(!snapshot.first_entry_placed);
}

#[tokio::test]
async fn closed_feed_stops_instance() {
    let ticks = vec![
        PriceTick::new(TOKEN, dec!(22000), Utc::now()),
        PriceTick::new("99999", dec!(30000), Utc::now()),
        PriceTick::new(TOKEN, dec!(22060), Utc::now()),
    ];
    let paper = Arc::new(PaperOrderCoordinator::new());
    let handle = spawn_instance(
        worked_config(),
        Collaborators {
            ticks: Arc::new(CsvTickSource::from_ticks(ticks)),
            orders: paper.clone(),
            strikes: ladder(),
        },
    )
    .unwrap();

    handle.start().await.unwrap();
    let status = tokio::time::timeout(
        Duration::from_secs(2),
        handle.wait_for_state(InstanceState::Stopped),
    )
    .await
    .unwrap()
    .unwrap();

    let snapshot = status.snapshot.unwrap();
    assert_eq!(snapshot.leg, 1);
    assert_eq!(snapshot.stale_ticks, 1);
    assert!(status
        .recent_events
        .iter()
        .any(|e| matches!(e, StrategyEvent::FeedClosed { .. })));
}

/// Coordinator whose calls never resolve.
struct HangingCoordinator;

#[async_trait]
impl OrderCoordinator for HangingCoordinator {
    async fn place_initial_straddle(&self, _: &str, _: &str, _: Decimal) -> Result<()> {
        std::future::pending().await
    }

    async fn shift_quantity(&self, _: &str, _: &str, _: Decimal) -> Result<()> {
        std::future::pending().await
    }

    async fn close_all(&self, _: &[String]) -> Result<()> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn stop_times_out_on_hung_order_call() {
    let rig = rig_with(
        Arc::new(HangingCoordinator),
        Arc::new(PaperOrderCoordinator::new()),
    );
    rig.handle.start().await.unwrap();
    publish(&rig.feed, dec!(22000)).await;

    // Let the evaluator pick the sample up and block in the order call
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = rig
        .handle
        .stop_with_timeout(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert_eq!(err, StraddleError::StopTimeout(Duration::from_millis(100)));

    let status = rig.handle.get_status().await.unwrap();
    assert_eq!(status.state, InstanceState::Error);
    assert!(status.error.is_some());
    assert!(!rig.feed.is_subscribed(TOKEN));

    // Error is restartable
    rig.handle.start().await.unwrap();
    assert_eq!(rig.handle.latest_status().state, InstanceState::Running);
}

/// Paper coordinator whose shifts and closes wait for a permit.
struct GatedCoordinator {
    paper: Arc<PaperOrderCoordinator>,
    gate: Semaphore,
    entered: Notify,
}

impl GatedCoordinator {
    fn new(paper: Arc<PaperOrderCoordinator>) -> Self {
        Self {
            paper,
            gate: Semaphore::new(0),
            entered: Notify::new(),
        }
    }

    async fn pass(&self) -> Result<()> {
        self.entered.notify_one();
        self.gate.acquire().await?.forget();
        Ok(())
    }
}

#[async_trait]
impl OrderCoordinator for GatedCoordinator {
    async fn place_initial_straddle(&self, call_id: &str, put_id: &str, qty: Decimal) -> Result<()> {
        self.paper.place_initial_straddle(call_id, put_id, qty).await
    }

    async fn shift_quantity(&self, from_id: &str, to_id: &str, qty: Decimal) -> Result<()> {
        self.pass().await?;
        self.paper.shift_quantity(from_id, to_id, qty).await
    }

    async fn close_all(&self, ids: &[String]) -> Result<()> {
        self.pass().await?;
        self.paper.close_all(ids).await
    }
}

fn gated_rig() -> (Rig, Arc<GatedCoordinator>) {
    let paper = Arc::new(PaperOrderCoordinator::new());
    let gated = Arc::new(GatedCoordinator::new(paper.clone()));
    (rig_with(gated.clone(), paper), gated)
}

fn shift_targets(paper: &PaperOrderCoordinator) -> Vec<String> {
    paper
        .orders()
        .into_iter()
        .filter_map(|order| match order {
            OrderRecord::Shift { to_id, .. } => Some(to_id),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn samples_wait_behind_order_call_and_keep_order() {
    let (rig, gated) = gated_rig();
    rig.handle.start().await.unwrap();
    publish(&rig.feed, dec!(22000)).await;
    wait_snapshot(&rig.handle, |s| s.first_entry_placed).await;

    for price in [dec!(22060), dec!(22056), dec!(22061), dec!(22066)] {
        publish(&rig.feed, price).await;
    }
    gated.entered.notified().await;
    assert!(shift_targets(&rig.paper).is_empty());

    gated.gate.add_permits(4);
    let mut status = rig.handle.subscribe_status();
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.snapshot.as_ref().is_some_and(|snap| snap.leg == 4)),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(
        shift_targets(&rig.paper),
        vec![
            "NIFTY-22050-CE",
            "NIFTY-22100-CE",
            "NIFTY-22150-CE",
            "NIFTY-22200-CE"
        ]
    );
}

#[tokio::test]
async fn stop_discards_samples_queued_behind_order_call() {
    let (rig, gated) = gated_rig();
    rig.handle.start().await.unwrap();
    publish(&rig.feed, dec!(22000)).await;
    wait_snapshot(&rig.handle, |s| s.first_entry_placed).await;

    for price in [dec!(22060), dec!(22056), dec!(22061)] {
        publish(&rig.feed, price).await;
    }
    gated.entered.notified().await;

    let gate = gated.clone();
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.gate.add_permits(1);
    });
    rig.handle
        .stop_with_timeout(Duration::from_secs(2))
        .await
        .unwrap();
    release.await.unwrap();
    assert_eq!(rig.handle.latest_status().state, InstanceState::Stopped);

    // Plenty of permits, but nothing is left to evaluate
    gated.gate.add_permits(8);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(shift_targets(&rig.paper), vec!["NIFTY-22050-CE"]);
}

#[tokio::test]
async fn stop_waits_for_close_issued_by_atm_shift() {
    let (rig, gated) = gated_rig();
    rig.handle.start().await.unwrap();
    publish(&rig.feed, dec!(22000)).await;
    wait_snapshot(&rig.handle, |s| s.first_entry_placed).await;

    let handle = rig.handle.clone();
    let shift = tokio::spawn(async move { handle.on_atm_updated(dec!(22100)).await });
    gated.entered.notified().await;

    let gate = gated.clone();
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.gate.add_permits(1);
    });
    rig.handle
        .stop_with_timeout(Duration::from_secs(2))
        .await
        .unwrap();
    release.await.unwrap();

    // The close finished before stop returned
    assert!(rig.paper.open_positions().is_empty());
    assert_eq!(
        shift.await.unwrap().unwrap(),
        Some(Transition::AtmShift {
            new_atm: dec!(22100)
        })
    );
    assert_eq!(rig.handle.latest_status().state, InstanceState::Stopped);
}

#[tokio::test]
async fn stop_times_out_on_hung_atm_shift_close() {
    let (rig, gated) = gated_rig();
    rig.handle.start().await.unwrap();
    publish(&rig.feed, dec!(22000)).await;
    wait_snapshot(&rig.handle, |s| s.first_entry_placed).await;

    let handle = rig.handle.clone();
    let shift = tokio::spawn(async move { handle.on_atm_updated(dec!(22100)).await });
    gated.entered.notified().await;

    let err = rig
        .handle
        .stop_with_timeout(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert_eq!(err, StraddleError::StopTimeout(Duration::from_millis(100)));
    assert_eq!(rig.handle.latest_status().state, InstanceState::Error);

    // The aborted evaluator dropped the pending reply
    assert_eq!(shift.await.unwrap(), Err(StraddleError::ChannelClosed));
    assert_eq!(rig.paper.open_positions().len(), 2);
}
