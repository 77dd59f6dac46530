use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::sync::broadcast::error::RecvError;

use straddle_core::{ConfigLoader, ConfigWatcher};
use straddle_orchestrator::{
    spawn_instance, Collaborators, InstanceConfig, InstanceState, InstanceStatus, StrategyEvent,
    StrategyHandle,
};
use straddle_paper::{CsvTickSource, PaperOrderCoordinator, StaticStrikeLadder};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Tick CSV (`timestamp,token,price`)
    #[arg(short, long)]
    pub ticks: String,

    /// Delay between ticks in milliseconds
    #[arg(long)]
    pub pace_ms: Option<u64>,

    /// Reload strategy parameters when the config file changes
    #[arg(long)]
    pub watch: bool,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long)]
    pub log_file: Option<String>,
}

/// Replays a tick file through a paper-traded instance until the file ends
/// or Ctrl-C.
///
/// # Errors
///
/// Returns an error if the config or tick file cannot be loaded, or the
/// instance fails to start.
pub async fn run_replay(args: &ReplayArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    let mut ticks = CsvTickSource::from_csv(&args.ticks)?;
    if let Some(pace) = args.pace_ms {
        ticks = ticks.with_pace(Duration::from_millis(pace));
    }
    if ticks.is_empty() {
        bail!("tick file {} has no rows", args.ticks);
    }

    let paper = Arc::new(PaperOrderCoordinator::new());
    let ladder = Arc::new(StaticStrikeLadder::from_settings(
        config.instance.symbol.clone(),
        &config.ladder,
    ));

    let handle = spawn_instance(
        InstanceConfig::from_app(&config),
        Collaborators {
            ticks: Arc::new(ticks.with_capacity(config.runtime.tick_buffer)),
            orders: paper.clone(),
            strikes: ladder,
        },
    )?;

    let mut background = vec![tokio::spawn(print_events(handle.clone()))];
    if args.watch {
        let (watcher, mut updates) = ConfigWatcher::new(config.clone());
        let path = args.config.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.watch(&path).await {
                tracing::warn!(error = %e, "Config watcher stopped");
            }
        });

        let forward = handle.clone();
        background.push(tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let strategy = updates.borrow_and_update().strategy.clone();
                if let Err(e) = forward.update_parameters(strategy).await {
                    tracing::warn!(error = %e, "Parameter update rejected");
                }
            }
        }));
    }

    handle.start().await?;

    let status = tokio::select! {
        status = wait_for_end(&handle) => status?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, stopping replay");
            handle.stop().await?;
            handle.get_status().await?
        }
    };

    handle.shutdown().await?;
    // Dropping the forwarder's receiver also ends the file watcher
    for task in background {
        task.abort();
    }

    print_summary(&status, &paper);
    if status.state == InstanceState::Error {
        bail!(
            "replay ended in error: {}",
            status.error.unwrap_or_else(|| "unknown".to_string())
        );
    }
    Ok(())
}

async fn wait_for_end(handle: &StrategyHandle) -> Result<InstanceStatus> {
    let mut status = handle.subscribe_status();
    let done = status
        .wait_for(|s| matches!(s.state, InstanceState::Stopped | InstanceState::Error))
        .await
        .context("Instance shut down before the replay finished")?;
    Ok(done.clone())
}

async fn print_events(handle: StrategyHandle) {
    let mut events = handle.subscribe_events();
    loop {
        match events.recv().await {
            Ok(StrategyEvent::TransitionApplied {
                transition,
                leg,
                trend,
                price,
                ..
            }) => {
                let price = price.map_or_else(|| "-".to_string(), |p| p.to_string());
                println!("{price:>10}  {:<14} leg {leg} {trend}", transition.action());
            }
            Ok(StrategyEvent::OrderFailed {
                transition,
                attempts,
                message,
                ..
            }) => {
                println!(
                    "{:>10}  {:<14} failed (attempt {attempts}): {message}",
                    "",
                    transition.action()
                );
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_summary(status: &InstanceStatus, paper: &PaperOrderCoordinator) {
    println!();
    println!("Final state: {}", status.state);
    if let Some(snapshot) = &status.snapshot {
        println!(
            "ATM {}  leg {}  trend {}  first entry placed: {}",
            snapshot.current_atm, snapshot.leg, snapshot.trend, snapshot.first_entry_placed
        );
        println!(
            "Decision points: bullish {}  bearish {}  reversal {}",
            snapshot.bullish_dp, snapshot.bearish_dp, snapshot.reversal_p
        );
        println!(
            "Skew: call {} ({}%)  put {} ({}%)",
            snapshot.skew.call_quantity,
            snapshot.skew.call_pct().round_dp(1),
            snapshot.skew.put_quantity,
            snapshot.skew.put_pct().round_dp(1)
        );
        if !snapshot.leg_contracts.is_empty() {
            println!("Leg contracts: {}", snapshot.leg_contracts.join(", "));
        }
        println!("Stale ticks ignored: {}", snapshot.stale_ticks);
    }

    println!("Orders accepted: {}", paper.orders().len());
    let open = paper.open_positions();
    if open.is_empty() {
        println!("No open positions");
    } else {
        println!("Open short positions:");
        for (id, quantity) in open {
            println!("  {id:<20} {quantity}");
        }
    }
}
