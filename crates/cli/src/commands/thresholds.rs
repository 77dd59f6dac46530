use anyhow::{Context, Result};
use clap::Args;
use rust_decimal::{Decimal, RoundingStrategy};

use straddle_core::{AppConfig, ConfigLoader, OptionPair};
use straddle_engine::{compute_thresholds, ReferenceState, Thresholds, Trend, MAX_LEG};

#[derive(Args, Debug)]
pub struct ThresholdsArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// ATM strike to tabulate (defaults to the strike nearest the ladder spot)
    #[arg(long)]
    pub atm: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdRow {
    pub leg: u8,
    pub trend: Trend,
    pub thresholds: Thresholds,
}

/// Decision points for every leg in both trends around `atm`.
///
/// # Errors
///
/// Returns an error if `atm` or the strike interval is not positive.
pub fn threshold_table(config: &AppConfig, atm: Decimal) -> Result<(ReferenceState, Vec<ThresholdRow>)> {
    let interval = if config.ladder.strike_interval > Decimal::ZERO {
        config.ladder.strike_interval
    } else {
        config.strategy.strike_interval
    };
    let options = OptionPair {
        call_id: format!("{}-{}-CE", config.instance.symbol, atm),
        put_id: format!("{}-{}-PE", config.instance.symbol, atm),
    };
    let reference = ReferenceState::new(atm, interval, options, &config.strategy)?;

    let mut rows = vec![ThresholdRow {
        leg: 0,
        trend: Trend::Neutral,
        thresholds: compute_thresholds(&reference, 0, Trend::Neutral, &config.strategy),
    }];
    for trend in [Trend::Bullish, Trend::Bearish] {
        for leg in 1..=MAX_LEG {
            rows.push(ThresholdRow {
                leg,
                trend,
                thresholds: compute_thresholds(&reference, leg, trend, &config.strategy),
            });
        }
    }
    Ok((reference, rows))
}

fn default_atm(config: &AppConfig) -> Decimal {
    let interval = config.ladder.strike_interval;
    if interval <= Decimal::ZERO {
        return config.ladder.spot;
    }
    (config.ladder.spot / interval).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        * interval
}

/// # Errors
///
/// Returns an error if the config cannot be loaded or the ATM is unusable.
pub fn run_thresholds(args: &ThresholdsArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    let atm = args.atm.unwrap_or_else(|| default_atm(&config));
    let (reference, rows) = threshold_table(&config, atm)?;

    println!(
        "ATM {}  interval {}  adjusted {}  reset boundaries {} / {}",
        reference.current_atm,
        reference.strike_interval,
        reference.adjusted_reference,
        reference.lower_reset_boundary,
        reference.upper_reset_boundary
    );
    println!("{:<4} {:<8} {:>12} {:>12} {:>12}", "leg", "trend", "bullish_dp", "bearish_dp", "reversal_p");
    for row in rows {
        println!(
            "{:<4} {:<8} {:>12} {:>12} {:>12}",
            row.leg,
            row.trend.to_string(),
            row.thresholds.bullish_dp,
            row.thresholds.bearish_dp,
            row.thresholds.reversal_p
        );
    }
    Ok(())
}
