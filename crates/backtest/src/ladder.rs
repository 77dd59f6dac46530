use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};

use straddle_core::{AtmInfo, LadderSettings, OptionPair, StrikeLookup};

/// Fixed strike ladder centered on a spot price.
///
/// Strikes are listed `strikes_each_side` intervals either side of the strike
/// nearest the initial spot. Contract ids follow `SYMBOL-STRIKE-CE` / `-PE`.
#[derive(Debug)]
pub struct StaticStrikeLadder {
    symbol: String,
    underlying_token: String,
    center: Decimal,
    strike_interval: Decimal,
    strikes_each_side: u32,
    spot: RwLock<Decimal>,
}

impl StaticStrikeLadder {
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        underlying_token: impl Into<String>,
        spot: Decimal,
        strike_interval: Decimal,
        strikes_each_side: u32,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            underlying_token: underlying_token.into(),
            center: nearest_strike(spot, strike_interval),
            strike_interval,
            strikes_each_side,
            spot: RwLock::new(spot),
        }
    }

    #[must_use]
    pub fn from_settings(symbol: impl Into<String>, settings: &LadderSettings) -> Self {
        Self::new(
            symbol,
            settings.underlying_token.clone(),
            settings.spot,
            settings.strike_interval,
            settings.strikes_each_side,
        )
    }

    /// Moves the spot the ATM is resolved from. Returns the new ATM strike.
    pub fn set_spot(&self, spot: Decimal) -> Decimal {
        match self.spot.write() {
            Ok(mut guard) => *guard = spot,
            Err(poisoned) => *poisoned.into_inner() = spot,
        }
        nearest_strike(spot, self.strike_interval)
    }

    fn current_spot(&self) -> Decimal {
        match self.spot.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn check_symbol(&self, symbol: &str) -> Result<()> {
        if symbol != self.symbol {
            bail!("no strike ladder for symbol {symbol}");
        }
        Ok(())
    }

    fn is_listed(&self, strike: Decimal) -> bool {
        if self.strike_interval <= Decimal::ZERO || !(strike % self.strike_interval).is_zero() {
            return false;
        }
        let reach = self.strike_interval * Decimal::from(self.strikes_each_side);
        (strike - self.center).abs() <= reach
    }

    fn pair_at(&self, strike: Decimal) -> OptionPair {
        let strike = strike.normalize();
        OptionPair {
            call_id: format!("{}-{strike}-CE", self.symbol),
            put_id: format!("{}-{strike}-PE", self.symbol),
        }
    }
}

fn nearest_strike(spot: Decimal, interval: Decimal) -> Decimal {
    if interval <= Decimal::ZERO {
        return spot;
    }
    (spot / interval).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * interval
}

#[async_trait]
impl StrikeLookup for StaticStrikeLadder {
    async fn resolve_atm(&self, symbol: &str) -> Result<AtmInfo> {
        self.check_symbol(symbol)?;
        let atm = nearest_strike(self.current_spot(), self.strike_interval);
        if !self.is_listed(atm) {
            return Err(anyhow!("spot moved off the listed ladder (ATM {atm})"));
        }
        Ok(AtmInfo {
            underlying_token: self.underlying_token.clone(),
            atm_strike: atm,
            strike_interval: if self.strikes_each_side > 0 {
                self.strike_interval
            } else {
                Decimal::ZERO
            },
            options: self.pair_at(atm),
        })
    }

    async fn option_pair(&self, symbol: &str, strike: Decimal) -> Result<Option<OptionPair>> {
        self.check_symbol(symbol)?;
        Ok(self.is_listed(strike).then(|| self.pair_at(strike)))
    }
}
