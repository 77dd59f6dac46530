//! ATM reference tracking and reset boundaries.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use straddle_core::{OptionPair, StraddleError, StraddleResult, StrategyConfig, StrikeLookup};

use crate::types::Trend;

/// Distance of the reset boundaries from the ATM, in strike intervals.
const RESET_BOUNDARY_MULTIPLIER: Decimal = dec!(1.6);

/// The ATM strike the controller is centered on and everything derived from it.
///
/// Replaced as a whole on every reset; never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceState {
    pub current_atm: Decimal,
    /// `current_atm - adjustment_points`.
    pub adjusted_reference: Decimal,
    pub strike_interval: Decimal,
    pub options: OptionPair,
    pub upper_reset_boundary: Decimal,
    pub lower_reset_boundary: Decimal,
}

impl ReferenceState {
    /// Builds the reference for `atm` with the options already resolved.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceUnavailable` when `strike_interval` or `atm` is not positive.
    pub fn new(
        atm: Decimal,
        strike_interval: Decimal,
        options: OptionPair,
        config: &StrategyConfig,
    ) -> StraddleResult<Self> {
        validate_inputs(atm, strike_interval)?;

        let adj = config.adjustment_points;
        let reach = RESET_BOUNDARY_MULTIPLIER * strike_interval + config.offset;
        Ok(Self {
            current_atm: atm,
            adjusted_reference: atm - adj,
            strike_interval,
            options,
            upper_reset_boundary: atm + reach - adj,
            lower_reset_boundary: atm - reach - adj,
        })
    }

    /// The ATM call and put the straddle is sold in.
    #[must_use]
    pub fn open_leg_ids(&self) -> Vec<String> {
        vec![self.options.call_id.clone(), self.options.put_id.clone()]
    }
}

fn validate_inputs(atm: Decimal, strike_interval: Decimal) -> StraddleResult<()> {
    if strike_interval <= Decimal::ZERO {
        return Err(StraddleError::ReferenceUnavailable(format!(
            "strike interval must be positive, got {strike_interval}"
        )));
    }
    if atm <= Decimal::ZERO {
        return Err(StraddleError::ReferenceUnavailable(format!(
            "ATM strike must be positive, got {atm}"
        )));
    }
    Ok(())
}

/// Holds the current reference for one underlying and resolves new ones.
#[derive(Debug, Clone)]
pub struct AtmReferenceTracker {
    symbol: String,
    underlying_token: String,
    current: ReferenceState,
}

impl AtmReferenceTracker {
    /// Resolves the ATM for `symbol` and builds the first reference.
    ///
    /// The strike interval reported by the ladder wins; `config.strike_interval`
    /// is used when the ladder cannot report one.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceUnavailable` if the lookup fails or yields an unusable reference.
    pub async fn initialize(
        symbol: &str,
        lookup: &dyn StrikeLookup,
        config: &StrategyConfig,
    ) -> StraddleResult<Self> {
        let info = lookup
            .resolve_atm(symbol)
            .await
            .map_err(|e| StraddleError::ReferenceUnavailable(format!("{symbol}: {e:#}")))?;

        let strike_interval = if info.strike_interval > Decimal::ZERO {
            info.strike_interval
        } else {
            debug!(
                symbol,
                fallback = %config.strike_interval,
                "Ladder reported no strike interval, using configured value"
            );
            config.strike_interval
        };

        let current = ReferenceState::new(info.atm_strike, strike_interval, info.options, config)?;
        info!(
            symbol,
            atm = %current.current_atm,
            interval = %current.strike_interval,
            upper = %current.upper_reset_boundary,
            lower = %current.lower_reset_boundary,
            "ATM reference initialized"
        );

        Ok(Self {
            symbol: symbol.to_string(),
            underlying_token: info.underlying_token,
            current,
        })
    }

    /// Resolves a reference at `new_atm` without touching the current one.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceUnavailable` for invalid inputs or when the ladder lists
    /// no options at `new_atm`.
    pub async fn prepare(
        &self,
        lookup: &dyn StrikeLookup,
        new_atm: Decimal,
        strike_interval: Decimal,
        config: &StrategyConfig,
    ) -> StraddleResult<ReferenceState> {
        validate_inputs(new_atm, strike_interval)?;

        let options = lookup
            .option_pair(&self.symbol, new_atm)
            .await
            .map_err(|e| {
                StraddleError::ReferenceUnavailable(format!("{} @ {new_atm}: {e:#}", self.symbol))
            })?
            .ok_or_else(|| {
                StraddleError::ReferenceUnavailable(format!(
                    "no options listed for {} at strike {new_atm}",
                    self.symbol
                ))
            })?;

        ReferenceState::new(new_atm, strike_interval, options, config)
    }

    /// Contract a leg shift in `trend` sells into: the call `leg` strikes above
    /// the ATM when bullish, the put `leg` strikes below when bearish.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceUnavailable` when the ladder lists no option there or
    /// `trend` is neutral.
    pub async fn leg_contract(
        &self,
        lookup: &dyn StrikeLookup,
        trend: Trend,
        leg: u8,
    ) -> StraddleResult<String> {
        let current = &self.current;
        let steps = current.strike_interval * Decimal::from(leg);
        let strike = match trend {
            Trend::Bullish => current.current_atm + steps,
            Trend::Bearish => current.current_atm - steps,
            Trend::Neutral => {
                return Err(StraddleError::ReferenceUnavailable(
                    "no leg contract for a neutral trend".to_string(),
                ))
            }
        };

        let pair = lookup
            .option_pair(&self.symbol, strike)
            .await
            .map_err(|e| {
                StraddleError::ReferenceUnavailable(format!("{} @ {strike}: {e:#}", self.symbol))
            })?
            .ok_or_else(|| {
                StraddleError::ReferenceUnavailable(format!(
                    "no options listed for {} at strike {strike}",
                    self.symbol
                ))
            })?;

        Ok(match trend {
            Trend::Bearish => pair.put_id,
            _ => pair.call_id,
        })
    }

    /// Installs a reference produced by [`prepare`](Self::prepare).
    pub fn commit(&mut self, next: ReferenceState) {
        info!(
            symbol = %self.symbol,
            from = %self.current.current_atm,
            to = %next.current_atm,
            upper = %next.upper_reset_boundary,
            lower = %next.lower_reset_boundary,
            "ATM reference reset"
        );
        self.current = next;
    }

    /// Resolves and installs a reference at `new_atm`. On failure the previous
    /// reference is kept.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceUnavailable` when the new reference cannot be built.
    pub async fn reset_reference(
        &mut self,
        lookup: &dyn StrikeLookup,
        new_atm: Decimal,
        strike_interval: Decimal,
        config: &StrategyConfig,
    ) -> StraddleResult<&ReferenceState> {
        let next = self.prepare(lookup, new_atm, strike_interval, config).await?;
        self.commit(next);
        Ok(&self.current)
    }

    /// Rebuilds the derived values of the current reference under `config`.
    ///
    /// # Errors
    ///
    /// Propagates `ReferenceState::new` failures; the old reference is kept.
    pub fn reconfigure(&mut self, config: &StrategyConfig) -> StraddleResult<()> {
        let current = &self.current;
        self.current = ReferenceState::new(
            current.current_atm,
            current.strike_interval,
            current.options.clone(),
            config,
        )?;
        Ok(())
    }

    #[must_use]
    pub const fn current_reference(&self) -> &ReferenceState {
        &self.current
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub fn underlying_token(&self) -> &str {
        &self.underlying_token
    }
}
