//! Trend state machine driving the straddle legs.
//!
//! Each price sample is evaluated against the committed state:
//! 1. Sell the straddle once per reference cycle
//! 2. Neutral -> Bullish/Bearish when a decision point is crossed
//! 3. Extend one leg per further crossing, up to leg 4
//! 4. Retreat one leg when price crosses back past the reversal point
//! 5. At leg 4, crossing the (reset-boundary) decision point closes all legs
//!    and re-centers the reference one strike in the trend direction
//!
//! Leg shifts buy back 25% of the ATM option on the losing side and sell it
//! in the option `leg` strikes out on the trend side (a higher-strike call
//! when bullish, a lower-strike put when bearish). A reset closes the ATM
//! pair and every contract the open legs sold into.
//!
//! A transition is committed only after its order instruction succeeds.
//! A failed transition leaves leg, trend and thresholds untouched and is
//! re-planned from the same state on the next sample.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use straddle_core::{
    OptionPair, OrderCoordinator, PriceTick, StraddleError, StraddleResult, StrategyConfig,
    StrikeLookup,
};

use crate::reference::{AtmReferenceTracker, ReferenceState};
use crate::skew::{leg_shift_quantity, PositionSkew};
use crate::thresholds::compute_thresholds;
use crate::types::{
    RuntimeState, Snapshot, Thresholds, TickOutcome, Transition, TransitionFailure, Trend, MAX_LEG,
};

pub struct TrendStateMachine {
    config: StrategyConfig,
    tracker: AtmReferenceTracker,
    runtime: RuntimeState,
    coordinator: Arc<dyn OrderCoordinator>,
    lookup: Arc<dyn StrikeLookup>,
    /// Contract sold into by each open leg; `leg_contracts[k - 1]` is leg k's.
    leg_contracts: Vec<String>,
    pending_failure: Option<(Transition, u32)>,
    last_price: Option<Decimal>,
    stale_ticks: u64,
}

impl std::fmt::Debug for TrendStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendStateMachine")
            .field("symbol", &self.tracker.symbol())
            .field("runtime", &self.runtime)
            .field("reference", self.tracker.current_reference())
            .field("leg_contracts", &self.leg_contracts)
            .finish_non_exhaustive()
    }
}

impl TrendStateMachine {
    /// Validates `config`, resolves the ATM reference for `symbol` and returns
    /// a machine in `Neutral`, leg 0 with the initial entry armed.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for bad parameters and `ReferenceUnavailable`
    /// when the strike ladder cannot be resolved.
    pub async fn start(
        symbol: &str,
        config: StrategyConfig,
        coordinator: Arc<dyn OrderCoordinator>,
        lookup: Arc<dyn StrikeLookup>,
    ) -> StraddleResult<Self> {
        config.validate()?;
        let tracker = AtmReferenceTracker::initialize(symbol, lookup.as_ref(), &config).await?;
        let thresholds =
            compute_thresholds(tracker.current_reference(), 0, Trend::Neutral, &config);

        let machine = Self {
            config,
            tracker,
            runtime: RuntimeState::neutral(thresholds),
            coordinator,
            lookup,
            leg_contracts: Vec::new(),
            pending_failure: None,
            last_price: None,
            stale_ticks: 0,
        };
        machine.log_thresholds("Straddle controller started");
        Ok(machine)
    }

    /// Evaluates one price sample.
    ///
    /// Samples for any token other than the tracked underlying are discarded.
    pub async fn on_price(&mut self, tick: &PriceTick) -> TickOutcome {
        if tick.token != self.tracker.underlying_token() {
            self.stale_ticks += 1;
            debug!(
                token = %tick.token,
                expected = %self.tracker.underlying_token(),
                "Ignoring stale tick for untracked token"
            );
            return TickOutcome::Stale;
        }

        let price = tick.price;
        self.last_price = Some(price);
        let mut applied = Vec::with_capacity(2);

        if !self.runtime.first_entry_placed && self.runtime.trend == Trend::Neutral {
            match self.apply(Transition::InitialEntry).await {
                Ok(()) => applied.push(Transition::InitialEntry),
                Err(error) => {
                    let failure = self.record_failure(Transition::InitialEntry, error);
                    return TickOutcome::Evaluated {
                        applied,
                        failure: Some(failure),
                    };
                }
            }
        }

        let failure = match self.plan(price) {
            Some(transition) => match self.apply(transition).await {
                Ok(()) => {
                    applied.push(transition);
                    None
                }
                Err(error) => Some(self.record_failure(transition, error)),
            },
            None => None,
        };

        if failure.is_none() {
            self.pending_failure = None;
        }

        TickOutcome::Evaluated { applied, failure }
    }

    /// Picks the directional transition `price` triggers from the committed state.
    #[must_use]
    pub fn plan(&self, price: Decimal) -> Option<Transition> {
        let Thresholds {
            bullish_dp,
            bearish_dp,
            reversal_p,
        } = self.runtime.thresholds;
        let leg = self.runtime.leg;
        let reference = self.tracker.current_reference();

        match self.runtime.trend {
            Trend::Neutral => {
                if price > bullish_dp {
                    Some(Transition::Enter {
                        trend: Trend::Bullish,
                    })
                } else if price < bearish_dp {
                    Some(Transition::Enter {
                        trend: Trend::Bearish,
                    })
                } else {
                    None
                }
            }
            Trend::Bullish => {
                if price > bullish_dp {
                    // At the last leg the decision point is the reset boundary
                    if leg >= MAX_LEG {
                        Some(Transition::Reset {
                            trend: Trend::Bullish,
                            new_atm: reference.current_atm + reference.strike_interval,
                        })
                    } else {
                        Some(Transition::Extend {
                            trend: Trend::Bullish,
                            to_leg: leg + 1,
                        })
                    }
                } else if leg > 0 && price < reversal_p {
                    Some(Transition::Retreat {
                        trend: Trend::Bullish,
                        to_leg: leg - 1,
                    })
                } else {
                    None
                }
            }
            Trend::Bearish => {
                if price < bearish_dp {
                    if leg >= MAX_LEG {
                        Some(Transition::Reset {
                            trend: Trend::Bearish,
                            new_atm: reference.current_atm - reference.strike_interval,
                        })
                    } else {
                        Some(Transition::Extend {
                            trend: Trend::Bearish,
                            to_leg: leg + 1,
                        })
                    }
                } else if leg > 0 && price > reversal_p {
                    Some(Transition::Retreat {
                        trend: Trend::Bearish,
                        to_leg: leg - 1,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Issues the order instruction for `transition` and commits it on success.
    async fn apply(&mut self, transition: Transition) -> StraddleResult<()> {
        let step = leg_shift_quantity(self.config.base_quantity);
        let options = self.tracker.current_reference().options.clone();

        match transition {
            Transition::InitialEntry => {
                self.coordinator
                    .place_initial_straddle(
                        &options.call_id,
                        &options.put_id,
                        self.config.base_quantity,
                    )
                    .await
                    .map_err(|e| StraddleError::order_failed("initial_straddle", &e))?;
                self.runtime.first_entry_placed = true;
                info!(
                    atm = %self.tracker.current_reference().current_atm,
                    quantity = %self.config.base_quantity,
                    "First entry: sold straddle"
                );
            }
            Transition::Enter { trend } | Transition::Extend { trend, .. } => {
                let target = self
                    .tracker
                    .leg_contract(self.lookup.as_ref(), trend, self.runtime.leg + 1)
                    .await?;
                self.shift(losing_side(trend, &options), &target, step).await?;
                self.leg_contracts.push(target);
                self.runtime.trend = trend;
                self.runtime.leg += 1;
                self.recompute();
                self.log_thresholds(if self.runtime.leg == 1 {
                    "Trend change, leg 1 triggered"
                } else {
                    "Leg extension"
                });
            }
            Transition::Retreat { trend, .. } => {
                let target = match self.leg_contracts.last() {
                    Some(id) => id.clone(),
                    None => {
                        self.tracker
                            .leg_contract(self.lookup.as_ref(), trend, self.runtime.leg)
                            .await?
                    }
                };
                self.shift(&target, losing_side(trend, &options), step).await?;
                self.leg_contracts.pop();
                self.runtime.leg -= 1;
                if self.runtime.leg == 0 {
                    self.runtime.trend = Trend::Neutral;
                }
                self.recompute();
                self.log_thresholds("Reversal, leg retreated");
            }
            Transition::Reset { trend, new_atm } => {
                info!(%trend, %new_atm, "Reset boundary breached, re-centering ATM");
                self.recenter(new_atm, true).await?;
            }
            Transition::AtmShift { new_atm } => {
                let close = self.runtime.first_entry_placed;
                self.recenter(new_atm, close).await?;
            }
        }
        Ok(())
    }

    async fn shift(&self, from: &str, to: &str, quantity: Decimal) -> StraddleResult<()> {
        self.coordinator
            .shift_quantity(from, to, quantity)
            .await
            .map_err(|e| StraddleError::order_failed("shift", &e))
    }

    /// Resolves the reference at `new_atm`, optionally flattens the open legs,
    /// then installs the new reference with a fresh neutral cycle.
    async fn recenter(&mut self, new_atm: Decimal, close_open_legs: bool) -> StraddleResult<()> {
        let interval = self.tracker.current_reference().strike_interval;
        let next = self
            .tracker
            .prepare(self.lookup.as_ref(), new_atm, interval, &self.config)
            .await?;

        if close_open_legs {
            let ids = self.open_contracts();
            self.coordinator
                .close_all(&ids)
                .await
                .map_err(|e| StraddleError::order_failed("close_all", &e))?;
        }

        self.install(next);
        Ok(())
    }

    fn open_contracts(&self) -> Vec<String> {
        let mut ids = self.tracker.current_reference().open_leg_ids();
        for id in &self.leg_contracts {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    fn install(&mut self, next: ReferenceState) {
        self.tracker.commit(next);
        self.leg_contracts.clear();
        let thresholds =
            compute_thresholds(self.tracker.current_reference(), 0, Trend::Neutral, &self.config);
        self.runtime = RuntimeState::neutral(thresholds);
        self.log_thresholds("New reference cycle armed");
    }

    /// Re-centers on `new_atm` without touching any open position.
    ///
    /// The runtime returns to `Neutral`, leg 0 with the initial entry re-armed.
    /// Calling it twice with the same strike yields the same state.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceUnavailable` if the new reference cannot be resolved;
    /// the previous reference and runtime are kept.
    pub async fn reset_reference(&mut self, new_atm: Decimal) -> StraddleResult<&ReferenceState> {
        let interval = self.tracker.current_reference().strike_interval;
        let next = self
            .tracker
            .prepare(self.lookup.as_ref(), new_atm, interval, &self.config)
            .await?;
        self.install(next);
        self.pending_failure = None;
        Ok(self.tracker.current_reference())
    }

    /// Handles an ATM update from the strike ladder.
    ///
    /// Moves smaller than one strike interval are ignored. Larger moves close
    /// the open legs (when the straddle was entered) and re-center on `new_atm`.
    ///
    /// # Errors
    ///
    /// Returns `OrderActionFailed` or `ReferenceUnavailable`; state is unchanged.
    pub async fn on_atm_updated(&mut self, new_atm: Decimal) -> StraddleResult<Option<Transition>> {
        let reference = self.tracker.current_reference();
        if (new_atm - reference.current_atm).abs() < reference.strike_interval {
            return Ok(None);
        }

        info!(
            from = %reference.current_atm,
            to = %new_atm,
            "Major ATM shift detected, resetting strategy bounds"
        );
        let transition = Transition::AtmShift { new_atm };
        self.apply(transition).await?;
        self.pending_failure = None;
        Ok(Some(transition))
    }

    /// Applies new parameters from the next sample on.
    ///
    /// The reference keeps its ATM and options; its derived values and the
    /// current thresholds are rebuilt under the new parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` and leaves the state unchanged when `config` is invalid.
    pub fn apply_config(&mut self, config: StrategyConfig) -> StraddleResult<()> {
        config.validate()?;
        self.tracker.reconfigure(&config)?;
        self.config = config;
        self.recompute();
        self.log_thresholds("Parameters changed");
        Ok(())
    }

    fn recompute(&mut self) {
        self.runtime.thresholds = compute_thresholds(
            self.tracker.current_reference(),
            self.runtime.leg,
            self.runtime.trend,
            &self.config,
        );
    }

    fn record_failure(&mut self, transition: Transition, error: StraddleError) -> TransitionFailure {
        let attempts = match self.pending_failure {
            Some((pending, attempts)) if pending == transition => attempts + 1,
            _ => 1,
        };
        self.pending_failure = Some((transition, attempts));

        warn!(
            action = transition.action(),
            attempts,
            leg = self.runtime.leg,
            trend = %self.runtime.trend,
            error = %error,
            "Transition not committed, will retry on next sample"
        );

        TransitionFailure {
            transition,
            attempts,
            error,
        }
    }

    fn log_thresholds(&self, message: &str) {
        let t = self.runtime.thresholds;
        info!(
            leg = self.runtime.leg,
            trend = %self.runtime.trend,
            atm = %self.tracker.current_reference().current_atm,
            bullish_dp = %t.bullish_dp,
            bearish_dp = %t.bearish_dp,
            reversal_p = %t.reversal_p,
            "{message}"
        );
    }

    #[must_use]
    pub const fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    #[must_use]
    pub const fn reference(&self) -> &ReferenceState {
        self.tracker.current_reference()
    }

    #[must_use]
    pub const fn config(&self) -> &StrategyConfig {
        &self.config
    }

    #[must_use]
    pub fn underlying_token(&self) -> &str {
        self.tracker.underlying_token()
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let reference = self.tracker.current_reference();
        let t = self.runtime.thresholds;
        Snapshot {
            leg: self.runtime.leg,
            trend: self.runtime.trend,
            current_atm: reference.current_atm,
            adjusted_reference: reference.adjusted_reference,
            bullish_dp: t.bullish_dp,
            bearish_dp: t.bearish_dp,
            reversal_p: t.reversal_p,
            upper_reset_boundary: reference.upper_reset_boundary,
            lower_reset_boundary: reference.lower_reset_boundary,
            first_entry_placed: self.runtime.first_entry_placed,
            call_id: reference.options.call_id.clone(),
            put_id: reference.options.put_id.clone(),
            leg_contracts: self.leg_contracts.clone(),
            skew: PositionSkew::for_leg(
                self.runtime.leg,
                self.runtime.trend,
                self.config.base_quantity,
            ),
            last_price: self.last_price,
            stale_ticks: self.stale_ticks,
        }
    }
}

/// ATM option a leg shift in `trend` buys back.
fn losing_side(trend: Trend, options: &OptionPair) -> &str {
    match trend {
        Trend::Bearish => &options.call_id,
        Trend::Bullish | Trend::Neutral => &options.put_id,
    }
}
