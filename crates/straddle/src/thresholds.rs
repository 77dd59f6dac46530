//! Decision and reversal points for a leg.
//!
//! Pure arithmetic on `Decimal`: the same reference, leg, trend and config
//! always produce the same thresholds.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use straddle_core::StrategyConfig;

use crate::reference::ReferenceState;
use crate::types::{Thresholds, Trend, MAX_LEG};

const DP_BASE_MULTIPLIER: Decimal = dec!(0.6);
const REVERSAL_BASE_MULTIPLIER: Decimal = dec!(0.1);
const PER_LEG_STEP: Decimal = dec!(0.1);

/// Strike-interval multiplier for the decision points of `leg`.
#[must_use]
pub fn strike_multiplier(leg: u8) -> Decimal {
    DP_BASE_MULTIPLIER + PER_LEG_STEP * Decimal::from(leg)
}

/// Strike-interval multiplier for the reversal point of `leg`.
#[must_use]
pub fn reversal_multiplier(leg: u8) -> Decimal {
    REVERSAL_BASE_MULTIPLIER + PER_LEG_STEP * Decimal::from(leg)
}

/// Computes the decision points and reversal point for `leg` in `trend`.
///
/// At the last leg the decision points are the reference's reset boundaries,
/// so crossing them can only trigger a reset.
#[must_use]
pub fn compute_thresholds(
    reference: &ReferenceState,
    leg: u8,
    trend: Trend,
    config: &StrategyConfig,
) -> Thresholds {
    let leg = leg.min(MAX_LEG);
    let adjusted = reference.adjusted_reference;
    let interval = reference.strike_interval;

    let (bullish_dp, bearish_dp) = if leg >= MAX_LEG {
        (reference.upper_reset_boundary, reference.lower_reset_boundary)
    } else {
        let band = config.offset + config.threshold + strike_multiplier(leg) * interval;
        (adjusted + band, adjusted - band)
    };

    let reversal_p = if leg == 0 {
        Decimal::ZERO
    } else {
        let distance = config.offset + reversal_multiplier(leg) * interval;
        match trend {
            Trend::Bullish => adjusted + distance,
            Trend::Bearish => adjusted - distance,
            Trend::Neutral => Decimal::ZERO,
        }
    };

    Thresholds {
        bullish_dp,
        bearish_dp,
        reversal_p,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use straddle_core::OptionPair;

    fn worked_config() -> StrategyConfig {
        StrategyConfig {
            offset: dec!(10),
            threshold: dec!(15),
            adjustment_points: dec!(5),
            strike_interval: dec!(50),
            base_quantity: dec!(100),
        }
    }

    fn worked_reference() -> ReferenceState {
        let pair = OptionPair {
            call_id: "NIFTY-22000-CE".to_string(),
            put_id: "NIFTY-22000-PE".to_string(),
        };
        ReferenceState::new(dec!(22000), dec!(50), pair, &worked_config()).unwrap()
    }

    #[test]
    fn leg_zero_decision_points_follow_formula() {
        let t = compute_thresholds(&worked_reference(), 0, Trend::Neutral, &worked_config());
        // 21995 + 10 + 15 + 0.6 * 50
        assert_eq!(t.bullish_dp, dec!(22050));
        assert_eq!(t.bearish_dp, dec!(21940));
        assert_eq!(t.reversal_p, Decimal::ZERO);
    }

    #[test]
    fn leg_one_bullish_thresholds() {
        let t = compute_thresholds(&worked_reference(), 1, Trend::Bullish, &worked_config());
        assert_eq!(t.bullish_dp, dec!(22055));
        assert_eq!(t.bearish_dp, dec!(21935));
        assert_eq!(t.reversal_p, dec!(22015));
    }

    #[test]
    fn leg_one_bearish_reversal_is_mirrored() {
        let t = compute_thresholds(&worked_reference(), 1, Trend::Bearish, &worked_config());
        // 21995 - 10 - 0.2 * 50
        assert_eq!(t.reversal_p, dec!(21975));
    }

    #[test]
    fn decision_points_widen_with_each_leg() {
        let reference = worked_reference();
        let config = worked_config();
        let bulls: Vec<Decimal> = (0..4)
            .map(|leg| compute_thresholds(&reference, leg, Trend::Bullish, &config).bullish_dp)
            .collect();
        assert_eq!(bulls, vec![dec!(22050), dec!(22055), dec!(22060), dec!(22065)]);
    }

    #[test]
    fn leg_four_clamps_to_reset_boundaries() {
        let reference = worked_reference();
        let t = compute_thresholds(&reference, 4, Trend::Bullish, &worked_config());
        assert_eq!(t.bullish_dp, dec!(22085));
        assert_eq!(t.bearish_dp, dec!(21905));
        // 21995 + 10 + 0.5 * 50
        assert_eq!(t.reversal_p, dec!(22030));
    }

    #[test]
    fn repeated_calls_are_identical() {
        let reference = worked_reference();
        let config = worked_config();
        for leg in 0..=MAX_LEG {
            for trend in [Trend::Neutral, Trend::Bullish, Trend::Bearish] {
                let first = compute_thresholds(&reference, leg, trend, &config);
                let second = compute_thresholds(&reference, leg, trend, &config);
                assert_eq!(first, second);
                assert_eq!(first.bullish_dp.serialize(), second.bullish_dp.serialize());
            }
        }
    }
}
