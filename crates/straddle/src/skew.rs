//! Call/put quantity split implied by the current leg.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{Trend, MAX_LEG};

/// Fraction of the base quantity moved per leg.
pub const LEG_SHIFT_FRACTION: Decimal = dec!(0.25);

/// Quantity moved between the two sides on every leg change.
#[must_use]
pub fn leg_shift_quantity(base_quantity: Decimal) -> Decimal {
    base_quantity * LEG_SHIFT_FRACTION
}

/// Intended short quantity on each side of the straddle.
///
/// Leg 0 is an even split; every leg moves a quarter of the base quantity
/// toward the trend side, so leg 4 holds everything on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSkew {
    pub call_quantity: Decimal,
    pub put_quantity: Decimal,
}

impl PositionSkew {
    #[must_use]
    pub fn for_leg(leg: u8, trend: Trend, base_quantity: Decimal) -> Self {
        let moved = leg_shift_quantity(base_quantity) * Decimal::from(leg.min(MAX_LEG));
        let (call_quantity, put_quantity) = match trend {
            Trend::Neutral => (base_quantity, base_quantity),
            Trend::Bullish => (base_quantity + moved, base_quantity - moved),
            Trend::Bearish => (base_quantity - moved, base_quantity + moved),
        };
        Self {
            call_quantity,
            put_quantity,
        }
    }

    /// Call side as a percentage of the total.
    #[must_use]
    pub fn call_pct(&self) -> Decimal {
        let total = self.call_quantity + self.put_quantity;
        if total.is_zero() {
            return Decimal::ZERO;
        }
        self.call_quantity / total * Decimal::ONE_HUNDRED
    }

    #[must_use]
    pub fn put_pct(&self) -> Decimal {
        let total = self.call_quantity + self.put_quantity;
        if total.is_zero() {
            return Decimal::ZERO;
        }
        Decimal::ONE_HUNDRED - self.call_pct()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_is_even_split() {
        let skew = PositionSkew::for_leg(0, Trend::Neutral, dec!(100));
        assert_eq!(skew.call_quantity, dec!(100));
        assert_eq!(skew.put_quantity, dec!(100));
        assert_eq!(skew.call_pct(), dec!(50));
    }

    #[test]
    fn bullish_leg_two_moves_half_the_base() {
        let skew = PositionSkew::for_leg(2, Trend::Bullish, dec!(100));
        assert_eq!(skew.call_quantity, dec!(150));
        assert_eq!(skew.put_quantity, dec!(50));
        assert_eq!(skew.call_pct(), dec!(75));
    }

    #[test]
    fn leg_four_is_fully_one_sided() {
        let bull = PositionSkew::for_leg(4, Trend::Bullish, dec!(60));
        assert_eq!(bull.call_pct(), dec!(100));
        assert_eq!(bull.put_quantity, Decimal::ZERO);

        let bear = PositionSkew::for_leg(4, Trend::Bearish, dec!(60));
        assert_eq!(bear.put_pct(), dec!(100));
        assert_eq!(bear.call_quantity, Decimal::ZERO);
    }

    #[test]
    fn shift_quantity_is_a_quarter_of_base() {
        assert_eq!(leg_shift_quantity(dec!(75)), dec!(18.75));
    }
}
