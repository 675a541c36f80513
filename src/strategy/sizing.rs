//! Position sizing under risk and margin constraints.
//!
//! Pure arithmetic: the caller supplies the balance (fetched from the gateway
//! beforehand) and the instrument rules. Two independent caps apply — the
//! risk budget against the stop distance, and the margin allowance times
//! leverage — and the smaller wins before quantization.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::exchange::InstrumentRules;
use crate::utils::decimal::floor_to_step;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    /// Entry and stop coincide; the risk per unit is undefined.
    #[error("entry price equals stop price; risk distance is zero")]
    ZeroRiskDistance,

    /// The quantized quantity fell below the venue's minimum order size.
    #[error("quantized quantity {computed} below venue minimum {min}")]
    BelowMinimumSize { computed: Decimal, min: Decimal },
}

/// Compute the order quantity for a new position.
///
/// * `risk_percent` — percentage of balance risked to the stop (1 = 1%).
/// * `margin_limit` — fraction of balance allowed as margin (0.20 = 20%).
///
/// The result is an exact multiple of `rules.qty_step` and at least
/// `rules.min_order_qty`, or a [`SizingError`].
pub fn size(
    balance: Decimal,
    entry_price: Decimal,
    stop_price: Decimal,
    risk_percent: Decimal,
    leverage: u32,
    margin_limit: Decimal,
    rules: &InstrumentRules,
) -> Result<Decimal, SizingError> {
    let risk_per_unit = (entry_price - stop_price).abs();
    if risk_per_unit.is_zero() {
        return Err(SizingError::ZeroRiskDistance);
    }

    let risk_amount = balance * risk_percent / dec!(100);
    let qty_by_risk = risk_amount / risk_per_unit;

    let max_position_value = balance * margin_limit * Decimal::from(leverage);
    let qty_by_margin = max_position_value / entry_price;

    let chosen = qty_by_risk.min(qty_by_margin);
    let quantized = floor_to_step(chosen, rules.qty_step);

    if quantized < rules.min_order_qty {
        return Err(SizingError::BelowMinimumSize {
            computed: quantized,
            min: rules.min_order_qty,
        });
    }
    Ok(quantized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> InstrumentRules {
        InstrumentRules {
            tick_size: dec!(0.01),
            qty_step: dec!(0.001),
            min_order_qty: dec!(0.01),
        }
    }

    #[test]
    fn test_risk_cap_binds() {
        // balance 10000, risk 1% = 100 over a 2.00 stop distance -> 50.
        // Margin cap: 10000 * 0.20 * 5 / 100 = 100. Risk cap wins.
        let qty = size(
            dec!(10000),
            dec!(100),
            dec!(98),
            dec!(1),
            5,
            dec!(0.20),
            &rules(),
        )
        .unwrap();
        assert_eq!(qty, dec!(50.000));
    }

    #[test]
    fn test_margin_cap_binds() {
        // Tight margin allowance caps the quantity below the risk budget.
        let qty = size(
            dec!(10000),
            dec!(100),
            dec!(98),
            dec!(1),
            1,
            dec!(0.05),
            &rules(),
        )
        .unwrap();
        // risk qty = 50, margin qty = 10000 * 0.05 * 1 / 100 = 5
        assert_eq!(qty, dec!(5.000));
    }

    #[test]
    fn test_zero_risk_distance() {
        let result = size(
            dec!(10000),
            dec!(100),
            dec!(100),
            dec!(1),
            5,
            dec!(0.20),
            &rules(),
        );
        assert_eq!(result, Err(SizingError::ZeroRiskDistance));
    }

    #[test]
    fn test_below_minimum_size() {
        // Tiny balance: the quantized quantity collapses under the minimum.
        let result = size(
            dec!(10),
            dec!(50000),
            dec!(49000),
            dec!(1),
            5,
            dec!(0.20),
            &rules(),
        );
        assert!(matches!(result, Err(SizingError::BelowMinimumSize { .. })));
    }

    #[test]
    fn test_quantity_is_step_aligned() {
        // An awkward stop distance produces a repeating-decimal raw quantity;
        // the result must still be an exact step multiple.
        let qty = size(
            dec!(10000),
            dec!(100),
            dec!(97.77),
            dec!(1),
            5,
            dec!(0.20),
            &rules(),
        )
        .unwrap();
        assert_eq!(qty % rules().qty_step, Decimal::ZERO);
        assert!(qty >= rules().min_order_qty);
    }

    #[test]
    fn test_coarse_step_floors_down() {
        let coarse = InstrumentRules {
            tick_size: dec!(0.5),
            qty_step: dec!(1),
            min_order_qty: dec!(1),
        };
        let qty = size(
            dec!(10000),
            dec!(100),
            dec!(97),
            dec!(1),
            5,
            dec!(0.20),
            &coarse,
        )
        .unwrap();
        // raw risk qty = 33.33.. -> floored to 33
        assert_eq!(qty, dec!(33));
    }
}
