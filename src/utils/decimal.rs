//! Decimal arithmetic utilities for financial calculations.
//!
//! The venue rejects any order whose price is not aligned to the instrument's
//! tick size or whose quantity is not aligned to its quantity step, so every
//! outgoing value passes through one of these helpers.

use rust_decimal::Decimal;

/// Round down to tick size (e.g., 0.1 for most perp prices).
pub fn quantize_down(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).floor() * tick_size
}

/// Round up to tick size.
pub fn quantize_up(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).ceil() * tick_size
}

/// Round down to quantity step (lot precision).
pub fn floor_to_step(value: Decimal, qty_step: Decimal) -> Decimal {
    if qty_step <= Decimal::ZERO {
        return value;
    }
    (value / qty_step).floor() * qty_step
}

/// Whether two prices agree within a single tick.
///
/// One tick exactly: a wider tolerance would mask real placement errors.
pub fn within_one_tick(a: Decimal, b: Decimal, tick_size: Decimal) -> bool {
    (a - b).abs() <= tick_size
}
