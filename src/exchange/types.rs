//! Domain types shared between the gateway trait and its implementations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One confirmed fixed-duration price/volume sample.
///
/// Candles are immutable once confirmed and strictly ordered by `open_time`
/// (milliseconds since epoch); the tracker enforces the ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Order / position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The opposing side (used for reduce-only exit orders).
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Buy" => Ok(Side::Buy),
            "Sell" => Ok(Side::Sell),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Terminal-or-not status of a previously placed order.
///
/// `Unknown` means the venue reported the order in neither its active set nor
/// its history; callers treat it as "check again next cycle".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Open,
    Filled,
    Cancelled,
    Unknown,
}

/// Per-symbol quantization rules the venue enforces on every order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRules {
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Minimum quantity increment.
    pub qty_step: Decimal,
    /// Smallest order the venue accepts.
    pub min_order_qty: Decimal,
}

/// An open position as reported by the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct VenuePosition {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub avg_price: Decimal,
    /// Protective stop currently armed on the venue, if any.
    pub stop_loss: Option<Decimal>,
    /// Position-level take-profit currently armed on the venue, if any.
    pub take_profit: Option<Decimal>,
}
