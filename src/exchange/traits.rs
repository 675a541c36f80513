//! Venue-agnostic execution gateway trait.
//!
//! The capability set the lifecycle core consumes. Implementations: the Bybit
//! v5 REST client for live trading, and an in-process mock for tests. None of
//! the calls are atomic with any other call; the venue's writes may not be
//! immediately visible in its reads, and callers are expected to verify.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::GatewayError;
use super::types::{Candle, InstrumentRules, OrderState, Side, VenuePosition};

#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Fetch up to `limit` most recent confirmed candles, oldest first.
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval_minutes: u32,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError>;

    /// Available wallet balance for the given settlement coin.
    async fn get_balance(&self, coin: &str) -> Result<Decimal, GatewayError>;

    /// Per-symbol quantization rules. Callers should go through
    /// [`InstrumentRulesCache`](super::rules::InstrumentRulesCache) rather
    /// than hitting the venue on every order.
    async fn get_instrument_rules(&self, symbol: &str) -> Result<InstrumentRules, GatewayError>;

    /// Submit a market order; returns the venue's order id.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
    ) -> Result<String, GatewayError>;

    /// Submit a reduce-only limit order against an existing position.
    /// `side` is the closing side; the position it reduces is the opposite.
    async fn place_reduce_only_limit_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
    ) -> Result<String, GatewayError>;

    /// Set or replace the position's protective levels in one venue call.
    /// `None` leaves the corresponding level untouched.
    async fn set_protective_levels(
        &self,
        symbol: &str,
        side: Side,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), GatewayError>;

    /// Cancel every protective (stop/take-profit) order for the symbol.
    /// Succeeds when there is nothing to cancel.
    async fn cancel_protective_orders(&self, symbol: &str) -> Result<(), GatewayError>;

    /// The open position for the symbol, if any.
    async fn get_open_position(&self, symbol: &str)
        -> Result<Option<VenuePosition>, GatewayError>;

    /// Current status of a previously placed order.
    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderState, GatewayError>;

    /// Set the position leverage for a symbol. Venues report "not modified"
    /// when the value is already set; implementations map that to success.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError>;

    /// Ensure the symbol trades in the position mode this system expects.
    /// Idempotent; "already in that mode" is success.
    async fn switch_position_mode(&self, symbol: &str) -> Result<(), GatewayError>;
}
