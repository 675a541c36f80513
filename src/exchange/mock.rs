//! Scriptable in-process venue for tests.
//!
//! Simulates the small slice of venue behavior the lifecycle core depends on:
//! market entries that become visible after a configurable number of position
//! polls (the venue's writes are not immediately readable), protective levels
//! that can be forced to read back different from what was requested, and
//! order statuses that tests flip between Open/Filled/Cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::GatewayError;
use super::traits::ExecutionGateway;
use super::types::{Candle, InstrumentRules, OrderState, Side, VenuePosition};

/// Call counters for asserting which remote mutations a code path performed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayCalls {
    pub candle_fetches: u32,
    pub balance_fetches: u32,
    pub rules_fetches: u32,
    pub market_orders: u32,
    pub reduce_only_orders: u32,
    pub protective_updates: u32,
    pub protective_cancels: u32,
    pub position_queries: u32,
    pub order_status_queries: u32,
    pub leverage_calls: u32,
    pub mode_switches: u32,
}

impl GatewayCalls {
    /// Total count of venue *mutations* (anything that is not a read).
    pub fn mutations(&self) -> u32 {
        self.market_orders
            + self.reduce_only_orders
            + self.protective_updates
            + self.protective_cancels
    }
}

#[derive(Default)]
struct MockState {
    balance: Decimal,
    mark_prices: HashMap<String, Decimal>,
    rules: HashMap<String, InstrumentRules>,
    candles: HashMap<String, Vec<Candle>>,
    positions: HashMap<String, VenuePosition>,
    /// Market entries not yet visible to position reads: (position, polls left).
    pending_entries: HashMap<String, (VenuePosition, u32)>,
    orders: HashMap<String, OrderState>,
    calls: GatewayCalls,
    /// Polls of `get_open_position` before a new entry becomes visible.
    entry_visibility_delay: u32,
    /// When set, positions report these protective levels after the next
    /// `set_protective_levels`, regardless of what was requested.
    protective_override: Option<(Option<Decimal>, Option<Decimal>)>,
    fail_market_orders: bool,
}

/// In-memory [`ExecutionGateway`] implementation for tests.
pub struct MockGateway {
    state: Arc<RwLock<MockState>>,
    order_id_counter: AtomicU64,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            order_id_counter: AtomicU64::new(1),
        }
    }

    fn next_order_id(&self) -> String {
        format!("mock-{}", self.order_id_counter.fetch_add(1, Ordering::SeqCst))
    }

    // ---- scripting helpers -------------------------------------------------

    pub async fn set_balance(&self, balance: Decimal) {
        self.state.write().await.balance = balance;
    }

    pub async fn set_mark_price(&self, symbol: &str, price: Decimal) {
        self.state
            .write()
            .await
            .mark_prices
            .insert(symbol.to_string(), price);
    }

    pub async fn set_rules(&self, symbol: &str, rules: InstrumentRules) {
        self.state
            .write()
            .await
            .rules
            .insert(symbol.to_string(), rules);
    }

    pub async fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.state
            .write()
            .await
            .candles
            .insert(symbol.to_string(), candles);
    }

    /// Make market entries invisible for the next `polls` position reads.
    pub async fn delay_entry_visibility(&self, polls: u32) {
        self.state.write().await.entry_visibility_delay = polls;
    }

    /// Force subsequent protective-level updates to read back as the given
    /// values instead of what was requested.
    pub async fn override_reported_protective(
        &self,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) {
        self.state.write().await.protective_override = Some((stop_loss, take_profit));
    }

    pub async fn clear_protective_override(&self) {
        self.state.write().await.protective_override = None;
    }

    pub async fn fail_market_orders(&self, fail: bool) {
        self.state.write().await.fail_market_orders = fail;
    }

    /// Directly install a position, as if opened out-of-band.
    pub async fn install_position(&self, position: VenuePosition) {
        let mut state = self.state.write().await;
        state.positions.insert(position.symbol.clone(), position);
    }

    /// Remove a position, as if closed by stop, target, or manual action.
    pub async fn close_position(&self, symbol: &str) {
        self.state.write().await.positions.remove(symbol);
    }

    pub async fn set_order_state(&self, order_id: &str, status: OrderState) {
        self.state
            .write()
            .await
            .orders
            .insert(order_id.to_string(), status);
    }

    pub async fn position(&self, symbol: &str) -> Option<VenuePosition> {
        self.state.read().await.positions.get(symbol).cloned()
    }

    pub async fn calls(&self) -> GatewayCalls {
        self.state.read().await.calls.clone()
    }
}

#[async_trait]
impl ExecutionGateway for MockGateway {
    async fn fetch_candles(
        &self,
        symbol: &str,
        _interval_minutes: u32,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError> {
        let mut state = self.state.write().await;
        state.calls.candle_fetches += 1;
        let candles = state.candles.get(symbol).cloned().unwrap_or_default();
        let start = candles.len().saturating_sub(limit as usize);
        Ok(candles[start..].to_vec())
    }

    async fn get_balance(&self, _coin: &str) -> Result<Decimal, GatewayError> {
        let mut state = self.state.write().await;
        state.calls.balance_fetches += 1;
        Ok(state.balance)
    }

    async fn get_instrument_rules(&self, symbol: &str) -> Result<InstrumentRules, GatewayError> {
        let mut state = self.state.write().await;
        state.calls.rules_fetches += 1;
        state
            .rules
            .get(symbol)
            .cloned()
            .ok_or_else(|| GatewayError::VenueRejection {
                code: 10001,
                message: format!("unknown symbol {symbol}"),
            })
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
    ) -> Result<String, GatewayError> {
        let mut state = self.state.write().await;
        state.calls.market_orders += 1;

        if state.fail_market_orders {
            return Err(GatewayError::Transient("simulated outage".to_string()));
        }

        let price = state
            .mark_prices
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ONE);
        let position = VenuePosition {
            symbol: symbol.to_string(),
            side,
            size: qty,
            avg_price: price,
            stop_loss: None,
            take_profit: None,
        };

        let order_id = self.next_order_id();
        let delay = state.entry_visibility_delay;
        if delay == 0 {
            state.positions.insert(symbol.to_string(), position);
        } else {
            state
                .pending_entries
                .insert(symbol.to_string(), (position, delay));
        }
        state.orders.insert(order_id.clone(), OrderState::Filled);

        debug!(%symbol, ?side, %qty, %order_id, "Mock market order");
        Ok(order_id)
    }

    async fn place_reduce_only_limit_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
    ) -> Result<String, GatewayError> {
        let mut state = self.state.write().await;
        state.calls.reduce_only_orders += 1;

        let order_id = self.next_order_id();
        state.orders.insert(order_id.clone(), OrderState::Open);

        debug!(%symbol, ?side, %qty, %price, %order_id, "Mock reduce-only order");
        Ok(order_id)
    }

    async fn set_protective_levels(
        &self,
        symbol: &str,
        _side: Side,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.calls.protective_updates += 1;

        let (reported_sl, reported_tp) = match state.protective_override {
            Some(over) => over,
            None => (stop_loss, take_profit),
        };

        let position = state.positions.get_mut(symbol).ok_or_else(|| {
            GatewayError::VenueRejection {
                code: 10001,
                message: format!("no open position for {symbol}"),
            }
        })?;
        if reported_sl.is_some() {
            position.stop_loss = reported_sl;
        }
        if reported_tp.is_some() {
            position.take_profit = reported_tp;
        }
        Ok(())
    }

    async fn cancel_protective_orders(&self, symbol: &str) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.calls.protective_cancels += 1;
        if let Some(position) = state.positions.get_mut(symbol) {
            position.stop_loss = None;
            position.take_profit = None;
        }
        Ok(())
    }

    async fn get_open_position(
        &self,
        symbol: &str,
    ) -> Result<Option<VenuePosition>, GatewayError> {
        let mut state = self.state.write().await;
        state.calls.position_queries += 1;

        if let Some((position, polls_left)) = state.pending_entries.remove(symbol) {
            if polls_left <= 1 {
                state.positions.insert(symbol.to_string(), position);
            } else {
                state
                    .pending_entries
                    .insert(symbol.to_string(), (position, polls_left - 1));
                return Ok(None);
            }
        }

        Ok(state.positions.get(symbol).cloned())
    }

    async fn get_order_status(
        &self,
        _symbol: &str,
        order_id: &str,
    ) -> Result<OrderState, GatewayError> {
        let mut state = self.state.write().await;
        state.calls.order_status_queries += 1;
        Ok(state
            .orders
            .get(order_id)
            .copied()
            .unwrap_or(OrderState::Unknown))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.calls.leverage_calls += 1;
        debug!(%symbol, leverage, "Mock set leverage");
        Ok(())
    }

    async fn switch_position_mode(&self, symbol: &str) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.calls.mode_switches += 1;
        debug!(%symbol, "Mock switch position mode");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_entry_visibility_delay() {
        let gateway = MockGateway::new();
        gateway.set_mark_price("BTCUSDT", dec!(50000)).await;
        gateway.delay_entry_visibility(2).await;

        gateway
            .place_market_order("BTCUSDT", Side::Buy, dec!(0.5))
            .await
            .unwrap();

        assert!(gateway.get_open_position("BTCUSDT").await.unwrap().is_none());
        let visible = gateway.get_open_position("BTCUSDT").await.unwrap();
        assert_eq!(visible.unwrap().size, dec!(0.5));
    }

    #[tokio::test]
    async fn test_protective_override_reports_requested_values_as_stale() {
        let gateway = MockGateway::new();
        gateway.set_mark_price("BTCUSDT", dec!(50000)).await;
        gateway
            .place_market_order("BTCUSDT", Side::Buy, dec!(1))
            .await
            .unwrap();

        gateway
            .override_reported_protective(Some(dec!(49000)), None)
            .await;
        gateway
            .set_protective_levels("BTCUSDT", Side::Buy, Some(dec!(49500)), None)
            .await
            .unwrap();

        let position = gateway.position("BTCUSDT").await.unwrap();
        assert_eq!(position.stop_loss, Some(dec!(49000)));
    }

    #[tokio::test]
    async fn test_unknown_order_status() {
        let gateway = MockGateway::new();
        let status = gateway.get_order_status("BTCUSDT", "nope").await.unwrap();
        assert_eq!(status, OrderState::Unknown);
    }
}
