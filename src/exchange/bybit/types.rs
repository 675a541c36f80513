//! Type definitions for Bybit v5 API responses.
//!
//! Bybit wraps every payload in a `{retCode, retMsg, result}` envelope and
//! serializes all numbers as strings. Optional prices (an unarmed stop-loss,
//! for instance) come back as the empty string, so those fields stay `String`
//! and are converted at the call site.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Common response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub ret_code: i64,
    pub ret_msg: String,
    pub result: Option<T>,
}

/// Result of `/v5/market/kline`.
///
/// Each entry is `[startTime, open, high, low, close, volume, turnover]`,
/// newest first.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlineResult {
    pub list: Vec<Vec<String>>,
}

/// Result of `/v5/market/instruments-info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentsInfoResult {
    pub list: Vec<InstrumentInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    pub symbol: String,
    pub price_filter: PriceFilter,
    pub lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    #[serde(with = "rust_decimal::serde::str")]
    pub tick_size: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    #[serde(with = "rust_decimal::serde::str")]
    pub qty_step: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_order_qty: Decimal,
}

/// Result of `/v5/account/wallet-balance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalanceResult {
    pub list: Vec<WalletAccount>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    pub account_type: String,
    pub coin: Vec<CoinBalance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinBalance {
    pub coin: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub wallet_balance: Decimal,
}

/// Result of `/v5/order/create` and `/v5/order/cancel-all`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateResult {
    #[serde(default)]
    pub order_id: String,
}

/// Result of `/v5/order/realtime` and `/v5/order/history`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListResult {
    pub list: Vec<OrderEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEntry {
    pub order_id: String,
    pub order_status: String,
}

/// Result of `/v5/position/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionListResult {
    pub list: Vec<PositionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    pub symbol: String,
    pub side: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    /// Empty string while the position has no fills.
    #[serde(default)]
    pub avg_price: String,
    /// Empty string when no stop is armed.
    #[serde(default)]
    pub stop_loss: String,
    /// Empty string when no take-profit is armed.
    #[serde(default)]
    pub take_profit: String,
}

/// Empty `result` payload (trading-stop, set-leverage, switch-mode).
#[derive(Debug, Clone, Deserialize)]
pub struct EmptyResult {}
