//! Bybit v5 REST API client.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::config::BybitConfig;
use crate::exchange::error::GatewayError;
use crate::exchange::traits::ExecutionGateway;
use crate::exchange::types::{Candle, InstrumentRules, OrderState, Side, VenuePosition};

use super::types::*;

const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW: &str = "5000";
const CATEGORY: &str = "linear";

/// Venue error codes that indicate throttling rather than rejection.
const RATE_LIMIT_CODES: &[i64] = &[10006, 10018];
/// "Leverage not modified" — setting a value that is already set.
const LEVERAGE_NOT_MODIFIED: i64 = 110043;
/// "Position mode is not modified".
const POSITION_MODE_NOT_MODIFIED: i64 = 110025;

/// Bybit linear-perpetuals client implementing [`ExecutionGateway`].
pub struct BybitClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
}

impl BybitClient {
    /// Create a new client from configuration.
    pub fn new(config: &BybitConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let base_url = if config.testnet {
            TESTNET_URL.to_string()
        } else {
            MAINNET_URL.to_string()
        };

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            base_url,
        })
    }

    /// Current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    /// HMAC-SHA256 over `timestamp + api_key + recv_window + payload`, per the
    /// v5 signing scheme. `payload` is the query string for GETs and the raw
    /// JSON body for POSTs.
    fn sign(&self, timestamp: u64, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("{timestamp}{}{RECV_WINDOW}{payload}", self.api_key).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Unwrap the v5 envelope, mapping venue error codes to the taxonomy.
    fn unwrap_envelope<T>(response: ApiResponse<T>) -> Result<T, GatewayError> {
        if response.ret_code != 0 {
            if RATE_LIMIT_CODES.contains(&response.ret_code) {
                return Err(GatewayError::Transient(format!(
                    "rate limited: {}",
                    response.ret_msg
                )));
            }
            return Err(GatewayError::VenueRejection {
                code: response.ret_code,
                message: response.ret_msg,
            });
        }
        response
            .result
            .ok_or_else(|| GatewayError::BadResponse("retCode 0 but empty result".to_string()))
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response: ApiResponse<T> = self.http.get(&url).send().await?.json().await?;
        Self::unwrap_envelope(response)
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, GatewayError> {
        let timestamp = Self::timestamp();
        let signature = self.sign(timestamp, query);
        let url = format!("{}{}?{}", self.base_url, path, query);

        let response: ApiResponse<T> = self
            .http
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_envelope(response)
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, GatewayError> {
        let timestamp = Self::timestamp();
        let payload = body.to_string();
        let signature = self.sign(timestamp, &payload);
        let url = format!("{}{}", self.base_url, path);

        debug!(%path, %payload, "Bybit POST");

        let response: ApiResponse<T> = self
            .http
            .post(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_envelope(response)
    }

    fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, GatewayError> {
        Decimal::from_str(raw)
            .map_err(|e| GatewayError::BadResponse(format!("bad {field} {raw:?}: {e}")))
    }

    /// Empty strings mean "not armed" on position fields.
    fn parse_optional_decimal(raw: &str) -> Option<Decimal> {
        if raw.is_empty() {
            None
        } else {
            Decimal::from_str(raw).ok()
        }
    }

    fn parse_kline_row(row: &[String]) -> Result<Candle, GatewayError> {
        if row.len() < 6 {
            return Err(GatewayError::BadResponse(format!(
                "kline row has {} fields",
                row.len()
            )));
        }
        Ok(Candle {
            open_time: row[0]
                .parse::<i64>()
                .map_err(|e| GatewayError::BadResponse(format!("bad kline start: {e}")))?,
            open: Self::parse_decimal(&row[1], "open")?,
            high: Self::parse_decimal(&row[2], "high")?,
            low: Self::parse_decimal(&row[3], "low")?,
            close: Self::parse_decimal(&row[4], "close")?,
            volume: Self::parse_decimal(&row[5], "volume")?,
        })
    }

    fn parse_order_status(status: &str) -> OrderState {
        match status {
            "New" | "PartiallyFilled" | "Untriggered" | "Created" => OrderState::Open,
            "Filled" => OrderState::Filled,
            "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" | "Rejected" => {
                OrderState::Cancelled
            }
            other => {
                warn!(status = other, "Unrecognized order status");
                OrderState::Unknown
            }
        }
    }
}

#[async_trait]
impl ExecutionGateway for BybitClient {
    #[instrument(skip(self))]
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval_minutes: u32,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError> {
        let query = format!(
            "category={CATEGORY}&symbol={}&interval={}&limit={}",
            urlencoding::encode(symbol),
            interval_minutes,
            limit
        );
        let result: KlineResult = self.get_public("/v5/market/kline", &query).await?;

        // API returns newest first; callers want chronological order.
        let mut candles = result
            .list
            .iter()
            .map(|row| Self::parse_kline_row(row))
            .collect::<Result<Vec<_>, _>>()?;
        candles.reverse();
        Ok(candles)
    }

    #[instrument(skip(self))]
    async fn get_balance(&self, coin: &str) -> Result<Decimal, GatewayError> {
        let query = format!("accountType=UNIFIED&coin={}", urlencoding::encode(coin));
        let result: WalletBalanceResult = self
            .get_signed("/v5/account/wallet-balance", &query)
            .await?;

        result
            .list
            .iter()
            .filter(|account| account.account_type == "UNIFIED")
            .flat_map(|account| account.coin.iter())
            .find(|balance| balance.coin == coin)
            .map(|balance| balance.wallet_balance)
            .ok_or_else(|| GatewayError::BadResponse(format!("no {coin} balance in response")))
    }

    #[instrument(skip(self))]
    async fn get_instrument_rules(&self, symbol: &str) -> Result<InstrumentRules, GatewayError> {
        let query = format!("category={CATEGORY}&symbol={}", urlencoding::encode(symbol));
        let result: InstrumentsInfoResult = self
            .get_public("/v5/market/instruments-info", &query)
            .await?;

        let info = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::BadResponse(format!("no instrument info for {symbol}")))?;

        Ok(InstrumentRules {
            tick_size: info.price_filter.tick_size,
            qty_step: info.lot_size_filter.qty_step,
            min_order_qty: info.lot_size_filter.min_order_qty,
        })
    }

    #[instrument(skip(self))]
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
    ) -> Result<String, GatewayError> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": side.to_string(),
            "orderType": "Market",
            "qty": qty.to_string(),
            "positionIdx": 0,
        });
        let result: OrderCreateResult = self.post_signed("/v5/order/create", &body).await?;
        Ok(result.order_id)
    }

    #[instrument(skip(self))]
    async fn place_reduce_only_limit_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
    ) -> Result<String, GatewayError> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": side.to_string(),
            "orderType": "Limit",
            "qty": qty.to_string(),
            "price": price.to_string(),
            "reduceOnly": true,
            "positionIdx": 0,
        });
        let result: OrderCreateResult = self.post_signed("/v5/order/create", &body).await?;
        Ok(result.order_id)
    }

    #[instrument(skip(self))]
    async fn set_protective_levels(
        &self,
        symbol: &str,
        _side: Side,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), GatewayError> {
        let mut body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "positionIdx": 0,
        });
        if let Some(sl) = stop_loss {
            body["stopLoss"] = serde_json::Value::String(sl.to_string());
        }
        if let Some(tp) = take_profit {
            body["takeProfit"] = serde_json::Value::String(tp.to_string());
        }

        self.post_signed::<EmptyResult>("/v5/position/trading-stop", &body)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_protective_orders(&self, symbol: &str) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "orderFilter": "StopOrder",
        });
        match self
            .post_signed::<OrderCreateResult>("/v5/order/cancel-all", &body)
            .await
        {
            Ok(_) => Ok(()),
            // Nothing armed is not a failure.
            Err(GatewayError::VenueRejection { message, .. })
                if message.to_lowercase().contains("no orders") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn get_open_position(
        &self,
        symbol: &str,
    ) -> Result<Option<VenuePosition>, GatewayError> {
        let query = format!("category={CATEGORY}&symbol={}", urlencoding::encode(symbol));
        let result: PositionListResult = self.get_signed("/v5/position/list", &query).await?;

        for entry in result.list {
            if entry.size <= Decimal::ZERO {
                continue;
            }
            let side = entry
                .side
                .parse::<Side>()
                .map_err(GatewayError::BadResponse)?;
            return Ok(Some(VenuePosition {
                symbol: entry.symbol,
                side,
                size: entry.size,
                avg_price: Self::parse_decimal(&entry.avg_price, "avgPrice")?,
                stop_loss: Self::parse_optional_decimal(&entry.stop_loss),
                take_profit: Self::parse_optional_decimal(&entry.take_profit),
            }));
        }
        Ok(None)
    }

    #[instrument(skip(self))]
    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderState, GatewayError> {
        let query = format!(
            "category={CATEGORY}&symbol={}&orderId={}&limit=1",
            urlencoding::encode(symbol),
            urlencoding::encode(order_id)
        );

        // Still in the active set?
        let realtime: OrderListResult = self.get_signed("/v5/order/realtime", &query).await?;
        if let Some(entry) = realtime.list.iter().find(|o| o.order_id == order_id) {
            return Ok(Self::parse_order_status(&entry.order_status));
        }

        // Not active: the terminal status lives in the history endpoint.
        let history: OrderListResult = self.get_signed("/v5/order/history", &query).await?;
        match history.list.iter().find(|o| o.order_id == order_id) {
            Some(entry) => Ok(Self::parse_order_status(&entry.order_status)),
            None => Ok(OrderState::Unknown),
        }
    }

    #[instrument(skip(self))]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        match self
            .post_signed::<EmptyResult>("/v5/position/set-leverage", &body)
            .await
        {
            Ok(_) => Ok(()),
            Err(GatewayError::VenueRejection { code, .. }) if code == LEVERAGE_NOT_MODIFIED => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn switch_position_mode(&self, symbol: &str) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "mode": 0,
        });
        match self
            .post_signed::<EmptyResult>("/v5/position/switch-mode", &body)
            .await
        {
            Ok(_) => Ok(()),
            Err(GatewayError::VenueRejection { code, .. })
                if code == POSITION_MODE_NOT_MODIFIED =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kline_row() {
        let row: Vec<String> = ["1700000000000", "100.5", "101.0", "99.5", "100.8", "1234.5"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let candle = BybitClient::parse_kline_row(&row).unwrap();
        assert_eq!(candle.open_time, 1_700_000_000_000);
        assert_eq!(candle.close.to_string(), "100.8");
    }

    #[test]
    fn test_parse_kline_row_too_short() {
        let row: Vec<String> = vec!["1700000000000".to_string()];
        assert!(BybitClient::parse_kline_row(&row).is_err());
    }

    #[test]
    fn test_parse_order_status_mapping() {
        assert_eq!(BybitClient::parse_order_status("New"), OrderState::Open);
        assert_eq!(
            BybitClient::parse_order_status("PartiallyFilled"),
            OrderState::Open
        );
        assert_eq!(BybitClient::parse_order_status("Filled"), OrderState::Filled);
        assert_eq!(
            BybitClient::parse_order_status("Cancelled"),
            OrderState::Cancelled
        );
        assert_eq!(
            BybitClient::parse_order_status("Weird"),
            OrderState::Unknown
        );
    }

    #[test]
    fn test_parse_optional_decimal_empty() {
        assert_eq!(BybitClient::parse_optional_decimal(""), None);
        assert_eq!(
            BybitClient::parse_optional_decimal("49000.5"),
            Some(Decimal::from_str("49000.5").unwrap())
        );
    }

    #[test]
    fn test_envelope_rejection_mapping() {
        let rejected: ApiResponse<EmptyResult> = ApiResponse {
            ret_code: 110007,
            ret_msg: "insufficient balance".to_string(),
            result: None,
        };
        match BybitClient::unwrap_envelope(rejected) {
            Err(GatewayError::VenueRejection { code, .. }) => assert_eq!(code, 110007),
            other => panic!("expected VenueRejection, got {other:?}"),
        }

        let throttled: ApiResponse<EmptyResult> = ApiResponse {
            ret_code: 10006,
            ret_msg: "too many visits".to_string(),
            result: None,
        };
        assert!(matches!(
            BybitClient::unwrap_envelope(throttled),
            Err(GatewayError::Transient(_))
        ));
    }
}
