//! Cached instrument quantization rules.
//!
//! Tick size, quantity step, and minimum order size change rarely; the cache
//! refetches a symbol's rules only on first use or after the entry expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use super::error::GatewayError;
use super::traits::ExecutionGateway;
use super::types::InstrumentRules;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

struct CacheEntry {
    fetched_at: Instant,
    rules: InstrumentRules,
}

/// Time-expiring per-symbol rules cache over an [`ExecutionGateway`].
pub struct InstrumentRulesCache {
    gateway: Arc<dyn ExecutionGateway>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl InstrumentRulesCache {
    pub fn new(gateway: Arc<dyn ExecutionGateway>) -> Self {
        Self::with_ttl(gateway, DEFAULT_TTL)
    }

    pub fn with_ttl(gateway: Arc<dyn ExecutionGateway>, ttl: Duration) -> Self {
        Self {
            gateway,
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Rules for `symbol`, fetched through the gateway on miss or expiry.
    pub async fn get(&self, symbol: &str) -> Result<InstrumentRules, GatewayError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(symbol) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.rules.clone());
                }
            }
        }

        let rules = self.gateway.get_instrument_rules(symbol).await?;
        debug!(
            %symbol,
            tick_size = %rules.tick_size,
            qty_step = %rules.qty_step,
            min_order_qty = %rules.min_order_qty,
            "Instrument rules refreshed"
        );

        let mut entries = self.entries.write().await;
        entries.insert(
            symbol.to_string(),
            CacheEntry {
                fetched_at: Instant::now(),
                rules: rules.clone(),
            },
        );
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockGateway;
    use rust_decimal_macros::dec;

    fn test_rules() -> InstrumentRules {
        InstrumentRules {
            tick_size: dec!(0.1),
            qty_step: dec!(0.001),
            min_order_qty: dec!(0.01),
        }
    }

    #[tokio::test]
    async fn test_cache_hits_do_not_refetch() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_rules("BTCUSDT", test_rules()).await;

        let cache = InstrumentRulesCache::new(gateway.clone());
        let first = cache.get("BTCUSDT").await.unwrap();
        let second = cache.get("BTCUSDT").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.calls().await.rules_fetches, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_rules("BTCUSDT", test_rules()).await;

        let cache = InstrumentRulesCache::with_ttl(gateway.clone(), Duration::ZERO);
        cache.get("BTCUSDT").await.unwrap();
        cache.get("BTCUSDT").await.unwrap();

        assert_eq!(gateway.calls().await.rules_fetches, 2);
    }
}
