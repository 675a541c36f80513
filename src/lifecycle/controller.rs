//! Trade lifecycle controller.
//!
//! Owns every remote mutation for a symbol. Two independently scheduled
//! drivers call in here — the candle path via [`open`](TradeLifecycleController::open)
//! and the periodic sweep via [`reconcile`](TradeLifecycleController::reconcile) —
//! and a per-symbol mutex spans the full body of either call so their venue
//! mutations never interleave. Different symbols proceed in parallel.
//!
//! The venue is eventually consistent: writes are verified by re-reading, and
//! a failed verification never advances local state — the next sweep retries
//! the whole migration.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::exchange::{
    ExecutionGateway, GatewayError, InstrumentRules, InstrumentRulesCache, OrderState, Side,
    VenuePosition,
};
use crate::notify::Notifier;
use crate::strategy::{sizing, SizingError, TradeSignal};
use crate::utils::decimal::{floor_to_step, quantize_down, quantize_up, within_one_tick};

use super::state::{LifecycleState, PositionState};
use super::store::StateStore;

/// Tunables for the lifecycle state machine.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Settlement coin balances are quoted in.
    pub settlement_coin: String,
    pub leverage: u32,
    /// Fraction of balance allowed as position margin (0.20 = 20%).
    pub margin_limit: Decimal,
    /// Percentage of the filled size closed at the first target.
    pub staged_exit_percent: Decimal,
    /// Bounded wait for a market entry to appear on the venue.
    pub entry_confirm_attempts: u32,
    pub entry_confirm_delay: Duration,
    /// Pause between the combined protective update and its verification
    /// read, giving the venue time to surface the write.
    pub migration_settle_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            settlement_coin: "USDT".to_string(),
            leverage: 5,
            margin_limit: dec!(0.20),
            staged_exit_percent: dec!(50),
            entry_confirm_attempts: 5,
            entry_confirm_delay: Duration::from_secs(1),
            migration_settle_delay: Duration::from_secs(3),
        }
    }
}

/// Why `open()` did not create a position.
#[derive(Debug, Error)]
pub enum OpenError {
    /// A record or venue position already exists for the symbol.
    #[error("position already open or tracked for {0}")]
    DuplicatePosition(String),

    #[error(transparent)]
    Sizing(#[from] SizingError),

    /// The market order was accepted but no position appeared within the
    /// bounded wait. Nothing was persisted; operator attention may be needed
    /// if the entry later fills.
    #[error("market entry for {0} not confirmed on venue within bounded wait")]
    EntryNotConfirmed(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("state store failure: {0}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for OpenError {
    fn from(e: anyhow::Error) -> Self {
        OpenError::Store(e)
    }
}

/// Why `reconcile()` stopped early.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("state store failure: {0}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for ReconcileError {
    fn from(e: anyhow::Error) -> Self {
        ReconcileError::Store(e)
    }
}

/// What one reconcile pass over a symbol did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No record for the symbol; nothing to reconcile.
    Untracked,
    /// Venue reports the position closed; record deleted.
    PositionClosed,
    /// Record exists but its state needs no action this cycle.
    NoActionNeeded,
    /// Staged-exit order still working; waiting for its fill.
    AwaitingStagedFill,
    /// Staged-exit order cancelled on the venue (stop fired); record deleted.
    StagedOrderCancelled,
    /// Break-even migration completed and verified.
    MigratedToBreakeven,
    /// Migration performed but venue read-back mismatched; state unchanged,
    /// critical alert raised, next sweep retries.
    VerificationMismatch,
    /// Position vanished mid-migration; next sweep will observe the closed
    /// position and clean up.
    VanishedMidMigration,
}

pub struct TradeLifecycleController {
    gateway: Arc<dyn ExecutionGateway>,
    rules: InstrumentRulesCache,
    store: Arc<StateStore>,
    notifier: Notifier,
    config: LifecycleConfig,
    /// One mutex per symbol, spanning whole open()/reconcile() bodies.
    symbol_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Symbols whose leverage / position mode have been set this process.
    initialized_symbols: Mutex<HashSet<String>>,
}

impl TradeLifecycleController {
    pub fn new(
        gateway: Arc<dyn ExecutionGateway>,
        store: Arc<StateStore>,
        notifier: Notifier,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            rules: InstrumentRulesCache::new(gateway.clone()),
            gateway,
            store,
            notifier,
            config,
            symbol_locks: StdMutex::new(HashMap::new()),
            initialized_symbols: Mutex::new(HashSet::new()),
        }
    }

    fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.symbol_locks.lock().expect("symbol lock map poisoned");
        locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// One-time venue setup per symbol per process: position mode and
    /// leverage. Both are idempotent on the venue side.
    async fn ensure_symbol_initialized(&self, symbol: &str) -> Result<(), GatewayError> {
        let mut initialized = self.initialized_symbols.lock().await;
        if initialized.contains(symbol) {
            return Ok(());
        }
        self.gateway.switch_position_mode(symbol).await?;
        self.gateway
            .set_leverage(symbol, self.config.leverage)
            .await?;
        initialized.insert(symbol.to_string());
        Ok(())
    }

    /// Open a position from a signal.
    ///
    /// At-most-once state creation: the record is persisted only as the final
    /// step, after the market entry is confirmed present on the venue and the
    /// protective stop (plus the staged-exit order, when large enough) is
    /// placed. Any failure before that leaves no record behind.
    pub async fn open(
        &self,
        symbol: &str,
        signal: &TradeSignal,
        risk_percent: Decimal,
    ) -> Result<PositionState, OpenError> {
        let lock = self.symbol_lock(symbol);
        let _guard = lock.lock().await;

        // Idempotency guard: one position per symbol, whether we remember it
        // or only the venue does.
        if self.store.get(symbol)?.is_some() {
            return Err(OpenError::DuplicatePosition(symbol.to_string()));
        }
        if self.gateway.get_open_position(symbol).await?.is_some() {
            warn!(%symbol, "Venue reports an untracked open position; refusing to open");
            return Err(OpenError::DuplicatePosition(symbol.to_string()));
        }

        self.ensure_symbol_initialized(symbol).await?;
        let rules = self.rules.get(symbol).await?;
        let balance = self
            .gateway
            .get_balance(&self.config.settlement_coin)
            .await?;

        // Sizing failures abort before any remote mutation.
        let qty = sizing::size(
            balance,
            signal.entry_price,
            signal.stop_loss,
            risk_percent,
            self.config.leverage,
            self.config.margin_limit,
            &rules,
        )?;

        info!(
            %symbol,
            side = %signal.side,
            regime = %signal.regime,
            %qty,
            entry = %signal.entry_price,
            stop = %signal.stop_loss,
            "Submitting market entry"
        );
        self.gateway
            .place_market_order(symbol, signal.side, qty)
            .await?;

        let position = self.await_entry(symbol).await?;
        // The venue's average fill can carry more precision than the tick
        // grid; the stored entry is quantized toward the risk-safe side so a
        // later break-even stop at this price is always placeable.
        let entry_price = Self::quantize_stop(position.avg_price, signal.side, &rules);

        // Stop quantized toward the risk-safe side: down for a long, up for
        // a short, so the venue never rejects it as already breached.
        let stop = Self::quantize_stop(signal.stop_loss, signal.side, &rules);
        self.gateway
            .set_protective_levels(symbol, signal.side, Some(stop), None)
            .await?;

        let staged_qty = floor_to_step(
            position.size * self.config.staged_exit_percent / dec!(100),
            rules.qty_step,
        );

        let state = if staged_qty < rules.min_order_qty {
            warn!(
                %symbol,
                %staged_qty,
                min = %rules.min_order_qty,
                "Staged-exit quantity below venue minimum; full-exit plan"
            );
            LifecycleState::OpenFullExit
        } else {
            let target = Self::quantize_target(signal.take_profit_1, signal.side, &rules);
            let order_id = self
                .gateway
                .place_reduce_only_limit_order(symbol, signal.side.opposite(), staged_qty, target)
                .await?;
            info!(%symbol, %order_id, %staged_qty, %target, "Staged-exit order placed");
            LifecycleState::OpenStagedExit {
                staged_exit_order_id: order_id,
            }
        };

        let record = PositionState {
            symbol: symbol.to_string(),
            state,
            side: signal.side,
            entry_price,
            initial_qty: position.size,
            stop_loss_price: stop,
            secondary_take_profit: signal.take_profit_2,
            last_transition: Utc::now(),
        };
        self.store.upsert(&record)?;

        self.notifier.publish(format!(
            "Opened {} {} {} @ {} ({}), stop {}",
            record.side, record.initial_qty, symbol, entry_price, signal.regime, stop
        ));
        info!(%symbol, state = record.state.kind(), "Position opened and persisted");
        Ok(record)
    }

    /// Bounded wait for a freshly submitted entry to show up in position
    /// reads. The venue's writes are not immediately visible.
    async fn await_entry(&self, symbol: &str) -> Result<VenuePosition, OpenError> {
        for attempt in 1..=self.config.entry_confirm_attempts {
            tokio::time::sleep(self.config.entry_confirm_delay).await;
            if let Some(position) = self.gateway.get_open_position(symbol).await? {
                debug!(%symbol, attempt, "Entry confirmed on venue");
                return Ok(position);
            }
        }
        error!(
            %symbol,
            attempts = self.config.entry_confirm_attempts,
            "Market order submitted but position never appeared"
        );
        Err(OpenError::EntryNotConfirmed(symbol.to_string()))
    }

    fn quantize_stop(price: Decimal, side: Side, rules: &InstrumentRules) -> Decimal {
        match side {
            Side::Buy => quantize_down(price, rules.tick_size),
            Side::Sell => quantize_up(price, rules.tick_size),
        }
    }

    fn quantize_target(price: Decimal, side: Side, rules: &InstrumentRules) -> Decimal {
        match side {
            Side::Buy => quantize_up(price, rules.tick_size),
            Side::Sell => quantize_down(price, rules.tick_size),
        }
    }

    /// Reconcile one symbol's record against the venue.
    pub async fn reconcile(&self, symbol: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let lock = self.symbol_lock(symbol);
        let _guard = lock.lock().await;

        let Some(state) = self.store.get(symbol)? else {
            return Ok(ReconcileOutcome::Untracked);
        };

        // Closed by stop, target, or manual action: forget it.
        let Some(_position) = self.gateway.get_open_position(symbol).await? else {
            self.store.remove(symbol)?;
            info!(%symbol, "Position no longer on venue; record removed");
            self.notifier
                .publish(format!("Position {symbol} closed on venue; tracking removed"));
            return Ok(ReconcileOutcome::PositionClosed);
        };

        let order_id = match state.state.staged_exit_order_id() {
            Some(id) => id.to_string(),
            // Full-exit and break-even states have nothing to advance.
            None => return Ok(ReconcileOutcome::NoActionNeeded),
        };

        match self.gateway.get_order_status(symbol, &order_id).await? {
            OrderState::Open => {
                debug!(%symbol, %order_id, "Staged-exit order still working");
                Ok(ReconcileOutcome::AwaitingStagedFill)
            }
            OrderState::Unknown => {
                warn!(%symbol, %order_id, "Staged-exit order status unknown; will re-check next sweep");
                Ok(ReconcileOutcome::AwaitingStagedFill)
            }
            OrderState::Cancelled => {
                // The venue cancels the reduce-only order when the stop
                // closes the position; treat as a stop exit.
                info!(%symbol, %order_id, "Staged-exit order cancelled; treating as stop exit");
                self.store.remove(symbol)?;
                self.notifier
                    .publish(format!("Staged exit for {symbol} cancelled; position closed via stop"));
                Ok(ReconcileOutcome::StagedOrderCancelled)
            }
            OrderState::Filled => {
                info!(%symbol, %order_id, "Staged exit filled; migrating to break-even");
                self.migrate_to_breakeven(&state).await
            }
        }
    }

    /// Break-even migration, tolerant of partial completion across cycles.
    ///
    /// Cancel old protective orders, re-verify the position, issue one
    /// combined stop/target update, then verify the venue's read-back within
    /// one tick. On mismatch the state is left untouched so the next sweep
    /// re-runs the whole migration, and a critical operator alert fires every
    /// time — silent divergence between local and remote state is the worst
    /// failure mode in this domain.
    async fn migrate_to_breakeven(
        &self,
        state: &PositionState,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let symbol = state.symbol.as_str();
        let rules = self.rules.get(symbol).await?;

        self.gateway.cancel_protective_orders(symbol).await?;

        if self.gateway.get_open_position(symbol).await?.is_none() {
            warn!(%symbol, "Position vanished mid-migration; deferring to next sweep");
            return Ok(ReconcileOutcome::VanishedMidMigration);
        }

        let stop_target = Self::quantize_stop(state.entry_price, state.side, &rules);
        let profit_target =
            Self::quantize_target(state.secondary_take_profit, state.side, &rules);

        self.gateway
            .set_protective_levels(symbol, state.side, Some(stop_target), Some(profit_target))
            .await?;

        tokio::time::sleep(self.config.migration_settle_delay).await;

        let Some(position) = self.gateway.get_open_position(symbol).await? else {
            warn!(%symbol, "Position vanished during verification; deferring to next sweep");
            return Ok(ReconcileOutcome::VanishedMidMigration);
        };

        let stop_ok = position
            .stop_loss
            .is_some_and(|v| within_one_tick(v, stop_target, rules.tick_size));
        let target_ok = position
            .take_profit
            .is_some_and(|v| within_one_tick(v, profit_target, rules.tick_size));

        if stop_ok && target_ok {
            let advanced = PositionState {
                state: LifecycleState::BreakevenPending,
                stop_loss_price: stop_target,
                last_transition: Utc::now(),
                ..state.clone()
            };
            self.store.upsert(&advanced)?;
            info!(
                %symbol,
                stop = %stop_target,
                target = %profit_target,
                "Break-even migration verified"
            );
            self.notifier.publish(format!(
                "{symbol} moved to break-even: stop {stop_target}, target {profit_target}"
            ));
            Ok(ReconcileOutcome::MigratedToBreakeven)
        } else {
            error!(
                %symbol,
                stop_ok,
                target_ok,
                expected_stop = %stop_target,
                reported_stop = ?position.stop_loss,
                expected_target = %profit_target,
                reported_target = ?position.take_profit,
                "CRITICAL: protective level verification failed; will retry next sweep"
            );
            self.notifier.publish(format!(
                "CRITICAL: {symbol} break-even verification failed \
                 (stop ok: {stop_ok}, target ok: {target_ok}). \
                 Local and venue state diverge; manual check advised"
            ));
            Ok(ReconcileOutcome::VerificationMismatch)
        }
    }

    /// Reconcile every stored record. Failures are scoped to their symbol;
    /// the sweep always visits the rest, and a shutdown request drains within
    /// one symbol's worth of work.
    pub async fn reconcile_all(&self, shutdown: &AtomicBool) {
        let states = match self.store.all() {
            Ok(states) => states,
            Err(e) => {
                error!(error = %e, "Could not enumerate stored positions");
                return;
            }
        };
        if states.is_empty() {
            return;
        }

        debug!(tracked = states.len(), "Reconciliation sweep");
        for state in states {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested; reconciliation sweep stopping early");
                break;
            }
            match self.reconcile(&state.symbol).await {
                Ok(outcome) => {
                    debug!(symbol = %state.symbol, ?outcome, "Reconcile pass done")
                }
                Err(ReconcileError::Gateway(e)) if e.is_transient() => {
                    warn!(symbol = %state.symbol, error = %e, "Transient gateway failure; next sweep retries")
                }
                Err(e) => {
                    error!(symbol = %state.symbol, error = %e, "Reconcile pass failed")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockGateway;
    use crate::strategy::Regime;

    const SYMBOL: &str = "BTCUSDT";

    fn rules() -> InstrumentRules {
        InstrumentRules {
            tick_size: dec!(0.1),
            qty_step: dec!(0.001),
            min_order_qty: dec!(0.01),
        }
    }

    fn long_signal() -> TradeSignal {
        TradeSignal {
            side: Side::Buy,
            regime: Regime::Trend,
            entry_price: dec!(50000),
            stop_loss: dec!(49000.05),
            take_profit_1: dec!(51500.04),
            take_profit_2: dec!(53000),
        }
    }

    fn fast_config() -> LifecycleConfig {
        LifecycleConfig {
            entry_confirm_attempts: 3,
            entry_confirm_delay: Duration::from_millis(1),
            migration_settle_delay: Duration::from_millis(1),
            ..LifecycleConfig::default()
        }
    }

    struct Harness {
        gateway: Arc<MockGateway>,
        controller: TradeLifecycleController,
        store: Arc<StateStore>,
        notifications: tokio::sync::mpsc::Receiver<String>,
    }

    async fn harness() -> Harness {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_balance(dec!(10000)).await;
        gateway.set_mark_price(SYMBOL, dec!(50000)).await;
        gateway.set_rules(SYMBOL, rules()).await;

        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let (notifier, notifications) = Notifier::channel(32);
        let controller = TradeLifecycleController::new(
            gateway.clone(),
            store.clone(),
            notifier,
            fast_config(),
        );
        Harness {
            gateway,
            controller,
            store,
            notifications,
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    // ========================================================================
    // open()
    // ========================================================================

    #[tokio::test]
    async fn test_open_places_staged_exit_and_persists_last() {
        let mut h = harness().await;

        let record = h
            .controller
            .open(SYMBOL, &long_signal(), dec!(1))
            .await
            .unwrap();

        // risk qty = 10000*1% / (50000-49000.05) ≈ 0.10000.. -> floored
        assert!(record.initial_qty >= dec!(0.1));
        assert!(matches!(record.state, LifecycleState::OpenStagedExit { .. }));
        // Stop quantized down (long) to the tick grid.
        assert_eq!(record.stop_loss_price, dec!(49000.0));

        let calls = h.gateway.calls().await;
        assert_eq!(calls.market_orders, 1);
        assert_eq!(calls.reduce_only_orders, 1);
        assert_eq!(calls.protective_updates, 1);
        assert_eq!(calls.leverage_calls, 1);
        assert_eq!(calls.mode_switches, 1);

        let stored = h.store.get(SYMBOL).unwrap().unwrap();
        assert_eq!(stored.state, record.state);

        let messages = drain(&mut h.notifications);
        assert!(messages.iter().any(|m| m.contains("Opened")));
    }

    #[tokio::test]
    async fn test_open_skips_staging_below_minimum() {
        let mut h = harness().await;
        // Half of the sized quantity lands under the minimum order size.
        h.gateway
            .set_rules(
                SYMBOL,
                InstrumentRules {
                    tick_size: dec!(0.1),
                    qty_step: dec!(0.001),
                    min_order_qty: dec!(0.06),
                },
            )
            .await;

        let record = h
            .controller
            .open(SYMBOL, &long_signal(), dec!(1))
            .await
            .unwrap();

        assert_eq!(record.state, LifecycleState::OpenFullExit);
        assert_eq!(h.gateway.calls().await.reduce_only_orders, 0);
        drain(&mut h.notifications);
    }

    #[tokio::test]
    async fn test_open_rejects_duplicate_record() {
        let h = harness().await;
        h.controller
            .open(SYMBOL, &long_signal(), dec!(1))
            .await
            .unwrap();
        let mutations_after_first = h.gateway.calls().await.mutations();

        let second = h.controller.open(SYMBOL, &long_signal(), dec!(1)).await;
        assert!(matches!(second, Err(OpenError::DuplicatePosition(_))));
        assert_eq!(
            h.gateway.calls().await.mutations(),
            mutations_after_first,
            "duplicate open must not touch the venue"
        );
    }

    #[tokio::test]
    async fn test_open_rejects_untracked_venue_position() {
        let h = harness().await;
        h.gateway
            .install_position(VenuePosition {
                symbol: SYMBOL.to_string(),
                side: Side::Buy,
                size: dec!(1),
                avg_price: dec!(50000),
                stop_loss: None,
                take_profit: None,
            })
            .await;

        let result = h.controller.open(SYMBOL, &long_signal(), dec!(1)).await;
        assert!(matches!(result, Err(OpenError::DuplicatePosition(_))));
        assert_eq!(h.gateway.calls().await.mutations(), 0);
    }

    #[tokio::test]
    async fn test_open_sizing_failure_makes_no_remote_mutation() {
        let h = harness().await;
        let mut signal = long_signal();
        signal.stop_loss = signal.entry_price; // zero risk distance

        let result = h.controller.open(SYMBOL, &signal, dec!(1)).await;
        assert!(matches!(
            result,
            Err(OpenError::Sizing(SizingError::ZeroRiskDistance))
        ));
        assert_eq!(h.gateway.calls().await.mutations(), 0);
        assert!(h.store.get(SYMBOL).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_unconfirmed_entry_persists_nothing() {
        let h = harness().await;
        h.gateway.delay_entry_visibility(100).await;

        let result = h.controller.open(SYMBOL, &long_signal(), dec!(1)).await;
        assert!(matches!(result, Err(OpenError::EntryNotConfirmed(_))));
        assert!(h.store.get(SYMBOL).unwrap().is_none());
    }

    // ========================================================================
    // reconcile()
    // ========================================================================

    async fn open_staged(h: &Harness) -> (PositionState, String) {
        let record = h
            .controller
            .open(SYMBOL, &long_signal(), dec!(1))
            .await
            .unwrap();
        let order_id = record.state.staged_exit_order_id().unwrap().to_string();
        (record, order_id)
    }

    #[tokio::test]
    async fn test_reconcile_closed_position_deletes_once() {
        let mut h = harness().await;
        open_staged(&h).await;
        h.gateway.close_position(SYMBOL).await;

        let first = h.controller.reconcile(SYMBOL).await.unwrap();
        assert_eq!(first, ReconcileOutcome::PositionClosed);
        assert!(h.store.get(SYMBOL).unwrap().is_none());

        // Idempotent: the record is gone, the second pass is a no-op.
        let second = h.controller.reconcile(SYMBOL).await.unwrap();
        assert_eq!(second, ReconcileOutcome::Untracked);
        drain(&mut h.notifications);
    }

    #[tokio::test]
    async fn test_reconcile_waits_while_staged_order_open() {
        let h = harness().await;
        open_staged(&h).await;

        let before = h.gateway.calls().await.mutations();
        let outcome = h.controller.reconcile(SYMBOL).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::AwaitingStagedFill);
        assert_eq!(h.gateway.calls().await.mutations(), before);
    }

    #[tokio::test]
    async fn test_reconcile_cancelled_staged_order_removes_record() {
        let h = harness().await;
        let (_, order_id) = open_staged(&h).await;
        h.gateway
            .set_order_state(&order_id, OrderState::Cancelled)
            .await;

        let outcome = h.controller.reconcile(SYMBOL).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::StagedOrderCancelled);
        assert!(h.store.get(SYMBOL).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_migration_advances_to_breakeven_then_goes_quiet() {
        let mut h = harness().await;
        let (record, order_id) = open_staged(&h).await;
        h.gateway.set_order_state(&order_id, OrderState::Filled).await;

        let outcome = h.controller.reconcile(SYMBOL).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::MigratedToBreakeven);

        let stored = h.store.get(SYMBOL).unwrap().unwrap();
        assert_eq!(stored.state, LifecycleState::BreakevenPending);
        // Stop moved to entry, quantized down for a long.
        assert_eq!(stored.stop_loss_price, quantize_down(record.entry_price, dec!(0.1)));
        assert!(stored.state.rank() > record.state.rank(), "lifecycle moves forward");

        // Re-invoking reconcile afterwards performs no further venue mutation.
        let mutations = h.gateway.calls().await.mutations();
        let outcome = h.controller.reconcile(SYMBOL).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NoActionNeeded);
        assert_eq!(h.gateway.calls().await.mutations(), mutations);

        let messages = drain(&mut h.notifications);
        assert!(messages.iter().any(|m| m.contains("break-even")));
    }

    #[tokio::test]
    async fn test_migration_mismatch_alerts_and_retries_next_sweep() {
        let mut h = harness().await;
        let (_, order_id) = open_staged(&h).await;
        h.gateway.set_order_state(&order_id, OrderState::Filled).await;
        drain(&mut h.notifications);

        // Venue reads back a stop two ticks off the requested value.
        let entry = h.store.get(SYMBOL).unwrap().unwrap().entry_price;
        let skewed = quantize_down(entry, dec!(0.1)) - dec!(0.2);
        h.gateway
            .override_reported_protective(Some(skewed), Some(dec!(53000)))
            .await;

        let outcome = h.controller.reconcile(SYMBOL).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::VerificationMismatch);

        // State must not advance.
        let stored = h.store.get(SYMBOL).unwrap().unwrap();
        assert!(matches!(stored.state, LifecycleState::OpenStagedExit { .. }));

        // Critical alert every occurrence.
        let messages = drain(&mut h.notifications);
        assert!(messages.iter().any(|m| m.contains("CRITICAL")));

        // Next sweep retries the full migration; with the venue healthy again
        // it completes.
        h.gateway.clear_protective_override().await;
        let outcome = h.controller.reconcile(SYMBOL).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::MigratedToBreakeven);
        assert_eq!(
            h.store.get(SYMBOL).unwrap().unwrap().state,
            LifecycleState::BreakevenPending
        );
    }

    #[tokio::test]
    async fn test_one_tick_tolerance_is_exact() {
        let mut h = harness().await;
        let (record, order_id) = open_staged(&h).await;
        h.gateway.set_order_state(&order_id, OrderState::Filled).await;

        // One tick off: inside tolerance, migration verifies.
        let stop_target = quantize_down(record.entry_price, dec!(0.1));
        h.gateway
            .override_reported_protective(Some(stop_target - dec!(0.1)), Some(dec!(53000)))
            .await;

        let outcome = h.controller.reconcile(SYMBOL).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::MigratedToBreakeven);
        drain(&mut h.notifications);
    }

    #[tokio::test]
    async fn test_at_most_one_record_per_symbol() {
        let h = harness().await;
        open_staged(&h).await;

        for _ in 0..3 {
            let _ = h.controller.reconcile(SYMBOL).await;
        }
        let _ = h.controller.open(SYMBOL, &long_signal(), dec!(1)).await;

        assert_eq!(h.store.all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_all_respects_shutdown() {
        let h = harness().await;
        open_staged(&h).await;

        let shutdown = AtomicBool::new(true);
        let before = h.gateway.calls().await;
        h.controller.reconcile_all(&shutdown).await;
        // Flag already set: the sweep stops before touching any symbol.
        assert_eq!(h.gateway.calls().await, before);
    }
}
