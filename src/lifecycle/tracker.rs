//! Per-symbol rolling candle window.
//!
//! Feeds every newly confirmed candle straight into the signal engine,
//! suppressing duplicate or out-of-order delivery and rate-limiting emitted
//! signals with a cooldown. The cooldown clock resets whenever a signal is
//! emitted, regardless of what the caller does with it — a rejected `open()`
//! must not be followed by a signal storm on the next candles.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::exchange::Candle;
use crate::strategy::{SignalEngine, TradeSignal};

/// Extra candles kept beyond the longest indicator lookback.
const WINDOW_SAFETY_MARGIN: usize = 50;

pub struct CandleTracker {
    symbol: String,
    engine: Arc<SignalEngine>,
    window: VecDeque<Candle>,
    capacity: usize,
    cooldown: Duration,
    last_signal_at: Option<Instant>,
}

impl CandleTracker {
    pub fn new(symbol: impl Into<String>, engine: Arc<SignalEngine>, cooldown: Duration) -> Self {
        let capacity = engine.config().required_candles() + WINDOW_SAFETY_MARGIN;
        Self {
            symbol: symbol.into(),
            engine,
            window: VecDeque::with_capacity(capacity),
            capacity,
            cooldown,
            last_signal_at: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Seed the window from a bulk history fetch. Ordering and duplicate
    /// rules apply; no signals are evaluated while seeding.
    pub fn seed(&mut self, history: impl IntoIterator<Item = Candle>) {
        for candle in history {
            self.accept(candle);
        }
        info!(
            symbol = %self.symbol,
            candles = self.window.len(),
            "Candle window seeded from history"
        );
    }

    /// Ingest one confirmed candle and evaluate.
    ///
    /// Returns a signal when the engine fires and the cooldown has elapsed.
    /// Stale or duplicate candles are dropped without evaluation.
    pub fn on_candle(&mut self, candle: Candle) -> Option<TradeSignal> {
        if !self.accept(candle) {
            return None;
        }

        let window = self.window.make_contiguous();
        let signal = self.engine.evaluate(window)?;

        if !self.cooldown_elapsed() {
            debug!(symbol = %self.symbol, "Signal suppressed by cooldown");
            return None;
        }

        // Arm the cooldown at emission, not on open() success: a rejected
        // attempt must not re-fire on every following candle.
        self.last_signal_at = Some(Instant::now());
        info!(
            symbol = %self.symbol,
            side = %signal.side,
            regime = %signal.regime,
            entry = %signal.entry_price,
            "Signal emitted"
        );
        Some(signal)
    }

    fn cooldown_elapsed(&self) -> bool {
        match self.last_signal_at {
            Some(last) => last.elapsed() >= self.cooldown,
            None => true,
        }
    }

    /// Append the candle if it is strictly newer than the last accepted one,
    /// evicting the oldest on overflow.
    fn accept(&mut self, candle: Candle) -> bool {
        if let Some(last) = self.window.back() {
            if candle.open_time <= last.open_time {
                debug!(
                    symbol = %self.symbol,
                    open_time = candle.open_time,
                    last_open_time = last.open_time,
                    "Dropping stale or duplicate candle"
                );
                return false;
            }
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(candle);
        true
    }
}
