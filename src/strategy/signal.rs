//! Hybrid trend/range signal engine.
//!
//! One evaluation per confirmed candle: compute the indicator snapshot over
//! the window, classify the market regime from trend strength, then apply
//! that regime's entry rules to the most recent candle only. At most one
//! signal per call.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange::{Candle, Side};

use super::indicators;

/// Market regime a signal was generated under. Regimes carry different risk
/// budgets and different exit geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Trend,
    Range,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Trend => write!(f, "TREND"),
            Regime::Range => write!(f, "RANGE"),
        }
    }
}

/// A fully specified entry decision. Produced fresh on each analysis, never
/// mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSignal {
    pub side: Side,
    pub regime: Regime,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit_1: Decimal,
    pub take_profit_2: Decimal,
}

/// Indicator lookback windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub channel_window: usize,
    pub ema_window: usize,
    pub atr_window: usize,
    pub bb_window: usize,
    pub bb_dev: f64,
    pub adx_window: usize,
    pub mfi_window: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            channel_window: 20,
            ema_window: 50,
            atr_window: 14,
            bb_window: 20,
            bb_dev: 2.0,
            adx_window: 14,
            mfi_window: 14,
        }
    }
}

impl SignalConfig {
    /// Candles needed before `evaluate` can produce a snapshot. The channel
    /// needs one extra bar for the previous candle's channel, ADX needs the
    /// double seed.
    pub fn required_candles(&self) -> usize {
        (self.channel_window + 2)
            .max(self.ema_window)
            .max(self.bb_window)
            .max(2 * self.adx_window + 1)
            .max(self.atr_window + 1)
            .max(self.mfi_window + 1)
    }
}

/// Everything the rule table looks at, computed causally over the window.
#[derive(Debug, Clone)]
struct IndicatorSnapshot {
    atr: f64,
    adx: f64,
    channel_upper: f64,
    channel_lower: f64,
    prev_channel_upper: f64,
    prev_channel_lower: f64,
    ema: f64,
    bb_upper: f64,
    bb_mid: f64,
    bb_lower: f64,
    mfi: f64,
    close: f64,
    prev_close: f64,
    high: f64,
    low: f64,
}

const TRENDING_ADX: f64 = 25.0;
const RANGING_ADX: f64 = 20.0;

pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Evaluate the window; `None` means no entry (including the
    /// insufficient-data case while the window fills).
    pub fn evaluate(&self, window: &[Candle]) -> Option<TradeSignal> {
        let snapshot = self.snapshot(window)?;
        // Entry price is the exact confirmed close, not a float round-trip.
        let entry_price = window.last()?.close;
        Self::classify(&snapshot, entry_price)
    }

    fn snapshot(&self, window: &[Candle]) -> Option<IndicatorSnapshot> {
        if window.len() < self.config.required_candles() {
            return None;
        }
        let n = window.len();
        let cfg = &self.config;

        let (channel_upper, channel_lower) =
            indicators::donchian_at(window, cfg.channel_window, n - 1)?;
        let (prev_channel_upper, prev_channel_lower) =
            indicators::donchian_at(window, cfg.channel_window, n - 2)?;
        let (bb_upper, bb_mid, bb_lower) =
            indicators::bollinger(window, cfg.bb_window, cfg.bb_dev)?;

        use rust_decimal::prelude::ToPrimitive;
        let last = &window[n - 1];
        let prev = &window[n - 2];

        Some(IndicatorSnapshot {
            atr: indicators::atr(window, cfg.atr_window)?,
            adx: indicators::adx(window, cfg.adx_window)?,
            channel_upper,
            channel_lower,
            prev_channel_upper,
            prev_channel_lower,
            ema: indicators::ema(window, cfg.ema_window)?,
            bb_upper,
            bb_mid,
            bb_lower,
            mfi: indicators::mfi(window, cfg.mfi_window)?,
            close: last.close.to_f64()?,
            prev_close: prev.close.to_f64()?,
            high: last.high.to_f64()?,
            low: last.low.to_f64()?,
        })
    }

    /// The regime rule table. Trend is checked first; the two ADX thresholds
    /// do not overlap, so the regimes are mutually exclusive by construction.
    fn classify(s: &IndicatorSnapshot, entry_price: Decimal) -> Option<TradeSignal> {
        if s.adx > TRENDING_ADX {
            let breakout_up =
                s.close > s.channel_upper && s.prev_close <= s.prev_channel_upper;
            let breakout_down =
                s.close < s.channel_lower && s.prev_close >= s.prev_channel_lower;

            if breakout_up && s.close > s.ema && s.mfi > 50.0 {
                return Self::build(
                    Side::Buy,
                    Regime::Trend,
                    entry_price,
                    s.channel_upper - 0.5 * s.atr,
                    s.close + 3.0 * s.atr,
                    s.close + 6.0 * s.atr,
                );
            }
            if breakout_down && s.close < s.ema && s.mfi < 50.0 {
                return Self::build(
                    Side::Sell,
                    Regime::Trend,
                    entry_price,
                    s.channel_lower + 0.5 * s.atr,
                    s.close - 3.0 * s.atr,
                    s.close - 6.0 * s.atr,
                );
            }
            return None;
        }

        if s.adx < RANGING_ADX {
            if s.low <= s.bb_lower && s.mfi < 20.0 {
                return Self::build(
                    Side::Buy,
                    Regime::Range,
                    entry_price,
                    s.close - 2.0 * s.atr,
                    s.bb_mid,
                    s.bb_mid,
                );
            }
            if s.high >= s.bb_upper && s.mfi > 80.0 {
                return Self::build(
                    Side::Sell,
                    Regime::Range,
                    entry_price,
                    s.close + 2.0 * s.atr,
                    s.bb_mid,
                    s.bb_mid,
                );
            }
        }

        None
    }

    fn build(
        side: Side,
        regime: Regime,
        entry_price: Decimal,
        stop_loss: f64,
        tp1: f64,
        tp2: f64,
    ) -> Option<TradeSignal> {
        Some(TradeSignal {
            side,
            regime,
            entry_price,
            stop_loss: Decimal::from_f64(stop_loss)?,
            take_profit_1: Decimal::from_f64(tp1)?,
            take_profit_2: Decimal::from_f64(tp2)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal_macros::dec;

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            atr: 2.0,
            adx: 30.0,
            channel_upper: 105.0,
            channel_lower: 95.0,
            prev_channel_upper: 105.0,
            prev_channel_lower: 95.0,
            ema: 100.0,
            bb_upper: 104.0,
            bb_mid: 100.0,
            bb_lower: 96.0,
            mfi: 60.0,
            close: 106.0,
            prev_close: 104.0,
            high: 106.5,
            low: 103.5,
        }
    }

    #[test]
    fn test_trend_long_breakout() {
        // ADX 30, close 106 above the 105 channel after a 104 close, above
        // the EMA, MFI 60: trend long with stop = channel_upper - 0.5 * ATR.
        let signal = SignalEngine::classify(&snapshot(), dec!(106)).unwrap();
        assert_eq!(signal.side, Side::Buy);
        assert_eq!(signal.regime, Regime::Trend);
        assert_eq!(signal.entry_price, dec!(106));
        assert_eq!(signal.stop_loss.to_f64().unwrap(), 104.0); // 105 - 1
        assert_eq!(signal.take_profit_1.to_f64().unwrap(), 112.0); // 106 + 6
        assert_eq!(signal.take_profit_2.to_f64().unwrap(), 118.0); // 106 + 12
    }

    #[test]
    fn test_trend_short_breakout() {
        let mut s = snapshot();
        s.close = 94.0;
        s.prev_close = 96.0;
        s.ema = 98.0;
        s.mfi = 40.0;

        let signal = SignalEngine::classify(&s, dec!(94)).unwrap();
        assert_eq!(signal.side, Side::Sell);
        assert_eq!(signal.regime, Regime::Trend);
        assert_eq!(signal.stop_loss.to_f64().unwrap(), 96.0); // 95 + 1
        assert_eq!(signal.take_profit_1.to_f64().unwrap(), 88.0);
        assert_eq!(signal.take_profit_2.to_f64().unwrap(), 82.0);
    }

    #[test]
    fn test_no_signal_without_prior_close_inside_channel() {
        // Close already above the channel on the previous bar: not a fresh
        // breakout, no entry.
        let mut s = snapshot();
        s.prev_close = 105.5;
        assert!(SignalEngine::classify(&s, dec!(106)).is_none());
    }

    #[test]
    fn test_no_signal_without_volume_confirmation() {
        let mut s = snapshot();
        s.mfi = 45.0;
        assert!(SignalEngine::classify(&s, dec!(106)).is_none());
    }

    #[test]
    fn test_range_long_at_lower_band() {
        let mut s = snapshot();
        s.adx = 15.0;
        s.close = 96.5;
        s.low = 95.5; // at/under bb_lower 96
        s.mfi = 12.0;

        let signal = SignalEngine::classify(&s, dec!(96.5)).unwrap();
        assert_eq!(signal.side, Side::Buy);
        assert_eq!(signal.regime, Regime::Range);
        assert_eq!(signal.stop_loss.to_f64().unwrap(), 92.5); // close - 2 * ATR
        // Both targets collapse to the band midpoint in the range regime.
        assert_eq!(signal.take_profit_1, signal.take_profit_2);
        assert_eq!(signal.take_profit_1.to_f64().unwrap(), 100.0);
    }

    #[test]
    fn test_range_short_at_upper_band() {
        let mut s = snapshot();
        s.adx = 15.0;
        s.close = 103.5;
        s.high = 104.5; // at/over bb_upper 104
        s.mfi = 85.0;

        let signal = SignalEngine::classify(&s, dec!(103.5)).unwrap();
        assert_eq!(signal.side, Side::Sell);
        assert_eq!(signal.regime, Regime::Range);
        assert_eq!(signal.stop_loss.to_f64().unwrap(), 107.5);
    }

    #[test]
    fn test_dead_zone_produces_nothing() {
        // ADX between the two thresholds: neither regime applies, even with
        // otherwise perfect breakout conditions.
        for adx in [20.0, 22.5, 25.0] {
            let mut s = snapshot();
            s.adx = adx;
            assert!(
                SignalEngine::classify(&s, dec!(106)).is_none(),
                "signal fired at ADX {adx}"
            );
        }
    }

    #[test]
    fn test_insufficient_window_is_none_not_error() {
        let engine = SignalEngine::new(SignalConfig::default());
        let candles: Vec<Candle> = (0..10)
            .map(|i| Candle {
                open_time: i * 60_000,
                open: dec!(100),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100),
                volume: dec!(1000),
            })
            .collect();
        assert!(engine.evaluate(&candles).is_none());
    }

    #[test]
    fn test_evaluate_is_causal() {
        // A signal computed over a prefix must be identical no matter what is
        // appended afterwards: evaluate only ever sees its window argument,
        // and every indicator reads backwards from the last candle.
        let engine = SignalEngine::new(SignalConfig {
            channel_window: 5,
            ema_window: 8,
            atr_window: 3,
            bb_window: 5,
            bb_dev: 2.0,
            adx_window: 3,
            mfi_window: 3,
        });

        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = rust_decimal::Decimal::from(100 + 2 * i);
                Candle {
                    open_time: i * 60_000,
                    open: base,
                    high: base + dec!(3),
                    low: base - dec!(1),
                    close: base + dec!(2),
                    volume: dec!(1000),
                }
            })
            .collect();

        let truncated: Vec<Candle> = candles[..20].to_vec();
        let from_prefix = engine.evaluate(&candles[..20]);
        let from_truncated_copy = engine.evaluate(&truncated);
        assert_eq!(from_prefix, from_truncated_copy);
    }

    #[test]
    fn test_required_candles_covers_all_windows() {
        let config = SignalConfig::default();
        // ADX double seed dominates nothing here; EMA(50) is the binding
        // constraint with the defaults.
        assert_eq!(config.required_candles(), 50);
    }
}
