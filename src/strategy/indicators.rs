//! Technical indicators over candle windows.
//!
//! All functions are causal: the value at the last candle is computed from
//! that candle and earlier ones only, so appending future candles can never
//! change an already-computed value. Each returns `None` on insufficient data
//! (not an error — the window simply has not filled yet).
//!
//! Indicator math runs in `f64`; exact decimal arithmetic only matters once a
//! price is about to be sent to the venue.

use rust_decimal::prelude::ToPrimitive;

use crate::exchange::Candle;

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .map(|c| c.close.to_f64().unwrap_or_default())
        .collect()
}

fn true_range(current: &Candle, previous: &Candle) -> f64 {
    let high = current.high.to_f64().unwrap_or_default();
    let low = current.low.to_f64().unwrap_or_default();
    let prev_close = previous.close.to_f64().unwrap_or_default();
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

/// Wilder's smoothing: seed with the simple average of the first `period`
/// values, then fold the remainder with `(prev * (n-1) + value) / n`.
fn wilder_smooth(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }
    let mut smoothed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    for value in &values[period..] {
        smoothed = (smoothed * (period as f64 - 1.0) + value) / period as f64;
    }
    Some(smoothed)
}

/// Average True Range (Wilder).
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period + 1 {
        return None;
    }
    let trs: Vec<f64> = candles
        .windows(2)
        .map(|pair| true_range(&pair[1], &pair[0]))
        .collect();
    wilder_smooth(&trs, period)
}

/// Average Directional Index: trend strength on a 0-100 scale.
///
/// Full Wilder construction: smoothed TR / +DM / -DM give the directional
/// indicators, their normalized spread gives DX per bar, and ADX is the
/// Wilder-smoothed DX. Needs `2 * period + 1` candles for the double
/// smoothing to seed.
pub fn adx(candles: &[Candle], period: usize) -> Option<f64> {
    let n = candles.len();
    if period == 0 || n < 2 * period + 1 {
        return None;
    }

    let mut trs = Vec::with_capacity(n - 1);
    let mut plus_dms = Vec::with_capacity(n - 1);
    let mut minus_dms = Vec::with_capacity(n - 1);

    for pair in candles.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        trs.push(true_range(cur, prev));

        let up_move =
            cur.high.to_f64().unwrap_or_default() - prev.high.to_f64().unwrap_or_default();
        let down_move =
            prev.low.to_f64().unwrap_or_default() - cur.low.to_f64().unwrap_or_default();
        plus_dms.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dms.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    // Step the three smoothed series forward together, collecting a DX value
    // per bar once the seed period is past.
    let p = period as f64;
    let mut smoothed_tr: f64 = trs[..period].iter().sum::<f64>() / p;
    let mut smoothed_plus: f64 = plus_dms[..period].iter().sum::<f64>() / p;
    let mut smoothed_minus: f64 = minus_dms[..period].iter().sum::<f64>() / p;

    let dx_of = |tr: f64, plus: f64, minus: f64| -> f64 {
        if tr <= 0.0 {
            return 0.0;
        }
        let plus_di = plus / tr * 100.0;
        let minus_di = minus / tr * 100.0;
        let di_sum = plus_di + minus_di;
        if di_sum <= 0.0 {
            0.0
        } else {
            (plus_di - minus_di).abs() / di_sum * 100.0
        }
    };

    let mut dxs = vec![dx_of(smoothed_tr, smoothed_plus, smoothed_minus)];
    for i in period..trs.len() {
        smoothed_tr = (smoothed_tr * (p - 1.0) + trs[i]) / p;
        smoothed_plus = (smoothed_plus * (p - 1.0) + plus_dms[i]) / p;
        smoothed_minus = (smoothed_minus * (p - 1.0) + minus_dms[i]) / p;
        dxs.push(dx_of(smoothed_tr, smoothed_plus, smoothed_minus));
    }

    wilder_smooth(&dxs, period)
}

/// Exponential moving average of closes, seeded with the SMA of the first
/// `period` closes.
pub fn ema(candles: &[Candle], period: usize) -> Option<f64> {
    let series = closes(candles);
    if series.len() < period || period == 0 {
        return None;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value: f64 = series[..period].iter().sum::<f64>() / period as f64;
    for close in &series[period..] {
        value = alpha * close + (1.0 - alpha) * value;
    }
    Some(value)
}

/// Donchian channel over the `window` candles ending at `end` (exclusive).
///
/// Passing `end = candles.len() - 1` yields the channel a closing price can
/// actually break: the current candle is excluded, because a channel that
/// already contains the current high can never be strictly exceeded by the
/// close.
pub fn donchian_at(candles: &[Candle], window: usize, end: usize) -> Option<(f64, f64)> {
    if window == 0 || end > candles.len() || end < window {
        return None;
    }
    let slice = &candles[end - window..end];
    let upper = slice
        .iter()
        .map(|c| c.high.to_f64().unwrap_or_default())
        .fold(f64::MIN, f64::max);
    let lower = slice
        .iter()
        .map(|c| c.low.to_f64().unwrap_or_default())
        .fold(f64::MAX, f64::min);
    Some((upper, lower))
}

/// Bollinger bands over the last `window` closes: (upper, mid, lower).
pub fn bollinger(candles: &[Candle], window: usize, num_dev: f64) -> Option<(f64, f64, f64)> {
    let series = closes(candles);
    if series.len() < window || window == 0 {
        return None;
    }
    let slice = &series[series.len() - window..];
    let mean = slice.iter().sum::<f64>() / window as f64;
    let variance = slice.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / window as f64;
    let dev = variance.sqrt() * num_dev;
    Some((mean + dev, mean, mean - dev))
}

/// Money Flow Index: volume-weighted RSI analogue on a 0-100 scale.
pub fn mfi(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let typical: Vec<f64> = candles
        .iter()
        .map(|c| {
            (c.high.to_f64().unwrap_or_default()
                + c.low.to_f64().unwrap_or_default()
                + c.close.to_f64().unwrap_or_default())
                / 3.0
        })
        .collect();

    let mut positive = 0.0;
    let mut negative = 0.0;
    let start = candles.len() - period;
    for i in start..candles.len() {
        let flow = typical[i] * candles[i].volume.to_f64().unwrap_or_default();
        if typical[i] > typical[i - 1] {
            positive += flow;
        } else if typical[i] < typical[i - 1] {
            negative += flow;
        }
    }

    if positive + negative <= 0.0 {
        return Some(50.0);
    }
    if negative == 0.0 {
        return Some(100.0);
    }
    Some(100.0 - 100.0 / (1.0 + positive / negative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        let d = |x: f64| Decimal::from_f64(x).unwrap();
        Candle {
            open_time: i * 60_000,
            open: d(open),
            high: d(high),
            low: d(low),
            close: d(close),
            volume: d(volume),
        }
    }

    fn trending_up(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + 3.0 * i as f64;
                candle(i as i64, base, base + 2.0, base - 1.0, base + 1.5, 1000.0)
            })
            .collect()
    }

    fn choppy(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let wiggle = if i % 2 == 0 { 1.0 } else { -1.0 };
                candle(
                    i as i64,
                    100.0,
                    102.0 + wiggle,
                    98.0 - wiggle,
                    100.0 + wiggle,
                    1000.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_atr_positive_and_stable_on_uniform_ranges() {
        // Every candle spans high-low = 3 and gaps 3 from the prior close,
        // so TR = high - prev_close = 3.5 each bar after the first.
        let candles = trending_up(30);
        let value = atr(&candles, 14).unwrap();
        assert!(value > 0.0);
        assert!((value - 3.5).abs() < 0.5, "ATR was {value}");
    }

    #[test]
    fn test_atr_insufficient_data() {
        assert!(atr(&trending_up(10), 14).is_none());
    }

    #[test]
    fn test_adx_high_in_trend_low_in_chop() {
        let trend_adx = adx(&trending_up(60), 14).unwrap();
        let chop_adx = adx(&choppy(60), 14).unwrap();
        assert!(trend_adx > 25.0, "trend ADX was {trend_adx}");
        assert!(chop_adx < 20.0, "chop ADX was {chop_adx}");
    }

    #[test]
    fn test_adx_needs_double_period() {
        assert!(adx(&trending_up(28), 14).is_none());
        assert!(adx(&trending_up(29), 14).is_some());
    }

    #[test]
    fn test_ema_tracks_below_rising_closes() {
        let candles = trending_up(60);
        let value = ema(&candles, 20).unwrap();
        let last_close = candles.last().unwrap().close.to_f64().unwrap();
        assert!(value < last_close);
        assert!(value > last_close - 60.0);
    }

    #[test]
    fn test_donchian_excludes_current_candle() {
        // Last candle spikes to a new high; the channel ending before it must
        // not contain that spike.
        let mut candles = trending_up(25);
        let n = candles.len();
        candles[n - 1] = candle(n as i64 - 1, 200.0, 500.0, 199.0, 480.0, 1000.0);

        let (upper, _) = donchian_at(&candles, 20, n - 1).unwrap();
        assert!(upper < 480.0);
        let (upper_incl, _) = donchian_at(&candles, 20, n).unwrap();
        assert_eq!(upper_incl, 500.0);
    }

    #[test]
    fn test_bollinger_bands_bracket_mean() {
        let (upper, mid, lower) = bollinger(&choppy(30), 20, 2.0).unwrap();
        assert!(lower < mid && mid < upper);
        assert!((mid - 100.0).abs() < 1.5);
    }

    #[test]
    fn test_mfi_extremes() {
        // All typical prices rising: every flow is positive.
        let up = trending_up(20);
        assert_eq!(mfi(&up, 14).unwrap(), 100.0);

        // All falling: every flow is negative.
        let down: Vec<Candle> = (0..20)
            .map(|i| {
                let base = 200.0 - 3.0 * i as f64;
                candle(i as i64, base, base + 1.0, base - 2.0, base - 1.5, 1000.0)
            })
            .collect();
        assert_eq!(mfi(&down, 14).unwrap(), 0.0);
    }

    #[test]
    fn test_mfi_bounded() {
        let value = mfi(&choppy(30), 14).unwrap();
        assert!((0.0..=100.0).contains(&value));
    }
}
