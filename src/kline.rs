//! C1 — indicator kernel. Pure functions over `&[Kline]`; no I/O.
//!
//! Built on the incremental primitives in `indicators.rs` (`Ema`, `Sma`,
//! `RollingStd`, `Rsi`, `Atr`) driven across a window and read at the tail,
//! matching the spec's "last-10-window series equals single-value at its
//! tail" contract for ATR.

use crate::indicators::{Atr, BollingerBands, Ema, Macd, Rsi, Sma};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    pub open_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: u64,
}

impl Kline {
    pub fn new(open_time: u64, open: f64, high: f64, low: f64, close: f64, volume: f64, close_time: u64) -> Self {
        Self { open_time, open, high, low, close, volume, close_time }
    }
}

/// EMA over the whole window; 0.0 if shorter than `period`.
pub fn ema(klines: &[Kline], period: usize) -> f64 {
    if klines.len() < period {
        return 0.0;
    }
    let mut e = Ema::new(period);
    let mut v = 0.0;
    for k in klines {
        v = e.update(k.close);
    }
    v
}

/// Wilder-smoothed RSI; 0.0 if shorter than `period`.
pub fn rsi(klines: &[Kline], period: usize) -> f64 {
    if klines.len() < period {
        return 0.0;
    }
    let mut r = Rsi::new(period);
    let mut v = 50.0;
    for k in klines {
        v = r.update(k.close);
    }
    v
}

/// MACD = EMA(12) - EMA(26); 0.0 if shorter than 26 bars.
pub fn macd(klines: &[Kline]) -> f64 {
    if klines.len() < 26 {
        return 0.0;
    }
    let mut m = Macd::default_12_26_9();
    for k in klines {
        m.update(k.close);
    }
    m.macd_line
}

/// Wilder ATR over the whole window; 0.0 if shorter than `period`.
pub fn atr(klines: &[Kline], period: usize) -> f64 {
    if klines.len() < period {
        return 0.0;
    }
    let mut a = Atr::new(period);
    let mut v = 0.0;
    for k in klines {
        v = a.update(k.high, k.low, k.close);
    }
    v
}

/// Last-10 ATR series; last element equals `atr(klines, period)` within 1e-4.
pub fn atr_series(klines: &[Kline], period: usize) -> Vec<f64> {
    if klines.len() < period {
        return Vec::new();
    }
    let mut a = Atr::new(period);
    let mut series = Vec::with_capacity(klines.len());
    for k in klines {
        series.push(a.update(k.high, k.low, k.close));
    }
    let start = series.len().saturating_sub(10);
    series[start..].to_vec()
}

/// Kaufman Efficiency Ratio: `|close[n]-close[n-p]| / sum|delta close|`.
/// NaN if fewer than `p+1` points; 0 if the denominator is 0; clamped to <= 1.
pub fn efficiency_ratio(klines: &[Kline], period: usize) -> f64 {
    if klines.len() < period + 1 {
        return f64::NAN;
    }
    let n = klines.len() - 1;
    let window = &klines[n - period..=n];
    let direction = (window.last().unwrap().close - window.first().unwrap().close).abs();
    let volatility: f64 = window.windows(2).map(|w| (w[1].close - w[0].close).abs()).sum();
    if volatility == 0.0 {
        return 0.0;
    }
    (direction / volatility).min(1.0)
}

/// Returns `(percent_b, bandwidth)`. Degenerate (zero band) returns `(0.5, 0.0)`.
/// NaN,NaN if shorter than `period`.
pub fn bollinger(klines: &[Kline], period: usize, sigma: f64) -> (f64, f64) {
    if klines.len() < period {
        return (f64::NAN, f64::NAN);
    }
    let mut bb = BollingerBands::new(period, sigma);
    let mut last_close = 0.0;
    for k in klines {
        bb.update(k.close);
        last_close = k.close;
    }
    (bb.percent_b(last_close), bb.bandwidth())
}

/// ChanLun-style MACD: DIF = EMA(fast)-EMA(slow); DEA = SMA(signal) over the
/// DIF series (not EMA, unlike classic MACD). Returns `(dif, dea, hist, cross_type)`
/// where `cross_type` is 0 = no cross, 1 = bullish cross, 2 = bearish cross
/// on the final bar.
pub fn chanlun_macd(klines: &[Kline], fast: usize, slow: usize, signal: usize) -> (f64, f64, f64, u8) {
    if klines.len() < slow + signal {
        return (0.0, 0.0, 0.0, 0);
    }
    let mut fast_ema = Ema::new(fast);
    let mut slow_ema = Ema::new(slow);
    let mut dif_series = Vec::with_capacity(klines.len());
    for k in klines {
        let f = fast_ema.update(k.close);
        let s = slow_ema.update(k.close);
        dif_series.push(f - s);
    }

    let mut dea_sma = Sma::new(signal);
    let mut dea_series = Vec::with_capacity(dif_series.len());
    for d in &dif_series {
        dea_series.push(dea_sma.update(*d));
    }

    let n = dif_series.len();
    let dif = dif_series[n - 1];
    let dea = dea_series[n - 1];
    let hist = dif - dea;

    let cross_type = if n >= 2 {
        let prev_hist = dif_series[n - 2] - dea_series[n - 2];
        if prev_hist <= 0.0 && hist > 0.0 {
            1
        } else if prev_hist >= 0.0 && hist < 0.0 {
            2
        } else {
            0
        }
    } else {
        0
    };

    (dif, dea, hist, cross_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_klines(closes: &[f64]) -> Vec<Kline> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Kline::new(i as u64 * 60_000, c, c + 1.0, c - 1.0, c, 100.0, i as u64 * 60_000 + 59_999))
            .collect()
    }

    #[test]
    fn atr_series_tail_matches_scalar_atr() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let klines = make_klines(&closes);
        let series = atr_series(&klines, 14);
        let scalar = atr(&klines, 14);
        assert!((series.last().unwrap() - scalar).abs() < 1e-4);
    }

    #[test]
    fn rsi_extreme_on_monotone_increasing() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let klines = make_klines(&closes);
        assert!(rsi(&klines, 14) > 90.0);
    }

    #[test]
    fn rsi_extreme_on_monotone_decreasing() {
        let closes: Vec<f64> = (0..50).map(|i| 200.0 - i as f64).collect();
        let klines = make_klines(&closes);
        assert!(rsi(&klines, 14) < 10.0);
    }

    #[test]
    fn constant_series_macd_zero_ema_equals_close_bollinger_degenerate() {
        let closes = vec![100.0; 40];
        let klines = make_klines(&closes);
        assert_eq!(macd(&klines), 0.0);
        assert!((ema(&klines, 20) - 100.0).abs() < 1e-9);
        let (pb, bw) = bollinger(&klines, 20, 2.0);
        assert_eq!(bw, 0.0);
        assert_eq!(pb, 0.5);
    }

    #[test]
    fn efficiency_ratio_perfect_trend_is_one() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let klines = make_klines(&closes);
        assert!((efficiency_ratio(&klines, 10) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn efficiency_ratio_oscillation_approaches_zero() {
        let closes: Vec<f64> = (0..11).map(|i| if i % 2 == 0 { 0.0 } else { 1.0 }).collect();
        let klines = make_klines(&closes);
        let er = efficiency_ratio(&klines, 10);
        assert!(er < 0.2, "expected near-zero ER for oscillation, got {er}");
    }

    #[test]
    fn efficiency_ratio_insufficient_data_is_nan() {
        let klines = make_klines(&[100.0, 101.0]);
        assert!(efficiency_ratio(&klines, 10).is_nan());
    }

    #[test]
    fn chanlun_dea_uses_sma_not_ema() {
        let closes: Vec<f64> = (0..150).map(|i| 100.0 + (i as f64 * 0.37).sin() * 5.0 + i as f64 * 0.1).collect();
        let klines = make_klines(&closes);
        let (dif, dea, hist, _cross) = chanlun_macd(&klines, 34, 89, 13);
        assert!((hist - (dif - dea)).abs() < 1e-9);
    }

    #[test]
    fn short_window_returns_zeros_not_panic() {
        let klines = make_klines(&[100.0, 101.0, 99.0]);
        assert_eq!(ema(&klines, 20), 0.0);
        assert_eq!(rsi(&klines, 14), 0.0);
        assert_eq!(macd(&klines), 0.0);
        assert_eq!(atr(&klines, 14), 0.0);
        assert!(atr_series(&klines, 14).is_empty());
    }
}
