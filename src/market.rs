//! C2 — market snapshot builder. Assembles a multi-timeframe `MarketData`
//! from per-timeframe kline windows, applying the staleness check and the
//! scalar/series computations of §4.2.

use crate::kline::{atr, atr_series, bollinger, ema, efficiency_ratio, macd, rsi, Kline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendBias {
    Bullish,
    Bearish,
    Neutral,
}

/// Last-10-points series for one timeframe.
#[derive(Debug, Clone, Default)]
pub struct Series {
    pub mid_price: Vec<f64>,
    pub ema20: Vec<f64>,
    pub macd: Vec<f64>,
    pub rsi7: Vec<f64>,
    pub rsi14: Vec<f64>,
    pub volume: Vec<f64>,
    pub atr14: f64,
    pub er10: f64,
    pub bollinger_percent_b: f64,
    pub bollinger_bandwidth: f64,
}

fn last_n(values: &[f64], n: usize) -> Vec<f64> {
    let start = values.len().saturating_sub(n);
    values[start..].to_vec()
}

fn rolling(klines: &[Kline], f: impl Fn(&[Kline]) -> f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(klines.len());
    for i in 0..klines.len() {
        out.push(f(&klines[..=i]));
    }
    last_n(&out, 10)
}

fn build_series(klines: &[Kline]) -> Series {
    Series {
        mid_price: last_n(&klines.iter().map(|k| (k.high + k.low) / 2.0).collect::<Vec<_>>(), 10),
        ema20: rolling(klines, |w| ema(w, 20)),
        macd: rolling(klines, macd),
        rsi7: rolling(klines, |w| rsi(w, 7)),
        rsi14: rolling(klines, |w| rsi(w, 14)),
        volume: last_n(&klines.iter().map(|k| k.volume).collect::<Vec<_>>(), 10),
        atr14: atr(klines, 14),
        er10: efficiency_ratio(klines, 10),
        bollinger_percent_b: bollinger(klines, 20, 2.0).0,
        bollinger_bandwidth: bollinger(klines, 20, 2.0).1,
    }
}

#[derive(Debug, Clone, Default)]
pub struct LongTermContext {
    pub ema20: f64,
    pub ema50: f64,
    pub atr3: f64,
    pub atr14: f64,
    pub volume: f64,
    pub avg_volume: f64,
    pub macd_last10: Vec<f64>,
    pub rsi14_last10: Vec<f64>,
    pub ohlc_7d: Vec<Kline>,
    pub trend_bias: Option<TrendBias>,
}

#[derive(Debug, Clone)]
pub struct MarketData {
    pub symbol: String,
    pub current_price: f64,
    pub price_change_1h: f64,
    pub price_change_4h: f64,
    pub price_change_24h: f64,
    pub current_ema20: f64,
    pub current_macd: f64,
    pub current_rsi7: f64,
    pub funding_rate: f64,
    pub series_5m: Series,
    pub series_15m: Series,
    pub series_1h: Series,
    pub context_4h: LongTermContext,
    pub context_1d: LongTermContext,
}

#[derive(Debug, Clone)]
pub struct StaleDataError {
    pub symbol: String,
}

impl std::fmt::Display for StaleDataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stale_data: {}", self.symbol)
    }
}
impl std::error::Error for StaleDataError {}

/// Per-symbol, per-timeframe kline windows supplied by the caller (live venue
/// fetch or backtest feed); the builder itself performs no I/O.
pub struct TimeframeWindows<'a> {
    pub m5: &'a [Kline],
    pub m15: &'a [Kline],
    pub h1: &'a [Kline],
    pub h4: &'a [Kline],
    pub d1: &'a [Kline],
}

fn is_stale(m5: &[Kline]) -> bool {
    if m5.len() < 2 {
        return true;
    }
    let last = m5[m5.len() - 1];
    let prev = m5[m5.len() - 2];
    if prev.close == 0.0 {
        return false;
    }
    let flat = (last.close - prev.close).abs() / prev.close <= 1e-4;
    flat && last.volume == 0.0 && prev.volume == 0.0
}

fn pct_change(curr: f64, past: f64) -> f64 {
    if past == 0.0 {
        0.0
    } else {
        (curr - past) / past * 100.0
    }
}

fn build_long_term(klines: &[Kline]) -> LongTermContext {
    if klines.is_empty() {
        return LongTermContext::default();
    }
    let volume = klines.last().unwrap().volume;
    let avg_volume = klines.iter().map(|k| k.volume).sum::<f64>() / klines.len() as f64;
    let last_close = klines.last().unwrap().close;
    let ema20 = ema(klines, 20);
    let trend_bias = if klines.len() >= 20 {
        Some(if last_close > ema20 {
            TrendBias::Bullish
        } else if last_close < ema20 {
            TrendBias::Bearish
        } else {
            TrendBias::Neutral
        })
    } else {
        None
    };
    LongTermContext {
        ema20,
        ema50: ema(klines, 50),
        atr3: atr(klines, 3),
        atr14: atr(klines, 14),
        volume,
        avg_volume,
        macd_last10: rolling(klines, macd),
        rsi14_last10: rolling(klines, |w| rsi(w, 14)),
        ohlc_7d: last_n_klines(klines, 7),
        trend_bias,
    }
}

fn last_n_klines(klines: &[Kline], n: usize) -> Vec<Kline> {
    let start = klines.len().saturating_sub(n);
    klines[start..].to_vec()
}

/// Builds a `MarketData` snapshot for one symbol, or `Err(StaleDataError)` if
/// the 5m feed looks frozen (§4.2 step 2).
pub fn build_market_data(
    symbol: &str,
    windows: &TimeframeWindows,
    funding_rate: f64,
) -> Result<MarketData, StaleDataError> {
    if is_stale(windows.m5) {
        return Err(StaleDataError { symbol: symbol.to_string() });
    }

    let m5 = windows.m5;
    let current_price = m5.last().map(|k| k.close).unwrap_or(0.0);

    let price_change_1h = {
        let idx = m5.len().saturating_sub(13);
        pct_change(current_price, m5.get(idx).map(|k| k.close).unwrap_or(current_price))
    };
    let price_change_4h = {
        let idx = windows.h4.len().saturating_sub(2);
        pct_change(current_price, windows.h4.get(idx).map(|k| k.close).unwrap_or(current_price))
    };
    let price_change_24h = {
        let idx = windows.d1.len().saturating_sub(2);
        pct_change(current_price, windows.d1.get(idx).map(|k| k.close).unwrap_or(current_price))
    };

    Ok(MarketData {
        symbol: symbol.to_string(),
        current_price,
        price_change_1h,
        price_change_4h,
        price_change_24h,
        current_ema20: ema(m5, 20),
        current_macd: macd(m5),
        current_rsi7: rsi(m5, 7),
        funding_rate,
        series_5m: build_series(m5),
        series_15m: build_series(windows.m15),
        series_1h: build_series(windows.h1),
        context_4h: build_long_term(windows.h4),
        context_1d: build_long_term(windows.d1),
    })
}

/// Process-wide funding-rate cache with a 1h TTL, keyed by symbol (§5).
#[derive(Default)]
pub struct FundingCache {
    entries: std::sync::Mutex<std::collections::HashMap<String, (u64, f64)>>,
}

impl FundingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached rate if fetched within the last hour, else `None`.
    pub fn get(&self, symbol: &str, now_ts: u64) -> Option<f64> {
        let entries = self.entries.lock().unwrap();
        entries.get(symbol).and_then(|(fetched_at, rate)| {
            if now_ts.saturating_sub(*fetched_at) <= 3600 {
                Some(*rate)
            } else {
                None
            }
        })
    }

    pub fn put(&self, symbol: &str, now_ts: u64, rate: f64) {
        self.entries.lock().unwrap().insert(symbol.to_string(), (now_ts, rate));
    }
}

/// Owned multi-timeframe klines for one symbol, as fetched by a `KlineSource`.
/// `windows()` borrows into this so `build_market_data` can run unchanged.
#[derive(Debug, Clone, Default)]
pub struct SymbolKlines {
    pub m5: Vec<Kline>,
    pub m15: Vec<Kline>,
    pub h1: Vec<Kline>,
    pub h4: Vec<Kline>,
    pub d1: Vec<Kline>,
}

impl SymbolKlines {
    pub fn windows(&self) -> TimeframeWindows<'_> {
        TimeframeWindows { m5: &self.m5, m15: &self.m15, h1: &self.h1, h4: &self.h4, d1: &self.d1 }
    }
}

/// Fetches the per-timeframe kline history the scheduler needs to build a
/// `MarketData` snapshot (§4.2), generalised from the donor's single-candle
/// `Exchange::fetch_latest_candle` into a multi-timeframe pull.
#[async_trait::async_trait]
pub trait KlineSource: Send + Sync {
    async fn fetch(&self, symbol: &str) -> anyhow::Result<SymbolKlines>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_klines(n: usize, close: f64, volume: f64) -> Vec<Kline> {
        (0..n)
            .map(|i| Kline::new(i as u64 * 300_000, close, close + 0.1, close - 0.1, close, volume, i as u64 * 300_000 + 299_999))
            .collect()
    }

    fn trending_klines(n: usize, start: f64) -> Vec<Kline> {
        (0..n)
            .map(|i| {
                let c = start + i as f64;
                Kline::new(i as u64 * 300_000, c, c + 1.0, c - 1.0, c, 100.0, i as u64 * 300_000 + 299_999)
            })
            .collect()
    }

    #[test]
    fn stale_flat_zero_volume_fails_symbol() {
        let m5 = flat_klines(70, 100.0, 0.0);
        let other = trending_klines(70, 100.0);
        let windows = TimeframeWindows { m5: &m5, m15: &other, h1: &other, h4: &other, d1: &other };
        let result = build_market_data("BTCUSDT", &windows, 0.0001);
        assert!(result.is_err());
    }

    #[test]
    fn active_market_builds_snapshot() {
        let m5 = trending_klines(70, 100.0);
        let windows = TimeframeWindows { m5: &m5, m15: &m5, h1: &m5, h4: &m5, d1: &m5 };
        let data = build_market_data("BTCUSDT", &windows, 0.0001).unwrap();
        assert_eq!(data.symbol, "BTCUSDT");
        assert!(data.current_price > 0.0);
        assert_eq!(data.series_5m.mid_price.len(), 10);
    }

    #[test]
    fn funding_cache_respects_one_hour_ttl() {
        let cache = FundingCache::new();
        cache.put("BTCUSDT", 1_000, 0.0001);
        assert_eq!(cache.get("BTCUSDT", 1_000 + 3600), Some(0.0001));
        assert_eq!(cache.get("BTCUSDT", 1_000 + 3601), None);
    }

    #[test]
    fn trend_bias_requires_twenty_bars() {
        let few = trending_klines(5, 100.0);
        let ctx = build_long_term(&few);
        assert!(ctx.trend_bias.is_none());

        let many = trending_klines(25, 100.0);
        let ctx = build_long_term(&many);
        assert_eq!(ctx.trend_bias, Some(TrendBias::Bullish));
    }
}
