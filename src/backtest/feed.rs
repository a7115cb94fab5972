//! Deterministic historical feed (§4.8). Replaces the live venue's kline
//! fetch with pre-loaded bars so a backtest run is byte-for-byte repeatable;
//! `parse_csv_line`/`CsvRow` are carried over from the donor's CSV-driven
//! backtest loop, re-targeted to emit `Kline`s instead of driving a strategy
//! loop directly.

use anyhow::{anyhow, Result};

use crate::config::FillPolicy;
use crate::kline::Kline;

#[derive(Debug, Clone, Copy)]
pub struct CsvRow {
    pub ts: u64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
    pub funding: f64,
}

pub fn parse_csv_line(line: &str) -> Result<CsvRow> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 7 {
        return Err(anyhow!("expected 7+ columns, got {}", parts.len()));
    }
    Ok(CsvRow {
        ts: parts[0].trim().parse()?,
        o: parts[1].trim().parse()?,
        h: parts[2].trim().parse()?,
        l: parts[3].trim().parse()?,
        c: parts[4].trim().parse()?,
        v: parts[5].trim().parse()?,
        funding: parts[6].trim().parse()?,
    })
}

impl From<CsvRow> for Kline {
    fn from(row: CsvRow) -> Self {
        Kline::new(row.ts, row.o, row.h, row.l, row.c, row.v, row.ts)
    }
}

/// Per-symbol bar history loaded up front; `BuildMarketData(ts)` is realised
/// as index-based slicing rather than a timestamp search, since the feed
/// only ever advances forward one bar at a time.
#[derive(Debug, Clone, Default)]
pub struct DeterministicFeed {
    bars: std::collections::HashMap<String, Vec<CsvRow>>,
}

impl DeterministicFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, symbol: impl Into<String>, rows: Vec<CsvRow>) {
        self.bars.insert(symbol.into(), rows);
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.bars.get(symbol).map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, symbol: &str) -> bool {
        self.len(symbol) == 0
    }

    /// `(curr_bar, next_bar)` at `index`; `next_bar` is `None` past the end
    /// (the last bar of the run has no next-open to fill against).
    pub fn curr_and_next(&self, symbol: &str, index: usize) -> Option<(CsvRow, Option<CsvRow>)> {
        let rows = self.bars.get(symbol)?;
        let curr = *rows.get(index)?;
        let next = rows.get(index + 1).copied();
        Some((curr, next))
    }

    /// Window of up to `n` klines ending at `index`, inclusive, for the
    /// multi-timeframe series `market::build_market_data` expects.
    pub fn window(&self, symbol: &str, index: usize, n: usize) -> Vec<Kline> {
        let Some(rows) = self.bars.get(symbol) else {
            return Vec::new();
        };
        let end = (index + 1).min(rows.len());
        let start = end.saturating_sub(n);
        rows[start..end].iter().map(|r| Kline::from(*r)).collect()
    }

    /// Builds the full multi-timeframe window set for one symbol at `index`,
    /// aggregating the loaded bars (assumed 5m granularity, the feed's only
    /// native resolution) up into 15m/1h/4h/1d candles the way an exchange's
    /// own aggregation would, since the feed has no separate higher-timeframe
    /// source to pull from.
    pub fn symbol_klines(&self, symbol: &str, index: usize) -> crate::market::SymbolKlines {
        let m5 = self.window(symbol, index, 200);
        crate::market::SymbolKlines {
            m15: aggregate(&m5, 3),
            h1: aggregate(&m5, 12),
            h4: aggregate(&m5, 48),
            d1: aggregate(&m5, 288),
            m5,
        }
    }
}

/// Aggregates consecutive runs of `stride` candles into one coarser OHLCV
/// candle each (open of first, close of last, high/low/volume across the run).
pub fn aggregate(bars: &[Kline], stride: usize) -> Vec<Kline> {
    if stride <= 1 {
        return bars.to_vec();
    }
    bars.chunks(stride)
        .map(|chunk| {
            let first = chunk.first().expect("chunks() never yields empty slices");
            let last = chunk.last().expect("chunks() never yields empty slices");
            let high = chunk.iter().fold(f64::MIN, |acc, k| acc.max(k.high));
            let low = chunk.iter().fold(f64::MAX, |acc, k| acc.min(k.low));
            let volume = chunk.iter().map(|k| k.volume).sum();
            Kline::new(first.open_time, first.open, high, low, last.close, volume, last.close_time)
        })
        .collect()
}

/// Resolves one fill price for `qty` against `(curr, next)` per the
/// configured fill policy (§4.8), falling back to the current close (the
/// "mark price") when the policy's preferred data point is unavailable.
pub fn resolve_fill_price(policy: FillPolicy, curr: &CsvRow, next: Option<&CsvRow>) -> f64 {
    match policy {
        FillPolicy::NextOpen => next.map(|n| n.o).unwrap_or(curr.c),
        FillPolicy::BarVwap => {
            let typical = (curr.h + curr.l + curr.c) / 3.0;
            if curr.v > 0.0 {
                typical
            } else {
                curr.c
            }
        }
        FillPolicy::MidPrice => (curr.h + curr.l) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: u64, o: f64, h: f64, l: f64, c: f64) -> CsvRow {
        CsvRow { ts, o, h, l, c, v: 100.0, funding: 0.0 }
    }

    #[test]
    fn parses_csv_line_with_funding_column() {
        let r = parse_csv_line("1000,10,11,9,10.5,1000,0.0001").unwrap();
        assert_eq!(r.ts, 1000);
        assert!((r.funding - 0.0001).abs() < 1e-12);
    }

    #[test]
    fn curr_and_next_is_none_past_last_bar() {
        let mut feed = DeterministicFeed::new();
        feed.load("BTCUSDT", vec![row(0, 1.0, 1.0, 1.0, 1.0), row(1, 2.0, 2.0, 2.0, 2.0)]);
        let (curr, next) = feed.curr_and_next("BTCUSDT", 1).unwrap();
        assert_eq!(curr.ts, 1);
        assert!(next.is_none());
    }

    #[test]
    fn next_open_fill_uses_following_bar_open() {
        let curr = row(0, 10.0, 11.0, 9.0, 10.5);
        let next = row(1, 10.6, 12.0, 10.0, 11.0);
        assert!((resolve_fill_price(FillPolicy::NextOpen, &curr, Some(&next)) - 10.6).abs() < 1e-9);
    }

    #[test]
    fn next_open_falls_back_to_close_at_end_of_feed() {
        let curr = row(0, 10.0, 11.0, 9.0, 10.5);
        assert!((resolve_fill_price(FillPolicy::NextOpen, &curr, None) - 10.5).abs() < 1e-9);
    }

    #[test]
    fn aggregate_combines_stride_into_one_ohlc_bar() {
        let bars = vec![
            Kline::from(row(0, 10.0, 12.0, 9.0, 11.0)),
            Kline::from(row(1, 11.0, 13.0, 10.5, 12.0)),
            Kline::from(row(2, 12.0, 12.5, 8.0, 9.0)),
        ];
        let agg = aggregate(&bars, 3);
        assert_eq!(agg.len(), 1);
        assert_eq!(agg[0].open, 10.0);
        assert_eq!(agg[0].close, 9.0);
        assert_eq!(agg[0].high, 13.0);
        assert_eq!(agg[0].low, 8.0);
    }

    #[test]
    fn symbol_klines_derives_higher_timeframes_from_loaded_bars() {
        let mut feed = DeterministicFeed::new();
        let rows: Vec<CsvRow> = (0..20).map(|i| row(i, 10.0, 10.5, 9.5, 10.0 + i as f64 * 0.01)).collect();
        feed.load("BTCUSDT", rows);
        let klines = feed.symbol_klines("BTCUSDT", 19);
        assert_eq!(klines.m5.len(), 20);
        assert!(!klines.m15.is_empty());
        assert!(klines.m15.len() < klines.m5.len());
    }
}
