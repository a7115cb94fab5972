//! Live `KlineSource` (§4.2/§4.7) backed by Binance's public futures kline
//! endpoint, which Aster's API mirrors closely enough to reuse unmodified
//! (only `fapi_base` changes). Hyperliquid's candle endpoint has a different
//! wire shape and is not implemented here yet.

use async_trait::async_trait;
use reqwest::Client;

use crate::kline::Kline;
use crate::market::{KlineSource, SymbolKlines};

pub struct RestKlineSource {
    client: Client,
    fapi_base: String,
}

impl RestKlineSource {
    pub fn new(fapi_base: String) -> Self {
        Self { client: Client::new(), fapi_base }
    }

    async fn fetch_interval(&self, symbol: &str, interval: &str, limit: u32) -> anyhow::Result<Vec<Kline>> {
        let url = format!("{}/fapi/v1/klines?symbol={symbol}&interval={interval}&limit={limit}", self.fapi_base);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("kline fetch {symbol}/{interval} failed: {}", resp.status());
        }
        let raw: Vec<serde_json::Value> = resp.json().await?;
        raw.iter().map(parse_row).collect()
    }
}

fn parse_row(row: &serde_json::Value) -> anyhow::Result<Kline> {
    let arr = row.as_array().ok_or_else(|| anyhow::anyhow!("kline row not an array"))?;
    let get_f64 = |i: usize| -> anyhow::Result<f64> {
        arr.get(i).and_then(|v| v.as_str()).and_then(|s| s.parse().ok()).ok_or_else(|| anyhow::anyhow!("kline field {i} not a numeric string"))
    };
    let get_u64 = |i: usize| -> anyhow::Result<u64> { arr.get(i).and_then(|v| v.as_u64()).ok_or_else(|| anyhow::anyhow!("kline field {i} not a u64")) };
    Ok(Kline::new(get_u64(0)?, get_f64(1)?, get_f64(2)?, get_f64(3)?, get_f64(4)?, get_f64(5)?, get_u64(6)?))
}

#[async_trait]
impl KlineSource for RestKlineSource {
    async fn fetch(&self, symbol: &str) -> anyhow::Result<SymbolKlines> {
        let (m5, m15, h1, h4, d1) = tokio::try_join!(
            self.fetch_interval(symbol, "5m", 200),
            self.fetch_interval(symbol, "15m", 100),
            self.fetch_interval(symbol, "1h", 100),
            self.fetch_interval(symbol, "4h", 60),
            self.fetch_interval(symbol, "1d", 30),
        )?;
        Ok(SymbolKlines { m5, m15, h1, h4, d1 })
    }
}
