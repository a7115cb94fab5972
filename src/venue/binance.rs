//! Binance USD-M futures adapter: the Venue capability set implemented
//! against `fapi` (positions/orders) with HMAC-signed requests.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::signing::sign_binance;
use super::{Balance, Fill, FillSide, Order, Position, Side, Venue, VenueError, VenueResult};

pub struct BinanceVenue {
    client: Client,
    fapi_base: String,
    api_key: String,
    api_secret: String,
}

impl BinanceVenue {
    pub fn new(fapi_base: String, api_key: String, api_secret: String) -> Self {
        Self { client: Client::new(), fapi_base, api_key, api_secret }
    }

    fn timestamp_ms() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }

    fn sign(&self, query: &str) -> VenueResult<String> {
        sign_binance(query, &self.api_secret).map_err(VenueError)
    }

    async fn signed_get(&self, path: &str, query: &str) -> VenueResult<serde_json::Value> {
        let signature = self.sign(query)?;
        let url = format!("{}{}?{}&signature={}", self.fapi_base, path, query, signature);
        let resp = self
            .client
            .get(&url)
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

    async fn signed_post(&self, path: &str, query: &str) -> VenueResult<serde_json::Value> {
        let signature = self.sign(query)?;
        let url = format!("{}{}?{}&signature={}", self.fapi_base, path, query, signature);
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

    async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        qty: f64,
        price: Option<f64>,
        reduce_only: bool,
    ) -> VenueResult<Order> {
        let ts = Self::timestamp_ms();
        let mut query = format!(
            "symbol={}&side={}&type={}&quantity={}&timestamp={}&recvWindow=5000",
            symbol, side, order_type, qty, ts
        );
        if let Some(p) = price {
            query.push_str(&format!("&price={}&timeInForce=GTC", p));
        }
        if reduce_only {
            query.push_str("&reduceOnly=true");
        }
        let value = self.signed_post("/fapi/v1/order", &query).await?;
        let order_id = value.get("orderId").map(|v| v.to_string()).unwrap_or_default();
        Ok(Order { order_id, symbol: symbol.to_string() })
    }
}

#[async_trait]
impl Venue for BinanceVenue {
    async fn balance(&self) -> VenueResult<Balance> {
        let ts = Self::timestamp_ms();
        let query = format!("timestamp={}&recvWindow=5000", ts);
        let value = self.signed_get("/fapi/v2/account", &query).await?;
        let total_wallet = value.get("totalWalletBalance").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let available = value.get("availableBalance").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let unrealized = value.get("totalUnrealizedProfit").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let margin_pct = if total_wallet > 0.0 { (total_wallet - available) / total_wallet } else { 0.0 };
        Ok(Balance { total_wallet, available, unrealized, margin_pct })
    }

    async fn positions(&self) -> VenueResult<Vec<Position>> {
        let ts = Self::timestamp_ms();
        let query = format!("timestamp={}&recvWindow=5000", ts);
        let value = self.signed_get("/fapi/v2/positionRisk", &query).await?;

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PositionRisk {
            symbol: String,
            position_amt: String,
            entry_price: String,
            leverage: String,
            liquidation_price: String,
        }

        let rows: Vec<PositionRisk> = serde_json::from_value(value).map_err(|e| VenueError(e.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let amt: f64 = r.position_amt.parse().unwrap_or(0.0);
                if amt.abs() < 1e-9 {
                    return None;
                }
                let entry_price: f64 = r.entry_price.parse().unwrap_or(0.0);
                let leverage: u32 = r.leverage.parse().unwrap_or(1);
                Some(Position {
                    symbol: r.symbol,
                    side: if amt > 0.0 { Side::Long } else { Side::Short },
                    quantity: amt.abs(),
                    entry_price,
                    leverage,
                    margin: Position::compute_margin(amt.abs(), entry_price, leverage),
                    stop_loss: None,
                    take_profit: None,
                    liquidation_price: r.liquidation_price.parse().unwrap_or(0.0),
                    open_time: 0,
                })
            })
            .collect())
    }

    async fn open(&self, symbol: &str, side: Side, qty: f64, _leverage: u32) -> VenueResult<Order> {
        let binance_side = match side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        };
        self.place_order(symbol, binance_side, "MARKET", qty, None, false).await
    }

    async fn close(&self, symbol: &str, side: Side, qty: f64) -> VenueResult<Order> {
        let binance_side = match side {
            Side::Long => "SELL",
            Side::Short => "BUY",
        };
        self.place_order(symbol, binance_side, "MARKET", qty, None, true).await
    }

    async fn set_stop_loss(&self, symbol: &str, side: Side, qty: f64, price: f64) -> VenueResult<Order> {
        let close_side = match side {
            Side::Long => "SELL",
            Side::Short => "BUY",
        };
        // Always a GTC limit order, never closePosition=true (§4.3).
        self.place_order(symbol, close_side, "LIMIT", qty, Some(price), true).await
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

    async fn recent_fills(&self, symbol: &str, start_ms: u64, end_ms: u64) -> VenueResult<Vec<Fill>> {
        let ts = Self::timestamp_ms();
        let query = format!(
            "symbol={}&startTime={}&endTime={}&timestamp={}&recvWindow=5000",
            symbol, start_ms, end_ms, ts
        );
        let value = self.signed_get("/fapi/v1/userTrades", &query).await?;

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct UserTrade {
            price: String,
            qty: String,
            commission: String,
            time: u64,
            side: String,
        }

        let rows: Vec<UserTrade> = serde_json::from_value(value).map_err(|e| VenueError(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|t| Fill {
                side: if t.side == "BUY" { FillSide::Buy } else { FillSide::Sell },
                price: t.price.parse().unwrap_or(0.0),
                quantity: t.qty.parse().unwrap_or(0.0),
                timestamp_ms: t.time,
                fee: t.commission.parse().ok(),
            })
            .collect())
    }

    fn format_price(&self, _symbol: &str, v: f64) -> f64 {
        super::round_to_step(v, 0.01)
    }

    fn format_quantity(&self, _symbol: &str, v: f64) -> f64 {
        super::round_to_step(v, 0.001)
    }

    fn minimum_notional(&self, _symbol: &str) -> f64 {
        100.0
    }

    fn taker_fee(&self) -> f64 {
        0.00050
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_price_rounds_to_tick() {
        let v = BinanceVenue::new("https://fapi.binance.com".into(), "k".into(), "s".into());
        assert!((v.format_price("BTCUSDT", 50000.567) - 50000.56).abs() < 1e-9);
    }

    #[test]
    fn minimum_notional_is_100_usdt() {
        let v = BinanceVenue::new("https://fapi.binance.com".into(), "k".into(), "s".into());
        assert_eq!(v.minimum_notional("BTCUSDT"), 100.0);
    }
}
