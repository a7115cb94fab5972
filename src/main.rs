use std::sync::Arc;

use anyhow::Result;

use perpbot_core::config::{Config, ExchangeKind, LmProvider};
use perpbot_core::decision::client::{AnthropicClient, LmClient, OpenAiCompatibleClient};
use perpbot_core::decision::DecisionEngine;
use perpbot_core::logging::{json_log, obj, v_str};
use perpbot_core::market::KlineSource;
use perpbot_core::scheduler::TraderScheduler;
use perpbot_core::venue::aster::AsterVenue;
use perpbot_core::venue::binance::BinanceVenue;
use perpbot_core::venue::hyperliquid::HyperliquidVenue;
use perpbot_core::venue::klines::RestKlineSource;
use perpbot_core::venue::Venue;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn build_venue(cfg: &Config) -> Arc<dyn Venue> {
    match cfg.exchange {
        ExchangeKind::Binance | ExchangeKind::Custom => {
            let base = env_or("BINANCE_FAPI_BASE", "https://fapi.binance.com");
            Arc::new(BinanceVenue::new(base, env_or("API_KEY", ""), env_or("API_SECRET", "")))
        }
        ExchangeKind::Hyperliquid => {
            let base = env_or("HYPERLIQUID_BASE", "https://api.hyperliquid.xyz");
            Arc::new(HyperliquidVenue::new(base, env_or("WALLET_ADDRESS", "")))
        }
        ExchangeKind::Aster => {
            let base = env_or("ASTER_BASE", "https://fapi.asterdex.com");
            Arc::new(AsterVenue::new(base, env_or("API_KEY", ""), env_or("API_SECRET", "")))
        }
    }
}

/// Every venue's kline history is pulled from Binance's public futures
/// candle endpoint regardless of which venue executes orders — candle data
/// is public market data, and Hyperliquid's candle wire shape isn't
/// implemented yet (see `venue::klines`).
fn build_kline_source() -> Arc<dyn KlineSource> {
    Arc::new(RestKlineSource::new(env_or("BINANCE_FAPI_BASE", "https://fapi.binance.com")))
}

fn build_lm_client(cfg: &Config) -> Box<dyn LmClient> {
    match cfg.lm_provider {
        LmProvider::Anthropic => Box::new(AnthropicClient::new(cfg.lm_base_url.clone(), cfg.lm_api_key.clone(), cfg.lm_model.clone())),
        LmProvider::OpenAiCompatible => Box::new(OpenAiCompatibleClient::new(cfg.lm_base_url.clone(), cfg.lm_api_key.clone(), cfg.lm_model.clone())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let trader_id = env_or("TRADER_ID", "trader-1");
    let candidate_symbols: Vec<String> = env_or("CANDIDATE_SYMBOLS", "BTCUSDT,ETHUSDT")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    json_log(
        "main",
        obj(&[
            ("event", v_str("startup")),
            ("trader_id", v_str(&trader_id)),
            ("exchange", v_str(&format!("{:?}", cfg.exchange))),
            ("candidates", v_str(&candidate_symbols.join(","))),
        ]),
    );

    let venue = build_venue(&cfg);
    let kline_source = build_kline_source();
    let lm_client = build_lm_client(&cfg);
    let decision_engine = DecisionEngine::new(lm_client, cfg.clone());

    let now_ms = perpbot_core::logging::ts_epoch_ms();
    let journal_dir = std::path::Path::new(&cfg.decision_log_root).join(&trader_id);

    let (mut scheduler, _handle) = TraderScheduler::new(
        trader_id.clone(),
        cfg,
        venue,
        kline_source,
        decision_engine,
        journal_dir,
        candidate_symbols,
        now_ms,
    )?;

    scheduler.recover()?;
    scheduler.run().await;

    json_log("main", obj(&[("event", v_str("shutdown")), ("trader_id", v_str(&trader_id)), ("final_state", v_str(&format!("{:?}", scheduler.state())))]));

    Ok(())
}
