//! System/user prompt construction (§4.4) and secret redaction before a
//! decision record is persisted.

use super::Context;
use crate::config::Config;
use crate::market::TrendBias;

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an autonomous perpetual-futures trading agent. You receive account \
state, open positions, and market data for candidate symbols. Respond with \
a JSON array of decisions (open_long, open_short, close_long, close_short, \
partial_close, update_stop_loss, update_take_profit, hold, wait) plus a \
chain-of-thought trace explaining your reasoning.";

pub fn build_system_prompt(cfg: &Config) -> String {
    let base = if cfg.override_base_prompt {
        cfg.custom_prompt.clone().unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    } else {
        DEFAULT_SYSTEM_PROMPT.to_string()
    };
    match (&cfg.custom_prompt, cfg.override_base_prompt) {
        (Some(overlay), false) => format!("{base}\n\n{overlay}"),
        _ => base,
    }
}

fn trend_label(bias: Option<TrendBias>) -> &'static str {
    match bias {
        Some(TrendBias::Bullish) => "bullish",
        Some(TrendBias::Bearish) => "bearish",
        Some(TrendBias::Neutral) => "neutral",
        None => "unknown",
    }
}

/// The user prompt includes a symbol's market block only when the symbol is
/// a current position or a candidate this cycle (§9 prompt construction
/// subtlety) — never because a snapshot happens to exist in memory.
pub fn build_user_prompt(ctx: &Context) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "cycle_time={} runtime_minutes={} call_count={}\n",
        ctx.current_time, ctx.runtime_minutes, ctx.call_count
    ));
    out.push_str(&format!(
        "account: wallet={:.2} available={:.2} unrealized={:.2} margin_pct={:.4}\n",
        ctx.account.total_wallet, ctx.account.available, ctx.account.unrealized, ctx.account.margin_pct
    ));

    out.push_str("positions:\n");
    for p in ctx.positions {
        out.push_str(&format!(
            "  {} {:?} qty={} entry={} lev={} sl={:?} tp={:?}\n",
            p.symbol, p.side, p.quantity, p.entry_price, p.leverage, p.stop_loss, p.take_profit
        ));
    }

    let mut relevant: Vec<&String> = ctx.positions.iter().map(|p| &p.symbol).collect();
    for c in ctx.candidate_coins {
        if !relevant.contains(&c) {
            relevant.push(c);
        }
    }

    out.push_str("market_data:\n");
    for symbol in relevant {
        if let Some(data) = ctx.market_data_map.get(symbol) {
            out.push_str(&format!(
                "  {}: price={:.4} ema20={:.4} macd={:.4} rsi7={:.2} funding={:.6} chg1h={:.2}% chg4h={:.2}% chg24h={:.2}% trend_4h={} trend_1d={}\n",
                symbol,
                data.current_price,
                data.current_ema20,
                data.current_macd,
                data.current_rsi7,
                data.funding_rate,
                data.price_change_1h,
                data.price_change_4h,
                data.price_change_24h,
                trend_label(data.context_4h.trend_bias),
                trend_label(data.context_1d.trend_bias),
            ));
        }
    }

    out
}

/// Redacts `sk-...`, `key_...`, and long hex/0x blobs, keeping only a
/// prefix and suffix, before a decision record is persisted (§4.4).
pub fn redact_secrets(text: &str) -> String {
    text.split_whitespace()
        .map(redact_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn redact_token(token: &str) -> String {
    let looks_secret = token.starts_with("sk-")
        || token.starts_with("key_")
        || (token.starts_with("0x") && token.len() > 18)
        || (token.len() > 24 && token.chars().all(|c| c.is_ascii_hexdigit()));
    if !looks_secret {
        return token.to_string();
    }
    if token.len() <= 8 {
        return "[REDACTED]".to_string();
    }
    format!("{}...{}", &token[..4], &token[token.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_sk_prefixed_tokens() {
        let out = redact_secrets("auth=sk-ABCDEFGHIJKLMNOPQRSTUVWX ok");
        assert!(out.contains("..."));
        assert!(!out.contains("ABCDEFGHIJKLMNOPQRSTUVWX"));
    }

    #[test]
    fn leaves_normal_words_untouched() {
        let out = redact_secrets("hold wait open_long BTCUSDT");
        assert_eq!(out, "hold wait open_long BTCUSDT");
    }

    #[test]
    fn redacts_long_hex_blob() {
        let blob = "a".repeat(40);
        let out = redact_secrets(&blob);
        assert!(out.starts_with("aaaa..."));
    }
}
