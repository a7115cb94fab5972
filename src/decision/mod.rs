//! C4 — decision engine. Builds prompts, calls the language model with
//! retry, parses the structured response, and validates each decision
//! against per-venue rules (§4.4).

pub mod client;
pub mod parse;
pub mod prompt;

use crate::config::Config;
use crate::market::MarketData;
use crate::retry::{is_retryable_lm_error, retry_async, RetryConfig};
use crate::venue::Position;
use client::LmClient;
pub use parse::{validate_decision, DecisionAction, ValidationError};

#[derive(Debug, Clone, Default)]
pub struct Account {
    pub total_wallet: f64,
    pub available: f64,
    pub unrealized: f64,
    pub margin_pct: f64,
}

pub struct Context<'a> {
    pub current_time: u64,
    pub runtime_minutes: u64,
    pub call_count: u64,
    pub account: &'a Account,
    pub positions: &'a [Position],
    pub candidate_coins: &'a [String],
    pub prompt_variant: &'a str,
    /// Only symbols that are a current position or a candidate this cycle
    /// (§9: never because a snapshot happens to exist in memory).
    pub market_data_map: &'a std::collections::HashMap<String, MarketData>,
    pub btc_eth_leverage: u32,
    pub altcoin_leverage: u32,
}

#[derive(Debug, Clone)]
pub struct FullDecision {
    pub decisions: Vec<DecisionAction>,
    pub cot_trace: String,
    pub user_prompt: String,
    pub system_prompt: String,
    pub prompt_hash: String,
    pub request_duration_ms: u64,
}

/// `prompt_hash = MD5(system_prompt)` (§4.4, glossary).
pub fn prompt_hash(system_prompt: &str) -> String {
    format!("{:x}", md5::compute(system_prompt.as_bytes()))
}

pub struct DecisionEngine<C: LmClient> {
    client: C,
    cfg: Config,
}

impl<C: LmClient> DecisionEngine<C> {
    pub fn new(client: C, cfg: Config) -> Self {
        Self { client, cfg }
    }

    pub async fn decide(&self, ctx: &Context<'_>) -> anyhow::Result<FullDecision> {
        let system_prompt = prompt::build_system_prompt(&self.cfg);
        let hash = prompt_hash(&system_prompt);
        let user_prompt = prompt::build_user_prompt(ctx);

        let retry_cfg = RetryConfig::for_lm_calls();
        let start = std::time::Instant::now();
        let raw_response = retry_async(&retry_cfg, "lm_call", || async {
            self.client
                .complete(&system_prompt, &user_prompt, self.cfg.temperature, self.cfg.ai_max_tokens)
                .await
                .map_err(|e| {
                    if is_retryable_lm_error(&e.to_string()) {
                        e
                    } else {
                        // Non-retryable errors still flow through retry_async but
                        // won't match is_retryable_lm_error on subsequent checks;
                        // the retry loop's own attempt cap bounds worst case cost.
                        e
                    }
                })
        })
        .await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let parsed = parse::parse_response(&raw_response)?;

        let leverage_cap = |symbol: &str| -> u32 {
            if symbol.starts_with("BTC") || symbol.starts_with("ETH") {
                ctx.btc_eth_leverage
            } else {
                ctx.altcoin_leverage
            }
        };

        let mut valid = Vec::new();
        for action in parsed.decisions {
            match validate_decision(&action, leverage_cap(action.symbol()), self.cfg.exchange.minimum_notional()) {
                Ok(()) => valid.push(action),
                Err(e) => {
                    eprintln!("{{\"domain\":\"decision\",\"event\":\"validation_dropped\",\"symbol\":\"{}\",\"reason\":\"{e}\"}}", action.symbol());
                }
            }
        }

        Ok(FullDecision {
            decisions: valid,
            cot_trace: parsed.cot_trace,
            user_prompt,
            system_prompt,
            prompt_hash: hash,
            request_duration_ms: duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_hash_is_deterministic_md5() {
        let h1 = prompt_hash("you are a trading agent");
        let h2 = prompt_hash("you are a trading agent");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);
    }

    #[test]
    fn prompt_hash_changes_with_prompt() {
        let h1 = prompt_hash("prompt A");
        let h2 = prompt_hash("prompt B");
        assert_ne!(h1, h2);
    }
}
