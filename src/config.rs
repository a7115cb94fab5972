//! Environment-driven configuration, one field per recognised option in
//! the engine's configuration table.

#[derive(Debug, Clone)]
pub struct Config {
    pub scan_interval_minutes: u64,
    pub decision_cadence_bars: u64,
    pub btc_eth_leverage: u32,
    pub altcoin_leverage: u32,
    pub initial_balance: f64,
    pub fee_bps: f64,
    pub slippage_bps: f64,
    pub fill_policy: FillPolicy,
    pub checkpoint_interval_bars: u64,
    pub checkpoint_interval_seconds: u64,
    pub prompt_variant: String,
    pub system_prompt_template: String,
    pub custom_prompt: Option<String>,
    pub override_base_prompt: bool,
    pub cache_ai: bool,
    pub replay_only: bool,
    pub shared_ai_cache_path: Option<String>,
    pub max_ai_retries: u32,
    pub ai_timeout_seconds: u64,
    pub ai_max_tokens: u32,
    pub temperature: f64,
    pub exchange: ExchangeKind,

    // Ambient (donor-idiom) options, see SPEC_FULL.md §6.
    pub log_level: String,
    pub log_domains: String,
    pub profile_sample: f64,
    pub run_root: String,
    pub decision_log_root: String,
    pub sqlite_path: String,
    pub lm_provider: LmProvider,
    pub lm_base_url: String,
    pub lm_api_key: String,
    pub lm_model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    NextOpen,
    BarVwap,
    MidPrice,
}

impl FillPolicy {
    fn from_str(s: &str) -> Self {
        match s {
            "bar_vwap" => FillPolicy::BarVwap,
            "mid_price" => FillPolicy::MidPrice,
            _ => FillPolicy::NextOpen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Binance,
    Hyperliquid,
    Aster,
    Custom,
}

impl ExchangeKind {
    fn from_str(s: &str) -> Self {
        match s {
            "hyperliquid" => ExchangeKind::Hyperliquid,
            "aster" => ExchangeKind::Aster,
            "custom" => ExchangeKind::Custom,
            _ => ExchangeKind::Binance,
        }
    }

    /// Taker fee fraction used by the journal's TradeOutcome fee accounting (§4.6).
    pub fn taker_fee(&self) -> f64 {
        match self {
            ExchangeKind::Aster => 0.00035,
            ExchangeKind::Hyperliquid => 0.00045,
            ExchangeKind::Binance => 0.00050,
            ExchangeKind::Custom => 0.00050,
        }
    }

    /// Minimum order notional in USDT, per venue (§4.3).
    pub fn minimum_notional(&self) -> f64 {
        match self {
            ExchangeKind::Hyperliquid => 12.0,
            ExchangeKind::Binance => 100.0,
            ExchangeKind::Aster => 10.0,
            ExchangeKind::Custom => 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmProvider {
    OpenAiCompatible,
    Anthropic,
}

impl LmProvider {
    fn from_str(s: &str) -> Self {
        match s {
            "anthropic" => LmProvider::Anthropic,
            _ => LmProvider::OpenAiCompatible,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            scan_interval_minutes: env_or("SCAN_INTERVAL_MINUTES", 3),
            decision_cadence_bars: env_or("DECISION_CADENCE_BARS", 1),
            btc_eth_leverage: env_or("BTC_ETH_LEVERAGE", 10),
            altcoin_leverage: env_or("ALTCOIN_LEVERAGE", 5),
            initial_balance: env_or("INITIAL_BALANCE", 10_000.0),
            fee_bps: env_or("FEE_BPS", 5.0),
            slippage_bps: env_or("SLIPPAGE_BPS", 0.0),
            fill_policy: FillPolicy::from_str(&env_str("FILL_POLICY", "next_open")),
            checkpoint_interval_bars: env_or("CHECKPOINT_INTERVAL_BARS", 0),
            checkpoint_interval_seconds: env_or("CHECKPOINT_INTERVAL_SECONDS", 2),
            prompt_variant: env_str("PROMPT_VARIANT", "default"),
            system_prompt_template: env_str("SYSTEM_PROMPT_TEMPLATE", "default"),
            custom_prompt: std::env::var("CUSTOM_PROMPT").ok(),
            override_base_prompt: env_or("OVERRIDE_BASE_PROMPT", false),
            cache_ai: env_or("CACHE_AI", false),
            replay_only: env_or("REPLAY_ONLY", false),
            shared_ai_cache_path: std::env::var("SHARED_AI_CACHE_PATH").ok(),
            max_ai_retries: env_or("MAX_AI_RETRIES", 3),
            ai_timeout_seconds: env_or("AI_TIMEOUT_SECONDS", 120),
            ai_max_tokens: env_or("AI_MAX_TOKENS", 2000),
            temperature: env_or("TEMPERATURE", 0.1),
            exchange: ExchangeKind::from_str(&env_str("EXCHANGE", "binance")),

            log_level: env_str("LOG_LEVEL", "info"),
            log_domains: env_str("LOG_DOMAINS", "all"),
            profile_sample: env_or("PROFILE_SAMPLE", 0.0),
            run_root: env_str("RUN_ROOT", "out/runs"),
            decision_log_root: env_str("DECISION_LOG_ROOT", "out/decision_logs"),
            sqlite_path: env_str("SQLITE_PATH", "out/state.sqlite"),
            lm_provider: LmProvider::from_str(&env_str("LM_PROVIDER", "openai_compatible")),
            lm_base_url: env_str("LM_BASE_URL", "https://api.openai.com/v1"),
            lm_api_key: env_str("LM_API_KEY", ""),
            lm_model: env_str("LM_MODEL", "gpt-4o-mini"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_kind_defaults_to_binance() {
        assert_eq!(ExchangeKind::from_str("nonsense"), ExchangeKind::Binance);
    }

    #[test]
    fn taker_fees_match_spec_table() {
        assert_eq!(ExchangeKind::Aster.taker_fee(), 0.00035);
        assert_eq!(ExchangeKind::Hyperliquid.taker_fee(), 0.00045);
        assert_eq!(ExchangeKind::Binance.taker_fee(), 0.00050);
    }

    #[test]
    fn minimum_notional_matches_spec_table() {
        assert_eq!(ExchangeKind::Hyperliquid.minimum_notional(), 12.0);
        assert_eq!(ExchangeKind::Binance.minimum_notional(), 100.0);
        assert_eq!(ExchangeKind::Aster.minimum_notional(), 10.0);
    }

    #[test]
    fn fill_policy_parses_known_values() {
        assert_eq!(FillPolicy::from_str("bar_vwap"), FillPolicy::BarVwap);
        assert_eq!(FillPolicy::from_str("mid_price"), FillPolicy::MidPrice);
        assert_eq!(FillPolicy::from_str("garbage"), FillPolicy::NextOpen);
    }
}
