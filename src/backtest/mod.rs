//! C8 — backtest runner (§4.8). Drives the same `DecisionEngine` /
//! `ExecutionEngine` the live scheduler uses against a `SimulatedAccount`
//! fed from historical bars instead of a live venue, replacing the donor's
//! strategy-driven `run_backtest(cfg, rows)` CSV loop with an AI-decision
//! loop over the same kind of CSV input.

pub mod account;
pub mod feed;
pub mod risk_engine;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::decision::client::LmClient;
use crate::decision::{Account as DecisionAccount, Context, DecisionEngine};
use crate::exec::{ExecutionEngine, ExecutionEvent};
use crate::journal::{AccountSnapshot, DecisionRecord, ExecutionLogEntry, Journal, PositionSnapshot};
use crate::logging::{json_log, obj, v_num, v_str};
use crate::market::{build_market_data, MarketData};
use crate::venue::Venue;

use account::SimulatedAccount;
use feed::{resolve_fill_price, DeterministicFeed};
use risk_engine::OhlcBar;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub run_id: String,
    pub starting_cash: f64,
    pub fee_bps: f64,
    pub tick_size: f64,
    pub step_size: f64,
    pub min_notional: f64,
    pub fill_policy: crate::config::FillPolicy,
    pub decision_cadence_bars: u64,
    pub run_root: String,
    pub replay_only: bool,
}

/// Cached AI output for one `(context_hash, prompt_variant, ts)` key (§4.8):
/// the context hash is the rendered user prompt's md5, which already
/// encodes market state, positions, and the candidate list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedDecision {
    decision_json: String,
    cot_trace: String,
}

/// Deterministic replay cache so the same bar always resolves to the same
/// AI call; `replay_only` turns a miss into a hard error instead of a live
/// call, for re-running a recorded backtest without network access.
#[derive(Default)]
struct AiCache {
    path: std::path::PathBuf,
    entries: HashMap<String, CachedDecision>,
    replay_only: bool,
}

impl AiCache {
    fn load(path: std::path::PathBuf, replay_only: bool) -> Self {
        let entries = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<HashMap<String, CachedDecision>>(&bytes).ok())
            .unwrap_or_default();
        Self { path, entries, replay_only }
    }

    fn key(context_hash: &str, prompt_variant: &str, ts: u64) -> String {
        format!("{context_hash}:{prompt_variant}:{ts}")
    }

    fn get(&self, context_hash: &str, prompt_variant: &str, ts: u64) -> Option<&CachedDecision> {
        self.entries.get(&Self::key(context_hash, prompt_variant, ts))
    }

    fn put(&mut self, context_hash: &str, prompt_variant: &str, ts: u64, value: CachedDecision) {
        self.entries.insert(Self::key(context_hash, prompt_variant, ts), value);
    }

    fn flush(&self) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        std::fs::write(&self.path, bytes)
    }
}

/// One point of `equity.ndjson`.
#[derive(Debug, Clone, Serialize)]
struct EquityPoint {
    ts: u64,
    equity: f64,
}

pub struct BacktestRunner<C: LmClient> {
    cfg: BacktestConfig,
    account: Arc<SimulatedAccount>,
    feed: DeterministicFeed,
    exec_engine: ExecutionEngine,
    decision_engine: DecisionEngine<C>,
    journal: Journal,
    ai_cache: AiCache,
    candidate_symbols: Vec<String>,
    equity_curve: Vec<EquityPoint>,
}

impl<C: LmClient> BacktestRunner<C> {
    pub fn new(
        cfg: BacktestConfig,
        engine_cfg: Config,
        client: C,
        feed: DeterministicFeed,
        candidate_symbols: Vec<String>,
    ) -> std::io::Result<Self> {
        let run_dir = std::path::Path::new(&cfg.run_root).join(&cfg.run_id);
        std::fs::create_dir_all(&run_dir)?;
        let journal = Journal::open(run_dir.join("decisions"))?;
        let ai_cache = AiCache::load(run_dir.join("ai_cache.json"), cfg.replay_only);
        let account = Arc::new(SimulatedAccount::new(cfg.starting_cash, cfg.fee_bps, cfg.tick_size, cfg.step_size, cfg.min_notional));
        Ok(Self {
            cfg,
            account,
            feed,
            exec_engine: ExecutionEngine::new(),
            decision_engine: DecisionEngine::new(client, engine_cfg),
            journal,
            ai_cache,
            candidate_symbols,
            equity_curve: Vec::new(),
        })
    }

    /// Runs every bar index present in `primary_symbol`'s series, in order.
    /// Other loaded symbols are expected to share the same bar count and
    /// timestamps; a mismatch just means their window is shorter at the
    /// start of the run, which `build_market_data`'s staleness check rejects
    /// until enough bars have accumulated.
    pub async fn run(&mut self, primary_symbol: &str) -> anyhow::Result<()> {
        let total_bars = self.feed.len(primary_symbol);
        for index in 0..total_bars {
            self.step(index).await?;
        }
        self.flush()?;
        Ok(())
    }

    async fn step(&mut self, index: usize) -> anyhow::Result<()> {
        let mut all_symbols: Vec<String> = self.candidate_symbols.clone();
        let open_symbols: Vec<String> = self.account.positions().await.map_err(|e| anyhow::anyhow!("{e}"))?.into_iter().map(|p| p.symbol).collect();
        for s in &open_symbols {
            if !all_symbols.contains(s) {
                all_symbols.push(s.clone());
            }
        }

        let mut bar_for: HashMap<String, (feed::CsvRow, Option<feed::CsvRow>)> = HashMap::new();
        for symbol in &all_symbols {
            if let Some((curr, next)) = self.feed.curr_and_next(symbol, index) {
                self.account.set_bar_price(symbol, curr.c);
                bar_for.insert(symbol.clone(), (curr, next));
            }
        }

        let now_ms = all_symbols.first().and_then(|s| bar_for.get(s)).map(|(c, _)| c.ts).unwrap_or(index as u64);

        // Pre-execution risk scan: liquidation/SL/TP set on a prior bar can
        // fire on this bar's own range before any new decision is made.
        self.run_risk_scan(&bar_for, now_ms).await?;

        if index as u64 % self.cfg.decision_cadence_bars.max(1) != 0 {
            return Ok(());
        }

        let mut market_data_map: HashMap<String, MarketData> = HashMap::new();
        for symbol in &all_symbols {
            let klines = self.feed.symbol_klines(symbol, index);
            let funding = bar_for.get(symbol).map(|(c, _)| c.funding).unwrap_or(0.0);
            if let Ok(md) = build_market_data(symbol, &klines.windows(), funding) {
                market_data_map.insert(symbol.clone(), md);
            }
        }
        if market_data_map.is_empty() {
            return Ok(());
        }

        let balance = self.account.balance().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        let positions = self.account.positions().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        let account = DecisionAccount {
            total_wallet: balance.total_wallet,
            available: balance.available,
            unrealized: balance.unrealized,
            margin_pct: balance.margin_pct,
        };

        let ctx = Context {
            current_time: now_ms,
            runtime_minutes: index as u64 * 5,
            call_count: index as u64,
            account: &account,
            positions: &positions,
            candidate_coins: &self.candidate_symbols,
            prompt_variant: "backtest",
            market_data_map: &market_data_map,
            btc_eth_leverage: 10,
            altcoin_leverage: 5,
        };

        let user_prompt = crate::decision::prompt::build_user_prompt(&ctx);
        let context_hash = format!("{:x}", md5::compute(user_prompt.as_bytes()));

        let (decision_json, cot_trace, prompt_hash) = if let Some(cached) = self.ai_cache.get(&context_hash, ctx.prompt_variant, now_ms) {
            (cached.decision_json.clone(), cached.cot_trace.clone(), context_hash.clone())
        } else if self.cfg.replay_only {
            return Err(anyhow::anyhow!("ai cache miss in replay_only mode at bar {index}"));
        } else {
            let full = self.decision_engine.decide(&ctx).await?;
            let decision_json = json!(full.decisions).to_string();
            self.ai_cache.put(&context_hash, ctx.prompt_variant, now_ms, CachedDecision { decision_json: decision_json.clone(), cot_trace: full.cot_trace.clone() });
            (decision_json, full.cot_trace, full.prompt_hash)
        };

        let decisions: Vec<crate::decision::DecisionAction> = serde_json::from_str(&decision_json)?;

        let mut mark_prices: HashMap<String, f64> = HashMap::new();
        for (symbol, md) in &market_data_map {
            mark_prices.insert(symbol.clone(), md.current_price);
        }
        // Fill policy resolution overrides the mark price used for *new*
        // fills; stop_loss/take_profit triggers still use the OHLC scan.
        for symbol in all_symbols.iter() {
            if let Some((curr, next)) = bar_for.get(symbol) {
                mark_prices.insert(symbol.clone(), resolve_fill_price(self.cfg.fill_policy, curr, next.as_ref()));
            }
        }

        let events = self.exec_engine.execute(&*self.account, decisions, &mark_prices, account.available, &prompt_hash, now_ms).await;

        let mut execution_log: Vec<ExecutionLogEntry> = events.iter().map(|e| ExecutionLogEntry::from_execution_event(e, &prompt_hash)).collect();
        // Post-execution risk scan: a position the decision just opened can
        // still be liquidated by the same bar's extremes.
        let post_events = self.run_risk_scan(&bar_for, now_ms).await?;
        execution_log.extend(post_events.iter().map(|e| ExecutionLogEntry::from_execution_event(e, "risk_engine")));

        let record = DecisionRecord {
            timestamp: now_ms,
            cycle_number: index as u64,
            exchange: "backtest".to_string(),
            system_prompt: String::new(),
            prompt_hash: prompt_hash.clone(),
            input_prompt: user_prompt,
            cot_trace,
            decision_json,
            account_state: AccountSnapshot { total_wallet: account.total_wallet, available: account.available, unrealized: account.unrealized, margin_pct: account.margin_pct },
            positions: positions.iter().map(|p| PositionSnapshot { symbol: p.symbol.clone(), side: p.side, quantity: p.quantity, entry_price: p.entry_price }).collect(),
            candidate_coins: self.candidate_symbols.clone(),
            execution_log,
            success: true,
            error_message: None,
            ai_request_duration_ms: 0,
        };
        self.journal.log_decision(record, now_ms, account.total_wallet)?;
        self.equity_curve.push(EquityPoint { ts: now_ms, equity: account.total_wallet });

        Ok(())
    }

    /// Runs the OHLC risk scan against this bar's range and force-closes any
    /// triggered position, returning the resulting events for the journal.
    async fn run_risk_scan(&self, bar_for: &HashMap<String, (feed::CsvRow, Option<feed::CsvRow>)>, now_ms: u64) -> anyhow::Result<Vec<ExecutionEvent>> {
        let positions = self.account.positions().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        let mut bars = HashMap::new();
        for (symbol, (curr, _)) in bar_for {
            bars.insert(symbol.clone(), OhlcBar { low: curr.l, high: curr.h, close: curr.c });
        }
        let triggers = risk_engine::scan(&positions, &bars);
        let mut events = Vec::new();
        for trigger in triggers {
            self.account.force_close(&trigger.symbol, trigger.fill_price, now_ms).map_err(|e| anyhow::anyhow!("{e}"))?;
            json_log(
                "backtest",
                obj(&[
                    ("symbol", v_str(&trigger.symbol)),
                    ("event", v_str("risk_trigger")),
                    ("kind", v_str(&format!("{:?}", trigger.kind))),
                    ("fill_price", v_num(trigger.fill_price)),
                ]),
            );
            events.push(ExecutionEvent::Skipped { symbol: trigger.symbol, reason: format!("{:?}", trigger.kind) });
        }
        Ok(events)
    }

    fn flush(&self) -> std::io::Result<()> {
        self.ai_cache.flush()?;
        let run_dir = std::path::Path::new(&self.cfg.run_root).join(&self.cfg.run_id);
        let mut buf = String::new();
        for point in &self.equity_curve {
            buf.push_str(&serde_json::to_string(point).unwrap());
            buf.push('\n');
        }
        std::fs::write(run_dir.join("equity.ndjson"), buf)?;
        let perf = self.journal.get_performance_with_cache(usize::MAX, false);
        std::fs::write(run_dir.join("metrics.json"), serde_json::to_string_pretty(&json!({
            "total_trades": perf.total_trades,
            "win_rate": perf.win_rate,
            "sharpe_ratio": perf.sharpe_ratio,
            "profit_factor": perf.profit_factor,
        }))?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::client::LmClient;
    use async_trait::async_trait;

    struct StubLmClient;

    #[async_trait]
    impl LmClient for StubLmClient {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str, _temperature: f64, _max_tokens: u32) -> anyhow::Result<String> {
            Ok(r#"{"decisions":[],"cot_trace":"stub"}"#.to_string())
        }
    }

    fn make_feed(symbol: &str, bars: usize) -> DeterministicFeed {
        let mut feed = DeterministicFeed::new();
        let rows: Vec<feed::CsvRow> = (0..bars)
            .map(|i| feed::CsvRow { ts: i as u64 * 300_000, o: 100.0, h: 101.0, l: 99.0, c: 100.0 + i as f64 * 0.1, v: 10.0, funding: 0.0 })
            .collect();
        feed.load(symbol, rows);
        feed
    }

    #[tokio::test]
    async fn run_advances_every_bar_and_writes_run_artifacts() {
        let dir = std::env::temp_dir().join(format!("perpbot-core-backtest-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let bt_cfg = BacktestConfig {
            run_id: "run1".to_string(),
            starting_cash: 10_000.0,
            fee_bps: 5.0,
            tick_size: 0.01,
            step_size: 0.001,
            min_notional: 5.0,
            fill_policy: crate::config::FillPolicy::NextOpen,
            decision_cadence_bars: 1,
            run_root: dir.to_string_lossy().to_string(),
            replay_only: false,
        };
        let engine_cfg = crate::config::Config::from_env();
        let feed = make_feed("BTCUSDT", 25);

        let mut runner = BacktestRunner::new(bt_cfg, engine_cfg, StubLmClient, feed, vec!["BTCUSDT".to_string()]).unwrap();
        runner.run("BTCUSDT").await.unwrap();

        assert!(dir.join("run1").join("equity.ndjson").exists());
        assert!(dir.join("run1").join("metrics.json").exists());
        assert!(dir.join("run1").join("ai_cache.json").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn replay_only_fails_on_cache_miss() {
        let dir = std::env::temp_dir().join(format!("perpbot-core-backtest-test-replay-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let bt_cfg = BacktestConfig {
            run_id: "run1".to_string(),
            starting_cash: 10_000.0,
            fee_bps: 5.0,
            tick_size: 0.01,
            step_size: 0.001,
            min_notional: 5.0,
            fill_policy: crate::config::FillPolicy::NextOpen,
            decision_cadence_bars: 1,
            run_root: dir.to_string_lossy().to_string(),
            replay_only: true,
        };
        let engine_cfg = crate::config::Config::from_env();
        let feed = make_feed("BTCUSDT", 25);

        let mut runner = BacktestRunner::new(bt_cfg, engine_cfg, StubLmClient, feed, vec!["BTCUSDT".to_string()]).unwrap();
        let err = runner.run("BTCUSDT").await.unwrap_err();
        assert!(err.to_string().contains("replay_only"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
