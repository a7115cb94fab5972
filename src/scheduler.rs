//! C7 — per-trader scheduler. Sequences a decision cycle (snapshot → risk
//! guard → AI → execute → risk guard → journal) and exposes non-blocking
//! lifecycle control, grounded on `main.rs`'s `loop { ... }` tick structure
//! and `reliability/circuit.rs::CircuitBreaker` for failure-triggered
//! halting (§4.7).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;

use crate::config::Config;
use crate::decision::client::LmClient;
use crate::decision::{Account, Context, DecisionEngine};
use crate::exec::ExecutionEngine;
use crate::journal::{AccountSnapshot, DecisionRecord, ExecutionLogEntry, Journal, PositionSnapshot};
use crate::logging::{json_log, obj, v_num, v_str};
use crate::market::{build_market_data, FundingCache, KlineSource, MarketData};
use crate::reliability::circuit::CircuitBreaker;
use crate::venue::Venue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraderLifecycle {
    Created,
    Running,
    Paused,
    Stopped,
    Failed,
    Completed,
    Liquidated,
}

/// Non-blocking control signal, read at the top of every tick (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Stop,
}

/// Handle a caller uses to drive a running scheduler from another task.
#[derive(Clone)]
pub struct TraderHandle {
    control: watch::Sender<ControlSignal>,
}

impl TraderHandle {
    pub fn pause(&self) {
        let _ = self.control.send(ControlSignal::Pause);
    }
    pub fn resume(&self) {
        let _ = self.control.send(ControlSignal::Run);
    }
    pub fn stop(&self) {
        let _ = self.control.send(ControlSignal::Stop);
    }
}

pub struct TraderScheduler<C: LmClient> {
    trader_id: String,
    cfg: Config,
    venue: Arc<dyn Venue>,
    kline_source: Arc<dyn KlineSource>,
    decision_engine: DecisionEngine<C>,
    exec_engine: ExecutionEngine,
    journal: Journal,
    funding_cache: Arc<FundingCache>,
    circuit: CircuitBreaker,
    candidate_symbols: Vec<String>,
    control: watch::Receiver<ControlSignal>,
    state: TraderLifecycle,
    last_error: Option<String>,
    tick_index: u64,
    cycle_number: u64,
    call_count: u64,
    started_at_ms: u64,
    last_checkpoint_ms: u64,
}

impl<C: LmClient> TraderScheduler<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trader_id: impl Into<String>,
        cfg: Config,
        venue: Arc<dyn Venue>,
        kline_source: Arc<dyn KlineSource>,
        decision_engine: DecisionEngine<C>,
        journal_dir: impl AsRef<std::path::Path>,
        candidate_symbols: Vec<String>,
        now_ms: u64,
    ) -> std::io::Result<(Self, TraderHandle)> {
        let (tx, rx) = watch::channel(ControlSignal::Run);
        let journal = Journal::open(journal_dir)?;
        let scheduler = Self {
            trader_id: trader_id.into(),
            cfg,
            venue,
            kline_source,
            decision_engine,
            exec_engine: ExecutionEngine::new(),
            journal,
            funding_cache: Arc::new(FundingCache::new()),
            circuit: CircuitBreaker::new(5),
            candidate_symbols,
            control: rx,
            state: TraderLifecycle::Created,
            last_error: None,
            tick_index: 0,
            cycle_number: 0,
            call_count: 0,
            started_at_ms: now_ms,
            last_checkpoint_ms: now_ms,
        };
        Ok((scheduler, TraderHandle { control: tx }))
    }

    pub fn state(&self) -> TraderLifecycle {
        self.state
    }

    /// Recovers journal caches from disk before the first tick, mirroring
    /// `main.rs`'s WAL-recovery step on startup.
    pub fn recover(&mut self) -> std::io::Result<()> {
        self.journal.recover()?;
        json_log(
            "scheduler",
            obj(&[
                ("trader_id", v_str(&self.trader_id)),
                ("event", v_str("recovered")),
                ("open_positions", v_num(self.journal.open_position_count() as f64)),
            ]),
        );
        Ok(())
    }

    /// Runs ticks until a `stop` signal lands or the loop transitions to a
    /// terminal lifecycle state. Each tick sleeps `scan_interval_minutes`
    /// between iterations (§4.7, §5 backpressure: a slow LM call just
    /// absorbs into the next bar).
    pub async fn run(&mut self) {
        self.state = TraderLifecycle::Running;
        let tick_period = std::time::Duration::from_secs(self.cfg.scan_interval_minutes.max(1) * 60);

        loop {
            match *self.control.borrow() {
                ControlSignal::Stop => {
                    self.state = TraderLifecycle::Stopped;
                    json_log("scheduler", obj(&[("trader_id", v_str(&self.trader_id)), ("event", v_str("stopped"))]));
                    return;
                }
                ControlSignal::Pause => {
                    self.state = TraderLifecycle::Paused;
                    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                    continue;
                }
                ControlSignal::Run => {
                    if self.state == TraderLifecycle::Paused {
                        self.state = TraderLifecycle::Running;
                    }
                }
            }

            if let Err(err) = self.tick().await {
                self.last_error = Some(err.to_string());
                json_log(
                    "scheduler",
                    obj(&[
                        ("trader_id", v_str(&self.trader_id)),
                        ("event", v_str("tick_failed")),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
                self.circuit.record_failure();
                if !self.circuit.allow() {
                    self.state = TraderLifecycle::Failed;
                    return;
                }
            } else {
                self.circuit.record_success();
            }

            tokio::time::sleep(tick_period).await;
        }
    }

    /// One decision cycle: steps 1-7 of §4.7. `decision_cadence_bars`
    /// governs whether this tick actually calls the AI or just runs the
    /// post-tick auto-close scan.
    async fn tick(&mut self) -> anyhow::Result<()> {
        self.tick_index += 1;
        let now_ms = crate::logging::ts_epoch_ms();

        let balance = self.venue.balance().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        let positions = self.venue.positions().await.map_err(|e| anyhow::anyhow!("{e}"))?;

        let auto_close_events = self.exec_engine.detect_auto_closes(&*self.venue, &positions, "auto", now_ms).await;
        for event in &auto_close_events {
            if let crate::exec::ExecutionEvent::Closed { outcome } = event {
                json_log(
                    "scheduler",
                    obj(&[
                        ("trader_id", v_str(&self.trader_id)),
                        ("event", v_str("auto_close_detected")),
                        ("symbol", v_str(&outcome.symbol)),
                        ("pnl", v_num(outcome.pnl)),
                    ]),
                );
            }
        }

        if self.tick_index % self.cfg.decision_cadence_bars.max(1) != 0 {
            return Ok(());
        }

        self.cycle_number += 1;
        self.call_count += 1;

        let mut market_data_map: HashMap<String, MarketData> = HashMap::new();
        let mut relevant: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        for c in &self.candidate_symbols {
            if !relevant.contains(c) {
                relevant.push(c.clone());
            }
        }
        for symbol in &relevant {
            let klines = match self.kline_source.fetch(symbol).await {
                Ok(k) => k,
                Err(err) => {
                    json_log(
                        "scheduler",
                        obj(&[("symbol", v_str(symbol)), ("event", v_str("kline_fetch_failed")), ("error", v_str(&err.to_string()))]),
                    );
                    continue;
                }
            };
            let funding = self.funding_cache.get(symbol, now_ms / 1000).unwrap_or(0.0);
            match build_market_data(symbol, &klines.windows(), funding) {
                Ok(md) => {
                    market_data_map.insert(symbol.clone(), md);
                }
                Err(err) => {
                    json_log("scheduler", obj(&[("symbol", v_str(symbol)), ("event", v_str("stale_market_data")), ("error", v_str(&err.to_string()))]));
                }
            }
        }

        let account = Account {
            total_wallet: balance.total_wallet,
            available: balance.available,
            unrealized: balance.unrealized,
            margin_pct: balance.margin_pct,
        };
        let runtime_minutes = now_ms.saturating_sub(self.started_at_ms) / 60_000;
        let ctx = Context {
            current_time: now_ms,
            runtime_minutes,
            call_count: self.call_count,
            account: &account,
            positions: &positions,
            candidate_coins: &self.candidate_symbols,
            prompt_variant: &self.cfg.prompt_variant,
            market_data_map: &market_data_map,
            btc_eth_leverage: self.cfg.btc_eth_leverage,
            altcoin_leverage: self.cfg.altcoin_leverage,
        };

        let full_decision = self.decision_engine.decide(&ctx).await?;

        let mut mark_prices: HashMap<String, f64> = HashMap::new();
        for (symbol, md) in &market_data_map {
            mark_prices.insert(symbol.clone(), md.current_price);
        }

        let events = self
            .exec_engine
            .execute(&*self.venue, full_decision.decisions.clone(), &mark_prices, account.available, &full_decision.prompt_hash, now_ms)
            .await;

        let mut execution_log: Vec<ExecutionLogEntry> = auto_close_events.iter().map(|e| ExecutionLogEntry::from_execution_event(e, "auto")).collect();
        execution_log.extend(events.iter().map(|e| ExecutionLogEntry::from_execution_event(e, &full_decision.prompt_hash)));

        let record = DecisionRecord {
            timestamp: now_ms,
            cycle_number: self.cycle_number,
            exchange: format!("{:?}", self.cfg.exchange),
            system_prompt: full_decision.system_prompt.clone(),
            prompt_hash: full_decision.prompt_hash.clone(),
            input_prompt: full_decision.user_prompt.clone(),
            cot_trace: full_decision.cot_trace.clone(),
            decision_json: json!(full_decision.decisions).to_string(),
            account_state: AccountSnapshot {
                total_wallet: account.total_wallet,
                available: account.available,
                unrealized: account.unrealized,
                margin_pct: account.margin_pct,
            },
            positions: positions
                .iter()
                .map(|p| PositionSnapshot { symbol: p.symbol.clone(), side: p.side, quantity: p.quantity, entry_price: p.entry_price })
                .collect(),
            candidate_coins: self.candidate_symbols.clone(),
            execution_log,
            success: true,
            error_message: None,
            ai_request_duration_ms: full_decision.request_duration_ms,
        };

        self.journal.log_decision(record, now_ms, account.total_wallet)?;

        if now_ms.saturating_sub(self.last_checkpoint_ms) >= 2000
            || (self.cfg.checkpoint_interval_bars > 0 && self.tick_index % self.cfg.checkpoint_interval_bars == 0)
        {
            self.last_checkpoint_ms = now_ms;
            json_log(
                "scheduler",
                obj(&[
                    ("trader_id", v_str(&self.trader_id)),
                    ("event", v_str("checkpoint")),
                    ("cycle_number", v_num(self.cycle_number as f64)),
                    ("equity", v_num(account.total_wallet)),
                ]),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_signal_defaults_to_run() {
        let (_tx, rx) = watch::channel(ControlSignal::Run);
        assert_eq!(*rx.borrow(), ControlSignal::Run);
    }

    #[test]
    fn handle_pause_then_stop_observed_by_receiver() {
        let (tx, rx) = watch::channel(ControlSignal::Run);
        let handle = TraderHandle { control: tx };
        handle.pause();
        assert_eq!(*rx.borrow(), ControlSignal::Pause);
        handle.stop();
        assert_eq!(*rx.borrow(), ControlSignal::Stop);
    }
}
