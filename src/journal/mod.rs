//! C6 — decision journal & performance cache (§4.6). One store per trader on
//! a POSIX 0700 directory; decision records are 0600 files. Recovery on
//! startup replays recent records the same way `reliability/wal.rs` replays
//! WAL entries, rebuilding the in-memory caches instead of trusting them to
//! have survived a restart.

use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::exec::{ExecutionEvent, TradeOutcome};
use crate::venue::{Position, Side};

const TRADE_CACHE_CAP: usize = 100;
const EQUITY_CACHE_CAP: usize = 200;
const INITIAL_SCAN_CYCLES: usize = 10_000;
const AI_ANALYSIS_SAMPLE_SIZE: usize = 100;
const NOMINAL_EQUITY_BASE: f64 = 10_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: u64,
    pub cycle_number: u64,
    pub exchange: String,
    pub system_prompt: String,
    pub prompt_hash: String,
    pub input_prompt: String,
    pub cot_trace: String,
    pub decision_json: String,
    pub account_state: AccountSnapshot,
    pub positions: Vec<PositionSnapshot>,
    pub candidate_coins: Vec<String>,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub success: bool,
    pub error_message: Option<String>,
    pub ai_request_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub total_wallet: f64,
    pub available: f64,
    pub unrealized: f64,
    pub margin_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
}

/// Serialisable trace of what the execution engine actually did this cycle;
/// the journal replays these on recovery rather than re-deriving them from
/// raw decisions, so a crash mid-cycle never double-executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ExecutionLogEntry {
    Opened { symbol: String, side: Side, entry_price: f64, quantity: f64, leverage: u32, open_time: u64 },
    Closed {
        symbol: String,
        side: Side,
        quantity: f64,
        leverage: u32,
        open_price: f64,
        close_price: f64,
        position_value: f64,
        margin_used: f64,
        pnl: f64,
        pnl_pct: f64,
        duration_secs: u64,
        open_time: u64,
        close_time: u64,
        was_stop_loss: bool,
        prompt_hash: String,
    },
    PartiallyClosed { symbol: String, side: Side, closed_qty: f64, close_price: f64, fragment_pnl: f64, prompt_hash: String },
    Skipped { symbol: String, reason: String },
}

/// Below this residual quantity, a partially closed position is treated as
/// fully closed for aggregation purposes (floating point dust from repeated
/// fragment subtraction, not a real open remainder).
const RESIDUAL_EPSILON_QTY: f64 = 1e-9;

impl ExecutionLogEntry {
    pub fn from_trade_outcome(o: &TradeOutcome) -> Self {
        ExecutionLogEntry::Closed {
            symbol: o.symbol.clone(),
            side: o.side,
            quantity: o.quantity,
            leverage: o.leverage,
            open_price: o.open_price,
            close_price: o.close_price,
            position_value: o.position_value,
            margin_used: o.margin_used,
            pnl: o.pnl,
            pnl_pct: o.pnl_pct,
            duration_secs: o.duration_secs,
            open_time: o.open_time,
            close_time: o.close_time,
            was_stop_loss: o.was_stop_loss,
            prompt_hash: o.prompt_hash.clone(),
        }
    }

    /// Converts one engine-side event into the journal's log shape.
    /// `prompt_hash` is threaded in separately because `ExecutionEvent`
    /// itself is venue-facing and does not carry it.
    pub fn from_execution_event(event: &ExecutionEvent, prompt_hash: &str) -> Self {
        match event {
            ExecutionEvent::Opened { symbol, side, entry_price, quantity, leverage, open_time } => ExecutionLogEntry::Opened {
                symbol: symbol.clone(),
                side: *side,
                entry_price: *entry_price,
                quantity: *quantity,
                leverage: *leverage,
                open_time: *open_time,
            },
            ExecutionEvent::Closed { outcome } => ExecutionLogEntry::from_trade_outcome(outcome),
            ExecutionEvent::PartiallyClosed { symbol, side, closed_qty, close_price, fragment_pnl } => ExecutionLogEntry::PartiallyClosed {
                symbol: symbol.clone(),
                side: *side,
                closed_qty: *closed_qty,
                close_price: *close_price,
                fragment_pnl: *fragment_pnl,
                prompt_hash: prompt_hash.to_string(),
            },
            ExecutionEvent::StopLossUpdated { symbol, .. } | ExecutionEvent::TakeProfitUpdated { symbol, .. } => {
                ExecutionLogEntry::Skipped { symbol: symbol.clone(), reason: "order_update_not_logged".into() }
            }
            ExecutionEvent::Skipped { symbol, reason } => ExecutionLogEntry::Skipped { symbol: symbol.clone(), reason: reason.clone() },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ShadowPosition {
    entry_price: f64,
    quantity: f64,
    original_quantity: f64,
    leverage: u32,
    open_time: u64,
    /// Realised PnL from fragments already closed by prior `partial_close`
    /// actions on this position (§9: the journal's active maintenance owns
    /// aggregation, rather than splitting it with a recovery scan path).
    accumulated_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: u64,
    pub equity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceAnalysis {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub recent_trades: Vec<TradeOutcome>,
    pub symbol_stats: std::collections::HashMap<String, f64>,
    pub best_symbol: Option<String>,
    pub worst_symbol: Option<String>,
}

pub struct Journal {
    dir: PathBuf,
    open_positions: std::collections::HashMap<(String, Side), ShadowPosition>,
    trades: VecDeque<TradeOutcome>,
    equity: VecDeque<EquityPoint>,
    seen_trade_keys: HashSet<(String, Side, u64, u64)>,
}

impl Journal {
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        set_dir_mode(&dir, 0o700)?;
        Ok(Self {
            dir,
            open_positions: std::collections::HashMap::new(),
            trades: VecDeque::new(),
            equity: VecDeque::new(),
            seen_trade_keys: HashSet::new(),
        })
    }

    /// Writes the record to disk, then performs active cache maintenance:
    /// applies each execution log entry's open/close transition to the
    /// in-memory shadow, pushing a `TradeOutcome`/`EquityPoint` on close.
    pub fn log_decision(&mut self, mut record: DecisionRecord, now_ts: u64, now_equity: f64) -> std::io::Result<()> {
        record.timestamp = now_ts;
        let filename = format!(
            "decision_{}_cycle{}.json",
            chrono::DateTime::from_timestamp(record.timestamp as i64, 0)
                .map(|d| d.format("%Y%m%d_%H%M%S").to_string())
                .unwrap_or_else(|| record.timestamp.to_string()),
            record.cycle_number
        );
        let path = self.dir.join(filename);
        let body = serde_json::to_string_pretty(&record)?;
        write_with_mode(&path, &body, 0o600)?;

        self.apply_execution_log(&record.execution_log, record.timestamp);
        self.push_equity_point(record.timestamp, now_equity);

        Ok(())
    }

    /// Partial closes are aggregated here, not deferred to a recovery scan:
    /// each fragment's realised PnL accumulates onto the shadow position,
    /// and a `TradeOutcome` is only pushed once the residual quantity
    /// reaches ~0 (§9 — a single authoritative code path for aggregation).
    fn apply_execution_log(&mut self, entries: &[ExecutionLogEntry], now_ts: u64) {
        for entry in entries {
            match entry {
                ExecutionLogEntry::Opened { symbol, side, entry_price, quantity, leverage, open_time } => {
                    self.open_positions.insert(
                        (symbol.clone(), *side),
                        ShadowPosition {
                            entry_price: *entry_price,
                            quantity: *quantity,
                            original_quantity: *quantity,
                            leverage: *leverage,
                            open_time: *open_time,
                            accumulated_pnl: 0.0,
                        },
                    );
                }
                ExecutionLogEntry::Closed {
                    symbol,
                    side,
                    quantity,
                    leverage,
                    open_price,
                    close_price,
                    position_value,
                    margin_used,
                    pnl,
                    pnl_pct,
                    duration_secs,
                    open_time,
                    close_time,
                    was_stop_loss,
                    prompt_hash,
                } => {
                    let shadow = self.open_positions.remove(&(symbol.clone(), *side));
                    let total_pnl = pnl + shadow.as_ref().map(|s| s.accumulated_pnl).unwrap_or(0.0);
                    let effective_open_time = shadow.as_ref().map(|s| s.open_time).unwrap_or(*open_time);
                    let effective_quantity = shadow.as_ref().map(|s| s.original_quantity).unwrap_or(*quantity);

                    let key = (symbol.clone(), *side, effective_open_time, *close_time);
                    if self.seen_trade_keys.contains(&key) {
                        continue;
                    }
                    self.seen_trade_keys.insert(key);
                    self.push_trade(TradeOutcome {
                        symbol: symbol.clone(),
                        side: *side,
                        quantity: effective_quantity,
                        leverage: *leverage,
                        open_price: *open_price,
                        close_price: *close_price,
                        position_value: *position_value,
                        margin_used: *margin_used,
                        pnl: total_pnl,
                        pnl_pct: *pnl_pct,
                        duration_secs: *duration_secs,
                        open_time: effective_open_time,
                        close_time: *close_time,
                        was_stop_loss: *was_stop_loss,
                        prompt_hash: prompt_hash.clone(),
                    });
                }
                ExecutionLogEntry::PartiallyClosed { symbol, side, closed_qty, close_price, fragment_pnl, prompt_hash } => {
                    let key = (symbol.clone(), *side);
                    let Some(shadow) = self.open_positions.get_mut(&key) else { continue };
                    shadow.quantity -= closed_qty;
                    shadow.accumulated_pnl += fragment_pnl;

                    if shadow.quantity <= RESIDUAL_EPSILON_QTY {
                        let shadow = self.open_positions.remove(&key).unwrap();
                        let dedup_key = (symbol.clone(), *side, shadow.open_time, now_ts);
                        if self.seen_trade_keys.contains(&dedup_key) {
                            continue;
                        }
                        self.seen_trade_keys.insert(dedup_key);
                        let margin_used = Position::compute_margin(shadow.original_quantity, shadow.entry_price, shadow.leverage);
                        self.push_trade(TradeOutcome {
                            symbol: symbol.clone(),
                            side: *side,
                            quantity: shadow.original_quantity,
                            leverage: shadow.leverage,
                            open_price: shadow.entry_price,
                            close_price: *close_price,
                            position_value: shadow.original_quantity * shadow.entry_price,
                            margin_used,
                            pnl: shadow.accumulated_pnl,
                            pnl_pct: if margin_used > 0.0 { shadow.accumulated_pnl / margin_used * 100.0 } else { 0.0 },
                            duration_secs: now_ts.saturating_sub(shadow.open_time) / 1000,
                            open_time: shadow.open_time,
                            close_time: now_ts,
                            was_stop_loss: false,
                            prompt_hash: prompt_hash.clone(),
                        });
                    }
                }
                ExecutionLogEntry::Skipped { .. } => {}
            }
        }
    }

    fn push_trade(&mut self, outcome: TradeOutcome) {
        self.trades.push_front(outcome);
        while self.trades.len() > TRADE_CACHE_CAP {
            self.trades.pop_back();
        }
    }

    fn push_equity_point(&mut self, timestamp: u64, equity: f64) {
        self.equity.push_front(EquityPoint { timestamp, equity });
        while self.equity.len() > EQUITY_CACHE_CAP {
            self.equity.pop_back();
        }
    }

    /// Rebuilds `open_positions` and the trades cache from up to
    /// `InitialScanCycles` of the most recent decision files, so a restart
    /// neither re-ingests duplicates nor loses unmatched open positions.
    pub fn recover(&mut self) -> std::io::Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        files.sort();
        if files.len() > INITIAL_SCAN_CYCLES {
            let skip = files.len() - INITIAL_SCAN_CYCLES;
            files = files.split_off(skip);
        }

        for path in files {
            let body = fs::read_to_string(&path)?;
            let record: DecisionRecord = match serde_json::from_str(&body) {
                Ok(r) => r,
                Err(_) => continue,
            };
            self.apply_execution_log(&record.execution_log, record.timestamp);
        }

        Ok(())
    }

    /// Computes performance metrics from the most recent `AIAnalysisSampleSize`
    /// cached trades, optionally filtered to the newest entry's prompt_hash,
    /// truncating the returned `recent_trades` list to `trade_limit`. The
    /// returned statistics are derived from the same filtered set (§4.6).
    pub fn get_performance_with_cache(&self, trade_limit: usize, filter_by_prompt: bool) -> PerformanceAnalysis {
        let sample: Vec<&TradeOutcome> = self.trades.iter().take(AI_ANALYSIS_SAMPLE_SIZE).collect();

        let filtered: Vec<&TradeOutcome> = if filter_by_prompt {
            match sample.first().map(|t| t.prompt_hash.clone()) {
                Some(hash) => sample.into_iter().filter(|t| t.prompt_hash == hash).collect(),
                None => sample,
            }
        } else {
            sample
        };

        let total_trades = filtered.len();
        let wins: Vec<&&TradeOutcome> = filtered.iter().filter(|t| t.pnl > 0.0).collect();
        let losses: Vec<&&TradeOutcome> = filtered.iter().filter(|t| t.pnl <= 0.0).collect();
        let winning_trades = wins.len();
        let losing_trades = losses.len();
        let win_rate = if total_trades > 0 { winning_trades as f64 / total_trades as f64 } else { 0.0 };
        let avg_win = if !wins.is_empty() { wins.iter().map(|t| t.pnl).sum::<f64>() / wins.len() as f64 } else { 0.0 };
        let avg_loss = if !losses.is_empty() { losses.iter().map(|t| t.pnl).sum::<f64>() / losses.len() as f64 } else { 0.0 };
        let sum_win: f64 = wins.iter().map(|t| t.pnl).sum();
        let sum_loss: f64 = losses.iter().map(|t| t.pnl).sum::<f64>().abs();
        let profit_factor = if sum_loss > 0.0 { sum_win / sum_loss } else if sum_win > 0.0 { 999.0 } else { 0.0 };

        let mut symbol_stats: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for t in &filtered {
            *symbol_stats.entry(t.symbol.clone()).or_insert(0.0) += t.pnl;
        }
        let best_symbol = symbol_stats.iter().max_by(|a, b| a.1.partial_cmp(b.1).unwrap()).map(|(k, _)| k.clone());
        let worst_symbol = symbol_stats.iter().min_by(|a, b| a.1.partial_cmp(b.1).unwrap()).map(|(k, _)| k.clone());

        let sharpe_ratio = sharpe_from_trades(&filtered);

        let recent_trades: Vec<TradeOutcome> = filtered.into_iter().take(trade_limit).cloned().collect();

        PerformanceAnalysis {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
            sharpe_ratio,
            recent_trades,
            symbol_stats,
            best_symbol,
            worst_symbol,
        }
    }

    pub fn open_position_count(&self) -> usize {
        self.open_positions.len()
    }

    pub fn shadow_positions(&self) -> Vec<Position> {
        self.open_positions
            .iter()
            .map(|((symbol, side), p)| Position {
                symbol: symbol.clone(),
                side: *side,
                quantity: p.quantity,
                entry_price: p.entry_price,
                leverage: p.leverage,
                margin: Position::compute_margin(p.quantity, p.entry_price, p.leverage),
                stop_loss: None,
                take_profit: None,
                liquidation_price: 0.0,
                open_time: p.open_time,
            })
            .collect()
    }
}

/// Reconstructs a nominal equity path from `NOMINAL_EQUITY_BASE` and computes
/// `sharpe = mean(r) / stddev(r)` over per-trade returns; a degenerate
/// (zero) standard deviation returns `±999` signed by the mean (§4.6).
fn sharpe_from_trades(trades: &[&TradeOutcome]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let mut equity = NOMINAL_EQUITY_BASE;
    let mut returns = Vec::with_capacity(trades.len());
    for t in trades.iter().rev() {
        let prev = equity;
        equity += t.pnl;
        if prev > 0.0 {
            returns.push((equity - prev) / prev);
        }
    }
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std = variance.sqrt();
    if std <= 1e-12 {
        return if mean >= 0.0 { 999.0 } else { -999.0 };
    }
    mean / std
}

fn write_with_mode(path: &Path, body: &str, mode: u32) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(body.as_bytes())?;
    set_file_mode(path, mode)?;
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}
#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_dir_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}
#[cfg(not(unix))]
fn set_dir_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::Side;

    fn sample_outcome(symbol: &str, pnl: f64, open_time: u64, close_time: u64) -> TradeOutcome {
        TradeOutcome {
            symbol: symbol.to_string(),
            side: Side::Long,
            quantity: 1.0,
            leverage: 5,
            open_price: 100.0,
            close_price: 100.0 + pnl,
            position_value: 100.0,
            margin_used: 20.0,
            pnl,
            pnl_pct: pnl / 20.0 * 100.0,
            duration_secs: close_time - open_time,
            open_time,
            close_time,
            was_stop_loss: false,
            prompt_hash: "h1".to_string(),
        }
    }

    #[test]
    fn log_decision_writes_0600_file_and_updates_caches() {
        let tmp = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(tmp.path()).unwrap();

        let record = DecisionRecord {
            timestamp: 1_700_000_000,
            cycle_number: 1,
            exchange: "binance".into(),
            system_prompt: "sp".into(),
            prompt_hash: "h1".into(),
            input_prompt: "up".into(),
            cot_trace: "trace".into(),
            decision_json: "[]".into(),
            account_state: AccountSnapshot { total_wallet: 1000.0, available: 900.0, unrealized: 0.0, margin_pct: 0.1 },
            positions: vec![],
            candidate_coins: vec!["BTCUSDT".into()],
            execution_log: vec![ExecutionLogEntry::Closed {
                symbol: "BTCUSDT".into(),
                side: Side::Long,
                quantity: 1.0,
                leverage: 5,
                open_price: 100.0,
                close_price: 110.0,
                position_value: 100.0,
                margin_used: 20.0,
                pnl: 10.0,
                pnl_pct: 50.0,
                duration_secs: 100,
                open_time: 0,
                close_time: 100,
                was_stop_loss: false,
                prompt_hash: "h1".into(),
            }],
            success: true,
            error_message: None,
            ai_request_duration_ms: 500,
        };

        journal.log_decision(record, 1_700_000_000, 1010.0).unwrap();
        assert_eq!(journal.trades.len(), 1);
        assert_eq!(journal.equity.len(), 1);

        let files: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(files[0].as_ref().unwrap().path()).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn performance_profit_factor_is_999_with_no_losses() {
        let tmp = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(tmp.path()).unwrap();
        journal.push_trade(sample_outcome("BTCUSDT", 10.0, 0, 100));
        journal.push_trade(sample_outcome("BTCUSDT", 5.0, 100, 200));

        let perf = journal.get_performance_with_cache(10, false);
        assert_eq!(perf.profit_factor, 999.0);
        assert_eq!(perf.winning_trades, 2);
        assert_eq!(perf.losing_trades, 0);
    }

    #[test]
    fn trade_cache_is_capped_and_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(tmp.path()).unwrap();
        for i in 0..(TRADE_CACHE_CAP + 10) {
            journal.push_trade(sample_outcome("BTCUSDT", 1.0, i as u64, i as u64 + 1));
        }
        assert_eq!(journal.trades.len(), TRADE_CACHE_CAP);
        assert_eq!(journal.trades.front().unwrap().open_time, (TRADE_CACHE_CAP + 9) as u64);
    }

    #[test]
    fn dedup_prevents_duplicate_trade_on_replay() {
        let tmp = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(tmp.path()).unwrap();
        let entries = vec![ExecutionLogEntry::Closed {
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            quantity: 1.0,
            leverage: 5,
            open_price: 100.0,
            close_price: 110.0,
            position_value: 100.0,
            margin_used: 20.0,
            pnl: 10.0,
            pnl_pct: 50.0,
            duration_secs: 100,
            open_time: 0,
            close_time: 100,
            was_stop_loss: false,
            prompt_hash: "h1".into(),
        }];
        journal.apply_execution_log(&entries, 100);
        journal.apply_execution_log(&entries, 100);
        assert_eq!(journal.trades.len(), 1);
    }

    #[test]
    fn partial_closes_aggregate_into_one_trade_on_final_fragment() {
        let tmp = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(tmp.path()).unwrap();
        journal.apply_execution_log(
            &[ExecutionLogEntry::Opened { symbol: "BTCUSDT".into(), side: Side::Long, entry_price: 100.0, quantity: 2.0, leverage: 5, open_time: 0 }],
            0,
        );
        journal.apply_execution_log(
            &[ExecutionLogEntry::PartiallyClosed {
                symbol: "BTCUSDT".into(),
                side: Side::Long,
                closed_qty: 1.0,
                close_price: 105.0,
                fragment_pnl: 5.0,
                prompt_hash: "h1".into(),
            }],
            50,
        );
        assert_eq!(journal.trades.len(), 0);
        assert_eq!(journal.open_positions.len(), 1);

        journal.apply_execution_log(
            &[ExecutionLogEntry::PartiallyClosed {
                symbol: "BTCUSDT".into(),
                side: Side::Long,
                closed_qty: 1.0,
                close_price: 110.0,
                fragment_pnl: 10.0,
                prompt_hash: "h1".into(),
            }],
            100,
        );
        assert_eq!(journal.trades.len(), 1);
        let trade = journal.trades.front().unwrap();
        assert!((trade.pnl - 15.0).abs() < 1e-9);
        assert!((trade.quantity - 2.0).abs() < 1e-9);
        assert!(journal.open_positions.is_empty());
    }
}
