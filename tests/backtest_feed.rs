//! End-to-end check of the CSV-driven historical feed (§4.8), reading
//! actual rows through `parse_csv_line` rather than constructing `CsvRow`
//! values in-process, since that's the only thing `src/backtest/mod.rs`'s
//! in-module tests don't already exercise.

use perpbot_core::backtest::feed::{parse_csv_line, DeterministicFeed};
use perpbot_core::config::FillPolicy;

const CSV: &str = "\
1000,100.0,101.0,99.0,100.5,10.0,0.0001
1005,100.5,102.0,100.0,101.5,12.0,0.0001
1010,101.5,101.8,99.5,100.0,8.0,-0.0002
";

fn load(symbol: &str) -> DeterministicFeed {
    let mut feed = DeterministicFeed::new();
    let rows: Vec<_> = CSV.lines().filter(|l| !l.trim().is_empty()).map(|l| parse_csv_line(l).unwrap()).collect();
    feed.load(symbol, rows);
    feed
}

#[test]
fn parses_and_loads_every_row_in_order() {
    let feed = load("BTCUSDT");
    assert_eq!(feed.len("BTCUSDT"), 3);
    let (curr, next) = feed.curr_and_next("BTCUSDT", 0).unwrap();
    assert_eq!(curr.ts, 1000);
    assert_eq!(next.unwrap().ts, 1005);
}

#[test]
fn last_bar_has_no_next_open() {
    let feed = load("BTCUSDT");
    let (curr, next) = feed.curr_and_next("BTCUSDT", 2).unwrap();
    assert_eq!(curr.ts, 1010);
    assert!(next.is_none());
}

#[test]
fn rejects_short_rows() {
    assert!(parse_csv_line("1000,100.0,101.0").is_err());
}

#[test]
fn unloaded_symbol_is_empty() {
    let feed = load("BTCUSDT");
    assert!(feed.is_empty("ETHUSDT"));
}

#[test]
fn next_open_policy_fills_at_following_bars_open() {
    let feed = load("BTCUSDT");
    let (curr, next) = feed.curr_and_next("BTCUSDT", 0).unwrap();
    let price = perpbot_core::backtest::feed::resolve_fill_price(FillPolicy::NextOpen, &curr, next.as_ref());
    assert_eq!(price, 100.5);
}
