use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use signal_engine::backtester::BacktestEngine;
use signal_engine::commands::{backtest, export_market_data, parse_messages};
use signal_engine::config::BacktestSettings;
use signal_engine::extractor::SignalExtractor;
use signal_engine::market_data::{
    CandleSeriesProvider, InMemoryCandleProvider, SnapshotCandleProvider,
    SyntheticCandleProvider,
};
use signal_engine::messages::{load_messages, MessageWindow};
use signal_engine::models::{Candle, EntrySpec, ExitReason, SignalAction};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "signal-engine-pipeline-{}-{}",
        name,
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

fn day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
}

fn write_message(dir: &Path, index: usize, hour: i64, text: &str, chat: &str) -> Result<()> {
    let record = serde_json::json!({
        "date": (day() + Duration::hours(hour)).to_rfc3339(),
        "message": text,
        "chat": chat,
    });
    fs::write(
        dir.join(format!("{}_Message_{}.json", chat.replace(' ', "_"), index)),
        serde_json::to_string(&record)?,
    )?;
    Ok(())
}

fn settings() -> BacktestSettings {
    let mut settings = BacktestSettings::new(day(), day() + Duration::hours(23));
    settings.spread_pips = 0.0;
    settings
}

fn flat_candle(hour: i64, low: f64, high: f64, close: f64) -> Candle {
    Candle {
        time: day() + Duration::hours(hour),
        open: close,
        high,
        low,
        close,
        volume: 500.0,
    }
}

#[test]
fn parse_command_extracts_signals_from_message_dump() -> Result<()> {
    ensure_test_env();
    let dir = scratch_dir("parse");
    write_message(&dir, 1, 9, "🟢 BUY XAUUSD now at 2000\nSL 1995\nTP1 2010 TP2 2020", "Gold VIP")?;
    write_message(&dir, 2, 10, "Good morning everyone!", "Gold VIP")?;
    write_message(&dir, 3, 11, "Close gold now ✅", "Gold VIP")?;
    let output = dir.join("out").join("signals.json");

    let signals = parse_messages::run(
        &dir,
        MessageWindow::default(),
        &SignalExtractor::default(),
        Some(&output),
        false,
    )?;

    assert_eq!(signals.len(), 2);
    let entry = &signals[0];
    assert_eq!(entry.action, Some(SignalAction::Buy));
    assert_eq!(entry.entry, EntrySpec::Price(2000.0));
    assert_eq!(entry.stop_loss, Some(1995.0));
    assert_eq!(entry.take_profits.len(), 2);
    assert_eq!(entry.channel, "Gold VIP");
    assert!(signals[1].is_close_instruction());

    let written: Value = serde_json::from_str(&fs::read_to_string(&output)?)?;
    let written = written.as_array().expect("signal array");
    assert_eq!(written.len(), 2);
    assert_eq!(written[0]["stopLoss"], 1995.0);
    assert_eq!(written[0]["takeProfits"][1]["label"], "TP2");

    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn extracted_signal_replays_to_take_profit() -> Result<()> {
    ensure_test_env();
    let dir = scratch_dir("replay");
    write_message(&dir, 1, 0, "BUY XAUUSD SL 1995 TP 2010", "alerts")?;
    let messages = load_messages(&dir, MessageWindow::default())?;
    let signals = SignalExtractor::default().extract_all(&messages);
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].entry, EntrySpec::Market);

    let provider = InMemoryCandleProvider::new().with_series(
        "XAUUSD",
        vec![
            flat_candle(0, 1999.0, 2001.0, 2000.0),
            flat_candle(1, 1996.0, 2010.0, 2005.0),
        ],
    );
    let result = BacktestEngine::new(settings()).run_with_provider(&signals, &provider)?;

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
    assert_eq!(trade.exit_price, 2010.0);
    assert_eq!(trade.entry_price, 2000.0);
    assert!((trade.pnl - 1000.0).abs() < 1e-6);
    assert_eq!(result.performance.winning_trades, 1);
    assert_eq!(result.max_drawdown(), 0.0);
    assert_eq!(result.total_duration(), Duration::hours(23));

    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn unknown_symbol_signals_are_skipped_without_aborting() -> Result<()> {
    ensure_test_env();
    let dir = scratch_dir("unknown");
    write_message(&dir, 1, 2, "SELL EURUSD 1.1000", "alerts")?;
    write_message(&dir, 2, 3, "BUY XAUUSD", "alerts")?;
    let messages = load_messages(&dir, MessageWindow::default())?;
    let signals = SignalExtractor::default().extract_all(&messages);

    let provider = InMemoryCandleProvider::new()
        .with_series("XAUUSD", vec![flat_candle(3, 1999.0, 2001.0, 2000.0)]);
    let result = BacktestEngine::new(settings()).run_with_provider(&signals, &provider)?;

    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].symbol, "XAUUSD");
    assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfPeriod);
    assert_eq!(result.skipped_signals.len(), 1);
    assert_eq!(result.skipped_signals[0].signal_index, 0);

    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn snapshot_export_feeds_backtest_command() -> Result<()> {
    ensure_test_env();
    let dir = scratch_dir("snapshot");
    write_message(&dir, 1, 1, "BUY GOLD", "alerts")?;
    write_message(&dir, 2, 2, "SELL EURUSD", "alerts")?;
    write_message(&dir, 3, 6, "Close gold", "alerts")?;

    let snapshot_path = dir.join("data").join("market-data.bin");
    let symbols = vec!["XAUUSD".to_string(), "EURUSD".to_string()];
    let synthetic = SyntheticCandleProvider::new(5);
    export_market_data::run(
        &synthetic,
        &symbols,
        day(),
        day() + Duration::hours(23),
        &snapshot_path,
    )?;
    let snapshot = SnapshotCandleProvider::load_from_file(&snapshot_path)?;
    assert_eq!(
        snapshot.candles("XAUUSD", day(), day() + Duration::hours(23))?,
        synthetic.candles("XAUUSD", day(), day() + Duration::hours(23))?
    );

    let output = dir.join("result.json");
    let result = backtest::run(
        &dir,
        settings(),
        &SignalExtractor::default(),
        &snapshot,
        Some(&output),
    )?;
    assert_eq!(result.trades.len(), 2);
    let gold = result
        .trades
        .iter()
        .find(|trade| trade.symbol == "XAUUSD")
        .expect("gold trade");
    assert!(matches!(
        gold.exit_reason,
        ExitReason::ManualClose | ExitReason::StopLoss | ExitReason::TakeProfit
    ));
    assert!(result.unresolved.is_empty());

    let again = backtest::run(
        &dir,
        settings(),
        &SignalExtractor::default(),
        &snapshot,
        None,
    )?;
    assert_eq!(result, again);

    let written: Value = serde_json::from_str(&fs::read_to_string(&output)?)?;
    assert_eq!(written["performance"]["totalTrades"], 2);
    assert_eq!(written["trades"].as_array().map(Vec::len), Some(2));

    fs::remove_dir_all(&dir)?;
    Ok(())
}
