use crate::backtester::BacktestEngine;
use crate::config::BacktestSettings;
use crate::extractor::SignalExtractor;
use crate::market_data::CandleSeriesProvider;
use crate::messages::{load_messages, MessageWindow};
use crate::models::BacktestResult;
use crate::output::write_json;
use anyhow::{Context, Result};
use log::info;
use std::path::Path;

/// Loads messages within the settings' date range, extracts signals, replays them against
/// `provider` and writes the result as JSON.
pub fn run(
    input: &Path,
    settings: BacktestSettings,
    extractor: &SignalExtractor,
    provider: &dyn CandleSeriesProvider,
    output: Option<&Path>,
) -> Result<BacktestResult> {
    let window = MessageWindow::new(Some(settings.start_date), Some(settings.end_date));
    let messages = load_messages(input, window)?;
    let signals = extractor.extract_all(&messages);
    info!(
        "Replaying {} signals from {} messages using {} market data",
        signals.len(),
        messages.len(),
        provider.name()
    );

    let engine = BacktestEngine::new(settings);
    let result = engine
        .run_with_provider(&signals, provider)
        .context("Backtest run failed")?;

    let performance = &result.performance;
    info!(
        "Trades: {} (won {}, lost {}), win rate {:.1}%, total pnl {:.2}, final balance {:.2}",
        performance.total_trades,
        performance.winning_trades,
        performance.losing_trades,
        performance.win_rate,
        performance.total_pnl,
        performance.final_balance
    );
    for (symbol, stats) in &result.by_symbol {
        info!(
            "  {}: {} trades, win rate {:.1}%, pnl {:.2}",
            symbol, stats.trades, stats.win_rate, stats.total_pnl
        );
    }
    if !result.unresolved.is_empty() {
        info!("{} positions left unresolved", result.unresolved.len());
    }

    write_json(&result, output)?;
    Ok(result)
}
