use crate::config::{BacktestSettings, SettingsError};
use crate::market_data::{CandleBook, CandleSeriesProvider};
use crate::models::{
    BacktestResult, Candle, Direction, ExitReason, ParsedSignal, Position, SignalAction,
    SignalSkip, SkipReason, Trade,
};
use crate::performance::PerformanceCalculator;
use crate::symbols::pip_value;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use thiserror::Error;

/// Scales a price difference into the reported PnL unit.
pub const PNL_MULTIPLIER: f64 = 100.0;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("invalid backtest settings: {0}")]
    InvalidSettings(#[from] SettingsError),
}

/// Replays an ordered signal stream against candle series.
pub struct BacktestEngine {
    settings: BacktestSettings,
}

impl BacktestEngine {
    pub fn new(settings: BacktestSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BacktestSettings {
        &self.settings
    }

    /// Distinct symbols of the signals that pass the date and filter checks.
    pub fn required_symbols(&self, signals: &[ParsedSignal]) -> Vec<String> {
        signals
            .iter()
            .filter(|signal| self.in_window(signal.timestamp))
            .filter(|signal| self.settings.accepts_channel(&signal.channel))
            .filter_map(|signal| signal.symbol.as_deref())
            .filter(|symbol| self.settings.accepts_symbol(symbol))
            .map(|symbol| symbol.to_ascii_uppercase())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Loads the needed series from `provider` in parallel, then runs the simulation.
    pub fn run_with_provider(
        &self,
        signals: &[ParsedSignal],
        provider: &dyn CandleSeriesProvider,
    ) -> Result<BacktestResult, BacktestError> {
        self.settings.validate()?;
        let symbols = self.required_symbols(signals);
        let book = CandleBook::load(
            provider,
            &symbols,
            self.settings.start_date,
            self.settings.end_date,
        );
        self.run(signals, &book)
    }

    /// Runs the simulation over `signals` in the given order.
    pub fn run(
        &self,
        signals: &[ParsedSignal],
        book: &CandleBook,
    ) -> Result<BacktestResult, BacktestError> {
        self.settings.validate()?;
        info!(
            "Backtesting {} signals from {} to {}",
            signals.len(),
            self.settings.start_date,
            self.settings.end_date
        );

        let mut run = SimulationRun::new(&self.settings, book);
        for (index, signal) in signals.iter().enumerate() {
            run.process_signal(index, signal);
        }
        Ok(run.finish())
    }

    fn in_window(&self, at: DateTime<Utc>) -> bool {
        at >= self.settings.start_date && at <= self.settings.end_date
    }
}

/// PnL of a closed trade: price difference in the trade's favour, less the spread, scaled,
/// less the flat commission.
pub fn trade_pnl(
    direction: Direction,
    symbol: &str,
    entry_price: f64,
    exit_price: f64,
    spread_pips: f64,
    commission: f64,
) -> f64 {
    let mut diff = match direction {
        Direction::Long => exit_price - entry_price,
        Direction::Short => entry_price - exit_price,
    };
    diff -= spread_pips * pip_value(symbol);
    diff * PNL_MULTIPLIER - commission
}

/// Exit triggered by `candle`, if any. The stop wins when both levels are inside the range.
pub fn exit_trigger(position: &Position, candle: &Candle) -> Option<(f64, ExitReason)> {
    let (stop_hit, target_hit) = match position.direction {
        Direction::Long => (
            position.stop_loss.is_some_and(|stop| candle.low <= stop),
            position.take_profit.is_some_and(|target| candle.high >= target),
        ),
        Direction::Short => (
            position.stop_loss.is_some_and(|stop| candle.high >= stop),
            position.take_profit.is_some_and(|target| candle.low <= target),
        ),
    };

    match (stop_hit, target_hit) {
        (true, _) => position.stop_loss.map(|stop| (stop, ExitReason::StopLoss)),
        (false, true) => position
            .take_profit
            .map(|target| (target, ExitReason::TakeProfit)),
        (false, false) => None,
    }
}

/// Mutable state of a single run.
struct SimulationRun<'a> {
    settings: &'a BacktestSettings,
    book: &'a CandleBook,
    open: Vec<Position>,
    trades: Vec<Trade>,
    skipped: Vec<SignalSkip>,
    next_trade_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
    warned_unordered: bool,
}

impl<'a> SimulationRun<'a> {
    fn new(settings: &'a BacktestSettings, book: &'a CandleBook) -> Self {
        Self {
            settings,
            book,
            open: Vec::new(),
            trades: Vec::new(),
            skipped: Vec::new(),
            next_trade_id: 1,
            last_timestamp: None,
            warned_unordered: false,
        }
    }

    fn process_signal(&mut self, index: usize, signal: &ParsedSignal) {
        self.note_order(signal.timestamp);

        let settings = self.settings;
        if signal.timestamp < settings.start_date || signal.timestamp > settings.end_date {
            return self.skip(index, SkipReason::OutsideDateRange);
        }
        let Some(symbol) = signal.symbol.as_deref() else {
            return self.skip(index, SkipReason::MissingSymbol);
        };
        if !settings.accepts_symbol(symbol) {
            return self.skip(index, SkipReason::SymbolFiltered);
        }
        if !settings.accepts_channel(&signal.channel) {
            return self.skip(index, SkipReason::ChannelFiltered);
        }
        let book = self.book;
        let (Some(series), Some(reference)) = (
            book.series(symbol),
            book.reference_index(symbol, signal.timestamp),
        ) else {
            return self.skip(index, SkipReason::NoPriceData);
        };
        let reference_candle = &series[reference];

        self.advance_positions(signal.timestamp, false);

        match signal.action {
            Some(action) if self.open.len() < settings.max_open_trades => {
                self.open_position(index, signal, action, symbol, reference, reference_candle);
            }
            Some(_) => {
                debug!(
                    "Signal {} skipped: {} trades already open",
                    index,
                    self.open.len()
                );
                self.skip(index, SkipReason::MaxOpenTrades);
            }
            None if signal.is_close_instruction() => {
                let closed = self.close_symbol(symbol, reference_candle.close, signal.timestamp);
                if closed == 0 {
                    self.skip(index, SkipReason::NothingToDo);
                }
            }
            None => self.skip(index, SkipReason::NothingToDo),
        }

        self.advance_positions(signal.timestamp, true);
    }

    fn open_position(
        &mut self,
        index: usize,
        signal: &ParsedSignal,
        action: SignalAction,
        symbol: &str,
        reference: usize,
        reference_candle: &Candle,
    ) {
        let settings = self.settings;
        let entry_price = signal.entry.price().unwrap_or(reference_candle.close);
        let stop_loss = signal
            .stop_loss
            .filter(|stop| settings.use_stop_loss && stop.is_finite() && *stop > 0.0);
        let take_profit = signal
            .first_take_profit()
            .filter(|target| settings.use_take_profit && target.is_finite() && *target > 0.0);

        let position = Position {
            id: self.next_trade_id,
            symbol: symbol.to_ascii_uppercase(),
            direction: action.direction(),
            entry_price,
            entry_time: signal.timestamp,
            stop_loss,
            take_profit,
            channel: signal.channel.clone(),
            signal_index: index,
            next_candle: reference,
        };
        self.next_trade_id += 1;

        debug!(
            "Opened #{} {} {} at {} (sl {:?}, tp {:?})",
            position.id,
            action,
            position.symbol,
            entry_price,
            stop_loss,
            take_profit
        );
        self.open.push(position);
    }

    /// Closes every open position on `symbol`; returns how many were closed.
    fn close_symbol(&mut self, symbol: &str, price: f64, at: DateTime<Utc>) -> usize {
        let (matching, rest): (Vec<Position>, Vec<Position>) = std::mem::take(&mut self.open)
            .into_iter()
            .partition(|position| position.symbol.eq_ignore_ascii_case(symbol));
        self.open = rest;

        let closed = matching.len();
        for position in matching {
            self.close(position, price, at, ExitReason::ManualClose);
        }
        closed
    }

    /// Checks every open position against the candles of its own series up to `at`. The
    /// candle at `at` itself is only included when `include_reference` is set.
    fn advance_positions(&mut self, at: DateTime<Utc>, include_reference: bool) {
        let book = self.book;
        for mut position in std::mem::take(&mut self.open) {
            let Some(series) = book.series(&position.symbol) else {
                self.open.push(position);
                continue;
            };
            let mut upto = series.partition_point(|candle| candle.time <= at);
            if !include_reference {
                upto = upto.saturating_sub(1);
            }

            let mut exit = None;
            while position.next_candle < upto {
                let candle = &series[position.next_candle];
                position.next_candle += 1;
                if let Some((price, reason)) = exit_trigger(&position, candle) {
                    exit = Some((price, candle.time, reason));
                    break;
                }
            }

            match exit {
                Some((price, time, reason)) => self.close(position, price, time, reason),
                None => self.open.push(position),
            }
        }
    }

    fn close(&mut self, position: Position, price: f64, at: DateTime<Utc>, reason: ExitReason) {
        let pnl = trade_pnl(
            position.direction,
            &position.symbol,
            position.entry_price,
            price,
            self.settings.spread_pips,
            self.settings.commission,
        );
        debug!(
            "Closed #{} {} at {} ({}) pnl {:.2}",
            position.id,
            position.symbol,
            price,
            reason.as_str(),
            pnl
        );
        self.trades.push(position.close(price, at, reason, pnl));
    }

    fn skip(&mut self, signal_index: usize, reason: SkipReason) {
        self.skipped.push(SignalSkip {
            signal_index,
            reason,
        });
    }

    fn note_order(&mut self, at: DateTime<Utc>) {
        if let Some(last) = self.last_timestamp {
            if at < last && !self.warned_unordered {
                warn!(
                    "Signals are not in timestamp order ({} after {}); processing as given",
                    at, last
                );
                self.warned_unordered = true;
            }
        }
        self.last_timestamp = Some(at);
    }

    fn finish(mut self) -> BacktestResult {
        let settings = self.settings;
        let end = settings.end_date;
        self.advance_positions(end, true);

        let book = self.book;
        let mut unresolved = Vec::new();
        for position in std::mem::take(&mut self.open) {
            let last_candle = book.series(&position.symbol).and_then(|series| {
                series
                    .partition_point(|candle| candle.time <= end)
                    .checked_sub(1)
                    .map(|idx| &series[idx])
            });
            match last_candle {
                Some(candle) => {
                    self.close(position, candle.close, candle.time, ExitReason::EndOfPeriod)
                }
                None => {
                    warn!(
                        "Trade #{} on {} left unresolved: no candle data",
                        position.id, position.symbol
                    );
                    unresolved.push(position);
                }
            }
        }

        let performance =
            PerformanceCalculator::calculate_performance(&self.trades, settings.initial_balance);
        let by_symbol = PerformanceCalculator::breakdown_by_symbol(&self.trades);
        info!(
            "Backtest finished: {} trades, {} skipped signals, total pnl {:.2}, max drawdown {:.2}%",
            performance.total_trades,
            self.skipped.len(),
            performance.total_pnl,
            performance.max_drawdown
        );

        BacktestResult {
            start_date: settings.start_date,
            end_date: settings.end_date,
            total_duration_secs: (settings.end_date - settings.start_date).num_seconds(),
            trades: self.trades,
            unresolved,
            skipped_signals: self.skipped,
            performance,
            by_symbol,
        }
    }
}
