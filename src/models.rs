use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    BuyLimit,
    SellLimit,
    BuyStop,
    SellStop,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::BuyLimit => "BUY LIMIT",
            SignalAction::SellLimit => "SELL LIMIT",
            SignalAction::BuyStop => "BUY STOP",
            SignalAction::SellStop => "SELL STOP",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            SignalAction::Buy | SignalAction::BuyLimit | SignalAction::BuyStop => Direction::Long,
            SignalAction::Sell | SignalAction::SellLimit | SignalAction::SellStop => {
                Direction::Short
            }
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Ok(SignalAction::Buy),
            "SELL" | "SHORT" => Ok(SignalAction::Sell),
            "BUY LIMIT" | "BUYLIMIT" => Ok(SignalAction::BuyLimit),
            "SELL LIMIT" | "SELLLIMIT" => Ok(SignalAction::SellLimit),
            "BUY STOP" | "BUYSTOP" => Ok(SignalAction::BuyStop),
            "SELL STOP" | "SELLSTOP" => Ok(SignalAction::SellStop),
            other => Err(anyhow!("Unknown signal action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuxAction {
    Close,
    DeleteOrder,
    PartialClose,
    MoveToBreakeven,
    Modify,
}

impl AuxAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuxAction::Close => "CLOSE",
            AuxAction::DeleteOrder => "DELETE ORDER",
            AuxAction::PartialClose => "PARTIAL CLOSE",
            AuxAction::MoveToBreakeven => "MOVE TO BREAKEVEN",
            AuxAction::Modify => "MODIFY",
        }
    }
}

impl fmt::Display for AuxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the entry price of a signal was specified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EntrySpec {
    /// Enter at the reference candle close.
    Market,
    Price(f64),
    Range { low: f64, high: f64 },
}

impl EntrySpec {
    /// The single numeric entry price, if one was given.
    pub fn price(&self) -> Option<f64> {
        match self {
            EntrySpec::Price(price) if price.is_finite() && *price > 0.0 => Some(*price),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfit {
    pub label: String,
    /// Zero means the target was left open.
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSignal {
    pub action: Option<SignalAction>,
    pub symbol: Option<String>,
    pub entry: EntrySpec,
    pub stop_loss: Option<f64>,
    pub take_profits: Vec<TakeProfit>,
    pub aux_actions: BTreeSet<AuxAction>,
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    pub raw_text: String,
}

impl ParsedSignal {
    pub fn has(&self, aux: AuxAction) -> bool {
        self.aux_actions.contains(&aux)
    }

    /// A close instruction is a Close tag that is not attached to a new entry.
    pub fn is_close_instruction(&self) -> bool {
        self.action.is_none() && self.has(AuxAction::Close)
    }

    pub fn first_take_profit(&self) -> Option<f64> {
        self.take_profits.first().map(|tp| tp.price)
    }
}

/// A raw message as received from a channel, before extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub id: u64,
    pub date: DateTime<Utc>,
    pub text: String,
    pub channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    ManualClose,
    EndOfPeriod,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "Stop Loss",
            ExitReason::TakeProfit => "Take Profit",
            ExitReason::ManualClose => "Manual Close",
            ExitReason::EndOfPeriod => "End of Period",
        }
    }
}

/// A trade that is still open during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub channel: String,
    pub signal_index: usize,
    /// Index of the next candle of this symbol that has not been checked for exits.
    #[serde(skip)]
    pub next_candle: usize,
}

impl Position {
    pub fn close(
        self,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        exit_reason: ExitReason,
        pnl: f64,
    ) -> Trade {
        Trade {
            id: self.id,
            symbol: self.symbol,
            direction: self.direction,
            entry_price: self.entry_price,
            entry_time: self.entry_time,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            exit_price,
            exit_time,
            exit_reason,
            pnl,
            signal_index: self.signal_index,
            channel: self.channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_reason: ExitReason,
    pub pnl: f64,
    pub signal_index: usize,
    pub channel: String,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    OutsideDateRange,
    SymbolFiltered,
    ChannelFiltered,
    MissingSymbol,
    NoPriceData,
    MaxOpenTrades,
    NothingToDo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSkip {
    pub signal_index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub average_pnl: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub max_drawdown: f64,
    pub final_balance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolStats {
    pub trades: usize,
    pub winning_trades: usize,
    pub total_pnl: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub total_duration_secs: i64,
    pub trades: Vec<Trade>,
    /// Positions that could not be closed because their symbol had no candles.
    pub unresolved: Vec<Position>,
    pub skipped_signals: Vec<SignalSkip>,
    pub performance: PerformanceSummary,
    pub by_symbol: BTreeMap<String, SymbolStats>,
}

impl BacktestResult {
    pub fn total_duration(&self) -> Duration {
        Duration::seconds(self.total_duration_secs)
    }

    pub fn max_drawdown(&self) -> f64 {
        self.performance.max_drawdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_action_keywords_with_aliases() {
        assert_eq!("long".parse::<SignalAction>().unwrap(), SignalAction::Buy);
        assert_eq!(
            "SELLLIMIT".parse::<SignalAction>().unwrap(),
            SignalAction::SellLimit
        );
        assert_eq!(
            " buy stop ".parse::<SignalAction>().unwrap(),
            SignalAction::BuyStop
        );
        assert!("hold".parse::<SignalAction>().is_err());
    }

    #[test]
    fn pending_orders_keep_their_direction() {
        assert_eq!(SignalAction::BuyLimit.direction(), Direction::Long);
        assert_eq!(SignalAction::SellStop.direction(), Direction::Short);
    }

    #[test]
    fn entry_price_ignores_market_range_and_invalid_values() {
        assert_eq!(EntrySpec::Price(2000.0).price(), Some(2000.0));
        assert_eq!(EntrySpec::Market.price(), None);
        assert_eq!(
            EntrySpec::Range {
                low: 1.0,
                high: 2.0
            }
            .price(),
            None
        );
        assert_eq!(EntrySpec::Price(0.0).price(), None);
        assert_eq!(EntrySpec::Price(f64::NAN).price(), None);
    }
}
