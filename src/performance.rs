use crate::models::*;
use std::collections::BTreeMap;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate_performance(trades: &[Trade], initial_balance: f64) -> PerformanceSummary {
        let total_trades = trades.len();
        let trade_pnls: Vec<f64> = trades.iter().map(|trade| trade.pnl).collect();

        let winning_trades = trades.iter().filter(|trade| trade.is_win()).count();
        // Break-even trades count as losses.
        let losing_trades = total_trades - winning_trades;
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let total_pnl: f64 = trade_pnls.iter().sum();
        let average_pnl = Self::average(&trade_pnls);

        let largest_win = if trade_pnls.is_empty() {
            0.0
        } else {
            trade_pnls.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        };
        let largest_loss = if trade_pnls.is_empty() {
            0.0
        } else {
            trade_pnls.iter().copied().fold(f64::INFINITY, f64::min)
        };

        PerformanceSummary {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            total_pnl,
            average_pnl,
            largest_win,
            largest_loss,
            max_drawdown: Self::calculate_max_drawdown(trades),
            final_balance: initial_balance + total_pnl,
        }
    }

    /// Largest percentage drop of the cumulative PnL curve below its running peak, with trades
    /// taken in exit order. The peak starts at zero and is floored at one when dividing, so a
    /// curve that never rises above zero still yields a finite figure.
    pub fn calculate_max_drawdown(trades: &[Trade]) -> f64 {
        let mut ordered: Vec<&Trade> = trades.iter().collect();
        ordered.sort_by_key(|trade| trade.exit_time);

        let mut running = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut max_drawdown = 0.0_f64;

        for trade in ordered {
            running += trade.pnl;
            if running > peak {
                peak = running;
            } else if running < peak {
                let drawdown = (peak - running) / peak.max(1.0) * 100.0;
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
            }
        }

        max_drawdown
    }

    pub fn breakdown_by_symbol(trades: &[Trade]) -> BTreeMap<String, SymbolStats> {
        let mut by_symbol: BTreeMap<String, SymbolStats> = BTreeMap::new();
        for trade in trades {
            let stats = by_symbol.entry(trade.symbol.clone()).or_default();
            stats.trades += 1;
            stats.total_pnl += trade.pnl;
            if trade.is_win() {
                stats.winning_trades += 1;
            }
        }
        for stats in by_symbol.values_mut() {
            stats.win_rate = stats.winning_trades as f64 / stats.trades as f64 * 100.0;
        }
        by_symbol
    }

    fn average(values: &[f64]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;

        for value in values.iter().copied() {
            if value.is_finite() {
                sum += value;
                count += 1;
            }
        }

        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn trade(id: u64, symbol: &str, pnl: f64, exit_hour: i64) -> Trade {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Trade {
            id,
            symbol: symbol.to_string(),
            direction: Direction::Long,
            entry_price: 2000.0,
            entry_time: start,
            stop_loss: None,
            take_profit: None,
            exit_price: 2000.0 + pnl / 100.0,
            exit_time: start + Duration::hours(exit_hour),
            exit_reason: ExitReason::EndOfPeriod,
            pnl,
            signal_index: id as usize,
            channel: "alerts".to_string(),
        }
    }

    #[test]
    fn empty_trade_list_yields_zeroed_summary() {
        let summary = PerformanceCalculator::calculate_performance(&[], 10_000.0);
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.win_rate, 0.0);
        assert_eq!(summary.largest_win, 0.0);
        assert_eq!(summary.largest_loss, 0.0);
        assert_eq!(summary.max_drawdown, 0.0);
        assert_eq!(summary.final_balance, 10_000.0);
    }

    #[test]
    fn zero_pnl_counts_as_loss() {
        let trades = vec![trade(1, "XAUUSD", 50.0, 1), trade(2, "XAUUSD", 0.0, 2)];
        let summary = PerformanceCalculator::calculate_performance(&trades, 10_000.0);
        assert_eq!(summary.winning_trades, 1);
        assert_eq!(summary.losing_trades, 1);
        assert!((summary.win_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn aggregates_pnl_extremes_and_balance() {
        let trades = vec![
            trade(1, "XAUUSD", 120.0, 1),
            trade(2, "EURUSD", -40.0, 2),
            trade(3, "XAUUSD", 10.0, 3),
        ];
        let summary = PerformanceCalculator::calculate_performance(&trades, 1_000.0);
        assert!((summary.total_pnl - 90.0).abs() < 1e-9);
        assert!((summary.average_pnl - 30.0).abs() < 1e-9);
        assert!((summary.largest_win - 120.0).abs() < 1e-9);
        assert!((summary.largest_loss + 40.0).abs() < 1e-9);
        assert!((summary.final_balance - 1_090.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_tracks_running_peak_in_exit_order() {
        // Cumulative 100, 120, 40, 50 against peaks 100, 120, 120, 120.
        let trades = vec![
            trade(3, "XAUUSD", -80.0, 3),
            trade(1, "XAUUSD", 100.0, 1),
            trade(4, "XAUUSD", 10.0, 4),
            trade(2, "XAUUSD", 20.0, 2),
        ];
        let drawdown = PerformanceCalculator::calculate_max_drawdown(&trades);
        assert!((drawdown - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_is_zero_when_always_at_new_peak() {
        let trades = vec![trade(1, "XAUUSD", 10.0, 1), trade(2, "XAUUSD", 5.0, 2)];
        assert_eq!(PerformanceCalculator::calculate_max_drawdown(&trades), 0.0);
    }

    #[test]
    fn drawdown_below_zero_peak_uses_unit_floor() {
        let trades = vec![trade(1, "XAUUSD", -2.0, 1)];
        assert!((PerformanceCalculator::calculate_max_drawdown(&trades) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn breakdown_groups_trades_by_symbol() {
        let trades = vec![
            trade(1, "XAUUSD", 100.0, 1),
            trade(2, "EURUSD", -5.0, 2),
            trade(3, "XAUUSD", -20.0, 3),
        ];
        let by_symbol = PerformanceCalculator::breakdown_by_symbol(&trades);
        assert_eq!(by_symbol.len(), 2);
        let gold = &by_symbol["XAUUSD"];
        assert_eq!(gold.trades, 2);
        assert_eq!(gold.winning_trades, 1);
        assert!((gold.total_pnl - 80.0).abs() < 1e-9);
        assert!((gold.win_rate - 50.0).abs() < 1e-9);
        assert_eq!(by_symbol["EURUSD"].winning_trades, 0);
    }
}
