use crate::models::{AuxAction, ChannelMessage, EntrySpec, ParsedSignal, SignalAction, TakeProfit};
use crate::patterns::{
    action_pattern, aux_patterns, entry_rules, first_match, parse_price, stop_rules,
    take_profit_pattern, ACTION_KEYWORDS,
};
use crate::symbols::{find_symbol, DEFAULT_SYMBOL};
use crate::text::clean_message;
use chrono::{DateTime, Utc};
use log::debug;
use rayon::prelude::*;
use std::collections::BTreeSet;

/// Turns free-text trade alerts into [`ParsedSignal`]s.
///
/// Extraction is a normalize-then-cascade pass over the message and never fails: text that
/// carries neither a trade direction nor an auxiliary instruction simply yields `None`.
#[derive(Debug, Clone)]
pub struct SignalExtractor {
    default_symbol: Option<String>,
}

impl Default for SignalExtractor {
    fn default() -> Self {
        Self {
            default_symbol: Some(DEFAULT_SYMBOL.to_string()),
        }
    }
}

impl SignalExtractor {
    pub fn new(default_symbol: Option<String>) -> Self {
        Self {
            default_symbol: default_symbol
                .map(|symbol| symbol.trim().to_ascii_uppercase())
                .filter(|symbol| !symbol.is_empty()),
        }
    }

    pub fn extract_message(&self, message: &ChannelMessage) -> Option<ParsedSignal> {
        self.extract(&message.text, message.date, &message.channel)
    }

    pub fn extract(
        &self,
        raw_text: &str,
        timestamp: DateTime<Utc>,
        channel: &str,
    ) -> Option<ParsedSignal> {
        let cleaned = clean_message(raw_text);

        let action = extract_action(&cleaned);
        let aux_actions = extract_aux_actions(&cleaned);
        if action.is_none() && aux_actions.is_empty() {
            return None;
        }

        let entry = first_match(entry_rules(), &cleaned).unwrap_or(EntrySpec::Market);
        let stop_loss = first_match(stop_rules(), &cleaned).flatten();
        let mut take_profits = extract_take_profits(&cleaned);
        if take_profits.is_empty() && action.is_some() {
            take_profits.push(TakeProfit {
                label: "TP1".to_string(),
                price: 0.0,
            });
        }

        let symbol = find_symbol(&cleaned)
            .map(str::to_string)
            .or_else(|| self.default_symbol.clone());

        debug!(
            "Extracted {:?} {:?} entry={:?} sl={:?} tps={} aux={:?}",
            action,
            symbol,
            entry,
            stop_loss,
            take_profits.len(),
            aux_actions
        );

        Some(ParsedSignal {
            action,
            symbol,
            entry,
            stop_loss,
            take_profits,
            aux_actions,
            timestamp,
            channel: channel.to_string(),
            raw_text: raw_text.to_string(),
        })
    }

    /// Extracts every message, dropping those that carry no signal. Output keeps message order.
    pub fn extract_all(&self, messages: &[ChannelMessage]) -> Vec<ParsedSignal> {
        messages
            .par_iter()
            .filter_map(|message| self.extract_message(message))
            .collect()
    }
}

fn extract_action(text: &str) -> Option<SignalAction> {
    let found = action_pattern().find(text)?;
    let keyword = found.as_str().to_ascii_uppercase();
    ACTION_KEYWORDS
        .iter()
        .find(|(candidate, _)| *candidate == keyword)
        .map(|(_, action)| *action)
}

fn extract_take_profits(text: &str) -> Vec<TakeProfit> {
    take_profit_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.iter().skip(1).flatten().next())
        .enumerate()
        .map(|(idx, value)| {
            let raw = value.as_str();
            let price = if raw.eq_ignore_ascii_case("open") {
                0.0
            } else {
                parse_price(raw).unwrap_or(0.0)
            };
            TakeProfit {
                label: format!("TP{}", idx + 1),
                price,
            }
        })
        .collect()
}

fn extract_aux_actions(text: &str) -> BTreeSet<AuxAction> {
    aux_patterns()
        .iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(action, _)| *action)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn extract(text: &str) -> Option<ParsedSignal> {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        SignalExtractor::default().extract(text, at, "alerts")
    }

    fn tp_prices(signal: &ParsedSignal) -> Vec<(String, f64)> {
        signal
            .take_profits
            .iter()
            .map(|tp| (tp.label.clone(), tp.price))
            .collect()
    }

    #[test]
    fn extracts_full_entry_signal() {
        let signal = extract("BUY XAUUSD now at 2000 SL 1995 TP1 2010 TP2 2020").unwrap();
        assert_eq!(signal.action, Some(SignalAction::Buy));
        assert_eq!(signal.symbol.as_deref(), Some("XAUUSD"));
        assert_eq!(signal.entry, EntrySpec::Price(2000.0));
        assert_eq!(signal.stop_loss, Some(1995.0));
        assert_eq!(
            tp_prices(&signal),
            vec![("TP1".to_string(), 2010.0), ("TP2".to_string(), 2020.0)]
        );
        assert_eq!(signal.channel, "alerts");
    }

    #[test]
    fn non_trading_text_yields_nothing() {
        assert!(extract("Good morning traders, markets open soon").is_none());
        assert!(extract("").is_none());
        assert!(extract("🚀🚀🚀").is_none());
    }

    #[test]
    fn long_and_short_normalize_to_buy_and_sell() {
        assert_eq!(extract("GOLD long now").unwrap().action, Some(SignalAction::Buy));
        assert_eq!(extract("short EURUSD").unwrap().action, Some(SignalAction::Sell));
    }

    #[test]
    fn longer_action_phrases_win_over_prefixes() {
        assert_eq!(
            extract("BUY LIMIT XAUUSD 1990").unwrap().action,
            Some(SignalAction::BuyLimit)
        );
        assert_eq!(
            extract("SELLSTOP gold 2050").unwrap().action,
            Some(SignalAction::SellStop)
        );
        assert_eq!(
            extract("sell stop EURUSD 1.0800").unwrap().action,
            Some(SignalAction::SellStop)
        );
    }

    #[test]
    fn entry_range_takes_precedence() {
        let signal = extract("SELL GOLD @ 2050 zone 2048 - 2052 SL 2060").unwrap();
        assert_eq!(
            signal.entry,
            EntrySpec::Range {
                low: 2048.0,
                high: 2052.0
            }
        );
    }

    #[test]
    fn entry_cascade_follows_rule_order() {
        assert_eq!(
            extract("BUY XAUUSD @ 2001 Entry: 2002").unwrap().entry,
            EntrySpec::Price(2001.0)
        );
        assert_eq!(
            extract("BUY XAUUSD Entry: 2002 now at 2003").unwrap().entry,
            EntrySpec::Price(2002.0)
        );
        assert_eq!(
            extract("BUY gold Entry Price: 2004").unwrap().entry,
            EntrySpec::Price(2004.0)
        );
        assert_eq!(
            extract("SELL XAUUSD 2005 SL 2015").unwrap().entry,
            EntrySpec::Price(2005.0)
        );
        assert_eq!(
            extract("BUY gold market, current Price: 2006").unwrap().entry,
            EntrySpec::Price(2006.0)
        );
        assert_eq!(extract("BUY gold now").unwrap().entry, EntrySpec::Market);
    }

    #[test]
    fn stop_loss_open_means_no_stop() {
        let signal = extract("BUY XAUUSD 2000 SL open TP 2010").unwrap();
        assert_eq!(signal.stop_loss, None);
        let signal = extract("BUY XAUUSD 2000 Stop: open StopLoss 1990").unwrap();
        assert_eq!(signal.stop_loss, None);
    }

    #[test]
    fn direction_token_is_never_read_as_stop() {
        let signal = extract("BUY STOP XAUUSD 2010 SL 1995").unwrap();
        assert_eq!(signal.action, Some(SignalAction::BuyStop));
        assert_eq!(signal.stop_loss, Some(1995.0));

        let signal = extract("SELL STOP 2000 TP 1980").unwrap();
        assert_eq!(signal.action, Some(SignalAction::SellStop));
        assert_eq!(signal.stop_loss, None);
    }

    #[test]
    fn stop_label_and_keyword_forms() {
        assert_eq!(extract("BUY gold Stop: 1990").unwrap().stop_loss, Some(1990.0));
        assert_eq!(
            extract("BUY gold stop loss 1985").unwrap().stop_loss,
            Some(1985.0)
        );
        assert_eq!(
            extract("Move SL to 2001 on gold").unwrap().stop_loss,
            Some(2001.0)
        );
        assert_eq!(
            extract("SELL EURUSD SL @ 1.0950").unwrap().stop_loss,
            Some(1.095)
        );
    }

    #[test]
    fn take_profits_are_labelled_in_document_order() {
        let signal =
            extract("SELL EURUSD 1.0900 Target 1.0850 TP: open Take Profit 3 1.0800").unwrap();
        assert_eq!(
            tp_prices(&signal),
            vec![
                ("TP1".to_string(), 1.085),
                ("TP2".to_string(), 0.0),
                ("TP3".to_string(), 1.08)
            ]
        );
    }

    #[test]
    fn entry_without_targets_gets_open_tp1() {
        let signal = extract("BUY GOLD now").unwrap();
        assert_eq!(tp_prices(&signal), vec![("TP1".to_string(), 0.0)]);
    }

    #[test]
    fn auxiliary_only_messages_are_signals_without_targets() {
        let signal = extract("Close all gold trades now").unwrap();
        assert_eq!(signal.action, None);
        assert!(signal.has(AuxAction::Close));
        assert!(signal.is_close_instruction());
        assert!(signal.take_profits.is_empty());
    }

    #[test]
    fn auxiliary_families_co_occur() {
        let signal = extract("Partial close and move stop to be on XAUUSD").unwrap();
        let expected: BTreeSet<AuxAction> = [
            AuxAction::Close,
            AuxAction::PartialClose,
            AuxAction::MoveToBreakeven,
            AuxAction::Modify,
        ]
        .into_iter()
        .collect();
        assert_eq!(signal.aux_actions, expected);

        let signal = extract("cancel order EURUSD").unwrap();
        assert!(signal.has(AuxAction::DeleteOrder));
    }

    #[test]
    fn emoji_heavy_message_is_normalized_first() {
        let signal = extract("🟢 BUY 🟢 XAUUSD\n📍 Entry: 2000\n🛑 SL: 1990\n🎯 TP1: 2015").unwrap();
        assert_eq!(signal.action, Some(SignalAction::Buy));
        assert_eq!(signal.entry, EntrySpec::Price(2000.0));
        assert_eq!(signal.stop_loss, Some(1990.0));
        assert_eq!(tp_prices(&signal), vec![("TP1".to_string(), 2015.0)]);
    }

    #[test]
    fn extract_all_keeps_message_order_and_drops_noise() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let messages: Vec<ChannelMessage> = ["BUY GOLD", "hello", "SELL EURUSD", "close gold"]
            .iter()
            .enumerate()
            .map(|(idx, text)| ChannelMessage {
                id: idx as u64 + 1,
                date: at + chrono::Duration::minutes(idx as i64),
                text: text.to_string(),
                channel: "alerts".to_string(),
            })
            .collect();

        let signals = SignalExtractor::default().extract_all(&messages);
        let actions: Vec<Option<SignalAction>> = signals.iter().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![Some(SignalAction::Buy), Some(SignalAction::Sell), None]
        );
        assert_eq!(signals[2].timestamp, at + chrono::Duration::minutes(3));
    }

    #[test]
    fn slash_written_pair_is_not_mistaken_for_default_symbol() {
        let signal = extract("SELL EUR/USD 1.0850 SL 1.0900 TP 1.0800").unwrap();
        assert_eq!(signal.action, Some(SignalAction::Sell));
        assert_eq!(signal.symbol.as_deref(), Some("EURUSD"));
        assert_eq!(signal.entry, EntrySpec::Price(1.085));
        assert_eq!(signal.stop_loss, Some(1.09));
        assert_eq!(tp_prices(&signal), vec![("TP1".to_string(), 1.08)]);
    }

    #[test]
    fn symbol_falls_back_to_configured_default() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let signal = SignalExtractor::default()
            .extract("buy now", at, "alerts")
            .unwrap();
        assert_eq!(signal.symbol.as_deref(), Some("XAUUSD"));

        let signal = SignalExtractor::new(None)
            .extract("buy now", at, "alerts")
            .unwrap();
        assert_eq!(signal.symbol, None);
    }
}
