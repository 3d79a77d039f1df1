//! Ordered pattern tables for signal extraction.
//!
//! Precedence lives in the order of these tables: the first rule that matches decides the
//! field, and every pattern is case-insensitive and runs on already-cleaned text.

use crate::models::{AuxAction, EntrySpec, SignalAction};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Primary action keywords, most specific first. Matched as a single alternation so that at
/// any position the longer phrase wins over its prefix.
pub const ACTION_KEYWORDS: [(&str, SignalAction); 12] = [
    ("BUY LIMIT", SignalAction::BuyLimit),
    ("BUYLIMIT", SignalAction::BuyLimit),
    ("SELL LIMIT", SignalAction::SellLimit),
    ("SELLLIMIT", SignalAction::SellLimit),
    ("BUY STOP", SignalAction::BuyStop),
    ("BUYSTOP", SignalAction::BuyStop),
    ("SELL STOP", SignalAction::SellStop),
    ("SELLSTOP", SignalAction::SellStop),
    ("BUY", SignalAction::Buy),
    ("SELL", SignalAction::Sell),
    ("LONG", SignalAction::Buy),
    ("SHORT", SignalAction::Sell),
];

/// Keyword families for auxiliary instructions; each family is checked independently.
pub const AUX_KEYWORDS: [(AuxAction, &[&str]); 5] = [
    (
        AuxAction::Close,
        &[
            "close trade",
            "close",
            "close now",
            "exit",
            "close position",
            "terminate",
            "liquidate",
        ],
    ),
    (
        AuxAction::DeleteOrder,
        &[
            "cancel order",
            "delete order",
            "delete",
            "cancel",
            "void",
            "remove order",
            "scrap order",
        ],
    ),
    (
        AuxAction::PartialClose,
        &[
            "partial close",
            "partial",
            "reduce position",
            "scale out",
            "take some profit",
            "exit partial",
        ],
    ),
    (
        AuxAction::MoveToBreakeven,
        &["breakeven", "be", "move to be", "set to be", "move stop to be"],
    ),
    (
        AuxAction::Modify,
        &[
            "modify", "change", "move", "adjust", "edit", "revise", "tweak",
        ],
    ),
];

/// Stop-loss keyword forms, each with exactly one capture group for the price.
const STOP_KEYWORD_FORMS: [&str; 24] = [
    r"StopLoss[:\s]+([0-9.]+)",
    r"SL[:\s@]+([0-9.]+)",
    r"STOP LOSS[:\s]+([0-9.]+)",
    r"STOP[:\s]+([0-9.]+)",
    r"StopLoss To[:\s]+([0-9.]+)",
    r"SL TO[:\s@]+([0-9.]+)",
    r"STOP LOSS TO[:\s]+([0-9.]+)",
    r"STOP TO[:\s]+([0-9.]+)",
    r"Move SL to[:\s]+([0-9.]+)",
    r"Move StopLoss to[:\s]+([0-9.]+)",
    r"Move Stop to[:\s]+([0-9.]+)",
    r"Change SL to[:\s]+([0-9.]+)",
    r"Change StopLoss to[:\s]+([0-9.]+)",
    r"Change Stop to[:\s]+([0-9.]+)",
    r"Adjust SL to[:\s]+([0-9.]+)",
    r"Adjust StopLoss to[:\s]+([0-9.]+)",
    r"Adjust Stop to[:\s]+([0-9.]+)",
    r"Modify SL to[:\s]+([0-9.]+)",
    r"Modify StopLoss to[:\s]+([0-9.]+)",
    r"Modify Stop to[:\s]+([0-9.]+)",
    r"STOP LOSS[.\s]*([0-9.]+)",
    r"Stop loss at[:\s]+([0-9.]+)",
    r"SL at[:\s]+([0-9.]+)",
    r"Stop at[:\s]+([0-9.]+)",
];

/// Target keywords; an optional ordinal digit and connector may follow each one.
const TAKE_PROFIT_KEYWORDS: [&str; 4] = ["TP", "Target", "TakeProfit", "Take Profit"];
const TAKE_PROFIT_SUFFIX: &str = r"(?:\s*\d?)?\s*(?:at|to|:|=|@|\.)?[:\s]+([0-9.]+|open)";

/// A single step of a first-match-wins cascade.
pub struct PatternRule<T> {
    pub name: &'static str,
    pub pattern: Regex,
    /// When set, a match starting right after `BUY ` or `SELL ` is ignored and the search
    /// continues from the next position.
    pub direction_guarded: bool,
    pub extract: fn(&Captures<'_>) -> T,
}

impl<T> PatternRule<T> {
    fn new(name: &'static str, pattern: &str, extract: fn(&Captures<'_>) -> T) -> Self {
        Self {
            name,
            pattern: compile(pattern),
            direction_guarded: false,
            extract,
        }
    }

    fn guarded(mut self) -> Self {
        self.direction_guarded = true;
        self
    }

    /// Applies the rule to `text`, honoring the direction guard.
    pub fn apply(&self, text: &str) -> Option<T> {
        let mut start = 0;
        while start <= text.len() {
            let caps = self.pattern.captures_at(text, start)?;
            let whole = caps.get(0)?;
            if self.direction_guarded && preceded_by_direction(text, whole.start()) {
                start = next_char_boundary(text, whole.start());
                continue;
            }
            return Some((self.extract)(&caps));
        }
        None
    }
}

/// Runs a cascade and returns the outcome of the first rule that matches.
pub fn first_match<T>(rules: &[PatternRule<T>], text: &str) -> Option<T> {
    rules.iter().find_map(|rule| rule.apply(text))
}

pub fn action_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternation = ACTION_KEYWORDS
            .iter()
            .map(|(keyword, _)| *keyword)
            .collect::<Vec<_>>()
            .join("|");
        compile(&format!(r"\b({})\b", alternation))
    })
}

pub fn entry_rules() -> &'static [PatternRule<EntrySpec>] {
    static RULES: OnceLock<Vec<PatternRule<EntrySpec>>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            PatternRule::new("range", r"\b([0-9.]+)\s*[-/]\s*([0-9.]+)\b", |caps| {
                match (group_price(caps, 1), group_price(caps, 2)) {
                    (Some(low), Some(high)) => EntrySpec::Range { low, high },
                    _ => EntrySpec::Market,
                }
            }),
            PatternRule::new("at", r"@\s*([0-9.]+)", price_entry::<1>),
            PatternRule::new("entry", r"Entry[:\s]+([0-9.]+)", price_entry::<1>),
            PatternRule::new("entry_price", r"Entry Price[:\s]+([0-9.]+)", price_entry::<1>),
            PatternRule::new("now_at", r"now at\s*([0-9.]+)", price_entry::<1>),
            PatternRule::new(
                "action_symbol_price",
                r"\b(BUY|SELL)\b\s+[A-Z0-9/]+\s+([0-9.]+)",
                price_entry::<2>,
            ),
            PatternRule::new("price", r"Price[:\s]+([0-9.]+)", price_entry::<1>),
        ]
    })
}

/// Stop-loss cascade. Every outcome is final: an `open` stop yields `None` even when a
/// numeric stop appears later in the message.
pub fn stop_rules() -> &'static [PatternRule<Option<f64>>] {
    static RULES: OnceLock<Vec<PatternRule<Option<f64>>>> = OnceLock::new();
    RULES.get_or_init(|| {
        let keyword_forms = STOP_KEYWORD_FORMS.join("|");
        vec![
            PatternRule::new(
                "open",
                r"SL[:\s]*open|StopLoss[:\s]*open|Stop[:\s]*open",
                |_| None,
            ),
            PatternRule::new("stop_label", r"Stop[:\s]+([0-9.]+)", |caps| {
                group_price(caps, 1)
            })
            .guarded(),
            PatternRule::new("keyword_forms", &keyword_forms, |caps| {
                caps.iter()
                    .skip(1)
                    .flatten()
                    .find(|group| !group.as_str().trim().is_empty())
                    .and_then(|group| parse_price(group.as_str()))
            })
            .guarded(),
        ]
    })
}

pub fn take_profit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternation = TAKE_PROFIT_KEYWORDS
            .iter()
            .map(|keyword| format!("(?:{}{})", keyword, TAKE_PROFIT_SUFFIX))
            .collect::<Vec<_>>()
            .join("|");
        compile(&alternation)
    })
}

pub fn aux_patterns() -> &'static [(AuxAction, Regex)] {
    static PATTERNS: OnceLock<Vec<(AuxAction, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        AUX_KEYWORDS
            .iter()
            .map(|(action, keywords)| {
                (*action, compile(&format!(r"\b({})\b", keywords.join("|"))))
            })
            .collect()
    })
}

/// Parses a captured price. Captures such as `.` or `1.2.3` are rejected.
pub fn parse_price(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn group_price(caps: &Captures<'_>, index: usize) -> Option<f64> {
    caps.get(index).and_then(|m| parse_price(m.as_str()))
}

fn price_entry<const GROUP: usize>(caps: &Captures<'_>) -> EntrySpec {
    group_price(caps, GROUP)
        .map(EntrySpec::Price)
        .unwrap_or(EntrySpec::Market)
}

fn compile(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){}", pattern)).expect("built-in extraction pattern must compile")
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || !byte.is_ascii()
}

/// True when `text[..pos]` ends with the word `BUY` or `SELL` followed by one whitespace
/// character.
fn preceded_by_direction(text: &str, pos: usize) -> bool {
    let before = &text[..pos];
    let mut chars = before.chars();
    match chars.next_back() {
        Some(c) if c.is_whitespace() => {}
        _ => return false,
    }
    let head = chars.as_str().as_bytes();

    ["BUY", "SELL"].iter().any(|word| {
        let word = word.as_bytes();
        if head.len() < word.len() {
            return false;
        }
        let split = head.len() - word.len();
        head[split..].eq_ignore_ascii_case(word)
            && (split == 0 || !is_word_byte(head[split - 1]))
    })
}

fn next_char_boundary(text: &str, pos: usize) -> usize {
    text[pos..]
        .chars()
        .next()
        .map(|c| pos + c.len_utf8())
        .unwrap_or(text.len() + 1)
}
