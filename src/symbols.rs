//! Per-symbol lookup tables: recognised symbols and their aliases, pip sizes, and the base
//! prices used by the synthetic candle generator.

pub const DEFAULT_SYMBOL: &str = "XAUUSD";
pub const DEFAULT_PIP_VALUE: f64 = 0.0001;

/// Recognised symbols in match order. The first entry found in the message wins, so longer
/// names must come before their prefixes (`BTCUSD` before `BTC`). Full six-character names
/// match anywhere in a word (`XAUUSDm`); shorter aliases must be a whole word.
const KNOWN_SYMBOLS: [(&str, &str); 18] = [
    ("XAUUSD", "XAUUSD"),
    ("EURUSD", "EURUSD"),
    ("GBPUSD", "GBPUSD"),
    ("USDJPY", "USDJPY"),
    ("BTCUSD", "BTCUSD"),
    ("NAS100", "NAS100"),
    ("US30", "US30"),
    ("XAGUSD", "XAGUSD"),
    ("AUDUSD", "AUDUSD"),
    ("NZDUSD", "NZDUSD"),
    ("USDCAD", "USDCAD"),
    ("USDCHF", "USDCHF"),
    ("EURJPY", "EURJPY"),
    ("GBPJPY", "GBPJPY"),
    ("GOLD", "XAUUSD"),
    ("SILVER", "XAGUSD"),
    ("BTC", "BTCUSD"),
    ("ETH", "ETHUSD"),
];

/// Finds the first known symbol mentioned in `text`, resolving aliases.
/// Full names also match when written with a `/` between base and quote (`EUR/USD`).
pub fn find_symbol(text: &str) -> Option<&'static str> {
    let upper = text.to_ascii_uppercase();
    let unslashed = upper.replace('/', "");
    let words: Vec<&str> = upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();

    KNOWN_SYMBOLS
        .iter()
        .find(|(needle, _)| {
            if needle.len() >= 6 {
                unslashed.contains(needle)
            } else {
                words.iter().any(|word| word == needle)
            }
        })
        .map(|(_, symbol)| *symbol)
}

/// Price units per pip for `symbol`.
pub fn pip_value(symbol: &str) -> f64 {
    let symbol = symbol.trim().to_ascii_uppercase();
    match symbol.as_str() {
        "XAUUSD" | "XAGUSD" => 0.01,
        "BTCUSD" => 1.0,
        s if s.ends_with("JPY") => 0.01,
        _ => DEFAULT_PIP_VALUE,
    }
}

/// Starting price for generated series.
pub fn base_price(symbol: &str) -> f64 {
    match symbol.trim().to_ascii_uppercase().as_str() {
        "XAUUSD" => 2000.0,
        "XAGUSD" => 25.0,
        "EURUSD" => 1.1,
        "GBPUSD" => 1.25,
        "USDJPY" => 150.0,
        "BTCUSD" => 45000.0,
        _ => 1.0,
    }
}
