use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use thiserror::Error;

pub const SETTINGS_PREFIX: &str = "BACKTEST_";
const ALL_SYMBOLS: &str = "All Symbols";
const ALL_CHANNELS: &str = "All Channels";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("end date {end} is earlier than start date {start}")]
    InvertedDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("max open trades must be at least 1")]
    NoOpenTradeCapacity,
    #[error("{name} must be a finite, non-negative number (value: {value})")]
    InvalidCost { name: &'static str, value: f64 },
    #[error("initial balance must be positive (value: {0})")]
    NonPositiveBalance(f64),
    #[error("risk per trade must be within (0, 100] percent (value: {0})")]
    RiskOutOfRange(f64),
}

/// Parameters of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSettings {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// `None` accepts every symbol.
    pub symbol: Option<String>,
    /// `None` accepts every channel.
    pub channel: Option<String>,
    pub initial_balance: f64,
    /// Percent of balance; carried for reporting, the PnL model does not size positions.
    pub risk_per_trade: f64,
    pub spread_pips: f64,
    /// Flat deduction per closed trade, in PnL units.
    pub commission: f64,
    pub use_stop_loss: bool,
    pub use_take_profit: bool,
    pub max_open_trades: usize,
}

impl BacktestSettings {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            start_date,
            end_date,
            symbol: None,
            channel: None,
            initial_balance: 10_000.0,
            risk_per_trade: 1.0,
            spread_pips: 2.0,
            commission: 0.0,
            use_stop_loss: true,
            use_take_profit: true,
            max_open_trades: 5,
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.end_date < self.start_date {
            return Err(SettingsError::InvertedDateRange {
                start: self.start_date,
                end: self.end_date,
            });
        }
        if self.max_open_trades == 0 {
            return Err(SettingsError::NoOpenTradeCapacity);
        }
        for (name, value) in [("spread", self.spread_pips), ("commission", self.commission)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SettingsError::InvalidCost { name, value });
            }
        }
        if !(self.initial_balance.is_finite() && self.initial_balance > 0.0) {
            return Err(SettingsError::NonPositiveBalance(self.initial_balance));
        }
        if !(self.risk_per_trade.is_finite()
            && self.risk_per_trade > 0.0
            && self.risk_per_trade <= 100.0)
        {
            return Err(SettingsError::RiskOutOfRange(self.risk_per_trade));
        }
        Ok(())
    }

    pub fn accepts_symbol(&self, symbol: &str) -> bool {
        self.symbol
            .as_deref()
            .map_or(true, |wanted| wanted.eq_ignore_ascii_case(symbol))
    }

    pub fn accepts_channel(&self, channel: &str) -> bool {
        self.channel
            .as_deref()
            .map_or(true, |wanted| wanted == channel)
    }

    /// Builds settings from `BACKTEST_*` keys. The date range is required; every other key
    /// falls back to its default when missing or blank.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let start_date = day_start(require_setting_date(settings, "BACKTEST_START_DATE")?);
        let end_date = day_end(require_setting_date(settings, "BACKTEST_END_DATE")?);
        let defaults = Self::new(start_date, end_date);

        let parsed = Self {
            start_date,
            end_date,
            symbol: optional_filter(settings, "BACKTEST_SYMBOL", ALL_SYMBOLS)
                .map(|symbol| symbol.to_ascii_uppercase()),
            channel: optional_filter(settings, "BACKTEST_CHANNEL", ALL_CHANNELS),
            initial_balance: optional_setting_f64(
                settings,
                "BACKTEST_INITIAL_BALANCE",
                defaults.initial_balance,
                Some(0.0),
                None,
            )?,
            risk_per_trade: optional_setting_f64(
                settings,
                "BACKTEST_RISK_PER_TRADE",
                defaults.risk_per_trade,
                Some(0.0),
                Some(100.0),
            )?,
            spread_pips: optional_setting_f64(
                settings,
                "BACKTEST_SPREAD_PIPS",
                defaults.spread_pips,
                Some(0.0),
                None,
            )?,
            commission: optional_setting_f64(
                settings,
                "BACKTEST_COMMISSION",
                defaults.commission,
                Some(0.0),
                None,
            )?,
            use_stop_loss: optional_setting_bool(
                settings,
                "BACKTEST_USE_STOP_LOSS",
                defaults.use_stop_loss,
            )?,
            use_take_profit: optional_setting_bool(
                settings,
                "BACKTEST_USE_TAKE_PROFIT",
                defaults.use_take_profit,
            )?,
            max_open_trades: optional_setting_usize(
                settings,
                "BACKTEST_MAX_OPEN_TRADES",
                defaults.max_open_trades,
                1,
            )?,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Collects `BACKTEST_*` process environment variables; `overrides` win over the
    /// environment.
    pub fn settings_map_from_env(overrides: HashMap<String, String>) -> HashMap<String, String> {
        let mut settings: HashMap<String, String> = env::vars()
            .filter(|(key, _)| key.starts_with(SETTINGS_PREFIX))
            .collect();
        settings.extend(overrides);
        settings
    }
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn day_end(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(23, 59, 59)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|| day_start(date))
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

pub fn require_setting_date(settings: &HashMap<String, String>, key: &str) -> Result<NaiveDate> {
    let raw = require_setting(settings, key)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

fn optional_filter(settings: &HashMap<String, String>, key: &str, all: &str) -> Option<String> {
    optional_setting(settings, key)
        .filter(|value| !value.eq_ignore_ascii_case(all))
        .map(str::to_string)
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn optional_setting_bool(
    settings: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "Setting {} must be true or false (value: {})",
            key,
            raw
        )),
    }
}
