pub mod backtester;
pub mod config;
pub mod extractor;
pub mod formatter;
pub mod market_data;
pub mod messages;
pub mod models;
pub mod output;
pub mod patterns;
pub mod performance;
pub mod symbols;
pub mod text;

pub mod commands {
    pub mod backtest;
    pub mod export_market_data;
    pub mod parse_messages;
}
