use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use log::info;
use signal_engine::{
    commands::{backtest, export_market_data, parse_messages},
    config::BacktestSettings,
    extractor::SignalExtractor,
    market_data::{
        CandleSeriesProvider, FallbackCandleProvider, SnapshotCandleProvider,
        SyntheticCandleProvider, DEFAULT_SYNTHETIC_SEED,
    },
    messages::MessageWindow,
    symbols::DEFAULT_SYMBOL,
};
use std::collections::HashMap;
use std::path::PathBuf;

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "signal-engine")]
#[command(about = "Extract trade signals from channel messages and backtest them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract structured signals from saved channel messages
    Parse {
        /// Message directory (`*_Message_*.json`) or a JSON / JSON lines file
        input: PathBuf,
        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Symbol assumed when a message names none
        #[arg(long, default_value = DEFAULT_SYMBOL)]
        default_symbol: String,
        /// Leave the symbol empty instead of assuming a default
        #[arg(long)]
        no_default_symbol: bool,
        /// Print canonical text blocks instead of JSON
        #[arg(long)]
        text: bool,
        /// Destination file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay extracted signals against candle data and report performance
    Backtest {
        /// Message directory (`*_Message_*.json`) or a JSON / JSON lines file
        input: PathBuf,
        /// First day of the backtest (YYYY-MM-DD, overrides BACKTEST_START_DATE)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day of the backtest (YYYY-MM-DD, overrides BACKTEST_END_DATE)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Only trade this symbol
        #[arg(long)]
        symbol: Option<String>,
        /// Only trade signals from this channel
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        initial_balance: Option<f64>,
        /// Risk per trade in percent of balance
        #[arg(long)]
        risk_per_trade: Option<f64>,
        /// Spread in pips charged on every trade
        #[arg(long)]
        spread: Option<f64>,
        /// Flat commission per trade in PnL units
        #[arg(long)]
        commission: Option<f64>,
        /// Ignore stop-loss levels from signals
        #[arg(long)]
        no_stop_loss: bool,
        /// Ignore take-profit levels from signals
        #[arg(long)]
        no_take_profit: bool,
        #[arg(long)]
        max_open_trades: Option<usize>,
        /// Market data snapshot; symbols missing from it use synthetic candles
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Seed for synthetic candles
        #[arg(long, default_value_t = DEFAULT_SYNTHETIC_SEED)]
        seed: u64,
        /// Symbol assumed when a message names none
        #[arg(long, default_value = DEFAULT_SYMBOL)]
        default_symbol: String,
        /// Destination file for the JSON result (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write synthetic candle series to a market data snapshot
    ExportMarketData {
        /// Comma separated symbols to include
        #[arg(long, value_delimiter = ',', num_args = 1.., required = true)]
        symbols: Vec<String>,
        /// First day to generate (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// Last day to generate (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
        /// Seed for synthetic candles
        #[arg(long, default_value_t = DEFAULT_SYNTHETIC_SEED)]
        seed: u64,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    info!("Starting signal-engine. Results are simulated and not financial advice.");

    match command {
        Commands::Parse {
            input,
            from,
            to,
            default_symbol,
            no_default_symbol,
            text,
            output,
        } => {
            let window = MessageWindow::new(
                from.map(|date| date.and_time(NaiveTime::MIN).and_utc()),
                to.and_then(|date| date.and_hms_opt(23, 59, 59))
                    .map(|naive| naive.and_utc()),
            );
            let extractor =
                SignalExtractor::new((!no_default_symbol).then_some(default_symbol));
            parse_messages::run(&input, window, &extractor, output.as_deref(), text)?;
        }
        Commands::Backtest {
            input,
            from,
            to,
            symbol,
            channel,
            initial_balance,
            risk_per_trade,
            spread,
            commission,
            no_stop_loss,
            no_take_profit,
            max_open_trades,
            data_file,
            seed,
            default_symbol,
            output,
        } => {
            let mut overrides = HashMap::new();
            let mut set = |key: &str, value: Option<String>| {
                if let Some(value) = value {
                    overrides.insert(key.to_string(), value);
                }
            };
            set("BACKTEST_START_DATE", from.map(|d| d.to_string()));
            set("BACKTEST_END_DATE", to.map(|d| d.to_string()));
            set("BACKTEST_SYMBOL", symbol);
            set("BACKTEST_CHANNEL", channel);
            set("BACKTEST_INITIAL_BALANCE", initial_balance.map(|v| v.to_string()));
            set("BACKTEST_RISK_PER_TRADE", risk_per_trade.map(|v| v.to_string()));
            set("BACKTEST_SPREAD_PIPS", spread.map(|v| v.to_string()));
            set("BACKTEST_COMMISSION", commission.map(|v| v.to_string()));
            set("BACKTEST_USE_STOP_LOSS", no_stop_loss.then(|| "false".to_string()));
            set("BACKTEST_USE_TAKE_PROFIT", no_take_profit.then(|| "false".to_string()));
            set("BACKTEST_MAX_OPEN_TRADES", max_open_trades.map(|v| v.to_string()));

            let settings_map = BacktestSettings::settings_map_from_env(overrides);
            let settings = BacktestSettings::from_settings_map(&settings_map)
                .context("Invalid backtest settings")?;
            let provider = build_provider(data_file, seed)?;
            let extractor = SignalExtractor::new(Some(default_symbol));
            backtest::run(
                &input,
                settings,
                &extractor,
                provider.as_ref(),
                output.as_deref(),
            )?;
        }
        Commands::ExportMarketData {
            symbols,
            from,
            to,
            seed,
            output,
        } => {
            let symbols: Vec<String> = symbols
                .iter()
                .map(|symbol| symbol.trim().to_ascii_uppercase())
                .filter(|symbol| !symbol.is_empty())
                .collect();
            let start = from.and_time(NaiveTime::MIN).and_utc();
            let end = to.and_time(NaiveTime::MIN).and_utc() + chrono::Duration::hours(23);
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_MARKET_DATA_FILE));
            export_market_data::run(
                &SyntheticCandleProvider::new(seed),
                &symbols,
                start,
                end,
                &output_path,
            )?;
        }
    }

    Ok(())
}

fn build_provider(data_file: Option<PathBuf>, seed: u64) -> Result<Box<dyn CandleSeriesProvider>> {
    let synthetic: Box<dyn CandleSeriesProvider> = Box::new(SyntheticCandleProvider::new(seed));
    match data_file {
        Some(path) => {
            let snapshot = SnapshotCandleProvider::load_from_file(&path)?;
            Ok(Box::new(FallbackCandleProvider::new(
                Box::new(snapshot),
                synthetic,
            )))
        }
        None => Ok(synthetic),
    }
}
