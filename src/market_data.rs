use crate::models::Candle;
use crate::symbols::base_price;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;
pub const DEFAULT_SYNTHETIC_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("no candle data for {0}")]
    NoData(String),
    #[error("{provider} failed for {symbol}: {message}")]
    Provider {
        provider: String,
        symbol: String,
        message: String,
    },
}

/// Source of OHLC series for a symbol and inclusive date range. Returned candles are ascending
/// by time.
pub trait CandleSeriesProvider: Send + Sync {
    fn name(&self) -> &str;

    fn candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError>;
}

/// Hourly random-walk candles. The walk is seeded per symbol, so the same seed, symbol and range
/// always produce the same series.
#[derive(Debug, Clone)]
pub struct SyntheticCandleProvider {
    seed: u64,
}

impl Default for SyntheticCandleProvider {
    fn default() -> Self {
        Self::new(DEFAULT_SYNTHETIC_SEED)
    }
}

impl SyntheticCandleProvider {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn symbol_seed(&self, symbol: &str) -> u64 {
        symbol.bytes().fold(0xcbf2_9ce4_8422_2325 ^ self.seed, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
    }
}

impl CandleSeriesProvider for SyntheticCandleProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let mut rng = StdRng::seed_from_u64(self.symbol_seed(&symbol));
        let mut base = base_price(&symbol);
        let mut time = start;
        let mut candles = Vec::new();

        while time <= end {
            let open = base + (rng.gen::<f64>() - 0.5) * base * 0.02;
            let change = (rng.gen::<f64>() - 0.5) * base * 0.01;
            let close = open + change;
            let high = open.max(close) + rng.gen::<f64>() * base * 0.005;
            let low = open.min(close) - rng.gen::<f64>() * base * 0.005;
            let volume = f64::from(rng.gen_range(100u32..1000));

            candles.push(Candle {
                time,
                open,
                high,
                low,
                close,
                volume,
            });

            base = close;
            time += Duration::hours(1);
        }

        Ok(candles)
    }
}

/// Fixed series held in memory, keyed by upper-case symbol.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCandleProvider {
    series: HashMap<String, Vec<Candle>>,
}

impl InMemoryCandleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.insert(symbol, candles);
        self
    }

    pub fn insert(&mut self, symbol: &str, mut candles: Vec<Candle>) {
        candles.sort_by_key(|candle| candle.time);
        self.series
            .insert(symbol.trim().to_ascii_uppercase(), candles);
    }
}

impl CandleSeriesProvider for InMemoryCandleProvider {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let series = self
            .series
            .get(&symbol.trim().to_ascii_uppercase())
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))?;
        Ok(slice_range(series, start, end).to_vec())
    }
}

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    source: String,
    series: BTreeMap<String, Vec<Candle>>,
}

/// Candle series read from a versioned bincode snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotCandleProvider {
    source: String,
    series: BTreeMap<String, Vec<Candle>>,
}

impl SnapshotCandleProvider {
    pub fn from_series(source: &str, series: BTreeMap<String, Vec<Candle>>) -> Self {
        Self {
            source: source.to_string(),
            series,
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }
        if snapshot.series.values().all(|candles| candles.is_empty()) {
            return Err(anyhow!("Market data snapshot has no usable candles"));
        }

        info!(
            "Loaded market data snapshot ({} symbols, source {}, generated {})",
            snapshot.series.len(),
            snapshot.source,
            snapshot.generated_at
        );
        Ok(Self {
            source: snapshot.source,
            series: snapshot.series,
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            source: self.source.clone(),
            series: self.series.clone(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

impl CandleSeriesProvider for SnapshotCandleProvider {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let series = self
            .series
            .get(&symbol.trim().to_ascii_uppercase())
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))?;
        Ok(slice_range(series, start, end).to_vec())
    }
}

/// Asks `primary` first and falls back when it fails or has nothing for the range.
pub struct FallbackCandleProvider {
    primary: Box<dyn CandleSeriesProvider>,
    fallback: Box<dyn CandleSeriesProvider>,
}

impl FallbackCandleProvider {
    pub fn new(
        primary: Box<dyn CandleSeriesProvider>,
        fallback: Box<dyn CandleSeriesProvider>,
    ) -> Self {
        Self { primary, fallback }
    }
}

impl CandleSeriesProvider for FallbackCandleProvider {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        match self.primary.candles(symbol, start, end) {
            Ok(candles) if !candles.is_empty() => Ok(candles),
            Ok(_) => {
                warn!(
                    "{} returned no candles for {}, using {}",
                    self.primary.name(),
                    symbol,
                    self.fallback.name()
                );
                self.fallback.candles(symbol, start, end)
            }
            Err(err) => {
                warn!(
                    "{} failed for {} ({}), using {}",
                    self.primary.name(),
                    symbol,
                    err,
                    self.fallback.name()
                );
                self.fallback.candles(symbol, start, end)
            }
        }
    }
}

/// Candle series for one run, keyed by upper-case symbol. Read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct CandleBook {
    series: HashMap<String, Vec<Candle>>,
}

impl CandleBook {
    /// Loads every symbol from `provider` in parallel. A symbol whose lookup fails is logged and
    /// left out, so signals on it are later skipped for lack of price data.
    pub fn load(
        provider: &dyn CandleSeriesProvider,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let series: HashMap<String, Vec<Candle>> = symbols
            .par_iter()
            .filter_map(|symbol| match provider.candles(symbol, start, end) {
                Ok(candles) => Some((symbol.trim().to_ascii_uppercase(), candles)),
                Err(err) => {
                    warn!("No market data for {} from {}: {}", symbol, provider.name(), err);
                    None
                }
            })
            .collect();

        let mut book = Self::default();
        for (symbol, candles) in series {
            book.insert(&symbol, candles);
        }
        info!(
            "Loaded candles for {} of {} symbols from {}",
            book.series.len(),
            symbols.len(),
            provider.name()
        );
        book
    }

    pub fn insert(&mut self, symbol: &str, mut candles: Vec<Candle>) {
        if candles.windows(2).any(|pair| pair[0].time > pair[1].time) {
            warn!("Candles for {} were out of order; sorting by time", symbol);
            candles.sort_by_key(|candle| candle.time);
        }
        debug!("{} candles for {}", candles.len(), symbol);
        self.series.insert(symbol.trim().to_ascii_uppercase(), candles);
    }

    /// The series for `symbol`, if it has at least one candle.
    pub fn series(&self, symbol: &str) -> Option<&[Candle]> {
        self.series
            .get(&symbol.trim().to_ascii_uppercase())
            .map(Vec::as_slice)
            .filter(|candles| !candles.is_empty())
    }

    /// Index of the latest candle at or before `at`.
    pub fn reference_index(&self, symbol: &str, at: DateTime<Utc>) -> Option<usize> {
        let series = self.series(symbol)?;
        series
            .partition_point(|candle| candle.time <= at)
            .checked_sub(1)
    }

    pub fn reference_candle(&self, symbol: &str, at: DateTime<Utc>) -> Option<&Candle> {
        let index = self.reference_index(symbol, at)?;
        self.series(symbol).map(|series| &series[index])
    }

    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self
            .series
            .iter()
            .filter(|(_, candles)| !candles.is_empty())
            .map(|(symbol, _)| symbol.as_str())
            .collect();
        symbols.sort_unstable();
        symbols
    }

    pub fn into_snapshot(self, source: &str) -> SnapshotCandleProvider {
        SnapshotCandleProvider::from_series(source, self.series.into_iter().collect())
    }
}

fn slice_range(series: &[Candle], start: DateTime<Utc>, end: DateTime<Utc>) -> &[Candle] {
    let from = series.partition_point(|candle| candle.time < start);
    let to = series.partition_point(|candle| candle.time <= end);
    if from >= to {
        &[]
    } else {
        &series[from..to]
    }
}
