use crate::market_data::{CandleBook, CandleSeriesProvider};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::info;
use std::path::Path;

pub fn run(
    provider: &dyn CandleSeriesProvider,
    symbols: &[String],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    output_path: &Path,
) -> Result<()> {
    if end < start {
        return Err(anyhow!("End date {} is earlier than start date {}", end, start));
    }
    info!(
        "Generating market data snapshot for {} symbols at {}",
        symbols.len(),
        output_path.display()
    );

    let book = CandleBook::load(provider, symbols, start, end);
    if book.symbols().is_empty() {
        return Err(anyhow!(
            "No market data available from {} for {}",
            provider.name(),
            symbols.join(", ")
        ));
    }

    book.into_snapshot(provider.name()).save_to_file(output_path)?;
    info!(
        "Market data snapshot successfully written to {}",
        output_path.display()
    );

    Ok(())
}
