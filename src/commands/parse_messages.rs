use crate::extractor::SignalExtractor;
use crate::formatter::format_signal;
use crate::messages::{load_messages, MessageWindow};
use crate::models::ParsedSignal;
use crate::output::write_json;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

/// Extracts signals from the messages under `input` and writes them as JSON, or as canonical
/// text blocks when `canonical_text` is set.
pub fn run(
    input: &Path,
    window: MessageWindow,
    extractor: &SignalExtractor,
    output: Option<&Path>,
    canonical_text: bool,
) -> Result<Vec<ParsedSignal>> {
    let messages = load_messages(input, window)?;
    let signals = extractor.extract_all(&messages);
    info!(
        "Extracted {} signals from {} messages",
        signals.len(),
        messages.len()
    );

    if canonical_text {
        let rendered = signals
            .iter()
            .map(|signal| {
                format!(
                    "[{}] {}\n{}",
                    signal.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    signal.channel,
                    format_signal(signal)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        match output {
            Some(path) => fs::write(path, rendered + "\n")
                .with_context(|| format!("Failed to write signals to {}", path.display()))?,
            None => println!("{}", rendered),
        }
    } else {
        write_json(&signals, output)?;
    }

    if let Some(path) = output {
        info!("Signals written to {}", path.display());
    }
    Ok(signals)
}
