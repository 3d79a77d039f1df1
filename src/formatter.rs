use crate::models::{EntrySpec, ParsedSignal};

/// Renders a signal as a normalized text block, one field per line:
///
/// ```text
/// BUY XAUUSD
/// Entry: 2000
/// SL: 1995
/// TP1: 2010
/// TP2: open
/// ```
///
/// Entry is only printed for directional signals. Auxiliary tags go on a trailing
/// `Actions:` line.
pub fn format_signal(signal: &ParsedSignal) -> String {
    let mut lines = Vec::new();

    let header = [
        signal.action.map(|action| action.as_str().to_string()),
        signal.symbol.clone(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");
    if !header.is_empty() {
        lines.push(header);
    }

    if signal.action.is_some() {
        lines.push(format!("Entry: {}", format_entry(&signal.entry)));
    }
    if let Some(stop) = signal.stop_loss {
        lines.push(format!("SL: {}", stop));
    }
    for tp in &signal.take_profits {
        if tp.price > 0.0 {
            lines.push(format!("{}: {}", tp.label, tp.price));
        } else {
            lines.push(format!("{}: open", tp.label));
        }
    }
    if !signal.aux_actions.is_empty() {
        let actions: Vec<&str> = signal.aux_actions.iter().map(|a| a.as_str()).collect();
        lines.push(format!("Actions: {}", actions.join(", ")));
    }

    lines.join("\n")
}

fn format_entry(entry: &EntrySpec) -> String {
    match entry {
        EntrySpec::Market => "market".to_string(),
        EntrySpec::Price(price) => price.to_string(),
        EntrySpec::Range { low, high } => format!("{} - {}", low, high),
    }
}
