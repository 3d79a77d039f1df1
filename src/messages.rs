use crate::models::ChannelMessage;
use crate::text::collapse_whitespace;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const UNKNOWN_CHANNEL: &str = "Unknown";
const MESSAGE_FILE_MARKER: &str = "_Message_";

/// One message as stored in a channel dump.
#[derive(Debug, Deserialize)]
struct MessageRecord {
    date: String,
    #[serde(default, alias = "text")]
    message: Option<String>,
    #[serde(default, alias = "channel")]
    chat: Option<String>,
}

/// Inclusive date window applied while loading.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl MessageWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }
}

/// Loads channel messages from `path`.
///
/// A directory is scanned for `*_Message_*.json` files, each holding one message object or an
/// array of them. A single file may be a JSON array or JSON lines. Records that cannot be
/// decoded are skipped with a warning. Messages outside `window` or without text are dropped,
/// whitespace is collapsed, and the result is ordered by date with ids assigned from 1.
pub fn load_messages(path: &Path, window: MessageWindow) -> Result<Vec<ChannelMessage>> {
    let records = if path.is_dir() {
        load_message_dir(path)?
    } else {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read message file {}", path.display()))?;
        parse_message_file(&content)
            .with_context(|| format!("Failed to decode message file {}", path.display()))?
    };

    let total = records.len();
    let mut messages: Vec<ChannelMessage> = records
        .into_iter()
        .filter_map(|record| {
            let date = match parse_message_date(&record.date) {
                Some(date) => date,
                None => {
                    debug!("Skipping message with unreadable date '{}'", record.date);
                    return None;
                }
            };
            if !window.contains(date) {
                return None;
            }
            let text = collapse_whitespace(record.message.as_deref().unwrap_or_default());
            if text.is_empty() {
                return None;
            }
            let channel = record
                .chat
                .map(|chat| chat.trim().to_string())
                .filter(|chat| !chat.is_empty())
                .unwrap_or_else(|| UNKNOWN_CHANNEL.to_string());
            Some(ChannelMessage {
                id: 0,
                date,
                text,
                channel,
            })
        })
        .collect();

    messages.sort_by_key(|message| message.date);
    for (idx, message) in messages.iter_mut().enumerate() {
        message.id = idx as u64 + 1;
    }

    info!(
        "Loaded {} of {} messages from {}",
        messages.len(),
        total,
        path.display()
    );
    Ok(messages)
}

fn load_message_dir(dir: &Path) -> Result<Vec<MessageRecord>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list message directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| is_message_file(path))
        .collect();
    files.sort();

    let mut records = Vec::new();
    for file in files {
        let parsed = fs::read_to_string(&file)
            .map_err(anyhow::Error::from)
            .and_then(|content| parse_message_file(&content));
        match parsed {
            Ok(mut batch) => records.append(&mut batch),
            Err(err) => warn!("Skipping message file {}: {}", file.display(), err),
        }
    }
    Ok(records)
}

fn is_message_file(path: &Path) -> bool {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let has_marker = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(MESSAGE_FILE_MARKER));
    path.is_file() && is_json && has_marker
}

fn parse_message_file(content: &str) -> Result<Vec<MessageRecord>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Invalid JSON message array");
    }
    if let Ok(record) = serde_json::from_str::<MessageRecord>(trimmed) {
        return Ok(vec![record]);
    }

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<MessageRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) => warn!("Skipping message line {}: {}", line_no + 1, err),
        }
    }
    if records.is_empty() {
        return Err(anyhow!("No message records found"));
    }
    Ok(records)
}

/// Accepts RFC 3339 timestamps and naive `YYYY-MM-DD[ HH:MM:SS]` forms, the latter read as UTC.
pub fn parse_message_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
