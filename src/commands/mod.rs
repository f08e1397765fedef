pub mod cluster;
pub mod events;

use anyhow::{Context, Result};
use chrono::TimeZone;
use eventsphere::{Config, EventStore};
use serde::Serialize;

/// Open the configured event store
pub fn open_store(config: &Config) -> Result<EventStore> {
    EventStore::open_with_config(&config.storage).with_context(|| {
        format!(
            "Failed to open event store in {}",
            config.storage.data_dir_path().display()
        )
    })
}

/// Epoch milliseconds from RFC 3339 or a plain integer
pub fn parse_time(value: &str) -> Result<i64> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<i64>() {
        return Ok(millis);
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .with_context(|| format!("Invalid time '{value}': expected RFC 3339 or epoch milliseconds"))
}

/// Human-readable UTC time for epoch milliseconds
pub fn format_time(millis: i64) -> String {
    chrono::Utc
        .timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
