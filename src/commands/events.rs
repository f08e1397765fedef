//! Event CRUD commands

use anyhow::{bail, Result};
use colored::*;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{format_time, open_store, parse_time, print_json};
use eventsphere::{Category, Config, Event, EventQuery};

/// Fields for `add`
pub struct Draft {
    pub id: Option<String>,
    pub title: String,
    pub category: String,
    pub latitude: f64,
    pub longitude: f64,
    pub at: Option<String>,
}

/// Fields for `update`; `None` leaves the stored value alone
pub struct Changes {
    pub title: Option<String>,
    pub category: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub at: Option<String>,
}

impl Changes {
    fn into_patch(self) -> Result<Map<String, Value>> {
        let mut patch = Map::new();
        if let Some(title) = self.title {
            patch.insert("title".into(), json!(title));
        }
        if let Some(category) = self.category {
            patch.insert("category".into(), json!(category));
        }
        if let Some(latitude) = self.latitude {
            patch.insert("latitude".into(), json!(latitude));
        }
        if let Some(longitude) = self.longitude {
            patch.insert("longitude".into(), json!(longitude));
        }
        if let Some(at) = self.at {
            patch.insert("timestamp".into(), json!(parse_time(&at)?));
        }
        Ok(patch)
    }
}

fn parse_category(value: &str) -> Result<Category> {
    value.parse::<Category>().map_err(anyhow::Error::msg)
}

fn print_event(event: &Event) {
    println!(
        "{}  {}  {}",
        format_time(event.timestamp).dimmed(),
        event.title.bold(),
        format!("[{}]", event.category).cyan()
    );
    println!(
        "    {} ({:.4}, {:.4})",
        event.id.dimmed(),
        event.latitude,
        event.longitude
    );
}

fn print_events(events: &[Event], json: bool) -> Result<()> {
    if json {
        return print_json(events);
    }
    if events.is_empty() {
        println!("{}", "No events".dimmed());
        return Ok(());
    }
    for event in events {
        print_event(event);
    }
    println!("\n{} event(s)", events.len());
    Ok(())
}

pub fn add(config: &Config, draft: Draft, json: bool) -> Result<()> {
    let timestamp = match draft.at.as_deref() {
        Some(at) => parse_time(at)?,
        None => chrono::Utc::now().timestamp_millis(),
    };
    let event = Event {
        id: draft.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        title: draft.title,
        category: parse_category(&draft.category)?,
        latitude: draft.latitude,
        longitude: draft.longitude,
        timestamp,
    };

    let store = open_store(config)?;
    let created = store.create(&event)?;

    if json {
        return print_json(&created);
    }
    println!("{} {}", "✓ Created".green(), created.id);
    Ok(())
}

pub fn show(config: &Config, id: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let Some(event) = store.read(id)? else {
        bail!("No event with id '{id}'");
    };

    if json {
        return print_json(&event);
    }
    print_event(&event);
    Ok(())
}

pub fn list(
    config: &Config,
    since: Option<&str>,
    until: Option<&str>,
    categories: &[String],
    json: bool,
) -> Result<()> {
    let query = EventQuery {
        from: since.map(parse_time).transpose()?,
        to: until.map(parse_time).transpose()?,
        bounds: None,
        categories: categories
            .iter()
            .map(|c| parse_category(c))
            .collect::<Result<_>>()?,
    };

    let store = open_store(config)?;
    let events = if query == EventQuery::default() {
        store.list()?
    } else {
        store.query(&query)?
    };
    print_events(&events, json)
}

pub fn search(
    config: &Config,
    query: Option<&str>,
    category: Option<&str>,
    json: bool,
) -> Result<()> {
    let category = category.map(parse_category).transpose()?;
    let store = open_store(config)?;
    let events = store.search(category, query)?;
    print_events(&events, json)
}

pub fn update(config: &Config, id: &str, changes: Changes, json: bool) -> Result<()> {
    let patch = changes.into_patch()?;
    if patch.is_empty() {
        bail!("Nothing to update: pass at least one of --title, --category, --lat, --lon, --at");
    }

    let store = open_store(config)?;
    let updated = store.update(id, &patch)?;

    if json {
        return print_json(&updated);
    }
    println!("{} {}", "✓ Updated".green(), updated.id);
    print_event(&updated);
    Ok(())
}

pub fn delete(config: &Config, id: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let removed = store.delete(id)?;

    if json {
        return print_json(&json!({ "id": id, "removed": removed }));
    }
    if removed {
        println!("{} {}", "✓ Deleted".green(), id);
    } else {
        println!("{} {}", "No event with id".dimmed(), id);
    }
    Ok(())
}

pub fn clear(config: &Config, yes: bool, json: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete every event without --yes");
    }

    let store = open_store(config)?;
    let removed = store.clear()?;

    if json {
        return print_json(&json!({ "removed": removed }));
    }
    println!("{} {} event(s)", "✓ Cleared".green(), removed);
    Ok(())
}

pub fn count(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let count = store.count()?;

    if json {
        return print_json(&json!({ "count": count }));
    }
    println!("{count}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_into_patch() {
        let patch = Changes {
            title: Some("New".into()),
            category: None,
            latitude: Some(-12.5),
            longitude: None,
            at: Some("1000".into()),
        }
        .into_patch()
        .unwrap();

        assert_eq!(patch.len(), 3);
        assert_eq!(patch["title"], json!("New"));
        assert_eq!(patch["latitude"], json!(-12.5));
        assert_eq!(patch["timestamp"], json!(1000));
    }

    #[test]
    fn test_parse_category_error_lists_choices() {
        let err = parse_category("sports").unwrap_err().to_string();
        assert!(err.contains("natural_disaster"));
    }
}
