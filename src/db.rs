use std::path::Path;

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use reqwest::Url;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::models::Event;
use crate::utils;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid custom event: {0}")]
    Invalid(String),
}

/// Filter applied when reading custom events.
#[derive(Debug, Clone)]
pub struct CustomEventFilter {
    /// Events ending before this date are not returned.
    pub today: NaiveDate,
    pub organizer: Option<String>,
    pub venue: Option<String>,
    pub event_id: Option<String>,
    pub exclude_ids: Vec<String>,
}

impl CustomEventFilter {
    pub fn upcoming(today: NaiveDate) -> Self {
        Self {
            today,
            organizer: None,
            venue: None,
            event_id: None,
            exclude_ids: Vec::new(),
        }
    }
}

pub trait CustomEventStore {
    fn list_upcoming(&self, filter: &CustomEventFilter) -> Result<Vec<Event>, StoreError>;
}

/// A custom event row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEventRecord {
    pub id: String,
    pub title: String,
    pub start_date: Option<String>,
    pub start_time: Option<String>,
    pub end_date: Option<String>,
    pub end_time: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub organizer: Option<String>,
    pub venue: Option<String>,
}

/// Input for creating or replacing a custom event. Values are sanitized
/// before they are written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewCustomEvent {
    pub id: Option<String>,
    pub title: String,
    pub start_date: String,
    pub start_time: String,
    pub end_date: String,
    pub end_time: String,
    pub url: String,
    pub image_url: String,
    pub organizer: String,
    pub venue: String,
}

pub struct Store {
    conn: Connection,
    tz: Tz,
}

impl Store {
    pub fn open(path: &Path, tz: Tz) -> Result<Self, StoreError> {
        utils::ensure_parent(path);
        let conn = Connection::open(path)?;
        Self::with_connection(conn, tz)
    }

    pub fn open_in_memory(tz: Tz) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, tz)
    }

    fn with_connection(conn: Connection, tz: Tz) -> Result<Self, StoreError> {
        let store = Self { conn, tz };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS custom_events(
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                start_date TEXT,
                start_time TEXT,
                end_date TEXT,
                end_time TEXT,
                url TEXT,
                image_url TEXT,
                organizer TEXT,
                venue TEXT
            );
            CREATE INDEX IF NOT EXISTS custom_events_dates
                ON custom_events (start_date, end_date);",
        )?;
        Ok(())
    }

    pub fn upsert(&self, input: NewCustomEvent) -> Result<String, StoreError> {
        let record = sanitize(input)?;
        self.conn.execute(
            "INSERT INTO custom_events
                (id, title, start_date, start_time, end_date, end_time, url, image_url, organizer, venue)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               title = excluded.title,
               start_date = excluded.start_date,
               start_time = excluded.start_time,
               end_date = excluded.end_date,
               end_time = excluded.end_time,
               url = excluded.url,
               image_url = excluded.image_url,
               organizer = excluded.organizer,
               venue = excluded.venue",
            params![
                record.id,
                record.title,
                record.start_date,
                record.start_time,
                record.end_date,
                record.end_time,
                record.url,
                record.image_url,
                record.organizer,
                record.venue
            ],
        )?;
        Ok(record.id)
    }

    pub fn get(&self, id: &str) -> Result<Option<CustomEventRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                "SELECT id, title, start_date, start_time, end_date, end_time, url, image_url, organizer, venue
                 FROM custom_events WHERE id = ?1",
                params![id],
                read_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM custom_events WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }
}

impl CustomEventStore for Store {
    fn list_upcoming(&self, filter: &CustomEventFilter) -> Result<Vec<Event>, StoreError> {
        let today = filter.today.format("%Y-%m-%d").to_string();
        let mut stmt = self.conn.prepare(
            "SELECT id, title, start_date, start_time, end_date, end_time, url, image_url, organizer, venue
             FROM custom_events
             WHERE COALESCE(NULLIF(end_date, ''), start_date) >= ?1
               AND (?2 IS NULL OR organizer = ?2)
               AND (?3 IS NULL OR venue = ?3)
               AND (?4 IS NULL OR id = ?4)
             ORDER BY start_date, start_time, id",
        )?;
        let rows = stmt.query_map(
            params![today, filter.organizer, filter.venue, filter.event_id],
            read_record,
        )?;

        let mut out = Vec::new();
        for row in rows {
            let record = row?;
            if filter.exclude_ids.contains(&record.id) {
                continue;
            }
            match Event::from_custom(record, self.tz) {
                Ok(event) => out.push(event),
                Err(err) => debug!("dropping custom event: {err}"),
            }
        }
        Ok(out)
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<CustomEventRecord> {
    Ok(CustomEventRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        start_date: row.get(2)?,
        start_time: row.get(3)?,
        end_date: row.get(4)?,
        end_time: row.get(5)?,
        url: row.get(6)?,
        image_url: row.get(7)?,
        organizer: row.get(8)?,
        venue: row.get(9)?,
    })
}

fn sanitize(input: NewCustomEvent) -> Result<CustomEventRecord, StoreError> {
    let title = clean_text(&input.title);
    if title.is_empty() {
        return Err(StoreError::Invalid("title is required".to_string()));
    }

    let start_date = normalize_date(&input.start_date);
    let start_time = normalize_time(&input.start_time);
    let id = input
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| {
            stable_id(
                &title,
                start_date.as_deref().unwrap_or_default(),
                start_time.as_deref().unwrap_or_default(),
            )
        });

    Ok(CustomEventRecord {
        id,
        title,
        start_date,
        start_time,
        end_date: normalize_date(&input.end_date),
        end_time: normalize_time(&input.end_time),
        url: normalize_url(&input.url),
        image_url: normalize_url(&input.image_url),
        organizer: Some(clean_text(&input.organizer)).filter(|s| !s.is_empty()),
        venue: Some(clean_text(&input.venue)).filter(|s| !s.is_empty()),
    })
}

fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_date(input: &str) -> Option<String> {
    let input = input.trim();
    ["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}

fn normalize_time(input: &str) -> Option<String> {
    let input = input.trim().to_uppercase();
    ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&input, fmt).ok())
        .map(|time| time.format("%H:%M").to_string())
}

fn normalize_url(input: &str) -> Option<String> {
    let input = input.trim();
    Url::parse(input)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(|_| input.to_string())
}

fn stable_id(title: &str, start_date: &str, start_time: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(start_date.as_bytes());
    hasher.update(b"|");
    hasher.update(start_time.as_bytes());
    format!("custom-{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory(chrono_tz::UTC).unwrap()
    }

    fn new_event(title: &str, start: &str, end: &str) -> NewCustomEvent {
        NewCustomEvent {
            title: title.to_string(),
            start_date: start.to_string(),
            end_date: end.to_string(),
            url: "https://example.com/tickets".to_string(),
            ..NewCustomEvent::default()
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn upsert_sanitizes_input() {
        let store = store();
        let id = store
            .upsert(NewCustomEvent {
                title: "  Spring   Fair ".to_string(),
                start_date: "05/03/2024".to_string(),
                start_time: "7:30 pm".to_string(),
                end_time: "garbage".to_string(),
                url: "javascript:alert(1)".to_string(),
                organizer: " Acme ".to_string(),
                ..NewCustomEvent::default()
            })
            .unwrap();

        let record = store.get(&id).unwrap().unwrap();
        assert!(id.starts_with("custom-"));
        assert_eq!(record.title, "Spring Fair");
        assert_eq!(record.start_date.as_deref(), Some("2024-05-03"));
        assert_eq!(record.start_time.as_deref(), Some("19:30"));
        assert_eq!(record.end_time, None);
        assert_eq!(record.url, None);
        assert_eq!(record.organizer.as_deref(), Some("Acme"));
        assert_eq!(record.venue, None);
    }

    #[test]
    fn upsert_requires_a_title() {
        let err = store().upsert(new_event("   ", "2024-05-03", "")).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn upsert_replaces_existing_id() {
        let store = store();
        let mut input = new_event("Fair", "2024-05-03", "");
        input.id = Some("fair".to_string());
        store.upsert(input.clone()).unwrap();
        input.title = "Fair (moved)".to_string();
        store.upsert(input).unwrap();

        assert_eq!(store.get("fair").unwrap().unwrap().title, "Fair (moved)");
        assert!(store.delete("fair").unwrap());
        assert!(!store.delete("fair").unwrap());
    }

    #[test]
    fn list_upcoming_uses_end_date_when_present() {
        let store = store();
        store.upsert(new_event("Past", "2024-04-01", "")).unwrap();
        store.upsert(new_event("Ongoing", "2024-04-20", "2024-05-02")).unwrap();
        store.upsert(new_event("Today", "2024-05-01", "")).unwrap();
        store.upsert(new_event("Ended", "2024-04-20", "2024-04-30")).unwrap();

        let events = store.list_upcoming(&CustomEventFilter::upcoming(today())).unwrap();
        let titles: Vec<&str> = events.iter().map(|e| e.title.as_str()).collect();

        assert_eq!(titles, vec!["Ongoing", "Today"]);
        assert!(events.iter().all(|e| e.is_custom));
    }

    #[test]
    fn list_upcoming_filters_by_taxonomy_and_ids() {
        let store = store();
        let mut acme = new_event("Acme Night", "2024-05-05", "");
        acme.organizer = "Acme".to_string();
        acme.venue = "The Loft".to_string();
        acme.id = Some("a".to_string());
        let mut beta = new_event("Beta Night", "2024-05-06", "");
        beta.organizer = "Beta".to_string();
        beta.id = Some("b".to_string());
        let mut acme_late = new_event("Acme Late", "2024-05-07", "");
        acme_late.organizer = "Acme".to_string();
        acme_late.id = Some("c".to_string());
        for input in [acme, beta, acme_late] {
            store.upsert(input).unwrap();
        }

        let mut filter = CustomEventFilter::upcoming(today());
        filter.organizer = Some("Acme".to_string());
        filter.exclude_ids = vec!["c".to_string()];
        let ids: Vec<String> = store
            .list_upcoming(&filter)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a"]);

        let mut by_venue = CustomEventFilter::upcoming(today());
        by_venue.venue = Some("The Loft".to_string());
        assert_eq!(store.list_upcoming(&by_venue).unwrap().len(), 1);

        let mut single = CustomEventFilter::upcoming(today());
        single.event_id = Some("b".to_string());
        assert_eq!(store.list_upcoming(&single).unwrap()[0].title, "Beta Night");
    }

    #[test]
    fn undated_rows_are_dropped() {
        let store = store();
        store
            .conn
            .execute(
                "INSERT INTO custom_events (id, title, start_date, end_date) VALUES ('x', 'Undated', '', '2024-06-01')",
                [],
            )
            .unwrap();
        store.upsert(new_event("Dated", "2024-06-01", "")).unwrap();

        let events = store.list_upcoming(&CustomEventFilter::upcoming(today())).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Dated");
    }
}
