use chrono::{DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::CustomEventRecord;
use crate::remote::{RemoteEventRecord, RemoteTime};

/// A source record that cannot be placed on a calendar.
#[derive(Debug, Error, PartialEq)]
#[error("event {id} has no resolvable start date")]
pub struct MalformedEventError {
    pub id: String,
}

/// Internal sale status code of an event.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    Available,
    SoldOut,
    Unavailable,
    NotYetOnSale,
    NoLink,
}

impl SaleStatus {
    pub fn code(self) -> &'static str {
        match self {
            SaleStatus::Available => "AVAILABLE",
            SaleStatus::SoldOut => "SOLD_OUT",
            SaleStatus::Unavailable => "UNAVAILABLE",
            SaleStatus::NotYetOnSale => "NOT_YET_ON_SALE",
            SaleStatus::NoLink => "NO_LINK",
        }
    }
}

/// On-sale state reported for a single remote ticket class.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnSaleStatus {
    Available,
    SoldOut,
    Unavailable,
    NotYetOnSale,
    #[serde(other)]
    Other,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusLabel {
    #[serde(rename = "Tickets")]
    Tickets,
    #[serde(rename = "Sold Out")]
    SoldOut,
    #[serde(rename = "Coming Soon")]
    ComingSoon,
}

impl StatusLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusLabel::Tickets => "Tickets",
            StatusLabel::SoldOut => "Sold Out",
            StatusLabel::ComingSoon => "Coming Soon",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventStatus {
    pub code: SaleStatus,
    pub label: StatusLabel,
}

impl EventStatus {
    pub fn new(code: SaleStatus, label: StatusLabel) -> Self {
        Self { code, label }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub start_local: DateTime<FixedOffset>,
    pub end_local: DateTime<FixedOffset>,
    pub url: Option<String>,
    /// `None` until the merge pass derives it.
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub tickets: Vec<OnSaleStatus>,
    pub image_url: Option<String>,
    pub organizer_name: Option<String>,
    pub venue_name: Option<String>,
    pub is_custom: bool,
    pub listed: bool,
}

impl Event {
    pub fn from_remote(record: RemoteEventRecord, tz: Tz) -> Result<Self, MalformedEventError> {
        let start_local = match record.start.as_ref().and_then(|time| resolve_remote(time, tz)) {
            Some(start) => start,
            None => return Err(MalformedEventError { id: record.id }),
        };
        let end_local = record
            .end
            .as_ref()
            .and_then(|time| resolve_remote(time, tz))
            .unwrap_or(start_local);

        Ok(Event {
            id: record.id,
            title: record.name.and_then(|name| name.text).unwrap_or_default(),
            start_local,
            end_local,
            url: non_empty(record.url),
            status: None,
            tickets: record
                .ticket_classes
                .into_iter()
                .map(|ticket| ticket.on_sale_status)
                .collect(),
            image_url: non_empty(record.logo.and_then(|logo| logo.url)),
            organizer_name: non_empty(record.organizer.and_then(|organizer| organizer.name)),
            venue_name: non_empty(record.venue.and_then(|venue| venue.name)),
            is_custom: false,
            listed: record.listed.unwrap_or(true),
        })
    }

    pub fn from_custom(record: CustomEventRecord, tz: Tz) -> Result<Self, MalformedEventError> {
        let start_local = match resolve_custom(
            record.start_date.as_deref(),
            record.start_time.as_deref(),
            tz,
        ) {
            Some(start) => start,
            None => return Err(MalformedEventError { id: record.id }),
        };
        let end_local = resolve_custom(record.end_date.as_deref(), record.end_time.as_deref(), tz)
            .unwrap_or(start_local);

        Ok(Event {
            id: record.id,
            title: record.title,
            start_local,
            end_local,
            url: non_empty(record.url),
            status: None,
            tickets: Vec::new(),
            image_url: non_empty(record.image_url),
            organizer_name: non_empty(record.organizer),
            venue_name: non_empty(record.venue),
            is_custom: true,
            listed: true,
        })
    }

    pub fn has_link(&self) -> bool {
        self.url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn resolve_remote(time: &RemoteTime, tz: Tz) -> Option<DateTime<FixedOffset>> {
    if let Some(utc) = time.utc.as_deref() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(utc) {
            return Some(parsed.with_timezone(&Utc).with_timezone(&tz).fixed_offset());
        }
    }

    // Fall back to the wall-clock time in the event's own zone.
    let local = time.local.as_deref()?;
    let naive = NaiveDateTime::parse_from_str(local, "%Y-%m-%dT%H:%M:%S").ok()?;
    let source_tz = time
        .timezone
        .as_deref()
        .and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(tz);
    localize(naive, source_tz).map(|dt| dt.with_timezone(&tz).fixed_offset())
}

fn resolve_custom(date: Option<&str>, time: Option<&str>, tz: Tz) -> Option<DateTime<FixedOffset>> {
    let date = date.map(str::trim).filter(|s| !s.is_empty())?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = time
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| NaiveTime::parse_from_str(s, "%H:%M").ok())
        .unwrap_or(NaiveTime::MIN);
    localize(NaiveDateTime::new(date, time), tz).map(|dt| dt.fixed_offset())
}

fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(dt, _) => Some(dt),
        // Wall-clock time skipped by a DST jump; keep the event an hour later.
        LocalResult::None => tz.from_local_datetime(&(naive + Duration::hours(1))).earliest(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{NamedRef, RemoteLogo, RemoteText, RemoteTicketClass};
    use chrono::Timelike;

    fn remote_record(id: &str, start: Option<RemoteTime>) -> RemoteEventRecord {
        RemoteEventRecord {
            id: id.to_string(),
            name: Some(RemoteText {
                text: Some("Night Market".to_string()),
            }),
            start,
            end: None,
            url: Some("https://www.eventbrite.com/e/1".to_string()),
            logo: Some(RemoteLogo {
                url: Some("https://img.example.com/1.png".to_string()),
            }),
            organizer: Some(NamedRef {
                name: Some("Acme".to_string()),
            }),
            venue: Some(NamedRef { name: None }),
            listed: None,
            ticket_classes: vec![
                RemoteTicketClass {
                    on_sale_status: OnSaleStatus::SoldOut,
                },
                RemoteTicketClass {
                    on_sale_status: OnSaleStatus::Other,
                },
            ],
        }
    }

    #[test]
    fn remote_start_is_converted_to_site_zone() {
        let record = remote_record(
            "1",
            Some(RemoteTime {
                utc: Some("2024-05-02T02:00:00Z".to_string()),
                local: Some("2024-05-01T19:00:00".to_string()),
                timezone: Some("America/Los_Angeles".to_string()),
            }),
        );

        let event = Event::from_remote(record, chrono_tz::America::Los_Angeles).unwrap();

        assert_eq!(event.start_local.date_naive().to_string(), "2024-05-01");
        assert_eq!(event.start_local.hour(), 19);
        assert_eq!(event.end_local, event.start_local);
        assert_eq!(event.title, "Night Market");
        assert_eq!(event.organizer_name.as_deref(), Some("Acme"));
        assert_eq!(event.venue_name, None);
        assert_eq!(event.tickets, vec![OnSaleStatus::SoldOut, OnSaleStatus::Other]);
        assert!(event.listed);
        assert!(!event.is_custom);
        assert!(event.status.is_none());
    }

    #[test]
    fn remote_local_time_is_used_when_utc_is_missing() {
        let record = remote_record(
            "2",
            Some(RemoteTime {
                utc: None,
                local: Some("2024-05-01T19:00:00".to_string()),
                timezone: Some("America/New_York".to_string()),
            }),
        );

        let event = Event::from_remote(record, chrono_tz::America::Los_Angeles).unwrap();

        assert_eq!(event.start_local.hour(), 16);
    }

    #[test]
    fn remote_without_start_is_malformed() {
        let err = Event::from_remote(remote_record("3", None), chrono_tz::UTC).unwrap_err();
        assert_eq!(err.id, "3");
    }

    #[test]
    fn custom_date_only_starts_at_midnight_and_end_defaults_to_start() {
        let record = CustomEventRecord {
            id: "c1".to_string(),
            title: "Potluck".to_string(),
            start_date: Some("2024-05-01".to_string()),
            start_time: None,
            end_date: None,
            end_time: None,
            url: Some(String::new()),
            image_url: None,
            organizer: Some("Acme".to_string()),
            venue: None,
        };

        let event = Event::from_custom(record, chrono_tz::Europe::Berlin).unwrap();

        assert_eq!(event.start_local.to_rfc3339(), "2024-05-01T00:00:00+02:00");
        assert_eq!(event.end_local, event.start_local);
        assert!(event.is_custom);
        assert!(!event.has_link());
        assert_eq!(event.url, None);
    }

    #[test]
    fn custom_without_start_date_is_malformed() {
        let record = CustomEventRecord {
            id: "c2".to_string(),
            title: "Undated".to_string(),
            start_date: Some("  ".to_string()),
            start_time: Some("18:00".to_string()),
            end_date: Some("2024-05-02".to_string()),
            end_time: None,
            url: None,
            image_url: None,
            organizer: None,
            venue: None,
        };

        assert!(Event::from_custom(record, chrono_tz::UTC).is_err());
    }

    #[test]
    fn status_codes_are_screaming_snake_case() {
        assert_eq!(SaleStatus::NotYetOnSale.code(), "NOT_YET_ON_SALE");
        assert_eq!(
            serde_json::to_string(&SaleStatus::NoLink).unwrap(),
            "\"NO_LINK\""
        );
        assert_eq!(
            serde_json::from_str::<OnSaleStatus>("\"SALES_ENDED\"").unwrap(),
            OnSaleStatus::Other
        );
    }

    #[test]
    fn custom_start_inside_a_dst_gap_is_kept() {
        let record = CustomEventRecord {
            id: "c".to_string(),
            title: "Early Bird".to_string(),
            start_date: Some("2024-03-10".to_string()),
            start_time: Some("02:30".to_string()),
            end_date: None,
            end_time: None,
            url: None,
            image_url: None,
            organizer: None,
            venue: None,
        };

        let event = Event::from_custom(record, chrono_tz::America::New_York).unwrap();

        assert_eq!(event.start_local.to_rfc3339(), "2024-03-10T03:30:00-04:00");
    }
}
