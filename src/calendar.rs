use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::aggregate::derive_status;
use crate::models::{Event, SaleStatus};

pub const DEFAULT_AFFILIATE_CODE: &str = "odwdwdwordpress";
const TITLE_LIMIT: usize = 20;

static SLUG_INVALID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_-]+").expect("slug regex"));

/// One calendar cell entry as the rendering layer consumes it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DisplayEvent {
    pub date: String,
    pub title: String,
    pub url: String,
    pub status: String,
    pub status_class: String,
    pub event_image: String,
}

/// Display records keyed by `YYYY-MM-DD`, each day in merge order.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct CalendarBucket(BTreeMap<String, Vec<DisplayEvent>>);

impl CalendarBucket {
    pub fn get(&self, date: NaiveDate) -> Option<&[DisplayEvent]> {
        self.0.get(&date_key(date)).map(Vec::as_slice)
    }

    pub fn dates(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// All display records, ordered by date.
    pub fn flatten(&self) -> Vec<DisplayEvent> {
        self.0.values().flatten().cloned().collect()
    }

    /// Number of dates with at least one event.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, date: NaiveDate, event: DisplayEvent) {
        self.0.entry(date_key(date)).or_default().push(event);
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone)]
pub struct CalendarFormatter {
    tz: Tz,
    affiliate_code: String,
}

impl CalendarFormatter {
    pub fn new(tz: Tz, affiliate_code: impl Into<String>) -> Self {
        Self {
            tz,
            affiliate_code: affiliate_code.into(),
        }
    }

    pub fn format(&self, events: &[Event]) -> CalendarBucket {
        let mut bucket = CalendarBucket::default();
        for event in events {
            let start = event.start_local.with_timezone(&self.tz);
            bucket.push(start.date_naive(), self.display(event));
        }
        bucket
    }

    pub fn display(&self, event: &Event) -> DisplayEvent {
        let start = event.start_local.with_timezone(&self.tz);
        let mut status = event.status.unwrap_or_else(|| derive_status(event));

        let url = match event.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) if event.is_custom => url.to_string(),
            Some(url) => self.with_affiliate(url),
            None => {
                status.code = SaleStatus::NoLink;
                "#".to_string()
            }
        };

        DisplayEvent {
            date: start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            title: event.title.chars().take(TITLE_LIMIT).collect(),
            url,
            status: status.label.as_str().to_string(),
            status_class: status_class(status.code),
            event_image: event.image_url.clone().unwrap_or_default(),
        }
    }

    fn with_affiliate(&self, url: &str) -> String {
        if self.affiliate_code.is_empty() {
            return url.to_string();
        }
        match Url::parse(url) {
            Ok(mut parsed) => {
                parsed
                    .query_pairs_mut()
                    .append_pair("aff", &self.affiliate_code);
                parsed.to_string()
            }
            // Unparseable links are passed through untouched.
            Err(_) => url.to_string(),
        }
    }
}

pub fn status_class(code: SaleStatus) -> String {
    let lowered = code.code().to_lowercase();
    SLUG_INVALID
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}
