use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::{CustomEventFilter, CustomEventStore, StoreError};
use crate::models::{Event, EventStatus, OnSaleStatus, SaleStatus, StatusLabel};
use crate::query::EventQuery;
use crate::remote::{RemoteEventFetcher, RemoteFetchError};

pub const DEFAULT_EVENT_CAP: usize = 200;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("remote fetch failed: {0}")]
    Remote(#[from] RemoteFetchError),
    #[error("custom event store failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub tz: Tz,
    pub event_cap: usize,
    pub enable_custom_events: bool,
    pub show_private_events: bool,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            tz: chrono_tz::UTC,
            event_cap: DEFAULT_EVENT_CAP,
            enable_custom_events: true,
            show_private_events: false,
        }
    }
}

pub struct EventMerger<F, S> {
    fetcher: F,
    store: S,
    settings: MergeSettings,
}

impl<F, S> EventMerger<F, S>
where
    F: RemoteEventFetcher,
    S: CustomEventStore,
{
    pub fn new(fetcher: F, store: S, settings: MergeSettings) -> Self {
        Self {
            fetcher,
            store,
            settings,
        }
    }

    pub fn aggregate(&self, query: &EventQuery) -> Result<Vec<Event>, AggregateError> {
        let today = Utc::now().with_timezone(&self.settings.tz).date_naive();
        self.aggregate_on(query, today)
    }

    /// Runs a merge pass treating `today` as the current site-local date.
    pub fn aggregate_on(
        &self,
        query: &EventQuery,
        today: NaiveDate,
    ) -> Result<Vec<Event>, AggregateError> {
        let mut candidates = self.fetch_remote(query)?;
        let remote_count = candidates.len();

        if custom_events_wanted(query, &self.settings) {
            let filter = CustomEventFilter {
                today,
                organizer: query.organizer.clone(),
                venue: query.venue.clone(),
                event_id: query.event_id.clone(),
                exclude_ids: query.exclude_ids.clone(),
            };
            candidates.extend(self.store.list_upcoming(&filter)?);
        } else {
            debug!("custom events skipped for this query");
        }

        let custom_count = candidates.len() - remote_count;
        let merged = run_pipeline(
            candidates,
            &PipelineContext {
                query,
                show_private_events: self.settings.show_private_events,
            },
        );
        info!(
            remote = remote_count,
            custom = custom_count,
            merged = merged.len(),
            "aggregated events"
        );
        Ok(merged)
    }

    fn fetch_remote(&self, query: &EventQuery) -> Result<Vec<Event>, RemoteFetchError> {
        let first = self.fetcher.fetch(query, 1)?;
        let total_pages = first.total_pages;
        let mut events = first.events;

        let mut page = 2;
        while page <= total_pages && events.len() < self.settings.event_cap {
            let next = self.fetcher.fetch(query, page)?;
            // A page of only malformed records is not the end of the listing.
            if next.record_count == 0 {
                break;
            }
            events.extend(next.events);
            page += 1;
        }

        if events.len() > self.settings.event_cap {
            debug!(cap = self.settings.event_cap, "truncating remote events");
            events.truncate(self.settings.event_cap);
        }
        Ok(events)
    }
}

fn custom_events_wanted(query: &EventQuery, settings: &MergeSettings) -> bool {
    if !settings.enable_custom_events || query.disallow_custom_events {
        return false;
    }
    if query.event_id.as_deref().is_some_and(|id| !id.is_empty()) {
        return false;
    }
    query.allow_custom_events || !query.has_remote_taxonomy()
}

pub struct PipelineContext<'a> {
    pub query: &'a EventQuery,
    pub show_private_events: bool,
}

pub type Stage = fn(Vec<Event>, &PipelineContext<'_>) -> Vec<Event>;

/// Stages applied to the merged candidates, in order.
pub const PIPELINE: &[Stage] = &[
    assign_statuses,
    drop_unlisted,
    retain_organizer,
    retain_venue,
    drop_excluded,
    dedup_by_id,
    order_by_start,
];

pub fn run_pipeline(events: Vec<Event>, ctx: &PipelineContext<'_>) -> Vec<Event> {
    PIPELINE.iter().fold(events, |events, stage| stage(events, ctx))
}

pub fn assign_statuses(mut events: Vec<Event>, _ctx: &PipelineContext<'_>) -> Vec<Event> {
    for event in &mut events {
        event.status = Some(derive_status(event));
    }
    events
}

pub fn drop_unlisted(events: Vec<Event>, ctx: &PipelineContext<'_>) -> Vec<Event> {
    if ctx.show_private_events {
        return events;
    }
    events.into_iter().filter(|event| event.listed).collect()
}

pub fn retain_organizer(events: Vec<Event>, ctx: &PipelineContext<'_>) -> Vec<Event> {
    match ctx.query.organizer.as_deref() {
        Some(name) => events
            .into_iter()
            .filter(|event| event.organizer_name.as_deref() == Some(name))
            .collect(),
        None => events,
    }
}

pub fn retain_venue(events: Vec<Event>, ctx: &PipelineContext<'_>) -> Vec<Event> {
    match ctx.query.venue.as_deref() {
        Some(name) => events
            .into_iter()
            .filter(|event| event.venue_name.as_deref() == Some(name))
            .collect(),
        None => events,
    }
}

pub fn drop_excluded(events: Vec<Event>, ctx: &PipelineContext<'_>) -> Vec<Event> {
    if ctx.query.exclude_ids.is_empty() {
        return events;
    }
    events
        .into_iter()
        .filter(|event| !ctx.query.exclude_ids.contains(&event.id))
        .collect()
}

pub fn dedup_by_id(events: Vec<Event>, _ctx: &PipelineContext<'_>) -> Vec<Event> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|event| seen.insert(event.id.clone()))
        .collect()
}

pub fn order_by_start(mut events: Vec<Event>, _ctx: &PipelineContext<'_>) -> Vec<Event> {
    // sort_by_key is stable, equal starts keep their input order
    events.sort_by_key(|event| event.start_local);
    events
}

pub fn derive_status(event: &Event) -> EventStatus {
    let mut status = if event.is_custom {
        EventStatus::new(SaleStatus::Available, StatusLabel::Tickets)
    } else {
        ticket_status(&event.tickets)
    };
    if !event.has_link() {
        status.code = SaleStatus::NoLink;
    }
    status
}

/// Folds ticket states into one status. AVAILABLE outranks SOLD_OUT and
/// UNAVAILABLE, which outrank NOT_YET_ON_SALE; a later ticket of equal rank
/// replaces an earlier one. UNAVAILABLE ranks with SOLD_OUT but reports as
/// NOT_YET_ON_SALE / "Coming Soon".
pub fn ticket_status(tickets: &[OnSaleStatus]) -> EventStatus {
    let coming_soon = EventStatus::new(SaleStatus::NotYetOnSale, StatusLabel::ComingSoon);
    let mut status = coming_soon;
    let mut held = 0;
    for ticket in tickets {
        let (rank, candidate) = match ticket {
            OnSaleStatus::Available => {
                (2, EventStatus::new(SaleStatus::Available, StatusLabel::Tickets))
            }
            OnSaleStatus::SoldOut => (1, EventStatus::new(SaleStatus::SoldOut, StatusLabel::SoldOut)),
            OnSaleStatus::Unavailable => (1, coming_soon),
            OnSaleStatus::NotYetOnSale => (0, coming_soon),
            OnSaleStatus::Other => continue,
        };
        if rank >= held {
            held = rank;
            status = candidate;
        }
    }
    status
}
