//! Fixtures and in-memory fakes shared by the unit tests.

use std::cell::RefCell;

use chrono::{DateTime, FixedOffset};

use crate::db::{CustomEventFilter, CustomEventStore, StoreError};
use crate::models::{Event, OnSaleStatus};
use crate::query::EventQuery;
use crate::remote::{RemoteEventFetcher, RemoteFetchError, RemotePage};
use crate::webhook::{RemoteWebhook, WebhookAction, WebhookApi, WebhookRegistrationError};

fn at(start: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(start).expect("fixture timestamp")
}

pub fn remote_event(id: &str, start: &str, tickets: &[OnSaleStatus]) -> Event {
    let start = at(start);
    Event {
        id: id.to_string(),
        title: format!("Event {id}"),
        start_local: start,
        end_local: start,
        url: Some(format!("https://www.eventbrite.com/e/{id}")),
        status: None,
        tickets: tickets.to_vec(),
        image_url: None,
        organizer_name: None,
        venue_name: None,
        is_custom: false,
        listed: true,
    }
}

pub fn custom_event(id: &str, start: &str, organizer: &str) -> Event {
    let start = at(start);
    Event {
        id: id.to_string(),
        title: format!("Custom {id}"),
        start_local: start,
        end_local: start,
        url: Some(format!("https://example.com/events/{id}")),
        status: None,
        tickets: Vec::new(),
        image_url: None,
        organizer_name: Some(organizer.to_string()),
        venue_name: None,
        is_custom: true,
        listed: true,
    }
}

pub trait EventFixture {
    fn with_organizer(self, name: &str) -> Self;
    fn with_venue(self, name: &str) -> Self;
    fn unlisted(self) -> Self;
}

impl EventFixture for Event {
    fn with_organizer(mut self, name: &str) -> Self {
        self.organizer_name = Some(name.to_string());
        self
    }

    fn with_venue(mut self, name: &str) -> Self {
        self.venue_name = Some(name.to_string());
        self
    }

    fn unlisted(mut self) -> Self {
        self.listed = false;
        self
    }
}

/// Serves fixed pages and records every page number requested.
pub struct FakeFetcher {
    pages: Vec<Vec<Event>>,
    fail_on: Option<u32>,
    dropped: Vec<(u32, usize)>,
    requested: RefCell<Vec<u32>>,
}

impl FakeFetcher {
    pub fn pages(pages: Vec<Vec<Event>>) -> Self {
        Self {
            pages,
            fail_on: None,
            dropped: Vec::new(),
            requested: RefCell::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, page: u32) -> Self {
        self.fail_on = Some(page);
        self
    }

    /// Reports `count` extra records on `page` that failed to parse.
    pub fn dropping_on(mut self, page: u32, count: usize) -> Self {
        self.dropped.push((page, count));
        self
    }

    pub fn requested(&self) -> Vec<u32> {
        self.requested.borrow().clone()
    }
}

impl RemoteEventFetcher for FakeFetcher {
    fn fetch(&self, _query: &EventQuery, page: u32) -> Result<RemotePage, RemoteFetchError> {
        self.requested.borrow_mut().push(page);
        if self.fail_on == Some(page) {
            return Err(RemoteFetchError::Api {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        let events = self
            .pages
            .get(page as usize - 1)
            .cloned()
            .unwrap_or_default();
        let dropped: usize = self
            .dropped
            .iter()
            .filter(|(on, _)| *on == page)
            .map(|(_, count)| count)
            .sum();
        Ok(RemotePage {
            record_count: events.len() + dropped,
            events,
            total_pages: self.pages.len() as u32,
        })
    }
}

pub struct FakeStore {
    events: Vec<Event>,
    fail: bool,
    last_filter: RefCell<Option<CustomEventFilter>>,
}

impl FakeStore {
    pub fn with(events: Vec<Event>) -> Self {
        Self {
            events,
            fail: false,
            last_filter: RefCell::new(None),
        }
    }

    pub fn empty() -> Self {
        Self::with(Vec::new())
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::empty()
        }
    }

    pub fn last_filter(&self) -> Option<CustomEventFilter> {
        self.last_filter.borrow().clone()
    }
}

impl CustomEventStore for FakeStore {
    fn list_upcoming(&self, filter: &CustomEventFilter) -> Result<Vec<Event>, StoreError> {
        *self.last_filter.borrow_mut() = Some(filter.clone());
        if self.fail {
            return Err(StoreError::Invalid("store offline".to_string()));
        }
        Ok(self.events.clone())
    }
}

pub struct FakeWebhookApi {
    hooks: RefCell<Vec<RemoteWebhook>>,
    created: RefCell<Vec<(String, Vec<WebhookAction>)>>,
    deleted: RefCell<Vec<String>>,
    fail: bool,
}

impl FakeWebhookApi {
    pub fn with(hooks: Vec<RemoteWebhook>) -> Self {
        Self {
            hooks: RefCell::new(hooks),
            created: RefCell::new(Vec::new()),
            deleted: RefCell::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with(Vec::new())
        }
    }

    pub fn created(&self) -> Vec<(String, Vec<WebhookAction>)> {
        self.created.borrow().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.borrow().clone()
    }
}

impl WebhookApi for FakeWebhookApi {
    fn list_webhooks(&self) -> Result<Vec<RemoteWebhook>, WebhookRegistrationError> {
        if self.fail {
            return Err(WebhookRegistrationError::Http("connection refused".to_string()));
        }
        Ok(self.hooks.borrow().clone())
    }

    fn create_webhook(
        &self,
        endpoint_url: &str,
        actions: &[WebhookAction],
    ) -> Result<RemoteWebhook, WebhookRegistrationError> {
        let hook = RemoteWebhook {
            id: Some(format!("new-{}", self.created.borrow().len() + 1)),
            endpoint_url: endpoint_url.to_string(),
        };
        self.created
            .borrow_mut()
            .push((endpoint_url.to_string(), actions.to_vec()));
        self.hooks.borrow_mut().push(hook.clone());
        Ok(hook)
    }

    fn delete_webhook(&self, id: &str) -> Result<(), WebhookRegistrationError> {
        self.deleted.borrow_mut().push(id.to_string());
        self.hooks
            .borrow_mut()
            .retain(|hook| hook.id.as_deref() != Some(id));
        Ok(())
    }
}
