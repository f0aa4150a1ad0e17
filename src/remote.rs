use std::time::Duration;

use chrono_tz::Tz;
use once_cell::sync::Lazy;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::AppConfig;
use crate::models::{Event, OnSaleStatus};
use crate::query::EventQuery;
use crate::webhook::{RemoteWebhook, WebhookAction, WebhookApi, WebhookRegistrationError};

static CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(20))
        .user_agent(concat!("event-calendar/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("http client")
});

const EXPAND: &str = "ticket_classes,venue,organizer,logo";

#[derive(Debug, Error)]
pub enum RemoteFetchError {
    #[error("missing eventbrite api token")]
    MissingToken,
    #[error("http error: {0}")]
    Http(String),
    #[error("api error (status {status}): {body}")]
    Api { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(String),
}

/// One page of a remote event query.
#[derive(Debug, Clone, Default)]
pub struct RemotePage {
    pub events: Vec<Event>,
    pub total_pages: u32,
    /// Records the page carried before malformed ones were dropped.
    pub record_count: usize,
}

pub trait RemoteEventFetcher {
    fn fetch(&self, query: &EventQuery, page: u32) -> Result<RemotePage, RemoteFetchError>;
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    pagination: Option<Pagination>,
    #[serde(default)]
    events: Vec<RemoteEventRecord>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    page_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEventRecord {
    pub id: String,
    pub name: Option<RemoteText>,
    pub start: Option<RemoteTime>,
    pub end: Option<RemoteTime>,
    pub url: Option<String>,
    pub logo: Option<RemoteLogo>,
    pub organizer: Option<NamedRef>,
    pub venue: Option<NamedRef>,
    pub listed: Option<bool>,
    #[serde(default)]
    pub ticket_classes: Vec<RemoteTicketClass>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteText {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTime {
    pub utc: Option<String>,
    pub local: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLogo {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTicketClass {
    pub on_sale_status: OnSaleStatus,
}

#[derive(Debug, Deserialize)]
struct WebhooksResponse {
    #[serde(default)]
    webhooks: Vec<RemoteWebhook>,
}

/// Blocking client for the Eventbrite v3 API.
#[derive(Debug, Clone)]
pub struct EventbriteClient {
    base_url: String,
    token: Option<String>,
    tz: Tz,
}

impl EventbriteClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, tz: Tz) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.filter(|t| !t.trim().is_empty()),
            tz,
        }
    }

    pub fn from_config(config: &AppConfig, tz: Tz) -> Self {
        Self::new(config.api_base_url.clone(), config.api_token.clone(), tz)
    }

    fn endpoint(&self, path: &str) -> Result<Url, String> {
        let base = self.base_url.trim_end_matches('/');
        Url::parse(&format!("{base}/{}", path.trim_start_matches('/'))).map_err(|e| e.to_string())
    }

    fn authorized(&self, request: RequestBuilder) -> Option<RequestBuilder> {
        self.token.as_ref().map(|token| request.bearer_auth(token))
    }

    fn events_url(&self, query: &EventQuery, page: u32) -> Result<Url, RemoteFetchError> {
        let mut url = self
            .endpoint("users/me/owned_events/")
            .map_err(RemoteFetchError::Http)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("status", "live")
                .append_pair("order_by", "start_asc")
                .append_pair("expand", EXPAND)
                .append_pair("page", &page.to_string());
            if let Some(from) = query.date_from {
                pairs.append_pair("start_date.range_start", &format!("{from}T00:00:00"));
            }
            if let Some(to) = query.date_to {
                pairs.append_pair("start_date.range_end", &format!("{to}T23:59:59"));
            }
            for (key, value) in [
                ("organizer.id", &query.organizer_id),
                ("venue.id", &query.venue_id),
                ("categories", &query.category_id),
                ("subcategories", &query.subcategory_id),
                ("formats", &query.format_id),
            ] {
                if let Some(value) = value {
                    pairs.append_pair(key, value);
                }
            }
        }
        Ok(url)
    }

    fn parse_events(&self, body: &str) -> Result<RemotePage, RemoteFetchError> {
        let payload: EventsResponse =
            serde_json::from_str(body).map_err(|err| RemoteFetchError::Parse(err.to_string()))?;
        let total_pages = payload
            .pagination
            .and_then(|p| p.page_count)
            .unwrap_or(1);

        let record_count = payload.events.len();
        let mut events = Vec::with_capacity(record_count);
        for record in payload.events {
            match Event::from_remote(record, self.tz) {
                Ok(event) => events.push(event),
                Err(err) => debug!("dropping remote event: {err}"),
            }
        }

        Ok(RemotePage {
            events,
            total_pages,
            record_count,
        })
    }
}

impl RemoteEventFetcher for EventbriteClient {
    fn fetch(&self, query: &EventQuery, page: u32) -> Result<RemotePage, RemoteFetchError> {
        let url = self.events_url(query, page)?;
        debug!(page, "fetching remote events");
        let request = self
            .authorized(CLIENT.get(url))
            .ok_or(RemoteFetchError::MissingToken)?;

        let response = request
            .send()
            .map_err(|err| RemoteFetchError::Http(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| RemoteFetchError::Http(err.to_string()))?;
        if !status.is_success() {
            return Err(RemoteFetchError::Api {
                status: status.as_u16(),
                body,
            });
        }

        self.parse_events(&body)
    }
}

impl WebhookApi for EventbriteClient {
    fn list_webhooks(&self) -> Result<Vec<RemoteWebhook>, WebhookRegistrationError> {
        let url = self
            .endpoint("webhooks/")
            .map_err(WebhookRegistrationError::Http)?;
        let request = self
            .authorized(CLIENT.get(url))
            .ok_or(WebhookRegistrationError::MissingToken)?;
        let body = send_webhook_request(request)?;
        let payload: WebhooksResponse = serde_json::from_str(&body)
            .map_err(|err| WebhookRegistrationError::Parse(err.to_string()))?;
        Ok(payload.webhooks)
    }

    fn create_webhook(
        &self,
        endpoint_url: &str,
        actions: &[WebhookAction],
    ) -> Result<RemoteWebhook, WebhookRegistrationError> {
        let url = self
            .endpoint("webhooks/")
            .map_err(WebhookRegistrationError::Http)?;
        let actions = actions
            .iter()
            .map(|action| action.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let request = self
            .authorized(CLIENT.post(url))
            .ok_or(WebhookRegistrationError::MissingToken)?
            .json(&json!({
                "endpoint_url": endpoint_url,
                "actions": actions,
            }));
        let body = send_webhook_request(request)?;
        serde_json::from_str(&body).map_err(|err| WebhookRegistrationError::Parse(err.to_string()))
    }

    fn delete_webhook(&self, id: &str) -> Result<(), WebhookRegistrationError> {
        let url = self
            .endpoint(&format!("webhooks/{id}/"))
            .map_err(WebhookRegistrationError::Http)?;
        let request = self
            .authorized(CLIENT.delete(url))
            .ok_or(WebhookRegistrationError::MissingToken)?;
        send_webhook_request(request).map(|_| ())
    }
}

fn send_webhook_request(request: RequestBuilder) -> Result<String, WebhookRegistrationError> {
    let response = request
        .send()
        .map_err(|err| WebhookRegistrationError::Http(err.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| WebhookRegistrationError::Http(err.to_string()))?;
    if !status.is_success() {
        return Err(WebhookRegistrationError::Api(format!("status {status}: {body}")));
    }
    Ok(body)
}
