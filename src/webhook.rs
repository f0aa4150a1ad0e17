use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::AggregationCache;

#[derive(Debug, Error)]
pub enum WebhookRegistrationError {
    #[error("missing eventbrite api token")]
    MissingToken,
    #[error("http error: {0}")]
    Http(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("created webhook has no id")]
    MissingId,
}

/// Change notifications that make cached aggregations stale.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookAction {
    #[serde(rename = "event.published")]
    EventPublished,
    #[serde(rename = "event.updated")]
    EventUpdated,
    #[serde(rename = "event.unpublished")]
    EventUnpublished,
    #[serde(rename = "order.placed")]
    OrderPlaced,
}

impl WebhookAction {
    pub const ALL: [WebhookAction; 4] = [
        WebhookAction::EventPublished,
        WebhookAction::EventUpdated,
        WebhookAction::EventUnpublished,
        WebhookAction::OrderPlaced,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WebhookAction::EventPublished => "event.published",
            WebhookAction::EventUpdated => "event.updated",
            WebhookAction::EventUnpublished => "event.unpublished",
            WebhookAction::OrderPlaced => "order.placed",
        }
    }
}

impl fmt::Display for WebhookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unrecognized webhook action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for WebhookAction {
    type Err = UnknownAction;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == value)
            .ok_or_else(|| UnknownAction(value.to_string()))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RemoteWebhook {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub endpoint_url: String,
}

impl RemoteWebhook {
    /// Endpoint URL without its `#fragment`.
    pub fn base_endpoint(&self) -> &str {
        match self.endpoint_url.split_once('#') {
            Some((base, _)) => base,
            None => &self.endpoint_url,
        }
    }
}

pub trait WebhookApi {
    fn list_webhooks(&self) -> Result<Vec<RemoteWebhook>, WebhookRegistrationError>;
    fn create_webhook(
        &self,
        endpoint_url: &str,
        actions: &[WebhookAction],
    ) -> Result<RemoteWebhook, WebhookRegistrationError>;
    fn delete_webhook(&self, id: &str) -> Result<(), WebhookRegistrationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Invalidated,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct WebhookCacheInvalidator {
    cache: Arc<AggregationCache>,
}

impl WebhookCacheInvalidator {
    pub fn new(cache: Arc<AggregationCache>) -> Self {
        Self { cache }
    }

    pub fn on_notification(&self, action: &str) -> WebhookOutcome {
        match action.parse::<WebhookAction>() {
            Ok(action) => {
                let removed = self.cache.invalidate_all();
                info!(%action, removed, "cache invalidated by webhook");
                WebhookOutcome::Invalidated
            }
            Err(err) => {
                debug!("{err}");
                WebhookOutcome::Ignored
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Existing(String),
    Created(String),
}

pub struct WebhookRegistrar<A> {
    api: A,
    callback_url: String,
}

impl<A: WebhookApi> WebhookRegistrar<A> {
    pub fn new(api: A, callback_url: impl Into<String>) -> Self {
        Self {
            api,
            callback_url: callback_url.into(),
        }
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// Id of the upstream webhook pointing at our callback, if any.
    pub fn find_registered(&self) -> Result<Option<String>, WebhookRegistrationError> {
        let hooks = self.api.list_webhooks()?;
        Ok(hooks
            .into_iter()
            .find(|hook| hook.base_endpoint() == self.callback_url)
            .and_then(|hook| hook.id))
    }

    pub fn ensure_registered(&self) -> Result<Registration, WebhookRegistrationError> {
        if let Some(id) = self.find_registered()? {
            debug!(id, "webhook already registered");
            return Ok(Registration::Existing(id));
        }

        // Upstream refuses to recreate a deleted endpoint with the same URL,
        // so each registration gets a unique fragment.
        let endpoint = format!("{}#{}", self.callback_url, Utc::now().timestamp());
        let created = self.api.create_webhook(&endpoint, &WebhookAction::ALL)?;
        let id = created.id.ok_or(WebhookRegistrationError::MissingId)?;
        info!(id, endpoint, "webhook registered");
        Ok(Registration::Created(id))
    }

    /// Deletes the registered webhook. Returns whether one was found.
    pub fn remove(&self) -> Result<bool, WebhookRegistrationError> {
        match self.find_registered()? {
            Some(id) => {
                self.api.delete_webhook(&id)?;
                info!(id, "webhook removed");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
