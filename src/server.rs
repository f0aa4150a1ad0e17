use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::calendar::CalendarBucket;
use crate::models::Event;
use crate::query::EventQuery;
use crate::service::CalendarService;
use crate::webhook::WebhookCacheInvalidator;

pub const WEBHOOK_REPLY: &str = "Eventbrite webhook is working";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CalendarService>,
    pub invalidator: WebhookCacheInvalidator,
}

impl AppState {
    pub fn new(service: CalendarService) -> Self {
        let invalidator = WebhookCacheInvalidator::new(service.cache().clone());
        Self {
            service: Arc::new(service),
            invalidator,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unavailable(cause) => {
                error!("events unavailable: {cause}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": "events unavailable" })),
                )
                    .into_response()
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/calendar", get(calendar))
        .route("/events", get(events))
        .route("/webhook", get(webhook).post(webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn calendar(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Json<CalendarBucket>, ApiError> {
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || service.calendar(&query))
        .await
        .map_err(|err| ApiError::Unavailable(err.to_string()))?
        .map(Json)
        .map_err(|err| ApiError::Unavailable(err.to_string()))
}

async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || service.events(&query))
        .await
        .map_err(|err| ApiError::Unavailable(err.to_string()))?
        .map(Json)
        .map_err(|err| ApiError::Unavailable(err.to_string()))
}

#[derive(Debug, Default, Deserialize)]
struct WebhookParams {
    action: Option<String>,
}

/// Upstream delivery: `{"config": {"action": "..."}, "api_url": "..."}`.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    config: Option<WebhookParams>,
}

async fn webhook(
    State(state): State<AppState>,
    Query(params): Query<WebhookParams>,
    body: Bytes,
) -> &'static str {
    let from_body = serde_json::from_slice::<WebhookPayload>(&body)
        .ok()
        .and_then(|payload| payload.config)
        .and_then(|config| config.action);

    if let Some(action) = from_body.or(params.action) {
        state.invalidator.on_notification(&action);
    }
    WEBHOOK_REPLY
}
