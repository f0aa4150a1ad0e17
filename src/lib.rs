pub mod aggregate;
pub mod cache;
pub mod calendar;
pub mod config;
pub mod db;
pub mod models;
pub mod query;
pub mod remote;
pub mod server;
pub mod service;
mod utils;
pub mod webhook;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::AggregationCache;
use config::AppConfig;
use db::Store;
use remote::EventbriteClient;
use server::AppState;
use service::CalendarService;
use webhook::{Registration, WebhookRegistrar};

const DEFAULT_LOG_FILTER: &str = "event_calendar=info,event_calendar_lib=info,tower_http=info";

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load().context("loading configuration")?;
    let tz = config.site_timezone()?;

    // Create the schema up front so the first request does not pay for it.
    let db_path = config.database_path();
    Store::open(&db_path, tz).with_context(|| format!("opening store at {db_path:?}"))?;

    let cache = Arc::new(AggregationCache::new(config.cache_ttl()));
    let service = CalendarService::from_config(&config, cache)?;

    register_webhook(&config).await;

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!(address = %config.bind_address, %tz, "event calendar listening");

    axum::serve(listener, server::router(AppState::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if config.remove_webhook_on_shutdown {
        remove_webhook(&config).await;
    }
    Ok(())
}

fn registrar(config: &AppConfig) -> Option<WebhookRegistrar<EventbriteClient>> {
    let callback = config.webhook_callback_url()?;
    let tz = config.site_timezone().ok()?;
    Some(WebhookRegistrar::new(
        EventbriteClient::from_config(config, tz),
        callback,
    ))
}

async fn register_webhook(config: &AppConfig) {
    let Some(registrar) = registrar(config) else {
        info!("no site url configured, skipping webhook registration");
        return;
    };
    let outcome = tokio::task::spawn_blocking(move || registrar.ensure_registered()).await;
    match outcome {
        Ok(Ok(Registration::Created(id))) => info!(id, "created eventbrite webhook"),
        Ok(Ok(Registration::Existing(id))) => info!(id, "eventbrite webhook present"),
        Ok(Err(err)) => warn!("webhook registration failed: {err}"),
        Err(err) => warn!("webhook registration task failed: {err}"),
    }
}

async fn remove_webhook(config: &AppConfig) {
    let Some(registrar) = registrar(config) else {
        return;
    };
    match tokio::task::spawn_blocking(move || registrar.remove()).await {
        Ok(Ok(true)) => info!("eventbrite webhook removed"),
        Ok(Ok(false)) => info!("no eventbrite webhook to remove"),
        Ok(Err(err)) => warn!("webhook removal failed: {err}"),
        Err(err) => warn!("webhook removal task failed: {err}"),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
