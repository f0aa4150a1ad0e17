use std::sync::Arc;

use tracing::debug;

use crate::aggregate::{AggregateError, EventMerger};
use crate::cache::{AggregationCache, CachedAggregation};
use crate::calendar::{CalendarBucket, CalendarFormatter};
use crate::config::{AppConfig, ConfigError};
use crate::db::Store;
use crate::models::Event;
use crate::query::EventQuery;
use crate::remote::EventbriteClient;

type AggregateFn = dyn Fn(&EventQuery) -> Result<Vec<Event>, AggregateError> + Send + Sync;

/// Request path shared by the HTTP handlers: cache lookup, then
/// aggregate and format on a miss.
pub struct CalendarService {
    cache: Arc<AggregationCache>,
    formatter: CalendarFormatter,
    aggregate: Box<AggregateFn>,
}

impl CalendarService {
    pub fn new<F>(cache: Arc<AggregationCache>, formatter: CalendarFormatter, aggregate: F) -> Self
    where
        F: Fn(&EventQuery) -> Result<Vec<Event>, AggregateError> + Send + Sync + 'static,
    {
        Self {
            cache,
            formatter,
            aggregate: Box::new(aggregate),
        }
    }

    /// Live service: every miss opens the store and queries the remote API.
    pub fn from_config(
        config: &AppConfig,
        cache: Arc<AggregationCache>,
    ) -> Result<Self, ConfigError> {
        let tz = config.site_timezone()?;
        let formatter = CalendarFormatter::new(tz, config.affiliate_code.clone());
        let client = EventbriteClient::from_config(config, tz);
        let db_path = config.database_path();
        let settings = config.merge_settings(tz);

        Ok(Self::new(cache, formatter, move |query| {
            let store = Store::open(&db_path, tz)?;
            let merger = EventMerger::new(client.clone(), store, settings.clone());
            merger.aggregate(query)
        }))
    }

    pub fn cache(&self) -> &Arc<AggregationCache> {
        &self.cache
    }

    pub fn lookup(&self, query: &EventQuery) -> Result<CachedAggregation, AggregateError> {
        let key = query.cache_key();
        if let Some(hit) = self.cache.get(&key) {
            debug!(key, "cache hit");
            return Ok(hit);
        }

        // A webhook may clear the cache while this pass runs; its result is
        // then returned to this caller but not stored.
        let generation = self.cache.generation();
        let events = (self.aggregate)(query)?;
        let calendar = self.formatter.format(&events);
        let value = CachedAggregation { events, calendar };
        self.cache.set_if_generation(key, generation, value.clone());
        Ok(value)
    }

    pub fn events(&self, query: &EventQuery) -> Result<Vec<Event>, AggregateError> {
        self.lookup(query).map(|cached| cached.events)
    }

    pub fn calendar(&self, query: &EventQuery) -> Result<CalendarBucket, AggregateError> {
        self.lookup(query).map(|cached| cached.calendar)
    }
}
