use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::calendar::CalendarBucket;
use crate::models::Event;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(86_400);

/// Result of one aggregation, kept until it expires or a webhook clears it.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct CachedAggregation {
    pub events: Vec<Event>,
    pub calendar: CalendarBucket,
}

#[derive(Debug, Default)]
struct CacheState {
    /// Bumped by every invalidation.
    generation: u64,
    entries: HashMap<String, (Instant, CachedAggregation)>,
}

#[derive(Debug)]
pub struct AggregationCache {
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl Default for AggregationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl AggregationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<CachedAggregation> {
        let mut state = self.lock();
        match state.entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => {
                return Some(value.clone())
            }
            Some(_) => {}
            None => return None,
        }
        debug!(key, "cache entry expired");
        state.entries.remove(key);
        None
    }

    pub fn set(&self, key: impl Into<String>, value: CachedAggregation) {
        self.lock().entries.insert(key.into(), (Instant::now(), value));
    }

    /// Current invalidation generation. Read it before computing a value
    /// and hand it to [`AggregationCache::set_if_generation`].
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Stores `value` only if no invalidation happened since `generation`
    /// was read. Returns whether the value was stored.
    pub fn set_if_generation(
        &self,
        key: impl Into<String>,
        generation: u64,
        value: CachedAggregation,
    ) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            debug!("cache invalidated during aggregation, result not stored");
            return false;
        }
        state.entries.insert(key.into(), (Instant::now(), value));
        true
    }

    /// Drops every entry and returns how many were removed.
    pub fn invalidate_all(&self) -> usize {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
