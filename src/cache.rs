//! Time-bounded geolocation cache.

use crate::geo::GeoRecord;
use moka::future::Cache;
use std::future::Future;
use std::time::Duration;

/// Address → geolocation cache with a fixed time-to-live.
///
/// Shared by all in-flight requests. Losing entries only costs extra
/// provider calls.
#[derive(Clone)]
pub struct GeoCache {
    inner: Cache<String, GeoRecord>,
}

impl GeoCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { inner }
    }

    /// Unexpired record for the address, if any.
    pub async fn get(&self, address: &str) -> Option<GeoRecord> {
        self.inner.get(address).await
    }

    /// Unexpired record for the address, or the output of `fetch` when
    /// there is none. Concurrent misses for one address share a single
    /// `fetch`. A `None` from `fetch` is returned and not cached.
    pub async fn get_or_fetch<F>(&self, address: &str, fetch: F) -> Option<GeoRecord>
    where
        F: Future<Output = Option<GeoRecord>>,
    {
        self.inner.optionally_get_with(address.to_string(), fetch).await
    }

    pub async fn insert(&self, address: String, record: GeoRecord) {
        self.inner.insert(address, record).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}
