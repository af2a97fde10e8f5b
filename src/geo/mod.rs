//! Geolocation enrichment.
//!
//! Resolution is two explicit stages: a cache lookup, then on a miss a
//! bounded provider call whose successful result is written back to the
//! cache. Concurrent misses for one address wait on a single provider call.
//! Failures are logged, never cached, and come back as an empty record.
//! Geolocation is never a reason to hold up a request.

pub mod http;

pub use http::HttpGeoProvider;

use crate::cache::GeoCache;
use crate::error::GeoError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Geolocation of an address. Both fields absent means "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoRecord {
    pub country: Option<String>,
    pub city: Option<String>,
}

impl GeoRecord {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.city.is_none()
    }
}

/// An external geolocation source.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, address: &str) -> Result<GeoRecord, GeoError>;

    fn name(&self) -> &'static str;
}

/// Cache-first geolocation with a tolerant failure mode.
pub struct GeoResolver {
    cache: GeoCache,
    provider: Option<Arc<dyn GeoProvider>>,
    timeout: Duration,
}

impl GeoResolver {
    pub fn new(cache: GeoCache, provider: Arc<dyn GeoProvider>, timeout: Duration) -> Self {
        Self {
            cache,
            provider: Some(provider),
            timeout,
        }
    }

    /// Resolver that never calls out and always yields empty records.
    pub fn disabled() -> Self {
        Self {
            cache: GeoCache::new(1, Duration::from_secs(1)),
            provider: None,
            timeout: Duration::ZERO,
        }
    }

    /// Stage one: the cached record, if fresh.
    pub async fn cached(&self, address: &str) -> Option<GeoRecord> {
        self.cache.get(address).await
    }

    /// Stage two: ask the provider and cache a successful answer.
    pub async fn fetch_and_cache(&self, address: &str) -> GeoRecord {
        self.cache
            .get_or_fetch(address, self.fetch(address))
            .await
            .unwrap_or_default()
    }

    async fn fetch(&self, address: &str) -> Option<GeoRecord> {
        let provider = self.provider.as_ref()?;

        let result = match timeout(self.timeout, provider.lookup(address)).await {
            Ok(result) => result,
            Err(_) => Err(GeoError::Timeout(self.timeout.as_millis() as u64)),
        };

        match result {
            Ok(record) => {
                debug!(
                    client_ip = %address,
                    provider = provider.name(),
                    country = ?record.country,
                    "Geolocation resolved"
                );
                Some(record)
            }
            Err(e) => {
                warn!(
                    client_ip = %address,
                    provider = provider.name(),
                    error = %e,
                    "Geolocation lookup failed, continuing without enrichment"
                );
                None
            }
        }
    }

    /// Resolve an address. Never fails.
    pub async fn resolve(&self, address: &str) -> GeoRecord {
        if let Some(record) = self.cached(address).await {
            return record;
        }
        self.fetch_and_cache(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl CountingProvider {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeoProvider for CountingProvider {
        async fn lookup(&self, _address: &str) -> Result<GeoRecord, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(GeoError::Provider("quota exceeded".to_string()));
            }
            Ok(GeoRecord {
                country: Some("Netherlands".to_string()),
                city: Some("Amsterdam".to_string()),
            })
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn resolver(provider: Arc<CountingProvider>, ttl: Duration) -> GeoResolver {
        GeoResolver::new(GeoCache::new(100, ttl), provider, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let provider = Arc::new(CountingProvider::new(false));
        let resolver = resolver(provider.clone(), Duration::from_secs(60));

        let first = resolver.resolve("192.0.2.1").await;
        let second = resolver.resolve("192.0.2.1").await;

        assert_eq!(first, second);
        assert_eq!(first.city.as_deref(), Some("Amsterdam"));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_lookup() {
        let provider = Arc::new(CountingProvider {
            delay: Duration::from_millis(50),
            ..CountingProvider::new(false)
        });
        let resolver = resolver(provider.clone(), Duration::from_secs(60));

        let (first, second) = tokio::join!(
            resolver.resolve("192.0.2.1"),
            resolver.resolve("192.0.2.1")
        );

        assert_eq!(first, second);
        assert_eq!(first.country.as_deref(), Some("Netherlands"));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let provider = Arc::new(CountingProvider::new(false));
        let resolver = resolver(provider.clone(), Duration::from_millis(50));

        resolver.resolve("192.0.2.1").await;
        resolver.resolve("192.0.2.1").await;
        assert_eq!(provider.calls(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;

        resolver.resolve("192.0.2.1").await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let provider = Arc::new(CountingProvider::new(true));
        let resolver = resolver(provider.clone(), Duration::from_secs(60));

        let record = resolver.resolve("192.0.2.1").await;
        assert!(record.is_empty());
        assert!(resolver.cached("192.0.2.1").await.is_none());

        resolver.resolve("192.0.2.1").await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let provider = Arc::new(CountingProvider {
            delay: Duration::from_secs(5),
            ..CountingProvider::new(false)
        });
        let resolver = GeoResolver::new(
            GeoCache::new(100, Duration::from_secs(60)),
            provider.clone(),
            Duration::from_millis(20),
        );

        let record = resolver.resolve("192.0.2.1").await;
        assert!(record.is_empty());
        assert!(resolver.cached("192.0.2.1").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_resolver() {
        let resolver = GeoResolver::disabled();
        assert!(resolver.resolve("192.0.2.1").await.is_empty());
    }
}
