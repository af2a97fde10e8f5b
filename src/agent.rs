//! Main IP tracking agent implementation.

use crate::blocklist::load_blocklist;
use crate::cache::GeoCache;
use crate::config::{FailurePolicy, IpTrackingConfig};
use crate::error::GovernorError;
use crate::geo::{GeoProvider, GeoResolver, HttpGeoProvider};
use crate::governor::{RequestGovernor, Verdict};
use crate::rate_limit::{select_key, RateLimitOutcome, RuleLimiter};
use crate::request::{Decision, RequestInfo};
use crate::scanner::{AnomalyScanner, ScanPolicy};
use crate::store::{MemoryStore, Store};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// IP tracking agent: blocklist, request history, rate limits and the
/// anomaly scanner behind one handle.
pub struct IpTrackingAgent {
    /// Configuration
    config: IpTrackingConfig,
    /// Shared store
    store: Arc<dyn Store>,
    /// Request pipeline
    governor: RequestGovernor,
    /// One limiter per rate limit rule, in rule order
    limiters: Vec<RuleLimiter>,
    /// Anomaly scanner
    scanner: Arc<AnomalyScanner>,
}

impl IpTrackingAgent {
    /// Create an agent over an existing store. Without a provider,
    /// geolocation is skipped.
    pub fn new(
        config: IpTrackingConfig,
        store: Arc<dyn Store>,
        provider: Option<Arc<dyn GeoProvider>>,
    ) -> Self {
        let resolver = match provider {
            Some(provider) => GeoResolver::new(
                GeoCache::new(
                    config.geo.cache_size,
                    Duration::from_secs(config.geo.cache_ttl_seconds),
                ),
                provider,
                Duration::from_millis(config.geo.timeout_ms),
            ),
            None => GeoResolver::disabled(),
        };

        let governor =
            RequestGovernor::from_config(&config.governor, store.clone(), Arc::new(resolver));
        let scanner = Arc::new(AnomalyScanner::new(
            store.clone(),
            ScanPolicy::from(&config.scanner),
        ));

        let limiters = config
            .rate_limit
            .rules
            .iter()
            .map(|rule| RuleLimiter::new(rule.anonymous_rate, rule.authenticated_rate))
            .collect();

        Self {
            config,
            store,
            governor,
            limiters,
            scanner,
        }
    }

    /// Create an agent with an in-memory store seeded from the configured
    /// blocklist file and the HTTP geolocation provider when enabled.
    pub fn from_config(config: IpTrackingConfig) -> anyhow::Result<Self> {
        let blocklist = match &config.store.blocklist_path {
            Some(path) => load_blocklist(path)?,
            None => Vec::new(),
        };
        let store = MemoryStore::with_blocklist(blocklist);
        info!(blocked = store.blocked_count(), "Blocklist loaded");

        let provider: Option<Arc<dyn GeoProvider>> = if config.geo.enabled {
            Some(Arc::new(HttpGeoProvider::new(
                &config.geo.endpoint,
                Duration::from_millis(config.geo.timeout_ms),
            )?))
        } else {
            None
        };

        Ok(Self::new(config, Arc::new(store), provider))
    }

    pub fn name(&self) -> &str {
        "ip-tracking"
    }

    pub fn config(&self) -> &IpTrackingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn scanner(&self) -> &Arc<AnomalyScanner> {
        &self.scanner
    }

    /// Decide what happens to one request.
    pub async fn on_request(&self, request: &RequestInfo) -> Decision {
        match self.governor.govern(request).await {
            Ok(Verdict::Deny { .. }) => self.blocked_decision().with_tag("ip-blocklist"),
            Ok(Verdict::Allow { address, .. }) => self.rate_limit(request, &address),
            Err(e) => self.on_blocklist_failure(request, e).await,
        }
    }

    async fn on_blocklist_failure(&self, request: &RequestInfo, err: GovernorError) -> Decision {
        let GovernorError::BlocklistUnavailable { address, .. } = &err;
        match self.config.governor.blocklist_failure {
            FailurePolicy::FailClosed => {
                error!(
                    correlation_id = %request.correlation_id,
                    error = %err,
                    "Blocklist unavailable, denying request"
                );
                self.blocked_decision().with_tag("blocklist-unavailable")
            }
            FailurePolicy::FailOpen => {
                warn!(
                    correlation_id = %request.correlation_id,
                    error = %err,
                    "Blocklist unavailable, allowing request"
                );
                let verdict = self.governor.admit(request, address.clone()).await;
                self.rate_limit(request, verdict.address())
                    .with_tag("blocklist-unavailable")
            }
        }
    }

    fn blocked_decision(&self) -> Decision {
        Decision::deny().with_body(self.config.governor.deny_message.clone())
    }

    /// Apply the first matching rate limit rule to an allowed request.
    fn rate_limit(&self, request: &RequestInfo, address: &str) -> Decision {
        if !self.config.rate_limit.enabled {
            return Decision::allow();
        }
        let Some((rule, limiter)) = self
            .config
            .rate_limit
            .rules
            .iter()
            .zip(&self.limiters)
            .find(|(r, _)| r.matches(&request.method, &request.path))
        else {
            return Decision::allow();
        };

        let key = select_key(request.user_id.as_deref(), address);
        let rate = limiter.rate_for(&key);

        match limiter.check(&key) {
            RateLimitOutcome::Allowed => {
                debug!(key = %key, rate = %rate, "Within rate limit");
                Decision::allow()
            }
            RateLimitOutcome::Limited { retry_after } => {
                warn!(
                    correlation_id = %request.correlation_id,
                    key = %key,
                    rate = %rate,
                    path = %request.path,
                    enforced = rule.block,
                    "Rate limit exceeded"
                );
                if rule.block {
                    // Round up so clients never retry inside the window
                    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                    Decision::block(429)
                        .with_body("Too many requests.")
                        .add_response_header("Retry-After", secs.to_string())
                        .with_tag("rate-limited")
                } else {
                    Decision::allow().with_tag("rate-limit-exceeded")
                }
            }
        }
    }
}
