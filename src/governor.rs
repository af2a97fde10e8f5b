//! Per-request interception pipeline.
//!
//! ```text
//! START -> EXTRACT -> BLOCK_CHECK -> DENY
//!                                 -> ENRICH -> RECORD -> ALLOW
//! ```
//!
//! Denied requests are neither enriched nor recorded. Enrichment and
//! recording are best effort: their failures are logged and the request is
//! still allowed. Only a failed blocklist check is returned to the caller.

use crate::address::client_address;
use crate::blocklist::BlocklistChecker;
use crate::config::GovernorConfig;
use crate::error::GovernorError;
use crate::geo::{GeoRecord, GeoResolver};
use crate::recorder::TrafficRecorder;
use crate::request::RequestInfo;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of governing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Address is blocklisted
    Deny { address: String },
    /// Request may proceed
    Allow {
        address: String,
        geo: GeoRecord,
        /// Whether the history entry was written
        recorded: bool,
    },
}

impl Verdict {
    pub fn address(&self) -> &str {
        match self {
            Verdict::Deny { address } | Verdict::Allow { address, .. } => address,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow { .. })
    }
}

/// Runs the interception pipeline. Safe to share across concurrent requests.
pub struct RequestGovernor {
    forwarded_header: String,
    blocklist: BlocklistChecker,
    resolver: Arc<GeoResolver>,
    recorder: TrafficRecorder,
}

impl RequestGovernor {
    pub fn new(
        forwarded_header: impl Into<String>,
        blocklist: BlocklistChecker,
        resolver: Arc<GeoResolver>,
        recorder: TrafficRecorder,
    ) -> Self {
        Self {
            forwarded_header: forwarded_header.into(),
            blocklist,
            resolver,
            recorder,
        }
    }

    pub fn from_config(
        config: &GovernorConfig,
        store: Arc<dyn Store>,
        resolver: Arc<GeoResolver>,
    ) -> Self {
        let store_timeout = Duration::from_millis(config.store_timeout_ms);
        Self::new(
            config.forwarded_header.clone(),
            BlocklistChecker::new(store.clone(), store_timeout),
            resolver,
            TrafficRecorder::new(store, store_timeout),
        )
    }

    pub fn client_address(&self, request: &RequestInfo) -> String {
        client_address(request, &self.forwarded_header)
    }

    /// Extract, check the blocklist, then admit unless blocked.
    pub async fn govern(&self, request: &RequestInfo) -> Result<Verdict, GovernorError> {
        let address = self.client_address(request);

        let blocked = self
            .blocklist
            .is_blocked(&address)
            .await
            .map_err(|source| GovernorError::BlocklistUnavailable {
                address: address.clone(),
                source,
            })?;

        if blocked {
            warn!(
                correlation_id = %request.correlation_id,
                client_ip = %address,
                path = %request.path,
                "Blocked request from blacklisted address"
            );
            return Ok(Verdict::Deny { address });
        }

        Ok(self.admit(request, address).await)
    }

    /// Enrich, record and allow. Used directly when the blocklist could not
    /// be consulted and the deployment fails open.
    pub async fn admit(&self, request: &RequestInfo, address: String) -> Verdict {
        let timestamp = Utc::now();
        let geo = self.resolver.resolve(&address).await;

        let recorded = match self
            .recorder
            .record(&address, &request.path, timestamp, geo.clone())
            .await
        {
            Ok(entry) => {
                info!(
                    correlation_id = %request.correlation_id,
                    client_ip = %entry.address,
                    path = %entry.path,
                    timestamp = %entry.timestamp,
                    country = entry.country.as_deref().unwrap_or("-"),
                    city = entry.city.as_deref().unwrap_or("-"),
                    "Request recorded"
                );
                true
            }
            Err(e) => {
                warn!(
                    correlation_id = %request.correlation_id,
                    client_ip = %address,
                    path = %request.path,
                    error = %e,
                    "Failed to record request, allowing anyway"
                );
                false
            }
        };

        debug!(client_ip = %address, recorded, "Request allowed");
        Verdict::Allow {
            address,
            geo,
            recorded,
        }
    }
}
