//! Request history recording.

use crate::error::StoreError;
use crate::geo::GeoRecord;
use crate::store::{RequestLogEntry, Store};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Appends one history entry per allowed request.
pub struct TrafficRecorder {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl TrafficRecorder {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn record(
        &self,
        address: &str,
        path: &str,
        timestamp: DateTime<Utc>,
        geo: GeoRecord,
    ) -> Result<RequestLogEntry, StoreError> {
        let entry = RequestLogEntry {
            address: address.to_string(),
            path: path.to_string(),
            timestamp,
            country: geo.country,
            city: geo.city,
        };

        match timeout(self.timeout, self.store.append_log(entry.clone())).await {
            Ok(Ok(())) => Ok(entry),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(StoreError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}
