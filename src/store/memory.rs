//! In-process store backend.

use super::{AddressCount, BlockedAddress, FlagOutcome, RequestLogEntry, Store, SuspiciousAddressFlag};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::RwLock;

/// Store kept entirely in memory.
///
/// Blocklist and flags are hashed for point lookups; history is an
/// append-only vector behind a lock so each append is all-or-nothing.
#[derive(Default)]
pub struct MemoryStore {
    blocked: DashMap<String, BlockedAddress>,
    logs: RwLock<Vec<RequestLogEntry>>,
    flags: DashMap<String, SuspiciousAddressFlag>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with an initial blocklist.
    pub fn with_blocklist(entries: impl IntoIterator<Item = BlockedAddress>) -> Self {
        let store = Self::new();
        for entry in entries {
            store.blocked.insert(entry.address.clone(), entry);
        }
        store
    }

    /// Snapshot of the request history in append order.
    pub fn log_entries(&self) -> Result<Vec<RequestLogEntry>, StoreError> {
        let logs = self.logs.read().map_err(|_| StoreError::Poisoned("request log"))?;
        Ok(logs.clone())
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn is_blocked(&self, address: &str) -> Result<bool, StoreError> {
        Ok(self.blocked.contains_key(address))
    }

    async fn block(&self, entry: BlockedAddress) -> Result<(), StoreError> {
        self.blocked.insert(entry.address.clone(), entry);
        Ok(())
    }

    async fn unblock(&self, address: &str) -> Result<bool, StoreError> {
        Ok(self.blocked.remove(address).is_some())
    }

    async fn append_log(&self, entry: RequestLogEntry) -> Result<(), StoreError> {
        let mut logs = self.logs.write().map_err(|_| StoreError::Poisoned("request log"))?;
        logs.push(entry);
        Ok(())
    }

    async fn count_by_address_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AddressCount>, StoreError> {
        let logs = self.logs.read().map_err(|_| StoreError::Poisoned("request log"))?;

        let mut counts: HashMap<&str, u64> = HashMap::new();
        for entry in logs.iter().filter(|e| e.timestamp >= since) {
            *counts.entry(entry.address.as_str()).or_insert(0) += 1;
        }

        let mut counts: Vec<AddressCount> = counts
            .into_iter()
            .map(|(address, count)| AddressCount {
                address: address.to_string(),
                count,
            })
            .collect();
        counts.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(counts)
    }

    async fn logs_on_paths_since(
        &self,
        since: DateTime<Utc>,
        paths: &[String],
    ) -> Result<Vec<RequestLogEntry>, StoreError> {
        let logs = self.logs.read().map_err(|_| StoreError::Poisoned("request log"))?;
        Ok(logs
            .iter()
            .filter(|e| e.timestamp >= since && paths.iter().any(|p| *p == e.path))
            .cloned()
            .collect())
    }

    async fn get_or_create_flag(
        &self,
        address: &str,
        reason: &str,
        created_at: DateTime<Utc>,
    ) -> Result<FlagOutcome, StoreError> {
        // The entry guard holds the shard lock, so check-then-insert is atomic.
        match self.flags.entry(address.to_string()) {
            Entry::Occupied(existing) => Ok(FlagOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                let flag = SuspiciousAddressFlag {
                    address: address.to_string(),
                    reason: reason.to_string(),
                    created_at,
                };
                slot.insert(flag.clone());
                Ok(FlagOutcome::Created(flag))
            }
        }
    }

    async fn flags(&self) -> Result<Vec<SuspiciousAddressFlag>, StoreError> {
        let mut flags: Vec<SuspiciousAddressFlag> =
            self.flags.iter().map(|f| f.value().clone()).collect();
        flags.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(flags)
    }
}
