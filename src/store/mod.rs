//! Persistent store interface and the records it holds.
//!
//! Request history and suspicious-address flags are owned by the store. The
//! agent only appends history, reads the blocklist and get-or-creates flags;
//! retention and durability belong to the backend.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One allowed request. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub address: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub country: Option<String>,
    pub city: Option<String>,
}

/// An address denied access by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedAddress {
    pub address: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl BlockedAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reason: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// An address the scanner considered abusive. At most one per address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousAddressFlag {
    pub address: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Request count for one address inside a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressCount {
    pub address: String,
    pub count: u64,
}

/// Outcome of a flag get-or-create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagOutcome {
    Created(SuspiciousAddressFlag),
    /// A flag for the address already existed; its stored reason is kept.
    Existing(SuspiciousAddressFlag),
}

impl FlagOutcome {
    pub fn created(&self) -> bool {
        matches!(self, FlagOutcome::Created(_))
    }

    pub fn flag(&self) -> &SuspiciousAddressFlag {
        match self {
            FlagOutcome::Created(flag) | FlagOutcome::Existing(flag) => flag,
        }
    }
}

/// Queries the agent needs from a store backend.
///
/// Each call must be atomic on its own; no cross-call transaction is needed.
#[async_trait]
pub trait Store: Send + Sync {
    /// Point lookup on the blocklist.
    async fn is_blocked(&self, address: &str) -> Result<bool, StoreError>;

    async fn block(&self, entry: BlockedAddress) -> Result<(), StoreError>;

    /// Returns whether the address was on the blocklist.
    async fn unblock(&self, address: &str) -> Result<bool, StoreError>;

    /// Append one history entry. A partially written entry is never visible.
    async fn append_log(&self, entry: RequestLogEntry) -> Result<(), StoreError>;

    /// Per-address request counts for entries with `timestamp >= since`.
    async fn count_by_address_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AddressCount>, StoreError>;

    /// Entries with `timestamp >= since` whose path is one of `paths`, in
    /// append order.
    async fn logs_on_paths_since(
        &self,
        since: DateTime<Utc>,
        paths: &[String],
    ) -> Result<Vec<RequestLogEntry>, StoreError>;

    /// Create a flag for `address` unless one already exists, whatever its
    /// reason.
    async fn get_or_create_flag(
        &self,
        address: &str,
        reason: &str,
        created_at: DateTime<Utc>,
    ) -> Result<FlagOutcome, StoreError>;

    async fn flags(&self) -> Result<Vec<SuspiciousAddressFlag>, StoreError>;
}
