//! Error types for the IP tracking agent.
//!
//! Only two failures ever reach a caller: a blocklist read that could not be
//! answered and a scan query that could not be run. Everything else is
//! recovered where it happens and logged.

use thiserror::Error;

/// Failure talking to the persistent store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend refused or failed the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete within the configured bound.
    #[error("store operation timed out after {0}ms")]
    Timeout(u64),

    /// A lock guarding in-process state was poisoned by a panicking writer.
    #[error("store state poisoned: {0}")]
    Poisoned(&'static str),
}

/// Failure from a geolocation provider.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geolocation lookup timed out after {0}ms")]
    Timeout(u64),

    #[error("geolocation transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("geolocation provider error: {0}")]
    Provider(String),

    #[error("malformed geolocation response: {0}")]
    Malformed(String),
}

/// Error surfaced by the request governor.
///
/// Enrichment and recording failures never appear here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GovernorError {
    /// The blocklist could not be consulted, so the request is neither
    /// known-blocked nor known-allowed.
    #[error("blocklist check failed for {address}: {source}")]
    BlocklistUnavailable {
        address: String,
        #[source]
        source: StoreError,
    },
}

/// Error surfaced by the anomaly scanner.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    /// The windowed history query failed; nothing was evaluated.
    #[error("scan query failed: {0}")]
    Query(#[from] StoreError),
}

/// Malformed rate declaration such as `"five/m"`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("rate must look like <count>/<period>, got {0:?}")]
    Format(String),

    #[error("invalid request count in rate {0:?}")]
    Count(String),

    #[error("invalid period in rate {0:?}")]
    Period(String),
}
