//! Configuration types for the IP tracking agent.

use crate::rate_limit::Rate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the IP tracking agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpTrackingConfig {
    /// Request interception settings
    pub governor: GovernorConfig,

    /// Geolocation enrichment settings
    pub geo: GeoConfig,

    /// Rate limiting rules
    pub rate_limit: RateLimitConfig,

    /// Anomaly scan settings
    pub scanner: ScannerConfig,

    /// Store settings
    pub store: StoreConfig,
}

/// What to do with a request when the blocklist cannot be consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Deny the request
    #[default]
    FailClosed,
    /// Let the request through; it is still enriched and recorded
    FailOpen,
}

/// Request interception settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Header whose first entry names the client
    pub forwarded_header: String,

    /// Upper bound on each store call from the request path, in milliseconds
    pub store_timeout_ms: u64,

    /// Behavior when the blocklist check fails
    pub blocklist_failure: FailurePolicy,

    /// Body of the 403 response for blocked addresses
    pub deny_message: String,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            forwarded_header: crate::address::FORWARDED_FOR.to_string(),
            store_timeout_ms: 250,
            blocklist_failure: FailurePolicy::FailClosed,
            deny_message: "Your IP has been blocked.".to_string(),
        }
    }
}

/// Geolocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Enable geolocation lookups
    pub enabled: bool,

    /// Provider base URL; the address is appended as a path segment
    pub endpoint: String,

    /// Provider call timeout in milliseconds
    pub timeout_ms: u64,

    /// How long a resolved record stays cached, in seconds
    pub cache_ttl_seconds: u64,

    /// Maximum cached addresses
    pub cache_size: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://ip-api.com/json".to_string(),
            timeout_ms: 1500,
            cache_ttl_seconds: 86_400,
            cache_size: 100_000,
        }
    }
}

/// Rate limiting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,

    /// Per-endpoint rules; the first matching rule applies
    pub rules: Vec<RateLimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: vec![RateLimitRule::default()],
        }
    }
}

/// Rate limit for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitRule {
    /// Exact request path
    pub path: String,

    /// Methods the rule covers; empty means all
    pub methods: Vec<String>,

    /// Rate for requests keyed by address
    pub anonymous_rate: Rate,

    /// Rate for requests keyed by user
    pub authenticated_rate: Rate,

    /// Reject over-limit requests; when false they are only logged
    pub block: bool,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            path: "/login".to_string(),
            methods: vec!["POST".to_string()],
            anonymous_rate: Rate::per_minute(5),
            authenticated_rate: Rate::per_minute(10),
            block: true,
        }
    }
}

impl RateLimitRule {
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.path == path
            && (self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method)))
    }
}

/// Anomaly scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Run the scan on a schedule
    pub enabled: bool,

    /// Seconds between scans
    pub interval_seconds: u64,

    /// Look-back window in seconds
    pub window_seconds: u64,

    /// Requests per window above which an address is flagged
    pub threshold: u64,

    /// Paths whose access flags an address
    pub sensitive_paths: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 3600,
            window_seconds: 3600,
            threshold: 100,
            sensitive_paths: vec!["/admin".to_string(), "/login".to_string()],
        }
    }
}

/// Store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file seeding the blocklist at startup
    pub blocklist_path: Option<PathBuf>,
}
