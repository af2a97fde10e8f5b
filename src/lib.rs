//! IP Tracking Agent for Zentinel
//!
//! Governs inbound requests by client address and keeps a geolocated
//! request history that a scheduled scan mines for abusive addresses.
//!
//! # Features
//!
//! - Client address extraction (forwarded-for aware)
//! - Blocklist enforcement with explicit fail-closed/fail-open policy
//! - Best-effort geolocation enrichment with a 24h cache
//! - Per-user / per-address rate limits on sensitive endpoints
//! - Hourly anomaly scan flagging high-volume and sensitive-path traffic
//!
//! # Example
//!
//! ```ignore
//! use zentinel_agent_ip_tracking::{IpTrackingAgent, IpTrackingConfig, RequestInfo};
//!
//! let agent = IpTrackingAgent::from_config(IpTrackingConfig::default())?;
//! let decision = agent
//!     .on_request(&RequestInfo::new("198.51.100.9", "GET", "/"))
//!     .await;
//! assert!(decision.is_allow());
//! ```

pub mod address;
pub mod agent;
pub mod blocklist;
pub mod cache;
pub mod config;
pub mod error;
pub mod geo;
pub mod governor;
pub mod protocol;
pub mod rate_limit;
pub mod recorder;
pub mod request;
pub mod scanner;
pub mod store;

pub use agent::IpTrackingAgent;
pub use config::IpTrackingConfig;
pub use crate::governor::{RequestGovernor, Verdict};
pub use request::{Decision, RequestInfo};
pub use scanner::{AnomalyScanner, ScanPolicy, ScanReport};
pub use store::{MemoryStore, Store};
