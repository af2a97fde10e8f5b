//! Periodic anomaly scan over recorded request history.
//!
//! Each run looks back over a fixed window and flags addresses that either
//! sent more than the threshold number of requests or touched a sensitive
//! path. Flags are get-or-create keyed on the address alone, so an address
//! keeps the first reason it was ever flagged for.

use crate::config::ScannerConfig;
use crate::error::{ScanError, StoreError};
use crate::store::{FlagOutcome, Store, SuspiciousAddressFlag};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Detection thresholds, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPolicy {
    /// Requests per window above which an address is flagged (strictly greater)
    pub threshold: u64,
    /// Exact paths whose access flags an address
    pub sensitive_paths: HashSet<String>,
    /// Look-back window
    pub window: Duration,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for ScanPolicy {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            threshold: config.threshold,
            sensitive_paths: config.sensitive_paths.iter().cloned().collect(),
            window: Duration::from_secs(config.window_seconds),
        }
    }
}

impl ScanPolicy {
    fn volume_reason(&self) -> String {
        format!(
            "Exceeded {} requests/{}",
            self.threshold,
            window_label(self.window)
        )
    }
}

fn window_label(window: Duration) -> String {
    match window.as_secs() {
        3600 => "hour".to_string(),
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

fn sensitive_reason(path: &str) -> String {
    format!("Accessed sensitive path: {}", path)
}

/// Summary of one scan run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub window_start: DateTime<Utc>,
    /// Addresses whose count exceeded the threshold
    pub over_threshold: usize,
    /// History entries on sensitive paths
    pub sensitive_hits: usize,
    /// Flags created during this run
    pub created: Vec<SuspiciousAddressFlag>,
    /// Detections for addresses that were already flagged
    pub already_flagged: usize,
    /// Flag writes that failed
    pub failures: usize,
}

impl ScanReport {
    fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            window_start,
            over_threshold: 0,
            sensitive_hits: 0,
            created: Vec::new(),
            already_flagged: 0,
            failures: 0,
        }
    }
}

/// Batch job turning history into suspicious-address flags.
pub struct AnomalyScanner {
    store: Arc<dyn Store>,
    policy: ScanPolicy,
    /// Held for the duration of a run so runs never overlap
    running: Mutex<()>,
}

impl AnomalyScanner {
    pub fn new(store: Arc<dyn Store>, policy: ScanPolicy) -> Self {
        Self {
            store,
            policy,
            running: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    /// Scan the window ending now. Waits for a run already in progress.
    pub async fn run(&self) -> Result<ScanReport, ScanError> {
        let _guard = self.running.lock().await;
        self.scan(Utc::now()).await
    }

    /// Scan the window ending at `now`. Waits for a run already in progress.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ScanReport, ScanError> {
        let _guard = self.running.lock().await;
        self.scan(now).await
    }

    /// Scan now unless another run holds the scanner, in which case `None`.
    pub async fn try_run(&self) -> Option<Result<ScanReport, ScanError>> {
        let _guard = self.running.try_lock().ok()?;
        Some(self.scan(Utc::now()).await)
    }

    async fn scan(&self, now: DateTime<Utc>) -> Result<ScanReport, ScanError> {
        let since = window_start(now, self.policy.window);
        let mut report = ScanReport::new(since);

        let counts = self.store.count_by_address_since(since).await?;
        let volume_reason = self.policy.volume_reason();
        for entry in counts.iter().filter(|c| c.count > self.policy.threshold) {
            report.over_threshold += 1;
            debug!(client_ip = %entry.address, count = entry.count, "Address over request threshold");
            self.ensure_flag(&entry.address, &volume_reason, now, &mut report)
                .await;
        }

        if !self.policy.sensitive_paths.is_empty() {
            let mut paths: Vec<String> = self.policy.sensitive_paths.iter().cloned().collect();
            paths.sort();

            let hits = self.store.logs_on_paths_since(since, &paths).await?;
            report.sensitive_hits = hits.len();

            // Later hits from the same address would only find the flag
            // created by the first one.
            let mut seen: HashSet<&str> = HashSet::new();
            for hit in &hits {
                if !seen.insert(hit.address.as_str()) {
                    continue;
                }
                self.ensure_flag(&hit.address, &sensitive_reason(&hit.path), now, &mut report)
                    .await;
            }
        }

        info!(
            window_start = %report.window_start,
            over_threshold = report.over_threshold,
            sensitive_hits = report.sensitive_hits,
            created = report.created.len(),
            already_flagged = report.already_flagged,
            failures = report.failures,
            "Anomaly scan complete"
        );
        Ok(report)
    }

    async fn ensure_flag(
        &self,
        address: &str,
        reason: &str,
        now: DateTime<Utc>,
        report: &mut ScanReport,
    ) {
        let outcome: Result<FlagOutcome, StoreError> =
            self.store.get_or_create_flag(address, reason, now).await;
        match outcome {
            Ok(FlagOutcome::Created(flag)) => {
                info!(client_ip = %flag.address, reason = %flag.reason, "Flagged suspicious address");
                report.created.push(flag);
            }
            Ok(FlagOutcome::Existing(flag)) => {
                debug!(
                    client_ip = %flag.address,
                    existing_reason = %flag.reason,
                    "Address already flagged"
                );
                report.already_flagged += 1;
            }
            Err(e) => {
                error!(client_ip = %address, reason = %reason, error = %e, "Failed to flag address");
                report.failures += 1;
            }
        }
    }

    /// Run the scan every `every`, first run one interval from now.
    ///
    /// Ticks that fire while a scan is still running are skipped.
    pub fn spawn_schedule(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match self.try_run().await {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => error!(error = %e, "Scheduled anomaly scan failed"),
                    None => warn!("Previous anomaly scan still running, skipping tick"),
                }
            }
        })
    }
}

fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
