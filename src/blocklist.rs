//! Blocklist membership checks.

use crate::error::StoreError;
use crate::store::{BlockedAddress, Store};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Answers whether an address is on the administrative blocklist.
///
/// Every call goes to the store; nothing is cached, so removals and
/// additions take effect on the next request.
pub struct BlocklistChecker {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl BlocklistChecker {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// A store failure or timeout is returned as an error, never as
    /// "not blocked".
    pub async fn is_blocked(&self, address: &str) -> Result<bool, StoreError> {
        match timeout(self.timeout, self.store.is_blocked(address)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

/// Load blocklist seed entries from a JSON array of
/// `{"address": ..., "reason": ...}` objects. A missing file yields an empty
/// list.
pub fn load_blocklist(path: &Path) -> anyhow::Result<Vec<BlockedAddress>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<BlockedAddress> = serde_json::from_str(&content)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::io::Write;

    #[tokio::test]
    async fn test_reflects_latest_state() {
        let store = Arc::new(MemoryStore::new());
        let checker = BlocklistChecker::new(store.clone(), Duration::from_millis(100));

        assert!(!checker.is_blocked("192.0.2.1").await.unwrap());
        store.block(BlockedAddress::new("192.0.2.1")).await.unwrap();
        assert!(checker.is_blocked("192.0.2.1").await.unwrap());
        store.unblock("192.0.2.1").await.unwrap();
        assert!(!checker.is_blocked("192.0.2.1").await.unwrap());
    }

    #[test]
    fn test_load_blocklist_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"address": "203.0.113.7", "reason": "abuse report"}}, {{"address": "198.51.100.1"}}]"#
        )
        .unwrap();

        let entries = load_blocklist(file.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address, "203.0.113.7");
        assert_eq!(entries[0].reason.as_deref(), Some("abuse report"));
        assert_eq!(entries[1].reason, None);
    }

    #[test]
    fn test_missing_blocklist_file() {
        let entries = load_blocklist(Path::new("/nonexistent/blocklist.json")).unwrap();
        assert!(entries.is_empty());
    }
}
