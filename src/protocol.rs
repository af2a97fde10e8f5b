//! Wire messages exchanged with the proxy over the agent socket.
//!
//! One JSON object per line in each direction, tagged by `type`.

use crate::agent::IpTrackingAgent;
use crate::request::{Decision, RequestInfo};
use crate::scanner::ScanReport;
use crate::store::{BlockedAddress, SuspiciousAddressFlag};
use serde::{Deserialize, Serialize};

/// Message sent to the agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Govern one request
    Request(RequestInfo),
    Ping,
    /// Add an address to the blocklist
    Block {
        address: String,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Remove an address from the blocklist
    Unblock { address: String },
    /// Run the anomaly scan now
    Scan,
    /// List suspicious-address flags
    Flags,
}

/// Message sent back by the agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Decision(Decision),
    Pong,
    Ack { changed: bool },
    ScanReport(ScanReport),
    Flags { flags: Vec<SuspiciousAddressFlag> },
    Error { message: String },
}

impl Outbound {
    fn error(message: impl Into<String>) -> Self {
        Outbound::Error {
            message: message.into(),
        }
    }
}

/// Parse and answer one inbound line.
pub async fn handle_line(agent: &IpTrackingAgent, line: &str) -> Outbound {
    match serde_json::from_str::<Inbound>(line) {
        Ok(message) => handle(agent, message).await,
        Err(e) => Outbound::error(format!("invalid message: {}", e)),
    }
}

pub async fn handle(agent: &IpTrackingAgent, message: Inbound) -> Outbound {
    match message {
        Inbound::Request(request) => Outbound::Decision(agent.on_request(&request).await),
        Inbound::Ping => Outbound::Pong,
        Inbound::Block { address, reason } => {
            let mut entry = BlockedAddress::new(address);
            entry.reason = reason;
            match agent.store().block(entry).await {
                Ok(()) => Outbound::Ack { changed: true },
                Err(e) => Outbound::error(e.to_string()),
            }
        }
        Inbound::Unblock { address } => match agent.store().unblock(&address).await {
            Ok(changed) => Outbound::Ack { changed },
            Err(e) => Outbound::error(e.to_string()),
        },
        Inbound::Scan => match agent.scanner().run().await {
            Ok(report) => Outbound::ScanReport(report),
            Err(e) => Outbound::error(e.to_string()),
        },
        Inbound::Flags => match agent.store().flags().await {
            Ok(flags) => Outbound::Flags { flags },
            Err(e) => Outbound::error(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpTrackingConfig;
    use crate::store::MemoryStore;
    use serde_json::Value;
    use std::sync::Arc;

    fn agent() -> IpTrackingAgent {
        let mut config = IpTrackingConfig::default();
        config.geo.enabled = false;
        IpTrackingAgent::new(config, Arc::new(MemoryStore::new()), None)
    }

    async fn roundtrip(agent: &IpTrackingAgent, line: &str) -> Value {
        serde_json::to_value(handle_line(agent, line).await).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let agent = agent();
        assert_eq!(roundtrip(&agent, r#"{"type":"ping"}"#).await["type"], "pong");
    }

    #[tokio::test]
    async fn test_block_then_request() {
        let agent = agent();

        let ack = roundtrip(&agent, r#"{"type":"block","address":"203.0.113.9"}"#).await;
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["changed"], true);

        let reply = roundtrip(
            &agent,
            r#"{"type":"request","peer_address":"10.0.0.1","method":"GET","path":"/",
                "headers":{"x-forwarded-for":["203.0.113.9, 10.0.0.1"]}}"#,
        )
        .await;
        assert_eq!(reply["type"], "decision");
        assert_eq!(reply["action"], "block");
        assert_eq!(reply["status"], 403);
        assert_eq!(reply["body"], "Your IP has been blocked.");

        let ack = roundtrip(&agent, r#"{"type":"unblock","address":"203.0.113.9"}"#).await;
        assert_eq!(ack["changed"], true);
    }

    #[tokio::test]
    async fn test_scan_and_flags() {
        let agent = agent();
        roundtrip(
            &agent,
            r#"{"type":"request","peer_address":"198.51.100.4","method":"GET","path":"/admin"}"#,
        )
        .await;

        let report = roundtrip(&agent, r#"{"type":"scan"}"#).await;
        assert_eq!(report["type"], "scan_report");
        assert_eq!(report["created"].as_array().unwrap().len(), 1);

        let flags = roundtrip(&agent, r#"{"type":"flags"}"#).await;
        assert_eq!(flags["flags"][0]["address"], "198.51.100.4");
        assert_eq!(flags["flags"][0]["reason"], "Accessed sensitive path: /admin");
    }

    #[tokio::test]
    async fn test_malformed_line() {
        let agent = agent();
        let reply = roundtrip(&agent, "not json").await;
        assert_eq!(reply["type"], "error");

        let reply = roundtrip(&agent, r#"{"type":"launch"}"#).await;
        assert_eq!(reply["type"], "error");
    }
}
