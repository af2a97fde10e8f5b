//! Request metadata received from the proxy and the decision sent back.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The parts of an inbound request the agent looks at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestInfo {
    /// Request headers, possibly multi-valued
    pub headers: HashMap<String, Vec<String>>,
    /// Address of the directly connected peer
    pub peer_address: String,
    /// HTTP method
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Stable identifier of the authenticated user, if any
    pub user_id: Option<String>,
    /// Correlation ID assigned by the proxy
    pub correlation_id: String,
}

impl RequestInfo {
    pub fn new(
        peer_address: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            peer_address: peer_address.into(),
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into().to_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Get a single header value (first if multiple). Names match
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(|s| s.as_str())
    }
}

/// What the proxy should do with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    Block,
}

/// Decision returned to the proxy for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    /// Response status when blocking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            action: Action::Allow,
            status: None,
            body: None,
            response_headers: BTreeMap::new(),
            tags: Vec::new(),
        }
    }

    /// Block with 403 Forbidden.
    pub fn deny() -> Self {
        Self::block(403)
    }

    pub fn block(status: u16) -> Self {
        Self {
            action: Action::Block,
            status: Some(status),
            ..Self::allow()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn add_response_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn is_allow(&self) -> bool {
        self.action == Action::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut req = RequestInfo::new("10.0.0.1", "GET", "/");
        req.headers
            .insert("X-Forwarded-For".to_string(), vec!["1.2.3.4".to_string()]);

        assert_eq!(req.header("x-forwarded-for"), Some("1.2.3.4"));
        assert_eq!(req.header("X-FORWARDED-FOR"), Some("1.2.3.4"));
        assert_eq!(req.header("user-agent"), None);
    }

    #[test]
    fn test_deny_serialization() {
        let decision = Decision::deny().with_body("nope").with_tag("blocklist");
        let json = serde_json::to_value(&decision).unwrap();

        assert_eq!(json["action"], "block");
        assert_eq!(json["status"], 403);
        assert_eq!(json["body"], "nope");
        assert!(json.get("response_headers").is_none());
    }
}
