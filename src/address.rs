//! Client address extraction.

use crate::request::RequestInfo;

/// Default header carrying the proxy chain.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Derive the originating address of a request.
///
/// Takes the first entry of the forwarded-for header when it is present and
/// non-empty, otherwise the peer address. The value is not validated.
pub fn client_address(request: &RequestInfo, forwarded_header: &str) -> String {
    request
        .header(forwarded_header)
        .and_then(first_forwarded)
        .unwrap_or(request.peer_address.as_str())
        .to_string()
}

fn first_forwarded(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        return None;
    }
    value.split(',').next().map(str::trim)
}
