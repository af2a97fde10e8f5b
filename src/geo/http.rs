//! HTTP geolocation provider speaking the ip-api JSON format.

use super::{GeoProvider, GeoRecord};
use crate::error::GeoError;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

/// Looks addresses up with `GET {endpoint}/{address}`.
pub struct HttpGeoProvider {
    client: Client,
    endpoint: Url,
}

/// Response body. `status` is `"success"` or `"fail"`.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpGeoProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = Url::parse(endpoint)?;
        if endpoint.cannot_be_a_base() {
            anyhow::bail!("geolocation endpoint {endpoint} cannot take a path");
        }
        Ok(Self { client, endpoint })
    }

    /// Build the lookup URL. The address is percent-encoded as one path
    /// segment, so arbitrary strings are safe.
    fn lookup_url(&self, address: &str) -> Result<Url, GeoError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| GeoError::Malformed(format!("endpoint {} cannot take a path", self.endpoint)))?
            .pop_if_empty()
            .push(address);
        Ok(url)
    }
}

fn into_record(body: LookupResponse) -> Result<GeoRecord, GeoError> {
    if body.status != "success" {
        return Err(GeoError::Provider(
            body.message.unwrap_or_else(|| format!("status {}", body.status)),
        ));
    }
    Ok(GeoRecord {
        country: body.country.filter(|c| !c.is_empty()),
        city: body.city.filter(|c| !c.is_empty()),
    })
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    async fn lookup(&self, address: &str) -> Result<GeoRecord, GeoError> {
        let url = self.lookup_url(address)?;
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| GeoError::Malformed(e.to_string()))?;
        into_record(body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn parse(json: &str) -> Result<GeoRecord, GeoError> {
        into_record(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_success_response() {
        let record = parse(
            r#"{"status":"success","country":"Germany","countryCode":"DE","city":"Berlin","query":"192.0.2.1"}"#,
        )
        .unwrap();
        assert_eq!(record.country.as_deref(), Some("Germany"));
        assert_eq!(record.city.as_deref(), Some("Berlin"));
    }

    #[test]
    fn test_fail_response() {
        let err = parse(r#"{"status":"fail","message":"private range","query":"10.0.0.1"}"#)
            .unwrap_err();
        assert!(matches!(err, GeoError::Provider(ref m) if m == "private range"));
    }

    #[test]
    fn test_empty_fields_are_absent() {
        let record = parse(r#"{"status":"success","country":"","city":""}"#).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn test_lookup_url_encodes_address() {
        let provider =
            HttpGeoProvider::new("http://ip-api.com/json/", Duration::from_secs(1)).unwrap();

        let url = provider.lookup_url("203.0.113.5").unwrap();
        assert_eq!(url.as_str(), "http://ip-api.com/json/203.0.113.5");

        let url = provider.lookup_url("a/b c").unwrap();
        assert_eq!(url.as_str(), "http://ip-api.com/json/a%2Fb%20c");
    }

    /// Serve one canned response on a local port. Returns the endpoint and
    /// a handle yielding the request head the server received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf).into_owned()
        });

        (format!("http://{addr}/json"), handle)
    }

    #[tokio::test]
    async fn test_lookup_over_http() {
        let (endpoint, server) = serve_once(
            "200 OK",
            r#"{"status":"success","country":"Japan","city":"Osaka"}"#,
        )
        .await;
        let provider = HttpGeoProvider::new(&endpoint, Duration::from_secs(2)).unwrap();

        let record = provider.lookup("192.0.2.7").await.unwrap();
        assert_eq!(record.country.as_deref(), Some("Japan"));
        assert_eq!(record.city.as_deref(), Some("Osaka"));

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /json/192.0.2.7 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_error_status_is_transport_error() {
        let (endpoint, _server) = serve_once("503 Service Unavailable", "{}").await;
        let provider = HttpGeoProvider::new(&endpoint, Duration::from_secs(2)).unwrap();

        let err = provider.lookup("192.0.2.7").await.unwrap_err();
        assert!(matches!(err, GeoError::Transport(ref e) if e.is_status()));
    }

    #[tokio::test]
    async fn test_invalid_body_is_malformed() {
        let (endpoint, _server) = serve_once("200 OK", "<html>rate limited</html>").await;
        let provider = HttpGeoProvider::new(&endpoint, Duration::from_secs(2)).unwrap();

        let err = provider.lookup("192.0.2.7").await.unwrap_err();
        assert!(matches!(err, GeoError::Malformed(_)));
    }
}
