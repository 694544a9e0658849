//! No-IP update adapter
//!
//! One authenticated GET per update; the provider answers with a single
//! status word, optionally followed by the address.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::{DdnsCredentials, DdnsError, Result, UpdateError, UpdateOutcome, UpdateProvider};

/// No-IP dynamic update endpoint
pub const NOIP_UPDATE_URL: &str = "https://dynupdate.no-ip.com/nic/update";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Updater for No-IP hostnames
pub struct NoIpProvider {
    client: reqwest::Client,
    endpoint: Url,
}

impl NoIpProvider {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(NOIP_UPDATE_URL)
    }

    /// Use a different update endpoint (self-hosted or test server)
    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| DdnsError::Http(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!(
                "Harbor/",
                env!("CARGO_PKG_VERSION"),
                " harbor-updater@localhost"
            ))
            .build()
            .map_err(|e| DdnsError::Http(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    fn update_url(&self, hostname: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("hostname", hostname);
        url
    }
}

#[async_trait]
impl UpdateProvider for NoIpProvider {
    async fn update(
        &self,
        credentials: &DdnsCredentials,
    ) -> std::result::Result<UpdateOutcome, UpdateError> {
        let response = self
            .client
            .get(self.update_url(&credentials.hostname))
            .basic_auth(&credentials.username, Some(credentials.password.expose()))
            .send()
            .await
            .map_err(|e| UpdateError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(UpdateError::Auth(format!("HTTP {}", status.as_u16())));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpdateError::Transient(format!("HTTP {}", status.as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| UpdateError::Transient(e.to_string()))?;
        debug!(hostname = %credentials.hostname, response = body.trim(), "No-IP answered");

        classify_response(&body)
    }
}

/// Map a No-IP response body to an outcome
pub fn classify_response(body: &str) -> std::result::Result<UpdateOutcome, UpdateError> {
    let body = body.trim();
    let mut parts = body.split_whitespace();
    let code = parts.next().unwrap_or_default();
    let address = parts.next().map(str::to_string);

    match code {
        "good" => Ok(UpdateOutcome::Updated { address }),
        "nochg" => Ok(UpdateOutcome::Unchanged),
        "badauth" => Err(UpdateError::Auth("invalid username or password".to_string())),
        "nohost" => Err(UpdateError::Auth("hostname not found for this account".to_string())),
        "badagent" => Err(UpdateError::Auth("client disabled by provider".to_string())),
        "!donator" => Err(UpdateError::Auth("feature not available for this account".to_string())),
        "abuse" => Err(UpdateError::Auth("account blocked for abuse".to_string())),
        "911" => Err(UpdateError::Transient("provider-side error".to_string())),
        "" => Err(UpdateError::Transient("empty response".to_string())),
        other => Err(UpdateError::Transient(format!("unexpected response: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_classify_success() {
        assert_eq!(
            classify_response("good 203.0.113.7\r\n"),
            Ok(UpdateOutcome::Updated {
                address: Some("203.0.113.7".to_string())
            })
        );
        assert_eq!(classify_response("nochg 203.0.113.7"), Ok(UpdateOutcome::Unchanged));
    }

    #[test]
    fn test_classify_terminal_rejections() {
        for body in ["badauth", "nohost", "badagent", "!donator", "abuse"] {
            assert!(
                matches!(classify_response(body), Err(UpdateError::Auth(_))),
                "{} should be terminal",
                body
            );
        }
    }

    #[test]
    fn test_classify_transient() {
        assert!(matches!(classify_response("911"), Err(UpdateError::Transient(_))));
        assert!(matches!(classify_response(""), Err(UpdateError::Transient(_))));
        assert!(matches!(classify_response("whatever"), Err(UpdateError::Transient(_))));
    }

    #[test]
    fn test_update_url_encodes_hostname() {
        let provider = NoIpProvider::new().unwrap();
        let url = provider.update_url("home.ddns.net");
        assert_eq!(
            url.as_str(),
            "https://dynupdate.no-ip.com/nic/update?hostname=home.ddns.net"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            NoIpProvider::with_endpoint("not a url"),
            Err(DdnsError::Http(_))
        ));
    }

    /// Serve one canned HTTP response and return the raw request
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let response = format!(
                "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{}/nic/update", addr), handle)
    }

    #[tokio::test]
    async fn test_update_sends_basic_auth() {
        let (endpoint, server) = serve_once("HTTP/1.1 200 OK", "good 203.0.113.7").await;
        let provider = NoIpProvider::with_endpoint(&endpoint).unwrap();
        let credentials = DdnsCredentials::new("home.ddns.net", "alice", "pw");

        let outcome = provider.update(&credentials).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::Updated { .. }));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /nic/update?hostname=home.ddns.net"));
        // base64("alice:pw")
        assert!(request.contains("YWxpY2U6cHc="));
        assert!(request.contains("Harbor/"));
    }

    #[tokio::test]
    async fn test_update_http_unauthorized_is_terminal() {
        let (endpoint, _server) = serve_once("HTTP/1.1 401 Unauthorized", "").await;
        let provider = NoIpProvider::with_endpoint(&endpoint).unwrap();
        let credentials = DdnsCredentials::new("home.ddns.net", "alice", "wrong");

        let result = provider.update(&credentials).await;
        assert!(matches!(result, Err(UpdateError::Auth(_))));
    }

    #[tokio::test]
    async fn test_update_server_error_is_transient() {
        let (endpoint, _server) = serve_once("HTTP/1.1 503 Service Unavailable", "").await;
        let provider = NoIpProvider::with_endpoint(&endpoint).unwrap();
        let credentials = DdnsCredentials::new("home.ddns.net", "alice", "pw");

        let result = provider.update(&credentials).await;
        assert!(matches!(result, Err(UpdateError::Transient(_))));
    }
}
