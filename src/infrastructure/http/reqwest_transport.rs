//! `reqwest`-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, trace};

use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{FetchRequest, HttpResponse, Transport};

const USER_AGENT: &str = concat!("pixfetch/", env!("CARGO_PKG_VERSION"));

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport built on a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a transport with the given request timeout.
    ///
    /// # Errors
    /// Returns error if HTTP client creation fails.
    pub fn new(timeout: Duration) -> LoadResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| LoadError::transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_error(error: &reqwest::Error) -> LoadError {
    if error.is_timeout() {
        LoadError::timeout(error.to_string())
    } else {
        LoadError::transport(error.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, request: FetchRequest) -> LoadResult<HttpResponse> {
        trace!(url = %request.url, priority = ?request.priority, "Sending image request");

        let mut builder = self.client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| map_error(&e))?;
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| map_error(&e))?;

        debug!(url = %request.url, status = status, size = body.len(), "Image response received");
        Ok(HttpResponse::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::RequestPriority;
    use reqwest::Url;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned response and returns the raw request it received.
    async fn serve_once(response: &'static str) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        let url = Url::parse(&format!("http://{addr}/image.png")).unwrap();
        (url, handle)
    }

    #[tokio::test]
    async fn test_fetch_returns_status_headers_and_body() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 4\r\nETag: \"v1\"\r\nCache-Control: max-age=60\r\nConnection: close\r\n\r\nbody",
        )
        .await;
        let transport = ReqwestTransport::new(DEFAULT_TIMEOUT).unwrap();

        let response = transport
            .fetch(
                FetchRequest::new(url, RequestPriority::Normal).with_header("If-None-Match", "\"v0\""),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"body");
        assert_eq!(response.header("ETag"), Some("\"v1\""));
        assert!(response.headers.contains_key("cache-control"));

        let raw_request = server.await.unwrap().to_ascii_lowercase();
        assert!(raw_request.contains("if-none-match: \"v0\""));
    }

    #[tokio::test]
    async fn test_not_modified_is_not_an_error() {
        let (url, server) =
            serve_once("HTTP/1.1 304 Not Modified\r\nConnection: close\r\n\r\n").await;
        let transport = ReqwestTransport::new(DEFAULT_TIMEOUT).unwrap();

        let response = transport
            .fetch(FetchRequest::new(url, RequestPriority::Normal))
            .await
            .unwrap();

        assert!(response.is_not_modified());
        assert!(response.body.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_failure_is_retryable_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let url = Url::parse(&format!("http://{addr}/missing.png")).unwrap();

        let err = transport
            .fetch(FetchRequest::new(url, RequestPriority::Low))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }
}
