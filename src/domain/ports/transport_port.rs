//! Port definition for the network transport.

use std::collections::HashMap;

use bytes::Bytes;
use reqwest::Url;

use crate::domain::entities::RequestPriority;
use crate::domain::errors::LoadResult;

/// One GET request issued by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Resource to fetch.
    pub url: Url,
    /// Priority tier of the originating load.
    pub priority: RequestPriority,
    /// Additional request headers, such as `If-None-Match`.
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// Creates a request without extra headers.
    #[must_use]
    pub const fn new(url: Url, priority: RequestPriority) -> Self {
        Self {
            url,
            priority,
            headers: Vec::new(),
        }
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Looks up a request header, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status, headers and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers keyed by lower-case name.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response, lower-casing header names.
    #[must_use]
    pub fn new<I, K, V>(status: u16, headers: I, body: impl Into<Bytes>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
            body: body.into(),
        }
    }

    /// Looks up a response header by name, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns true for any 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns true for 304 Not Modified.
    #[must_use]
    pub const fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// Port for issuing network requests.
///
/// Implementations own timeouts; a timed-out request is reported as an error.
/// Dropping the returned future must abandon the request.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Performs a single GET request.
    async fn fetch(&self, request: FetchRequest) -> LoadResult<HttpResponse>;
}
