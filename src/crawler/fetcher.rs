//! HTTP transport shared by all worker threads
//!
//! This module handles:
//! - The [`Transport`] trait the parser and downloader fetch through
//! - The [`Response`] value handed to extractors and storage
//! - A blocking reqwest-backed session with default headers

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, REFERER, USER_AGENT};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// User-Agent sent when the configuration does not name one
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/88.0.4324.104 Safari/537.36";

/// Errors that can occur while fetching a locator
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Transport panicked while fetching {url}")]
    Panicked { url: String },
}

/// A fetched resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Content-Type header value
    pub content_type: Option<String>,
    /// Raw body
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// True for 2xx statuses
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Synchronous fetch operation shared by every worker of every pool
///
/// Implementations are called concurrently from many threads and must
/// synchronize any internal state themselves. A response with a non-2xx
/// status is still a response; callers decide what to do with it.
pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        locator: &str,
        timeout: Duration,
        headers: &HeaderMap,
    ) -> Result<Response, FetchError>;
}

/// Builds the header map for a page request with a `Referer`
pub fn referer_headers(locator: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(referer) = crate::url::referer_for(locator) {
        if let Ok(value) = HeaderValue::from_str(&referer) {
            headers.insert(REFERER, value);
        }
    }
    headers
}

/// Builds the default header map sent with every request
pub fn default_headers(
    user_agent: Option<&str>,
    extra: &BTreeMap<String, String>,
) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    let user_agent = user_agent.unwrap_or(DEFAULT_USER_AGENT);
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).map_err(|e| FetchError::InvalidHeader {
            name: USER_AGENT.to_string(),
            message: e.to_string(),
        })?,
    );

    for (name, value) in extra {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::InvalidHeader {
                name: name.clone(),
                message: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| FetchError::InvalidHeader {
            name: name.clone(),
            message: e.to_string(),
        })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Builds a blocking HTTP client with the given default headers
pub fn build_http_client(headers: HeaderMap) -> Result<Client, FetchError> {
    Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(FetchError::Client)
}

/// reqwest-backed transport shared by all pools of a crawler
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
}

impl HttpSession {
    /// Creates a session sending `user_agent` (or a browser default) and
    /// the extra headers with every request
    pub fn new(
        user_agent: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, FetchError> {
        let client = build_http_client(default_headers(user_agent, headers)?)?;
        Ok(Self { client })
    }
}

impl Transport for HttpSession {
    fn fetch(
        &self,
        locator: &str,
        timeout: Duration,
        headers: &HeaderMap,
    ) -> Result<Response, FetchError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: locator.to_string(),
                }
            } else {
                FetchError::Http {
                    url: locator.to_string(),
                    source: e,
                }
            }
        };

        let response = self
            .client
            .get(locator)
            .timeout(timeout)
            .headers(headers.clone())
            .send()
            .map_err(classify)?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().map_err(classify)?.to_vec();

        Ok(Response {
            url,
            status,
            content_type,
            body,
        })
    }
}
