//! HTTP fetch abstraction for tile origins.
//!
//! The [`TileFetch`] trait separates the downloader's revalidation logic
//! from the wire, so tests script responses without a server. The real
//! implementation is [`HttpTileFetcher`] on a pooled reqwest client.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// User-Agent sent with every tile request. Some tile servers reject
/// requests without one.
const USER_AGENT: &str = concat!("tilestream/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors from the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The URL could not be parsed or used to build a request
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    /// The request failed before a response arrived
    #[error("network error: {0}")]
    Network(String),
}

/// Validator for a conditional GET, from a previously cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conditional {
    /// `If-None-Match` with the stored entity tag.
    Etag(String),
    /// `If-Modified-Since` with the time the tile was last confirmed.
    ModifiedSince(SystemTime),
}

/// An origin response, reduced to what the downloader needs.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// HTTP status code.
    pub status: u16,
    /// `ETag` response header, if present.
    pub etag: Option<String>,
    /// Response body. Empty for 304 responses.
    pub body: Bytes,
}

impl TileResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// True for 304 Not Modified.
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// Trait for fetching a tile over HTTP.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling scripted responses in tests.
pub trait TileFetch: Send + Sync {
    /// Performs a GET request for a tile, optionally conditional on a
    /// cached validator.
    ///
    /// # Arguments
    ///
    /// * `url` - The tile URL to request
    /// * `conditional` - Validator for a conditional request, if the
    ///   caller holds a cached copy
    ///
    /// # Returns
    ///
    /// The response status, entity tag and body, or an error if no
    /// response arrived. Non-success statuses are returned, not errors.
    fn get(
        &self,
        url: &str,
        conditional: Option<&Conditional>,
    ) -> impl Future<Output = Result<TileResponse, FetchError>> + Send;
}

/// Format a time as an HTTP-date for `If-Modified-Since`.
fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Real tile fetcher on an async reqwest client.
///
/// Connections are pooled and kept warm, since tile loads arrive in
/// bursts of many small requests to the same host.
#[derive(Clone)]
pub struct HttpTileFetcher {
    client: reqwest::Client,
}

impl HttpTileFetcher {
    /// Creates a fetcher with the default timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a fetcher with a custom request timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            // Connection pooling - keep connections alive for tile bursts
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            // TCP optimizations
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl TileFetch for HttpTileFetcher {
    async fn get(
        &self,
        url: &str,
        conditional: Option<&Conditional>,
    ) -> Result<TileResponse, FetchError> {
        trace!(url = url, "Tile GET starting");

        let mut request = self.client.get(url);
        match conditional {
            Some(Conditional::Etag(etag)) => {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag.as_str());
            }
            Some(Conditional::ModifiedSince(time)) => {
                request = request.header(reqwest::header::IF_MODIFIED_SINCE, http_date(*time));
            }
            None => {}
        }

        let response = match request.send().await {
            Ok(resp) => {
                debug!(
                    url = url,
                    status = resp.status().as_u16(),
                    "Tile response received"
                );
                resp
            }
            Err(e) => {
                warn!(
                    url = url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "Tile request failed"
                );
                return Err(if e.is_builder() {
                    FetchError::MalformedUrl(format!("{}: {}", url, e))
                } else {
                    FetchError::Network(format!("Request failed: {}", e))
                });
            }
        };

        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to read response: {}", e)))?;

        Ok(TileResponse { status, etag, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_http_date_epoch() {
        let date = http_date(SystemTime::UNIX_EPOCH);
        assert_eq!(date, "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn test_http_date_known_time() {
        // 2021-01-02 03:04:05 UTC
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_609_556_645);
        assert_eq!(http_date(time), "Sat, 02 Jan 2021 03:04:05 GMT");
    }

    #[test]
    fn test_response_success_range() {
        let resp = TileResponse {
            status: 200,
            etag: None,
            body: Bytes::from_static(b"ok"),
        };
        assert!(resp.is_success());
        assert!(!resp.is_not_modified());

        let resp = TileResponse {
            status: 204,
            etag: None,
            body: Bytes::new(),
        };
        assert!(resp.is_success());
    }

    #[test]
    fn test_response_not_modified() {
        let resp = TileResponse {
            status: 304,
            etag: None,
            body: Bytes::new(),
        };
        assert!(resp.is_not_modified());
        assert!(!resp.is_success());
    }

    #[test]
    fn test_response_error_statuses() {
        for status in [404, 429, 500, 503] {
            let resp = TileResponse {
                status,
                etag: None,
                body: Bytes::new(),
            };
            assert!(!resp.is_success());
            assert!(!resp.is_not_modified());
        }
    }

    #[test]
    fn test_fetcher_construction() {
        assert!(HttpTileFetcher::new().is_ok());
        assert!(HttpTileFetcher::with_timeout(5).is_ok());
    }
}
