//! Tile transport: one HTTP GET per region.
//!
//! The fetch unit needs to tell "the server said no" apart from "nobody
//! answered", because the first is fatal for the work when the answer is
//! 403 and the second is fatal for the batch. [`TileResponse`] makes that
//! an explicit four-way outcome instead of something inferred from an
//! error value.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::debug;

/// The result of one region request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileResponse {
    /// 2xx with a fully read body.
    Body(Vec<u8>),
    /// A response arrived with a non-success status.
    Status(u16),
    /// A success response arrived but its body could not be read.
    BrokenBody(String),
    /// No response at all (connect failure, timeout, reset).
    NoResponse(String),
}

impl TileResponse {
    pub const FORBIDDEN: u16 = 403;

    pub fn is_forbidden(&self) -> bool {
        matches!(self, TileResponse::Status(Self::FORBIDDEN))
    }
}

/// Anything that can answer region requests.
///
/// Implemented by [`HttpTileSource`] for real services and by in-memory
/// fakes in tests.
#[async_trait]
pub trait TileSource: Send + Sync {
    async fn fetch(&self, url: &str) -> TileResponse;
}

/// [`TileSource`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTileSource {
    client: reqwest::Client,
}

impl HttpTileSource {
    /// Client with a per-request timeout and the given User-Agent.
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TileSource for HttpTileSource {
    async fn fetch(&self, url: &str) -> TileResponse {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("No response for {}: {}", url, e);
                return TileResponse::NoResponse(e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            return TileResponse::Status(status.as_u16());
        }

        match response.bytes().await {
            Ok(bytes) => TileResponse::Body(bytes.to_vec()),
            Err(e) if e.is_timeout() => TileResponse::NoResponse(e.to_string()),
            Err(e) => TileResponse::BrokenBody(e.to_string()),
        }
    }
}
