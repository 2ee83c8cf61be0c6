use std::time::Duration;

use futures_util::StreamExt;
use kline_core::{Interval, Kline};
use kline_logging::kline_debug;
use reqwest::header::RETRY_AFTER;
use reqwest::Url;

use crate::classify::classify_status;
use crate::decode::decode_klines;
use crate::{FailureKind, FetchError};

/// Only an excerpt of a non-2xx body ends up in the error message.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_bytes: u64,
    /// Used when a request carries no base URL override.
    pub default_base_url: String,
    pub path: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_bytes: 16 * 1024 * 1024,
            default_base_url: "https://api.binance.com".to_string(),
            path: "/api/v3/klines".to_string(),
        }
    }
}

/// One klines request for one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Proxy/base URL override; `None` uses the fetcher's default.
    pub base_url: Option<String>,
    pub symbol: String,
    pub interval: Interval,
    pub limit: usize,
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Kline>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn request_url(&self, request: &FetchRequest) -> Result<Url, FetchError> {
        let base = request
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .unwrap_or(&self.settings.default_base_url);
        let raw = format!("{}{}", base.trim_end_matches('/'), self.settings.path);
        let mut url = Url::parse(&raw)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, format!("{raw}: {err}")))?;
        url.query_pairs_mut()
            .append_pair("symbol", &request.symbol)
            .append_pair("interval", request.interval.as_str())
            .append_pair("limit", &request.limit.to_string());
        Ok(url)
    }

    fn too_large(&self, actual: u64) -> FetchError {
        FetchError::new(
            FailureKind::TooLarge {
                max_bytes: self.settings.max_bytes,
                actual: Some(actual),
            },
            "response too large",
        )
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Kline>, FetchError> {
        let url = self.request_url(request)?;
        kline_debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = read_error_excerpt(response.bytes_stream(), MAX_ERROR_BODY_BYTES).await;
            return Err(classify_status(
                status.as_u16(),
                retry_after.as_deref(),
                &body,
                chrono::Utc::now(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(self.too_large(content_len));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(self.too_large(next_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        decode_klines(&bytes)
            .map_err(|err| FetchError::new(FailureKind::MalformedBody, err.to_string()))
    }
}

/// Reads at most `limit` bytes of an error body. A transport failure
/// mid-body keeps what arrived so far.
async fn read_error_excerpt<S, B, E>(stream: S, limit: usize) -> String
where
    S: futures_util::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let mut stream = std::pin::pin!(stream);
    let mut bytes = Vec::new();
    while bytes.len() < limit {
        let Some(Ok(chunk)) = stream.next().await else {
            break;
        };
        let chunk = chunk.as_ref();
        let take = chunk.len().min(limit - bytes.len());
        bytes.extend_from_slice(&chunk[..take]);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
