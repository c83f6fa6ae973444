//! HTTP Range Source using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{is_retryable_status, range_header, ContentRange, RetryPolicy},
    source::{DataSource, DataSourceFactory, DataSpec, ReadOutcome, FLAG_ALLOW_GZIP},
};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::io;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const USER_AGENT: &str = "rangecache/0.1.0";

/// Builds the shared client used by every [`HttpDataSource`].
fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .read_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))
}

struct OpenBody {
    uri: String,
    stream: BoxStream<'static, reqwest::Result<Bytes>>,
    pending: Bytes,
    /// Leading bytes to drop when the server ignored the range.
    bytes_to_skip: u64,
    bytes_remaining: Option<u64>,
}

/// Reqwest-based [`DataSource`] issuing HTTP `Range` requests.
///
/// - `206 Partial Content` bodies are read as is
/// - `200 OK` bodies are read from the start with `position` bytes skipped
/// - `416 Range Not Satisfiable` is reported as
///   [`BridgeError::PositionOutOfRange`]
/// - Connection failures, 5xx and 429 responses are retried with backoff
pub struct HttpDataSource {
    client: Client,
    retry_policy: RetryPolicy,
    open: Option<OpenBody>,
}

impl HttpDataSource {
    pub fn new(retry_policy: RetryPolicy) -> Result<Self> {
        Ok(Self::with_client(build_client()?, retry_policy))
    }

    /// Create a source sharing an existing client's connection pool
    pub fn with_client(client: Client, retry_policy: RetryPolicy) -> Self {
        Self {
            client,
            retry_policy,
            open: None,
        }
    }
}

/// Sends the range request, retrying connection failures and retryable
/// statuses per `retry_policy`.
async fn send_with_retry(
    client: &Client,
    retry_policy: &RetryPolicy,
    spec: &DataSpec,
) -> Result<Response> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        debug!(
            attempt,
            max_attempts = retry_policy.max_attempts,
            uri = %spec.uri,
            position = spec.position,
            length = ?spec.length,
            "Executing range request"
        );

        let mut request = client.get(&spec.uri);
        if let Some(range) = range_header(spec.position, spec.length) {
            request = request.header(RANGE, range);
        }
        if !spec.is_flag_set(FLAG_ALLOW_GZIP) {
            request = request.header(ACCEPT_ENCODING, "identity");
        }

        let error = match request.send().await {
            Ok(response) if is_retryable_status(response.status().as_u16()) => {
                let status = response.status().as_u16();
                warn!(status, attempt, "Range request failed with retryable status");
                BridgeError::Http {
                    status,
                    message: status_message(response.status()),
                }
            }
            Ok(response) => return Ok(response),
            Err(e) => {
                warn!(error = %e, attempt, "Range request failed");
                if e.is_timeout() {
                    BridgeError::OperationFailed("Request timed out".to_string())
                } else if e.is_connect() {
                    BridgeError::OperationFailed(format!("Connection failed: {}", e))
                } else {
                    BridgeError::OperationFailed(e.to_string())
                }
            }
        };

        if attempt >= retry_policy.max_attempts {
            return Err(error);
        }
        let delay = retry_policy.delay_for_attempt(attempt);
        debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
        sleep(delay).await;
    }
}

fn status_message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string()
}

/// Length of the body from `position` onwards, if the server told us.
fn resolve_length(response: &Response, spec: &DataSpec, full_body: bool) -> Option<u64> {
    if let Some(length) = spec.length {
        return Some(length);
    }
    let encoded = response
        .headers()
        .get(reqwest::header::CONTENT_ENCODING)
        .is_some_and(|v| v.as_bytes() != b"identity");
    if encoded {
        return None;
    }
    if full_body {
        return response
            .content_length()
            .map(|len| len.saturating_sub(spec.position));
    }
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ContentRange::parse)
        .map(|range| range.length())
        .or_else(|| response.content_length())
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>> {
        if self.open.is_some() {
            return Err(BridgeError::OperationFailed(
                "HTTP source is already open".to_string(),
            ));
        }

        let response = send_with_retry(&self.client, &self.retry_policy, spec).await?;
        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(BridgeError::PositionOutOfRange {
                position: spec.position,
            });
        }
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(BridgeError::Http {
                status: status.as_u16(),
                message: status_message(status),
            });
        }

        let full_body = status == StatusCode::OK;
        if full_body && spec.position > 0 {
            if let Some(len) = response.content_length() {
                if spec.position > len || (spec.position == len && spec.length.is_none()) {
                    return Err(BridgeError::PositionOutOfRange {
                        position: spec.position,
                    });
                }
            }
        }

        let bytes_remaining = resolve_length(&response, spec, full_body);
        let bytes_to_skip = if full_body { spec.position } else { 0 };
        debug!(
            status = status.as_u16(),
            bytes_to_skip,
            bytes_remaining = ?bytes_remaining,
            "Opened range"
        );

        self.open = Some(OpenBody {
            uri: response.url().to_string(),
            stream: response.bytes_stream().boxed(),
            pending: Bytes::new(),
            bytes_to_skip,
            bytes_remaining,
        });
        Ok(bytes_remaining)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Bytes(0));
        }
        let body = self
            .open
            .as_mut()
            .ok_or_else(|| BridgeError::OperationFailed("HTTP source is not open".to_string()))?;
        if body.bytes_remaining == Some(0) {
            return Ok(ReadOutcome::EndOfInput);
        }

        loop {
            if body.pending.is_empty() {
                match body.stream.next().await {
                    Some(chunk) => {
                        body.pending = chunk.map_err(|e| BridgeError::Io(io::Error::other(e)))?;
                    }
                    None if body.bytes_to_skip > 0 || body.bytes_remaining.is_some() => {
                        return Err(BridgeError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!(
                                "body of {} ended with {:?} bytes outstanding",
                                body.uri, body.bytes_remaining
                            ),
                        )));
                    }
                    None => return Ok(ReadOutcome::EndOfInput),
                }
            }

            if body.bytes_to_skip > 0 {
                let skip = body.bytes_to_skip.min(body.pending.len() as u64) as usize;
                let _ = body.pending.split_to(skip);
                body.bytes_to_skip -= skip as u64;
                continue;
            }
            if body.pending.is_empty() {
                continue;
            }

            let mut n = buf.len().min(body.pending.len());
            if let Some(remaining) = body.bytes_remaining {
                n = n.min(remaining.min(usize::MAX as u64) as usize);
            }
            buf[..n].copy_from_slice(&body.pending.split_to(n));
            if let Some(remaining) = body.bytes_remaining.as_mut() {
                *remaining -= n as u64;
            }
            return Ok(ReadOutcome::Bytes(n));
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.open = None;
        Ok(())
    }

    fn uri(&self) -> Option<String> {
        self.open.as_ref().map(|body| body.uri.clone())
    }
}

/// Creates [`HttpDataSource`]s sharing one connection pool.
#[derive(Clone)]
pub struct HttpDataSourceFactory {
    client: Client,
    retry_policy: RetryPolicy,
}

impl HttpDataSourceFactory {
    pub fn new(retry_policy: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            retry_policy,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl DataSourceFactory for HttpDataSourceFactory {
    fn create(&self) -> Box<dyn DataSource> {
        Box::new(HttpDataSource::with_client(
            self.client.clone(),
            self.retry_policy.clone(),
        ))
    }
}
