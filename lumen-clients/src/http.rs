//! The shared HTTP client core: retries, timeouts, error discrimination,
//! and rate-limited failure logging.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use lumen_common::backoff;

/// Total attempts per call (1 retry).
const ATTEMPTS: usize = 2;
/// Failure log floor per (client, kind).
const LOG_EVERY: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,
    #[error("service unreachable: {0}")]
    Unreachable(String),
    #[error("unexpected status {status}: {body}")]
    BadStatus { status: u16, body: String },
    #[error("response was not valid JSON: {0}")]
    BadJson(String),
}

impl ClientError {
    /// The discriminant used for rate-limited logging and error mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unreachable(_) => "unreachable",
            Self::BadStatus { .. } => "bad_status",
            Self::BadJson(_) => "bad_json",
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A raw (non-JSON) response: status, content type, body bytes.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub struct HttpClient {
    client: reqwest::Client,
    /// The collaborator this client talks to, e.g. "cas-daemon".
    to: &'static str,
    log_gate: Mutex<HashMap<&'static str, Instant>>,
}

impl HttpClient {
    pub fn new(to: &'static str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("lumen-gateway")
            .timeout(timeout)
            .build()
            .expect("Failed to build reqwest Client");
        Self {
            client,
            to,
            log_gate: Mutex::new(HashMap::new()),
        }
    }

    /// A clean-slate request builder for non-standard requests
    /// (multipart, per-request timeout overrides, ...).
    pub fn builder(
        &self,
        method: http::Method,
        url: String,
    ) -> reqwest::RequestBuilder {
        self.client.request(method, url)
    }

    pub fn get(&self, url: String) -> reqwest::RequestBuilder {
        self.builder(http::Method::GET, url)
    }

    pub fn post(&self, url: String) -> reqwest::RequestBuilder {
        self.builder(http::Method::POST, url)
    }

    /// Send with retries, expecting a 2xx JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request_builder: reqwest::RequestBuilder,
    ) -> ClientResult<T> {
        let raw = self.send_raw(request_builder).await?;
        serde_json::from_slice::<T>(&raw.body).map_err(|e| {
            let err = ClientError::BadJson(e.to_string());
            self.log_failure(&err);
            err
        })
    }

    /// Send with retries, expecting a 2xx body; returned as text.
    pub async fn send_text(
        &self,
        request_builder: reqwest::RequestBuilder,
    ) -> ClientResult<String> {
        let raw = self.send_raw(request_builder).await?;
        Ok(String::from_utf8_lossy(&raw.body).into_owned())
    }

    /// Send with retries. Non-2xx statuses surface as
    /// [`ClientError::BadStatus`].
    pub async fn send_raw(
        &self,
        request_builder: reqwest::RequestBuilder,
    ) -> ClientResult<RawResponse> {
        let raw = self.send_any_status(request_builder).await?;
        if (200..300).contains(&raw.status) {
            Ok(raw)
        } else {
            let err = ClientError::BadStatus {
                status: raw.status,
                body: String::from_utf8_lossy(&raw.body)
                    .chars()
                    .take(256)
                    .collect(),
            };
            self.log_failure(&err);
            Err(err)
        }
    }

    /// Send with retries, returning whatever status the collaborator gave.
    /// Used by the content proxy, which forwards upstream statuses.
    pub async fn send_any_status(
        &self,
        request_builder: reqwest::RequestBuilder,
    ) -> ClientResult<RawResponse> {
        let mut backoff_iter = backoff::client_retry_iter();
        let mut request = Some(
            request_builder
                .build()
                .map_err(|e| ClientError::Unreachable(e.to_string()))?,
        );

        for attempt in 1..=ATTEMPTS {
            let this_request = if attempt < ATTEMPTS {
                match request
                    .as_ref()
                    .expect("Request is only taken on the last attempt")
                    .try_clone()
                {
                    Some(clone) => clone,
                    // Streamed bodies can't be cloned; single attempt only.
                    None => request.take().expect("Checked above"),
                }
            } else {
                match request.take() {
                    Some(r) => r,
                    // Streamed-body request already consumed.
                    None => break,
                }
            };
            let last_attempt = request.is_none();

            match self.client.execute(this_request).await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let content_type = resp
                        .headers()
                        .get(http::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    let body = resp.bytes().await.map_err(|e| {
                        let err = map_reqwest_error(&e);
                        self.log_failure(&err);
                        err
                    })?;
                    return Ok(RawResponse {
                        status,
                        content_type,
                        body,
                    });
                }
                Err(e) => {
                    let err = map_reqwest_error(&e);
                    self.log_failure(&err);
                    if last_attempt {
                        return Err(err);
                    }
                }
            }

            let wait = backoff_iter
                .next()
                .expect("Backoff iterator is infinite");
            tokio::time::sleep(wait).await;
        }

        Err(ClientError::Unreachable(
            "request body was consumed before a response arrived".to_owned(),
        ))
    }

    /// Log a degraded collaborator at most once per failure kind per
    /// minute; repeats within the window drop to debug.
    fn log_failure(&self, err: &ClientError) {
        let kind = err.kind();
        let now = Instant::now();
        let should_warn = {
            let mut gate =
                self.log_gate.lock().expect("Log gate poisoned");
            match gate.get(kind) {
                Some(last) if now.duration_since(*last) < LOG_EVERY => false,
                _ => {
                    gate.insert(kind, now);
                    true
                }
            }
        };
        if should_warn {
            warn!(to = self.to, %kind, "External call failed: {err}");
        } else {
            tracing::debug!(to = self.to, %kind, "External call failed");
        }
    }
}

fn map_reqwest_error(e: &reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Unreachable(e.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(ClientError::Timeout.kind(), "timeout");
        assert_eq!(
            ClientError::Unreachable("x".into()).kind(),
            "unreachable"
        );
        assert_eq!(
            ClientError::BadStatus {
                status: 500,
                body: String::new()
            }
            .kind(),
            "bad_status"
        );
        assert_eq!(ClientError::BadJson("x".into()).kind(), "bad_json");
    }

    #[tokio::test]
    async fn unreachable_host_is_discriminated() {
        let client =
            HttpClient::new("nowhere", Duration::from_millis(200));
        // Reserved TEST-NET-1 address; nothing listens there.
        let result = client
            .send_raw(client.get("http://192.0.2.1:9/".to_owned()))
            .await;
        match result {
            Err(ClientError::Timeout) | Err(ClientError::Unreachable(_)) => {}
            other => panic!("expected timeout/unreachable, got {other:?}"),
        }
    }
}
