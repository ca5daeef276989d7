//! Outbound HTTP with a fixed-delay retry policy for connection failures.
//!
//! Every call made through [`HttpClient`] is an idempotent read or compute
//! request, so repeating one never duplicates a side effect on the remote
//! service. Only connection-class failures are retried: a service that
//! refuses connections is assumed to still be starting up.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response body: {0}")]
    Decode(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("cancelled")]
    Cancelled,
}

impl HttpError {
    /// Connection refused, reset or aborted.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HttpError::Connect(_))
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout(err.to_string())
        } else if err.is_connect() || has_connection_io_error(&err) {
            HttpError::Connect(err.to_string())
        } else if err.is_decode() {
            HttpError::Decode(err.to_string())
        } else {
            HttpError::Request(err.to_string())
        }
    }
}

fn has_connection_io_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Per-call timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTimeout {
    /// Health and status probes.
    Bounded(Duration),
    /// Long-running compute calls; wait as long as the server needs.
    Unbounded,
}

/// Shared cancellation flag. Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for `delay` unless cancelled first. Returns false if cancelled.
    pub fn sleep(&self, delay: Duration) -> bool {
        let guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .inner
            .wake
            .wait_timeout_while(guard, delay, |_| !self.is_cancelled())
            .unwrap_or_else(PoisonError::into_inner);
        !self.is_cancelled()
    }
}

/// When and how often a failed call is repeated.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Fixed pause between attempts.
    pub delay: Duration,
    /// `None` retries until success, a non-retryable error or cancellation.
    pub max_attempts: Option<u32>,
    /// Which errors are worth another attempt.
    pub retry_on: fn(&HttpError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
            retry_on: HttpError::is_retryable,
        }
    }
}

impl RetryPolicy {
    /// Retries connection failures forever, pausing `delay` between attempts.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    pub fn never() -> Self {
        Self {
            max_attempts: Some(1),
            ..Self::default()
        }
    }

    /// Runs `op` until it succeeds or fails in a way this policy does not retry.
    ///
    /// `op` receives the 1-based attempt number. The first attempt always
    /// runs; cancellation only cuts short the wait before a retry.
    pub fn run<T, F>(&self, cancel: &CancelToken, mut op: F) -> Result<T, HttpError>
    where
        F: FnMut(u32) -> Result<T, HttpError>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if (self.retry_on)(&err) && self.allows(attempt + 1) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "retrying after connection failure"
                    );
                    if !cancel.sleep(self.delay) {
                        return Err(HttpError::Cancelled);
                    }
                    attempt = attempt.saturating_add(1);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP exchange, without retries. The seam test doubles plug into.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, timeout: CallTimeout) -> Result<HttpResponse, HttpError>;

    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: CallTimeout,
    ) -> Result<HttpResponse, HttpError>;
}

/// Blocking reqwest transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, HttpError> {
        // Blocking clients default to a 30s timeout; each call sets its own.
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self { client })
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        timeout: CallTimeout,
    ) -> Result<HttpResponse, HttpError> {
        let request = match timeout {
            CallTimeout::Bounded(limit) => request.timeout(limit),
            CallTimeout::Unbounded => request,
        };
        let response = request.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(HttpResponse { status, body })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str, timeout: CallTimeout) -> Result<HttpResponse, HttpError> {
        self.send(self.client.get(url), timeout)
    }

    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: CallTimeout,
    ) -> Result<HttpResponse, HttpError> {
        self.send(self.client.post(url).json(body), timeout)
    }
}

/// Transport plus retry policy plus cancellation.
#[derive(Debug, Clone)]
pub struct HttpClient<T = ReqwestTransport> {
    transport: T,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl HttpClient<ReqwestTransport> {
    pub fn new(retry: RetryPolicy, cancel: CancelToken) -> Result<Self, HttpError> {
        Ok(Self::with_transport(ReqwestTransport::new()?, retry, cancel))
    }
}

impl<T: Transport> HttpClient<T> {
    pub fn with_transport(transport: T, retry: RetryPolicy, cancel: CancelToken) -> Self {
        Self {
            transport,
            retry,
            cancel,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Single GET, no retry, any status accepted.
    pub fn get_once(&self, url: &str, timeout: CallTimeout) -> Result<HttpResponse, HttpError> {
        self.transport.get(url, timeout)
    }

    /// GET under the retry policy, any status accepted.
    pub fn get(&self, url: &str, timeout: CallTimeout) -> Result<HttpResponse, HttpError> {
        self.retry
            .run(&self.cancel, |_| self.transport.get(url, timeout))
    }

    /// GET under the retry policy, requiring a 2xx JSON body.
    pub fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        timeout: CallTimeout,
    ) -> Result<R, HttpError> {
        decode(self.get(url, timeout)?)
    }

    /// POST a JSON body under the retry policy, requiring a 2xx JSON reply.
    pub fn post_json<R: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: CallTimeout,
    ) -> Result<R, HttpError> {
        let response = self
            .retry
            .run(&self.cancel, |_| self.transport.post_json(url, body, timeout))?;
        decode(response)
    }
}

fn decode<R: DeserializeOwned>(response: HttpResponse) -> Result<R, HttpError> {
    if !response.is_success() {
        return Err(HttpError::Status {
            status: response.status,
            body: response.body,
        });
    }
    serde_json::from_str(&response.body).map_err(|err| HttpError::Decode(err.to_string()))
}
