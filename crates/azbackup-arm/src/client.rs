use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ArmError;
use crate::pager::Pager;
use crate::poller::{Operation, PollConfig, Poller};
use crate::token::{TokenProvider, MANAGEMENT_SCOPE};

// ── Base URLs (overridden in tests) ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BaseUrls {
    pub management: String,
}

impl Default for BaseUrls {
    fn default() -> Self {
        Self {
            management: "https://management.azure.com".into(),
        }
    }
}

// ── Retry ─────────────────────────────────────────────────────────────────────

/// Backoff for throttled (429) and unavailable (503) responses.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts:    u32,
    pub initial_backoff: Duration,
    pub max_backoff:     Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts:    5,
            initial_backoff: Duration::from_secs(2),
            max_backoff:     Duration::from_secs(60),
        }
    }
}

/// Upper bound on one HTTP exchange, so a stalled socket cannot outlive the
/// poll deadline by much.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn is_retryable(status: u16) -> bool {
    status == 429 || status == 503
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// What the LRO machinery needs from a response: status, body and the
/// polling headers.
#[derive(Debug, Clone)]
pub struct ArmResponse {
    pub status:          u16,
    pub body:            Value,
    pub async_operation: Option<String>,
    pub location:        Option<String>,
    pub retry_after:     Option<Duration>,
}

impl ArmResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into [`ArmError::Status`].
    pub fn error_for_status(self, method: &Method, url: &str) -> Result<Self, ArmError> {
        if self.is_success() {
            return Ok(self);
        }
        let (code, message) = parse_arm_error(&self.body);
        Err(ArmError::Status {
            method: method.to_string(),
            url: url.to_string(),
            status: self.status,
            code,
            message,
        })
    }
}

/// Extract `(code, message)` from an ARM error envelope.
pub fn parse_arm_error(body: &Value) -> (String, String) {
    let err = body
        .get("error")
        .or_else(|| body.get("Error"))
        .unwrap_or(body);
    let code    = err["code"].as_str().unwrap_or("Unknown").to_string();
    let message = err["message"].as_str().unwrap_or("unknown error").to_string();
    (code, message)
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// `Retry-After` in delta-seconds. ARM does not send the HTTP-date form.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header(headers, "Retry-After")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "falling back to an HTTP client without a request timeout");
            reqwest::Client::new()
        })
}

// ── ArmClient ─────────────────────────────────────────────────────────────────

/// Shared HTTP plumbing for every ARM service object: bearer auth, throttling
/// retries and LRO polling. Cheap to clone.
#[derive(Clone)]
pub struct ArmClient {
    http:   reqwest::Client,
    token:  Arc<dyn TokenProvider>,
    base:   BaseUrls,
    retry:  RetryPolicy,
    poll:   PollConfig,
    cancel: CancellationToken,
}

impl ArmClient {
    pub fn new(token: Arc<dyn TokenProvider>) -> Self {
        Self::with_base(token, BaseUrls::default())
    }

    /// Point the client at a different management endpoint (a mock server in tests).
    pub fn with_base(token: Arc<dyn TokenProvider>, base: BaseUrls) -> Self {
        Self {
            http: http_client(REQUEST_TIMEOUT),
            token,
            base,
            retry: RetryPolicy::default(),
            poll: PollConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Every wait performed through this client stops when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) async fn bearer(&self, scope: &str) -> Result<String, ArmError> {
        self.token.token(scope).await
    }

    /// `{management}{path}?api-version={api_version}`.
    pub fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.base.management, path, api_version)
    }

    /// Like [`ArmClient::url`] with an OData `$filter`, percent-encoded.
    pub fn filtered_url(&self, path: &str, api_version: &str, filter: &str) -> Result<String, ArmError> {
        let raw = format!("{}{}", self.base.management, path);
        let mut url = reqwest::Url::parse(&raw).map_err(|e| ArmError::Request {
            method: "GET".into(),
            url: raw.clone(),
            message: format!("invalid url: {}", e),
        })?;
        url.query_pairs_mut()
            .append_pair("api-version", api_version)
            .append_pair("$filter", filter);
        Ok(url.to_string())
    }

    /// Sleep for `wait`, returning early with [`ArmError::Cancelled`] if the
    /// client's token fires.
    pub(crate) async fn sleep(&self, wait: Duration, what: &str) -> Result<(), ArmError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ArmError::Cancelled(what.to_string())),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    // ── Raw send with retry ───────────────────────────────────────────────────

    async fn send_once(&self, method: &Method, url: &str, body: Option<&Value>) -> Result<ArmResponse, ArmError> {
        let token = self.bearer(MANAGEMENT_SCOPE).await?;
        let mut req = self.http.request(method.clone(), url).bearer_auth(&token);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await.map_err(|e| ArmError::Request {
            method: method.to_string(),
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let bytes = resp.bytes().await.map_err(|e| ArmError::Request {
            method: method.to_string(),
            url: url.to_string(),
            message: format!("reading body: {}", e),
        })?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        Ok(ArmResponse {
            status,
            body,
            async_operation: header(&headers, "Azure-AsyncOperation"),
            location: header(&headers, "Location"),
            retry_after: retry_after(&headers),
        })
    }

    /// Send a request, retrying 429 and 503 with exponential backoff. Any
    /// other status is returned as-is for the caller to interpret.
    pub async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<ArmResponse, ArmError> {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;
        loop {
            debug!(%method, url, attempt, "Azure ARM request");
            let resp = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ArmError::Cancelled(format!("{} {}", method, url))),
                resp = self.send_once(&method, url, body) => resp?,
            };
            if !is_retryable(resp.status) || attempt >= self.retry.max_attempts {
                return Ok(resp);
            }
            let wait = resp.retry_after.unwrap_or(backoff).min(self.retry.max_backoff);
            warn!(%method, url, status = resp.status, attempt, wait_ms = wait.as_millis() as u64, "ARM throttled, retrying");
            self.sleep(wait, &format!("{} {}", method, url)).await?;
            backoff = (backoff * 2).min(self.retry.max_backoff);
            attempt += 1;
        }
    }

    // ── Typed helpers ─────────────────────────────────────────────────────────

    pub async fn get_value(&self, url: &str) -> Result<Value, ArmError> {
        let resp = self.send(Method::GET, url, None).await?;
        Ok(resp.error_for_status(&Method::GET, url)?.body)
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ArmError> {
        let body = self.get_value(url).await?;
        decode(url, body)
    }

    /// GET that maps 404 to `None`.
    pub async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, ArmError> {
        let resp = self.send(Method::GET, url, None).await?;
        if resp.status == 404 {
            return Ok(None);
        }
        let body = resp.error_for_status(&Method::GET, url)?.body;
        decode(url, body).map(Some)
    }

    /// Start a mutating call and capture how to follow it to completion.
    pub async fn begin(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Operation, ArmError> {
        let resp = self.send(method.clone(), url, body).await?;
        let resp = resp.error_for_status(&method, url)?;
        Ok(Operation::from_response(&method, url, resp))
    }

    /// Poll an operation to completion using this client's poll settings and
    /// cancellation token.
    pub async fn wait(&self, op: Operation) -> Result<Value, ArmError> {
        Poller::new(self.clone(), self.poll.clone())
            .poll_until_done(op, &self.cancel)
            .await
    }

    pub async fn put_and_wait(&self, url: &str, body: &Value) -> Result<Value, ArmError> {
        let op = self.begin(Method::PUT, url, Some(body)).await?;
        self.wait(op).await
    }

    pub async fn patch_and_wait(&self, url: &str, body: &Value) -> Result<Value, ArmError> {
        let op = self.begin(Method::PATCH, url, Some(body)).await?;
        self.wait(op).await
    }

    pub async fn post_and_wait(&self, url: &str, body: &Value) -> Result<Value, ArmError> {
        let op = self.begin(Method::POST, url, Some(body)).await?;
        self.wait(op).await
    }

    /// Delete and wait. A resource that is already gone counts as deleted.
    pub async fn delete_and_wait(&self, url: &str) -> Result<(), ArmError> {
        let resp = self.send(Method::DELETE, url, None).await?;
        if resp.status == 404 {
            debug!(url, "already deleted");
            return Ok(());
        }
        let resp = resp.error_for_status(&Method::DELETE, url)?;
        self.wait(Operation::from_response(&Method::DELETE, url, resp)).await?;
        Ok(())
    }

    pub fn pager<T: DeserializeOwned>(&self, url: impl Into<String>) -> Pager<T> {
        Pager::new(self.clone(), url.into())
    }
}

pub(crate) fn decode<T: DeserializeOwned>(url: &str, body: Value) -> Result<T, ArmError> {
    serde_json::from_value(body).map_err(|e| ArmError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}
