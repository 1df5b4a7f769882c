//! Long-running operation polling.
//!
//! ARM answers a mutating request in one of three ways, and the poller follows
//! each to a terminal state:
//!
//! - an `Azure-AsyncOperation` header: GET it and read `status`;
//! - a `Location` header on a 202: GET it until it stops answering 202;
//! - neither, but the resource body has a non-terminal
//!   `properties.provisioningState`: GET the resource until it settles.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{parse_arm_error, ArmClient, ArmResponse};
use crate::error::ArmError;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_DEADLINE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Fixed wait between polls, stretched by a longer `Retry-After`.
    pub interval: Duration,
    /// Give up with [`ArmError::Timeout`] once this much time has passed.
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollMode {
    /// Finished in the initial response.
    Completed,
    AsyncOperation { url: String },
    Location { url: String },
    ProvisioningState { url: String },
}

/// Handle for an in-flight ARM operation. Lives only as long as the wait.
#[derive(Debug, Clone)]
pub struct Operation {
    /// `METHOD url`, used in logs and errors.
    pub description: String,
    pub mode: PollMode,
    /// Where the finished resource is read from in `AsyncOperation` mode.
    pub final_url: Option<String>,
    /// Body of the initial response.
    pub initial: Value,
}

fn provisioning_state(body: &Value) -> Option<&str> {
    body.pointer("/properties/provisioningState").and_then(Value::as_str)
}

fn is_terminal(state: &str) -> bool {
    ["Succeeded", "Failed", "Canceled"]
        .iter()
        .any(|t| t.eq_ignore_ascii_case(state))
}

fn is_failure(state: &str) -> bool {
    state.eq_ignore_ascii_case("Failed") || state.eq_ignore_ascii_case("Canceled")
}

impl Operation {
    /// Work out the polling mode from the initial (successful) response.
    pub fn from_response(method: &Method, url: &str, resp: ArmResponse) -> Self {
        let description = format!("{} {}", method, url);
        let resource_write = *method == Method::PUT || *method == Method::PATCH;
        let final_url = if resource_write {
            Some(url.to_string())
        } else if *method == Method::POST {
            resp.location.clone()
        } else {
            None
        };

        let mode = if let Some(op_url) = resp.async_operation.clone() {
            PollMode::AsyncOperation { url: op_url }
        } else if let (202, Some(loc)) = (resp.status, resp.location.clone()) {
            PollMode::Location { url: loc }
        } else if resource_write
            && provisioning_state(&resp.body).is_some_and(|s| !is_terminal(s))
        {
            PollMode::ProvisioningState { url: url.to_string() }
        } else {
            PollMode::Completed
        };

        let final_url = match &mode {
            PollMode::AsyncOperation { .. } => final_url,
            _ => None,
        };

        Self {
            description,
            mode,
            final_url,
            initial: resp.body,
        }
    }
}

/// Await one request-bearing step, giving up when `deadline` (measured from
/// `started`) passes or `cancel` fires.
pub(crate) async fn bounded<T, F>(
    what: &str,
    started: Instant,
    deadline: Duration,
    cancel: &CancellationToken,
    step: F,
) -> Result<T, ArmError>
where
    F: Future<Output = Result<T, ArmError>>,
{
    let remaining = deadline.saturating_sub(started.elapsed());
    tokio::select! {
        _ = cancel.cancelled() => Err(ArmError::Cancelled(what.to_string())),
        res = tokio::time::timeout(remaining, step) => match res {
            Ok(res) => res,
            Err(_) => Err(ArmError::Timeout {
                operation: what.to_string(),
                after: started.elapsed(),
            }),
        },
    }
}

enum Step {
    Done(Value),
    Pending { retry_after: Option<Duration> },
}

/// Drives an [`Operation`] to completion.
pub struct Poller {
    client: ArmClient,
    config: PollConfig,
}

impl Poller {
    pub fn new(client: ArmClient, config: PollConfig) -> Self {
        Self { client, config }
    }

    /// Poll until the operation reaches a terminal state, the deadline passes
    /// or `cancel` fires. Returns the final resource body (or the terminal
    /// response body when there is no resource to read back).
    pub async fn poll_until_done(&self, op: Operation, cancel: &CancellationToken) -> Result<Value, ArmError> {
        let url = match &op.mode {
            PollMode::Completed => return Ok(op.initial),
            PollMode::AsyncOperation { url }
            | PollMode::Location { url }
            | PollMode::ProvisioningState { url } => url.clone(),
        };

        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ArmError::Cancelled(op.description));
            }

            let step = bounded(&op.description, started, self.config.deadline, cancel, async {
                let resp = self.client.send(Method::GET, &url, None).await?;
                self.evaluate(&op, &url, resp).await
            })
            .await?;
            polls += 1;

            let retry_after = match step {
                Step::Done(body) => {
                    debug!(operation = %op.description, polls, "ARM operation finished");
                    return Ok(body);
                }
                Step::Pending { retry_after } => retry_after,
            };

            let wait = retry_after.map_or(self.config.interval, |r| r.max(self.config.interval));
            if started.elapsed() + wait > self.config.deadline {
                return Err(ArmError::Timeout {
                    operation: op.description,
                    after: started.elapsed(),
                });
            }

            if polls % 10 == 0 {
                info!(polls, operation = %op.description, "still waiting for Azure ARM operation");
            } else {
                debug!(polls, operation = %op.description, wait_ms = wait.as_millis() as u64, "Azure ARM operation pending, waiting");
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ArmError::Cancelled(op.description)),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn evaluate(&self, op: &Operation, url: &str, resp: ArmResponse) -> Result<Step, ArmError> {
        let retry_after = resp.retry_after;
        match &op.mode {
            PollMode::Completed => Ok(Step::Done(resp.body)),

            PollMode::AsyncOperation { .. } => {
                let body = resp.error_for_status(&Method::GET, url)?.body;
                let status = body["status"].as_str().unwrap_or("Unknown").to_string();
                if status.eq_ignore_ascii_case("Succeeded") {
                    return match &op.final_url {
                        Some(final_url) => Ok(Step::Done(self.client.get_value(final_url).await?)),
                        None => Ok(Step::Done(match body.get("properties") {
                            Some(p) if p.is_object() => p.clone(),
                            _ => body,
                        })),
                    };
                }
                if is_failure(&status) {
                    let (code, message) = parse_arm_error(&body);
                    return Err(ArmError::OperationFailed {
                        operation: op.description.clone(),
                        status,
                        code,
                        message,
                    });
                }
                Ok(Step::Pending { retry_after })
            }

            PollMode::Location { .. } => match resp.status {
                202 => Ok(Step::Pending { retry_after }),
                200 | 201 | 204 => Ok(Step::Done(resp.body)),
                _ => {
                    let resp = resp.error_for_status(&Method::GET, url)?;
                    // A 2xx outside the expected set still means done.
                    Ok(Step::Done(resp.body))
                }
            },

            PollMode::ProvisioningState { .. } => {
                let body = resp.error_for_status(&Method::GET, url)?.body;
                match provisioning_state(&body).map(str::to_string) {
                    None => Ok(Step::Done(body)),
                    Some(state) if state.eq_ignore_ascii_case("Succeeded") => Ok(Step::Done(body)),
                    Some(state) if is_failure(&state) => {
                        let (code, message) = parse_arm_error(&body);
                        Err(ArmError::OperationFailed {
                            operation: op.description.clone(),
                            status: state,
                            code,
                            message,
                        })
                    }
                    Some(_) => Ok(Step::Pending { retry_after }),
                }
            }
        }
    }
}
