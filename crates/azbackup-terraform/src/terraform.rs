use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TerraformError;
use crate::options::TerraformOptions;

/// Result of `terraform plan -detailed-exitcode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    NoChanges,
    Changes,
}

struct RunOutput {
    code: i32,
    stdout: String,
    log: String,
}

/// Drives the `terraform` binary against one module working copy.
#[derive(Debug, Clone)]
pub struct Terraform {
    options: TerraformOptions,
    cancel: CancellationToken,
}

impl Terraform {
    pub fn new(options: TerraformOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Kill the running command and fail with `Cancelled` once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &TerraformOptions {
        &self.options
    }

    pub async fn init(&self) -> Result<(), TerraformError> {
        let mut args: Vec<String> = vec!["init".into(), "-reconfigure".into(), "-input=false".into()];
        args.extend(self.options.backend.args());
        self.run_checked(&args).await.map(|_| ())
    }

    pub async fn apply(&self) -> Result<(), TerraformError> {
        self.options.write_vars()?;
        self.run_checked(&["apply", "-auto-approve", "-input=false"]).await.map(|_| ())
    }

    pub async fn init_and_apply(&self) -> Result<(), TerraformError> {
        self.init().await?;
        self.apply().await
    }

    pub async fn destroy(&self) -> Result<(), TerraformError> {
        self.options.write_vars()?;
        self.run_checked(&["destroy", "-auto-approve", "-input=false"]).await.map(|_| ())
    }

    /// Exit 0 is no changes, exit 2 is pending changes, anything else failed.
    pub async fn plan(&self) -> Result<PlanOutcome, TerraformError> {
        self.options.write_vars()?;
        let out = self.run_tf(&["plan", "-detailed-exitcode", "-input=false"]).await?;
        match out.code {
            0 => Ok(PlanOutcome::NoChanges),
            2 => Ok(PlanOutcome::Changes),
            code => Err(TerraformError::CommandFailed {
                command: "plan".into(),
                code,
                log: out.log,
            }),
        }
    }

    /// Raw JSON value of one output.
    pub async fn output_json(&self, name: &str) -> Result<Value, TerraformError> {
        let out = self.run_checked(&["output", "-json"]).await?;
        let mut outputs: BTreeMap<String, Value> =
            serde_json::from_str(&out.stdout).map_err(|e| TerraformError::Json {
                context: "parse terraform output -json".into(),
                source: e,
            })?;
        let mut entry = outputs
            .remove(name)
            .ok_or_else(|| TerraformError::OutputMissing(name.to_string()))?;
        Ok(entry.get_mut("value").map(Value::take).unwrap_or(Value::Null))
    }

    /// A scalar output rendered as a string.
    pub async fn output(&self, name: &str) -> Result<String, TerraformError> {
        let value = self.output_json(name).await?;
        scalar_string(&value).ok_or_else(|| TerraformError::OutputType {
            name: name.to_string(),
            expected: "scalar",
        })
    }

    /// A flat map output, each value rendered as a string.
    pub async fn output_map(&self, name: &str) -> Result<BTreeMap<String, String>, TerraformError> {
        let value = self.output_json(name).await?;
        let type_err = || TerraformError::OutputType {
            name: name.to_string(),
            expected: "map of scalars",
        };
        let obj = value.as_object().ok_or_else(type_err)?;
        obj.iter()
            .map(|(k, v)| scalar_string(v).map(|s| (k.clone(), s)).ok_or_else(type_err))
            .collect()
    }

    async fn run_checked<S: AsRef<str>>(&self, args: &[S]) -> Result<RunOutput, TerraformError> {
        let out = self.run_tf(args).await?;
        if out.code != 0 {
            return Err(TerraformError::CommandFailed {
                command: command_name(args),
                code: out.code,
                log: out.log,
            });
        }
        Ok(out)
    }

    async fn run_tf<S: AsRef<str>>(&self, args: &[S]) -> Result<RunOutput, TerraformError> {
        let binary = self.options.binary.as_str();
        let workspace = &self.options.terraform_dir;
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        info!(binary, ?args, workspace = %workspace.display(), "running terraform command");

        let mut cmd = Command::new(binary);
        cmd.args(&args)
            .current_dir(workspace)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .envs(self.options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| TerraformError::Spawn {
            binary: binary.to_string(),
            source: e,
        })?;

        let pipe_err = |name: &str| TerraformError::Spawn {
            binary: binary.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, format!("{} not captured", name)),
        };
        let stdout = child.stdout.take().ok_or_else(|| pipe_err("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| pipe_err("stderr"))?;

        // Lines from both streams arrive on one channel, tagged with whether
        // they came from stdout.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(bool, String)>();

        let tx1 = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx1.send((true, line));
            }
        });

        let tx2 = tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx2.send((false, line));
            }
        });

        drop(tx);

        let mut stdout_buf = String::new();
        let mut log = String::new();
        let collect = async {
            while let Some((from_stdout, line)) = rx.recv().await {
                debug!(target: "azbackup::terraform", "{}", line);
                if from_stdout {
                    stdout_buf.push_str(&line);
                    stdout_buf.push('\n');
                }
                log.push_str(&line);
                log.push('\n');
            }
        };
        let limit = Duration::from_secs(self.options.timeout_secs);
        let stopped = tokio::select! {
            _ = self.cancel.cancelled() => Some(TerraformError::Cancelled { command: command_name(&args) }),
            done = tokio::time::timeout(limit, collect) => done.err().map(|_| TerraformError::Timeout {
                command: command_name(&args),
                after: limit,
            }),
        };

        if let Some(err) = stopped {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            warn!(binary, command = %command_name(&args), error = %err, "terraform command stopped");
            return Err(err);
        }

        stdout_task.await.ok();
        stderr_task.await.ok();

        let status = child.wait().await.map_err(|e| TerraformError::Spawn {
            binary: binary.to_string(),
            source: e,
        })?;

        let code = status.code().unwrap_or(-1);
        if code != 0 {
            warn!(binary, code, "terraform command exited non-zero");
        }
        Ok(RunOutput {
            code,
            stdout: stdout_buf,
            log,
        })
    }
}

fn command_name<S: AsRef<str>>(args: &[S]) -> String {
    args.first().map(|a| a.as_ref().to_string()).unwrap_or_default()
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
