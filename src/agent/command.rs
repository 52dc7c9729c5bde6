//! Agent runner that shells out to a CLI coding agent.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{AgentError, AgentRequest, AgentResponse, AgentRunner};
use crate::config::AgentConfig;

/// Output lines starting with this marker name a file the agent touched.
pub const FILE_MODIFIED_MARKER: &str = "FILE_MODIFIED:";

enum CallOutcome {
    Finished(std::io::Result<(String, Vec<String>, ExitStatus)>),
    Cancelled,
    TimedOut,
}

/// Runs the configured program once per call.
///
/// The prompt is written to stdin and stdout is streamed line by line.
/// `{model}` and `{role}` in the configured args are substituted per call.
pub struct CommandAgentRunner {
    config: AgentConfig,
}

impl CommandAgentRunner {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn program(&self) -> &str {
        &self.config.program
    }

    fn build_args(&self, request: &AgentRequest) -> Vec<String> {
        let role = request.role.to_string();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace("{model}", &request.model).replace("{role}", &role))
            .collect()
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn collect_output(
        child: &mut Child,
        stdout: ChildStdout,
        output: &mpsc::Sender<String>,
    ) -> std::io::Result<(String, Vec<String>, ExitStatus)> {
        let mut lines = BufReader::new(stdout).lines();
        let mut content = String::new();
        let mut files = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if let Some(path) = line.trim_start().strip_prefix(FILE_MODIFIED_MARKER) {
                let path = path.trim().to_string();
                if !path.is_empty() && !files.contains(&path) {
                    files.push(path);
                }
                continue;
            }
            content.push_str(&line);
            content.push('\n');
            // Receiver gone just means nobody is streaming
            let _ = output.send(format!("{}\n", line)).await;
        }

        let status = child.wait().await?;
        Ok((content, files, status))
    }
}

/// Map a failed exit to an error, treating known transient messages as retryable.
fn classify_failure(code: Option<i32>, stderr: String) -> AgentError {
    let lower = stderr.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("overloaded") {
        AgentError::RateLimited(stderr)
    } else if lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("network error")
        || lower.contains("timed out")
    {
        AgentError::Connection(stderr)
    } else {
        AgentError::ProcessFailed { code, stderr }
    }
}

#[async_trait]
impl AgentRunner for CommandAgentRunner {
    async fn run(
        &self,
        request: AgentRequest,
        output: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<AgentResponse, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let args = self.build_args(&request);
        log::debug!(
            "Launching {} agent: {} {:?} (model={})",
            request.role,
            self.config.program,
            args,
            request.model
        );

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Launch(format!("{}: {}", self.config.program, e)))?;

        // Feed stdin concurrently so a chatty agent cannot deadlock on a full pipe
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt;
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    log::debug!("Agent closed stdin early: {}", e);
                }
            });
        }

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Launch("agent stdout not captured".to_string()))?;

        let timeout = self.timeout();
        let outcome = tokio::select! {
            result = Self::collect_output(&mut child, stdout, &output) => CallOutcome::Finished(result),
            _ = cancel.cancelled() => CallOutcome::Cancelled,
            _ = tokio::time::sleep(timeout) => CallOutcome::TimedOut,
        };

        let (content, files_modified, status) = match outcome {
            CallOutcome::Finished(Ok(finished)) => finished,
            CallOutcome::Finished(Err(e)) => {
                let _ = child.kill().await;
                return Err(AgentError::Connection(format!("agent output stream failed: {}", e)));
            }
            CallOutcome::Cancelled => {
                log::info!("Killing {} agent after cancellation", request.role);
                let _ = child.kill().await;
                return Err(AgentError::Cancelled);
            }
            CallOutcome::TimedOut => {
                log::warn!("{} agent timed out after {:?}", request.role, timeout);
                let _ = child.kill().await;
                return Err(AgentError::Timeout(timeout));
            }
        };

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(classify_failure(status.code(), stderr.trim().to_string()));
        }

        Ok(AgentResponse {
            content: content.trim_end().to_string(),
            files_modified,
        })
    }
}
