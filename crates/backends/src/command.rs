//! Backend that runs one local program per worker.
//!
//! The program receives the registration details as `RUNNER_*` environment
//! variables (see [`LaunchRequest::env`]) and is expected to register the
//! worker, run the job and exit. Exit status zero is success.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use dispatch::{BackendError, BackendId, ComputeBackend, DispatchRequest};

use crate::config::CommandConfig;
use crate::launch::LaunchRequest;

/// Longest stderr excerpt kept in a failure message.
const MAX_STDERR_EXCERPT: usize = 1024;

/// A [`ComputeBackend`] that spawns a configured program.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    id: BackendId,
    config: CommandConfig,
    server_url: String,
}

impl CommandBackend {
    /// Creates the backend.
    pub fn new(id: BackendId, config: CommandConfig, server_url: impl Into<String>) -> Self {
        Self {
            id,
            config,
            server_url: server_url.into(),
        }
    }

    fn failed(&self, message: String, retryable: bool) -> BackendError {
        BackendError::Failed {
            backend: self.id.clone(),
            message,
            retryable,
        }
    }
}

#[async_trait]
impl ComputeBackend for CommandBackend {
    #[instrument(skip(self, request), fields(backend = %self.id, execution = %request.execution_name))]
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), BackendError> {
        let launch = LaunchRequest::new(request, &self.server_url);

        let mut command = tokio::process::Command::new(&self.config.program);
        command.kill_on_drop(true);
        command.args(&self.config.args);
        command.envs(&self.config.env);
        command.envs(launch.env());
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        debug!(program = %self.config.program, "Starting worker process");
        let output = match timeout(self.config.timeout(), command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                // The program cannot be started; another attempt will not help.
                return Err(self.failed(
                    format!("cannot run '{}': {err}", self.config.program),
                    false,
                ));
            }
            Err(_) => {
                warn!(timeout_secs = self.config.timeout_secs, "Worker process timed out");
                return Err(BackendError::TimedOut {
                    backend: self.id.clone(),
                    after: self.config.timeout(),
                });
            }
        };

        if output.status.success() {
            info!("Worker process finished");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt = tail(stderr.trim_end(), MAX_STDERR_EXCERPT);
        let status = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        warn!(status = %status, stderr = %excerpt, "Worker process failed");
        Err(self.failed(format!("exited with status {status}: {excerpt}"), true))
    }
}

/// Returns at most the last `max` bytes of `text`, on a character boundary.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
