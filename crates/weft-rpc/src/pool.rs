use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use weft_core::config::{RetryConfig, RunnerConfig};
use weft_core::context::ExecutionContext;
use weft_core::error::{Result, WeftError};
use weft_proto::CallOutcome;

use crate::client::RunnerClient;

/// Supervises runner child processes and fans function calls out across
/// runner connections in declared order.
pub struct RunnerPool {
    runners: Vec<RunnerHandle>,
}

struct RunnerHandle {
    config: RunnerConfig,
    // One in-flight call per connection: the mutex serializes callers.
    client: Mutex<RunnerClient>,
}

impl RunnerPool {
    pub fn new(configs: &[RunnerConfig], api_key: &str, retry: &RetryConfig) -> Self {
        let runners = configs
            .iter()
            .map(|config| RunnerHandle {
                client: Mutex::new(RunnerClient::new(
                    &config.name,
                    config.addr(),
                    api_key,
                    retry.clone(),
                )),
                config: config.clone(),
            })
            .collect();
        Self { runners }
    }

    /// Names in dispatch order.
    pub fn runner_names(&self) -> Vec<&str> {
        self.runners.iter().map(|h| h.config.name.as_str()).collect()
    }

    /// Spawn a supervisor task for every runner that declares a command.
    pub fn supervise(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.runners
            .iter()
            .filter(|h| !h.config.command.is_empty())
            .map(|h| {
                let config = h.config.clone();
                let token = shutdown.clone();
                tokio::spawn(supervise_runner(config, token))
            })
            .collect()
    }

    /// Fan a function call out across the runners until one answers.
    ///
    /// "not exist" means try the next runner; so does a transport failure.
    /// The first runner producing any other outcome wins and no runner
    /// after it is contacted. If every runner declines or errors, a
    /// synthesized not-found outcome is returned.
    pub async fn dispatch(
        &self,
        function_name: &str,
        args: Vec<Value>,
        context: &ExecutionContext,
    ) -> Result<CallOutcome> {
        for handle in &self.runners {
            let mut client = handle.client.lock().await;
            match client.call(function_name, args.clone(), context).await {
                Ok(CallOutcome::FnError(_)) => {
                    debug!(
                        runner = %handle.config.name,
                        function = %function_name,
                        "Function not hosted, trying next runner"
                    );
                }
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(
                        runner = %handle.config.name,
                        function = %function_name,
                        error = %e,
                        "Runner unreachable, trying next"
                    );
                }
            }
        }

        Ok(CallOutcome::FnError(format!(
            "Function \"{}\" not found on any runner",
            function_name
        )))
    }

    /// Close every runner connection.
    pub async fn close_all(&self) {
        for handle in &self.runners {
            handle.client.lock().await.close().await;
        }
    }
}

/// Supervision state for one runner child process.
enum ChildState {
    Running(tokio::process::Child),
    Restarting,
}

/// Keep one runner child alive until cancelled: spawn, wait for exit,
/// respawn after the configured fixed delay. Restarts are unconditional:
/// no backoff, no crash-loop detection.
async fn supervise_runner(config: RunnerConfig, shutdown: CancellationToken) {
    let delay = Duration::from_millis(config.restart_delay_ms);
    let mut state = ChildState::Restarting;

    loop {
        state = match state {
            ChildState::Restarting => {
                if shutdown.is_cancelled() {
                    break;
                }
                match spawn_child(&config) {
                    Ok(child) => {
                        info!(runner = %config.name, "Runner process started");
                        ChildState::Running(child)
                    }
                    Err(e) => {
                        error!(runner = %config.name, error = %e, "Failed to start runner process");
                        if !sleep_or_cancel(&shutdown, delay).await {
                            break;
                        }
                        ChildState::Restarting
                    }
                }
            }
            ChildState::Running(mut child) => {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        break;
                    }
                    status = child.wait() => {
                        match status {
                            Ok(status) => warn!(runner = %config.name, %status, "Runner process exited, restarting"),
                            Err(e) => warn!(runner = %config.name, error = %e, "Runner process wait failed, restarting"),
                        }
                        if !sleep_or_cancel(&shutdown, delay).await {
                            break;
                        }
                        ChildState::Restarting
                    }
                }
            }
        };
    }

    info!(runner = %config.name, "Runner supervisor stopped");
}

fn spawn_child(config: &RunnerConfig) -> Result<tokio::process::Child> {
    let mut parts = config.command.iter();
    let program = parts.next().ok_or_else(|| {
        WeftError::Config(format!("runner {} has an empty command", config.name))
    })?;
    let mut command = tokio::process::Command::new(program);
    command.args(parts);
    command.kill_on_drop(true);
    Ok(command.spawn()?)
}

/// Returns false if cancelled before the delay elapsed.
async fn sleep_or_cancel(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
