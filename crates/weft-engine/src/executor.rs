use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use weft_core::config::{EngineConfig, ErrorPolicy};
use weft_core::context::ExecutionContext;
use weft_core::error::Result;

use crate::command::{substitute, CommandSpec};
use crate::graph::Workflow;
use crate::node::WorkflowNode;

/// A name-addressable command host consulted before external execution.
///
/// `None` means the host does not know the command and the engine should
/// fall back to spawning it as an external process. The context is passed
/// by mutable reference so a host may mutate it (or replace it with a
/// runner's snapshot).
pub trait ExtensionHost: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        name: &'a str,
        args: &'a [String],
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Option<Result<Value>>>;
}

/// A chain of hosts tried in order; the first one that knows the command
/// wins.
#[derive(Default)]
pub struct CompositeHost {
    hosts: Vec<Arc<dyn ExtensionHost>>,
}

impl CompositeHost {
    pub fn new(hosts: Vec<Arc<dyn ExtensionHost>>) -> Self {
        Self { hosts }
    }
}

impl ExtensionHost for CompositeHost {
    fn call<'a>(
        &'a self,
        name: &'a str,
        args: &'a [String],
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Option<Result<Value>>> {
        Box::pin(async move {
            for host in &self.hosts {
                if let Some(result) = host.call(name, args, &mut *ctx).await {
                    return Some(result);
                }
            }
            None
        })
    }
}

/// What one command invocation produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandResult {
    /// The rendered command line, command name first.
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure message, or captured stderr for external commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// True when an extension served the command instead of a process.
    pub extension: bool,
}

impl CommandResult {
    /// A failure is a command that never started, a failed extension call,
    /// or a nonzero exit. Stderr noise from a zero-exit command is not a
    /// failure.
    pub fn failed(&self) -> bool {
        match self.exit_code {
            Some(code) => code != 0,
            None => self.error.is_some(),
        }
    }
}

/// Per-node execution record.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    pub node: String,
    pub func: String,
    pub raw_output: String,
    pub result: CommandResult,
}

/// Report of one workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub records: Vec<NodeRecord>,
    pub context: ExecutionContext,
    /// Set when the error policy halted the run early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Interprets workflow graphs node by node.
pub struct WorkflowEngine {
    extensions: Arc<dyn ExtensionHost>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(extensions: Arc<dyn ExtensionHost>, config: EngineConfig) -> Self {
        Self { extensions, config }
    }

    /// Walk the graph from `start_id`, threading the context through every
    /// node, until the current id is absent or a terminal node is reached.
    pub async fn run(
        &self,
        workflow: &Workflow,
        start_id: &str,
        ctx: &mut ExecutionContext,
    ) -> RunReport {
        let mut records = Vec::new();
        let mut error = None;
        let mut visits: HashMap<String, usize> = HashMap::new();
        let mut current = Some(start_id.to_string());

        while let Some(id) = current.take() {
            let Some(node) = workflow.node(&id) else {
                debug!(node = %id, "Node not in graph, run complete");
                break;
            };

            let count = visits.entry(id.clone()).or_insert(0);
            *count += 1;
            if *count > self.config.max_node_visits {
                warn!(node = %id, visits = *count, "Node visit limit reached, terminating run");
                break;
            }

            info!(node = %node.id, func = %node.func, "Executing workflow node");
            let record = self.run_node(node, ctx).await;
            let failed = record.result.failed();
            let output = record.raw_output.clone();
            records.push(record);

            if failed && self.config.on_command_error == ErrorPolicy::Halt {
                let message = format!(
                    "node {} failed: {}",
                    node.id,
                    records
                        .last()
                        .and_then(|r| r.result.error.as_deref())
                        .unwrap_or("unknown error")
                );
                warn!(node = %node.id, "Halting run on command error");
                error = Some(message);
                break;
            }

            current = next_node_id(node, &output);
        }

        RunReport {
            records,
            context: ctx.clone(),
            error,
        }
    }

    /// Execute a single node: build its command, run it (extension first,
    /// external process otherwise), and record the output into the context
    /// under `<NAME>_OUTPUT`.
    pub async fn run_node(&self, node: &WorkflowNode, ctx: &mut ExecutionContext) -> NodeRecord {
        let result = self.invoke(node, ctx).await;

        let raw_output = match &result.output {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let command_name = result
            .command
            .first()
            .cloned()
            .unwrap_or_else(|| node.func.clone());
        ctx.set_str(output_key(&command_name), &raw_output);
        if command_name != node.func {
            ctx.set_str(output_key(&node.func), &raw_output);
        }

        debug!(node = %node.id, output = %raw_output, "Node output recorded");
        NodeRecord {
            node: node.id.clone(),
            func: node.func.clone(),
            raw_output,
            result,
        }
    }

    async fn invoke(&self, node: &WorkflowNode, ctx: &mut ExecutionContext) -> CommandResult {
        let (name, argv) = match build_command(node, ctx) {
            Ok(parts) => parts,
            Err(e) => {
                return CommandResult {
                    command: vec![node.func.clone()],
                    error: Some(e.to_string()),
                    ..CommandResult::default()
                }
            }
        };

        let mut command = Vec::with_capacity(argv.len() + 1);
        command.push(name.clone());
        command.extend(argv.iter().cloned());

        // Extensions are consulted first; unknown names fall through to a
        // real process invocation.
        if let Some(result) = self.extensions.call(&name, &argv, ctx).await {
            return match result {
                Ok(value) => CommandResult {
                    command,
                    output: Some(value),
                    extension: true,
                    ..CommandResult::default()
                },
                Err(e) => CommandResult {
                    command,
                    error: Some(e.to_string()),
                    extension: true,
                    ..CommandResult::default()
                },
            };
        }

        match tokio::process::Command::new(&name)
            .args(&argv)
            .output()
            .await
        {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let exit_code = output.status.code();
                let error = if stderr.is_empty() {
                    if output.status.success() {
                        None
                    } else {
                        Some(format!("exit code {}", exit_code.unwrap_or(-1)))
                    }
                } else {
                    Some(stderr)
                };
                CommandResult {
                    command,
                    output: Some(Value::String(stdout)),
                    error,
                    exit_code,
                    extension: false,
                }
            }
            Err(e) => {
                debug!(command = %name, error = %e, "Failed to start command");
                CommandResult {
                    command,
                    error: Some(e.to_string()),
                    ..CommandResult::default()
                }
            }
        }
    }
}

/// Resolve a node into `(command name, argv)`.
///
/// Nodes carrying an `info` spec use it; bare nodes run `func` directly
/// with their positional `args`.
fn build_command(node: &WorkflowNode, ctx: &ExecutionContext) -> Result<(String, Vec<String>)> {
    if let Some(info) = node.info.as_deref().filter(|s| !s.trim().is_empty()) {
        let spec = CommandSpec::parse(info)?;
        let argv = spec.render(ctx)?;
        Ok((spec.name, argv))
    } else {
        let argv = node
            .args
            .iter()
            .map(|value| {
                let raw = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                substitute(&raw, ctx)
            })
            .collect();
        Ok((node.func.clone(), argv))
    }
}

fn output_key(name: &str) -> String {
    format!("{}_OUTPUT", name.to_uppercase())
}

/// Select the successor node id.
///
/// multiIf nodes match the output string against their branch table,
/// falling back to the "0" entry; linear nodes follow `next`.
fn next_node_id(node: &WorkflowNode, output: &str) -> Option<String> {
    if node.is_multi_if() {
        if let Some(map) = &node.next_map {
            return map.get(output).or_else(|| map.get("0")).cloned();
        }
    }
    node.next.clone()
}
