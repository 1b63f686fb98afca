use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use weft_core::config::{AuthConfig, Principal};
use weft_core::context::ExecutionContext;
use weft_core::error::{Result, WeftError};
use weft_engine::WorkflowEngine;
use weft_proto::{AuthResponse, Frame};

use crate::routes::RouteTable;

/// Inbound TCP server: authenticates callers, resolves their tenant's
/// routes, and runs workflows.
pub struct GatewayServer {
    bind: String,
    auth: AuthConfig,
    table: Arc<RouteTable>,
    engine: Arc<WorkflowEngine>,
}

impl GatewayServer {
    pub fn new(
        bind: impl Into<String>,
        auth: AuthConfig,
        table: Arc<RouteTable>,
        engine: Arc<WorkflowEngine>,
    ) -> Self {
        Self {
            bind: bind.into(),
            auth,
            table,
            engine,
        }
    }

    /// Bind and serve until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!(bind = %self.bind, "Gateway listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "Connection accepted");
                    let auth = self.auth.clone();
                    let table = self.table.clone();
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, auth, table, engine).await {
                            debug!(error = %e, "Connection error");
                        }
                    });
                }
            }
        }

        info!("Gateway shut down");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    auth: AuthConfig,
    table: Arc<RouteTable>,
    engine: Arc<WorkflowEngine>,
) -> Result<()> {
    let mut framed = Framed::new(stream, LinesCodec::new());
    let mut principal: Option<Principal> = None;

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "Read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame = match Frame::decode(&line) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Dropping malformed frame");
                continue;
            }
        };

        match frame {
            Frame::Credentials(request) => match auth.resolve(&request.api_key) {
                Some(resolved) => {
                    debug!(tenant = %resolved.tenant(), "Caller authenticated");
                    principal = Some(resolved);
                    send_response(&mut framed, &serde_json::to_value(AuthResponse::ok())?).await?;
                }
                None => {
                    warn!("Rejected connection with invalid apiKey");
                    let reply = serde_json::to_value(AuthResponse::err("Invalid apiKey"))?;
                    let _ = send_response(&mut framed, &reply).await;
                    break;
                }
            },
            _ if principal.is_none() => {
                let reply = serde_json::to_value(AuthResponse::err("Not authenticated"))?;
                let _ = send_response(&mut framed, &reply).await;
                break;
            }
            Frame::Workflow(payload) => {
                let tenant = principal
                    .as_ref()
                    .map(Principal::tenant)
                    .unwrap_or("default")
                    .to_string();
                let reply = handle_workflow_request(&table, &engine, &tenant, payload).await;
                send_response(&mut framed, &reply).await?;
            }
            Frame::Call(_) => {
                // Function calls belong on a runner, not the gateway.
                let reply = json!({"error": "function calls are not served by the gateway"});
                send_response(&mut framed, &reply).await?;
            }
            Frame::Response(_) => {
                debug!("Ignoring unexpected response frame");
            }
        }
    }

    debug!("Connection closed");
    Ok(())
}

/// Resolve the route, run its workflow on a fresh context built from the
/// request payload, and render the response envelope.
///
/// Workflow-internal failures surface as a JSON error object on this
/// response; they never take the gateway down.
async fn handle_workflow_request(
    table: &RouteTable,
    engine: &WorkflowEngine,
    tenant: &str,
    payload: Value,
) -> Value {
    let Some(data) = payload.as_object() else {
        return json!({"error": "workflow request must be an object"});
    };
    let Some(path) = data.get("path").and_then(Value::as_str).map(String::from) else {
        return json!({"error": "workflow request is missing a path"});
    };

    let Some(entry) = table.resolve(tenant, &path) else {
        warn!(route = %path, tenant = %tenant, "Route not found");
        return json!({"error": format!("Route not found: {}", path)});
    };

    let mut data = data.clone();
    data.shift_remove("path");
    let mut ctx = ExecutionContext::from_map(data);

    let start = Instant::now();
    let report = engine.run(&entry.workflow, &entry.entry_node, &mut ctx).await;
    let elapsed = start.elapsed().as_secs_f64();

    info!(
        route = %path,
        tenant = %tenant,
        nodes = report.records.len(),
        elapsed_secs = elapsed,
        "Workflow completed"
    );

    let status = if report.error.is_none() { "ok" } else { "error" };
    let mut reply = json!({
        "route": path,
        "tenant": tenant,
        "status": status,
        "execution_time_seconds": elapsed,
        "execution": report.records,
        "context": report.context,
    });
    if let Some(message) = report.error {
        reply["error"] = Value::String(message);
    }
    reply
}

async fn send_response(framed: &mut Framed<TcpStream, LinesCodec>, value: &Value) -> Result<()> {
    let line = Frame::Response(value.clone()).encode()?;
    framed
        .send(line)
        .await
        .map_err(|e| WeftError::Connection(e.to_string()))
}
