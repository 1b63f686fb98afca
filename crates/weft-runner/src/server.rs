use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use weft_core::error::{Result, WeftError};
use weft_proto::{AuthResponse, CallOutcome, CallRequest, Frame, FN_NOT_EXIST};

use crate::registry::FunctionRegistry;

/// Authenticated TCP server hosting one runner's function registry.
///
/// Each connection advances an independent state machine
/// (unauthenticated → authenticated → closed); the registry is the only
/// shared state and is read-only after startup.
pub struct RunnerServer {
    name: String,
    bind: String,
    api_key: String,
    registry: Arc<FunctionRegistry>,
}

impl RunnerServer {
    pub fn new(
        name: impl Into<String>,
        bind: impl Into<String>,
        api_key: impl Into<String>,
        registry: Arc<FunctionRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            bind: bind.into(),
            api_key: api_key.into(),
            registry,
        }
    }

    /// Bind and serve until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!(runner = %self.name, bind = %self.bind, functions = self.registry.len(), "Runner listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(runner = %self.name, error = %e, "Accept failed");
                            continue;
                        }
                    };
                    debug!(runner = %self.name, peer = %peer, "Connection accepted");
                    let api_key = self.api_key.clone();
                    let registry = self.registry.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, api_key, registry).await {
                            debug!(error = %e, "Connection error");
                        }
                    });
                }
            }
        }

        info!(runner = %self.name, "Runner shut down");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    api_key: String,
    registry: Arc<FunctionRegistry>,
) -> Result<()> {
    let mut framed = Framed::new(stream, LinesCodec::new());
    let mut authenticated = false;

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
                // Malformed frames are dropped; the connection survives.
                debug!(error = %e, "Dropping malformed frame");
                continue;
            }
        };

        match frame {
            Frame::Credentials(auth) => {
                if auth.api_key == api_key {
                    authenticated = true;
                    send_response(&mut framed, &serde_json::to_value(AuthResponse::ok())?).await?;
                } else {
                    warn!("Rejected connection with invalid apiKey");
                    let reply = serde_json::to_value(AuthResponse::err("Invalid apiKey"))?;
                    let _ = send_response(&mut framed, &reply).await;
                    break;
                }
            }
            _ if !authenticated => {
                let reply = serde_json::to_value(AuthResponse::err("Not authenticated"))?;
                let _ = send_response(&mut framed, &reply).await;
                break;
            }
            Frame::Call(call) => {
                let reply = invoke(&registry, call).await;
                send_response(&mut framed, &reply).await?;
            }
            Frame::Workflow(_) => {
                // Workflow requests belong on the gateway, not a runner.
                let reply = json!({"error": "workflow requests are not served by runners"});
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

/// Look up and invoke one function, rendering the reply value.
///
/// Lookup misses and invocation failures are per-call outcomes; neither
/// closes the connection.
async fn invoke(registry: &FunctionRegistry, call: CallRequest) -> Value {
    let CallRequest { function_name, args, context } = call;

    let Some(function) = registry.get(&function_name) else {
        debug!(function = %function_name, "Function not in registry");
        return CallOutcome::FnError(FN_NOT_EXIST.into()).to_value();
    };

    match function.invoke(args, context).await {
        Ok((result, context)) => CallOutcome::Ok { result, context }.to_value(),
        Err(e) => {
            warn!(function = %function_name, error = %e, "Function invocation failed");
            CallOutcome::Error(e.to_string()).to_value()
        }
    }
}

async fn send_response(framed: &mut Framed<TcpStream, LinesCodec>, value: &Value) -> Result<()> {
    let line = Frame::Response(value.clone()).encode()?;
    framed
        .send(line)
        .await
        .map_err(|e| WeftError::Connection(e.to_string()))
}
