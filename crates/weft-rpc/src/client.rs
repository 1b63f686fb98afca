use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use weft_core::config::RetryConfig;
use weft_core::context::ExecutionContext;
use weft_core::error::{Result, WeftError};
use weft_proto::{AuthRequest, AuthResponse, CallOutcome, CallRequest, Frame};

type Transport = Framed<TcpStream, LinesCodec>;

/// A client for one runner connection.
///
/// The protocol has no correlation IDs: at most one call may be in flight,
/// and the n-th reply answers the n-th request. `call` takes `&mut self`
/// so two in-flight calls on one connection cannot be expressed. After a
/// timeout the connection is dropped, so a late reply cannot be mistaken
/// for the next call's answer.
pub struct RunnerClient {
    name: String,
    addr: String,
    api_key: String,
    retry: RetryConfig,
    transport: Option<Transport>,
}

impl RunnerClient {
    pub fn new(
        name: impl Into<String>,
        addr: impl Into<String>,
        api_key: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            api_key: api_key.into(),
            retry,
            transport: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Dial the runner and authenticate.
    pub async fn connect(&mut self) -> Result<()> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            WeftError::Connection(format!("connect to {} failed: {}", self.addr, e))
        })?;
        let mut transport = Framed::new(stream, LinesCodec::new());

        let line = Frame::Credentials(AuthRequest { api_key: self.api_key.clone() }).encode()?;
        transport
            .send(line)
            .await
            .map_err(|e| WeftError::Connection(e.to_string()))?;

        let reply = read_reply(&mut transport, self.retry.call_timeout_ms, &self.name).await?;
        let auth: AuthResponse = serde_json::from_value(reply)
            .map_err(|e| WeftError::Protocol(format!("bad auth reply: {}", e)))?;
        if !auth.is_ok() {
            return Err(WeftError::Auth(
                auth.error.unwrap_or_else(|| "credentials rejected".into()),
            ));
        }

        debug!(runner = %self.name, addr = %self.addr, "Runner connected");
        self.transport = Some(transport);
        Ok(())
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            // Dropping the framed transport closes the socket.
            drop(transport);
            debug!(runner = %self.name, "Runner connection closed");
        }
    }

    /// Call a function, retrying the whole call with exponential backoff.
    ///
    /// Any failure (connect, write, peer close, timeout) consumes one
    /// attempt; after `max_retries` additional attempts the last error is
    /// surfaced inside `RetriesExhausted`.
    pub async fn call(
        &mut self,
        function_name: &str,
        args: Vec<Value>,
        context: &ExecutionContext,
    ) -> Result<CallOutcome> {
        let request = CallRequest {
            function_name: function_name.to_string(),
            args,
            context: context.clone(),
        };

        let mut last_err: Option<WeftError> = None;
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(attempt - 1, &self.retry);
                warn!(
                    runner = %self.name,
                    attempt,
                    max_retries = self.retry.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying runner call"
                );
                tokio::time::sleep(backoff).await;
            }
            match self.call_once(&request).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    debug!(runner = %self.name, error = %e, "Runner call attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(WeftError::RetriesExhausted {
            runner: self.name.clone(),
            attempts: self.retry.max_retries + 1,
            last: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".into()),
        })
    }

    /// One attempt: write the call frame and await its single reply.
    async fn call_once(&mut self, request: &CallRequest) -> Result<CallOutcome> {
        if self.transport.is_none() {
            self.connect().await?;
        }

        let line = Frame::Call(request.clone()).encode()?;
        let timeout_ms = self.retry.call_timeout_ms;
        let result = match self.transport.as_mut() {
            Some(transport) => match transport.send(line).await {
                Ok(()) => read_reply(transport, timeout_ms, &self.name).await,
                Err(e) => Err(WeftError::Connection(e.to_string())),
            },
            None => Err(WeftError::Connection("not connected".into())),
        };

        match result {
            Ok(value) => CallOutcome::from_value(&value),
            Err(e) => {
                // The reply slot is now out of sync; start fresh next time.
                self.transport = None;
                Err(e)
            }
        }
    }
}

async fn read_reply(transport: &mut Transport, timeout_ms: u64, runner: &str) -> Result<Value> {
    let timeout = Duration::from_millis(timeout_ms);
    match tokio::time::timeout(timeout, transport.next()).await {
        Err(_) => Err(WeftError::Timeout { runner: runner.to_string(), timeout_ms }),
        Ok(None) => Err(WeftError::Connection("connection closed by runner".into())),
        Ok(Some(Err(e))) => Err(WeftError::Connection(e.to_string())),
        Ok(Some(Ok(line))) => serde_json::from_str(&line)
            .map_err(|e| WeftError::Protocol(format!("bad reply: {}", e))),
    }
}

/// Delay before the attempt that follows `failures` consecutive failures:
/// `initial * 2^failures`, optionally capped.
fn backoff_delay(failures: u32, retry: &RetryConfig) -> Duration {
    let mut ms = retry
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(failures));
    if let Some(cap) = retry.max_backoff_ms {
        ms = ms.min(cap);
    }
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    use weft_runner::{FunctionRegistry, RunnerServer};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: None,
            call_timeout_ms: 1000,
        }
    }

    async fn start_runner(api_key: &str) -> (std::net::SocketAddr, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = RunnerServer::new(
            "test",
            addr.to_string(),
            api_key,
            Arc::new(FunctionRegistry::with_builtins()),
        );
        let server_token = token.clone();
        tokio::spawn(async move {
            server.serve(listener, server_token).await.unwrap();
        });
        (addr, token)
    }

    #[test]
    fn test_backoff_doubles_per_failure() {
        let retry = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: None,
            ..RetryConfig::default()
        };
        // After n failures the next wait is initial * 2^(n-1).
        assert_eq!(backoff_delay(0, &retry), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, &retry), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, &retry), Duration::from_millis(400));
        assert_eq!(backoff_delay(5, &retry), Duration::from_millis(3200));
    }

    #[test]
    fn test_backoff_respects_external_cap() {
        let retry = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: Some(250),
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay(0, &retry), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, &retry), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, &retry), Duration::from_millis(250));
        assert_eq!(backoff_delay(10, &retry), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let (addr, token) = start_runner("changeme").await;
        let mut client = RunnerClient::new("test", addr.to_string(), "changeme", fast_retry(0));

        let mut ctx = ExecutionContext::new();
        ctx.set_str("caller", "engine");
        let outcome = client
            .call("hello", vec![json!("Weft")], &ctx)
            .await
            .unwrap();
        match outcome {
            CallOutcome::Ok { result, context } => {
                assert_eq!(result, json!("Hello, Weft!"));
                // The runner's snapshot carries both our key and its mutation.
                assert_eq!(context.get_str("caller"), Some("engine"));
                assert_eq!(context.get_str("custom_native_var"), Some("native"));
            }
            other => panic!("expected ok outcome, got {:?}", other),
        }
        token.cancel();
    }

    #[tokio::test]
    async fn test_unknown_function_is_not_a_failure() {
        let (addr, token) = start_runner("changeme").await;
        let mut client = RunnerClient::new("test", addr.to_string(), "changeme", fast_retry(0));

        let outcome = client
            .call("definitely_absent", Vec::new(), &ExecutionContext::new())
            .await
            .unwrap();
        assert!(matches!(outcome, CallOutcome::FnError(_)));
        // The connection survives and serves the next call.
        assert!(client.is_connected());
        let outcome = client
            .call("say_hello", Vec::new(), &ExecutionContext::new())
            .await
            .unwrap();
        assert!(matches!(outcome, CallOutcome::Ok { .. }));
        token.cancel();
    }

    #[tokio::test]
    async fn test_bad_credentials_fail_auth() {
        let (addr, token) = start_runner("s3cret").await;
        let mut client = RunnerClient::new("test", addr.to_string(), "wrong", fast_retry(0));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, WeftError::Auth(_)));
        assert!(!client.is_connected());
        token.cancel();
    }

    #[tokio::test]
    async fn test_retries_exhausted_embeds_last_error() {
        // Bind a port, then drop the listener so connects are refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = RunnerClient::new("gone", addr.to_string(), "changeme", fast_retry(2));
        let err = client
            .call("say_hello", Vec::new(), &ExecutionContext::new())
            .await
            .unwrap_err();
        match err {
            WeftError::RetriesExhausted { runner, attempts, last } => {
                assert_eq!(runner, "gone");
                // One initial attempt plus max_retries additional ones.
                assert_eq!(attempts, 3);
                assert!(last.contains("connect"));
            }
            other => panic!("expected retries exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lazy_reconnect_after_close() {
        let (addr, token) = start_runner("changeme").await;
        let mut client = RunnerClient::new("test", addr.to_string(), "changeme", fast_retry(1));

        client
            .call("say_hello", Vec::new(), &ExecutionContext::new())
            .await
            .unwrap();
        client.close().await;
        client.close().await; // idempotent
        assert!(!client.is_connected());

        // ensure_connected path dials again on the next call.
        let outcome = client
            .call("say_hello", Vec::new(), &ExecutionContext::new())
            .await
            .unwrap();
        assert!(matches!(outcome, CallOutcome::Ok { .. }));
        token.cancel();
    }
}
