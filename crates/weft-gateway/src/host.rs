use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use weft_core::context::ExecutionContext;
use weft_core::error::{Result, WeftError};
use weft_engine::ExtensionHost;
use weft_proto::CallOutcome;
use weft_rpc::RunnerPool;
use weft_runner::FunctionRegistry;

/// Serves workflow commands from an in-process function registry.
pub struct RegistryHost {
    registry: Arc<FunctionRegistry>,
}

impl RegistryHost {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }
}

impl ExtensionHost for RegistryHost {
    fn call<'a>(
        &'a self,
        name: &'a str,
        args: &'a [String],
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Option<Result<Value>>> {
        Box::pin(async move {
            let function = self.registry.get(name)?;
            let args: Vec<Value> = args.iter().map(|a| Value::String(a.clone())).collect();
            match function.invoke(args, ctx.clone()).await {
                Ok((result, snapshot)) => {
                    ctx.replace(snapshot);
                    Some(Ok(result))
                }
                Err(e) => Some(Err(e)),
            }
        })
    }
}

/// Serves workflow commands by fanning them out across the runner pool.
///
/// A function no runner hosts is reported as "unknown command" (`None`)
/// so the engine falls back to external process execution.
pub struct RunnerHost {
    pool: Arc<RunnerPool>,
}

impl RunnerHost {
    pub fn new(pool: Arc<RunnerPool>) -> Self {
        Self { pool }
    }
}

impl ExtensionHost for RunnerHost {
    fn call<'a>(
        &'a self,
        name: &'a str,
        args: &'a [String],
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Option<Result<Value>>> {
        Box::pin(async move {
            let args: Vec<Value> = args.iter().map(|a| Value::String(a.clone())).collect();
            match self.pool.dispatch(name, args, ctx).await {
                Ok(CallOutcome::Ok { result, context }) => {
                    ctx.replace(context);
                    Some(Ok(result))
                }
                Ok(CallOutcome::FnError(_)) => {
                    debug!(function = %name, "No runner hosts this function");
                    None
                }
                Ok(CallOutcome::Error(message)) => Some(Err(WeftError::CommandExecution {
                    command: name.to_string(),
                    message,
                })),
                Err(e) => Some(Err(e)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_registry_host_replaces_context() {
        let host = RegistryHost::new(Arc::new(FunctionRegistry::with_builtins()));

        let mut ctx = ExecutionContext::new();
        ctx.set_str("kept", "yes");
        let args = vec!["Weft".to_string()];
        let result = host.call("hello", &args, &mut ctx).await.unwrap().unwrap();

        assert_eq!(result, json!("Hello, Weft!"));
        // The function's snapshot carries both prior keys and its mutation.
        assert_eq!(ctx.get_str("kept"), Some("yes"));
        assert_eq!(ctx.get_str("custom_native_var"), Some("native"));
    }

    #[tokio::test]
    async fn test_registry_host_unknown_name_falls_through() {
        let host = RegistryHost::new(Arc::new(FunctionRegistry::with_builtins()));
        let mut ctx = ExecutionContext::new();
        assert!(host.call("not_registered", &[], &mut ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_registry_host_surfaces_invocation_errors() {
        let host = RegistryHost::new(Arc::new(FunctionRegistry::with_builtins()));
        let mut ctx = ExecutionContext::new();
        let args = vec!["two".to_string()];
        let result = host.call("add", &args, &mut ctx).await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_runner_host_empty_pool_falls_through() {
        let pool = Arc::new(RunnerPool::new(
            &[],
            "changeme",
            &weft_core::config::RetryConfig::default(),
        ));
        let host = RunnerHost::new(pool);
        let mut ctx = ExecutionContext::new();
        // An empty pool synthesizes not-found, which maps to fall-through.
        assert!(host.call("anything", &[], &mut ctx).await.is_none());
    }
}
