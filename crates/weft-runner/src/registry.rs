use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::context::ExecutionContext;
use weft_core::error::Result;

/// A callable hosted by a runner.
///
/// Takes `(args, context)` and returns the result value together with the
/// possibly-mutated context. The context travels by value across the call
/// so the snapshot the caller receives back is complete.
pub trait RunnerFunction: Send + Sync + 'static {
    fn invoke(
        &self,
        args: Vec<Value>,
        ctx: ExecutionContext,
    ) -> BoxFuture<'static, Result<(Value, ExecutionContext)>>;
}

impl<F> RunnerFunction for F
where
    F: Fn(Vec<Value>, ExecutionContext) -> Result<(Value, ExecutionContext)>
        + Send
        + Sync
        + 'static,
{
    fn invoke(
        &self,
        args: Vec<Value>,
        ctx: ExecutionContext,
    ) -> BoxFuture<'static, Result<(Value, ExecutionContext)>> {
        let out = self(args, ctx);
        Box::pin(async move { out })
    }
}

/// Registry of invocable functions.
///
/// Populated once at startup and read-only afterward; passed by `Arc` into
/// every connection handler rather than living in ambient state.
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn RunnerFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Register a function under a name.
    pub fn register(&mut self, name: impl Into<String>, function: impl RunnerFunction) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Get a function by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn RunnerFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// List all registered function names.
    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Create a registry with the native extension set registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::extension::load_extensions(&mut registry, &crate::builtin::native_extensions());
        registry
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
