use serde_json::{json, Value};

use weft_core::context::ExecutionContext;
use weft_core::error::{Result, WeftError};

use crate::extension::Extension;
use crate::registry::FunctionRegistry;

/// The extension set shipped with the native runner.
pub fn native_extensions() -> Vec<Extension> {
    vec![
        Extension { name: "say-hello", register: register_say_hello },
        Extension { name: "add", register: register_add },
        Extension { name: "hello", register: register_hello },
    ]
}

fn register_say_hello(registry: &mut FunctionRegistry) {
    registry.register("say_hello", say_hello);
}

fn register_add(registry: &mut FunctionRegistry) {
    registry.register("add", add);
}

fn register_hello(registry: &mut FunctionRegistry) {
    registry.register("hello", hello);
}

fn say_hello(_args: Vec<Value>, ctx: ExecutionContext) -> Result<(Value, ExecutionContext)> {
    Ok((json!("Hello from the native runner"), ctx))
}

fn add(args: Vec<Value>, ctx: ExecutionContext) -> Result<(Value, ExecutionContext)> {
    let (Some(a), Some(b)) = (
        args.first().and_then(Value::as_f64),
        args.get(1).and_then(Value::as_f64),
    ) else {
        return Err(WeftError::CommandExecution {
            command: "add".into(),
            message: "expects two numeric arguments".into(),
        });
    };
    Ok((json!(a + b), ctx))
}

/// Greets the first argument and leaves a marker attribute in the context.
fn hello(args: Vec<Value>, mut ctx: ExecutionContext) -> Result<(Value, ExecutionContext)> {
    let name = args
        .first()
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("World");
    ctx.set_str("custom_native_var", "native");
    Ok((json!(format!("Hello, {}!", name)), ctx))
}
