use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use weft_core::context::ExecutionContext;
use weft_core::error::{Result, WeftError};

/// Marker carried in a reply when the called function is unknown to a runner.
pub const FN_NOT_EXIST: &str = "not exist";

/// Credentials presented once per connection, before any request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

/// A function-call request addressed to one runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    #[serde(rename = "functionName")]
    pub function_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub context: ExecutionContext,
}

/// Reply to an auth frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthResponse {
    pub fn ok() -> Self {
        Self { status: "OK".to_string(), error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            status: "ERR".to_string(),
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

/// One protocol frame: a one-character kind tag followed by a JSON value,
/// terminated by a newline.
///
/// Responses carry no tag; they are bare JSON. Correlation is purely by
/// order: at most one request may be in flight per connection, so the n-th
/// reply answers the n-th request.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `c`: authenticate.
    Credentials(AuthRequest),
    /// `q`: workflow request (gateway only), payload `{path, ...data}`.
    Workflow(Value),
    /// `r`: function-call request.
    Call(CallRequest),
    /// Bare JSON: response or ack.
    Response(Value),
}

impl Frame {
    /// Encode this frame as a single line (without the trailing newline;
    /// the codec layer appends it, so a frame is never split across writes).
    pub fn encode(&self) -> Result<String> {
        let line = match self {
            Frame::Credentials(auth) => format!("c{}", serde_json::to_string(auth)?),
            Frame::Workflow(payload) => format!("q{}", serde_json::to_string(payload)?),
            Frame::Call(call) => format!("r{}", serde_json::to_string(call)?),
            Frame::Response(value) => serde_json::to_string(value)?,
        };
        Ok(line)
    }

    /// Decode one received line.
    pub fn decode(line: &str) -> Result<Frame> {
        let line = line.trim();
        if line.is_empty() {
            return Err(WeftError::Protocol("empty frame".into()));
        }
        match line.as_bytes()[0] {
            b'c' => serde_json::from_str(&line[1..])
                .map(Frame::Credentials)
                .map_err(|e| WeftError::Protocol(format!("bad credentials frame: {}", e))),
            b'q' => serde_json::from_str(&line[1..])
                .map(Frame::Workflow)
                .map_err(|e| WeftError::Protocol(format!("bad workflow frame: {}", e))),
            b'r' => serde_json::from_str(&line[1..])
                .map(Frame::Call)
                .map_err(|e| WeftError::Protocol(format!("bad call frame: {}", e))),
            _ => serde_json::from_str(line)
                .map(Frame::Response)
                .map_err(|e| WeftError::Protocol(format!("bad response frame: {}", e))),
        }
    }
}

/// A classified runner reply to a function call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// `{r, c}`: the result plus the runner's context snapshot.
    Ok {
        result: Value,
        context: ExecutionContext,
    },
    /// `{fnError}`: the function is unknown to that runner.
    FnError(String),
    /// `{error}`: the invocation itself failed.
    Error(String),
}

impl CallOutcome {
    /// Classify a bare-JSON reply value.
    pub fn from_value(value: &Value) -> Result<CallOutcome> {
        if let Some(msg) = value.get("fnError").and_then(Value::as_str) {
            return Ok(CallOutcome::FnError(msg.to_string()));
        }
        if let Some(msg) = value.get("error").and_then(Value::as_str) {
            return Ok(CallOutcome::Error(msg.to_string()));
        }
        if value.get("r").is_some() || value.get("c").is_some() {
            let context = match value.get("c") {
                Some(c) => serde_json::from_value(c.clone())
                    .map_err(|e| WeftError::Protocol(format!("bad context snapshot: {}", e)))?,
                None => ExecutionContext::new(),
            };
            return Ok(CallOutcome::Ok {
                result: value.get("r").cloned().unwrap_or(Value::Null),
                context,
            });
        }
        Err(WeftError::Protocol(format!(
            "unrecognized call reply: {}",
            value
        )))
    }

    /// Render the reply value a runner sends for this outcome.
    pub fn to_value(&self) -> Value {
        match self {
            CallOutcome::Ok { result, context } => json!({ "r": result, "c": context }),
            CallOutcome::FnError(msg) => json!({ "fnError": msg }),
            CallOutcome::Error(msg) => json!({ "error": msg }),
        }
    }
}
