use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Protocol errors
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // Runner errors
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Command execution failed: {command}: {message}")]
    CommandExecution { command: String, message: String },

    // Transport errors
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Call timed out after {timeout_ms}ms on runner {runner}")]
    Timeout { runner: String, timeout_ms: u64 },

    #[error("Retries exhausted after {attempts} attempts on runner {runner}: {last}")]
    RetriesExhausted {
        runner: String,
        attempts: u32,
        last: String,
    },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Workflow errors
    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, WeftError>;
