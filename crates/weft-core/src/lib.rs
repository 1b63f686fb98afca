pub mod config;
pub mod context;
pub mod error;

pub use config::AppConfig;
pub use context::ExecutionContext;
pub use error::{Result, WeftError};
