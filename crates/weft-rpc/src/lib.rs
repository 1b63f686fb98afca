mod client;
mod pool;

pub use client::RunnerClient;
pub use pool::RunnerPool;
