mod builtin;
mod extension;
mod registry;
mod server;

pub use extension::{load_extensions, Extension};
pub use registry::{FunctionRegistry, RunnerFunction};
pub use server::RunnerServer;
