mod command;
mod executor;
mod graph;
mod node;

pub use command::{substitute, CommandSpec};
pub use executor::{
    CommandResult, CompositeHost, ExtensionHost, NodeRecord, RunReport, WorkflowEngine,
};
pub use graph::Workflow;
pub use node::{Edge, Position, WorkflowNode, MULTI_IF};
