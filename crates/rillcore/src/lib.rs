//! Core abstractions for the rill workflow engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: identifiers, the node state machine, scope
//! stacks, ports, messages and the workflow definition. It contains no
//! execution mechanics.

mod error;
pub mod events;
mod id;
mod message;
mod node;
mod port;
mod scope;
mod state;
mod value;
mod workflow;

pub use error::{NodeError, RillError, ScopeError, StateError, WorkflowError};
pub use events::*;
pub use id::{JobId, NodeId, ParseNodeIdError};
pub use message::{MessageKind, NodeMessage, NodeProgress};
pub use node::{ExecMetadata, Node, NodeContext, NodeData, NodeKind, NodeOutput};
pub use port::{NodeInPort, NodeOutPort, PortDescriptor, PortPayload, SharedOutPort};
pub use scope::{
    ContextId, ScopeLoopContext, ScopeObject, ScopeObjectKind, ScopeStack, ScopeValue,
    ScopeVariable,
};
pub use state::NodeState;
pub use value::Value;
pub use workflow::{
    Bounds, Connection, ErrorHandling, NodeSpec, Workflow, WorkflowId, WorkflowSettings,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, RillError>;
