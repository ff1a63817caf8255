use crate::{NodeId, NodeState, ScopeObjectKind};
use thiserror::Error;

/// Top-level error type; chains causes so a failure deep in a workflow
/// reports with full context.
#[derive(Error, Debug)]
pub enum RillError {
    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("scope error: {0}")]
    Scope(#[from] ScopeError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("execution of node {node} failed")]
    NodeFailed {
        node: NodeId,
        #[source]
        source: NodeError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by node implementations.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("loop contract violation: {0}")]
    LoopContract(String),

    #[error("canceled")]
    Canceled,
}

/// Structural errors in a workflow definition.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("invalid workflow: {0}")]
    Invalid(String),

    #[error("cyclic dependency detected")]
    CyclicDependency,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("invalid connection: {0}")]
    InvalidConnection(String),
}

/// Scope stack misuse and structural loop-scope conflicts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScopeError {
    #[error("expected {expected:?} on top of the scope stack, found {found:?}")]
    TypeMismatch {
        expected: ScopeObjectKind,
        found: ScopeObjectKind,
    },

    #[error("scope stack exhausted while popping {expected:?}")]
    Empty { expected: ScopeObjectKind },

    #[error("incompatible loop scopes: {0}")]
    IncompatibleScope(String),

    #[error("no loop context on the scope stack of node {0}")]
    NoLoopContext(NodeId),
}

/// Illegal node lifecycle transition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("illegal node state transition {from} -> {to}")]
    IllegalTransition { from: NodeState, to: NodeState },
}
