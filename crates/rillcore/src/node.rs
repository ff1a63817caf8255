use crate::{events::EventEmitter, NodeError, NodeId, ScopeStack, ScopeValue, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Role a node plays in loop control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Standard,
    /// Opens a loop region; the engine pushes a loop context downstream
    /// and asks this node's `terminate_loop` whether to stop iterating.
    LoopStart,
    /// Closes a loop region; triggers re-execution of the loop body until
    /// the paired start node terminates the loop.
    LoopEnd,
}

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "transform.json_parse", "loop.counted_start")
    fn node_type(&self) -> &str;

    fn kind(&self) -> NodeKind {
        NodeKind::Standard
    }

    /// Validate configuration at workflow load time
    fn validate_config(&self, _config: &HashMap<String, Value>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Loop-start contract: called by the engine on every completion of
    /// the paired loop-end node. Returns `true` when the loop must stop
    /// before another pass; also advances any iteration bookkeeping kept
    /// in the node's persistent data.
    async fn terminate_loop(&self, _ctx: &NodeContext) -> Result<bool, NodeError> {
        Err(NodeError::LoopContract(format!(
            "node type '{}' does not drive a loop",
            self.node_type()
        )))
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    /// Node instance being executed
    pub node_id: NodeId,

    /// Input values read from connected in-ports
    pub inputs: HashMap<String, Value>,

    /// Static configuration for this node
    pub config: HashMap<String, Value>,

    /// Persistent node data; survives across loop iterations
    pub data: Arc<RwLock<NodeData>>,

    /// Snapshot of the scope stack flowing into this node
    pub scope: ScopeStack,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cooperative cancellation flag; long-running nodes poll this at
    /// safe points
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl NodeContext {
    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    /// Fail with `Canceled` if cancellation has been requested.
    pub fn check_canceled(&self) -> Result<(), NodeError> {
        if self.cancellation.is_cancelled() {
            Err(NodeError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Persistent per-node data; kept by the engine across loop iterations
/// and cleared only on a full reset.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub data: HashMap<String, Value>,
}

/// Output from node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output port values
    pub outputs: HashMap<String, Value>,

    /// Scope variables this node wants pushed onto its outgoing stack
    pub variables: Vec<(String, ScopeValue)>,

    /// Execution metadata
    pub metadata: ExecMetadata,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            variables: Vec::new(),
            metadata: ExecMetadata::default(),
        }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: ScopeValue) -> Self {
        self.variables.push((name.into(), value));
        self
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata about one execution attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecMetadata {
    pub execution_time_ms: u64,
    pub custom: HashMap<String, Value>,
}
