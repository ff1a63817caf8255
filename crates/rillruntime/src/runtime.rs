use crate::{engine::ExecutionEngine, pool::JobExecutor, registry::NodeRegistry};
use chrono::Utc;
use rillcore::{
    EventBus, ExecutionEvent, ExecutionId, NodeId, NodeState, RillError, Value, Workflow,
    WorkflowError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Main runtime for executing workflows
pub struct RillRuntime {
    registry: Arc<NodeRegistry>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
    workflows: Arc<RwLock<HashMap<uuid::Uuid, Workflow>>>,
}

impl RillRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        Self::with_registry(registry, config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            registry,
            event_bus,
            config,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get access to the node registry for registering node types
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Register a workflow
    pub async fn register_workflow(&self, workflow: Workflow) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id, workflow);
    }

    /// Execute a registered workflow by ID
    pub async fn execute_workflow(
        &self,
        workflow_id: uuid::Uuid,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, RillError> {
        let workflows = self.workflows.read().await;
        let workflow = workflows.get(&workflow_id).ok_or_else(|| {
            RillError::Workflow(WorkflowError::NotFound(workflow_id.to_string()))
        })?;
        self.execute(workflow, inputs).await
    }

    /// Execute a workflow directly (without registration)
    ///
    /// Drives dispatch and completion handling until the engine is
    /// quiescent: every runnable node has executed, or the remaining
    /// nodes are blocked on failed or un-executable predecessors.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, RillError> {
        let execution_id = ExecutionId::new_v4();
        let started = Instant::now();

        self.event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_id: workflow.id,
            timestamp: Utc::now(),
        });
        tracing::info!(workflow = %workflow.id, "starting workflow execution");

        let max_workers = workflow.settings.max_workers.min(self.config.max_workers);
        let (pool, mut completions) = JobExecutor::new(max_workers);
        let engine = Arc::new(ExecutionEngine::new(
            workflow,
            &self.registry,
            pool,
            self.event_bus.clone(),
            execution_id,
            inputs,
        )?);

        engine.configure_all().await?;
        engine.mark_all().await?;

        let result = loop {
            engine.dispatch_ready().await?;
            if engine.outstanding().await == 0 {
                break Ok(());
            }
            let Some(completion) = completions.recv().await else {
                break Ok(());
            };
            if let Err(err) = engine.handle_completion(completion).await {
                engine.cancel_all().await;
                break Err(err);
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let success = result.is_ok();
        self.event_bus.emit(ExecutionEvent::WorkflowCompleted {
            execution_id,
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
        result?;

        let states = engine.states().await;
        let completed_nodes = states.values().filter(|s| s.is_executed()).count();
        Ok(ExecutionResult {
            execution_id,
            outputs: engine.outputs().await,
            states,
            completed_nodes,
            total_nodes: workflow.nodes.len(),
        })
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for RillRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on workers regardless of workflow settings
    pub max_workers: usize,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            event_buffer_size: 1000,
        }
    }
}

/// Result of workflow execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub outputs: HashMap<NodeId, HashMap<String, Value>>,
    pub states: HashMap<NodeId, NodeState>,
    pub completed_nodes: usize,
    pub total_nodes: usize,
}
