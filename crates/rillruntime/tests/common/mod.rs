#![allow(dead_code)]

use async_trait::async_trait;
use rillcore::{
    ContextId, EventBus, Node, NodeContext, NodeError, NodeKind, NodeOutput, RillError,
    ScopeValue, Value, Workflow,
};
use rillruntime::{
    ExecutionEngine, JobCompletion, JobExecutor, NodeFactory, NodeRegistry, NodeTypeInfo,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Duration};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Factory wrapping a closure, so tests can hand shared state to the
/// node instances the engine creates.
pub struct ClosureFactory {
    node_type: String,
    build: Box<dyn Fn() -> Box<dyn Node> + Send + Sync>,
}

impl ClosureFactory {
    pub fn new(
        node_type: impl Into<String>,
        build: impl Fn() -> Box<dyn Node> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_type: node_type.into(),
            build: Box::new(build),
        })
    }
}

impl NodeFactory for ClosureFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok((self.build)())
    }

    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn type_info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "test node".to_string(),
            ..NodeTypeInfo::default()
        }
    }
}

/// Passes all inputs through unchanged; sources emit their `value` config.
pub struct PassNode;

#[async_trait]
impl Node for PassNode {
    fn node_type(&self) -> &str {
        "test.pass"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut output = NodeOutput::new();
        output.outputs = ctx.inputs.clone();
        if let Some(value) = ctx.config.get("value") {
            output.outputs.insert("value".to_string(), value.clone());
        }
        Ok(output)
    }
}

/// Counts executions and verifies that this node never runs twice
/// concurrently.
pub struct CountingNode {
    pub runs: Arc<AtomicUsize>,
    pub live: Arc<AtomicUsize>,
    pub overlapped: Arc<AtomicBool>,
}

impl CountingNode {
    pub fn handles() -> (Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<AtomicBool>) {
        (
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicBool::new(false)),
        )
    }
}

#[async_trait]
impl Node for CountingNode {
    fn node_type(&self) -> &str {
        "test.counting"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        if self.live.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        sleep(Duration::from_millis(5)).await;
        self.live.fetch_sub(1, Ordering::SeqCst);
        let count = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let mut output = NodeOutput::new().with_output("count", count as i64);
        output.outputs.extend(ctx.inputs.clone());
        Ok(output)
    }
}

/// Always fails with an execution error.
pub struct FailNode;

#[async_trait]
impl Node for FailNode {
    fn node_type(&self) -> &str {
        "test.fail"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Err(NodeError::ExecutionFailed("deliberate failure".to_string()))
    }
}

/// Blocks until released or canceled; used to test cooperative
/// cancellation.
pub struct BlockNode {
    pub release: Arc<Notify>,
    pub started: Arc<AtomicBool>,
}

impl BlockNode {
    pub fn handles() -> (Arc<Notify>, Arc<AtomicBool>) {
        (Arc::new(Notify::new()), Arc::new(AtomicBool::new(false)))
    }
}

#[async_trait]
impl Node for BlockNode {
    fn node_type(&self) -> &str {
        "test.block"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.started.store(true, Ordering::SeqCst);
        tokio::select! {
            _ = self.release.notified() => Ok(NodeOutput::new().with_output("done", true)),
            _ = ctx.cancellation.cancelled() => Err(NodeError::Canceled),
        }
    }
}

/// Loop head iterating a fixed number of times, driven by persistent
/// node data.
pub struct TestLoopStart;

#[async_trait]
impl Node for TestLoopStart {
    fn node_type(&self) -> &str {
        "test.loop_start"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::LoopStart
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut data = ctx.data.write().await;
        data.data.insert("iteration".to_string(), Value::Int(0));
        let iterations = ctx.config.get("iterations").and_then(|v| v.as_i64()).unwrap_or(1);
        Ok(NodeOutput::new()
            .with_output("iterations", iterations)
            .with_variable("maxIterations", ScopeValue::Integer(iterations)))
    }

    async fn terminate_loop(&self, ctx: &NodeContext) -> Result<bool, NodeError> {
        let iterations = ctx.config.get("iterations").and_then(|v| v.as_i64()).unwrap_or(1);
        let mut data = ctx.data.write().await;
        let done = data.data.get("iteration").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
        data.data.insert("iteration".to_string(), Value::Int(done));
        Ok(done >= iterations)
    }
}

/// Loop tail counting its own executions.
pub struct TestLoopEnd {
    pub runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for TestLoopEnd {
    fn node_type(&self) -> &str {
        "test.loop_end"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::LoopEnd
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let runs = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(NodeOutput::new().with_output("passes", runs as i64))
    }
}

/// Records the identity of the innermost loop context on every run.
pub struct ScopeProbeNode {
    pub seen: Arc<Mutex<Vec<ContextId>>>,
}

#[async_trait]
impl Node for ScopeProbeNode {
    fn node_type(&self) -> &str {
        "test.scope_probe"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let contexts = ctx.scope.loop_contexts();
        if let Some(innermost) = contexts.last() {
            self.seen.lock().unwrap().push(innermost.id());
        }
        Ok(NodeOutput::new().with_output("depth", contexts.len() as i64))
    }
}

/// Build an engine plus completion receiver for a workflow.
pub fn build_engine(
    workflow: &Workflow,
    registry: &NodeRegistry,
    max_workers: usize,
) -> Result<(Arc<ExecutionEngine>, UnboundedReceiver<JobCompletion>), RillError> {
    let (pool, completions) = JobExecutor::new(max_workers);
    let bus = Arc::new(EventBus::new(256));
    let engine = ExecutionEngine::new(
        workflow,
        registry,
        pool,
        bus,
        rillcore::ExecutionId::new_v4(),
        HashMap::new(),
    )?;
    Ok((Arc::new(engine), completions))
}

/// Drive an engine until it is quiescent.
pub async fn drive(
    engine: &Arc<ExecutionEngine>,
    completions: &mut UnboundedReceiver<JobCompletion>,
) -> Result<(), RillError> {
    loop {
        engine.dispatch_ready().await?;
        if engine.outstanding().await == 0 {
            return Ok(());
        }
        let completion = timeout(Duration::from_secs(5), completions.recv())
            .await
            .expect("timed out waiting for a job completion")
            .expect("completion channel closed");
        engine.handle_completion(completion).await?;
    }
}
