use crate::graph::WorkflowGraph;
use crate::pool::{Job, JobCompletion, JobExecutor, JobOutcome};
use crate::registry::NodeRegistry;
use chrono::Utc;
use rillcore::{
    ErrorHandling, EventBus, ExecutionEvent, ExecutionId, JobId, Node, NodeContext, NodeData,
    NodeId, NodeKind, NodeMessage, NodeOutPort, NodeOutput, NodeProgress, NodeSpec, NodeState,
    PortPayload, RillError, ScopeLoopContext, ScopeObject, ScopeStack, SharedOutPort, Value,
    Workflow, WorkflowError, WorkflowSettings,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Everything the engine tracks for one node.
struct NodeRuntime {
    spec: NodeSpec,
    instance: Arc<dyn Node>,
    kind: NodeKind,
    state: NodeState,
    message: NodeMessage,
    progress: NodeProgress,
    /// Outstanding job; only a completion carrying this id may transition
    /// the node out of `Executing`.
    job: Option<JobId>,
    /// Persistent node data, preserved across loop iterations.
    data: Arc<RwLock<NodeData>>,
    /// Scope stack snapshot taken at submit time.
    incoming: Option<ScopeStack>,
    /// Stack published to successors after a successful execution.
    outgoing: Option<ScopeStack>,
    /// Loop-start only: the context pushed downstream. The same instance
    /// is reused across iterations and restarts; it is never re-derived.
    loop_context: Option<ScopeLoopContext>,
    out_ports: HashMap<String, SharedOutPort>,
    in_ports: HashMap<String, rillcore::NodeInPort>,
    last_outputs: HashMap<String, Value>,
}

/// Executes one workflow: owns the per-node runtime table, performs all
/// state transitions, builds scope stacks from predecessor stacks and
/// drives loop re-execution.
///
/// The node table is guarded by one coarse mutex; the pool never touches
/// node state, it only moves jobs.
pub struct ExecutionEngine {
    execution_id: ExecutionId,
    workflow_id: uuid::Uuid,
    settings: WorkflowSettings,
    initial_inputs: HashMap<String, Value>,
    pool: Arc<JobExecutor>,
    bus: Arc<EventBus>,
    graph: WorkflowGraph,
    nodes: Mutex<HashMap<NodeId, NodeRuntime>>,
}

impl ExecutionEngine {
    pub fn new(
        workflow: &Workflow,
        registry: &NodeRegistry,
        pool: Arc<JobExecutor>,
        bus: Arc<EventBus>,
        execution_id: ExecutionId,
        initial_inputs: HashMap<String, Value>,
    ) -> Result<Self, RillError> {
        let graph = WorkflowGraph::build(workflow)?;

        let mut nodes: HashMap<NodeId, NodeRuntime> = HashMap::new();
        for spec in &workflow.nodes {
            let instance: Arc<dyn Node> =
                Arc::from(registry.create_node(&spec.node_type, &spec.config)?);
            let kind = instance.kind();
            nodes.insert(
                spec.id.clone(),
                NodeRuntime {
                    spec: spec.clone(),
                    instance,
                    kind,
                    state: NodeState::Idle,
                    message: NodeMessage::NONE,
                    progress: NodeProgress::new(),
                    job: None,
                    data: Arc::new(RwLock::new(NodeData::default())),
                    incoming: None,
                    outgoing: None,
                    loop_context: None,
                    out_ports: HashMap::new(),
                    in_ports: HashMap::new(),
                    last_outputs: HashMap::new(),
                },
            );
        }

        // wire ports: one out-port per referenced (node, from_port), each
        // in-port single-assignment
        for conn in &workflow.connections {
            let from_rt = nodes
                .get_mut(&conn.from_node)
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.from_node.to_string()))?;
            let out_port = from_rt
                .out_ports
                .entry(conn.from_port.clone())
                .or_insert_with(|| {
                    Arc::new(std::sync::Mutex::new(NodeOutPort::new(
                        conn.from_node.clone(),
                        conn.from_port.clone(),
                    )))
                })
                .clone();
            let to_rt = nodes
                .get_mut(&conn.to_node)
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.to_node.to_string()))?;
            to_rt
                .in_ports
                .entry(conn.to_port.clone())
                .or_insert_with(|| rillcore::NodeInPort::new(conn.to_port.clone()))
                .connect(out_port)?;
        }

        Ok(Self {
            execution_id,
            workflow_id: workflow.id,
            settings: workflow.settings.clone(),
            initial_inputs,
            pool,
            bus,
            graph,
            nodes: Mutex::new(nodes),
        })
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Validate every node's settings; `Idle -> Configured` on success.
    pub async fn configure_all(&self) -> Result<(), RillError> {
        let mut nodes = self.nodes.lock().await;
        for rt in nodes.values_mut() {
            if rt.state != NodeState::Idle {
                continue;
            }
            match rt.instance.validate_config(&rt.spec.config) {
                Ok(()) => self.set_state(rt, NodeState::Configured)?,
                Err(err) => {
                    tracing::warn!(node = %rt.spec.id, error = %err, "configuration failed");
                    self.apply_message(rt, NodeMessage::error(err.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Queue every node for execution.
    pub async fn mark_all(&self) -> Result<(), RillError> {
        let mut nodes = self.nodes.lock().await;
        for rt in nodes.values_mut() {
            match rt.state {
                NodeState::Configured => self.set_state(rt, NodeState::MarkedForExec)?,
                NodeState::Idle => {
                    self.set_state(rt, NodeState::UnconfiguredMarkedForExec)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Submit a job for every marked node whose predecessors have all
    /// executed. Returns the number of jobs submitted.
    ///
    /// A node whose predecessor stacks fail to merge is demoted back to
    /// `Configured` with an ERROR message and stays un-executable; this is
    /// a structural workflow error, not a crash.
    pub async fn dispatch_ready(self: &Arc<Self>) -> Result<usize, RillError> {
        let mut nodes = self.nodes.lock().await;
        let candidates: Vec<NodeId> = nodes
            .iter()
            .filter(|(_, rt)| rt.state == NodeState::MarkedForExec && rt.job.is_none())
            .map(|(id, _)| id.clone())
            .collect();

        let mut submitted = 0;
        for id in candidates {
            let preds = self.graph.predecessors(&id);
            let all_executed = preds
                .iter()
                .all(|p| nodes.get(p).is_some_and(|rt| rt.state.is_executed()));
            if !all_executed {
                continue;
            }

            let parent_stacks: Vec<ScopeStack> = preds
                .iter()
                .filter_map(|p| nodes.get(p).and_then(|rt| rt.outgoing.clone()))
                .collect();
            let stack = match parent_stacks.len() {
                0 => Ok(ScopeStack::root(id.clone())),
                1 => Ok(ScopeStack::derived(&parent_stacks[0], id.clone())),
                _ => {
                    let refs: Vec<&ScopeStack> = parent_stacks.iter().collect();
                    ScopeStack::merged(&refs, id.clone())
                }
            };

            let rt = nodes.get_mut(&id).expect("candidate exists");
            let stack = match stack {
                Ok(stack) => stack,
                Err(err) => {
                    self.apply_message(rt, NodeMessage::error(err.to_string()));
                    self.set_state(rt, NodeState::Configured)?;
                    continue;
                }
            };

            let mut inputs = if rt.in_ports.is_empty() {
                self.initial_inputs.clone()
            } else {
                HashMap::new()
            };
            for (name, port) in &rt.in_ports {
                if let Some(payload) = port.object() {
                    inputs.insert(name.clone(), payload.artifact);
                }
            }

            rt.incoming = Some(stack.clone());
            if rt.kind == NodeKind::LoopStart && rt.loop_context.is_none() {
                rt.loop_context = Some(ScopeLoopContext::new(id.clone()));
            }

            let engine = Arc::clone(self);
            let instance = rt.instance.clone();
            let config = rt.spec.config.clone();
            let data = rt.data.clone();
            let emitter = self.bus.create_emitter(self.execution_id, id.clone());
            let node_id = id.clone();
            let job = Job::new(id.clone(), move |job_id, token| {
                Box::pin(async move {
                    engine.note_job_started(&node_id, job_id).await;
                    let ctx = NodeContext {
                        node_id: node_id.clone(),
                        inputs,
                        config,
                        data,
                        scope: stack,
                        events: emitter,
                        cancellation: token,
                    };
                    let started = Instant::now();
                    let mut output = instance.execute(ctx).await?;
                    output.metadata.execution_time_ms = started.elapsed().as_millis() as u64;
                    Ok(output)
                })
            });

            let job_id = self.pool.submit(job);
            rt.job = Some(job_id);
            submitted += 1;
        }
        Ok(submitted)
    }

    /// Called from the job body once a worker picks it up.
    pub(crate) async fn note_job_started(&self, node_id: &NodeId, job_id: JobId) {
        let mut nodes = self.nodes.lock().await;
        let Some(rt) = nodes.get_mut(node_id) else {
            return;
        };
        if rt.job != Some(job_id) || rt.state != NodeState::MarkedForExec {
            tracing::debug!(node = %node_id, job = %job_id, "ignoring start of stale job");
            return;
        }
        if let Err(err) = self.set_state(rt, NodeState::Executing) {
            tracing::warn!(node = %node_id, error = %err, "could not enter EXECUTING");
            return;
        }
        self.bus.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id,
            node_id: node_id.clone(),
            node_type: rt.spec.node_type.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Apply one job completion to the state machine.
    ///
    /// Completions whose JobId does not match the node's outstanding job
    /// are stale (the node was canceled or reset since) and are dropped;
    /// this is what protects the state machine from a canceled job's late
    /// callback.
    pub async fn handle_completion(&self, completion: JobCompletion) -> Result<(), RillError> {
        let mut nodes = self.nodes.lock().await;
        {
            let Some(rt) = nodes.get_mut(&completion.node) else {
                tracing::debug!(node = %completion.node, "completion for unknown node dropped");
                return Ok(());
            };
            if rt.job != Some(completion.job) {
                tracing::debug!(node = %completion.node, job = %completion.job,
                    "stale completion discarded");
                return Ok(());
            }
            rt.job = None;
        }

        match completion.outcome {
            JobOutcome::Finished(output) => {
                self.finish_node(&mut nodes, &completion.node, output).await
            }
            JobOutcome::Failed(err) => {
                let rt = nodes.get_mut(&completion.node).expect("checked above");
                self.apply_message(rt, NodeMessage::error(err.to_string()));
                self.set_state(rt, NodeState::Configured)?;
                self.bus.emit(ExecutionEvent::NodeFailed {
                    execution_id: self.execution_id,
                    node_id: completion.node.clone(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                if self.settings.on_error == ErrorHandling::StopWorkflow {
                    return Err(RillError::NodeFailed {
                        node: completion.node,
                        source: err,
                    });
                }
                Ok(())
            }
            JobOutcome::Canceled => {
                // a normal outcome, distinct from failure: no ERROR message
                let rt = nodes.get_mut(&completion.node).expect("checked above");
                self.set_state(rt, NodeState::Configured)?;
                Ok(())
            }
        }
    }

    /// Commit a successful execution: publish scope and ports, then the
    /// state, then reveal the result. For loop ends this is where the
    /// iterate-or-finish decision happens.
    async fn finish_node(
        &self,
        nodes: &mut HashMap<NodeId, NodeRuntime>,
        id: &NodeId,
        output: NodeOutput,
    ) -> Result<(), RillError> {
        let (kind, incoming) = {
            let rt = nodes.get(id).expect("completing node exists");
            (
                rt.kind,
                rt.incoming
                    .clone()
                    .unwrap_or_else(|| ScopeStack::root(id.clone())),
            )
        };
        let mut outgoing = ScopeStack::derived(&incoming, id.clone());

        if kind == NodeKind::LoopEnd {
            let ctx = match outgoing.pop_loop_context() {
                Ok(ctx) => ctx,
                Err(err) => {
                    // loop end without a loop start: malformed wiring
                    let rt = nodes.get_mut(id).expect("completing node exists");
                    self.apply_message(rt, NodeMessage::error(err.to_string()));
                    self.set_state(rt, NodeState::Configured)?;
                    self.bus.emit(ExecutionEvent::NodeFailed {
                        execution_id: self.execution_id,
                        node_id: id.clone(),
                        error: err.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Ok(());
                }
            };

            let head = ctx.head().clone();
            match self.evaluate_loop(nodes, &head, id).await {
                Err(err) => {
                    let rt = nodes.get_mut(id).expect("completing node exists");
                    self.apply_message(rt, NodeMessage::error(err.to_string()));
                    self.set_state(rt, NodeState::Configured)?;
                    return Ok(());
                }
                Ok(false) => {
                    // another pass: body and loop end go again, the loop
                    // context instance stays as it is
                    self.restart_loop(nodes, &head, id)?;
                    return Ok(());
                }
                Ok(true) => {}
            }
        }

        if kind == NodeKind::LoopStart {
            let rt = nodes.get_mut(id).expect("completing node exists");
            if let Some(ctx) = &rt.loop_context {
                outgoing.push(ScopeObject::Loop(ctx.clone()));
            }
        }
        for (name, value) in output.variables.clone() {
            outgoing.push_variable(name, value);
        }

        let rt = nodes.get_mut(id).expect("completing node exists");
        rt.outgoing = Some(outgoing.clone());
        rt.last_outputs = output.outputs.clone();
        for (name, port) in &rt.out_ports {
            let artifact = output.outputs.get(name).cloned().unwrap_or(Value::Null);
            let mut port = port.lock().expect("out-port lock poisoned");
            port.set_payload(PortPayload::new(artifact));
            port.set_scope(outgoing.clone());
        }

        self.set_state(rt, NodeState::Executed)?;
        // only now may downstream nodes observe the result
        for port in rt.out_ports.values() {
            port.lock().expect("out-port lock poisoned").show_port_object(true);
        }
        rt.progress.apply(&NodeProgress::new().with_fraction(1.0));

        self.bus.emit(ExecutionEvent::NodeCompleted {
            execution_id: self.execution_id,
            node_id: id.clone(),
            outputs: output.outputs,
            duration_ms: output.metadata.execution_time_ms,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Ask the paired loop start whether the loop terminates now. Also
    /// stamps the tail on the authoritative context instance.
    async fn evaluate_loop(
        &self,
        nodes: &mut HashMap<NodeId, NodeRuntime>,
        head: &NodeId,
        tail: &NodeId,
    ) -> Result<bool, RillError> {
        let (instance, config, data, scope) = {
            let start = nodes.get_mut(head).ok_or_else(|| {
                RillError::Workflow(WorkflowError::NodeNotFound(head.to_string()))
            })?;
            let ctx = start.loop_context.as_mut().ok_or_else(|| {
                RillError::Node(rillcore::NodeError::LoopContract(format!(
                    "loop start {} has no active loop context",
                    head
                )))
            })?;
            ctx.set_tail(tail.clone());
            (
                start.instance.clone(),
                start.spec.config.clone(),
                start.data.clone(),
                start
                    .incoming
                    .clone()
                    .unwrap_or_else(|| ScopeStack::root(head.clone())),
            )
        };

        let ctx = NodeContext {
            node_id: head.clone(),
            inputs: HashMap::new(),
            config,
            data,
            scope,
            events: self.bus.create_emitter(self.execution_id, head.clone()),
            cancellation: CancellationToken::new(),
        };
        let terminate = instance.terminate_loop(&ctx).await.map_err(|err| {
            RillError::NodeFailed {
                node: head.clone(),
                source: err,
            }
        })?;
        Ok(terminate)
    }

    /// Queue the loop body (nodes strictly between head and tail) and the
    /// tail itself for another pass. Persistent node data survives; ports
    /// and stacks are rebuilt from scratch.
    fn restart_loop(
        &self,
        nodes: &mut HashMap<NodeId, NodeRuntime>,
        head: &NodeId,
        tail: &NodeId,
    ) -> Result<(), RillError> {
        let mut body = self.graph.loop_body(head, tail);
        body.push(tail.clone());
        tracing::debug!(head = %head, tail = %tail, nodes = body.len(), "loop iterates");

        for id in body {
            let Some(rt) = nodes.get_mut(&id) else {
                continue;
            };
            match rt.state {
                NodeState::Executed => {
                    self.set_state(rt, NodeState::Idle)?;
                    self.set_state(rt, NodeState::Configured)?;
                }
                NodeState::Executing => {
                    // the tail, whose completion triggered this restart
                    self.set_state(rt, NodeState::Configured)?;
                }
                NodeState::Configured => {}
                other => {
                    tracing::warn!(node = %id, state = %other,
                        "unexpected state in loop body, skipping re-queue");
                    continue;
                }
            }
            rt.incoming = None;
            rt.outgoing = None;
            rt.last_outputs.clear();
            for port in rt.out_ports.values() {
                port.lock().expect("out-port lock poisoned").clear();
            }
            self.set_state(rt, NodeState::MarkedForExec)?;
        }
        Ok(())
    }

    /// Reset a node and everything downstream of it back to `Idle`.
    ///
    /// An executing node has its job canceled first; the job's eventual
    /// completion no longer matches an outstanding id and is discarded.
    pub async fn reset(&self, id: &NodeId) -> Result<(), RillError> {
        let mut nodes = self.nodes.lock().await;
        let mut targets = vec![id.clone()];
        targets.extend(self.graph.downstream(id));

        for target in targets {
            let Some(rt) = nodes.get_mut(&target) else {
                continue;
            };
            if let Some(job) = rt.job.take() {
                self.pool.cancel(job);
            }
            if rt.state == NodeState::Executing {
                self.set_state(rt, NodeState::Configured)?;
            }
            if rt.state != NodeState::Idle {
                self.set_state(rt, NodeState::Idle)?;
            }
            self.apply_message(rt, NodeMessage::NONE);
            rt.progress = NodeProgress::new();
            rt.incoming = None;
            rt.outgoing = None;
            rt.last_outputs.clear();
            rt.data = Arc::new(RwLock::new(NodeData::default()));
            for port in rt.out_ports.values() {
                port.lock().expect("out-port lock poisoned").clear();
            }
            // the loop context is intentionally kept: its identity stays
            // authoritative across cancel/restart
        }
        Ok(())
    }

    /// Request cancellation of a node's outstanding job, if any.
    pub async fn cancel_node(&self, id: &NodeId) -> bool {
        let nodes = self.nodes.lock().await;
        match nodes.get(id).and_then(|rt| rt.job) {
            Some(job) => self.pool.cancel(job),
            None => false,
        }
    }

    /// Request cancellation of every outstanding job.
    pub async fn cancel_all(&self) {
        let nodes = self.nodes.lock().await;
        for rt in nodes.values() {
            if let Some(job) = rt.job {
                self.pool.cancel(job);
            }
        }
    }

    /// Number of nodes with an outstanding job.
    pub async fn outstanding(&self) -> usize {
        let nodes = self.nodes.lock().await;
        nodes.values().filter(|rt| rt.job.is_some()).count()
    }

    pub async fn state_of(&self, id: &NodeId) -> Option<NodeState> {
        self.nodes.lock().await.get(id).map(|rt| rt.state)
    }

    pub async fn message_of(&self, id: &NodeId) -> Option<NodeMessage> {
        self.nodes.lock().await.get(id).map(|rt| rt.message.clone())
    }

    /// Final states of all nodes.
    pub async fn states(&self) -> HashMap<NodeId, NodeState> {
        self.nodes
            .lock()
            .await
            .iter()
            .map(|(id, rt)| (id.clone(), rt.state))
            .collect()
    }

    /// Last published outputs of all nodes.
    pub async fn outputs(&self) -> HashMap<NodeId, HashMap<String, Value>> {
        self.nodes
            .lock()
            .await
            .iter()
            .filter(|(_, rt)| !rt.last_outputs.is_empty())
            .map(|(id, rt)| (id.clone(), rt.last_outputs.clone()))
            .collect()
    }

    pub fn workflow_id(&self) -> uuid::Uuid {
        self.workflow_id
    }

    /// Transition with the checked state machine and notify listeners.
    fn set_state(&self, rt: &mut NodeRuntime, to: NodeState) -> Result<(), RillError> {
        let from = rt.state;
        rt.state = from.transition(to)?;
        self.bus.emit(ExecutionEvent::NodeStateChanged {
            execution_id: self.execution_id,
            node_id: rt.spec.id.clone(),
            from,
            to,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Merge a message in and notify listeners.
    fn apply_message(&self, rt: &mut NodeRuntime, message: NodeMessage) {
        rt.message = if message.is_none() {
            NodeMessage::NONE
        } else {
            rt.message.merge(&message)
        };
        self.bus.emit(ExecutionEvent::NodeMessageChanged {
            execution_id: self.execution_id,
            node_id: rt.spec.id.clone(),
            message: rt.message.clone(),
            timestamp: Utc::now(),
        });
    }
}
