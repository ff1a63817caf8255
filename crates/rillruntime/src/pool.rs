use futures::FutureExt;
use rillcore::{JobId, NodeError, NodeId, NodeOutput};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Future produced by a job body.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<NodeOutput, NodeError>> + Send>>;

/// A job body: given its assigned id and cancellation token, produce the
/// future that runs the node's business logic.
pub type JobFn = Box<dyn FnOnce(JobId, CancellationToken) -> JobFuture + Send>;

/// One schedulable unit of work for a node.
pub struct Job {
    pub node: NodeId,
    run: JobFn,
}

impl Job {
    pub fn new<F>(node: NodeId, run: F) -> Self
    where
        F: FnOnce(JobId, CancellationToken) -> JobFuture + Send + 'static,
    {
        Self {
            node,
            run: Box::new(run),
        }
    }
}

/// How a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    Finished(NodeOutput),
    Failed(NodeError),
    Canceled,
}

/// Delivered to the pool owner exactly once per submitted job.
#[derive(Debug)]
pub struct JobCompletion {
    pub job: JobId,
    pub node: NodeId,
    pub outcome: JobOutcome,
}

struct QueuedJob {
    id: JobId,
    node: NodeId,
    token: CancellationToken,
    run: JobFn,
}

#[derive(Default)]
struct PoolState {
    pending: VecDeque<QueuedJob>,
    running: HashMap<JobId, CancellationToken>,
    workers: usize,
}

/// Bounded worker pool dispatching jobs in FIFO order.
///
/// Workers are spawned lazily up to `max_workers`, reused while the queue
/// is non-empty, and retire as soon as it drains, so the pool shrinks to
/// zero between bursts. Submission never blocks the caller. Cancellation
/// is cooperative: a queued job is removed outright, a running job only
/// has its token canceled and must poll it to actually stop.
pub struct JobExecutor {
    max_workers: usize,
    state: Mutex<PoolState>,
    completions: mpsc::UnboundedSender<JobCompletion>,
}

impl JobExecutor {
    /// Create a pool together with the receiver its completions are
    /// delivered on.
    pub fn new(max_workers: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<JobCompletion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = Arc::new(Self {
            max_workers: max_workers.max(1),
            state: Mutex::new(PoolState::default()),
            completions: tx,
        });
        (pool, rx)
    }

    /// Enqueue a job and return its freshly assigned id. Never blocks.
    ///
    /// Jobs are dispatched FIFO from the queue; once multiple workers are
    /// active there is no start-order guarantee between them.
    pub fn submit(self: &Arc<Self>, job: Job) -> JobId {
        let id = JobId::next();
        let token = CancellationToken::new();
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.pending.push_back(QueuedJob {
            id,
            node: job.node,
            token,
            run: job.run,
        });
        tracing::debug!(job = %id, queued = state.pending.len(), "job submitted");
        if state.workers < self.max_workers {
            state.workers += 1;
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.worker_loop().await });
        }
        id
    }

    /// Best-effort cancellation by job handle.
    ///
    /// A job still in the queue is removed and reported as `Canceled`
    /// without ever running. A running job only gets its cancellation
    /// token flagged; termination is up to the job body. Returns `false`
    /// when the id is unknown (already completed or never submitted).
    pub fn cancel(&self, id: JobId) -> bool {
        let mut state = self.state.lock().expect("pool lock poisoned");
        if let Some(pos) = state.pending.iter().position(|j| j.id == id) {
            let job = state.pending.remove(pos).expect("position is valid");
            drop(state);
            tracing::debug!(job = %id, "queued job canceled");
            let _ = self.completions.send(JobCompletion {
                job: id,
                node: job.node,
                outcome: JobOutcome::Canceled,
            });
            true
        } else if let Some(token) = state.running.get(&id) {
            tracing::debug!(job = %id, "cancellation requested for running job");
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Number of jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.state.lock().expect("pool lock poisoned").pending.len()
    }

    /// Number of live worker tasks.
    pub fn workers(&self) -> usize {
        self.state.lock().expect("pool lock poisoned").workers
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            let job = {
                let mut state = self.state.lock().expect("pool lock poisoned");
                match state.pending.pop_front() {
                    Some(job) => {
                        state.running.insert(job.id, job.token.clone());
                        job
                    }
                    None => {
                        // queue drained: retire instead of idling
                        state.workers -= 1;
                        return;
                    }
                }
            };

            let QueuedJob {
                id,
                node,
                token,
                run,
            } = job;
            tracing::debug!(job = %id, node = %node, "job started");

            let result = AssertUnwindSafe(async move { run(id, token).await })
                .catch_unwind()
                .await;
            let outcome = match result {
                Ok(Ok(output)) => JobOutcome::Finished(output),
                Ok(Err(NodeError::Canceled)) => JobOutcome::Canceled,
                Ok(Err(err)) => JobOutcome::Failed(err),
                Err(_) => {
                    // a panicking job must not take the pool down with it
                    tracing::error!(job = %id, node = %node, "job panicked");
                    JobOutcome::Failed(NodeError::ExecutionFailed(
                        "job panicked".to_string(),
                    ))
                }
            };

            self.state
                .lock()
                .expect("pool lock poisoned")
                .running
                .remove(&id);
            let _ = self.completions.send(JobCompletion {
                job: id,
                node,
                outcome,
            });
        }
    }
}
