mod common;

use common::init_tracing;
use rillcore::{JobId, NodeError, NodeId, NodeOutput};
use rillruntime::{Job, JobExecutor, JobOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Duration};

fn node(index: u32) -> NodeId {
    NodeId::root().child(index)
}

async fn recv(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<rillruntime::JobCompletion>,
) -> rillruntime::JobCompletion {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for completion")
        .expect("completion channel closed")
}

#[tokio::test]
async fn queued_jobs_dispatch_in_fifo_order() {
    init_tracing();
    let (pool, mut rx) = JobExecutor::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in 1u32..=3 {
        let order = order.clone();
        pool.submit(Job::new(node(tag), move |_, _| {
            Box::pin(async move {
                order.lock().unwrap().push(tag);
                sleep(Duration::from_millis(5)).await;
                Ok(NodeOutput::new())
            })
        }));
    }

    for _ in 0..3 {
        let completion = recv(&mut rx).await;
        assert!(matches!(completion.outcome, JobOutcome::Finished(_)));
    }
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn canceling_a_queued_job_guarantees_it_never_runs() {
    init_tracing();
    let (pool, mut rx) = JobExecutor::new(1);

    let gate = Arc::new(Notify::new());
    let release = gate.clone();
    let first = pool.submit(Job::new(node(1), move |_, _| {
        Box::pin(async move {
            gate.notified().await;
            Ok(NodeOutput::new())
        })
    }));

    let ran = Arc::new(AtomicBool::new(false));
    let ran_flag = ran.clone();
    let second = pool.submit(Job::new(node(2), move |_, _| {
        Box::pin(async move {
            ran_flag.store(true, Ordering::SeqCst);
            Ok(NodeOutput::new())
        })
    }));

    // the second job is still queued behind the blocked worker
    assert!(pool.cancel(second));
    let completion = recv(&mut rx).await;
    assert_eq!(completion.job, second);
    assert!(matches!(completion.outcome, JobOutcome::Canceled));

    release.notify_one();
    let completion = recv(&mut rx).await;
    assert_eq!(completion.job, first);
    assert!(matches!(completion.outcome, JobOutcome::Finished(_)));
    assert!(!ran.load(Ordering::SeqCst), "canceled job must never run");
}

#[tokio::test]
async fn canceling_a_running_job_only_flags_it() {
    init_tracing();
    let (pool, mut rx) = JobExecutor::new(1);

    let started = Arc::new(Notify::new());
    let started_signal = started.clone();
    let id = pool.submit(Job::new(node(1), move |_, token| {
        Box::pin(async move {
            started_signal.notify_one();
            // cooperative: the job decides when to observe the flag
            loop {
                if token.is_cancelled() {
                    return Err(NodeError::Canceled);
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
    }));

    timeout(Duration::from_secs(5), started.notified())
        .await
        .expect("job never started");
    assert!(pool.cancel(id));

    let completion = recv(&mut rx).await;
    assert_eq!(completion.job, id);
    assert!(matches!(completion.outcome, JobOutcome::Canceled));
}

#[tokio::test]
async fn a_panicking_job_does_not_take_the_pool_down() {
    init_tracing();
    let (pool, mut rx) = JobExecutor::new(2);

    pool.submit(Job::new(node(1), |_, _| {
        Box::pin(async { panic!("boom") })
    }));
    let completion = recv(&mut rx).await;
    assert!(matches!(completion.outcome, JobOutcome::Failed(_)));

    // the pool keeps accepting and running work
    pool.submit(Job::new(node(2), |_, _| {
        Box::pin(async { Ok(NodeOutput::new().with_output("ok", true)) })
    }));
    let completion = recv(&mut rx).await;
    assert!(matches!(completion.outcome, JobOutcome::Finished(_)));
}

#[tokio::test]
async fn pool_shrinks_to_zero_and_job_ids_keep_increasing() {
    init_tracing();
    let (pool, mut rx) = JobExecutor::new(2);

    let mut ids: Vec<JobId> = Vec::new();
    for tag in 1u32..=3 {
        ids.push(pool.submit(Job::new(node(tag), |_, _| {
            Box::pin(async { Ok(NodeOutput::new()) })
        })));
    }
    for _ in 0..3 {
        recv(&mut rx).await;
    }

    // workers retire once the queue drains
    let mut waited = 0;
    while pool.workers() > 0 && waited < 100 {
        sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert_eq!(pool.workers(), 0);

    // regrowth never reuses an id
    let late = pool.submit(Job::new(node(9), |_, _| {
        Box::pin(async { Ok(NodeOutput::new()) })
    }));
    recv(&mut rx).await;
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert!(late > *ids.last().unwrap());
}

#[tokio::test]
async fn concurrent_submit_and_cancel_yields_exactly_one_completion_per_job() {
    init_tracing();
    let (pool, mut rx) = JobExecutor::new(4);

    let mut submitted = Vec::new();
    for tag in 0u32..50 {
        let id = pool.submit(Job::new(node(tag), |_, token| {
            Box::pin(async move {
                if token.is_cancelled() {
                    return Err(NodeError::Canceled);
                }
                sleep(Duration::from_millis(1)).await;
                Ok(NodeOutput::new())
            })
        }));
        submitted.push(id);
        // interleave cancellations with submissions
        if tag % 2 == 0 {
            pool.cancel(id);
        }
    }

    let mut seen = std::collections::HashSet::new();
    for _ in 0..submitted.len() {
        let completion = recv(&mut rx).await;
        assert!(
            seen.insert(completion.job),
            "job {} completed twice",
            completion.job
        );
    }
    assert_eq!(seen.len(), submitted.len());
    assert!(submitted.iter().all(|id| seen.contains(id)));
}

#[tokio::test]
async fn canceling_an_unknown_job_is_a_no_op() {
    init_tracing();
    let (pool, mut rx) = JobExecutor::new(1);
    let id = pool.submit(Job::new(node(1), |_, _| {
        Box::pin(async { Ok(NodeOutput::new()) })
    }));
    recv(&mut rx).await;
    // already completed: nothing left to cancel
    assert!(!pool.cancel(id));
}
