mod common;

use common::*;
use rillcore::{MessageKind, NodeSpec, NodeState, Value, Workflow};
use rillruntime::NodeRegistry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn loop_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(ClosureFactory::new("test.loop_start", || {
        Box::new(TestLoopStart)
    }));
    registry.register(ClosureFactory::new("test.pass", || Box::new(PassNode)));
    registry
}

#[tokio::test]
async fn loop_body_executes_exactly_n_times() {
    init_tracing();
    let mut registry = loop_registry();
    let (runs, live, overlapped) = CountingNode::handles();
    {
        let (runs, live, overlapped) = (runs.clone(), live.clone(), overlapped.clone());
        registry.register(ClosureFactory::new("test.counting", move || {
            Box::new(CountingNode {
                runs: runs.clone(),
                live: live.clone(),
                overlapped: overlapped.clone(),
            })
        }));
    }
    let end_runs = Arc::new(AtomicUsize::new(0));
    {
        let end_runs = end_runs.clone();
        registry.register(ClosureFactory::new("test.loop_end", move || {
            Box::new(TestLoopEnd {
                runs: end_runs.clone(),
            })
        }));
    }

    let mut workflow = Workflow::new("counted-loop");
    let start = workflow.add_node(
        NodeSpec::new("test.loop_start").with_config("iterations", 3i64),
    );
    let body = workflow.add_node(NodeSpec::new("test.counting"));
    let end = workflow.add_node(NodeSpec::new("test.loop_end"));
    let sink = workflow.add_node(NodeSpec::new("test.pass"));
    workflow.connect(start.clone(), "iterations", body.clone(), "in");
    workflow.connect(body.clone(), "count", end.clone(), "in");
    workflow.connect(end.clone(), "passes", sink.clone(), "in");

    let (engine, mut completions) = build_engine(&workflow, &registry, 2).unwrap();
    engine.configure_all().await.unwrap();
    engine.mark_all().await.unwrap();
    drive(&engine, &mut completions).await.unwrap();

    // termination after 3 iterations: the body ran exactly 3 times, the
    // loop start only once, and control passed downstream
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(end_runs.load(Ordering::SeqCst), 3);
    assert!(!overlapped.load(Ordering::SeqCst), "body ran concurrently");
    for id in [&start, &body, &end, &sink] {
        assert_eq!(engine.state_of(id).await, Some(NodeState::Executed));
    }
    // the sink saw the final pass count
    let outputs = engine.outputs().await;
    assert_eq!(
        outputs.get(&sink).and_then(|o| o.get("in")),
        Some(&Value::Int(3))
    );
}

#[tokio::test]
async fn loop_context_identity_is_stable_across_iterations() {
    init_tracing();
    let mut registry = loop_registry();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        registry.register(ClosureFactory::new("test.scope_probe", move || {
            Box::new(ScopeProbeNode { seen: seen.clone() })
        }));
    }
    let end_runs = Arc::new(AtomicUsize::new(0));
    {
        let end_runs = end_runs.clone();
        registry.register(ClosureFactory::new("test.loop_end", move || {
            Box::new(TestLoopEnd {
                runs: end_runs.clone(),
            })
        }));
    }

    let mut workflow = Workflow::new("stable-context");
    let start = workflow.add_node(
        NodeSpec::new("test.loop_start").with_config("iterations", 4i64),
    );
    let probe = workflow.add_node(NodeSpec::new("test.scope_probe"));
    let end = workflow.add_node(NodeSpec::new("test.loop_end"));
    workflow.connect(start.clone(), "iterations", probe.clone(), "in");
    workflow.connect(probe.clone(), "depth", end.clone(), "in");

    let (engine, mut completions) = build_engine(&workflow, &registry, 2).unwrap();
    engine.configure_all().await.unwrap();
    engine.mark_all().await.unwrap();
    drive(&engine, &mut completions).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    // re-submission reuses the same context instance, not a clone with a
    // fresh identity
    assert!(seen.iter().all(|id| *id == seen[0]));
}

#[tokio::test]
async fn nested_loops_multiply_body_executions() {
    init_tracing();
    let mut registry = loop_registry();
    let (runs, live, overlapped) = CountingNode::handles();
    {
        let (runs, live, overlapped) = (runs.clone(), live.clone(), overlapped.clone());
        registry.register(ClosureFactory::new("test.counting", move || {
            Box::new(CountingNode {
                runs: runs.clone(),
                live: live.clone(),
                overlapped: overlapped.clone(),
            })
        }));
    }
    let end_runs = Arc::new(AtomicUsize::new(0));
    {
        let end_runs = end_runs.clone();
        registry.register(ClosureFactory::new("test.loop_end", move || {
            Box::new(TestLoopEnd {
                runs: end_runs.clone(),
            })
        }));
    }

    let mut workflow = Workflow::new("nested-loops");
    let outer_start = workflow.add_node(
        NodeSpec::new("test.loop_start").with_config("iterations", 2i64),
    );
    let inner_start = workflow.add_node(
        NodeSpec::new("test.loop_start").with_config("iterations", 3i64),
    );
    let body = workflow.add_node(NodeSpec::new("test.counting"));
    let inner_end = workflow.add_node(NodeSpec::new("test.loop_end"));
    let outer_end = workflow.add_node(NodeSpec::new("test.loop_end"));
    workflow.connect(outer_start.clone(), "iterations", inner_start.clone(), "in");
    workflow.connect(inner_start.clone(), "iterations", body.clone(), "in");
    workflow.connect(body.clone(), "count", inner_end.clone(), "in");
    workflow.connect(inner_end.clone(), "passes", outer_end.clone(), "in");

    let (engine, mut completions) = build_engine(&workflow, &registry, 2).unwrap();
    engine.configure_all().await.unwrap();
    engine.mark_all().await.unwrap();
    drive(&engine, &mut completions).await.unwrap();

    // 2 outer passes x 3 inner passes
    assert_eq!(runs.load(Ordering::SeqCst), 6);
    // inner end ran once per inner pass, outer end once per outer pass
    assert_eq!(end_runs.load(Ordering::SeqCst), 6 + 2);
    for id in [&outer_start, &inner_start, &body, &inner_end, &outer_end] {
        assert_eq!(engine.state_of(id).await, Some(NodeState::Executed));
    }
}

#[tokio::test]
async fn loop_variables_are_visible_inside_the_body() {
    init_tracing();
    let mut registry = loop_registry();
    let end_runs = Arc::new(AtomicUsize::new(0));
    {
        let end_runs = end_runs.clone();
        registry.register(ClosureFactory::new("test.loop_end", move || {
            Box::new(TestLoopEnd {
                runs: end_runs.clone(),
            })
        }));
    }
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        registry.register(ClosureFactory::new("test.scope_probe", move || {
            Box::new(ScopeProbeNode { seen: seen.clone() })
        }));
    }

    let mut workflow = Workflow::new("loop-variables");
    let start = workflow.add_node(
        NodeSpec::new("test.loop_start").with_config("iterations", 2i64),
    );
    let probe = workflow.add_node(NodeSpec::new("test.scope_probe"));
    let end = workflow.add_node(NodeSpec::new("test.loop_end"));
    workflow.connect(start.clone(), "iterations", probe.clone(), "in");
    workflow.connect(probe.clone(), "depth", end.clone(), "in");

    let (engine, mut completions) = build_engine(&workflow, &registry, 2).unwrap();
    engine.configure_all().await.unwrap();
    engine.mark_all().await.unwrap();
    drive(&engine, &mut completions).await.unwrap();

    // the loop start pushed maxIterations above its context; the probe's
    // out port scope snapshot still carries it for downstream viewers
    let outputs = engine.outputs().await;
    assert_eq!(
        outputs.get(&probe).and_then(|o| o.get("depth")),
        Some(&Value::Int(1))
    );
}

#[tokio::test]
async fn loop_end_without_loop_start_is_a_configuration_error() {
    init_tracing();
    let mut registry = loop_registry();
    let end_runs = Arc::new(AtomicUsize::new(0));
    {
        let end_runs = end_runs.clone();
        registry.register(ClosureFactory::new("test.loop_end", move || {
            Box::new(TestLoopEnd {
                runs: end_runs.clone(),
            })
        }));
    }

    let mut workflow = Workflow::new("dangling-loop-end");
    let source = workflow.add_node(NodeSpec::new("test.pass").with_config("value", 1i64));
    let end = workflow.add_node(NodeSpec::new("test.loop_end"));
    workflow.connect(source.clone(), "value", end.clone(), "in");

    let (engine, mut completions) = build_engine(&workflow, &registry, 2).unwrap();
    engine.configure_all().await.unwrap();
    engine.mark_all().await.unwrap();
    drive(&engine, &mut completions).await.unwrap();

    // malformed wiring surfaces on the node, not as a crash
    assert_eq!(engine.state_of(&end).await, Some(NodeState::Configured));
    let message = engine.message_of(&end).await.unwrap();
    assert_eq!(message.kind, MessageKind::Error);
    assert!(message.text.contains("no loop context"));
}
