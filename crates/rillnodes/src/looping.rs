use async_trait::async_trait;
use rillcore::{Node, NodeContext, NodeError, NodeKind, NodeOutput, ScopeValue, Value};
use rillruntime::{NodeFactory, NodeTypeInfo};
use std::collections::HashMap;

/// Loop head that runs the loop body a fixed number of times.
///
/// Executes once when the loop region is first reached; iteration
/// bookkeeping lives in persistent node data and is advanced by
/// `terminate_loop`, which the engine calls on every completion of the
/// paired loop end.
pub struct CountedLoopStartNode;

#[async_trait]
impl Node for CountedLoopStartNode {
    fn node_type(&self) -> &str {
        "loop.counted_start"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::LoopStart
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), NodeError> {
        let iterations = config
            .get("iterations")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| NodeError::Configuration("Missing config: iterations".to_string()))?;
        if iterations < 1 {
            return Err(NodeError::Configuration(
                "iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let iterations = ctx
            .require_config("iterations")?
            .as_i64()
            .ok_or_else(|| NodeError::Configuration("iterations must be an int".to_string()))?;

        {
            let mut data = ctx.data.write().await;
            data.data.insert("iteration".to_string(), Value::Int(0));
        }

        ctx.events
            .info(format!("Opening loop over {} iterations", iterations));

        Ok(NodeOutput::new()
            .with_output("iterations", iterations)
            .with_variable("maxIterations", ScopeValue::Integer(iterations)))
    }

    async fn terminate_loop(&self, ctx: &NodeContext) -> Result<bool, NodeError> {
        let iterations = ctx
            .require_config("iterations")?
            .as_i64()
            .ok_or_else(|| NodeError::Configuration("iterations must be an int".to_string()))?;

        let mut data = ctx.data.write().await;
        let done = data
            .data
            .get("iteration")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            + 1;
        data.data
            .insert("iteration".to_string(), Value::Int(done));
        Ok(done >= iterations)
    }
}

pub struct CountedLoopStartNodeFactory;

impl NodeFactory for CountedLoopStartNodeFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(CountedLoopStartNode))
    }

    fn node_type(&self) -> &str {
        "loop.counted_start"
    }

    fn type_info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Run the loop body a fixed number of times".to_string(),
            category: "loop".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}

/// Loop tail that collects one value per iteration.
///
/// Appends its `value` input to a collection kept in persistent node
/// data; on the final iteration the collection is published downstream.
pub struct CollectLoopEndNode;

#[async_trait]
impl Node for CollectLoopEndNode {
    fn node_type(&self) -> &str {
        "loop.collect_end"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::LoopEnd
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.inputs.get("value").cloned().unwrap_or(Value::Null);

        let mut data = ctx.data.write().await;
        let collected = match data.data.remove("collected") {
            Some(Value::Array(mut items)) => {
                items.push(value);
                items
            }
            _ => vec![value],
        };
        data.data
            .insert("collected".to_string(), Value::Array(collected.clone()));

        ctx.events
            .info(format!("Collected {} value(s) so far", collected.len()));

        Ok(NodeOutput::new().with_output("collected", Value::Array(collected)))
    }
}

pub struct CollectLoopEndNodeFactory;

impl NodeFactory for CollectLoopEndNodeFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(CollectLoopEndNode))
    }

    fn node_type(&self) -> &str {
        "loop.collect_end"
    }

    fn type_info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Collect one value per iteration and emit the collection".to_string(),
            category: "loop".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}
