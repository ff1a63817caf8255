use async_trait::async_trait;
use rillcore::{Node, NodeContext, NodeError, NodeOutput, NodeProgress, Value};
use rillruntime::{NodeFactory, NodeTypeInfo};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration.
///
/// Sleeps in short slices and polls the cancellation flag between them,
/// so a cancel request takes effect at the next safe point.
pub struct DelayNode;

const SLICE_MS: u64 = 50;

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = ctx
            .config
            .get("delay_ms")
            .and_then(|v| v.as_i64())
            .unwrap_or(1000) as u64;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        let mut elapsed = 0u64;
        while elapsed < delay_ms {
            ctx.check_canceled()?;
            let step = SLICE_MS.min(delay_ms - elapsed);
            sleep(Duration::from_millis(step)).await;
            elapsed += step;
            ctx.events
                .progress(NodeProgress::new().with_fraction(elapsed as f64 / delay_ms as f64));
        }
        ctx.check_canceled()?;

        // Pass through any inputs
        let outputs = ctx.inputs.clone();

        Ok(NodeOutput {
            outputs,
            ..NodeOutput::new()
        })
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DelayNode))
    }

    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn type_info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}
