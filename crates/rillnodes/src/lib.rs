//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod debug;
mod looping;
mod time;
mod transform;
mod variable;

pub use debug::DebugNode;
pub use looping::{CollectLoopEndNode, CountedLoopStartNode};
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};
pub use variable::{VariableInjectNode, VariableReadNode};

use rillruntime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(looping::CountedLoopStartNodeFactory));
    registry.register(Arc::new(looping::CollectLoopEndNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(transform::JsonStringifyNodeFactory));
    registry.register(Arc::new(variable::VariableInjectNodeFactory));
    registry.register(Arc::new(variable::VariableReadNodeFactory));
}
