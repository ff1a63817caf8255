use async_trait::async_trait;
use rillcore::{Node, NodeContext, NodeError, NodeOutput, ScopeValue, Value};
use rillruntime::{NodeFactory, NodeTypeInfo, PortDefinition};
use std::collections::HashMap;

fn scope_value_from_config(value: &Value) -> Result<ScopeValue, NodeError> {
    match value {
        Value::Int(n) => Ok(ScopeValue::Integer(*n)),
        Value::Float(n) => Ok(ScopeValue::Double(*n)),
        Value::String(s) => Ok(ScopeValue::Str(s.clone())),
        other => Err(NodeError::Configuration(format!(
            "variables must be int, float or string, got {}",
            other.type_name()
        ))),
    }
}

/// Push a configured variable onto the scope stack for downstream nodes
pub struct VariableInjectNode;

#[async_trait]
impl Node for VariableInjectNode {
    fn node_type(&self) -> &str {
        "variable.inject"
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), NodeError> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::Configuration("Missing config: name".to_string()))?;
        if name.is_empty() {
            return Err(NodeError::Configuration(
                "variable name must not be empty".to_string(),
            ));
        }
        let value = config
            .get("value")
            .ok_or_else(|| NodeError::Configuration("Missing config: value".to_string()))?;
        scope_value_from_config(value).map(|_| ())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let name = ctx
            .require_config("name")?
            .as_str()
            .ok_or_else(|| NodeError::Configuration("name must be a string".to_string()))?
            .to_string();
        let value = scope_value_from_config(ctx.require_config("value")?)?;

        ctx.events
            .info(format!("Pushing variable '{}' into scope", name));

        Ok(NodeOutput::new()
            .with_output("name", name.clone())
            .with_variable(name, value))
    }
}

pub struct VariableInjectNodeFactory;

impl NodeFactory for VariableInjectNodeFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(VariableInjectNode))
    }

    fn node_type(&self) -> &str {
        "variable.inject"
    }

    fn type_info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Push a named variable into the downstream scope".to_string(),
            category: "variable".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition {
                name: "name".to_string(),
                description: "Name of the injected variable".to_string(),
                required: false,
            }],
        }
    }
}

/// Read the nearest definition of a named variable from the scope
pub struct VariableReadNode;

#[async_trait]
impl Node for VariableReadNode {
    fn node_type(&self) -> &str {
        "variable.read"
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), NodeError> {
        config
            .get("name")
            .and_then(|v| v.as_str())
            .map(|_| ())
            .ok_or_else(|| NodeError::Configuration("Missing config: name".to_string()))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let name = ctx
            .require_config("name")?
            .as_str()
            .ok_or_else(|| NodeError::Configuration("name must be a string".to_string()))?;

        let variable = ctx.scope.find_variable(name).ok_or_else(|| {
            NodeError::ExecutionFailed(format!("variable '{}' is not in scope", name))
        })?;

        let value = match &variable.value {
            ScopeValue::Integer(n) => Value::Int(*n),
            ScopeValue::Double(n) => Value::Float(*n),
            ScopeValue::Str(s) => Value::String(s.clone()),
        };

        Ok(NodeOutput::new().with_output("value", value))
    }
}

pub struct VariableReadNodeFactory;

impl NodeFactory for VariableReadNodeFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(VariableReadNode))
    }

    fn node_type(&self) -> &str {
        "variable.read"
    }

    fn type_info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Resolve a named variable from the scope".to_string(),
            category: "variable".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition {
                name: "value".to_string(),
                description: "Resolved variable value".to_string(),
                required: false,
            }],
        }
    }
}
