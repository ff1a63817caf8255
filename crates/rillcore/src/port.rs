use crate::{NodeId, ScopeStack, Value, WorkflowError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Describes the artifact currently held by an out-port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub type_name: String,
}

impl PortDescriptor {
    pub fn describe(value: &Value) -> Self {
        Self {
            type_name: value.type_name().to_string(),
        }
    }
}

/// The computed artifact published on an out-port together with its
/// descriptor. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortPayload {
    pub artifact: Value,
    pub descriptor: PortDescriptor,
}

impl PortPayload {
    pub fn new(artifact: Value) -> Self {
        let descriptor = PortDescriptor::describe(&artifact);
        Self {
            artifact,
            descriptor,
        }
    }
}

/// Output port of a node.
///
/// Holds the computed payload, the publishing node's outgoing scope
/// snapshot, and a visibility gate: the payload stays hidden between
/// "computation finished" and "state committed to EXECUTED" so downstream
/// nodes never observe a result before the state machine commits it.
#[derive(Debug)]
pub struct NodeOutPort {
    owner: NodeId,
    name: String,
    payload: Option<PortPayload>,
    scope: Option<ScopeStack>,
    visible: bool,
}

impl NodeOutPort {
    pub fn new(owner: NodeId, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            payload: None,
            scope: None,
            visible: false,
        }
    }

    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store a freshly computed payload. The port stays hidden until
    /// [`NodeOutPort::show_port_object`] reveals it.
    pub fn set_payload(&mut self, payload: PortPayload) {
        self.payload = Some(payload);
        self.visible = false;
    }

    pub fn set_scope(&mut self, scope: ScopeStack) {
        self.scope = Some(scope);
    }

    /// Gate the payload's visibility to downstream consumers.
    pub fn show_port_object(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Drop payload and scope, hiding the port.
    pub fn clear(&mut self) {
        self.payload = None;
        self.scope = None;
        self.visible = false;
    }

    /// The published payload, or `None` while hidden or absent.
    pub fn object(&self) -> Option<&PortPayload> {
        if self.visible {
            self.payload.as_ref()
        } else {
            None
        }
    }

    pub fn descriptor(&self) -> Option<&PortDescriptor> {
        self.object().map(|payload| &payload.descriptor)
    }

    pub fn scope_stack(&self) -> Option<&ScopeStack> {
        if self.visible {
            self.scope.as_ref()
        } else {
            None
        }
    }
}

/// Shared handle to an out-port, held by the engine and by connected
/// in-ports.
pub type SharedOutPort = Arc<Mutex<NodeOutPort>>;

/// Input port of a node: a single-assignment wrapper around at most one
/// connected producer out-port. All accessors on a disconnected port
/// report unavailable rather than fail.
#[derive(Debug, Default)]
pub struct NodeInPort {
    name: String,
    connected: Option<SharedOutPort>,
}

impl NodeInPort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    /// Connect the producer. Fails if a producer is already held.
    pub fn connect(&mut self, producer: SharedOutPort) -> Result<(), WorkflowError> {
        if self.connected.is_some() {
            return Err(WorkflowError::InvalidConnection(format!(
                "input port '{}' is already connected",
                self.name
            )));
        }
        self.connected = Some(producer);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        tracing::debug!(port = %self.name, "input port disconnected");
        self.connected = None;
    }

    /// Payload visible on the connected producer, if any.
    pub fn object(&self) -> Option<PortPayload> {
        let producer = self.connected.as_ref()?;
        let port = producer.lock().expect("out-port lock poisoned");
        port.object().cloned()
    }

    pub fn descriptor(&self) -> Option<PortDescriptor> {
        self.object().map(|payload| payload.descriptor)
    }

    pub fn scope_stack(&self) -> Option<ScopeStack> {
        let producer = self.connected.as_ref()?;
        let port = producer.lock().expect("out-port lock poisoned");
        port.scope_stack().cloned()
    }
}
