use crate::{NodeId, ScopeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a loop context.
///
/// Assigned once at creation and preserved by propagation clones, so
/// compatibility checks compare loop *identity* rather than structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Typed value of a scope variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ScopeValue {
    Integer(i64),
    Double(f64),
    Str(String),
}

/// A named variable visible to a node and its downstream successors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeVariable {
    pub name: String,
    pub value: ScopeValue,
    /// Node that pushed the variable; stamped on push.
    pub head: Option<NodeId>,
}

impl ScopeVariable {
    pub fn new(name: impl Into<String>, value: ScopeValue) -> Self {
        Self {
            name: name.into(),
            value,
            head: None,
        }
    }
}

/// Marker delimiting an active loop region on the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeLoopContext {
    id: ContextId,
    head: NodeId,
    tail: Option<NodeId>,
    /// Set when the context was reloaded from a persisted-but-unfinished
    /// loop rather than pushed live.
    restored: bool,
}

impl ScopeLoopContext {
    /// Create a fresh context pushed by the loop-start node `head`.
    pub fn new(head: NodeId) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            head,
            tail: None,
            restored: false,
        }
    }

    /// Create a restored context for a loop reloaded mid-flight.
    pub fn restored(head: NodeId) -> Self {
        let mut ctx = Self::new(head);
        ctx.restored = true;
        ctx
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn head(&self) -> &NodeId {
        &self.head
    }

    pub fn tail(&self) -> Option<&NodeId> {
        self.tail.as_ref()
    }

    /// Record the loop-end node once it is known.
    pub fn set_tail(&mut self, tail: NodeId) {
        self.tail = Some(tail);
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }
}

/// Discriminator for [`ScopeObject`] variants, used by pop/peek requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeObjectKind {
    Variable,
    LoopContext,
}

/// An entry on a node's scope stack: a variable or a loop marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ScopeObject {
    Variable(ScopeVariable),
    Loop(ScopeLoopContext),
}

impl ScopeObject {
    pub fn kind(&self) -> ScopeObjectKind {
        match self {
            ScopeObject::Variable(_) => ScopeObjectKind::Variable,
            ScopeObject::Loop(_) => ScopeObjectKind::LoopContext,
        }
    }

    /// Node that pushed this object.
    pub fn head(&self) -> Option<&NodeId> {
        match self {
            ScopeObject::Variable(v) => v.head.as_ref(),
            ScopeObject::Loop(ctx) => Some(ctx.head()),
        }
    }

    /// Clone for propagation to a successor stack: the tail is cleared,
    /// identity is preserved.
    fn propagation_clone(&self) -> ScopeObject {
        match self {
            ScopeObject::Variable(v) => ScopeObject::Variable(v.clone()),
            ScopeObject::Loop(ctx) => {
                let mut ctx = ctx.clone();
                ctx.tail = None;
                ScopeObject::Loop(ctx)
            }
        }
    }
}

/// Ordered push/pop stack of scope objects, owned by one node.
///
/// Stacks are privately owned per node until published on an out-port,
/// so no locking is involved. Lookups scan top-to-bottom and therefore
/// see the nearest enclosing scope first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeStack {
    owner: NodeId,
    items: Vec<ScopeObject>,
}

impl ScopeStack {
    /// Empty stack for a root-level node.
    pub fn root(owner: NodeId) -> Self {
        Self {
            owner,
            items: Vec::new(),
        }
    }

    /// Inherit a single predecessor's stack.
    pub fn derived(parent: &ScopeStack, owner: NodeId) -> Self {
        Self {
            owner,
            items: parent
                .items
                .iter()
                .map(ScopeObject::propagation_clone)
                .collect(),
        }
    }

    /// Merge the stacks of two or more predecessors at a join node.
    ///
    /// Loop contexts are compatible only when one parent's chain of
    /// context identities is a prefix of every deeper chain; a node
    /// inside one loop may not be joined with a node inside a
    /// structurally different loop. The merged stack takes its loop
    /// contexts from the deepest parent and unions the variables of all
    /// parents in order, dropping exact duplicates.
    pub fn merged(parents: &[&ScopeStack], owner: NodeId) -> Result<Self, ScopeError> {
        let Some(deepest) = parents
            .iter()
            .max_by_key(|p| p.loop_contexts().len())
            .copied()
        else {
            return Ok(Self::root(owner));
        };

        let reference: Vec<ContextId> =
            deepest.loop_contexts().iter().map(|c| c.id()).collect();
        for parent in parents {
            let chain: Vec<ContextId> =
                parent.loop_contexts().iter().map(|c| c.id()).collect();
            if reference[..chain.len().min(reference.len())] != chain[..] {
                tracing::debug!(owner = %owner, "scope merge rejected: conflicting loop contexts");
                return Err(ScopeError::IncompatibleScope(format!(
                    "node {} joins two different active loops ({} vs {})",
                    owner,
                    parent.owner,
                    deepest.owner,
                )));
            }
        }

        let mut merged = Self::derived(deepest, owner.clone());
        for parent in parents {
            if std::ptr::eq(*parent, deepest) {
                continue;
            }
            for obj in &parent.items {
                if let ScopeObject::Variable(var) = obj {
                    let duplicate = merged.items.iter().any(|existing| {
                        matches!(existing, ScopeObject::Variable(v) if v == var)
                    });
                    if !duplicate {
                        merged.items.push(obj.propagation_clone());
                    }
                }
            }
        }
        Ok(merged)
    }

    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an object, stamping the owning node as its head.
    pub fn push(&mut self, mut obj: ScopeObject) {
        if let ScopeObject::Variable(var) = &mut obj {
            var.head = Some(self.owner.clone());
        }
        self.items.push(obj);
    }

    pub fn push_variable(&mut self, name: impl Into<String>, value: ScopeValue) {
        self.push(ScopeObject::Variable(ScopeVariable::new(name, value)));
    }

    /// Remove and return the topmost object if it has the expected kind.
    ///
    /// Fails without mutating the stack when the top has a different kind
    /// or the stack is empty.
    pub fn pop(&mut self, kind: ScopeObjectKind) -> Result<ScopeObject, ScopeError> {
        match self.items.last() {
            None => Err(ScopeError::Empty { expected: kind }),
            Some(top) if top.kind() == kind => Ok(self.items.pop().expect("top exists")),
            Some(top) => Err(ScopeError::TypeMismatch {
                expected: kind,
                found: top.kind(),
            }),
        }
    }

    /// Pop everything above the nearest loop context (loop-local variables
    /// going out of scope) and return the context itself.
    pub fn pop_loop_context(&mut self) -> Result<ScopeLoopContext, ScopeError> {
        let position = self
            .items
            .iter()
            .rposition(|obj| obj.kind() == ScopeObjectKind::LoopContext)
            .ok_or_else(|| ScopeError::NoLoopContext(self.owner.clone()))?;
        self.items.truncate(position + 1);
        match self.items.pop() {
            Some(ScopeObject::Loop(ctx)) => Ok(ctx),
            _ => unreachable!("position points at a loop context"),
        }
    }

    /// Topmost object of the given kind, scanning top-to-bottom.
    pub fn peek(&self, kind: ScopeObjectKind) -> Option<&ScopeObject> {
        self.items.iter().rev().find(|obj| obj.kind() == kind)
    }

    /// All objects of the given kind, nearest scope first.
    pub fn peek_all(&self, kind: ScopeObjectKind) -> Vec<&ScopeObject> {
        self.items
            .iter()
            .rev()
            .filter(|obj| obj.kind() == kind)
            .collect()
    }

    /// Nearest definition of a variable.
    pub fn find_variable(&self, name: &str) -> Option<&ScopeVariable> {
        self.items.iter().rev().find_map(|obj| match obj {
            ScopeObject::Variable(v) if v.name == name => Some(v),
            _ => None,
        })
    }

    /// Active loop contexts, outermost first.
    pub fn loop_contexts(&self) -> Vec<&ScopeLoopContext> {
        self.items
            .iter()
            .filter_map(|obj| match obj {
                ScopeObject::Loop(ctx) => Some(ctx),
                _ => None,
            })
            .collect()
    }

    /// Objects top-to-bottom, nearest scope first.
    pub fn iter_top_down(&self) -> impl Iterator<Item = &ScopeObject> {
        self.items.iter().rev()
    }
}
