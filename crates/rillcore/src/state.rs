use crate::StateError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a node, independent of execution mechanics.
///
/// The execution engine is the only component that performs transitions,
/// and it always goes through [`NodeState::transition`] so that illegal
/// moves surface as [`StateError`] instead of silent corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Not configured, not executable.
    Idle,
    /// Settings validated, ready to be marked for execution.
    Configured,
    /// Queued for execution before configuration succeeded; waits until
    /// the node configures, then moves on to `MarkedForExec`.
    UnconfiguredMarkedForExec,
    /// Queued for execution, waiting for predecessors and a worker.
    MarkedForExec,
    /// A job is running on a worker right now.
    Executing,
    /// Finished successfully; outputs are published.
    Executed,
}

impl NodeState {
    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        match (self, next) {
            // reset is legal from everywhere except mid-execution, where the
            // job must be canceled first (Executing -> Configured -> Idle)
            (Executing, Idle) => false,
            (_, Idle) => true,

            (Idle, Configured) => true,
            (Idle, UnconfiguredMarkedForExec) => true,
            (Configured, Configured) => true,
            (Configured, MarkedForExec) => true,
            (UnconfiguredMarkedForExec, MarkedForExec) => true,
            (MarkedForExec, Executing) => true,
            // queued job canceled before it started
            (MarkedForExec, Configured) => true,
            (Executing, Executed) => true,
            // finish-failure and cancellation keep the configuration
            (Executing, Configured) => true,
            _ => false,
        }
    }

    /// Perform a checked transition.
    pub fn transition(self, next: NodeState) -> Result<NodeState, StateError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StateError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_executing(self) -> bool {
        self == NodeState::Executing
    }

    pub fn is_executed(self) -> bool {
        self == NodeState::Executed
    }

    /// Queued for execution in either configured or unconfigured form.
    pub fn is_marked(self) -> bool {
        matches!(
            self,
            NodeState::MarkedForExec | NodeState::UnconfiguredMarkedForExec
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Idle => "IDLE",
            NodeState::Configured => "CONFIGURED",
            NodeState::UnconfiguredMarkedForExec => "UNCONFIGURED_MARKEDFOREXEC",
            NodeState::MarkedForExec => "MARKEDFOREXEC",
            NodeState::Executing => "EXECUTING",
            NodeState::Executed => "EXECUTED",
        };
        write!(f, "{}", name)
    }
}
