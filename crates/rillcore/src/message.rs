use serde::{Deserialize, Serialize};

/// Severity of a node message. Ordered: `Reset < Warning < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    Reset,
    Warning,
    Error,
}

/// A warning or error attached to a node, shown by viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMessage {
    pub kind: MessageKind,
    pub text: String,
}

impl NodeMessage {
    /// The "no message" sentinel.
    pub const NONE: NodeMessage = NodeMessage {
        kind: MessageKind::Reset,
        text: String::new(),
    };

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            text: text.into(),
        }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// Merge two messages: severity is the maximum, texts are joined with a
    /// newline when both are non-empty.
    pub fn merge(&self, other: &NodeMessage) -> NodeMessage {
        if self == other {
            return self.clone();
        }
        let kind = self.kind.max(other.kind);
        let text = match (self.text.is_empty(), other.text.is_empty()) {
            (true, _) => other.text.clone(),
            (_, true) => self.text.clone(),
            _ => format!("{}\n{}", self.text, other.text),
        };
        NodeMessage { kind, text }
    }
}

impl Default for NodeMessage {
    fn default() -> Self {
        Self::NONE
    }
}

/// Progress of a running node. Either field may be absent, meaning
/// "unchanged": observers fold updates with [`NodeProgress::apply`]
/// instead of replacing the whole object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeProgress {
    /// Fraction in `[0, 1]`, if known.
    pub fraction: Option<f64>,
    /// Human-readable progress text, if any.
    pub message: Option<String>,
}

impl NodeProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fraction, clamped into `[0, 1]`.
    pub fn with_fraction(mut self, fraction: f64) -> Self {
        self.fraction = Some(fraction.clamp(0.0, 1.0));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Fold an update in field-by-field; absent fields leave the current
    /// value untouched.
    pub fn apply(&mut self, update: &NodeProgress) {
        if let Some(fraction) = update.fraction {
            self.fraction = Some(fraction.clamp(0.0, 1.0));
        }
        if let Some(message) = &update.message {
            self.message = Some(message.clone());
        }
    }
}
