use serde::{Deserialize, Serialize};

/// Category of a classified output line. Each kind carries a fixed emoji
/// so surfaces can render progress without their own lookup table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Reading,
    Writing,
    Editing,
    RunningCommand,
    Searching,
    Thinking,
    Progress,
    Completed,
    Tool,
}

impl ActivityKind {
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Reading => "📖",
            Self::Writing => "✍️",
            Self::Editing => "✏️",
            Self::RunningCommand => "⚡",
            Self::Searching => "🔍",
            Self::Thinking => "🤔",
            Self::Progress => "⏳",
            Self::Completed => "✅",
            Self::Tool => "🔧",
        }
    }
}

/// A short human-readable progress label derived from one raw output
/// line. Produced transiently; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub label: String,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
        }
    }
}

impl std::fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.emoji(), self.label)
    }
}

/// Event stream item produced by an agent run: every raw line is
/// forwarded, classified lines additionally yield an `Activity`, and
/// `Completed` closes the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Line { content: String },
    Activity { event: ActivityEvent },
    Completed,
}
