//! Classifies raw agent output lines into short progress labels.
//!
//! The classifier is a priority-ordered rule table (pattern + label
//! builder), so new phrasings can be added without touching the session
//! state machine. `ActivityTracker` layers the caller-side contract on
//! top: raw lines are always forwarded, consecutive duplicate labels are
//! suppressed, and long silent stretches get a periodic heartbeat.

use regex::{Captures, Regex};

use fore_types::activity::{ActivityEvent, ActivityKind, AgentEvent};

/// Lines between heartbeats when nothing classifiable shows up.
const HEARTBEAT_EVERY: u64 = 50;

/// Max command length shown in a "running:" label.
const COMMAND_PREVIEW_LEN: usize = 50;

type LabelBuilder = fn(&str, &Captures) -> ActivityEvent;

struct Rule {
    pattern: Regex,
    build: LabelBuilder,
}

pub struct ActivityParser {
    rules: Vec<Rule>,
}

impl ActivityParser {
    pub fn new() -> Self {
        let rule = |pattern: &str, build: LabelBuilder| Rule {
            pattern: Regex::new(pattern).expect("activity rule pattern"),
            build,
        };

        // Priority order; first match wins.
        let rules = vec![
            rule(r"[⏺●]\s*([A-Za-z_]+)", tool_marker),
            rule(
                r"(?i)\breading\s+(?:file\s+)?[`'\x22]?([A-Za-z0-9_./\\-]+)",
                reading_file,
            ),
            rule(
                r"(?i)\b(?:writing|creating)\s+(?:to\s+|file\s+)?[`'\x22]?([A-Za-z0-9_./\\-]+)",
                writing_file,
            ),
            rule(
                r"(?i)\b(?:running|executing)(?:\s+command)?[:\s]\s*[`$]?\s*(\S.*)",
                running_command,
            ),
            // JSON path field takes priority over a plain mention so the
            // intent check below doesn't misread serialized tool input.
            rule(r#""path"\s*:\s*"[^"]*features\.json""#, |_, _| {
                ActivityEvent::new(ActivityKind::Writing, "updating feature list")
            }),
            rule(r"features\.json", feature_file_mention),
            rule(r"(?i)\b(?:thinking|analyzing|planning)\b", |_, _| {
                ActivityEvent::new(ActivityKind::Thinking, "analyzing")
            }),
        ];

        Self { rules }
    }

    /// Classify one raw line. `None` means the line carries no
    /// recognizable signal.
    pub fn parse(&self, line: &str) -> Option<ActivityEvent> {
        for rule in &self.rules {
            if let Some(caps) = rule.pattern.captures(line) {
                return Some((rule.build)(line, &caps));
            }
        }
        None
    }
}

impl Default for ActivityParser {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Label builders ───────────────────────────────────────────────────────────

fn tool_marker(_line: &str, caps: &Captures) -> ActivityEvent {
    let tool = &caps[1];
    match tool.to_ascii_lowercase().as_str() {
        "read" => ActivityEvent::new(ActivityKind::Reading, "reading file"),
        "write" => ActivityEvent::new(ActivityKind::Writing, "writing file"),
        "bash" => ActivityEvent::new(ActivityKind::RunningCommand, "running command"),
        "glob" | "grep" => ActivityEvent::new(ActivityKind::Searching, "searching files"),
        "edit" | "multiedit" => ActivityEvent::new(ActivityKind::Editing, "editing file"),
        "todowrite" => ActivityEvent::new(ActivityKind::Tool, "updating todo list"),
        _ => ActivityEvent::new(ActivityKind::Tool, format!("running `{tool}`")),
    }
}

fn reading_file(_line: &str, caps: &Captures) -> ActivityEvent {
    ActivityEvent::new(
        ActivityKind::Reading,
        format!("reading: {}", short_path(&caps[1])),
    )
}

fn writing_file(_line: &str, caps: &Captures) -> ActivityEvent {
    ActivityEvent::new(
        ActivityKind::Writing,
        format!("writing: {}", short_path(&caps[1])),
    )
}

fn running_command(_line: &str, caps: &Captures) -> ActivityEvent {
    let cmd = caps[1].trim();
    let label = if cmd.chars().count() > COMMAND_PREVIEW_LEN {
        let preview: String = cmd.chars().take(COMMAND_PREVIEW_LEN).collect();
        format!("running: {preview}…")
    } else {
        format!("running: {cmd}")
    };
    ActivityEvent::new(ActivityKind::RunningCommand, label)
}

fn feature_file_mention(line: &str, _caps: &Captures) -> ActivityEvent {
    let lower = line.to_lowercase();
    let write_intent = ["writ", "updat", "sav", "add", "creat", "edit"]
        .iter()
        .any(|w| lower.contains(w));
    if write_intent {
        ActivityEvent::new(ActivityKind::Writing, "updating feature list")
    } else {
        ActivityEvent::new(ActivityKind::Reading, "reading feature list")
    }
}

/// Shorten a path to its last two segments.
fn short_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();
    match segments.as_slice() {
        [] => path.to_string(),
        [one] => (*one).to_string(),
        [.., a, b] => format!("{a}/{b}"),
    }
}

// ─── Caller-side tracker ──────────────────────────────────────────────────────

/// Wraps the parser with the delivery contract: every raw line is
/// forwarded, back-to-back duplicate labels are suppressed, and every
/// 50th unclassified line yields a "processing…" heartbeat.
pub struct ActivityTracker {
    parser: ActivityParser,
    last_label: Option<String>,
    lines_seen: u64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            parser: ActivityParser::new(),
            last_label: None,
            lines_seen: 0,
        }
    }

    /// Process one raw line, returning the events to emit for it, in
    /// order. The raw line itself is always first.
    pub fn observe(&mut self, line: &str) -> Vec<AgentEvent> {
        self.lines_seen += 1;
        let mut out = vec![AgentEvent::Line {
            content: line.to_string(),
        }];

        match self.parser.parse(line) {
            Some(event) => {
                if self.last_label.as_deref() != Some(event.label.as_str()) {
                    self.last_label = Some(event.label.clone());
                    out.push(AgentEvent::Activity { event });
                }
            }
            None => {
                if self.lines_seen % HEARTBEAT_EVERY == 0 {
                    out.push(AgentEvent::Activity {
                        event: ActivityEvent::new(
                            ActivityKind::Progress,
                            format!("processing… ({} lines)", self.lines_seen),
                        ),
                    });
                }
            }
        }
        out
    }

    pub fn lines_seen(&self) -> u64 {
        self.lines_seen
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(ev: Option<ActivityEvent>) -> String {
        ev.expect("expected a classification").label
    }

    #[test]
    fn tool_markers_map_to_fixed_labels() {
        let p = ActivityParser::new();
        assert_eq!(label(p.parse("⏺ Read src/main.rs")), "reading file");
        assert_eq!(label(p.parse("⏺ Bash")), "running command");
        assert_eq!(label(p.parse("● Grep pattern")), "searching files");
        assert_eq!(label(p.parse("⏺ TodoWrite")), "updating todo list");
        assert_eq!(label(p.parse("⏺ WebFetch")), "running `WebFetch`");
    }

    #[test]
    fn read_write_phrasing_shortens_paths() {
        let p = ActivityParser::new();
        assert_eq!(
            label(p.parse("Reading file /home/dev/app/src/index.ts")),
            "reading: src/index.ts"
        );
        assert_eq!(
            label(p.parse("writing components/Button.tsx")),
            "writing: components/Button.tsx"
        );
        assert_eq!(label(p.parse("reading config.toml")), "reading: config.toml");
    }

    #[test]
    fn commands_truncated_at_fifty_chars() {
        let p = ActivityParser::new();
        assert_eq!(label(p.parse("running: npm test")), "running: npm test");
        let long = format!("executing: {}", "x".repeat(80));
        let got = label(p.parse(&long));
        assert!(got.ends_with('…'));
        assert_eq!(got.chars().count(), "running: ".chars().count() + 50 + 1);
    }

    #[test]
    fn feature_file_intent_detection() {
        let p = ActivityParser::new();
        assert_eq!(
            label(p.parse("Updating features.json with new entries")),
            "updating feature list"
        );
        assert_eq!(
            label(p.parse("Looking at features.json for context")),
            "reading feature list"
        );
        assert_eq!(
            label(p.parse(r#"{"path": "/app/features.json", "content": "..."}"#)),
            "updating feature list"
        );
    }

    #[test]
    fn thinking_phrasing_is_analyzing() {
        let p = ActivityParser::new();
        assert_eq!(label(p.parse("Analyzing the codebase structure")), "analyzing");
        assert_eq!(label(p.parse("planning next steps")), "analyzing");
    }

    #[test]
    fn unrecognized_lines_yield_none() {
        let p = ActivityParser::new();
        assert!(p.parse("some ordinary output").is_none());
        assert!(p.parse("").is_none());
    }

    #[test]
    fn tracker_suppresses_consecutive_duplicates_but_forwards_lines() {
        let mut t = ActivityTracker::new();
        let first = t.observe("⏺ Read a.rs");
        assert_eq!(first.len(), 2);
        let second = t.observe("⏺ Read b.rs");
        // Same label again: raw line only.
        assert_eq!(second.len(), 1);
        assert!(matches!(&second[0], AgentEvent::Line { content } if content.contains("b.rs")));
        let third = t.observe("⏺ Bash");
        assert_eq!(third.len(), 2);
    }

    #[test]
    fn heartbeat_every_fifty_silent_lines() {
        let mut t = ActivityTracker::new();
        let mut heartbeats = 0;
        for i in 0..100 {
            for ev in t.observe(&format!("noise {i}")) {
                if let AgentEvent::Activity { event } = ev {
                    assert!(event.label.starts_with("processing…"));
                    heartbeats += 1;
                }
            }
        }
        assert_eq!(heartbeats, 2);
    }

    #[test]
    fn classified_lines_do_not_heartbeat() {
        let mut t = ActivityTracker::new();
        for _ in 0..49 {
            t.observe("noise");
        }
        // 50th line has a clear signal: label, no heartbeat.
        let events = t.observe("⏺ Bash");
        assert_eq!(events.len(), 2);
        assert!(
            matches!(&events[1], AgentEvent::Activity { event } if event.label == "running command")
        );
    }
}
