//! Per-project chat session: a resumable multi-turn state machine
//! wrapping an agent backend, streaming events to attached observers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{info, warn};

use fore_agent::client::AgentBackend;
use fore_types::activity::AgentEvent;
use fore_types::error::ForemanError;
use fore_types::message::{Attachment, ChatMessage};
use fore_types::protocol::{FeatureSummary, ServerMessage};

use crate::events::EventBus;

/// Name of the feature-tracking file the agent maintains in the project
/// working directory.
pub const FEATURE_FILE: &str = "features.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    AwaitingReply,
    Completing,
    Closed,
    Errored,
}

impl SessionState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completing | Self::Closed)
    }

    fn accepts_messages(self) -> bool {
        matches!(self, Self::Active | Self::AwaitingReply)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::AwaitingReply => "awaiting_reply",
            Self::Completing => "completing",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        write!(f, "{s}")
    }
}

pub struct ChatSession {
    project_id: String,
    workdir: PathBuf,
    kickoff_prompt: String,
    backend: Arc<dyn AgentBackend>,
    state: Mutex<SessionState>,
    transcript: Mutex<Vec<ChatMessage>>,
    bus: EventBus,
    /// Serialises backend exchanges: at most one in flight per session,
    /// later sends queue in arrival order.
    exchange: tokio::sync::Mutex<()>,
    /// Feature count when the session began, for the closing summary.
    feature_baseline: Mutex<usize>,
    updated_at: Mutex<DateTime<Utc>>,
}

impl ChatSession {
    pub fn new(
        project_id: impl Into<String>,
        workdir: PathBuf,
        kickoff_prompt: impl Into<String>,
        backend: Arc<dyn AgentBackend>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            workdir,
            kickoff_prompt: kickoff_prompt.into(),
            backend,
            state: Mutex::new(SessionState::Idle),
            transcript: Mutex::new(Vec::new()),
            bus: EventBus::new(),
            exchange: tokio::sync::Mutex::new(()),
            feature_baseline: Mutex::new(0),
            updated_at: Mutex::new(Utc::now()),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.transcript.lock().unwrap().clone()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        *self.updated_at.lock().unwrap()
    }

    /// Attach an observer. Dropping the receiver detaches it without
    /// affecting the session — sessions are resumable by design.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.bus.subscribe()
    }

    /// Begin the session. Idempotent: a second start on a live session
    /// emits a resume notice and spawns nothing. Returns `true` when
    /// this call resumed an existing session.
    pub fn start(self: Arc<Self>) -> Result<bool, ForemanError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                // A failed session is recoverable: a fresh start re-runs
                // the kickoff exchange.
                SessionState::Idle | SessionState::Errored => {
                    *state = SessionState::Active;
                }
                SessionState::Closed | SessionState::Completing => {
                    return Err(ForemanError::InvalidState(format!(
                        "session for {} is {}",
                        self.project_id, *state
                    )));
                }
                _ => {
                    info!(project = %self.project_id, "resuming existing session");
                    self.bus
                        .send(ServerMessage::text("resuming existing session"));
                    return Ok(true);
                }
            }
        }

        *self.feature_baseline.lock().unwrap() = read_features(&self.workdir).len();

        let this = Arc::clone(&self);
        tokio::spawn(async move {
            let prompt = this.kickoff_prompt.clone();
            if this.run_exchange(prompt, None).await.is_ok() {
                let features = read_features(&this.workdir);
                this.bus.send(ServerMessage::FeaturesCreated {
                    count: features.len(),
                    features,
                });
            }
        });
        Ok(false)
    }

    /// Cheap state gate for callers that must not block on the exchange
    /// lock (e.g. the protocol dispatcher).
    pub fn check_can_send(&self) -> Result<(), ForemanError> {
        let state = self.state();
        if state.accepts_messages() {
            Ok(())
        } else {
            Err(ForemanError::InvalidState(format!(
                "cannot send a message while session is {state}"
            )))
        }
    }

    /// Append a user turn and run one backend exchange, streaming events
    /// to observers. Queues behind any in-flight exchange.
    pub async fn send_user_message(
        &self,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<(), ForemanError> {
        self.check_can_send()?;
        self.run_exchange(content, Some(attachments)).await
    }

    /// Transition to Completing, emit the closing summary, then Closed.
    pub fn mark_complete(&self) -> Result<(), ForemanError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.is_terminal() {
                return Err(ForemanError::InvalidState(format!(
                    "session for {} already {}",
                    self.project_id, *state
                )));
            }
            *state = SessionState::Completing;
        }

        let baseline = *self.feature_baseline.lock().unwrap();
        let total = read_features(&self.workdir).len();
        self.bus.send(ServerMessage::ExpansionComplete {
            total_added: total.saturating_sub(baseline),
        });

        *self.state.lock().unwrap() = SessionState::Closed;
        self.touch();
        info!(project = %self.project_id, "session closed");
        Ok(())
    }

    /// Cancel the in-flight exchange, if any.
    pub fn request_stop(&self) {
        self.backend.request_stop();
    }

    async fn run_exchange(
        &self,
        prompt: String,
        user_attachments: Option<Vec<Attachment>>,
    ) -> Result<(), ForemanError> {
        let _guard = self.exchange.lock().await;

        {
            // A completion may have landed while this exchange was queued.
            let mut state = self.state.lock().unwrap();
            if state.is_terminal() {
                return Err(ForemanError::InvalidState(format!(
                    "session for {} is {}",
                    self.project_id, *state
                )));
            }
            *state = SessionState::Active;
        }
        if let Some(attachments) = user_attachments {
            self.transcript
                .lock()
                .unwrap()
                .push(ChatMessage::user(prompt.clone(), attachments));
        }
        self.touch();

        let bus = self.bus.clone();
        let result = self
            .backend
            .run(&prompt, &self.workdir, &mut |event| match event {
                AgentEvent::Line { content } => bus.send(ServerMessage::text(content)),
                AgentEvent::Activity { event } => bus.send(ServerMessage::text(event.to_string())),
                AgentEvent::Completed => {}
            })
            .await;

        match result {
            Ok(reply) => {
                self.transcript
                    .lock()
                    .unwrap()
                    .push(ChatMessage::assistant(reply));
                self.settle(SessionState::AwaitingReply);
                self.touch();
                self.bus.send(ServerMessage::ResponseDone);
                Ok(())
            }
            Err(e) if e.is_cancellation() => {
                // Cancellation is a normal outcome, not a failure.
                info!(project = %self.project_id, "exchange cancelled");
                self.settle(SessionState::AwaitingReply);
                self.touch();
                self.bus.send(ServerMessage::text("run cancelled"));
                self.bus.send(ServerMessage::ResponseDone);
                Ok(())
            }
            Err(e) => {
                warn!(project = %self.project_id, "exchange failed: {e}");
                self.settle(SessionState::Errored);
                self.touch();
                self.bus.send(ServerMessage::error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Set the post-exchange state, unless the session was completed
    /// while the exchange was in flight. Closed stays closed.
    fn settle(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        if !state.is_terminal() {
            *state = next;
        }
    }

    fn touch(&self) {
        *self.updated_at.lock().unwrap() = Utc::now();
    }
}

/// Read the feature-tracking file, tolerating absence and schema drift.
/// Entries may use `title` or `name`; anything else is skipped.
pub fn read_features(workdir: &Path) -> Vec<FeatureSummary> {
    let path = workdir.join(FEATURE_FILE);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
        warn!(file = %path.display(), "feature file is not valid JSON");
        return Vec::new();
    };
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let title = entry
                .get("title")
                .or_else(|| entry.get("name"))?
                .as_str()?
                .to_string();
            let description = entry
                .get("description")
                .and_then(|d| d.as_str())
                .map(String::from);
            Some(FeatureSummary { title, description })
        })
        .collect()
}
