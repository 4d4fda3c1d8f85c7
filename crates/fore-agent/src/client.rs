//! The backend capability the session state machine depends on.
//!
//! `CliAgent` is the subprocess-backed implementation; a network-API
//! client can slot in behind the same trait without touching sessions.

use std::path::Path;

use async_trait::async_trait;

use fore_types::activity::AgentEvent;
use fore_types::config::AgentConfig;
use fore_types::error::ForemanError;

use crate::activity::ActivityTracker;
use crate::supervisor::ProcessSupervisor;

/// One prompt exchange against a working directory, streaming events to
/// the caller and returning the full transcript.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn run(
        &self,
        prompt: &str,
        workdir: &Path,
        on_event: &mut (dyn FnMut(AgentEvent) + Send),
    ) -> Result<String, ForemanError>;

    /// Best-effort liveness probe.
    async fn is_ready(&self) -> bool;

    /// Cancel the in-flight run, if any.
    fn request_stop(&self);
}

/// Supervises the external coding-agent CLI and translates its output
/// into the event stream: every raw line, deduplicated activity labels,
/// periodic heartbeats, and a final `Completed`.
pub struct CliAgent {
    supervisor: ProcessSupervisor,
}

impl CliAgent {
    pub fn new(agent: AgentConfig) -> Self {
        Self {
            supervisor: ProcessSupervisor::new(agent),
        }
    }
}

#[async_trait]
impl AgentBackend for CliAgent {
    async fn run(
        &self,
        prompt: &str,
        workdir: &Path,
        on_event: &mut (dyn FnMut(AgentEvent) + Send),
    ) -> Result<String, ForemanError> {
        let mut tracker = ActivityTracker::new();
        let transcript = self
            .supervisor
            .run(prompt, workdir, &mut |line| {
                for event in tracker.observe(line) {
                    on_event(event);
                }
            })
            .await?;
        on_event(AgentEvent::Completed);
        Ok(transcript)
    }

    async fn is_ready(&self) -> bool {
        self.supervisor.is_ready().await
    }

    fn request_stop(&self) {
        self.supervisor.request_stop();
    }
}
