//! Process-wide session registry: at most one live `ChatSession` per
//! project identifier, with atomic get-or-create under one lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use fore_agent::client::{AgentBackend, CliAgent};
use fore_types::config::AgentConfig;
use fore_types::error::ForemanError;

use crate::projects::ProjectRegistry;
use crate::session::ChatSession;

/// Produces a fresh backend per session so one session's stop request
/// can never cancel another's run.
pub type BackendFactory = Arc<dyn Fn() -> Arc<dyn AgentBackend> + Send + Sync>;

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<ChatSession>>>,
    projects: Arc<dyn ProjectRegistry>,
    make_backend: BackendFactory,
    kickoff_prompt: String,
}

impl SessionManager {
    pub fn new(
        projects: Arc<dyn ProjectRegistry>,
        make_backend: BackendFactory,
        kickoff_prompt: impl Into<String>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            projects,
            make_backend,
            kickoff_prompt: kickoff_prompt.into(),
        }
    }

    /// Manager backed by the external agent CLI.
    pub fn for_cli(
        projects: Arc<dyn ProjectRegistry>,
        agent: AgentConfig,
        kickoff_prompt: impl Into<String>,
    ) -> Self {
        let factory: BackendFactory =
            Arc::new(move || Arc::new(CliAgent::new(agent.clone())) as Arc<dyn AgentBackend>);
        Self::new(projects, factory, kickoff_prompt)
    }

    pub async fn get(&self, project_id: &str) -> Option<Arc<ChatSession>> {
        self.sessions.lock().await.get(project_id).cloned()
    }

    /// Resolve the session for `project_id`, creating it if absent.
    /// Returns the session and whether this call created it. Two
    /// concurrent calls for the same project always converge on one
    /// session — the map lock spans the whole check-and-insert.
    pub async fn get_or_create(
        &self,
        project_id: &str,
    ) -> Result<(Arc<ChatSession>, bool), ForemanError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(project_id) {
            return Ok((Arc::clone(existing), false));
        }

        if !self.projects.exists(project_id) {
            return Err(ForemanError::NotFound(project_id.to_string()));
        }
        let workdir = self
            .projects
            .path(project_id)
            .ok_or_else(|| ForemanError::NotFound(project_id.to_string()))?;

        let session = Arc::new(ChatSession::new(
            project_id,
            workdir,
            self.kickoff_prompt.clone(),
            (self.make_backend)(),
        ));
        sessions.insert(project_id.to_string(), Arc::clone(&session));
        info!(project = project_id, "session created");
        Ok((session, true))
    }

    /// Explicit teardown. Never triggered by observer disconnects.
    pub async fn remove(&self, project_id: &str) -> Option<Arc<ChatSession>> {
        let removed = self.sessions.lock().await.remove(project_id);
        if removed.is_some() {
            info!(project = project_id, "session removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects::SingleProject;
    use async_trait::async_trait;
    use fore_types::activity::AgentEvent;
    use std::path::Path;

    struct NoopBackend;

    #[async_trait]
    impl AgentBackend for NoopBackend {
        async fn run(
            &self,
            _prompt: &str,
            _workdir: &Path,
            on_event: &mut (dyn FnMut(AgentEvent) + Send),
        ) -> Result<String, ForemanError> {
            on_event(AgentEvent::Completed);
            Ok(String::new())
        }

        async fn is_ready(&self) -> bool {
            true
        }

        fn request_stop(&self) {}
    }

    fn manager() -> Arc<SessionManager> {
        let projects = Arc::new(SingleProject::new("demo", std::env::temp_dir()));
        let factory: BackendFactory = Arc::new(|| Arc::new(NoopBackend));
        Arc::new(SessionManager::new(projects, factory, "kickoff"))
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let m = manager();
        let err = match m.get_or_create("nope").await {
            Err(e) => e,
            Ok(_) => panic!("unknown project must not create a session"),
        };
        assert!(matches!(err, ForemanError::NotFound(_)));
    }

    #[tokio::test]
    async fn one_session_per_project() {
        let m = manager();
        let (first, created) = m.get_or_create("demo").await.unwrap();
        assert!(created);
        let (second, created) = m.get_or_create("demo").await.unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(m.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_creates_converge() {
        let m = manager();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let m = Arc::clone(&m);
            handles.push(tokio::spawn(
                async move { m.get_or_create("demo").await },
            ));
        }
        let mut created_count = 0;
        for h in handles {
            let (_, created) = h.await.unwrap().unwrap();
            if created {
                created_count += 1;
            }
        }
        assert_eq!(created_count, 1);
        assert_eq!(m.len().await, 1);
    }

    #[tokio::test]
    async fn remove_is_explicit() {
        let m = manager();
        let (session, _) = m.get_or_create("demo").await.unwrap();
        // Observer attach/detach leaves the registry untouched.
        drop(session.subscribe());
        assert_eq!(m.len().await, 1);
        assert!(m.remove("demo").await.is_some());
        assert!(m.is_empty().await);
        assert!(m.remove("demo").await.is_none());
    }
}
