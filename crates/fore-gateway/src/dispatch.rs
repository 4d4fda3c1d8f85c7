//! Inbound protocol handling: one JSON object per line in, outbound
//! messages pushed to an mpsc sink the transport drains. Transport
//! agnostic — the CLI runs this over stdin/stdout, a socket server
//! would run the same loop per connection.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use fore_types::protocol::{parse_client_message, ClientMessage, ParsedClient, ServerMessage};

use crate::registry::SessionManager;
use crate::session::ChatSession;

pub struct Dispatcher {
    manager: Arc<SessionManager>,
    project_id: String,
    /// The session this connection already forwards events for, so a
    /// repeated `start` never attaches a second forwarder.
    forwarding: Mutex<Weak<ChatSession>>,
}

impl Dispatcher {
    pub fn new(manager: Arc<SessionManager>, project_id: impl Into<String>) -> Self {
        Self {
            manager,
            project_id: project_id.into(),
            forwarding: Mutex::new(Weak::new()),
        }
    }

    /// Handle one inbound line. Every problem produces an `error` reply;
    /// nothing is silently dropped.
    pub async fn handle_line(&self, line: &str, out: &mpsc::Sender<ServerMessage>) {
        let msg = match parse_client_message(line) {
            ParsedClient::Ok(msg) => msg,
            ParsedClient::UnknownKind(kind) => {
                warn!(kind = %kind, "unknown inbound message kind");
                let _ = out
                    .send(ServerMessage::error(format!(
                        "unknown message kind: {kind}"
                    )))
                    .await;
                return;
            }
            ParsedClient::Malformed(detail) => {
                let _ = out.send(ServerMessage::error(detail)).await;
                return;
            }
        };

        match msg {
            ClientMessage::Ping => {
                let _ = out.send(ServerMessage::Pong).await;
            }
            ClientMessage::Start => self.handle_start(out).await,
            ClientMessage::Message {
                content,
                attachments,
            } => {
                let session = match self.manager.get(&self.project_id).await {
                    Some(s) => s,
                    None => {
                        let _ = out
                            .send(ServerMessage::error(
                                "no active session; send start first",
                            ))
                            .await;
                        return;
                    }
                };
                // Gate on state synchronously so protocol violations get
                // an immediate reply; the exchange itself runs in the
                // background and streams through the session bus.
                if let Err(e) = session.check_can_send() {
                    let _ = out.send(ServerMessage::error(e.to_string())).await;
                    return;
                }
                tokio::spawn(async move {
                    // Exchange failures are already published on the bus.
                    let _ = session.send_user_message(content, attachments).await;
                });
            }
            ClientMessage::Done => {
                let session = match self.manager.get(&self.project_id).await {
                    Some(s) => s,
                    None => {
                        let _ = out
                            .send(ServerMessage::error("no active session to complete"))
                            .await;
                        return;
                    }
                };
                if let Err(e) = session.mark_complete() {
                    let _ = out.send(ServerMessage::error(e.to_string())).await;
                    return;
                }
                self.manager.remove(&self.project_id).await;
            }
        }
    }

    async fn handle_start(&self, out: &mpsc::Sender<ServerMessage>) {
        let (session, created) = match self.manager.get_or_create(&self.project_id).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = out.send(ServerMessage::error(e.to_string())).await;
                return;
            }
        };
        debug!(project = %self.project_id, created, "start requested");

        // Attach this observer before starting so no event is missed.
        // A repeated start on the same session reuses the live forwarder.
        let already_attached = {
            let mut slot = self.forwarding.lock().expect("forwarding lock");
            match slot.upgrade() {
                Some(live) if Arc::ptr_eq(&live, &session) => true,
                _ => {
                    *slot = Arc::downgrade(&session);
                    false
                }
            }
        };
        if !already_attached {
            let mut rx = session.subscribe();
            let forward = out.clone();
            tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    if forward.send(event).await.is_err() {
                        break;
                    }
                }
            });
        }

        if let Err(e) = session.start() {
            let _ = out.send(ServerMessage::error(e.to_string())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects::SingleProject;
    use crate::registry::BackendFactory;
    use async_trait::async_trait;
    use fore_agent::client::AgentBackend;
    use fore_types::activity::AgentEvent;
    use fore_types::error::ForemanError;
    use std::path::Path;

    struct EchoBackend;

    #[async_trait]
    impl AgentBackend for EchoBackend {
        async fn run(
            &self,
            prompt: &str,
            _workdir: &Path,
            on_event: &mut (dyn FnMut(AgentEvent) + Send),
        ) -> Result<String, ForemanError> {
            on_event(AgentEvent::Line {
                content: format!("echo: {prompt}"),
            });
            on_event(AgentEvent::Completed);
            Ok(format!("echo: {prompt}"))
        }

        async fn is_ready(&self) -> bool {
            true
        }

        fn request_stop(&self) {}
    }

    fn dispatcher() -> (Dispatcher, mpsc::Receiver<ServerMessage>, mpsc::Sender<ServerMessage>) {
        let projects = Arc::new(SingleProject::new("demo", std::env::temp_dir()));
        let factory: BackendFactory = Arc::new(|| Arc::new(EchoBackend));
        let manager = Arc::new(SessionManager::new(projects, factory, "kickoff"));
        let (tx, rx) = mpsc::channel(64);
        (Dispatcher::new(manager, "demo"), rx, tx)
    }

    async fn recv(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn ping_pong() {
        let (d, mut rx, tx) = dispatcher();
        d.handle_line(r#"{"type":"ping"}"#, &tx).await;
        assert!(matches!(recv(&mut rx).await, ServerMessage::Pong));
    }

    #[tokio::test]
    async fn unknown_kind_names_the_kind() {
        let (d, mut rx, tx) = dispatcher();
        d.handle_line(r#"{"type":"teleport"}"#, &tx).await;
        match recv(&mut rx).await {
            ServerMessage::Error { content } => assert!(content.contains("teleport")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error_reply() {
        let (d, mut rx, tx) = dispatcher();
        d.handle_line(r#"{"type":"message"}"#, &tx).await;
        assert!(matches!(recv(&mut rx).await, ServerMessage::Error { .. }));
        d.handle_line("not json at all", &tx).await;
        assert!(matches!(recv(&mut rx).await, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn message_before_start_is_an_error() {
        let (d, mut rx, tx) = dispatcher();
        d.handle_line(r#"{"type":"message","content":"hi"}"#, &tx).await;
        match recv(&mut rx).await {
            ServerMessage::Error { content } => assert!(content.contains("start")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_then_message_streams_reply() {
        let (d, mut rx, tx) = dispatcher();
        d.handle_line(r#"{"type":"start"}"#, &tx).await;

        // Kickoff exchange: echoed kickoff line then response_done.
        loop {
            if matches!(recv(&mut rx).await, ServerMessage::ResponseDone) {
                break;
            }
        }

        d.handle_line(r#"{"type":"message","content":"hello"}"#, &tx)
            .await;
        let mut saw_echo = false;
        loop {
            match recv(&mut rx).await {
                ServerMessage::Text { content } if content.contains("echo: hello") => {
                    saw_echo = true;
                }
                ServerMessage::ResponseDone => break,
                _ => {}
            }
        }
        assert!(saw_echo);
    }

    #[tokio::test]
    async fn repeated_start_does_not_duplicate_events() {
        let (d, mut rx, tx) = dispatcher();
        d.handle_line(r#"{"type":"start"}"#, &tx).await;
        loop {
            if matches!(recv(&mut rx).await, ServerMessage::ResponseDone) {
                break;
            }
        }

        // Resume path: same session, same connection.
        d.handle_line(r#"{"type":"start"}"#, &tx).await;
        loop {
            match recv(&mut rx).await {
                ServerMessage::Text { content } if content.contains("resuming") => break,
                _ => {}
            }
        }

        d.handle_line(r#"{"type":"message","content":"hello"}"#, &tx)
            .await;
        let mut echoes = 0;
        loop {
            match recv(&mut rx).await {
                ServerMessage::Text { content } if content.contains("echo: hello") => echoes += 1,
                ServerMessage::ResponseDone => break,
                _ => {}
            }
        }
        // Drain any stragglers a duplicate forwarder would produce.
        while let Ok(Some(msg)) =
            tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await
        {
            if matches!(&msg, ServerMessage::Text { content } if content.contains("echo: hello")) {
                echoes += 1;
            }
        }
        assert_eq!(echoes, 1);
    }

    #[tokio::test]
    async fn done_completes_and_removes() {
        let (d, mut rx, tx) = dispatcher();
        d.handle_line(r#"{"type":"start"}"#, &tx).await;
        loop {
            if matches!(recv(&mut rx).await, ServerMessage::ResponseDone) {
                break;
            }
        }

        d.handle_line(r#"{"type":"done"}"#, &tx).await;
        loop {
            match recv(&mut rx).await {
                ServerMessage::ExpansionComplete { .. } => break,
                _ => {}
            }
        }

        // Session is gone: a new message needs a fresh start.
        d.handle_line(r#"{"type":"message","content":"hi"}"#, &tx).await;
        loop {
            match recv(&mut rx).await {
                ServerMessage::Error { content } => {
                    assert!(content.contains("start"));
                    break;
                }
                _ => {}
            }
        }
    }
}
