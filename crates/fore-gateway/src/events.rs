//! Per-session event bus — tokio broadcast channel carrying outbound
//! protocol messages. The session publishes; any number of observers
//! subscribe, and an observer dropping its receiver never affects the
//! session.

use tokio::sync::broadcast;

use fore_types::protocol::ServerMessage;

const BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Subscribe to receive future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers. Silently drops the
    /// event if nobody is attached.
    pub fn send(&self, event: ServerMessage) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
