//! Typed events published to interested listeners

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    TurnFailed {
        chat_id: i64,
        user_id: String,
        message: String,
    },
    AgentAssigned {
        assignment_id: i64,
        agent_id: i64,
        user_id: String,
    },
    WorkspaceDeleted {
        workspace_id: i64,
        owner_id: String,
    },
    ConnectionChanged {
        connection_id: i64,
        user_id: String,
    },
}

/// Cloneable publisher over a broadcast channel
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish; having no subscribers is not an error
    pub fn publish(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            tracing::trace!("Notification dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}
