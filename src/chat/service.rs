//! Chat turns
//!
//! A turn appends the user's message, then an assistant message that grows
//! as tokens arrive from the bridge. Only one turn per chat may be in flight;
//! a second submit is rejected without touching the transcript. Failures are
//! written into the assistant message as `Error: ...` and published as a
//! [`Notification::TurnFailed`].

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use super::error::ChatError;
use super::notification::{Notification, Notifier};
use crate::access::{can_access, resolve_connection, AccessError, VariableMap};
use crate::adapters::metrics_handler::MetricsCollector;
use crate::bridge::{BridgeChunk, BridgeResult, BridgeStream, InvocationBridge, InvocationContext, ScriptUser};
use crate::domain::auth::Principal;
use crate::domain::{Agent, Chat, ChatMessage};
use crate::persistence::{
    AgentRepository, AssignmentRepository, ChatRepository, ConnectionRepository, DataStore,
};

/// Progress of a turn, in order; the last event is `Complete` or `Error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Token { content: String },
    Complete { content: String },
    Error { message: String },
}

/// A started turn
pub struct TurnHandle {
    pub chat_id: i64,
    pub user_message: ChatMessage,
    pub assistant_message_id: String,
    events: mpsc::Receiver<TurnEvent>,
}

impl TurnHandle {
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    /// Wait for the turn to end and return its terminal event
    pub async fn finish(mut self) -> Option<TurnEvent> {
        let mut last = None;
        while let Some(event) = self.events.recv().await {
            last = Some(event);
        }
        last
    }

    pub fn into_stream(self) -> ReceiverStream<TurnEvent> {
        ReceiverStream::new(self.events)
    }
}

type InFlight = Arc<Mutex<HashSet<i64>>>;

/// Marks a chat busy until dropped
struct TurnGuard {
    chat_id: i64,
    in_flight: InFlight,
}

impl TurnGuard {
    fn acquire(in_flight: &InFlight, chat_id: i64) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(chat_id) {
            return None;
        }
        Some(Self {
            chat_id,
            in_flight: in_flight.clone(),
        })
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.chat_id);
    }
}

pub struct ChatService {
    chats: Arc<dyn ChatRepository>,
    assignments: Arc<dyn AssignmentRepository>,
    agents: Arc<dyn AgentRepository>,
    connections: Arc<dyn ConnectionRepository>,
    bridge: Arc<InvocationBridge>,
    notifier: Notifier,
    metrics: Option<Arc<MetricsCollector>>,
    in_flight: InFlight,
}

impl ChatService {
    pub fn new(store: &DataStore, bridge: Arc<InvocationBridge>, notifier: Notifier) -> Self {
        Self {
            chats: store.chats().clone(),
            assignments: store.assignments().clone(),
            agents: store.agents().clone(),
            connections: store.connections().clone(),
            bridge,
            notifier,
            metrics: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn is_busy(&self, chat_id: i64) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&chat_id)
    }

    /// Open a chat on one of the principal's assignments
    pub async fn create_chat(
        &self,
        principal: &Principal,
        assignment_id: i64,
        title: Option<&str>,
    ) -> Result<Chat, ChatError> {
        let assignment = self
            .assignments
            .get(assignment_id)
            .await?
            .filter(|a| a.user_id == principal.user_id)
            .ok_or_else(|| ChatError::not_found("Assignment", assignment_id))?;

        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&assignment.name);

        Ok(self.chats.create(&principal.user_id, assignment.id, title).await?)
    }

    /// Delete one of the principal's chats; refused while a turn is streaming
    pub async fn delete_chat(&self, chat_id: i64, principal: &Principal) -> Result<(), ChatError> {
        self.chats
            .get(chat_id)
            .await?
            .filter(|c| c.user_id == principal.user_id)
            .ok_or_else(|| ChatError::not_found("Chat", chat_id))?;

        // Held across the delete so no turn can start in between
        let _guard = TurnGuard::acquire(&self.in_flight, chat_id).ok_or(ChatError::TurnInProgress(chat_id))?;

        if !self.chats.delete(chat_id, &principal.user_id).await? {
            return Err(ChatError::not_found("Chat", chat_id));
        }
        info!(chat_id, "Chat deleted");
        Ok(())
    }

    /// Start a turn in `chat_id` with the user's `text`
    pub async fn submit(
        &self,
        chat_id: i64,
        principal: &Principal,
        text: &str,
    ) -> Result<TurnHandle, ChatError> {
        let guard = TurnGuard::acquire(&self.in_flight, chat_id).ok_or(ChatError::TurnInProgress(chat_id))?;

        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let mut chat = self
            .chats
            .get(chat_id)
            .await?
            .filter(|c| c.user_id == principal.user_id)
            .ok_or_else(|| ChatError::not_found("Chat", chat_id))?;

        let assignment = self
            .assignments
            .get(chat.assignment_id)
            .await?
            .filter(|a| a.user_id == principal.user_id)
            .ok_or_else(|| ChatError::not_found("Assignment", chat.assignment_id))?;

        let agent = self
            .agents
            .get(assignment.assistant_id)
            .await?
            .ok_or_else(|| ChatError::not_found("Agent", assignment.assistant_id))?;

        if !can_access(&agent.permission, principal) {
            return Err(AccessError::AccessDenied(format!(
                "agent '{}' is not available to you",
                agent.name
            ))
            .into());
        }

        let vars = match resolve_connection(&agent, &assignment, &principal.user_id, self.connections.as_ref()).await {
            Some(vars) => vars,
            None if agent.is_auth => {
                return Err(AccessError::ConnectionRequired(format!(
                    "select a connection for agent '{}'",
                    agent.name
                ))
                .into())
            }
            None => VariableMap::new(),
        };

        let user_message = ChatMessage::user(text);
        chat.messages.push(user_message.clone());
        self.chats.save_messages(chat.id, &chat.messages).await?;

        let assistant_message = ChatMessage::assistant("");
        let assistant_message_id = assistant_message.id.clone();
        chat.messages.push(assistant_message);

        let ctx = InvocationContext {
            user: ScriptUser {
                id: principal.user_id.clone(),
                email: principal.email.clone(),
            },
            session_id: chat.id.to_string(),
            instruction: assignment.instruction.clone(),
        };
        let stream = self.bridge.invoke(&agent, text, &vars, &ctx);

        info!(chat_id, agent_id = agent.id, mode = agent.source.kind(), "Turn started");
        if let Some(metrics) = &self.metrics {
            metrics.turns_total.with_label_values(&[agent.source.kind()]).inc();
        }

        let (events, receiver) = mpsc::channel(64);
        let turn = Turn {
            chats: self.chats.clone(),
            notifier: self.notifier.clone(),
            metrics: self.metrics.clone(),
            events,
            chat,
            agent,
            user_id: principal.user_id.clone(),
        };
        tokio::spawn(turn.drive(stream, guard));

        Ok(TurnHandle {
            chat_id,
            user_message,
            assistant_message_id,
            events: receiver,
        })
    }
}

/// State owned by the task driving one turn
struct Turn {
    chats: Arc<dyn ChatRepository>,
    notifier: Notifier,
    metrics: Option<Arc<MetricsCollector>>,
    events: mpsc::Sender<TurnEvent>,
    chat: Chat,
    agent: Agent,
    user_id: String,
}

impl Turn {
    async fn drive(mut self, stream: BridgeResult<BridgeStream>, guard: TurnGuard) {
        let metrics = self.metrics.clone();
        if let Some(metrics) = &metrics {
            metrics.turns_in_flight.inc();
        }

        let outcome = match stream {
            Ok(stream) => self.consume(stream).await,
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(()) => self.complete().await,
            Err(message) => self.fail(message).await,
        }

        if let Some(metrics) = &metrics {
            metrics.turns_in_flight.dec();
        }
        drop(guard);
    }

    async fn consume(&mut self, mut stream: BridgeStream) -> Result<(), String> {
        while let Some(item) = stream.next().await {
            match item {
                Ok(BridgeChunk::Token(token)) => {
                    if let Some(assistant) = self.chat.messages.last_mut() {
                        assistant.content.push_str(&token);
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.stream_tokens.inc();
                    }
                    // The listener may be gone; the turn still runs to the end
                    let _ = self.events.send(TurnEvent::Token { content: token }).await;
                }
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }

    async fn complete(self) {
        let content = self
            .chat
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        match self.chats.save_messages(self.chat.id, &self.chat.messages).await {
            Ok(()) => {
                info!(chat_id = self.chat.id, chars = content.len(), "Turn complete");
                let _ = self.events.send(TurnEvent::Complete { content }).await;
            }
            Err(e) => {
                error!(chat_id = self.chat.id, error = %e, "Failed to save transcript");
                let _ = self
                    .events
                    .send(TurnEvent::Error {
                        message: format!("Failed to save transcript: {}", e),
                    })
                    .await;
            }
        }
    }

    async fn fail(mut self, message: String) {
        warn!(chat_id = self.chat.id, agent_id = self.agent.id, error = %message, "Turn failed");

        if let Some(assistant) = self.chat.messages.last_mut() {
            if assistant.content.is_empty() {
                assistant.content = format!("Error: {}", message);
            } else {
                assistant.content.push_str(&format!("\n\nError: {}", message));
            }
        }

        if let Err(e) = self.chats.save_messages(self.chat.id, &self.chat.messages).await {
            error!(chat_id = self.chat.id, error = %e, "Failed to save transcript");
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .turn_errors
                .with_label_values(&[self.agent.source.kind()])
                .inc();
        }

        self.notifier.publish(Notification::TurnFailed {
            chat_id: self.chat.id,
            user_id: self.user_id.clone(),
            message: message.clone(),
        });
        let _ = self.events.send(TurnEvent::Error { message }).await;
    }
}
