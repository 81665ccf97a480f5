//! Repository traits for the persistence layer

use crate::domain::{
    Agent, AgentDefinition, Application, ApplicationDefinition, Assignment, Chat, ChatMessage,
    Connection, ConnectionInput, Workspace,
};
use crate::persistence::error::PersistenceError;
use async_trait::async_trait;

/// Fields of a new assignment, resolved from the catalog agent
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub assistant_id: i64,
    pub app_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub instruction: String,
    pub user_connection_id: Option<i64>,
}

/// Admin-managed application catalog
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Application>, PersistenceError>;

    async fn get(&self, id: i64) -> Result<Option<Application>, PersistenceError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Application>, PersistenceError>;

    async fn create(&self, def: &ApplicationDefinition) -> Result<Application, PersistenceError>;

    async fn update(
        &self,
        id: i64,
        def: &ApplicationDefinition,
    ) -> Result<Application, PersistenceError>;

    /// Fails with `Conflict` while any agent or connection references the application
    async fn delete(&self, id: i64) -> Result<bool, PersistenceError>;
}

/// Admin-managed agent catalog
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Agent>, PersistenceError>;

    async fn get(&self, id: i64) -> Result<Option<Agent>, PersistenceError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Agent>, PersistenceError>;

    async fn create(
        &self,
        def: &AgentDefinition,
        created_by: &str,
    ) -> Result<Agent, PersistenceError>;

    async fn update(&self, id: i64, def: &AgentDefinition) -> Result<Agent, PersistenceError>;

    async fn delete(&self, id: i64) -> Result<bool, PersistenceError>;
}

/// Per-user credential store. Listing and writes are always owner-scoped.
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn list_for_user(
        &self,
        user_id: &str,
        app_id: Option<i64>,
    ) -> Result<Vec<Connection>, PersistenceError>;

    /// Unscoped lookup; callers check ownership
    async fn get(&self, id: i64) -> Result<Option<Connection>, PersistenceError>;

    async fn create(
        &self,
        user_id: &str,
        input: &ConnectionInput,
    ) -> Result<Connection, PersistenceError>;

    async fn update(
        &self,
        id: i64,
        user_id: &str,
        input: &ConnectionInput,
    ) -> Result<Connection, PersistenceError>;

    /// Deletes the connection and unbinds any assignment that pointed at it
    async fn delete(&self, id: i64, user_id: &str) -> Result<bool, PersistenceError>;
}

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Assignment>, PersistenceError>;

    async fn get(&self, id: i64) -> Result<Option<Assignment>, PersistenceError>;

    async fn create(
        &self,
        user_id: &str,
        assignment: &NewAssignment,
    ) -> Result<Assignment, PersistenceError>;

    async fn set_connection(
        &self,
        id: i64,
        user_id: &str,
        connection_id: Option<i64>,
    ) -> Result<Assignment, PersistenceError>;

    /// Deletes the assignment together with its chats
    async fn delete(&self, id: i64, user_id: &str) -> Result<bool, PersistenceError>;
}

#[async_trait]
pub trait WorkspaceRepository: Send + Sync {
    /// Workspaces the user owns or belongs to
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Workspace>, PersistenceError>;

    async fn get(&self, id: i64) -> Result<Option<Workspace>, PersistenceError>;

    async fn create(&self, name: &str, owner_id: &str) -> Result<Workspace, PersistenceError>;

    async fn add_member(&self, id: i64, user_id: &str) -> Result<Workspace, PersistenceError>;

    async fn is_member(&self, id: i64, user_id: &str) -> Result<bool, PersistenceError>;

    /// Only the owner may delete
    async fn delete(&self, id: i64, owner_id: &str) -> Result<bool, PersistenceError>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Chat>, PersistenceError>;

    async fn get(&self, id: i64) -> Result<Option<Chat>, PersistenceError>;

    async fn create(
        &self,
        user_id: &str,
        assignment_id: i64,
        title: &str,
    ) -> Result<Chat, PersistenceError>;

    /// Replace the stored transcript
    async fn save_messages(
        &self,
        id: i64,
        messages: &[ChatMessage],
    ) -> Result<(), PersistenceError>;

    async fn delete(&self, id: i64, user_id: &str) -> Result<bool, PersistenceError>;
}

/// RFC 3339 timestamp used for all `created_at`/`updated_at` columns
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Booleans are stored as integers for portability across `Any` backends
pub(crate) fn flag(value: bool) -> i64 {
    i64::from(value)
}
