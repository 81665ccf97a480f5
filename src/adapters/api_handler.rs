//! REST API handlers
//!
//! Every response uses the [`ApiResponse`] envelope. The caller's identity
//! comes from the auth middleware; an `x-workspace-id` header is honored only
//! after membership in that workspace is confirmed.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::access::{
    can_access, candidate_connections, check_binding, filter_catalog, validate_against_fields,
    AccessError,
};
use crate::chat::{ChatError, ChatService, Notification, TurnEvent};
use crate::domain::auth::{AuthContext, Principal};
use crate::domain::{
    Agent, AgentDefinition, Application, ApplicationDefinition, Assignment, AssignmentInput, Chat,
    ChatSummary, Connection, ConnectionInput, Workspace,
};
use crate::persistence::{
    AgentRepository, ApplicationRepository, AssignmentRepository, ChatRepository,
    ConnectionRepository, DataStore, NewAssignment, PersistenceError, WorkspaceRepository,
};

pub const WORKSPACE_HEADER: &str = "x-workspace-id";

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub store: DataStore,
    pub chat: Arc<ChatService>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl ApiResponse<()> {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Persistence(e) => e.status_code(),
            ApiError::Access(e) => e.status_code(),
            ApiError::Chat(e) => e.status_code(),
        }
    }

    fn admin_only() -> Self {
        ApiError::Forbidden("Administrator role required".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

fn created<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

fn deleted(found: bool, entity: &str, id: i64) -> ApiResult<()> {
    if found {
        Ok((StatusCode::OK, Json(ApiResponse::ok())))
    } else {
        Err(PersistenceError::not_found(entity, id).into())
    }
}

// ============================================================================
// Caller identity
// ============================================================================

/// The calling principal, with a membership-checked workspace
pub struct CurrentPrincipal(pub Principal);

#[axum::async_trait]
impl FromRequestParts<ApiState> for CurrentPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let auth = parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)?;

        let header = parts
            .headers
            .get(WORKSPACE_HEADER)
            .map(|v| v.to_str().unwrap_or_default().trim().to_string())
            .filter(|v| !v.is_empty());

        let workspace_id = match header {
            None => None,
            Some(raw) => {
                let id: i64 = raw
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("{} must be an integer", WORKSPACE_HEADER)))?;
                if !state.store.workspaces().is_member(id, &auth.user_id).await? {
                    return Err(ApiError::Forbidden(format!("Not a member of workspace {}", id)));
                }
                Some(id)
            }
        };

        Ok(CurrentPrincipal(auth.principal(workspace_id)))
    }
}

fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.is_admin {
        Ok(())
    } else {
        Err(ApiError::admin_only())
    }
}

// ============================================================================
// Applications
// ============================================================================

/// GET /api/applications
pub async fn list_applications(
    State(state): State<ApiState>,
    CurrentPrincipal(_principal): CurrentPrincipal,
) -> ApiResult<Vec<Application>> {
    ok(state.store.applications().list().await?)
}

/// GET /api/applications/:id
pub async fn get_application(
    State(state): State<ApiState>,
    CurrentPrincipal(_principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Application> {
    let app = state
        .store
        .applications()
        .get(id)
        .await?
        .ok_or_else(|| PersistenceError::not_found("Application", id))?;
    ok(app)
}

/// POST /api/applications
pub async fn create_application(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(def): Json<ApplicationDefinition>,
) -> ApiResult<Application> {
    require_admin(&principal)?;
    if def.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Application name is required".to_string()));
    }
    let app = state.store.applications().create(&def).await?;
    info!("Application '{}' created by {}", app.name, principal.user_id);
    created(app)
}

/// PUT /api/applications/:id
pub async fn update_application(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
    Json(def): Json<ApplicationDefinition>,
) -> ApiResult<Application> {
    require_admin(&principal)?;
    ok(state.store.applications().update(id, &def).await?)
}

/// DELETE /api/applications/:id
pub async fn delete_application(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    require_admin(&principal)?;
    let found = state.store.applications().delete(id).await?;
    deleted(found, "Application", id)
}

// ============================================================================
// Agents
// ============================================================================

/// Agent as shown to end users; code and override configuration stay server-side
#[derive(Debug, Serialize, Deserialize)]
pub struct CatalogAgent {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub is_auth: bool,
    pub app_id: Option<i64>,
    pub kind: String,
}

impl From<&Agent> for CatalogAgent {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            name: agent.name.clone(),
            description: agent.description.clone(),
            icon: agent.icon.clone(),
            is_auth: agent.is_auth,
            app_id: agent.app_id,
            kind: agent.source.kind().to_string(),
        }
    }
}

/// GET /api/catalog - agents visible to the caller
pub async fn list_catalog(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> ApiResult<Vec<CatalogAgent>> {
    let agents = state.store.agents().list().await?;
    let visible = filter_catalog(agents, &principal);
    ok(visible.iter().map(CatalogAgent::from).collect())
}

async fn visible_agent(state: &ApiState, principal: &Principal, id: i64) -> Result<Agent, ApiError> {
    let agent = state
        .store
        .agents()
        .get(id)
        .await?
        .ok_or_else(|| PersistenceError::not_found("Agent", id))?;

    if !can_access(&agent.permission, principal) {
        return Err(AccessError::AccessDenied(format!("Agent '{}' is not available to you", agent.name)).into());
    }
    Ok(agent)
}

/// GET /api/agents/:id
pub async fn get_catalog_agent(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<CatalogAgent> {
    let agent = visible_agent(&state, &principal, id).await?;
    ok(CatalogAgent::from(&agent))
}

/// GET /api/admin/agents - unfiltered, with full definitions
pub async fn list_agents(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> ApiResult<Vec<Agent>> {
    require_admin(&principal)?;
    ok(state.store.agents().list().await?)
}

async fn check_agent_definition(state: &ApiState, def: &AgentDefinition) -> Result<(), ApiError> {
    if def.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Agent name is required".to_string()));
    }

    match def.app_id {
        Some(app_id) => {
            if state.store.applications().get(app_id).await?.is_none() {
                return Err(ApiError::BadRequest(format!("Application {} does not exist", app_id)));
            }
        }
        None if def.is_auth => {
            return Err(ApiError::BadRequest(
                "Agents that require a connection must reference an application".to_string(),
            ));
        }
        None => {}
    }

    crate::bridge::template::parse_override_config(def.override_config.as_ref())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(())
}

/// POST /api/admin/agents
pub async fn create_agent(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(def): Json<AgentDefinition>,
) -> ApiResult<Agent> {
    require_admin(&principal)?;
    check_agent_definition(&state, &def).await?;
    created(state.store.agents().create(&def, &principal.user_id).await?)
}

/// PUT /api/admin/agents/:id
pub async fn update_agent(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
    Json(def): Json<AgentDefinition>,
) -> ApiResult<Agent> {
    require_admin(&principal)?;
    check_agent_definition(&state, &def).await?;
    ok(state.store.agents().update(id, &def).await?)
}

/// DELETE /api/admin/agents/:id
pub async fn delete_agent(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    require_admin(&principal)?;
    let found = state.store.agents().delete(id).await?;
    deleted(found, "Agent", id)
}

// ============================================================================
// Connections
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ConnectionQuery {
    pub app_id: Option<i64>,
}

async fn owned_connection(state: &ApiState, user_id: &str, id: i64) -> Result<Connection, ApiError> {
    state
        .store
        .connections()
        .get(id)
        .await?
        .filter(|c| c.user_id == user_id)
        .ok_or_else(|| PersistenceError::not_found("Connection", id).into())
}

async fn check_connection_input(state: &ApiState, input: &ConnectionInput) -> Result<(), ApiError> {
    if input.connection_name.trim().is_empty() {
        return Err(ApiError::BadRequest("Connection name is required".to_string()));
    }
    let app = state
        .store
        .applications()
        .get(input.app_id)
        .await?
        .ok_or_else(|| PersistenceError::not_found("Application", input.app_id))?;
    validate_against_fields(&input.connection_key, &app)?;
    Ok(())
}

/// GET /api/connections?app_id=
pub async fn list_connections(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(query): Query<ConnectionQuery>,
) -> ApiResult<Vec<Connection>> {
    ok(state
        .store
        .connections()
        .list_for_user(&principal.user_id, query.app_id)
        .await?)
}

/// GET /api/connections/:id
pub async fn get_connection(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Connection> {
    ok(owned_connection(&state, &principal.user_id, id).await?)
}

/// POST /api/connections
pub async fn create_connection(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(input): Json<ConnectionInput>,
) -> ApiResult<Connection> {
    check_connection_input(&state, &input).await?;
    let connection = state.store.connections().create(&principal.user_id, &input).await?;
    state.chat.notifier().publish(Notification::ConnectionChanged {
        connection_id: connection.id,
        user_id: principal.user_id,
    });
    created(connection)
}

/// PUT /api/connections/:id
pub async fn update_connection(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
    Json(input): Json<ConnectionInput>,
) -> ApiResult<Connection> {
    check_connection_input(&state, &input).await?;
    let connection = state
        .store
        .connections()
        .update(id, &principal.user_id, &input)
        .await?;
    state.chat.notifier().publish(Notification::ConnectionChanged {
        connection_id: id,
        user_id: principal.user_id,
    });
    ok(connection)
}

/// DELETE /api/connections/:id
pub async fn delete_connection(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    let found = state.store.connections().delete(id, &principal.user_id).await?;
    if found {
        state.chat.notifier().publish(Notification::ConnectionChanged {
            connection_id: id,
            user_id: principal.user_id,
        });
    }
    deleted(found, "Connection", id)
}

// ============================================================================
// Assignments
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BindConnectionRequest {
    pub connection_id: Option<i64>,
}

async fn owned_assignment(state: &ApiState, user_id: &str, id: i64) -> Result<Assignment, ApiError> {
    state
        .store
        .assignments()
        .get(id)
        .await?
        .filter(|a| a.user_id == user_id)
        .ok_or_else(|| PersistenceError::not_found("Assignment", id).into())
}

/// Load a connection and check it may back `agent` for this user
async fn bindable_connection(
    state: &ApiState,
    agent: &Agent,
    user_id: &str,
    connection_id: i64,
) -> Result<(), ApiError> {
    let connection = state
        .store
        .connections()
        .get(connection_id)
        .await?
        .ok_or_else(|| AccessError::InvalidBinding(format!("connection {} does not exist", connection_id)))?;
    check_binding(agent, &connection, user_id)?;
    Ok(())
}

/// GET /api/assignments
pub async fn list_assignments(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> ApiResult<Vec<Assignment>> {
    ok(state.store.assignments().list_for_user(&principal.user_id).await?)
}

/// GET /api/assignments/:id
pub async fn get_assignment(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Assignment> {
    ok(owned_assignment(&state, &principal.user_id, id).await?)
}

/// POST /api/assignments - adopt a catalog agent
pub async fn create_assignment(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(input): Json<AssignmentInput>,
) -> ApiResult<Assignment> {
    let agent = visible_agent(&state, &principal, input.assistant_id).await?;

    if let Some(connection_id) = input.user_connection_id {
        bindable_connection(&state, &agent, &principal.user_id, connection_id).await?;
    }

    let assignment = state
        .store
        .assignments()
        .create(
            &principal.user_id,
            &NewAssignment {
                assistant_id: agent.id,
                app_id: agent.app_id,
                name: input.name.unwrap_or_else(|| agent.name.clone()),
                description: input.description.unwrap_or_else(|| agent.description.clone()),
                instruction: input.instruction,
                user_connection_id: input.user_connection_id,
            },
        )
        .await?;

    state.chat.notifier().publish(Notification::AgentAssigned {
        assignment_id: assignment.id,
        agent_id: agent.id,
        user_id: principal.user_id,
    });
    created(assignment)
}

/// PUT /api/assignments/:id/connection - bind, rebind or clear
pub async fn bind_assignment_connection(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
    Json(request): Json<BindConnectionRequest>,
) -> ApiResult<Assignment> {
    let assignment = owned_assignment(&state, &principal.user_id, id).await?;

    if let Some(connection_id) = request.connection_id {
        let agent = state
            .store
            .agents()
            .get(assignment.assistant_id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("Agent", assignment.assistant_id))?;
        bindable_connection(&state, &agent, &principal.user_id, connection_id).await?;
    }

    ok(state
        .store
        .assignments()
        .set_connection(id, &principal.user_id, request.connection_id)
        .await?)
}

/// GET /api/assignments/:id/connections - connections that could be bound
pub async fn list_assignment_candidates(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Connection>> {
    let assignment = owned_assignment(&state, &principal.user_id, id).await?;
    let agent = state
        .store
        .agents()
        .get(assignment.assistant_id)
        .await?
        .ok_or_else(|| PersistenceError::not_found("Agent", assignment.assistant_id))?;

    let repo = state.store.connections();
    ok(candidate_connections(&agent, &principal.user_id, repo.as_ref()).await?)
}

/// DELETE /api/assignments/:id
pub async fn delete_assignment(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    let found = state.store.assignments().delete(id, &principal.user_id).await?;
    deleted(found, "Assignment", id)
}

// ============================================================================
// Workspaces
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
}

/// GET /api/workspaces
pub async fn list_workspaces(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> ApiResult<Vec<Workspace>> {
    ok(state.store.workspaces().list_for_user(&principal.user_id).await?)
}

/// POST /api/workspaces
pub async fn create_workspace(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(request): Json<CreateWorkspaceRequest>,
) -> ApiResult<Workspace> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Workspace name is required".to_string()));
    }
    created(state.store.workspaces().create(name, &principal.user_id).await?)
}

/// POST /api/workspaces/:id/members - owner only
pub async fn add_workspace_member(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
    Json(request): Json<AddMemberRequest>,
) -> ApiResult<Workspace> {
    let workspace = state
        .store
        .workspaces()
        .get(id)
        .await?
        .filter(|w| w.has_member(&principal.user_id))
        .ok_or_else(|| PersistenceError::not_found("Workspace", id))?;

    if workspace.owner_id != principal.user_id {
        return Err(ApiError::Forbidden("Only the owner can add members".to_string()));
    }
    if request.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }

    ok(state.store.workspaces().add_member(id, request.user_id.trim()).await?)
}

/// DELETE /api/workspaces/:id - owner only
pub async fn delete_workspace(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    let found = state.store.workspaces().delete(id, &principal.user_id).await?;
    if found {
        state.chat.notifier().publish(Notification::WorkspaceDeleted {
            workspace_id: id,
            owner_id: principal.user_id,
        });
    }
    deleted(found, "Workspace", id)
}

// ============================================================================
// Chats
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub assignment_id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

async fn owned_chat(state: &ApiState, user_id: &str, id: i64) -> Result<Chat, ApiError> {
    state
        .store
        .chats()
        .get(id)
        .await?
        .filter(|c| c.user_id == user_id)
        .ok_or_else(|| PersistenceError::not_found("Chat", id).into())
}

/// GET /api/chats
pub async fn list_chats(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> ApiResult<Vec<ChatSummary>> {
    let chats = state.store.chats().list_for_user(&principal.user_id).await?;
    ok(chats.iter().map(Chat::to_summary).collect())
}

/// GET /api/chats/:id
pub async fn get_chat(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Chat> {
    ok(owned_chat(&state, &principal.user_id, id).await?)
}

/// POST /api/chats
pub async fn create_chat(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(request): Json<CreateChatRequest>,
) -> ApiResult<Chat> {
    let chat = state
        .chat
        .create_chat(&principal, request.assignment_id, request.title.as_deref())
        .await?;
    created(chat)
}

/// DELETE /api/chats/:id
pub async fn delete_chat(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    state.chat.delete_chat(id, &principal).await?;
    deleted(true, "Chat", id)
}

/// POST /api/chats/:id/messages - run a turn, streamed as server-sent events
///
/// Emits one `start` event, then `token` events, then `complete` or `error`.
pub async fn send_message(
    State(state): State<ApiState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<i64>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let handle = state.chat.submit(id, &principal, &request.content).await?;

    let start = Event::default().event("start").json_data(serde_json::json!({
        "chat_id": handle.chat_id,
        "user_message_id": handle.user_message.id,
        "assistant_message_id": handle.assistant_message_id,
    }));

    let events = handle.into_stream().map(|event| {
        let name = match &event {
            TurnEvent::Token { .. } => "token",
            TurnEvent::Complete { .. } => "complete",
            TurnEvent::Error { .. } => "error",
        };
        Event::default().event(name).json_data(&event)
    });

    Ok(Sse::new(stream::once(async move { start }).chain(events)).keep_alive(KeepAlive::default()))
}
