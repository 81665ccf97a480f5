//! # agentdesk
//!
//! Backend for a permissioned catalog of AI agents. Administrators register
//! applications and agents; users store connections (credential sets),
//! adopt agents as assignments, and chat with them over a streaming API.
//!
//! ## Architecture
//!
//! - **domain**: records and policies
//! - **access**: permission evaluation and connection binding
//! - **bridge**: agent invocation (boa sandbox, streaming prediction client)
//! - **chat**: turn engine with a single in-flight turn per chat
//! - **persistence**: sqlx repositories and migrations
//! - **adapters**: axum handlers and middleware
//! - **config**: settings, seed files and validation

pub mod access;
pub mod adapters;
pub mod bridge;
pub mod chat;
pub mod cli;
pub mod config;
pub mod domain;
pub mod persistence;

use crate::adapters::api_handler::{self, ApiState};
use crate::adapters::auth_middleware::{auth_middleware, AuthMiddleware, SharedAuthMiddleware};
use crate::adapters::health_handler::HealthHandler;
use crate::adapters::metrics_handler::{track_requests, MetricsCollector, MetricsHandler};
use crate::chat::ChatService;
use crate::config::Settings;
use crate::persistence::DataStore;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

/// Creates the Axum router with all endpoints configured
///
/// Health endpoints are public. Everything else passes through the auth
/// middleware (which also resolves the caller when auth is disabled) and,
/// when configured, the rate limiter.
pub fn create_app(
    settings: &Settings,
    store: DataStore,
    chat: Arc<ChatService>,
    metrics: Arc<MetricsCollector>,
) -> Router {
    let health_handler = Arc::new(HealthHandler::new(store.clone()));
    let metrics_handler = Arc::new(MetricsHandler::new(metrics.clone()));

    let public_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/ready", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.ready().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }));

    let api_state = ApiState { store, chat };

    let api_router = Router::new()
        // Applications
        .route("/applications", get(api_handler::list_applications).post(api_handler::create_application))
        .route(
            "/applications/:id",
            get(api_handler::get_application)
                .put(api_handler::update_application)
                .delete(api_handler::delete_application),
        )
        // Agents
        .route("/catalog", get(api_handler::list_catalog))
        .route("/agents/:id", get(api_handler::get_catalog_agent))
        .route("/admin/agents", get(api_handler::list_agents).post(api_handler::create_agent))
        .route("/admin/agents/:id", put(api_handler::update_agent).delete(api_handler::delete_agent))
        // Connections
        .route("/connections", get(api_handler::list_connections).post(api_handler::create_connection))
        .route(
            "/connections/:id",
            get(api_handler::get_connection)
                .put(api_handler::update_connection)
                .delete(api_handler::delete_connection),
        )
        // Assignments
        .route("/assignments", get(api_handler::list_assignments).post(api_handler::create_assignment))
        .route("/assignments/:id", get(api_handler::get_assignment).delete(api_handler::delete_assignment))
        .route("/assignments/:id/connection", put(api_handler::bind_assignment_connection))
        .route("/assignments/:id/connections", get(api_handler::list_assignment_candidates))
        // Workspaces
        .route("/workspaces", get(api_handler::list_workspaces).post(api_handler::create_workspace))
        .route("/workspaces/:id", axum::routing::delete(api_handler::delete_workspace))
        .route("/workspaces/:id/members", post(api_handler::add_workspace_member))
        // Chats
        .route("/chats", get(api_handler::list_chats).post(api_handler::create_chat))
        .route("/chats/:id", get(api_handler::get_chat).delete(api_handler::delete_chat))
        .route("/chats/:id/messages", post(api_handler::send_message))
        .with_state(api_state);

    let mut protected_router = Router::new()
        .route("/metrics", get({
            let handler = metrics_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.metrics().await }
            }
        }))
        .nest("/api", api_router)
        .route_layer(axum::middleware::from_fn_with_state(metrics, track_requests));

    if let Some(rate_limit) = &settings.rate_limit {
        if rate_limit.enabled {
            let limiter = crate::adapters::rate_limit::create_limiter(
                rate_limit.requests_per_second,
                rate_limit.burst_size,
            );

            protected_router = protected_router.layer(axum::middleware::from_fn_with_state(
                limiter,
                crate::adapters::rate_limit::rate_limit_middleware,
            ));
        }
    }

    // Always installed: handlers need the caller's identity even with auth disabled
    let auth: SharedAuthMiddleware = Arc::new(AuthMiddleware::new(Arc::new(settings.auth.clone())));
    protected_router = protected_router.layer(axum::middleware::from_fn_with_state(auth, auth_middleware));

    let router = public_router.merge(protected_router);

    router.layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}
