use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::persistence::DataStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub database: String,
    pub backend: String,
}

pub struct HealthHandler {
    store: DataStore,
    start_time: std::time::Instant,
}

impl HealthHandler {
    pub fn new(store: DataStore) -> Self {
        Self {
            store,
            start_time: std::time::Instant::now(),
        }
    }

    /// Overall status including a database round trip
    pub async fn health(&self) -> impl IntoResponse {
        let database = match self.store.health_check().await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                tracing::warn!("Database health check failed: {}", e);
                "error".to_string()
            }
        };
        let healthy = database == "ok";

        let status = HealthStatus {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            checks: HealthChecks {
                database,
                backend: self.store.backend().name().to_string(),
            },
        };

        let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
        (code, Json(status))
    }

    /// Ready once the database answers and migrations have run
    pub async fn ready(&self) -> impl IntoResponse {
        let migrated = match self.store.migration_status().await {
            Ok(status) => status.iter().all(|m| m.applied),
            Err(e) => {
                tracing::warn!("Readiness check failed: {}", e);
                false
            }
        };

        if migrated {
            (StatusCode::OK, Json(serde_json::json!({
                "status": "ready",
                "message": "Server is ready to accept requests"
            })))
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({
                "status": "not_ready",
                "message": "Database not migrated"
            })))
        }
    }

    pub async fn live(&self) -> impl IntoResponse {
        (StatusCode::OK, Json(serde_json::json!({
            "status": "alive",
            "message": "Server is alive"
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::test_support::memory_store;

    #[tokio::test]
    async fn test_health_endpoint() {
        let handler = HealthHandler::new(memory_store().await);
        let response = handler.health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_after_migrations() {
        let handler = HealthHandler::new(memory_store().await);
        let response = handler.ready().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_live_endpoint() {
        let handler = HealthHandler::new(memory_store().await);
        let response = handler.live().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
