//! Repository for the agent catalog

use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;

use crate::domain::{Agent, AgentDefinition};
use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use crate::persistence::repository::{flag, now, AgentRepository};

/// SQLx-based implementation of AgentRepository
///
/// `source`, `permission`, `response_adapter` and `override_config` are
/// stored as JSON text.
pub struct SqlxAgentRepository {
    pool: ConnectionPool,
}

impl SqlxAgentRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::any::AnyRow) -> Result<Agent, PersistenceError> {
        let source: String = row.try_get("source")?;
        let permission: String = row.try_get("permission")?;
        let adapter: String = row.try_get("response_adapter")?;
        let override_config: Option<String> = row.try_get("override_config")?;
        let is_auth: i64 = row.try_get("is_auth")?;

        Ok(Agent {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            icon: row.try_get("icon")?,
            is_auth: is_auth != 0,
            source: serde_json::from_str(&source)?,
            override_config: override_config
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()?,
            app_id: row.try_get("app_id")?,
            permission: serde_json::from_str(&permission)?,
            response_adapter: serde_json::from_str(&adapter)?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn ensure_unique_name(&self, name: &str, id: Option<i64>) -> Result<(), PersistenceError> {
        match self.get_by_name(name).await? {
            Some(existing) if Some(existing.id) != id => Err(PersistenceError::Duplicate {
                entity_type: "agent".to_string(),
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

struct EncodedDefinition {
    source: String,
    override_config: Option<String>,
    permission: String,
    response_adapter: String,
}

impl EncodedDefinition {
    fn new(def: &AgentDefinition) -> Result<Self, PersistenceError> {
        Ok(Self {
            source: serde_json::to_string(&def.source)?,
            override_config: def
                .override_config
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            permission: serde_json::to_string(&def.permission)?,
            response_adapter: serde_json::to_string(&def.response_adapter)?,
        })
    }
}

#[async_trait]
impl AgentRepository for SqlxAgentRepository {
    async fn list(&self) -> Result<Vec<Agent>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY id")
            .fetch_all(self.pool.pool())
            .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<Agent>, PersistenceError> {
        let row = sqlx::query(&self.pool.sql("SELECT * FROM agents WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Agent>, PersistenceError> {
        let row = sqlx::query(&self.pool.sql("SELECT * FROM agents WHERE name = ?"))
            .bind(name)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn create(
        &self,
        def: &AgentDefinition,
        created_by: &str,
    ) -> Result<Agent, PersistenceError> {
        self.ensure_unique_name(&def.name, None).await?;

        let encoded = EncodedDefinition::new(def)?;
        let now = now();

        let mut conn = self.pool.pool().acquire().await?;
        sqlx::query(&self.pool.sql(
            "INSERT INTO agents (name, description, icon, is_auth, source, override_config, app_id,
                                 permission, response_adapter, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        ))
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.icon)
        .bind(flag(def.is_auth))
        .bind(&encoded.source)
        .bind(&encoded.override_config)
        .bind(def.app_id)
        .bind(&encoded.permission)
        .bind(&encoded.response_adapter)
        .bind(created_by)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        let id = self.pool.last_insert_id(&mut conn).await?;

        tracing::info!("Created {} agent '{}' ({})", def.source.kind(), def.name, id);

        Ok(Agent {
            id,
            name: def.name.clone(),
            description: def.description.clone(),
            icon: def.icon.clone(),
            is_auth: def.is_auth,
            source: def.source.clone(),
            override_config: def.override_config.clone(),
            app_id: def.app_id,
            permission: def.permission.clone(),
            response_adapter: def.response_adapter.clone(),
            created_by: created_by.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn update(&self, id: i64, def: &AgentDefinition) -> Result<Agent, PersistenceError> {
        self.ensure_unique_name(&def.name, Some(id)).await?;

        let encoded = EncodedDefinition::new(def)?;
        let result = sqlx::query(&self.pool.sql(
            "UPDATE agents SET name = ?, description = ?, icon = ?, is_auth = ?, source = ?,
                               override_config = ?, app_id = ?, permission = ?, response_adapter = ?,
                               updated_at = ?
             WHERE id = ?",
        ))
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.icon)
        .bind(flag(def.is_auth))
        .bind(&encoded.source)
        .bind(&encoded.override_config)
        .bind(def.app_id)
        .bind(&encoded.permission)
        .bind(&encoded.response_adapter)
        .bind(now())
        .bind(id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("agent", id));
        }

        self.get(id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("agent", id))
    }

    async fn delete(&self, id: i64) -> Result<bool, PersistenceError> {
        let result = sqlx::query(&self.pool.sql("DELETE FROM agents WHERE id = ?"))
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
