//! Repository for the application catalog

use async_trait::async_trait;
use sqlx::Row;

use crate::domain::{Application, ApplicationDefinition};
use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use crate::persistence::repository::{flag, now, ApplicationRepository};

/// SQLx-based implementation of ApplicationRepository
pub struct SqlxApplicationRepository {
    pool: ConnectionPool,
}

impl SqlxApplicationRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::any::AnyRow) -> Result<Application, PersistenceError> {
        let fields_str: String = row.try_get("fields")?;
        let auth_required: i64 = row.try_get("auth_required")?;

        Ok(Application {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            logo: row.try_get("logo")?,
            auth_required: auth_required != 0,
            fields: serde_json::from_str(&fields_str)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn count_references(&self, table: &str, id: i64) -> Result<i64, PersistenceError> {
        let sql = format!("SELECT COUNT(*) AS count FROM {} WHERE app_id = ?", table);
        let row = sqlx::query(&self.pool.sql(&sql))
            .bind(id)
            .fetch_one(self.pool.pool())
            .await?;
        Ok(row.try_get("count")?)
    }
}

#[async_trait]
impl ApplicationRepository for SqlxApplicationRepository {
    async fn list(&self) -> Result<Vec<Application>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM applications ORDER BY name")
            .fetch_all(self.pool.pool())
            .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<Application>, PersistenceError> {
        let row = sqlx::query(&self.pool.sql("SELECT * FROM applications WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Application>, PersistenceError> {
        let row = sqlx::query(&self.pool.sql("SELECT * FROM applications WHERE name = ?"))
            .bind(name)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn create(&self, def: &ApplicationDefinition) -> Result<Application, PersistenceError> {
        if self.get_by_name(&def.name).await?.is_some() {
            return Err(PersistenceError::Duplicate {
                entity_type: "application".to_string(),
                name: def.name.clone(),
            });
        }

        let now = now();
        let fields = serde_json::to_string(&def.fields)?;

        let mut conn = self.pool.pool().acquire().await?;
        sqlx::query(&self.pool.sql(
            "INSERT INTO applications (name, description, logo, auth_required, fields, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        ))
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.logo)
        .bind(flag(def.auth_required))
        .bind(&fields)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        let id = self.pool.last_insert_id(&mut conn).await?;

        tracing::debug!("Created application '{}' ({})", def.name, id);

        Ok(Application {
            id,
            name: def.name.clone(),
            description: def.description.clone(),
            logo: def.logo.clone(),
            auth_required: def.auth_required,
            fields: def.fields.clone(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn update(
        &self,
        id: i64,
        def: &ApplicationDefinition,
    ) -> Result<Application, PersistenceError> {
        if let Some(existing) = self.get_by_name(&def.name).await? {
            if existing.id != id {
                return Err(PersistenceError::Duplicate {
                    entity_type: "application".to_string(),
                    name: def.name.clone(),
                });
            }
        }

        let fields = serde_json::to_string(&def.fields)?;
        let result = sqlx::query(&self.pool.sql(
            "UPDATE applications SET name = ?, description = ?, logo = ?, auth_required = ?, fields = ?, updated_at = ?
             WHERE id = ?",
        ))
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.logo)
        .bind(flag(def.auth_required))
        .bind(&fields)
        .bind(now())
        .bind(id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("application", id));
        }

        self.get(id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("application", id))
    }

    async fn delete(&self, id: i64) -> Result<bool, PersistenceError> {
        for table in ["agents", "connections"] {
            if self.count_references(table, id).await? > 0 {
                return Err(PersistenceError::Conflict {
                    entity_type: "application".to_string(),
                    identifier: id.to_string(),
                    referenced_by: table.to_string(),
                });
            }
        }

        let result = sqlx::query(&self.pool.sql("DELETE FROM applications WHERE id = ?"))
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
