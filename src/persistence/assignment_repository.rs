//! Repository for user-assigned agents

use async_trait::async_trait;
use sqlx::Row;

use crate::domain::Assignment;
use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use crate::persistence::repository::{now, AssignmentRepository, NewAssignment};

pub struct SqlxAssignmentRepository {
    pool: ConnectionPool,
}

impl SqlxAssignmentRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::any::AnyRow) -> Result<Assignment, PersistenceError> {
        Ok(Assignment {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            assistant_id: row.try_get("assistant_id")?,
            app_id: row.try_get("app_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            instruction: row.try_get("instruction")?,
            user_connection_id: row.try_get("user_connection_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl AssignmentRepository for SqlxAssignmentRepository {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Assignment>, PersistenceError> {
        let rows = sqlx::query(&self.pool.sql("SELECT * FROM assignments WHERE user_id = ? ORDER BY id"))
            .bind(user_id)
            .fetch_all(self.pool.pool())
            .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<Assignment>, PersistenceError> {
        let row = sqlx::query(&self.pool.sql("SELECT * FROM assignments WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn create(
        &self,
        user_id: &str,
        assignment: &NewAssignment,
    ) -> Result<Assignment, PersistenceError> {
        let now = now();

        let mut conn = self.pool.pool().acquire().await?;
        sqlx::query(&self.pool.sql(
            "INSERT INTO assignments (user_id, assistant_id, app_id, name, description, instruction,
                                      user_connection_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        ))
        .bind(user_id)
        .bind(assignment.assistant_id)
        .bind(assignment.app_id)
        .bind(&assignment.name)
        .bind(&assignment.description)
        .bind(&assignment.instruction)
        .bind(assignment.user_connection_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        let id = self.pool.last_insert_id(&mut conn).await?;

        Ok(Assignment {
            id,
            user_id: user_id.to_string(),
            assistant_id: assignment.assistant_id,
            app_id: assignment.app_id,
            name: assignment.name.clone(),
            description: assignment.description.clone(),
            instruction: assignment.instruction.clone(),
            user_connection_id: assignment.user_connection_id,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn set_connection(
        &self,
        id: i64,
        user_id: &str,
        connection_id: Option<i64>,
    ) -> Result<Assignment, PersistenceError> {
        let result = sqlx::query(&self.pool.sql(
            "UPDATE assignments SET user_connection_id = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        ))
        .bind(connection_id)
        .bind(now())
        .bind(id)
        .bind(user_id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("assignment", id));
        }

        self.get(id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("assignment", id))
    }

    async fn delete(&self, id: i64, user_id: &str) -> Result<bool, PersistenceError> {
        let result = sqlx::query(&self.pool.sql("DELETE FROM assignments WHERE id = ? AND user_id = ?"))
            .bind(id)
            .bind(user_id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(&self.pool.sql("DELETE FROM chats WHERE assignment_id = ? AND user_id = ?"))
            .bind(id)
            .bind(user_id)
            .execute(self.pool.pool())
            .await?;

        Ok(true)
    }
}
