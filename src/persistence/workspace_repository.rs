//! Repository for workspaces and their members

use async_trait::async_trait;
use sqlx::Row;

use crate::domain::Workspace;
use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use crate::persistence::repository::{now, WorkspaceRepository};

pub struct SqlxWorkspaceRepository {
    pool: ConnectionPool,
}

impl SqlxWorkspaceRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    async fn members(&self, id: i64) -> Result<Vec<String>, PersistenceError> {
        let rows = sqlx::query(&self.pool.sql(
            "SELECT user_id FROM workspace_members WHERE workspace_id = ? ORDER BY user_id",
        ))
        .bind(id)
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("user_id").map_err(Into::into))
            .collect()
    }

    /// Workspace columns without members
    fn parse_row(row: &sqlx::any::AnyRow) -> Result<Workspace, PersistenceError> {
        Ok(Workspace {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            owner_id: row.try_get("owner_id")?,
            members: Vec::new(),
            created_at: row.try_get("created_at")?,
        })
    }

    async fn hydrate(&self, mut workspace: Workspace) -> Result<Workspace, PersistenceError> {
        workspace.members = self.members(workspace.id).await?;
        Ok(workspace)
    }
}

#[async_trait]
impl WorkspaceRepository for SqlxWorkspaceRepository {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Workspace>, PersistenceError> {
        let rows = sqlx::query(&self.pool.sql(
            "SELECT DISTINCT w.id, w.name, w.owner_id, w.created_at
             FROM workspaces w
             LEFT JOIN workspace_members m ON m.workspace_id = w.id
             WHERE w.owner_id = ? OR m.user_id = ?
             ORDER BY w.id",
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_all(self.pool.pool())
        .await?;

        let parsed = rows
            .iter()
            .map(Self::parse_row)
            .collect::<Result<Vec<_>, _>>()?;
        drop(rows);

        let mut workspaces = Vec::with_capacity(parsed.len());
        for workspace in parsed {
            workspaces.push(self.hydrate(workspace).await?);
        }
        Ok(workspaces)
    }

    async fn get(&self, id: i64) -> Result<Option<Workspace>, PersistenceError> {
        let row = sqlx::query(&self.pool.sql("SELECT * FROM workspaces WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        let workspace = row.as_ref().map(Self::parse_row).transpose()?;
        drop(row);

        match workspace {
            Some(workspace) => Ok(Some(self.hydrate(workspace).await?)),
            None => Ok(None),
        }
    }

    async fn create(&self, name: &str, owner_id: &str) -> Result<Workspace, PersistenceError> {
        let now = now();

        let mut conn = self.pool.pool().acquire().await?;
        sqlx::query(&self.pool.sql(
            "INSERT INTO workspaces (name, owner_id, created_at) VALUES (?, ?, ?)",
        ))
        .bind(name)
        .bind(owner_id)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        let id = self.pool.last_insert_id(&mut conn).await?;

        Ok(Workspace {
            id,
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            members: Vec::new(),
            created_at: now,
        })
    }

    async fn add_member(&self, id: i64, user_id: &str) -> Result<Workspace, PersistenceError> {
        let workspace = self
            .get(id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("workspace", id))?;

        if workspace.has_member(user_id) {
            return Ok(workspace);
        }

        sqlx::query(&self.pool.sql(
            "INSERT INTO workspace_members (workspace_id, user_id) VALUES (?, ?)",
        ))
        .bind(id)
        .bind(user_id)
        .execute(self.pool.pool())
        .await?;

        self.get(id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("workspace", id))
    }

    async fn is_member(&self, id: i64, user_id: &str) -> Result<bool, PersistenceError> {
        Ok(self
            .get(id)
            .await?
            .is_some_and(|w| w.has_member(user_id)))
    }

    async fn delete(&self, id: i64, owner_id: &str) -> Result<bool, PersistenceError> {
        let result = sqlx::query(&self.pool.sql("DELETE FROM workspaces WHERE id = ? AND owner_id = ?"))
            .bind(id)
            .bind(owner_id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(&self.pool.sql("DELETE FROM workspace_members WHERE workspace_id = ?"))
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::test_support::memory_store;

    #[tokio::test]
    async fn test_membership() {
        let store = memory_store().await;
        let repo = store.workspaces();

        let ws = repo.create("Research", "owner").await.unwrap();
        assert!(repo.is_member(ws.id, "owner").await.unwrap());
        assert!(!repo.is_member(ws.id, "u1").await.unwrap());

        let ws = repo.add_member(ws.id, "u1").await.unwrap();
        assert_eq!(ws.members, vec!["u1"]);
        // adding twice is a no-op
        let ws = repo.add_member(ws.id, "u1").await.unwrap();
        assert_eq!(ws.members.len(), 1);

        assert_eq!(repo.list_for_user("u1").await.unwrap().len(), 1);
        assert_eq!(repo.list_for_user("owner").await.unwrap().len(), 1);
        assert!(repo.list_for_user("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_owner_deletes() {
        let store = memory_store().await;
        let repo = store.workspaces();
        let ws = repo.create("Team", "owner").await.unwrap();
        repo.add_member(ws.id, "u1").await.unwrap();

        assert!(!repo.delete(ws.id, "u1").await.unwrap());
        assert!(repo.delete(ws.id, "owner").await.unwrap());
        assert!(!repo.is_member(ws.id, "u1").await.unwrap());
    }
}
