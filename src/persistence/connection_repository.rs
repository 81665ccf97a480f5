//! Repository for user connections (credential sets)

use async_trait::async_trait;
use sqlx::Row;

use crate::access::connection_key::{format_connection_key, parse_connection_key, KeyEncoding};
use crate::domain::{Connection, ConnectionInput};
use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use crate::persistence::repository::{now, ConnectionRepository};

/// SQLx-based implementation of ConnectionRepository
///
/// Keys are written as a JSON array of `key=value` entries and read back in
/// any of the legacy encodings.
pub struct SqlxConnectionRepository {
    pool: ConnectionPool,
}

impl SqlxConnectionRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::any::AnyRow) -> Result<Connection, PersistenceError> {
        let raw_key: String = row.try_get("connection_key")?;

        Ok(Connection {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            app_id: row.try_get("app_id")?,
            connection_name: row.try_get("connection_name")?,
            connection_key: parse_connection_key(&raw_key),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ConnectionRepository for SqlxConnectionRepository {
    async fn list_for_user(
        &self,
        user_id: &str,
        app_id: Option<i64>,
    ) -> Result<Vec<Connection>, PersistenceError> {
        let rows = match app_id {
            Some(app_id) => {
                sqlx::query(&self.pool.sql(
                    "SELECT * FROM connections WHERE user_id = ? AND app_id = ? ORDER BY id",
                ))
                .bind(user_id)
                .bind(app_id)
                .fetch_all(self.pool.pool())
                .await?
            }
            None => {
                sqlx::query(&self.pool.sql("SELECT * FROM connections WHERE user_id = ? ORDER BY id"))
                    .bind(user_id)
                    .fetch_all(self.pool.pool())
                    .await?
            }
        };

        rows.iter().map(Self::parse_row).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<Connection>, PersistenceError> {
        let row = sqlx::query(&self.pool.sql("SELECT * FROM connections WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn create(
        &self,
        user_id: &str,
        input: &ConnectionInput,
    ) -> Result<Connection, PersistenceError> {
        let now = now();
        let key = format_connection_key(&input.connection_key, KeyEncoding::JsonEntries);

        let mut conn = self.pool.pool().acquire().await?;
        sqlx::query(&self.pool.sql(
            "INSERT INTO connections (user_id, app_id, connection_name, connection_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        ))
        .bind(user_id)
        .bind(input.app_id)
        .bind(&input.connection_name)
        .bind(&key)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        let id = self.pool.last_insert_id(&mut conn).await?;

        tracing::debug!(
            "Created connection {} for user {} (app {}, {} keys)",
            id,
            user_id,
            input.app_id,
            input.connection_key.len()
        );

        Ok(Connection {
            id,
            user_id: user_id.to_string(),
            app_id: input.app_id,
            connection_name: input.connection_name.clone(),
            connection_key: input.connection_key.clone(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn update(
        &self,
        id: i64,
        user_id: &str,
        input: &ConnectionInput,
    ) -> Result<Connection, PersistenceError> {
        let key = format_connection_key(&input.connection_key, KeyEncoding::JsonEntries);
        let result = sqlx::query(&self.pool.sql(
            "UPDATE connections SET app_id = ?, connection_name = ?, connection_key = ?, updated_at = ?
             WHERE id = ? AND user_id = ?",
        ))
        .bind(input.app_id)
        .bind(&input.connection_name)
        .bind(&key)
        .bind(now())
        .bind(id)
        .bind(user_id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("connection", id));
        }

        self.get(id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("connection", id))
    }

    async fn delete(&self, id: i64, user_id: &str) -> Result<bool, PersistenceError> {
        let result = sqlx::query(&self.pool.sql("DELETE FROM connections WHERE id = ? AND user_id = ?"))
            .bind(id)
            .bind(user_id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let unbound = sqlx::query(&self.pool.sql(
            "UPDATE assignments SET user_connection_id = NULL WHERE user_connection_id = ? AND user_id = ?",
        ))
        .bind(id)
        .bind(user_id)
        .execute(self.pool.pool())
        .await?;

        if unbound.rows_affected() > 0 {
            tracing::info!(
                "Unbound {} assignment(s) from deleted connection {}",
                unbound.rows_affected(),
                id
            );
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::KeyValuePair;
    use crate::persistence::test_support::{application, memory_store};

    fn input(app_id: i64, name: &str) -> ConnectionInput {
        ConnectionInput {
            app_id,
            connection_name: name.to_string(),
            connection_key: vec![
                KeyValuePair::new("api_key", "key-1"),
                KeyValuePair::new("domain", "mg.example.com"),
            ],
        }
    }

    #[tokio::test]
    async fn test_listing_is_owner_scoped() {
        let store = memory_store().await;
        let mailgun = application(&store, "Mailgun", &["api_key"]).await;
        let slack = application(&store, "Slack", &["token"]).await;
        let repo = store.connections();

        repo.create("u1", &input(mailgun.id, "work")).await.unwrap();
        repo.create("u1", &input(slack.id, "team")).await.unwrap();
        repo.create("u2", &input(mailgun.id, "other")).await.unwrap();

        assert_eq!(repo.list_for_user("u1", None).await.unwrap().len(), 2);
        let filtered = repo.list_for_user("u1", Some(mailgun.id)).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].connection_name, "work");
        assert_eq!(filtered[0].connection_key.len(), 2);
    }

    #[tokio::test]
    async fn test_update_requires_owner() {
        let store = memory_store().await;
        let app = application(&store, "Mailgun", &["api_key"]).await;
        let repo = store.connections();
        let conn = repo.create("u1", &input(app.id, "work")).await.unwrap();

        let err = repo.update(conn.id, "u2", &input(app.id, "stolen")).await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { .. }));

        let updated = repo.update(conn.id, "u1", &input(app.id, "renamed")).await.unwrap();
        assert_eq!(updated.connection_name, "renamed");
        assert!(!repo.delete(conn.id, "u2").await.unwrap());
        assert!(repo.delete(conn.id, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_reads_legacy_postgres_encoding() {
        let store = memory_store().await;
        let app = application(&store, "Mailgun", &["api_key"]).await;

        sqlx::query(
            "INSERT INTO connections (user_id, app_id, connection_name, connection_key, created_at, updated_at)
             VALUES ('u1', ?, 'legacy', '{\"api_key=old\",\"domain=x.org\"}', 'now', 'now')",
        )
        .bind(app.id)
        .execute(store.pool().pool())
        .await
        .unwrap();

        let conns = store.connections().list_for_user("u1", None).await.unwrap();
        assert_eq!(conns[0].connection_key[0], KeyValuePair::new("api_key", "old"));
        assert_eq!(conns[0].connection_key[1], KeyValuePair::new("domain", "x.org"));
    }
}
