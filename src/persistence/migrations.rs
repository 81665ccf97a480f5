//! Database migrations for the persistence layer

use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use sqlx::Row;

/// Catalog tables: applications and agents. `{id}` expands per backend.
const MIGRATION_001_CATALOG: &str = r#"
CREATE TABLE IF NOT EXISTS applications (
    id {id},
    name VARCHAR(255) NOT NULL UNIQUE,
    description TEXT,
    logo TEXT,
    auth_required BIGINT NOT NULL DEFAULT 0,
    fields TEXT NOT NULL,
    created_at VARCHAR(64) NOT NULL,
    updated_at VARCHAR(64) NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id {id},
    name VARCHAR(255) NOT NULL UNIQUE,
    description TEXT NOT NULL,
    icon TEXT,
    is_auth BIGINT NOT NULL DEFAULT 0,
    source TEXT NOT NULL,
    override_config TEXT,
    app_id BIGINT,
    permission TEXT NOT NULL,
    response_adapter TEXT NOT NULL,
    created_by VARCHAR(255) NOT NULL,
    created_at VARCHAR(64) NOT NULL,
    updated_at VARCHAR(64) NOT NULL
);

CREATE INDEX idx_agents_app ON agents(app_id)
"#;

/// Per-user tables: connections, assignments, workspaces, chats
const MIGRATION_002_USER_DATA: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id {id},
    user_id VARCHAR(255) NOT NULL,
    app_id BIGINT NOT NULL,
    connection_name VARCHAR(255) NOT NULL,
    connection_key TEXT NOT NULL,
    created_at VARCHAR(64) NOT NULL,
    updated_at VARCHAR(64) NOT NULL
);

CREATE TABLE IF NOT EXISTS assignments (
    id {id},
    user_id VARCHAR(255) NOT NULL,
    assistant_id BIGINT NOT NULL,
    app_id BIGINT,
    name VARCHAR(255) NOT NULL,
    description TEXT NOT NULL,
    instruction TEXT NOT NULL,
    user_connection_id BIGINT,
    created_at VARCHAR(64) NOT NULL,
    updated_at VARCHAR(64) NOT NULL
);

CREATE TABLE IF NOT EXISTS workspaces (
    id {id},
    name VARCHAR(255) NOT NULL,
    owner_id VARCHAR(255) NOT NULL,
    created_at VARCHAR(64) NOT NULL
);

CREATE TABLE IF NOT EXISTS workspace_members (
    workspace_id BIGINT NOT NULL,
    user_id VARCHAR(255) NOT NULL,
    PRIMARY KEY (workspace_id, user_id)
);

CREATE TABLE IF NOT EXISTS chats (
    id {id},
    user_id VARCHAR(255) NOT NULL,
    assignment_id BIGINT NOT NULL,
    title VARCHAR(255) NOT NULL,
    messages TEXT NOT NULL,
    created_at VARCHAR(64) NOT NULL,
    updated_at VARCHAR(64) NOT NULL
);

CREATE INDEX idx_connections_user_app ON connections(user_id, app_id);
CREATE INDEX idx_assignments_user ON assignments(user_id);
CREATE INDEX idx_members_user ON workspace_members(user_id);
CREATE INDEX idx_chats_user ON chats(user_id)
"#;

/// Migration definition
struct Migration {
    name: &'static str,
    sql: &'static str,
    checksum: &'static str,
}

/// Get all migrations in order
fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            name: "001_catalog",
            sql: MIGRATION_001_CATALOG,
            checksum: "v1",
        },
        Migration {
            name: "002_user_data",
            sql: MIGRATION_002_USER_DATA,
            checksum: "v1",
        },
    ]
}

/// Split a migration into executable statements with comment lines removed
fn statements(sql: &str, id_column: &str) -> Vec<String> {
    sql.split(';')
        .map(|stmt| {
            stmt.lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .replace("{id}", id_column)
        })
        .filter(|stmt| !stmt.is_empty())
        .collect()
}

/// Migration runner for the persistence layer
pub struct MigrationRunner {
    pool: ConnectionPool,
}

impl MigrationRunner {
    /// Create a new migration runner
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations
    pub async fn migrate_up(&self) -> Result<MigrationResult, PersistenceError> {
        let mut applied = 0;
        let mut skipped = 0;

        self.ensure_migrations_table().await?;

        let id_column = self.pool.backend().id_column();
        for migration in get_migrations() {
            if self.is_migration_applied(migration.name).await? {
                tracing::debug!("Migration '{}' already applied, skipping", migration.name);
                skipped += 1;
                continue;
            }

            tracing::info!("Applying migration: {}", migration.name);

            for statement in statements(migration.sql, id_column) {
                sqlx::query(&statement)
                    .execute(self.pool.pool())
                    .await
                    .map_err(|e| {
                        PersistenceError::Migration(format!(
                            "Failed to execute migration '{}': {}",
                            migration.name, e
                        ))
                    })?;
            }

            self.record_migration(migration.name, migration.checksum)
                .await?;

            tracing::info!("Migration '{}' applied successfully", migration.name);
            applied += 1;
        }

        Ok(MigrationResult { applied, skipped })
    }

    /// Get migration status
    pub async fn status(&self) -> Result<Vec<MigrationStatus>, PersistenceError> {
        self.ensure_migrations_table().await?;

        let mut statuses = Vec::new();
        for migration in get_migrations() {
            let applied_at = self.get_migration_applied_at(migration.name).await?;
            statuses.push(MigrationStatus {
                name: migration.name.to_string(),
                applied: applied_at.is_some(),
                applied_at,
            });
        }

        Ok(statuses)
    }

    async fn ensure_migrations_table(&self) -> Result<(), PersistenceError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS _agentdesk_migrations (
                id {},
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at VARCHAR(64) NOT NULL,
                checksum VARCHAR(64) NOT NULL
            )",
            self.pool.backend().id_column()
        );

        sqlx::query(&sql)
            .execute(self.pool.pool())
            .await
            .map_err(|e| {
                PersistenceError::Migration(format!("Failed to create migrations table: {}", e))
            })?;

        Ok(())
    }

    async fn is_migration_applied(&self, name: &str) -> Result<bool, PersistenceError> {
        let sql = self
            .pool
            .sql("SELECT COUNT(*) AS count FROM _agentdesk_migrations WHERE name = ?");
        let result = sqlx::query(&sql)
            .bind(name)
            .fetch_one(self.pool.pool())
            .await
            .map_err(|e| {
                PersistenceError::Migration(format!("Failed to check migration status: {}", e))
            })?;

        let count: i64 = result.try_get("count").unwrap_or(0);
        Ok(count > 0)
    }

    async fn get_migration_applied_at(
        &self,
        name: &str,
    ) -> Result<Option<String>, PersistenceError> {
        let sql = self
            .pool
            .sql("SELECT applied_at FROM _agentdesk_migrations WHERE name = ?");
        let result = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| {
                PersistenceError::Migration(format!("Failed to get migration applied_at: {}", e))
            })?;

        Ok(result.map(|row| row.try_get("applied_at").unwrap_or_default()))
    }

    async fn record_migration(&self, name: &str, checksum: &str) -> Result<(), PersistenceError> {
        let now = chrono::Utc::now().to_rfc3339();
        let sql = self.pool.sql(
            "INSERT INTO _agentdesk_migrations (name, applied_at, checksum) VALUES (?, ?, ?)",
        );

        sqlx::query(&sql)
            .bind(name)
            .bind(&now)
            .bind(checksum)
            .execute(self.pool.pool())
            .await
            .map_err(|e| PersistenceError::Migration(format!("Failed to record migration: {}", e)))?;

        Ok(())
    }
}

/// Result of running migrations
#[derive(Debug)]
pub struct MigrationResult {
    /// Number of migrations applied
    pub applied: usize,
    /// Number of migrations skipped (already applied)
    pub skipped: usize,
}

/// Status of a single migration
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_expand_id_and_skip_comments() {
        let sql = "-- header\nCREATE TABLE t (\n    id {id}\n);\n\n-- trailing\n";
        let stmts = statements(sql, "INTEGER PRIMARY KEY AUTOINCREMENT");
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0], "CREATE TABLE t (\n    id INTEGER PRIMARY KEY AUTOINCREMENT\n)");
    }

    #[tokio::test]
    async fn test_migrate_up_is_idempotent() {
        let pool = ConnectionPool::new("sqlite::memory:", 1, 5).await.unwrap();
        let runner = MigrationRunner::new(pool);

        let first = runner.migrate_up().await.unwrap();
        assert_eq!(first.applied, 2);

        let second = runner.migrate_up().await.unwrap();
        assert_eq!(second.applied, 0);
        assert_eq!(second.skipped, 2);

        let status = runner.status().await.unwrap();
        assert!(status.iter().all(|s| s.applied));
    }
}
