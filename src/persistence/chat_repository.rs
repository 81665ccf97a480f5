//! Repository for chats; the transcript is stored as a JSON blob

use async_trait::async_trait;
use sqlx::Row;

use crate::domain::{Chat, ChatMessage};
use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use crate::persistence::repository::{now, ChatRepository};

pub struct SqlxChatRepository {
    pool: ConnectionPool,
}

impl SqlxChatRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::any::AnyRow) -> Result<Chat, PersistenceError> {
        let messages: String = row.try_get("messages")?;

        Ok(Chat {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            assignment_id: row.try_get("assignment_id")?,
            title: row.try_get("title")?,
            messages: serde_json::from_str(&messages)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ChatRepository for SqlxChatRepository {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Chat>, PersistenceError> {
        let rows = sqlx::query(&self.pool.sql(
            "SELECT * FROM chats WHERE user_id = ? ORDER BY updated_at DESC, id DESC",
        ))
        .bind(user_id)
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<Chat>, PersistenceError> {
        let row = sqlx::query(&self.pool.sql("SELECT * FROM chats WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn create(
        &self,
        user_id: &str,
        assignment_id: i64,
        title: &str,
    ) -> Result<Chat, PersistenceError> {
        let now = now();

        let mut conn = self.pool.pool().acquire().await?;
        sqlx::query(&self.pool.sql(
            "INSERT INTO chats (user_id, assignment_id, title, messages, created_at, updated_at)
             VALUES (?, ?, ?, '[]', ?, ?)",
        ))
        .bind(user_id)
        .bind(assignment_id)
        .bind(title)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        let id = self.pool.last_insert_id(&mut conn).await?;

        Ok(Chat {
            id,
            user_id: user_id.to_string(),
            assignment_id,
            title: title.to_string(),
            messages: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn save_messages(
        &self,
        id: i64,
        messages: &[ChatMessage],
    ) -> Result<(), PersistenceError> {
        let blob = serde_json::to_string(messages)?;
        let result = sqlx::query(&self.pool.sql(
            "UPDATE chats SET messages = ?, updated_at = ? WHERE id = ?",
        ))
        .bind(&blob)
        .bind(now())
        .bind(id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("chat", id));
        }
        Ok(())
    }

    async fn delete(&self, id: i64, user_id: &str) -> Result<bool, PersistenceError> {
        let result = sqlx::query(&self.pool.sql("DELETE FROM chats WHERE id = ? AND user_id = ?"))
            .bind(id)
            .bind(user_id)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use crate::persistence::test_support::memory_store;

    #[tokio::test]
    async fn test_transcript_round_trip() {
        let store = memory_store().await;
        let chat = store.chats().create("u1", 1, "First chat").await.unwrap();
        assert!(chat.messages.is_empty());

        let messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        store.chats().save_messages(chat.id, &messages).await.unwrap();

        let loaded = store.chats().get(chat.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages, messages);
        assert_eq!(loaded.messages[1].role, Role::Assistant);

        assert!(!store.chats().delete(chat.id, "u2").await.unwrap());
        assert!(store.chats().delete(chat.id, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_unknown_chat_fails() {
        let store = memory_store().await;
        let err = store.chats().save_messages(404, &[]).await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { .. }));
    }
}
