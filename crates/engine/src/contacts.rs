//! Bot users and the client ↔ provider message log.

use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::calendar::format_timestamp;
use crate::error::{EngineError, Result};
use crate::models::{BotUser, ChatMessage};

/// Telegram refuses longer texts.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Clone)]
pub struct ContactBook {
    pool: SqlitePool,
}

impl ContactBook {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Records a user, refreshing the names on later visits. `first_seen` is
    /// kept from the first call.
    pub async fn register(
        &self,
        chat_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO bot_users (chat_id, username, first_name, first_seen)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(chat_id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name",
        )
        .bind(chat_id)
        .bind(username)
        .bind(first_name)
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn user(&self, chat_id: i64) -> Result<Option<BotUser>> {
        let user = sqlx::query_as::<_, BotUser>(
            "SELECT chat_id, username, first_name, first_seen FROM bot_users WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn users(&self) -> Result<Vec<BotUser>> {
        let users = sqlx::query_as::<_, BotUser>(
            "SELECT chat_id, username, first_name, first_seen FROM bot_users ORDER BY first_seen, chat_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    /// Appends to a client's thread. Blank or oversized bodies are refused.
    pub async fn record(
        &self,
        client_chat_id: i64,
        client_name: &str,
        body: &str,
        from_client: bool,
        now: NaiveDateTime,
    ) -> Result<ChatMessage> {
        let body = body.trim();
        if body.is_empty() {
            return Err(EngineError::InvalidRequest("message is empty".into()));
        }
        if body.chars().count() > MAX_MESSAGE_CHARS {
            return Err(EngineError::InvalidRequest(format!(
                "message is longer than {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let created_at = format_timestamp(now);
        let result = sqlx::query(
            "INSERT INTO messages (client_chat_id, client_name, body, from_client, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(client_chat_id)
        .bind(client_name)
        .bind(body)
        .bind(from_client)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(ChatMessage {
            id: result.last_insert_rowid(),
            client_chat_id,
            client_name: client_name.to_string(),
            body: body.to_string(),
            from_client,
            created_at,
        })
    }

    /// Latest messages written by clients, newest first.
    pub async fn inbox(&self, limit: u32) -> Result<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, client_chat_id, client_name, body, from_client, created_at
             FROM messages WHERE from_client = 1 ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    /// The last `limit` messages of one thread, oldest first.
    pub async fn conversation(&self, client_chat_id: i64, limit: u32) -> Result<Vec<ChatMessage>> {
        let mut messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, client_chat_id, client_name, body, from_client, created_at
             FROM messages WHERE client_chat_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(client_chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_timestamp;
    use crate::db::test_pool;

    fn at(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).unwrap()
    }

    #[tokio::test]
    async fn test_register_keeps_first_seen() {
        let book = ContactBook::new(test_pool().await);
        book.register(10, Some("anna"), Some("Анна"), at("2026-03-01 12:00:00")).await.unwrap();
        book.register(10, None, Some("Аня"), at("2026-03-05 09:00:00")).await.unwrap();
        book.register(11, None, None, at("2026-03-02 12:00:00")).await.unwrap();

        let users = book.users().await.unwrap();
        assert_eq!(users.iter().map(|u| u.chat_id).collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(users[0].first_seen, "2026-03-01 12:00:00");
        assert_eq!(users[0].display_name(), "Аня");
        assert_eq!(users[1].display_name(), "Клиент");

        assert!(book.user(12).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversation_and_inbox() {
        let book = ContactBook::new(test_pool().await);
        let now = at("2026-03-01 12:00:00");
        book.record(10, "Анна", "Можно перенести?", true, now).await.unwrap();
        book.record(10, "Анна", " Да, на 15:00 ", false, now).await.unwrap();
        book.record(11, "Оля", "Здравствуйте", true, now).await.unwrap();

        let thread = book.conversation(10, 20).await.unwrap();
        assert_eq!(
            thread.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(),
            vec!["Можно перенести?", "Да, на 15:00"]
        );
        assert!(!thread[1].from_client);

        let inbox = book.inbox(10).await.unwrap();
        assert_eq!(
            inbox.iter().map(|m| m.client_name.as_str()).collect::<Vec<_>>(),
            vec!["Оля", "Анна"]
        );
        assert_eq!(book.conversation(10, 1).await.unwrap()[0].body, "Да, на 15:00");
    }

    #[tokio::test]
    async fn test_blank_and_oversized_messages_are_refused() {
        let book = ContactBook::new(test_pool().await);
        let now = at("2026-03-01 12:00:00");
        assert!(matches!(
            book.record(10, "Анна", "  ", true, now).await,
            Err(EngineError::InvalidRequest(_))
        ));
        let long = "я".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            book.record(10, "Анна", &long, true, now).await,
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(book.inbox(10).await.unwrap().is_empty());
    }
}
