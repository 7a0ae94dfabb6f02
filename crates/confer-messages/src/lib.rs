//! Direct message persistence for the Confer platform.
//!
//! Messages are point-to-point and append-only: there is no edit or delete.
//! Each message is stored under the order-independent conversation id of
//! its two parties, and the autoincrement row id fixes persistence order
//! within a conversation.
//!
//! Live delivery is not handled here. The server persists through
//! [`create_message`] first and only then fans the stored message out.

use confer_types::derive_conversation_id;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum content length in bytes (64 KiB).
pub const DEFAULT_MAX_CONTENT_LEN: usize = 65_536;

/// Default and maximum page sizes for history queries.
const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 100;

/// Errors that can occur during message operations.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message: {0}")]
    Validation(String),
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A persisted direct message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Internal database ID; increases with persistence order.
    pub id: i64,
    /// Unique public ID of the message.
    pub message_id: String,
    /// Order-independent id of the sender/recipient pair.
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    /// Creation timestamp (ISO 8601, UTC, millisecond precision).
    pub created_at: String,
}

/// Parameters for creating a new message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageParams {
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
}

/// Checks message content and parties before anything is stored.
///
/// Rejects empty or whitespace-only content, content longer than
/// `max_len` bytes, and messages addressed to the sender.
pub fn validate_message(
    sender_id: &str,
    recipient_id: &str,
    content: &str,
    max_len: usize,
) -> Result<(), MessageError> {
    if content.trim().is_empty() {
        return Err(MessageError::Validation(
            "message content must not be empty".to_string(),
        ));
    }
    if content.len() > max_len {
        return Err(MessageError::Validation(format!(
            "message content exceeds maximum length of {} bytes",
            max_len
        )));
    }
    if recipient_id.trim().is_empty() {
        return Err(MessageError::Validation(
            "recipient must not be empty".to_string(),
        ));
    }
    if sender_id == recipient_id {
        return Err(MessageError::Validation(
            "cannot send a message to yourself".to_string(),
        ));
    }
    Ok(())
}

/// Persists a message and returns the stored record.
///
/// Blank content and self-addressed messages are rejected here. The length
/// limit is deployment policy: callers apply it with [`validate_message`].
pub fn create_message(
    conn: &Connection,
    params: &CreateMessageParams,
) -> Result<Message, MessageError> {
    validate_message(
        &params.sender_id,
        &params.recipient_id,
        &params.content,
        usize::MAX,
    )?;

    let message_id = uuid::Uuid::new_v4().to_string();
    let conversation_id = derive_conversation_id(&params.sender_id, &params.recipient_id);

    let message = conn.query_row(
        "INSERT INTO messages (message_id, conversation_id, sender_id, recipient_id, content)
         VALUES (?1, ?2, ?3, ?4, ?5)
         RETURNING id, message_id, conversation_id, sender_id, recipient_id, content, created_at",
        params![
            message_id,
            conversation_id,
            params.sender_id,
            params.recipient_id,
            params.content,
        ],
        map_row_to_message,
    )?;

    tracing::debug!(
        message_id = %message.message_id,
        conversation_id = %message.conversation_id,
        "message persisted"
    );

    Ok(message)
}

/// Retrieves a message by its public ID.
pub fn get_message(conn: &Connection, message_id: &str) -> Result<Message, MessageError> {
    conn.query_row(
        "SELECT id, message_id, conversation_id, sender_id, recipient_id, content, created_at
         FROM messages WHERE message_id = ?1",
        [message_id],
        map_row_to_message,
    )
    .optional()?
    .ok_or_else(|| MessageError::NotFound(message_id.to_string()))
}

/// Lists the conversation between two users, newest first.
///
/// If `before` names a message, only messages persisted before it are
/// returned. `limit` defaults to 50 and is capped at 100.
pub fn list_conversation(
    conn: &Connection,
    a: &str,
    b: &str,
    before: Option<&str>,
    limit: Option<u32>,
) -> Result<Vec<Message>, MessageError> {
    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    let conversation_id = derive_conversation_id(a, b);

    let before_id = match before {
        Some(message_id) => {
            let anchor = get_message(conn, message_id)?;
            if anchor.conversation_id != conversation_id {
                return Err(MessageError::NotFound(message_id.to_string()));
            }
            anchor.id
        }
        None => i64::MAX,
    };

    let mut stmt = conn.prepare(
        "SELECT id, message_id, conversation_id, sender_id, recipient_id, content, created_at
         FROM messages
         WHERE conversation_id = ?1 AND id < ?2
         ORDER BY id DESC
         LIMIT ?3",
    )?;

    let rows = stmt.query_map(params![conversation_id, before_id, limit], map_row_to_message)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn map_row_to_message(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        message_id: row.get(1)?,
        conversation_id: row.get(2)?,
        sender_id: row.get(3)?,
        recipient_id: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use confer_db::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().expect("failed to open in-memory db");
        run_migrations(&conn).expect("failed to run migrations");
        conn
    }

    fn send(conn: &Connection, from: &str, to: &str, content: &str) -> Message {
        create_message(
            conn,
            &CreateMessageParams {
                sender_id: from.to_string(),
                recipient_id: to.to_string(),
                content: content.to_string(),
            },
        )
        .expect("create message failed")
    }

    #[test]
    fn test_message_lifecycle() {
        let conn = setup_db();

        let first = send(&conn, "x", "y", "hi");
        let reply = send(&conn, "y", "x", "hello back");
        send(&conn, "x", "z", "unrelated");

        assert_eq!(first.conversation_id, reply.conversation_id);
        assert_eq!(get_message(&conn, &first.message_id).unwrap(), first);

        let history = list_conversation(&conn, "y", "x", None, None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message_id, reply.message_id); // newest first
        assert_eq!(history[1].message_id, first.message_id);
    }

    #[test]
    fn test_history_pagination() {
        let conn = setup_db();
        let sent: Vec<_> = (0..5)
            .map(|i| send(&conn, "x", "y", &format!("m{i}")))
            .collect();

        let page = list_conversation(&conn, "x", "y", None, Some(2)).unwrap();
        assert_eq!(
            page.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m4", "m3"]
        );

        let older =
            list_conversation(&conn, "x", "y", Some(&page[1].message_id), Some(10)).unwrap();
        assert_eq!(older.len(), 3);
        assert_eq!(older[0].message_id, sent[2].message_id);
    }

    #[test]
    fn test_history_anchor_from_other_conversation() {
        let conn = setup_db();
        let foreign = send(&conn, "p", "q", "elsewhere");
        let err = list_conversation(&conn, "x", "y", Some(&foreign.message_id), None).unwrap_err();
        assert!(matches!(err, MessageError::NotFound(_)));
    }

    #[test]
    fn test_rejects_blank_content() {
        let conn = setup_db();
        for content in ["", "   ", "\n\t"] {
            let err = create_message(
                &conn,
                &CreateMessageParams {
                    sender_id: "x".to_string(),
                    recipient_id: "y".to_string(),
                    content: content.to_string(),
                },
            )
            .unwrap_err();
            assert!(matches!(err, MessageError::Validation(_)));
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_validate_message_limits() {
        assert!(validate_message("x", "y", "ok", 2).is_ok());
        assert!(matches!(
            validate_message("x", "y", "too long", 3),
            Err(MessageError::Validation(_))
        ));
        assert!(matches!(
            validate_message("x", "x", "note to self", 100),
            Err(MessageError::Validation(_))
        ));
        assert!(matches!(
            validate_message("x", "", "hi", 100),
            Err(MessageError::Validation(_))
        ));
    }
}
