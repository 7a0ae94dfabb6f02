//! WebSocket frame types.
//!
//! Frames are JSON objects tagged by `type`. Field names are camelCase on the
//! wire; HTTP responses keep the snake_case of the stored records.

use crate::dispatch::RelationshipEvent;
use confer_messages::Message;
use serde::{Deserialize, Serialize};

/// Frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingFrame {
    #[serde(rename = "send")]
    Send {
        #[serde(rename = "recipientId")]
        recipient_id: String,
        content: String,
    },
}

/// A persisted message as carried in `delivered` and `sendAck` frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WsMessagePayload {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: String,
}

impl From<Message> for WsMessagePayload {
    fn from(m: Message) -> Self {
        Self {
            message_id: m.message_id,
            conversation_id: m.conversation_id,
            sender_id: m.sender_id,
            recipient_id: m.recipient_id,
            content: m.content,
            created_at: m.created_at,
        }
    }
}

/// Frames the server pushes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingFrame {
    /// A message addressed to this user.
    #[serde(rename = "delivered")]
    Delivered { message: WsMessagePayload },
    /// A message this user sent, from any of their connections.
    #[serde(rename = "sendAck")]
    SendAck { message: WsMessagePayload },
    /// A send from this connection was refused or could not be stored.
    #[serde(rename = "sendError")]
    SendError { kind: String, reason: String },
    /// A relationship change involving this user.
    #[serde(rename = "relationship")]
    Relationship { event: RelationshipEvent },
    /// The client sent a frame the server does not understand.
    #[serde(rename = "error")]
    Error { message: String },
}

impl OutgoingFrame {
    /// Serializes the frame, logging instead of failing.
    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!("failed to serialize outgoing frame: {}", e);
                None
            }
        }
    }
}
