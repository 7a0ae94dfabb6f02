//! Direct message routing.
//!
//! A send is persisted before anything is pushed. Only once the message has
//! a stored id does the router fan it out: a `delivered` frame to every
//! connection of the recipient and a `sendAck` to every connection of the
//! sender, the originating one included. If storage fails nobody sees the
//! message and the originating connection gets a `sendError`.
//!
//! Sends within one conversation are serialized by a striped lock held from
//! persist through fan-out, so live delivery order matches storage order.
//! Registry locks are only taken inside a stripe, never the other way round.

use crate::config::MessagingConfig;
use crate::frames::{OutgoingFrame, WsMessagePayload};
use crate::registry::ConnectionRegistry;
use confer_db::DbPool;
use confer_messages::{create_message, validate_message, CreateMessageParams, Message, MessageError};
use confer_types::derive_conversation_id;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Number of conversation ordering locks.
const ORDERING_STRIPES: usize = 64;

/// Why a send was not delivered.
#[derive(Debug, Error)]
pub enum SendError {
    /// The sending connection is not (or no longer) registered.
    #[error("sending connection is not registered")]
    NotRegistered,
    #[error("{0}")]
    Validation(String),
    /// Sender and recipient share no relationship that permits messaging.
    #[error("{0}")]
    Authorization(String),
    /// The message could not be stored; nothing was delivered.
    #[error("message could not be stored: {0}")]
    Delivery(String),
}

impl SendError {
    /// Short label carried in `sendError` frames.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotRegistered => "authentication",
            Self::Validation(_) => "validation",
            Self::Authorization(_) => "authorization",
            Self::Delivery(_) => "delivery",
        }
    }
}

/// Persists direct messages and fans them out to live connections.
#[derive(Clone)]
pub struct MessageRouter {
    pool: DbPool,
    registry: ConnectionRegistry,
    settings: MessagingConfig,
    stripes: Arc<Vec<Mutex<()>>>,
}

impl MessageRouter {
    pub fn new(pool: DbPool, registry: ConnectionRegistry, settings: MessagingConfig) -> Self {
        let stripes = (0..ORDERING_STRIPES).map(|_| Mutex::new(())).collect();
        Self {
            pool,
            registry,
            settings,
            stripes: Arc::new(stripes),
        }
    }

    fn stripe(&self, conversation_id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        conversation_id.hash(&mut hasher);
        &self.stripes[(hasher.finish() % self.stripes.len() as u64) as usize]
    }

    /// Sends `content` from `sender_id`'s connection `connection_id` to
    /// `recipient_id`, returning the stored message.
    pub async fn send(
        &self,
        sender_id: &str,
        connection_id: Uuid,
        recipient_id: &str,
        content: String,
    ) -> Result<Message, SendError> {
        if !self.registry.is_registered(sender_id, connection_id) {
            return Err(SendError::NotRegistered);
        }
        validate_message(sender_id, recipient_id, &content, self.settings.max_content_len)
            .map_err(|e| match e {
                MessageError::Validation(msg) => SendError::Validation(msg),
                other => SendError::Delivery(other.to_string()),
            })?;

        let conversation_id = derive_conversation_id(sender_id, recipient_id);
        let _ordering = self.stripe(&conversation_id).lock().await;

        let message = self
            .persist(sender_id.to_string(), recipient_id.to_string(), content)
            .await
            .inspect_err(|e| {
                if let SendError::Delivery(reason) = e {
                    tracing::error!(
                        sender_id,
                        recipient_id,
                        conversation_id = %conversation_id,
                        "failed to persist message: {}",
                        reason
                    );
                }
            })?;

        let payload = WsMessagePayload::from(message.clone());
        if let Some(json) = (OutgoingFrame::Delivered {
            message: payload.clone(),
        })
        .to_json()
        {
            self.registry.push(recipient_id, &json);
        }
        if let Some(json) = (OutgoingFrame::SendAck { message: payload }).to_json() {
            self.registry.push(sender_id, &json);
        }

        tracing::debug!(
            message_id = %message.message_id,
            conversation_id = %message.conversation_id,
            "message routed"
        );
        Ok(message)
    }

    async fn persist(
        &self,
        sender_id: String,
        recipient_id: String,
        content: String,
    ) -> Result<Message, SendError> {
        let pool = self.pool.clone();
        let require_relationship = self.settings.require_relationship;

        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| SendError::Delivery(format!("db connection failed: {e}")))?;

            if require_relationship {
                let connected = confer_ledger::are_connected(&conn, &sender_id, &recipient_id)
                    .map_err(|e| SendError::Delivery(e.to_string()))?;
                if !connected {
                    return Err(SendError::Authorization(format!(
                        "no friendship or collaboration with {recipient_id}"
                    )));
                }
            }

            create_message(
                &conn,
                &CreateMessageParams {
                    sender_id,
                    recipient_id,
                    content,
                },
            )
            .map_err(|e| match e {
                MessageError::Validation(msg) => SendError::Validation(msg),
                other => SendError::Delivery(other.to_string()),
            })
        })
        .await
        .map_err(|e| SendError::Delivery(format!("persist task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use confer_db::{create_pool, run_migrations, DbRuntimeSettings};
    use confer_ledger::{propose, respond, Proposal};
    use confer_types::{Decision, EdgeType};
    use tokio::sync::mpsc;

    struct Fixture {
        _dir: tempfile::TempDir,
        pool: DbPool,
        registry: ConnectionRegistry,
        router: MessageRouter,
    }

    fn fixture(settings: MessagingConfig) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("router.db");
        let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
            .expect("pool");
        run_migrations(&pool.get().unwrap()).expect("migrations");
        let registry = ConnectionRegistry::new();
        let router = MessageRouter::new(pool.clone(), registry.clone(), settings);
        Fixture {
            _dir: dir,
            pool,
            registry,
            router,
        }
    }

    fn befriend(pool: &DbPool, a: &str, b: &str) {
        let conn = pool.get().unwrap();
        let edge = propose(
            &conn,
            &Proposal {
                edge_type: EdgeType::Friendship,
                requester_id: a,
                addressee_id: b,
                resource_id: None,
            },
        )
        .unwrap();
        respond(&conn, &edge.edge_id, b, Decision::Accept).unwrap();
    }

    fn connect(registry: &ConnectionRegistry, user: &str) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = ConnectionHandle::new(tx);
        let id = handle.id();
        registry.register(user, handle);
        (id, rx)
    }

    fn frame(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        serde_json::from_str(&rx.try_recv().expect("frame expected")).unwrap()
    }

    #[tokio::test]
    async fn stored_message_reaches_every_device_and_acks_sender() {
        let f = fixture(MessagingConfig::default());
        befriend(&f.pool, "alice", "bob");
        let (alice_conn, mut alice_rx) = connect(&f.registry, "alice");
        let (_, mut bob_phone) = connect(&f.registry, "bob");
        let (_, mut bob_laptop) = connect(&f.registry, "bob");

        let sent = f
            .router
            .send("alice", alice_conn, "bob", "hi".to_string())
            .await
            .expect("send should succeed");

        for rx in [&mut bob_phone, &mut bob_laptop] {
            let delivered = frame(rx);
            assert_eq!(delivered["type"], "delivered");
            assert_eq!(delivered["message"]["messageId"], sent.message_id.as_str());
            assert_eq!(delivered["message"]["content"], "hi");
        }

        let ack = frame(&mut alice_rx);
        assert_eq!(ack["type"], "sendAck");
        assert_eq!(ack["message"]["messageId"], sent.message_id.as_str());

        let stored = confer_messages::get_message(&f.pool.get().unwrap(), &sent.message_id)
            .expect("message is persisted");
        assert_eq!(stored.content, "hi");
    }

    #[tokio::test]
    async fn unregistered_connection_cannot_send() {
        let f = fixture(MessagingConfig::default());
        befriend(&f.pool, "alice", "bob");
        let err = f
            .router
            .send("alice", Uuid::new_v4(), "bob", "hi".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::NotRegistered));
        assert_eq!(err.kind(), "authentication");
    }

    #[tokio::test]
    async fn strangers_are_refused_when_relationship_required() {
        let f = fixture(MessagingConfig::default());
        let (alice_conn, mut alice_rx) = connect(&f.registry, "alice");
        let (_, mut bob_rx) = connect(&f.registry, "bob");

        let err = f
            .router
            .send("alice", alice_conn, "bob", "hi".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Authorization(_)));
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());

        let history =
            confer_messages::list_conversation(&f.pool.get().unwrap(), "alice", "bob", None, None)
                .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn strangers_may_talk_when_gate_disabled() {
        let f = fixture(MessagingConfig {
            require_relationship: false,
            ..MessagingConfig::default()
        });
        let (alice_conn, _alice_rx) = connect(&f.registry, "alice");
        f.router
            .send("alice", alice_conn, "bob", "hello stranger".to_string())
            .await
            .expect("offline recipient still gets a stored message");
    }

    #[tokio::test]
    async fn oversized_and_self_sends_are_validation_errors() {
        let f = fixture(MessagingConfig {
            max_content_len: 4,
            ..MessagingConfig::default()
        });
        befriend(&f.pool, "alice", "bob");
        let (alice_conn, _rx) = connect(&f.registry, "alice");

        let err = f
            .router
            .send("alice", alice_conn, "bob", "too long".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = f
            .router
            .send("alice", alice_conn, "alice", "me".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn storage_failure_delivers_nothing() {
        let f = fixture(MessagingConfig::default());
        befriend(&f.pool, "alice", "bob");
        f.pool
            .get()
            .unwrap()
            .execute_batch("DROP TABLE messages;")
            .unwrap();
        let (alice_conn, mut alice_rx) = connect(&f.registry, "alice");
        let (_, mut bob_rx) = connect(&f.registry, "bob");

        let err = f
            .router
            .send("alice", alice_conn, "bob", "lost".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Delivery(_)));
        assert!(bob_rx.try_recv().is_err());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_arrive_in_storage_order() {
        let f = fixture(MessagingConfig::default());
        befriend(&f.pool, "alice", "bob");
        let (alice_conn, _alice_rx) = connect(&f.registry, "alice");
        let (_, mut bob_rx) = connect(&f.registry, "bob");

        let mut tasks = Vec::new();
        for i in 0..20 {
            let router = f.router.clone();
            tasks.push(tokio::spawn(async move {
                router
                    .send("alice", alice_conn, "bob", format!("m{i}"))
                    .await
                    .expect("send")
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut delivered = Vec::new();
        while let Ok(raw) = bob_rx.try_recv() {
            let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
            delivered.push(v["message"]["messageId"].as_str().unwrap().to_string());
        }

        let mut stored: Vec<String> = confer_messages::list_conversation(
            &f.pool.get().unwrap(),
            "alice",
            "bob",
            None,
            Some(100),
        )
        .unwrap()
        .into_iter()
        .map(|m| m.message_id)
        .collect();
        stored.reverse();

        assert_eq!(delivered.len(), 20);
        assert_eq!(delivered, stored);
    }
}
