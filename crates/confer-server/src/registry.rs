//! Live connection registry.
//!
//! Maps each user to the set of their open connections. A user may hold any
//! number of connections at once (one per device or tab); each is addressed
//! by its own [`ConnectionHandle`]. The registry only tracks liveness: it
//! never stores frames, so nothing pushed to an absent user is retained.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

/// One open connection: an id plus the sending half of its outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    sender: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queues a frame without waiting. Returns `false` if the queue is full
    /// or the connection is gone; the frame is dropped in that case.
    pub fn push(&self, frame_json: String) -> bool {
        match self.sender.try_send(frame_json) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.id,
                    "dropping frame for slow or closed connection: {}",
                    e
                );
                false
            }
        }
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

type HandleMap = HashMap<String, HashMap<Uuid, ConnectionHandle>>;

/// Registry of open connections, keyed by user.
///
/// Uses `std::sync::RwLock`: every acquisition is a short map operation and
/// is never held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    users: Arc<RwLock<HandleMap>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HandleMap> {
        self.users.read().unwrap_or_else(|poisoned| {
            tracing::error!("connection registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HandleMap> {
        self.users.write().unwrap_or_else(|poisoned| {
            tracing::error!("connection registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Adds `handle` to `user_id`'s set. Registering the same handle twice
    /// leaves a single entry.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) {
        let id = handle.id();
        let count = {
            let mut users = self.write();
            let handles = users.entry(user_id.to_string()).or_default();
            handles.insert(id, handle);
            handles.len()
        };
        tracing::debug!(user_id, connection_id = %id, connections = count, "connection registered");
    }

    /// Removes a handle. Returns `false` if it was not registered, which is
    /// not an error: close paths may race.
    pub fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        let mut users = self.write();
        let Some(handles) = users.get_mut(user_id) else {
            return false;
        };
        let removed = handles.remove(&connection_id).is_some();
        if handles.is_empty() {
            users.remove(user_id);
        }
        drop(users);

        if removed {
            tracing::debug!(user_id, connection_id = %connection_id, "connection unregistered");
        }
        removed
    }

    /// Snapshot of `user_id`'s open connections; empty if none.
    pub fn handles_for(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.read()
            .get(user_id)
            .map(|handles| handles.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `connection_id` is a live connection of `user_id`.
    pub fn is_registered(&self, user_id: &str, connection_id: Uuid) -> bool {
        self.read()
            .get(user_id)
            .is_some_and(|handles| handles.contains_key(&connection_id))
    }

    /// Whether `user_id` has at least one open connection.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.read().contains_key(user_id)
    }

    /// Pushes a frame to every connection of `user_id`. Returns the number
    /// of connections that accepted it.
    pub fn push(&self, user_id: &str, frame_json: &str) -> usize {
        self.handles_for(user_id)
            .iter()
            .filter(|handle| handle.push(frame_json.to_string()))
            .count()
    }
}
