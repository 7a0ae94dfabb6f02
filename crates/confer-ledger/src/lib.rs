//! Relationship ledger for the Confer platform.
//!
//! The ledger is the single authoritative store for relationship edges
//! between users: friendships, collaborations on a resource, and review
//! requests on a resource. It enforces each type's state machine and its
//! authorization rules:
//!
//! | Type | Created as | Responds | Revokes |
//! |------|-----------|----------|---------|
//! | `friendship` | `pending` | addressee | either party |
//! | `review_request` | `pending` | resource owner | resource owner |
//! | `collaboration` | `active` | (owner acknowledges) | resource owner |
//!
//! Accepting a review request cascades into a collaboration edge whose id is
//! derived from `(resource, reviewer)`; see [`ensure_derived_collaboration`].
//!
//! Every function takes a borrowed [`rusqlite::Connection`] and performs
//! blocking I/O. Async callers run them on a blocking thread.

mod edge;
mod error;
mod resource;

pub use edge::{
    acknowledge, are_connected, ensure_derived_collaboration, friend_status, get_edge,
    list_collaborators, list_for_user, propose, respond, revoke, Edge, Proposal, Responded,
};
pub use error::LedgerError;
pub use resource::{get_resource, upsert_resource, Resource, UpsertResourceParams};

/// SQLite expression for the current UTC time with millisecond precision.
pub(crate) const NOW_SQL: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";
