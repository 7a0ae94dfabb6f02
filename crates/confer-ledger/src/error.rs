//! Error types for the relationship ledger.

use confer_types::EdgeStatus;

/// Errors produced by ledger operations.
///
/// Every variant except `Database` is a client precondition failure and is
/// not worth retrying without changing the request.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The caller is not the party allowed to perform this action.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Requester and addressee are the same user.
    #[error("a user cannot form a relationship with themselves")]
    SelfReference,

    /// The requester owns the resource the edge would point at.
    #[error("owner of resource {0} cannot request a relationship on it")]
    Ownership(String),

    /// A live edge of this type already joins the pair.
    #[error("{0}")]
    Conflict(String),

    /// The edge or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource is not accepting collaborators.
    #[error("resource {0} is not open for collaboration")]
    ResourceClosed(String),

    /// The requested status change is not a forward step of the edge's state machine.
    #[error("edge {edge_id} cannot move from {from} to {to}")]
    InvalidTransition {
        edge_id: String,
        from: EdgeStatus,
        to: EdgeStatus,
    },

    /// Malformed input (missing resource, empty identifiers).
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
