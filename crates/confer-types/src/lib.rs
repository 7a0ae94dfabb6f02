//! Shared types and identifiers for the Confer relationship core.
//!
//! This crate holds the vocabulary every other Confer crate speaks: the
//! relationship edge types and their state machines, response decisions,
//! the caller-relative friendship status, and the deterministic identifier
//! functions used for derived records.
//!
//! It has no storage or runtime dependencies so that the ledger, the
//! message store, and the server can all depend on it without cycles.

use serde::{Deserialize, Serialize};

mod ids;
pub use ids::{derive_collaboration_id, derive_conversation_id};

/// The kind of relationship an edge records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Unordered pair of users; directionality lives in the requester.
    Friendship,
    /// A collaborator attached to a resource owned by the other party.
    Collaboration,
    /// A request to review a resource, addressed to its owner.
    ReviewRequest,
}

impl EdgeType {
    /// Returns the canonical storage label for this edge type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Friendship => "friendship",
            Self::Collaboration => "collaboration",
            Self::ReviewRequest => "review_request",
        }
    }

    /// Whether edges of this type must reference a resource.
    pub fn requires_resource(self) -> bool {
        !matches!(self, Self::Friendship)
    }

    /// The status a freshly proposed edge of this type starts in.
    ///
    /// Collaboration has no pending stage: joining is immediate.
    pub fn initial_status(self) -> EdgeStatus {
        match self {
            Self::Friendship | Self::ReviewRequest => EdgeStatus::Pending,
            Self::Collaboration => EdgeStatus::Active,
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EdgeType {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "friendship" => Ok(Self::Friendship),
            "collaboration" => Ok(Self::Collaboration),
            "review_request" => Ok(Self::ReviewRequest),
            _ => Err(ParseLabelError {
                kind: "edge type",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    /// Awaiting a response from the addressee (friendship, review request).
    Pending,
    /// Accepted by the addressee (friendship, review request).
    Accepted,
    /// Declined by the addressee. Terminal.
    Declined,
    /// Collaboration joined, not yet acknowledged by the owner.
    Active,
    /// Collaboration acknowledged by the owner.
    Acknowledged,
}

impl EdgeStatus {
    /// Returns the canonical storage label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Declined)
    }

    /// Whether `self -> next` is a forward step of `edge_type`'s state machine.
    ///
    /// Deletion via revoke is not a status transition and is not covered here.
    pub fn can_transition(self, edge_type: EdgeType, next: EdgeStatus) -> bool {
        match edge_type {
            EdgeType::Friendship | EdgeType::ReviewRequest => matches!(
                (self, next),
                (Self::Pending, Self::Accepted) | (Self::Pending, Self::Declined)
            ),
            EdgeType::Collaboration => matches!((self, next), (Self::Active, Self::Acknowledged)),
        }
    }
}

impl std::fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EdgeStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "active" => Ok(Self::Active),
            "acknowledged" => Ok(Self::Acknowledged),
            _ => Err(ParseLabelError {
                kind: "edge status",
                value: s.to_string(),
            }),
        }
    }
}

/// A response to a pending edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Decline,
}

impl Decision {
    /// The status an edge moves to under this decision.
    pub fn target_status(self) -> EdgeStatus {
        match self {
            Self::Accept => EdgeStatus::Accepted,
            Self::Decline => EdgeStatus::Declined,
        }
    }
}

/// Friendship state between the caller and another user, relative to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendStatus {
    /// No live friendship edge exists.
    None,
    /// The caller sent a request that is still pending.
    Sent,
    /// The other user sent a request that is still pending.
    Received,
    /// The two users are friends.
    Accepted,
}

/// Error returned when parsing an unknown storage label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLabelError {
    /// What was being parsed ("edge type", "edge status").
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl std::fmt::Display for ParseLabelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseLabelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_type_labels_parse_back() {
        for t in [
            EdgeType::Friendship,
            EdgeType::Collaboration,
            EdgeType::ReviewRequest,
        ] {
            assert_eq!(t.as_str().parse::<EdgeType>(), Ok(t));
        }
        assert!("follow".parse::<EdgeType>().is_err());
    }

    #[test]
    fn serde_labels_match_storage_labels() {
        let json = serde_json::to_string(&EdgeType::ReviewRequest).unwrap();
        assert_eq!(json, "\"review_request\"");
        let json = serde_json::to_string(&EdgeStatus::Acknowledged).unwrap();
        assert_eq!(json, "\"acknowledged\"");
        let d: Decision = serde_json::from_str("\"decline\"").unwrap();
        assert_eq!(d, Decision::Decline);
    }

    #[test]
    fn initial_status_per_type() {
        assert_eq!(EdgeType::Friendship.initial_status(), EdgeStatus::Pending);
        assert_eq!(EdgeType::ReviewRequest.initial_status(), EdgeStatus::Pending);
        assert_eq!(EdgeType::Collaboration.initial_status(), EdgeStatus::Active);
    }

    #[test]
    fn pending_types_only_move_forward() {
        for t in [EdgeType::Friendship, EdgeType::ReviewRequest] {
            assert!(EdgeStatus::Pending.can_transition(t, EdgeStatus::Accepted));
            assert!(EdgeStatus::Pending.can_transition(t, EdgeStatus::Declined));
            assert!(!EdgeStatus::Declined.can_transition(t, EdgeStatus::Accepted));
            assert!(!EdgeStatus::Accepted.can_transition(t, EdgeStatus::Pending));
            assert!(!EdgeStatus::Accepted.can_transition(t, EdgeStatus::Declined));
        }
    }

    #[test]
    fn collaboration_state_machine() {
        let t = EdgeType::Collaboration;
        assert!(EdgeStatus::Active.can_transition(t, EdgeStatus::Acknowledged));
        assert!(!EdgeStatus::Acknowledged.can_transition(t, EdgeStatus::Active));
        assert!(!EdgeStatus::Active.can_transition(t, EdgeStatus::Accepted));
    }

    #[test]
    fn only_declined_is_terminal() {
        assert!(EdgeStatus::Declined.is_terminal());
        assert!(!EdgeStatus::Accepted.is_terminal());
        assert!(!EdgeStatus::Acknowledged.is_terminal());
    }
}
