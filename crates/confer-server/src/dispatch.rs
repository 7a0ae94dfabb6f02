//! Relationship notifications.
//!
//! Every successful ledger mutation is turned into a typed event addressed
//! to the user it concerns. Events go to that user's live connections as
//! `relationship` frames and onto a broadcast bus that feeds the SSE stream.
//! Nothing is queued for offline users: the ledger is the durable record and
//! clients catch up by listing their relationships.

use crate::frames::OutgoingFrame;
use crate::registry::ConnectionRegistry;
use confer_ledger::{Edge, Resource, Responded};
use confer_types::{EdgeStatus, EdgeType};
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the event bus; slow SSE subscribers skip past older events.
const EVENT_BUS_CAPACITY: usize = 1024;

/// A relationship change, as seen by the user it is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RelationshipEvent {
    /// Someone proposed an edge to this user.
    Incoming {
        edge_id: String,
        edge_type: EdgeType,
        from_user_id: String,
        resource_id: Option<String>,
        summary: String,
    },
    /// An edge this user is party to changed status.
    Updated {
        edge_id: String,
        edge_type: EdgeType,
        status: EdgeStatus,
        by_user_id: String,
        summary: String,
    },
    /// The other party removed an edge.
    Revoked {
        edge_id: String,
        edge_type: EdgeType,
        by_user_id: String,
        summary: String,
    },
    /// An accepted review opened a collaboration on the resource.
    CollaborationOpened {
        edge_id: String,
        review_edge_id: String,
        resource_id: Option<String>,
        collaborator_id: String,
        summary: String,
    },
}

impl RelationshipEvent {
    /// The SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Incoming { .. } => "incoming",
            Self::Updated { .. } => "updated",
            Self::Revoked { .. } => "revoked",
            Self::CollaborationOpened { .. } => "collaborationOpened",
        }
    }
}

/// An event together with the user it is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressedEvent {
    pub recipient_id: String,
    pub event: RelationshipEvent,
}

/// Fans relationship events out to connections and bus subscribers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
    bus: broadcast::Sender<AddressedEvent>,
}

impl Dispatcher {
    pub fn new(registry: ConnectionRegistry) -> Self {
        let (bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { registry, bus }
    }

    /// Subscribes to every event; callers filter by recipient.
    pub fn subscribe(&self) -> broadcast::Receiver<AddressedEvent> {
        self.bus.subscribe()
    }

    /// Delivers `event` to `recipient_id`. Returns how many live connections
    /// accepted the frame.
    pub fn publish(&self, recipient_id: &str, event: RelationshipEvent) -> usize {
        let delivered = OutgoingFrame::Relationship {
            event: event.clone(),
        }
        .to_json()
        .map(|json| self.registry.push(recipient_id, &json))
        .unwrap_or(0);

        let kind = event.kind();
        if self
            .bus
            .send(AddressedEvent {
                recipient_id: recipient_id.to_string(),
                event,
            })
            .is_err()
        {
            tracing::trace!(kind, "no event stream subscribers");
        }

        tracing::debug!(recipient_id, kind, delivered, "relationship event dispatched");
        delivered
    }

    /// A new edge was proposed: tell the addressee.
    pub fn proposed(&self, edge: &Edge, resource: Option<&Resource>) {
        let from = &edge.requester_id;
        let summary = match edge.edge_type {
            EdgeType::Friendship => format!("{from} sent you a friend request"),
            EdgeType::ReviewRequest => {
                format!("{from} requested a review of {}", describe(edge, resource))
            }
            EdgeType::Collaboration => {
                format!("{from} joined {} as a collaborator", describe(edge, resource))
            }
        };
        self.publish(
            edge.addressee_id(),
            RelationshipEvent::Incoming {
                edge_id: edge.edge_id.clone(),
                edge_type: edge.edge_type,
                from_user_id: from.clone(),
                resource_id: edge.resource_id.clone(),
                summary,
            },
        );
    }

    /// An edge was accepted or declined: tell the requester, and both
    /// parties of any collaboration the acceptance opened.
    pub fn responded(&self, responded: &Responded, responder_id: &str) {
        let edge = &responded.edge;
        let verb = if edge.status == EdgeStatus::Declined {
            "declined"
        } else {
            "accepted"
        };
        let noun = match edge.edge_type {
            EdgeType::Friendship => "friend request",
            _ => "review request",
        };
        self.publish(
            &edge.requester_id,
            RelationshipEvent::Updated {
                edge_id: edge.edge_id.clone(),
                edge_type: edge.edge_type,
                status: edge.status,
                by_user_id: responder_id.to_string(),
                summary: format!("{responder_id} {verb} your {noun}"),
            },
        );

        if let Some(derived) = &responded.derived {
            for party in [&derived.party_a, &derived.party_b] {
                self.publish(
                    party,
                    RelationshipEvent::CollaborationOpened {
                        edge_id: derived.edge_id.clone(),
                        review_edge_id: edge.edge_id.clone(),
                        resource_id: derived.resource_id.clone(),
                        collaborator_id: derived.party_a.clone(),
                        summary: format!(
                            "{} is now collaborating on {}",
                            derived.party_a,
                            describe(derived, None)
                        ),
                    },
                );
            }
        }
    }

    /// The owner acknowledged a collaboration: tell the collaborator.
    pub fn acknowledged(&self, edge: &Edge, owner_id: &str) {
        self.publish(
            &edge.party_a,
            RelationshipEvent::Updated {
                edge_id: edge.edge_id.clone(),
                edge_type: edge.edge_type,
                status: edge.status,
                by_user_id: owner_id.to_string(),
                summary: format!("{owner_id} acknowledged your collaboration"),
            },
        );
    }

    /// An edge was deleted: tell the party who did not delete it.
    pub fn revoked(&self, edge: &Edge, caller_id: &str) {
        let Some(other) = edge.counterparty(caller_id) else {
            return;
        };
        self.publish(
            other,
            RelationshipEvent::Revoked {
                edge_id: edge.edge_id.clone(),
                edge_type: edge.edge_type,
                by_user_id: caller_id.to_string(),
                summary: format!("{caller_id} removed your {}", edge.edge_type),
            },
        );
    }
}

fn describe(edge: &Edge, resource: Option<&Resource>) -> String {
    match (resource, edge.resource_id.as_deref()) {
        (Some(r), _) if !r.title.is_empty() => format!("\"{}\"", r.title),
        (_, Some(id)) => id.to_string(),
        _ => "a resource".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use tokio::sync::mpsc;

    fn edge(edge_type: EdgeType, a: &str, b: &str, status: EdgeStatus) -> Edge {
        Edge {
            edge_id: format!("edge-{a}-{b}"),
            edge_type,
            party_a: a.to_string(),
            party_b: b.to_string(),
            requester_id: a.to_string(),
            resource_id: edge_type.requires_resource().then(|| "doc-1".to_string()),
            status,
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    fn connect(registry: &ConnectionRegistry, user: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(16);
        registry.register(user, ConnectionHandle::new(tx));
        rx
    }

    #[test]
    fn event_serializes_with_kind_and_camel_case() {
        let event = RelationshipEvent::Incoming {
            edge_id: "e1".to_string(),
            edge_type: EdgeType::ReviewRequest,
            from_user_id: "rita".to_string(),
            resource_id: Some("doc-1".to_string()),
            summary: "s".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "incoming");
        assert_eq!(json["edgeType"], "review_request");
        assert_eq!(json["fromUserId"], "rita");
        assert_eq!(json["resourceId"], "doc-1");
    }

    #[tokio::test]
    async fn proposal_reaches_addressee_only() {
        let registry = ConnectionRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let mut bob = connect(&registry, "bob");
        let mut alice = connect(&registry, "alice");
        let mut bus = dispatcher.subscribe();

        let e = edge(EdgeType::Friendship, "alice", "bob", EdgeStatus::Pending);
        dispatcher.proposed(&e, None);

        let frame: serde_json::Value = serde_json::from_str(&bob.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "relationship");
        assert_eq!(frame["event"]["kind"], "incoming");
        assert_eq!(frame["event"]["summary"], "alice sent you a friend request");
        assert!(alice.try_recv().is_err());

        let addressed = bus.recv().await.unwrap();
        assert_eq!(addressed.recipient_id, "bob");
    }

    #[tokio::test]
    async fn accepted_review_notifies_requester_and_both_collaborators() {
        let registry = ConnectionRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let mut bus = dispatcher.subscribe();

        let review = edge(EdgeType::ReviewRequest, "rita", "olga", EdgeStatus::Accepted);
        let derived = edge(EdgeType::Collaboration, "rita", "olga", EdgeStatus::Active);
        dispatcher.responded(
            &Responded {
                edge: review,
                derived: Some(derived),
            },
            "olga",
        );

        let first = bus.recv().await.unwrap();
        assert_eq!(first.recipient_id, "rita");
        assert_eq!(first.event.kind(), "updated");

        let mut opened = vec![
            bus.recv().await.unwrap().recipient_id,
            bus.recv().await.unwrap().recipient_id,
        ];
        opened.sort();
        assert_eq!(opened, vec!["olga".to_string(), "rita".to_string()]);
    }

    #[tokio::test]
    async fn revoke_notifies_the_other_party() {
        let registry = ConnectionRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let mut bus = dispatcher.subscribe();

        let e = edge(EdgeType::Friendship, "alice", "bob", EdgeStatus::Accepted);
        dispatcher.revoked(&e, "bob");
        let addressed = bus.recv().await.unwrap();
        assert_eq!(addressed.recipient_id, "alice");
        assert!(matches!(
            addressed.event,
            RelationshipEvent::Revoked { ref by_user_id, .. } if by_user_id == "bob"
        ));
    }

    #[test]
    fn publish_without_subscribers_or_connections_is_harmless() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let e = edge(EdgeType::Collaboration, "carol", "olga", EdgeStatus::Acknowledged);
        dispatcher.acknowledged(&e, "olga");
    }
}
