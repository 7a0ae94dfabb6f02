//! Relationship edges and their state machines.

use crate::resource::get_resource;
use crate::{LedgerError, NOW_SQL};
use confer_types::{
    derive_collaboration_id, Decision, EdgeStatus, EdgeType, FriendStatus,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Column list shared by every edge query, in `map_row_to_edge` order.
const EDGE_COLUMNS: &str = "edge_id, edge_type, party_a, party_b, requester_id, resource_key, \
                            status, created_at, updated_at";

/// A relationship edge between two users.
///
/// For friendships `party_a` is the requester and `party_b` the addressee.
/// For collaborations and review requests `party_a` is the collaborator or
/// reviewer and `party_b` the owner of `resource_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Edge {
    pub edge_id: String,
    pub edge_type: EdgeType,
    pub party_a: String,
    pub party_b: String,
    pub requester_id: String,
    pub resource_id: Option<String>,
    pub status: EdgeStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Edge {
    /// The party expected to respond: the non-requesting party.
    pub fn addressee_id(&self) -> &str {
        if self.party_a == self.requester_id {
            &self.party_b
        } else {
            &self.party_a
        }
    }

    /// The resource owner for resource-scoped edges.
    pub fn owner_id(&self) -> Option<&str> {
        self.edge_type
            .requires_resource()
            .then_some(self.party_b.as_str())
    }

    /// Whether `user_id` is one of the two parties.
    pub fn involves(&self, user_id: &str) -> bool {
        self.party_a == user_id || self.party_b == user_id
    }

    /// The party opposite `user_id`, if `user_id` is a party at all.
    pub fn counterparty(&self, user_id: &str) -> Option<&str> {
        if self.party_a == user_id {
            Some(&self.party_b)
        } else if self.party_b == user_id {
            Some(&self.party_a)
        } else {
            None
        }
    }
}

/// A request to create an edge.
#[derive(Debug, Clone, Copy)]
pub struct Proposal<'a> {
    pub edge_type: EdgeType,
    pub requester_id: &'a str,
    /// For resource-scoped edges this must be the resource owner.
    pub addressee_id: &'a str,
    pub resource_id: Option<&'a str>,
}

/// Outcome of [`respond`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Responded {
    /// The responded edge, in its new status.
    pub edge: Edge,
    /// The collaboration derived from an accepted review request.
    pub derived: Option<Edge>,
}

/// Creates a new edge if no live edge of the same type joins the pair.
///
/// Checks run in this order: ownership of the resource, self reference,
/// resource existence, addressee, resource open state. A self-addressed
/// proposal fails with [`LedgerError::SelfReference`] whether or not the
/// resource exists, unless the requester owns it. The uniqueness check and the
/// insert are one `INSERT OR IGNORE` against the live-pair unique index, so
/// of two concurrent identical proposals exactly one returns the edge and
/// the other gets [`LedgerError::Conflict`].
pub fn propose(conn: &Connection, proposal: &Proposal<'_>) -> Result<Edge, LedgerError> {
    let Proposal {
        edge_type,
        requester_id,
        addressee_id,
        resource_id,
    } = *proposal;

    if requester_id.trim().is_empty() || addressee_id.trim().is_empty() {
        return Err(LedgerError::Validation(
            "requester and addressee must not be empty".to_string(),
        ));
    }

    let resource_key = match (edge_type.requires_resource(), resource_id) {
        (true, Some(rid)) => {
            let resource = match get_resource(conn, rid) {
                Err(LedgerError::NotFound(_)) if requester_id == addressee_id => {
                    return Err(LedgerError::SelfReference)
                }
                other => other?,
            };
            if resource.owner_id == requester_id {
                return Err(LedgerError::Ownership(rid.to_string()));
            }
            if requester_id == addressee_id {
                return Err(LedgerError::SelfReference);
            }
            if resource.owner_id != addressee_id {
                return Err(LedgerError::Validation(format!(
                    "{} on resource {} must be addressed to its owner",
                    edge_type, rid
                )));
            }
            if edge_type == EdgeType::Collaboration && !resource.open {
                return Err(LedgerError::ResourceClosed(rid.to_string()));
            }
            rid.to_string()
        }
        (true, None) => {
            return Err(LedgerError::Validation(format!(
                "{edge_type} requires a resource"
            )))
        }
        (false, Some(_)) => {
            return Err(LedgerError::Validation(format!(
                "{edge_type} does not take a resource"
            )))
        }
        (false, None) => {
            if requester_id == addressee_id {
                return Err(LedgerError::SelfReference);
            }
            String::new()
        }
    };

    let edge_id = match edge_type {
        EdgeType::Collaboration => derive_collaboration_id(&resource_key, requester_id),
        _ => uuid::Uuid::new_v4().to_string(),
    };

    let inserted = insert_if_absent(
        conn,
        &edge_id,
        edge_type,
        requester_id,
        addressee_id,
        &resource_key,
        edge_type.initial_status(),
    )?;

    inserted.ok_or_else(|| LedgerError::Conflict(conflict_message(edge_type).to_string()))
}

fn conflict_message(edge_type: EdgeType) -> &'static str {
    match edge_type {
        EdgeType::Friendship => "friendship already exists",
        EdgeType::Collaboration => "already a collaborator",
        EdgeType::ReviewRequest => "review request already exists",
    }
}

/// Inserts an edge unless the edge id or the live pair already exists.
///
/// Returns `None` when the insert was ignored.
fn insert_if_absent(
    conn: &Connection,
    edge_id: &str,
    edge_type: EdgeType,
    party_a: &str,
    party_b: &str,
    resource_key: &str,
    status: EdgeStatus,
) -> Result<Option<Edge>, LedgerError> {
    let (pair_low, pair_high) = if party_a < party_b {
        (party_a, party_b)
    } else {
        (party_b, party_a)
    };

    let sql = format!(
        "INSERT OR IGNORE INTO relationship_edges (
            edge_id, edge_type, party_a, party_b, requester_id,
            resource_key, pair_low, pair_high, status
        ) VALUES (?1, ?2, ?3, ?4, ?3, ?5, ?6, ?7, ?8)
        RETURNING {EDGE_COLUMNS}"
    );

    let edge = conn
        .query_row(
            &sql,
            params![
                edge_id,
                edge_type.as_str(),
                party_a,
                party_b,
                resource_key,
                pair_low,
                pair_high,
                status.as_str(),
            ],
            map_row_to_edge,
        )
        .optional()?;
    Ok(edge)
}

/// Accepts or declines a pending friendship or review request.
///
/// Only the addressee may respond. Replaying the decision an edge already
/// carries succeeds without changing it; for an accepted review request the
/// replay re-runs [`ensure_derived_collaboration`], which is how a cascade
/// interrupted between its two writes converges.
pub fn respond(
    conn: &Connection,
    edge_id: &str,
    responder_id: &str,
    decision: Decision,
) -> Result<Responded, LedgerError> {
    let edge = get_edge(conn, edge_id)?;
    let target = decision.target_status();

    if edge.edge_type == EdgeType::Collaboration {
        return Err(LedgerError::InvalidTransition {
            edge_id: edge.edge_id,
            from: edge.status,
            to: target,
        });
    }

    if !edge.involves(responder_id) || responder_id == edge.requester_id {
        return Err(LedgerError::Authorization(format!(
            "only the addressee of {} may respond",
            edge.edge_type
        )));
    }

    let edge = if edge.status == target {
        edge
    } else if edge.status.can_transition(edge.edge_type, target) {
        transition(conn, &edge, target)?
    } else {
        return Err(LedgerError::InvalidTransition {
            edge_id: edge.edge_id,
            from: edge.status,
            to: target,
        });
    };

    let derived = if edge.edge_type == EdgeType::ReviewRequest && edge.status == EdgeStatus::Accepted
    {
        Some(ensure_derived_collaboration(conn, &edge)?)
    } else {
        None
    };

    Ok(Responded { edge, derived })
}

/// Moves an owner's collaboration edge from `active` to `acknowledged`.
///
/// Acknowledging an already acknowledged edge returns it unchanged.
pub fn acknowledge(conn: &Connection, edge_id: &str, owner_id: &str) -> Result<Edge, LedgerError> {
    let edge = get_edge(conn, edge_id)?;

    if edge.edge_type != EdgeType::Collaboration {
        return Err(LedgerError::InvalidTransition {
            edge_id: edge.edge_id,
            from: edge.status,
            to: EdgeStatus::Acknowledged,
        });
    }
    if edge.owner_id() != Some(owner_id) {
        return Err(LedgerError::Authorization(
            "only the resource owner may acknowledge a collaborator".to_string(),
        ));
    }
    if edge.status == EdgeStatus::Acknowledged {
        return Ok(edge);
    }

    transition(conn, &edge, EdgeStatus::Acknowledged)
}

/// Compare-and-set status update. A lost race resolves against the stored status.
fn transition(conn: &Connection, edge: &Edge, target: EdgeStatus) -> Result<Edge, LedgerError> {
    let sql = format!(
        "UPDATE relationship_edges
         SET status = ?1, updated_at = {NOW_SQL}
         WHERE edge_id = ?2 AND status = ?3
         RETURNING {EDGE_COLUMNS}"
    );

    let updated = conn
        .query_row(
            &sql,
            params![target.as_str(), edge.edge_id, edge.status.as_str()],
            map_row_to_edge,
        )
        .optional()?;

    match updated {
        Some(edge) => Ok(edge),
        None => {
            let current = get_edge(conn, &edge.edge_id)?;
            if current.status == target {
                Ok(current)
            } else {
                Err(LedgerError::InvalidTransition {
                    edge_id: current.edge_id,
                    from: current.status,
                    to: target,
                })
            }
        }
    }
}

/// Creates (or finds) the collaboration derived from an accepted review request.
///
/// The derived edge is keyed by `derive_collaboration_id(resource, reviewer)`
/// and inserted with `INSERT OR IGNORE`, so any number of invocations, in
/// sequence or concurrently, leave exactly one edge. It starts `active`,
/// regardless of the resource's open flag: the owner already consented by
/// accepting the review.
pub fn ensure_derived_collaboration(
    conn: &Connection,
    review: &Edge,
) -> Result<Edge, LedgerError> {
    let resource_id = match (&review.edge_type, &review.status, &review.resource_id) {
        (EdgeType::ReviewRequest, EdgeStatus::Accepted, Some(rid)) => rid.as_str(),
        _ => {
            return Err(LedgerError::Validation(format!(
                "edge {} is not an accepted review request",
                review.edge_id
            )))
        }
    };

    let collaborator = review.party_a.as_str();
    let owner = review.party_b.as_str();
    let derived_id = derive_collaboration_id(resource_id, collaborator);

    match insert_if_absent(
        conn,
        &derived_id,
        EdgeType::Collaboration,
        collaborator,
        owner,
        resource_id,
        EdgeStatus::Active,
    )? {
        Some(edge) => {
            tracing::info!(
                review_edge = %review.edge_id,
                derived_edge = %edge.edge_id,
                "created collaboration from accepted review request"
            );
            Ok(edge)
        }
        None => {
            tracing::debug!(
                review_edge = %review.edge_id,
                derived_edge = %derived_id,
                "derived collaboration already present"
            );
            get_edge(conn, &derived_id)
        }
    }
}

/// Deletes an edge.
///
/// Either party may revoke a friendship; only the resource owner may revoke
/// a collaboration or review request. Returns the removed edge.
pub fn revoke(conn: &Connection, edge_id: &str, caller_id: &str) -> Result<Edge, LedgerError> {
    let edge = get_edge(conn, edge_id)?;

    let allowed = match edge.edge_type {
        EdgeType::Friendship => edge.involves(caller_id),
        EdgeType::Collaboration | EdgeType::ReviewRequest => edge.owner_id() == Some(caller_id),
    };
    if !allowed {
        return Err(LedgerError::Authorization(format!(
            "caller may not revoke this {}",
            edge.edge_type
        )));
    }

    let count = conn.execute(
        "DELETE FROM relationship_edges WHERE edge_id = ?1",
        [edge_id],
    )?;
    if count == 0 {
        return Err(LedgerError::NotFound(format!("edge {edge_id}")));
    }
    Ok(edge)
}

/// Retrieves an edge by id.
pub fn get_edge(conn: &Connection, edge_id: &str) -> Result<Edge, LedgerError> {
    conn.query_row(
        &format!("SELECT {EDGE_COLUMNS} FROM relationship_edges WHERE edge_id = ?1"),
        [edge_id],
        map_row_to_edge,
    )
    .optional()?
    .ok_or_else(|| LedgerError::NotFound(format!("edge {edge_id}")))
}

/// Lists every edge the user is a party to, oldest first.
pub fn list_for_user(
    conn: &Connection,
    user_id: &str,
    edge_type: Option<EdgeType>,
) -> Result<Vec<Edge>, LedgerError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EDGE_COLUMNS} FROM relationship_edges
         WHERE (party_a = ?1 OR party_b = ?1)
           AND (?2 IS NULL OR edge_type = ?2)
         ORDER BY id ASC"
    ))?;

    let rows = stmt.query_map(
        params![user_id, edge_type.map(EdgeType::as_str)],
        map_row_to_edge,
    )?;
    let mut edges = Vec::new();
    for row in rows {
        edges.push(row?);
    }
    Ok(edges)
}

/// Lists the collaboration edges of a resource, oldest first.
pub fn list_collaborators(conn: &Connection, resource_id: &str) -> Result<Vec<Edge>, LedgerError> {
    let _ = get_resource(conn, resource_id)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {EDGE_COLUMNS} FROM relationship_edges
         WHERE resource_key = ?1 AND edge_type = 'collaboration'
         ORDER BY id ASC"
    ))?;

    let rows = stmt.query_map([resource_id], map_row_to_edge)?;
    let mut edges = Vec::new();
    for row in rows {
        edges.push(row?);
    }
    Ok(edges)
}

/// Friendship state between `caller_id` and `other_id`, seen from the caller.
///
/// Declined edges are terminal and read as [`FriendStatus::None`].
pub fn friend_status(
    conn: &Connection,
    caller_id: &str,
    other_id: &str,
) -> Result<FriendStatus, LedgerError> {
    let (low, high) = if caller_id < other_id {
        (caller_id, other_id)
    } else {
        (other_id, caller_id)
    };

    let live: Option<(String, String)> = conn
        .query_row(
            "SELECT requester_id, status FROM relationship_edges
             WHERE edge_type = 'friendship' AND pair_low = ?1 AND pair_high = ?2
               AND status <> 'declined'",
            [low, high],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let status = match live {
        None => FriendStatus::None,
        Some((_, status)) if status == EdgeStatus::Accepted.as_str() => FriendStatus::Accepted,
        Some((requester, _)) if requester == caller_id => FriendStatus::Sent,
        Some(_) => FriendStatus::Received,
    };
    Ok(status)
}

/// Whether the two users share an accepted friendship or a collaboration.
pub fn are_connected(conn: &Connection, a: &str, b: &str) -> Result<bool, LedgerError> {
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    let connected: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM relationship_edges
            WHERE pair_low = ?1 AND pair_high = ?2
              AND ((edge_type = 'friendship' AND status = 'accepted')
                   OR edge_type = 'collaboration')
        )",
        [low, high],
        |row| row.get(0),
    )?;
    Ok(connected)
}

fn map_row_to_edge(row: &Row) -> rusqlite::Result<Edge> {
    let type_str: String = row.get(1)?;
    let edge_type: EdgeType = type_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status_str: String = row.get(6)?;
    let status: EdgeStatus = status_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let resource_key: String = row.get(5)?;

    Ok(Edge {
        edge_id: row.get(0)?,
        edge_type,
        party_a: row.get(2)?,
        party_b: row.get(3)?,
        requester_id: row.get(4)?,
        resource_id: (!resource_key.is_empty()).then_some(resource_key),
        status,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
