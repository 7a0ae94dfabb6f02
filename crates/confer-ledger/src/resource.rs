//! Resource (listing) records.
//!
//! Listings are owned by an external CRUD service. The ledger only needs
//! two facts about them: who owns the listing, and whether it is open for
//! new collaborators.

use crate::{LedgerError, NOW_SQL};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// A listing record as seen by the relationship core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub resource_id: String,
    pub owner_id: String,
    pub title: String,
    /// Whether the listing currently accepts collaborators.
    pub open: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Parameters for writing a resource record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertResourceParams {
    pub resource_id: String,
    pub owner_id: String,
    pub title: String,
    pub open: bool,
}

/// Creates a resource, or updates its title and open flag.
///
/// Ownership never changes through this call: updating a resource owned by
/// somebody else fails with [`LedgerError::Authorization`]. The ownership
/// check is part of the single upsert statement.
pub fn upsert_resource(
    conn: &Connection,
    params: &UpsertResourceParams,
) -> Result<Resource, LedgerError> {
    if params.resource_id.trim().is_empty() || params.owner_id.trim().is_empty() {
        return Err(LedgerError::Validation(
            "resource id and owner id must not be empty".to_string(),
        ));
    }

    let sql = format!(
        "INSERT INTO resources (resource_id, owner_id, title, open)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(resource_id) DO UPDATE SET
            title = excluded.title,
            open = excluded.open,
            updated_at = {NOW_SQL}
         WHERE resources.owner_id = excluded.owner_id
         RETURNING resource_id, owner_id, title, open, created_at, updated_at"
    );

    conn.query_row(
        &sql,
        params![
            params.resource_id,
            params.owner_id,
            params.title,
            params.open
        ],
        map_row_to_resource,
    )
    .optional()?
    .ok_or_else(|| {
        LedgerError::Authorization(format!(
            "resource {} is owned by another user",
            params.resource_id
        ))
    })
}

/// Retrieves a resource by id.
pub fn get_resource(conn: &Connection, resource_id: &str) -> Result<Resource, LedgerError> {
    conn.query_row(
        "SELECT resource_id, owner_id, title, open, created_at, updated_at
         FROM resources WHERE resource_id = ?1",
        [resource_id],
        map_row_to_resource,
    )
    .optional()?
    .ok_or_else(|| LedgerError::NotFound(format!("resource {resource_id}")))
}

fn map_row_to_resource(row: &Row) -> rusqlite::Result<Resource> {
    Ok(Resource {
        resource_id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        open: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
