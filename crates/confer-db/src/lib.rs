//! Storage layer for the Confer relationship core.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and the embedded SQL migrations that create the resource, relationship
//! edge, and message tables.
//!
//! # Design decisions
//!
//! - **One backend for every relationship type**: friendships,
//!   collaborations, and review requests live in a single
//!   `relationship_edges` table, so every caller sees one ledger.
//! - **Uniqueness in the schema**: the "at most one live edge per pair"
//!   rule is a partial unique index, which makes create-if-absent a single
//!   atomic `INSERT OR IGNORE` for concurrent callers.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` and applied in order on startup.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
