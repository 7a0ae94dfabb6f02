//! Concurrency tests for edge creation.
//!
//! Each test runs many writers against one file-backed SQLite database
//! through the pool, the way request handlers do, and checks that the
//! live-pair uniqueness holds.

use confer_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use confer_ledger::{
    list_collaborators, propose, respond, upsert_resource, LedgerError, Proposal,
    UpsertResourceParams,
};
use confer_types::{Decision, EdgeType};
use std::sync::{Arc, Barrier};
use std::thread;

fn setup_pool(dir: &tempfile::TempDir) -> DbPool {
    let path = dir.path().join("ledger.db");
    let pool = create_pool(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings {
            busy_timeout_ms: 10_000,
            pool_max_size: 16,
        },
    )
    .expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    run_migrations(&conn).expect("failed to run migrations");
    upsert_resource(
        &conn,
        &UpsertResourceParams {
            resource_id: "L".to_string(),
            owner_id: "owner".to_string(),
            title: "Field survey".to_string(),
            open: true,
        },
    )
    .expect("failed to create listing");
    pool
}

/// Runs `threads` copies of `op` released at the same instant.
fn race<T, F>(pool: &DbPool, threads: usize, op: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(&rusqlite::Connection) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(threads));
    let op = Arc::new(op);
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let pool = pool.clone();
            let barrier = barrier.clone();
            let op = op.clone();
            thread::spawn(move || {
                let conn = pool.get().expect("failed to get connection");
                barrier.wait();
                op(&conn)
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().expect("worker thread panicked"))
        .collect()
}

#[test]
fn concurrent_joins_create_exactly_one_edge() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = setup_pool(&dir);

    let results = race(&pool, 2, |conn| {
        propose(
            conn,
            &Proposal {
                edge_type: EdgeType::Collaboration,
                requester_id: "C",
                addressee_id: "owner",
                resource_id: Some("L"),
            },
        )
    });

    let created = results.iter().filter(|r| r.is_ok()).count();
    let conflicts: Vec<_> = results
        .iter()
        .filter_map(|r| match r {
            Err(LedgerError::Conflict(msg)) => Some(msg.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(created, 1, "exactly one join must win: {results:?}");
    assert_eq!(conflicts, vec!["already a collaborator".to_string()]);

    let conn = pool.get().unwrap();
    assert_eq!(list_collaborators(&conn, "L").unwrap().len(), 1);
}

#[test]
fn concurrent_cross_friend_requests_create_one_edge() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = setup_pool(&dir);

    let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let results = race(&pool, 8, move |conn| {
        // Half the threads propose a->b, the other half b->a.
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let (from, to) = if n % 2 == 0 { ("a", "b") } else { ("b", "a") };
        propose(
            conn,
            &Proposal {
                edge_type: EdgeType::Friendship,
                requester_id: from,
                addressee_id: to,
                resource_id: None,
            },
        )
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(LedgerError::Conflict(_)))));

    let conn = pool.get().unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM relationship_edges WHERE edge_type = 'friendship'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn concurrent_review_acceptances_derive_one_collaboration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = setup_pool(&dir);

    let review = {
        let conn = pool.get().unwrap();
        propose(
            &conn,
            &Proposal {
                edge_type: EdgeType::ReviewRequest,
                requester_id: "R",
                addressee_id: "owner",
                resource_id: Some("L"),
            },
        )
        .expect("review propose")
    };

    let edge_id = review.edge_id.clone();
    let results = race(&pool, 6, move |conn| {
        respond(conn, &edge_id, "owner", Decision::Accept)
    });

    let derived_ids: Vec<_> = results
        .into_iter()
        .map(|r| {
            r.expect("every replayed acceptance succeeds")
                .derived
                .expect("acceptance carries the derived edge")
                .edge_id
        })
        .collect();
    assert!(derived_ids.windows(2).all(|w| w[0] == w[1]));

    let conn = pool.get().unwrap();
    assert_eq!(list_collaborators(&conn, "L").unwrap().len(), 1);
}
