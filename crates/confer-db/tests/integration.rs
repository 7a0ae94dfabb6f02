use confer_db::{create_pool, run_migrations, DbRuntimeSettings};

#[test]
fn pooled_connections_share_one_file_database() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let path = dir.path().join("confer.db");
    let pool = create_pool(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("failed to create pool");

    {
        let conn = pool.get().expect("failed to get connection");
        run_migrations(&conn).expect("failed to run migrations");
        conn.execute(
            "INSERT INTO resources (resource_id, owner_id, title) VALUES ('listing-1', 'owner', 'Soil study')",
            [],
        )
        .expect("failed to insert resource");
    }

    let other = pool.get().expect("failed to get second connection");
    let owner: String = other
        .query_row(
            "SELECT owner_id FROM resources WHERE resource_id = 'listing-1'",
            [],
            |row| row.get(0),
        )
        .expect("resource should be visible from another pooled connection");
    assert_eq!(owner, "owner");

    let applied = run_migrations(&other).expect("rerun should succeed");
    assert_eq!(applied, 0);
}
