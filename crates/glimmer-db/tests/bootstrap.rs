//! Bootstrap and migration tests against in-memory SQLite.

use glimmer_db::{health_check, open_memory, run_migrations};

#[tokio::test]
async fn open_applies_schema_and_passes_health_check() {
    let pool = open_memory().await.unwrap();
    health_check(&pool).await.unwrap();

    for table in ["jobs", "upscale_jobs", "banned_words"] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("{table} query failed: {e}"));
        assert_eq!(count, 0, "{table} should start empty");
    }
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let pool = open_memory().await.unwrap();
    // A second (and third) application against an up-to-date schema must
    // be a no-op.
    run_migrations(&pool).await.unwrap();
    run_migrations(&pool).await.unwrap();
    health_check(&pool).await.unwrap();
}

#[tokio::test]
async fn additive_column_migration_fills_old_schema() {
    // Simulate a v1 database that predates the adapters column.
    let pool = open_memory().await.unwrap();
    sqlx::query("ALTER TABLE jobs DROP COLUMN adapters")
        .execute(&pool)
        .await
        .unwrap();

    run_migrations(&pool).await.unwrap();

    let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('jobs')")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(columns.iter().any(|c| c == "adapters"));
}

#[tokio::test]
async fn foreign_keys_are_enforced() {
    let pool = open_memory().await.unwrap();
    let orphan = sqlx::query(
        "INSERT INTO upscale_jobs \
             (id, source_job_id, requester_id, origin_scope_id, origin_channel_id, \
              status, source_image_filename, upscale_model, created_at) \
         VALUES (?, ?, 'u', 's', 'c', 'queued', 'img.png', '4x.pth', 0)",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(uuid::Uuid::new_v4())
    .execute(&pool)
    .await;
    assert!(orphan.is_err(), "orphan upscale row must be rejected");
}
