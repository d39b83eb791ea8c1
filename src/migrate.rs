use sqlx::SqlitePool;

/// Create the key-value tables backing [`SqliteBackend`](crate::store::sqlite_store::SqliteBackend).
///
/// Idempotent; safe to run on every open.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // One row per (key, field) of a stored map
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_maps (
            key TEXT NOT NULL,
            field TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (key, field)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per (key, member) of a stored set
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_sets (
            key TEXT NOT NULL,
            member TEXT NOT NULL,
            PRIMARY KEY (key, member)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Reverse lookup for intersections grouped by member
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_sets_member ON kv_sets(member)")
        .execute(pool)
        .await?;

    Ok(())
}
