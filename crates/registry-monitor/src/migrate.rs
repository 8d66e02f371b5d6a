use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await
}

/// Create every table if missing. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Trusted baseline
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS baseline_records (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            holder TEXT,
            category TEXT,
            region TEXT,
            filed_on TEXT,
            status_raw TEXT NOT NULL,
            status TEXT NOT NULL,
            detail_ref TEXT,
            first_seen INTEGER NOT NULL,
            last_updated INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Staging area, empty between runs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_records (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            holder TEXT,
            category TEXT,
            region TEXT,
            filed_on TEXT,
            status_raw TEXT NOT NULL,
            status TEXT NOT NULL,
            detail_ref TEXT,
            staged_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS monitor_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            mode TEXT NOT NULL,
            consecutive_stable_runs INTEGER NOT NULL CHECK (consecutive_stable_runs >= 0),
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at INTEGER NOT NULL,
            duration_secs REAL NOT NULL,
            mode TEXT NOT NULL,
            outcome TEXT NOT NULL,
            total_records INTEGER NOT NULL,
            pages_fetched INTEGER NOT NULL,
            method TEXT NOT NULL,
            new_count INTEGER NOT NULL,
            relevant_change_count INTEGER NOT NULL,
            snapshot_digest TEXT,
            success INTEGER NOT NULL,
            errors TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS change_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id TEXT NOT NULL,
            name TEXT NOT NULL,
            previous_raw TEXT NOT NULL,
            current_raw TEXT NOT NULL,
            previous_status TEXT NOT NULL,
            current_status TEXT NOT NULL,
            region TEXT,
            detail_ref TEXT,
            relevant INTEGER NOT NULL,
            changed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_change_history_record ON change_history(record_id, changed_at)",
    )
    .execute(pool)
    .await?;

    // Single-row lease guarding against concurrent runs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_lease (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT NOT NULL,
            acquired_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
