//! SQLite-backed [`Store`] implementation.
//!
//! Each staging operation runs in one transaction, so a failure anywhere
//! (including a constraint or trigger aborting an insert) rolls back to the
//! pre-call state. A promotion writes the baseline, the mode state and the
//! change history in that same transaction.
//!
//! Record, run and history timestamps are stored as unix milliseconds. The
//! run lease uses unix seconds.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use registry_monitor_core::models::{ChangeEvent, MonitorMode, MonitorState, Record, RunRecord};
use registry_monitor_core::store::{stamp_promoted, Store};
use registry_monitor_core::Status;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Take the run lease for `holder`.
    ///
    /// Succeeds when no lease exists, when the existing one has expired, or
    /// when `holder` already owns it. Fails, without waiting, when another
    /// holder's lease is still live.
    pub async fn acquire_lease(&self, holder: &str, ttl_secs: u64) -> Result<()> {
        let now = Utc::now().timestamp();
        let expires_at = now.saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX));

        let result = sqlx::query(
            r#"
            INSERT INTO run_lease (id, holder, acquired_at, expires_at)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE run_lease.expires_at <= ? OR run_lease.holder = ?
            "#,
        )
        .bind(holder)
        .bind(now)
        .bind(expires_at)
        .bind(now)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(holder, expires_at, "run lease acquired");
            return Ok(());
        }

        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT holder, expires_at FROM run_lease WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((other, until)) => bail!(
                "another run holds the lease ({}) until {}",
                other,
                format_ts_iso(until)
            ),
            None => bail!("could not acquire the run lease"),
        }
    }

    /// Release the lease if `holder` still owns it.
    pub async fn release_lease(&self, holder: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM run_lease WHERE id = 1 AND holder = ?")
            .bind(holder)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            warn!(holder, "run lease was already released or taken over");
        }
        Ok(())
    }

    pub async fn baseline_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM baseline_records")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn staging_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM staging_records")
            .fetch_one(&self.pool)
            .await?)
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

async fn upsert_state(conn: &mut SqliteConnection, state: &MonitorState) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO monitor_state (id, mode, consecutive_stable_runs, updated_at)
        VALUES (1, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            mode = excluded.mode,
            consecutive_stable_runs = excluded.consecutive_stable_runs,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(state.mode.as_str())
    .bind(i64::from(state.consecutive_stable_runs))
    .bind(Utc::now().timestamp_millis())
    .execute(&mut *conn)
    .await
    .with_context(|| "Failed to write monitor state")?;
    Ok(())
}

async fn insert_history(conn: &mut SqliteConnection, events: &[ChangeEvent]) -> Result<()> {
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO change_history (record_id, name, previous_raw, current_raw,
                                        previous_status, current_status, region,
                                        detail_ref, relevant, changed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.name)
        .bind(&event.previous_raw)
        .bind(&event.current_raw)
        .bind(event.previous.as_str())
        .bind(event.current.as_str())
        .bind(&event.region)
        .bind(&event.detail_ref)
        .bind(event.relevant)
        .bind(event.at.timestamp_millis())
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to record change of {}", event.id))?;
    }
    Ok(())
}

fn parse_status(value: &str) -> Result<Status> {
    value
        .parse()
        .with_context(|| format!("corrupt status column value '{}'", value))
}

const RECORD_COLUMNS: &str =
    "id, name, holder, category, region, filed_on, status_raw, status, detail_ref";

fn row_to_record(row: &SqliteRow) -> Result<Record> {
    let status: String = row.try_get("status")?;
    Ok(Record {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        holder: row.try_get("holder")?,
        category: row.try_get("category")?,
        region: row.try_get("region")?,
        filed_on: row.try_get("filed_on")?,
        status_raw: row.try_get("status_raw")?,
        status: parse_status(&status)?,
        detail_ref: row.try_get("detail_ref")?,
        first_seen: None,
        last_updated: None,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn stage(&self, records: &[Record]) -> Result<()> {
        let staged_at = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM staging_records")
            .execute(&mut *tx)
            .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO staging_records (id, name, holder, category, region, filed_on,
                                             status_raw, status, detail_ref, staged_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&record.name)
            .bind(&record.holder)
            .bind(&record.category)
            .bind(&record.region)
            .bind(&record.filed_on)
            .bind(&record.status_raw)
            .bind(record.status.as_str())
            .bind(&record.detail_ref)
            .bind(staged_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to stage record {}", record.id))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn promote(
        &self,
        at: DateTime<Utc>,
        next_state: Option<&MonitorState>,
        history: &[ChangeEvent],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let first_seen: HashMap<String, i64> =
            sqlx::query_as::<_, (String, i64)>("SELECT id, first_seen FROM baseline_records")
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        let staged_rows = sqlx::query(&format!(
            "SELECT {} FROM staging_records ORDER BY id",
            RECORD_COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM baseline_records")
            .execute(&mut *tx)
            .await?;

        let mut count = 0;
        for row in &staged_rows {
            let staged = row_to_record(row)?;
            let previous = match first_seen.get(&staged.id) {
                Some(ms) => Some(from_millis(*ms)?),
                None => None,
            };
            let record = stamp_promoted(staged, previous, at);
            let first = record.first_seen.unwrap_or(at).timestamp_millis();
            let last = record.last_updated.unwrap_or(at).timestamp_millis();

            sqlx::query(
                r#"
                INSERT INTO baseline_records (id, name, holder, category, region, filed_on,
                                              status_raw, status, detail_ref, first_seen, last_updated)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&record.name)
            .bind(&record.holder)
            .bind(&record.category)
            .bind(&record.region)
            .bind(&record.filed_on)
            .bind(&record.status_raw)
            .bind(record.status.as_str())
            .bind(&record.detail_ref)
            .bind(first)
            .bind(last)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to promote record {}", record.id))?;
            count += 1;
        }

        sqlx::query("DELETE FROM staging_records")
            .execute(&mut *tx)
            .await?;

        if let Some(state) = next_state {
            upsert_state(&mut *tx, state).await?;
        }
        insert_history(&mut *tx, history).await?;

        tx.commit().await?;
        Ok(count)
    }

    async fn discard(&self, next_state: Option<&MonitorState>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM staging_records")
            .execute(&mut *tx)
            .await?;
        if let Some(state) = next_state {
            upsert_state(&mut *tx, state).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn read_baseline(&self) -> Result<Vec<Record>> {
        let rows = sqlx::query(&format!(
            "SELECT {}, first_seen, last_updated FROM baseline_records ORDER BY id",
            RECORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let mut record = row_to_record(row)?;
                record.first_seen = Some(from_millis(row.try_get("first_seen")?)?);
                record.last_updated = Some(from_millis(row.try_get("last_updated")?)?);
                Ok(record)
            })
            .collect()
    }

    async fn read_staging(&self) -> Result<Vec<Record>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM staging_records ORDER BY id",
            RECORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn read_state(&self) -> Result<MonitorState> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT mode, consecutive_stable_runs FROM monitor_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some((mode, counter)) = row else {
            return Ok(MonitorState::initial());
        };

        let mode: MonitorMode = mode
            .parse()
            .with_context(|| "monitor_state holds an invalid mode")?;
        let consecutive_stable_runs = u32::try_from(counter)
            .with_context(|| format!("monitor_state counter out of range: {}", counter))?;

        Ok(MonitorState {
            mode,
            consecutive_stable_runs,
        })
    }

    async fn write_state(&self, state: &MonitorState) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_state(&mut *conn, state).await
    }

    async fn append_run_record(&self, record: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_records (started_at, duration_secs, mode, outcome, total_records,
                                     pages_fetched, method, new_count, relevant_change_count,
                                     snapshot_digest, success, errors)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.started_at.timestamp_millis())
        .bind(record.duration_secs)
        .bind(record.mode.as_str())
        .bind(&record.outcome)
        .bind(record.total_records as i64)
        .bind(i64::from(record.pages_fetched))
        .bind(&record.method)
        .bind(record.new_count as i64)
        .bind(record.relevant_change_count as i64)
        .bind(&record.snapshot_digest)
        .bind(record.success)
        .bind(&record.errors)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_run_record(&self) -> Result<Option<RunRecord>> {
        let row = sqlx::query("SELECT * FROM run_records ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mode: String = row.try_get("mode")?;
        Ok(Some(RunRecord {
            started_at: from_millis(row.try_get("started_at")?)?,
            duration_secs: row.try_get("duration_secs")?,
            mode: mode.parse()?,
            outcome: row.try_get("outcome")?,
            total_records: row.try_get::<i64, _>("total_records")? as usize,
            pages_fetched: row.try_get::<i64, _>("pages_fetched")? as u32,
            method: row.try_get("method")?,
            new_count: row.try_get::<i64, _>("new_count")? as usize,
            relevant_change_count: row.try_get::<i64, _>("relevant_change_count")? as usize,
            snapshot_digest: row.try_get("snapshot_digest")?,
            success: row.try_get("success")?,
            errors: row.try_get("errors")?,
        }))
    }

    async fn history_for(&self, id: &str, limit: usize) -> Result<Vec<ChangeEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT record_id, name, previous_raw, current_raw, previous_status,
                   current_status, region, detail_ref, relevant, changed_at
            FROM change_history
            WHERE record_id = ?
            ORDER BY changed_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let previous: String = row.try_get("previous_status")?;
                let current: String = row.try_get("current_status")?;
                Ok(ChangeEvent {
                    id: row.try_get("record_id")?,
                    name: row.try_get("name")?,
                    previous_raw: row.try_get("previous_raw")?,
                    current_raw: row.try_get("current_raw")?,
                    previous: parse_status(&previous)?,
                    current: parse_status(&current)?,
                    region: row.try_get("region")?,
                    detail_ref: row.try_get("detail_ref")?,
                    relevant: row.try_get("relevant")?,
                    at: from_millis(row.try_get("changed_at")?)?,
                })
            })
            .collect()
    }
}
