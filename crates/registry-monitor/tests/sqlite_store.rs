//! SQLite store behavior: transactional staging, promotion rollback, state
//! parsing, audit records, history, and the run lease.

use chrono::{DateTime, Utc};
use registry_monitor::db;
use registry_monitor::migrate;
use registry_monitor::sqlite_store::SqliteStore;
use registry_monitor_core::models::{ChangeEvent, MonitorMode, MonitorState, Record, RunRecord};
use registry_monitor_core::store::Store;
use registry_monitor_core::Status;
use tempfile::TempDir;

async fn open_store() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("data").join("regmon.sqlite"))
        .await
        .unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    (tmp, SqliteStore::new(pool))
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

fn change(id: &str, secs: i64) -> ChangeEvent {
    ChangeEvent {
        id: id.to_string(),
        name: "Project".to_string(),
        previous_raw: "En Calificación".to_string(),
        current_raw: "Aprobado".to_string(),
        previous: Status::UnderReviewActive,
        current: Status::Approved,
        region: None,
        detail_ref: None,
        relevant: true,
        at: ts(secs),
    }
}

fn rec(id: &str, raw: &str) -> Record {
    let mut record = Record::new(id, format!("Project {}", id), raw);
    record.region = Some("Antofagasta".to_string());
    record
}

#[tokio::test]
async fn test_schema_is_idempotent() {
    let (_tmp, store) = open_store().await;
    migrate::apply_schema(store.pool()).await.unwrap();
    assert_eq!(store.read_state().await.unwrap(), MonitorState::initial());
}

#[tokio::test]
async fn test_stage_replaces_staging() {
    let (_tmp, store) = open_store().await;
    store
        .stage(&[rec("seia_1000001", "Aprobado"), rec("seia_1000002", "Aprobado")])
        .await
        .unwrap();
    store.stage(&[rec("seia_1000003", "Aprobado")]).await.unwrap();

    let staged = store.read_staging().await.unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].id, "seia_1000003");
    assert_eq!(staged[0].region.as_deref(), Some("Antofagasta"));
    assert!(store.read_baseline().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_stage_rolls_back() {
    let (_tmp, store) = open_store().await;
    store.stage(&[rec("seia_1000001", "Aprobado")]).await.unwrap();

    // Duplicate primary key aborts the second insert.
    let dup = [rec("seia_1000002", "Aprobado"), rec("seia_1000002", "Aprobado")];
    assert!(store.stage(&dup).await.is_err());

    let staged = store.read_staging().await.unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].id, "seia_1000001");
}

#[tokio::test]
async fn test_promote_preserves_first_seen_and_clears_staging() {
    let (_tmp, store) = open_store().await;
    store.stage(&[rec("seia_1000001", "En Calificación")]).await.unwrap();
    assert_eq!(store.promote(ts(1_000), None, &[]).await.unwrap(), 1);

    store
        .stage(&[rec("seia_1000001", "Aprobado"), rec("seia_1000002", "Aprobado")])
        .await
        .unwrap();
    assert_eq!(store.promote(ts(2_000), None, &[]).await.unwrap(), 2);

    let baseline = store.read_baseline().await.unwrap();
    assert_eq!(baseline.len(), 2);
    assert_eq!(baseline[0].status, Status::Approved);
    assert_eq!(baseline[0].first_seen, Some(ts(1_000)));
    assert_eq!(baseline[0].last_updated, Some(ts(2_000)));
    assert_eq!(baseline[1].first_seen, Some(ts(2_000)));
    assert_eq!(store.staging_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_promote_failure_midway_leaves_baseline_and_staging() {
    let (_tmp, store) = open_store().await;
    store
        .stage(&[rec("seia_1000001", "Aprobado"), rec("seia_1000002", "Aprobado")])
        .await
        .unwrap();
    store.promote(ts(1_000), None, &[]).await.unwrap();
    let before = store.read_baseline().await.unwrap();

    // Abort the promotion when it reaches one specific record, after the
    // baseline has already been cleared and partially refilled.
    sqlx::query(
        r#"
        CREATE TRIGGER fail_promotion BEFORE INSERT ON baseline_records
        WHEN NEW.id = 'seia_1000009'
        BEGIN
            SELECT RAISE(ABORT, 'injected promotion failure');
        END
        "#,
    )
    .execute(store.pool())
    .await
    .unwrap();

    store
        .stage(&[
            rec("seia_1000001", "Aprobado"),
            rec("seia_1000005", "Aprobado"),
            rec("seia_1000009", "Aprobado"),
        ])
        .await
        .unwrap();
    let err = store.promote(ts(2_000), None, &[]).await.unwrap_err();
    assert!(format!("{:#}", err).contains("injected promotion failure"));

    assert_eq!(store.read_baseline().await.unwrap(), before);
    assert_eq!(store.read_staging().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_discard_keeps_baseline() {
    let (_tmp, store) = open_store().await;
    store.stage(&[rec("seia_1000001", "Aprobado")]).await.unwrap();
    store.promote(ts(1_000), None, &[]).await.unwrap();
    store.stage(&[rec("seia_1000002", "Aprobado")]).await.unwrap();
    store.discard(None).await.unwrap();

    assert_eq!(store.staging_count().await.unwrap(), 0);
    assert_eq!(store.baseline_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_state_round_trip_and_unknown_mode_is_an_error() {
    let (_tmp, store) = open_store().await;
    let state = MonitorState {
        mode: MonitorMode::Normal,
        consecutive_stable_runs: 3,
    };
    store.write_state(&state).await.unwrap();
    assert_eq!(store.read_state().await.unwrap(), state);

    sqlx::query("UPDATE monitor_state SET mode = 'PAUSED' WHERE id = 1")
        .execute(store.pool())
        .await
        .unwrap();
    let err = store.read_state().await.unwrap_err();
    assert!(format!("{:#}", err).contains("PAUSED"));
}

#[tokio::test]
async fn test_run_records_append_and_read_latest() {
    let (_tmp, store) = open_store().await;
    assert!(store.last_run_record().await.unwrap().is_none());

    let mut record = RunRecord {
        started_at: ts(1_700_000_000),
        duration_secs: 1.5,
        mode: MonitorMode::Bootstrap,
        outcome: "promoted".to_string(),
        total_records: 10,
        pages_fetched: 2,
        method: "export".to_string(),
        new_count: 0,
        relevant_change_count: 0,
        snapshot_digest: Some("abc".to_string()),
        success: true,
        errors: None,
    };
    store.append_run_record(&record).await.unwrap();

    record.started_at = ts(1_700_000_100);
    record.outcome = "rejected".to_string();
    record.mode = MonitorMode::Normal;
    record.success = false;
    record.errors = Some("approved ratio 50.0% is below the minimum 90.0%".to_string());
    store.append_run_record(&record).await.unwrap();

    let last = store.last_run_record().await.unwrap().unwrap();
    assert_eq!(last, record);
}

#[tokio::test]
async fn test_history_newest_first() {
    let (_tmp, store) = open_store().await;
    let event = |secs: i64, from: &str, to: &str, relevant: bool| ChangeEvent {
        id: "seia_1000001".to_string(),
        name: "Project".to_string(),
        previous_raw: from.to_string(),
        current_raw: to.to_string(),
        previous: Status::from_raw(from),
        current: Status::from_raw(to),
        region: None,
        detail_ref: Some("https://registry.example.org/p/1".to_string()),
        relevant,
        at: ts(secs),
    };
    store
        .promote(
            ts(200),
            None,
            &[
                event(100, "En Admisión", "En Calificación", false),
                event(200, "En Calificación", "Aprobado", true),
            ],
        )
        .await
        .unwrap();

    let history = store.history_for("seia_1000001", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].current, Status::Approved);
    assert!(history[0].relevant);
    assert_eq!(history[1].at, ts(100));
    assert_eq!(store.history_for("seia_1000001", 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_lease_blocks_second_holder_until_released() {
    let (_tmp, store) = open_store().await;
    store.acquire_lease("run-a", 3600).await.unwrap();
    // Re-entrant for the same holder.
    store.acquire_lease("run-a", 3600).await.unwrap();

    let err = store.acquire_lease("run-b", 3600).await.unwrap_err();
    assert!(err.to_string().contains("run-a"));

    store.release_lease("run-a").await.unwrap();
    store.acquire_lease("run-b", 3600).await.unwrap();
}

#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let (_tmp, store) = open_store().await;
    sqlx::query(
        "INSERT INTO run_lease (id, holder, acquired_at, expires_at) VALUES (1, 'crashed', 0, 10)",
    )
    .execute(store.pool())
    .await
    .unwrap();

    store.acquire_lease("run-b", 3600).await.unwrap();
    // The old holder's release must not remove the new lease.
    store.release_lease("crashed").await.unwrap();
    assert!(store.acquire_lease("run-c", 3600).await.is_err());
}

#[tokio::test]
async fn test_promote_writes_state_and_history_in_one_transaction() {
    let (_tmp, store) = open_store().await;
    store.stage(&[rec("seia_1000001", "En Calificación")]).await.unwrap();
    store.promote(ts(1_000), None, &[]).await.unwrap();
    let before = store.read_baseline().await.unwrap();

    sqlx::query(
        r#"
        CREATE TRIGGER fail_history BEFORE INSERT ON change_history
        BEGIN
            SELECT RAISE(ABORT, 'history disk full');
        END
        "#,
    )
    .execute(store.pool())
    .await
    .unwrap();

    let normal = MonitorState {
        mode: MonitorMode::Normal,
        consecutive_stable_runs: 2,
    };
    store.stage(&[rec("seia_1000001", "Aprobado")]).await.unwrap();
    let err = store
        .promote(ts(2_000), Some(&normal), &[change("seia_1000001", 2_000)])
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("history disk full"));

    assert_eq!(store.read_baseline().await.unwrap(), before);
    assert_eq!(store.read_state().await.unwrap(), MonitorState::initial());
    assert_eq!(store.staging_count().await.unwrap(), 1);

    sqlx::query("DROP TRIGGER fail_history")
        .execute(store.pool())
        .await
        .unwrap();
    store
        .promote(ts(2_000), Some(&normal), &[change("seia_1000001", 2_000)])
        .await
        .unwrap();
    assert_eq!(store.read_baseline().await.unwrap()[0].status, Status::Approved);
    assert_eq!(store.read_state().await.unwrap(), normal);
    assert_eq!(store.history_for("seia_1000001", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_discard_writes_state() {
    let (_tmp, store) = open_store().await;
    store.stage(&[rec("seia_1000001", "Aprobado")]).await.unwrap();
    let quarantine = MonitorState {
        mode: MonitorMode::Quarantine,
        consecutive_stable_runs: 0,
    };
    store.discard(Some(&quarantine)).await.unwrap();
    assert_eq!(store.staging_count().await.unwrap(), 0);
    assert_eq!(store.read_state().await.unwrap(), quarantine);
}

#[tokio::test]
async fn test_timestamps_keep_milliseconds() {
    let (_tmp, store) = open_store().await;
    let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
    store.stage(&[rec("seia_1000001", "Aprobado")]).await.unwrap();
    store
        .promote(at, None, &[change("seia_1000001", 0)])
        .await
        .unwrap();

    let baseline = store.read_baseline().await.unwrap();
    assert_eq!(baseline[0].first_seen, Some(at));
    assert_eq!(baseline[0].last_updated, Some(at));

    let record = RunRecord {
        started_at: at,
        duration_secs: 0.25,
        mode: MonitorMode::Bootstrap,
        outcome: "promoted".to_string(),
        total_records: 1,
        pages_fetched: 1,
        method: "export".to_string(),
        new_count: 0,
        relevant_change_count: 0,
        snapshot_digest: None,
        success: true,
        errors: None,
    };
    store.append_run_record(&record).await.unwrap();
    assert_eq!(store.last_run_record().await.unwrap().unwrap().started_at, at);
}
