//! Crash-recovery tests: orphaned `Running` records are reconciled on
//! the next bootstrap, scoped to the owning node.

use std::sync::Arc;

use mljobs::{
    Backend, FileGateway, JobGateway, JobRecord, JobStatus, LifecycleController, SqliteGateway,
    StatusFilter,
};

/// Simulates a crash: the record reaches `Running` and the finalizing
/// transition never happens (no controller drop hooks exist on purpose;
/// a killed process leaves exactly this state behind).
async fn strand_running_job(gateway: &Arc<dyn JobGateway>, key: &str, owner: &str) {
    let mut record = JobRecord::new("revenue-model", key, Backend::Custom, owner);
    gateway.create(&record).await.unwrap();
    record.mark_running().unwrap();
    gateway.update(&record).await.unwrap();
}

async fn check_restart_fails_stranded_job(gateway: Arc<dyn JobGateway>) {
    gateway.initialize().await.unwrap();
    strand_running_job(&gateway, "m1", "node-a").await;

    // "Restart": a fresh controller bootstraps over the same store.
    let controller = LifecycleController::bootstrap(Arc::clone(&gateway), "node-a")
        .await
        .unwrap();

    assert_eq!(
        controller
            .check_status("revenue-model", "m1", Backend::Custom)
            .await
            .unwrap(),
        JobStatus::Failed
    );

    let record = gateway
        .fetch("revenue-model", "m1", Backend::Custom, StatusFilter::Any)
        .await
        .unwrap()
        .unwrap();
    assert!(record.end_time < mljobs::constants::end_time_sentinel());
}

#[tokio::test]
async fn fs_restart_fails_stranded_running_job() {
    let dir = tempfile::tempdir().unwrap();
    let gateway: Arc<dyn JobGateway> = Arc::new(FileGateway::new(dir.path()));
    check_restart_fails_stranded_job(gateway).await;
}

#[tokio::test]
async fn sqlite_restart_fails_stranded_running_job() {
    let gateway: Arc<dyn JobGateway> = Arc::new(SqliteGateway::open_in_memory().unwrap());
    check_restart_fails_stranded_job(gateway).await;
}

#[tokio::test]
async fn sqlite_restart_over_database_file_recovers() {
    // Same scenario, but through an actual on-disk database reopened by
    // path, the way two process instances would share it.
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("jobs.db");

    {
        let gateway: Arc<dyn JobGateway> = Arc::new(SqliteGateway::open(&db).unwrap());
        gateway.initialize().await.unwrap();
        strand_running_job(&gateway, "m1", "node-a").await;
        // First process instance "crashes" here.
    }

    let gateway: Arc<dyn JobGateway> = Arc::new(SqliteGateway::open(&db).unwrap());
    let controller = LifecycleController::bootstrap(Arc::clone(&gateway), "node-a")
        .await
        .unwrap();
    assert_eq!(
        controller
            .check_status("revenue-model", "m1", Backend::Custom)
            .await
            .unwrap(),
        JobStatus::Failed
    );
}

async fn check_recovery_is_idempotent(gateway: Arc<dyn JobGateway>) {
    gateway.initialize().await.unwrap();
    strand_running_job(&gateway, "m1", "node-a").await;

    assert_eq!(gateway.recover_orphans("node-a").await.unwrap(), 1);
    assert_eq!(gateway.recover_orphans("node-a").await.unwrap(), 0);
}

#[tokio::test]
async fn fs_recovery_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let gateway: Arc<dyn JobGateway> = Arc::new(FileGateway::new(dir.path()));
    check_recovery_is_idempotent(gateway).await;
}

#[tokio::test]
async fn sqlite_recovery_is_idempotent() {
    let gateway: Arc<dyn JobGateway> = Arc::new(SqliteGateway::open_in_memory().unwrap());
    check_recovery_is_idempotent(gateway).await;
}

async fn check_recovery_respects_ownership(gateway: Arc<dyn JobGateway>) {
    gateway.initialize().await.unwrap();
    strand_running_job(&gateway, "mine", "node-a").await;
    strand_running_job(&gateway, "theirs", "node-b").await;

    LifecycleController::bootstrap(Arc::clone(&gateway), "node-a")
        .await
        .unwrap();

    // node-b's job is legitimately still running elsewhere.
    let theirs = gateway
        .fetch("revenue-model", "theirs", Backend::Custom, StatusFilter::Any)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(theirs.status, JobStatus::Running);

    let mine = gateway
        .fetch("revenue-model", "mine", Backend::Custom, StatusFilter::Any)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mine.status, JobStatus::Failed);
}

#[tokio::test]
async fn fs_recovery_respects_ownership() {
    let dir = tempfile::tempdir().unwrap();
    let gateway: Arc<dyn JobGateway> = Arc::new(FileGateway::new(dir.path()));
    check_recovery_respects_ownership(gateway).await;
}

#[tokio::test]
async fn sqlite_recovery_respects_ownership() {
    let gateway: Arc<dyn JobGateway> = Arc::new(SqliteGateway::open_in_memory().unwrap());
    check_recovery_respects_ownership(gateway).await;
}

#[tokio::test]
async fn recovered_identity_accepts_resubmission() {
    let gateway: Arc<dyn JobGateway> = Arc::new(SqliteGateway::open_in_memory().unwrap());
    gateway.initialize().await.unwrap();
    strand_running_job(&gateway, "m1", "node-a").await;

    let controller = LifecycleController::bootstrap(Arc::clone(&gateway), "node-a")
        .await
        .unwrap();

    // The failed record no longer blocks the identity.
    let mut handle = controller
        .pre_start("revenue-model", "m1", Backend::Custom)
        .await
        .unwrap();
    controller
        .execute(&mut handle, Box::new(|| Ok(b"second attempt".to_vec())))
        .await
        .unwrap();
    assert_eq!(handle.status(), JobStatus::Done);
}
