use statsweep::{orchestrator, PipelineError, PoolConfig, StatsScanner, WorkPool};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn create_file(root: &Path, name: &str, content: &str) -> PathBuf {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(&path, content).await.unwrap();
    path
}

fn pool() -> WorkPool {
    WorkPool::new(PoolConfig {
        size: 4,
        task_timeout: Duration::from_secs(30),
    })
}

fn scanner() -> Arc<StatsScanner> {
    Arc::new(StatsScanner::with_defaults().unwrap())
}

/// One missing file out of five fails its own task only: the dataset
/// reflects the four surviving runs and the failure report names exactly
/// the missing file.
#[tokio::test]
async fn test_partial_failure_tolerance() {
    let dir = TempDir::new().unwrap();
    let mut files = Vec::new();
    for i in 0..5 {
        files.push(
            create_file(
                dir.path(),
                &format!("run{i}/stats.txt"),
                &format!("cpu0.ipc 1.{i}\ncpu1.ipc 2.{i}\n"),
            )
            .await,
        );
    }

    let pool = pool();
    let (inventories, scan_failures) =
        orchestrator::scan_files(&pool, scanner(), files.clone()).await;
    assert_eq!(inventories.len(), 5);
    assert!(scan_failures.is_empty());
    let catalog = statsweep::aggregator::aggregate(&inventories);

    // Lose one file between scan and parse
    tokio::fs::remove_file(&files[2]).await.unwrap();

    let tasks = orchestrator::expand_selection(
        &[r"cpu\d+.ipc".to_string()],
        &files,
        dir.path(),
        &catalog,
    )
    .unwrap();
    let orchestrator = orchestrator::ParseOrchestrator::new().unwrap();
    let outcome = orchestrator.parse_batch(&pool, tasks).await.unwrap();

    let dataset = outcome.dataset.expect("four runs should survive");
    assert_eq!(dataset.row_count(), 4);
    assert!(dataset.get("run2", r"cpu\d+.ipc..0").is_none());

    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.failures[0].file_path.contains("run2"));
    assert_eq!(outcome.failures[0].variable_group, r"cpu\d+.ipc");
    assert!(outcome.failures[0].error_message.contains("cannot access"));
}

/// A scan batch tolerates unreadable files the same way: siblings still
/// produce inventories, the bad file produces one failure entry.
#[tokio::test]
async fn test_scan_batch_partial_failure() {
    let dir = TempDir::new().unwrap();
    let good = create_file(dir.path(), "ok/stats.txt", "sim_seconds 0.1\n").await;
    let missing = dir.path().join("gone/stats.txt");

    let pool = pool();
    let (inventories, failures) =
        orchestrator::scan_files(&pool, scanner(), vec![good, missing.clone()]).await;

    assert_eq!(inventories.len(), 1);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].variable_group, "scan");
    assert!(failures[0].file_path.contains("gone"));
}

/// A batch where every task fails returns no dataset plus the full
/// failure report, without raising on the await.
#[tokio::test]
async fn test_zero_success_batch_returns_no_dataset() {
    let dir = TempDir::new().unwrap();
    create_file(dir.path(), "run0/stats.txt", "cpu.ipc 1.0\n").await;

    let pool = pool();
    let report = orchestrator::scan_directory(&pool, scanner(), dir.path(), "stats.txt", 0)
        .await
        .unwrap();

    // Every file vanishes before parse
    tokio::fs::remove_file(dir.path().join("run0/stats.txt"))
        .await
        .unwrap();

    let tasks = orchestrator::expand_selection(
        &["cpu.ipc".to_string()],
        &report.files,
        dir.path(),
        &report.catalog,
    )
    .unwrap();
    let orchestrator = orchestrator::ParseOrchestrator::new().unwrap();
    let outcome = orchestrator.parse_batch(&pool, tasks).await.unwrap();

    assert!(outcome.dataset.is_none());
    assert_eq!(outcome.failures.len(), 1);
}

/// Selecting a variable the catalog does not know is a caller error
/// surfaced before any task runs.
#[tokio::test]
async fn test_unknown_variable_selection() {
    let dir = TempDir::new().unwrap();
    create_file(dir.path(), "run0/stats.txt", "sim_seconds 0.1\n").await;

    let pool = pool();
    let err = orchestrator::parse_directory(
        &pool,
        scanner(),
        dir.path(),
        "stats.txt",
        &["does.not.exist".to_string()],
    )
    .await
    .unwrap_err();

    let pipeline_err = err
        .downcast_ref::<PipelineError>()
        .expect("typed pipeline error");
    assert!(matches!(
        pipeline_err,
        PipelineError::UnknownVariable { .. }
    ));
}

/// A corrupt file (nothing classifies) is not an error at scan time: it
/// contributes an empty inventory and simply no columns at parse time.
#[tokio::test]
async fn test_corrupt_file_scans_empty() {
    let dir = TempDir::new().unwrap();
    create_file(dir.path(), "good/stats.txt", "sim_seconds 0.1\n").await;
    create_file(dir.path(), "junk/stats.txt", "<<<< binary-ish garbage >>>>\n").await;

    let pool = pool();
    let report = orchestrator::scan_directory(&pool, scanner(), dir.path(), "stats.txt", 0)
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    assert!(report.catalog.get("sim_seconds").is_some());
    assert_eq!(report.catalog.len(), 1);
}

/// A hung task trips its individual timeout and is reported; siblings
/// complete normally.
#[tokio::test]
async fn test_task_timeout_is_reported() {
    let dir = TempDir::new().unwrap();
    let good = create_file(dir.path(), "run0/stats.txt", "sim_seconds 0.1\n").await;

    let tight_pool = WorkPool::new(PoolConfig {
        size: 2,
        task_timeout: Duration::from_millis(50),
    });

    // A named pipe would be the real hang; a sleeping task stands in for
    // one without platform setup.
    let (results, failures) = tight_pool
        .run_batch(
            vec![("slow", PathBuf::new()), ("fast", good)],
            |(tag, _)| (tag.to_string(), "probe".to_string()),
            |(tag, _)| async move {
                if tag == "slow" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, PipelineError>(tag)
            },
        )
        .await;

    assert_eq!(results, vec!["fast"]);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].file_path, "slow");
    assert!(failures[0].error_message.contains("timed out"));
}
