//! Integration tests for graceful shutdown: pausing and later resumption

use crate::support::{date, symbols, Harness, Reply, ScriptedProvider};
use market_data_ingest::downloader::{BatchOptions, RetryPolicy};
use market_data_ingest::provider::ProviderError;
use market_data_ingest::resume::CheckpointStatus;
use market_data_ingest::shutdown::ShutdownCoordinator;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_shutdown_pauses_and_resume_finishes() {
    let harness = Harness::new(ScriptedProvider::new().with_delay(Duration::from_millis(80)));
    let shutdown = ShutdownCoordinator::shared();
    let coordinator = harness.coordinator(1).with_shutdown(shutdown.clone());
    let batch = symbols(&["A", "B", "C"]);
    let (start, end) = (date(2024, 1, 1), date(2024, 1, 31));

    let (result, _) = tokio::join!(
        coordinator.download_batch(&batch, start, end, "daily", BatchOptions::default()),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.request_shutdown();
        }
    );
    let result = result.unwrap();

    // The in-flight symbol finishes, nothing new is dispatched
    assert_eq!(harness.provider.calls(), vec!["A".to_string()]);
    assert_eq!(result.completed, 1);
    assert_eq!(result.failed, 0);

    let cp = harness.state.load_checkpoint(&result.task_id).unwrap();
    assert_eq!(cp.status, CheckpointStatus::Paused);
    assert!(cp.error_message.is_none());
    assert_eq!(cp.completed_symbols.len(), 1);
    let events = harness.state.get_task_logs(&result.task_id, 1);
    assert_eq!(events[0].event_type, "paused");

    harness.provider.reset_calls();
    let resumed = harness
        .coordinator(2)
        .download_batch(&batch, start, end, "daily", BatchOptions::default())
        .await
        .unwrap();

    let mut calls = harness.provider.calls();
    calls.sort();
    assert_eq!(calls, symbols(&["B", "C"]));
    assert!(resumed.is_complete());
    assert_eq!(
        harness.state.load_checkpoint(&resumed.task_id).unwrap().status,
        CheckpointStatus::Completed
    );
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff_sleep() {
    let harness = Harness::new(ScriptedProvider::new().fallback(
        "SLOW",
        Reply::Fail(ProviderError::NetworkError("unreachable".into())),
    ));
    let shutdown = ShutdownCoordinator::shared();
    let coordinator = harness
        .coordinator(1)
        .with_shutdown(shutdown.clone())
        .with_retry_policy(RetryPolicy::new(
            5,
            Duration::from_secs(30),
            Duration::from_secs(30),
        ));
    let started = Instant::now();

    let slow_symbols = symbols(&["SLOW"]);
    let (result, _) = tokio::join!(
        coordinator.download_batch(
            &slow_symbols,
            date(2024, 1, 1),
            date(2024, 1, 2),
            "daily",
            BatchOptions::default()
        ),
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            shutdown.request_shutdown();
        }
    );
    let result = result.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(harness.provider.calls_for("SLOW"), 1);
    // Interrupted symbols are neither completed nor failed
    assert_eq!(result.completed, 0);
    assert_eq!(result.failed, 0);

    let cp = harness.state.load_checkpoint(&result.task_id).unwrap();
    assert_eq!(cp.status, CheckpointStatus::Paused);
    assert_eq!(cp.retry_count, 0);
}

#[tokio::test]
async fn test_shutdown_before_resume_leaves_tasks_pending() {
    let harness = Harness::new(ScriptedProvider::new().script("A", vec![Reply::Empty]));
    let batch = symbols(&["A"]);
    harness
        .coordinator(1)
        .download_batch(&batch, date(2024, 1, 1), date(2024, 1, 2), "daily", BatchOptions::default())
        .await
        .unwrap();

    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    harness.provider.reset_calls();

    let outcomes = harness
        .coordinator(1)
        .with_shutdown(shutdown)
        .resume_failed_downloads(None, None)
        .await;

    assert!(outcomes.is_empty());
    assert!(harness.provider.calls().is_empty());
    assert_eq!(harness.state.get_pending_tasks(None).len(), 1);
}
