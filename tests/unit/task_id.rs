//! Unit tests for deterministic task ids

use crate::support::{date, symbols};
use market_data_ingest::downloader::BatchDownloadCoordinator;

#[test]
fn test_task_id_is_stable_across_calls() {
    let batch = symbols(&["ETHUSDT", "BTCUSDT"]);
    let first = BatchDownloadCoordinator::generate_task_id("daily", &batch, date(2023, 1, 1), date(2023, 6, 30));
    let second = BatchDownloadCoordinator::generate_task_id("daily", &batch, date(2023, 1, 1), date(2023, 6, 30));

    assert_eq!(first, second);
    assert_eq!(first.len(), 64);
    assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn test_task_id_permutations_collide() {
    let orders = [
        symbols(&["A", "B", "C"]),
        symbols(&["C", "B", "A"]),
        symbols(&["B", "C", "A"]),
    ];
    let ids: Vec<String> = orders
        .iter()
        .map(|batch| BatchDownloadCoordinator::generate_task_id("daily", batch, date(2024, 1, 1), date(2024, 1, 2)))
        .collect();

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_task_id_distinguishes_jobs() {
    let base = symbols(&["A", "B"]);
    let start = date(2024, 1, 1);
    let end = date(2024, 1, 2);
    let reference = BatchDownloadCoordinator::generate_task_id("daily", &base, start, end);

    let variants = [
        BatchDownloadCoordinator::generate_task_id("weekly", &base, start, end),
        BatchDownloadCoordinator::generate_task_id("daily", &symbols(&["A"]), start, end),
        BatchDownloadCoordinator::generate_task_id("daily", &symbols(&["A", "B", "C"]), start, end),
        BatchDownloadCoordinator::generate_task_id("daily", &base, date(2023, 12, 31), end),
        BatchDownloadCoordinator::generate_task_id("daily", &base, start, date(2024, 1, 3)),
        BatchDownloadCoordinator::generate_task_id("daily", &symbols(&["AB"]), start, end),
    ];
    for variant in variants {
        assert_ne!(variant, reference);
    }
}
