use super::*;
use listing_watcher::{EventKind, ListingStatus, RunStatus};

#[tokio::test]
async fn test_empty_store_two_new_listings() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let fetcher = ScriptedFetcher::new(vec![Step::Listings(vec![listing("A", 4000), listing("B", 4200)])]);
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    let report = runner.run_once().await;

    assert_eq!(report.status(), RunStatus::Success);
    let batches = notifier.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert!(batches[0].iter().all(|e| e.kind() == EventKind::NewListing));

    let active = store.active_listings().await.unwrap();
    assert_eq!(active.len(), 2);
}

#[tokio::test]
async fn test_price_drop_updates_store() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let fetcher = ScriptedFetcher::new(vec![
        Step::Listings(vec![listing("A", 4000)]),
        Step::Listings(vec![listing("A", 3500)]),
    ]);
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    runner.run_cycle().await;
    let report = runner.run_cycle().await;

    assert_eq!(report.run.price_drops, 1);
    let batches = notifier.batches();
    match &batches[1][..] {
        [ListingEvent::PriceDrop { listing, old_price, new_price }] => {
            assert_eq!(listing.id, "A");
            assert_eq!((*old_price, *new_price), (4000, 3500));
        }
        other => panic!("unexpected events: {:?}", other),
    }
    assert_eq!(store.get("A").await.unwrap().unwrap().price, 3500);
}

#[tokio::test]
async fn test_higher_price_is_silent() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let fetcher = ScriptedFetcher::new(vec![
        Step::Listings(vec![listing("A", 4000)]),
        Step::Listings(vec![listing("A", 4400)]),
    ]);
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    runner.run_cycle().await;
    let report = runner.run_cycle().await;

    assert_eq!(report.run.total_events(), 0);
    assert_eq!(notifier.batches().len(), 1);
    assert_eq!(store.get("A").await.unwrap().unwrap().price, 4400);
}

#[tokio::test]
async fn test_missing_listing_is_removed() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let fetcher = ScriptedFetcher::new(vec![
        Step::Listings(vec![listing("A", 4000), listing("B", 4100)]),
        Step::Listings(vec![listing("A", 4000)]),
    ]);
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    runner.run_cycle().await;
    let before = store.get("A").await.unwrap().unwrap();
    let report = runner.run_cycle().await;

    assert_eq!(report.run.removed_listings, 1);
    let batches = notifier.batches();
    assert_eq!(batches[1].len(), 1);
    assert_eq!(batches[1][0].kind(), EventKind::Removed);
    assert_eq!(batches[1][0].listing_id(), "B");

    assert_eq!(store.get("B").await.unwrap().unwrap().status, ListingStatus::Removed);
    let after = store.get("A").await.unwrap().unwrap();
    assert_eq!(after.status, ListingStatus::Active);
    assert_eq!(after.price, before.price);
    assert_eq!(after.first_seen, before.first_seen);
}

#[tokio::test]
async fn test_notifier_failure_keeps_store_updates() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::failing();
    let fetcher = ScriptedFetcher::new(vec![Step::Listings(vec![listing("A", 4000), listing("B", 4200)])]);
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    let report = runner.run_once().await;

    assert_eq!(report.status(), RunStatus::Partial);
    assert!(!report.is_success());
    assert_eq!(store.active_listings().await.unwrap().len(), 2);

    let runs = store.recent_runs(1).await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Partial);
    assert_eq!(runs[0].new_listings, 2);
    assert!(runs[0].error_message.as_deref().unwrap().contains("SMTP"));
}

#[tokio::test]
async fn test_same_batch_twice_yields_no_events() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let batch = vec![listing("A", 4000), listing("B", 4200)];
    let fetcher = ScriptedFetcher::new(vec![Step::Listings(batch)]);
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    runner.run_cycle().await;
    let second = runner.run_cycle().await;

    assert!(second.is_success());
    assert_eq!(second.run.total_events(), 0);
    assert_eq!(notifier.batches().len(), 1);
}

#[tokio::test]
async fn test_fetch_failure_leaves_listings_untouched() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let fetcher = ScriptedFetcher::new(vec![
        Step::Listings(vec![listing("A", 4000)]),
        Step::Fail("unexpected status 503".to_string()),
        Step::Listings(vec![listing("A", 4000)]),
    ]);
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    runner.run_cycle().await;
    let failed = runner.run_cycle().await;
    assert_eq!(failed.status(), RunStatus::Failed);
    assert!(store.get("A").await.unwrap().unwrap().is_active());

    let recovered = runner.run_cycle().await;
    assert!(recovered.is_success());
    assert_eq!(recovered.run.total_events(), 0);
    assert_eq!(runner.state().consecutive_failures, 0);
    assert_eq!(store.recent_runs(10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_relisted_listing_is_new_again() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let fetcher = ScriptedFetcher::new(vec![
        Step::Listings(vec![listing("A", 4000)]),
        Step::Listings(vec![]),
        Step::Listings(vec![listing("A", 4000)]),
    ]);
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    runner.run_cycle().await;
    runner.run_cycle().await;
    let back = runner.run_cycle().await;

    assert_eq!(back.run.new_listings, 1);
    let kinds: Vec<Vec<EventKind>> = notifier
        .batches()
        .iter()
        .map(|batch| batch.iter().map(|e| e.kind()).collect())
        .collect();
    assert_eq!(
        kinds,
        vec![vec![EventKind::NewListing], vec![EventKind::Removed], vec![EventKind::NewListing]]
    );
}

#[tokio::test]
async fn test_undelivered_alert_is_retried_next_cycle() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::failing_first(1);
    let fetcher = ScriptedFetcher::new(vec![Step::Listings(vec![listing("A", 4000)])]);
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    let first = runner.run_cycle().await;
    assert_eq!(first.status(), RunStatus::Partial);
    assert_eq!(store.pending_alerts().await.unwrap().len(), 1);

    let second = runner.run_cycle().await;
    assert_eq!(second.status(), RunStatus::Success);
    assert_eq!(second.run.total_events(), 0);

    let batches = notifier.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].len(), 1);
    assert_eq!(batches[1][0].kind(), EventKind::NewListing);
    assert_eq!(batches[1][0].listing_id(), "A");
    assert!(store.pending_alerts().await.unwrap().is_empty());

    let third = runner.run_cycle().await;
    assert_eq!(third.notification, Some(NotificationOutcome::Skipped));
    assert_eq!(notifier.batches().len(), 2);
}

#[tokio::test]
async fn test_undelivered_price_drop_reports_last_notified_price() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let fetcher = ScriptedFetcher::new(vec![
        Step::Listings(vec![listing("A", 4000)]),
        Step::Listings(vec![listing("A", 3500)]),
        Step::Listings(vec![listing("A", 3000)]),
    ]);
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    runner.run_cycle().await;
    notifier.fail_next(1);
    assert_eq!(runner.run_cycle().await.status(), RunStatus::Partial);
    assert!(runner.run_cycle().await.is_success());

    let batches = notifier.batches();
    match &batches[2][..] {
        [ListingEvent::PriceDrop { old_price, new_price, .. }] => {
            assert_eq!((*old_price, *new_price), (4000, 3000));
        }
        other => panic!("unexpected events: {:?}", other),
    }
}
