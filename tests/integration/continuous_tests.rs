use super::*;
use listing_watcher::RunStatus;

#[tokio::test]
async fn test_continuous_runs_until_shutdown() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let fetcher = ScriptedFetcher::new(vec![Step::Listings(vec![listing("A", 4000)])]);
    let mut calls = fetcher.calls();
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    let shutdown = async move {
        let _ = calls.wait_for(|n| *n >= 3).await;
    };
    runner.run_continuous(shutdown).await;

    assert_eq!(runner.state().cycles_run, 3);
    assert_eq!(store.recent_runs(10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_failed_cycles_do_not_stop_continuous_mode() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let fetcher = ScriptedFetcher::new(vec![
        Step::Fail("rate limited by the server (HTTP 429)".to_string()),
        Step::Fail("request timed out".to_string()),
        Step::Listings(vec![listing("A", 4000)]),
    ]);
    let mut calls = fetcher.calls();
    let mut runner = runner_with(fetcher, &store, &notifier, short_interval());

    runner
        .run_continuous(async move {
            let _ = calls.wait_for(|n| *n >= 3).await;
        })
        .await;

    let state = runner.state();
    assert_eq!(state.cycles_run, 3);
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.last_status, Some(RunStatus::Success));

    let statuses: Vec<RunStatus> = store
        .recent_runs(10)
        .await
        .unwrap()
        .into_iter()
        .map(|run| run.status)
        .collect();
    assert_eq!(statuses.iter().filter(|s| **s == RunStatus::Failed).count(), 2);
}

#[tokio::test]
async fn test_shutdown_interrupts_sleep_in_progress() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::default();
    let fetcher = ScriptedFetcher::new(vec![Step::Listings(vec![])]);
    let mut calls = fetcher.calls();
    let hour = Duration::from_secs(3600);
    let mut runner = runner_with(fetcher, &store, &notifier, PollInterval::new(hour, hour));

    // Not polled until the runner waits between cycles, so the delay
    // starts once the hour-long pause is already underway.
    let delay = Duration::from_millis(100);
    let shutdown = async move {
        let _ = calls.wait_for(|n| *n >= 1).await;
        tokio::time::sleep(delay).await;
    };

    let started = std::time::Instant::now();
    let finished = tokio::time::timeout(Duration::from_secs(10), runner.run_continuous(shutdown)).await;

    assert!(finished.is_ok());
    assert!(started.elapsed() >= delay);
    assert_eq!(runner.state().cycles_run, 1);
    assert_eq!(store.recent_runs(10).await.unwrap().len(), 1);
}
