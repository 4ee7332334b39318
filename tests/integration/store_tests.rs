use super::*;
use listing_watcher::{ListingDiffer, ListingStatus, MonitoringRun};

fn file_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("watcher.db").display())
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = file_url(&dir);

    {
        let store = ListingStore::connect_url(&url).await.unwrap();
        ListingDiffer::apply(&store, &[listing("A", 4000), listing("B", 4100)])
            .await
            .unwrap();
        ListingDiffer::apply(&store, &[listing("A", 3800)]).await.unwrap();
        store
            .record_run(&MonitoringRun::failed("request timed out", Utc::now()))
            .await
            .unwrap();
        store.close().await;
    }

    let store = ListingStore::connect_url(&url).await.unwrap();
    let a = store.get("A").await.unwrap().unwrap();
    assert_eq!(a.price, 3800);
    assert_eq!(a.status, ListingStatus::Active);
    assert_eq!(store.get("B").await.unwrap().unwrap().status, ListingStatus::Removed);
    assert_eq!(store.recent_runs(5).await.unwrap().len(), 1);

    // Reopening runs migrations again without touching existing rows
    let stats = store.statistics(Utc::now()).await.unwrap();
    assert_eq!(stats.total_listings, 2);
    assert_eq!(stats.active_listings, 1);
}

#[tokio::test]
async fn test_listings_are_never_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let store = ListingStore::connect_url(&file_url(&dir)).await.unwrap();

    ListingDiffer::apply(&store, &[listing("A", 4000)]).await.unwrap();
    for _ in 0..3 {
        ListingDiffer::apply(&store, &[]).await.unwrap();
    }

    let a = store.get("A").await.unwrap().expect("removed listings stay on record");
    assert_eq!(a.status, ListingStatus::Removed);
    assert_eq!(store.recent_listings(10).await.unwrap().len(), 1);
}
