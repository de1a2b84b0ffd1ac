//! A local SQL collection and an attached device queried together.

mod common;

use anyhow::Context;
use core_collection::query::{collect, ChannelObserver, Field, QueryEvent};
use core_collection::{BlockingQuery, Collection, CollectionManager, QueryMaker, TrackRecord};
use std::sync::Arc;

async fn manager() -> CollectionManager {
    let local = common::seeded_sql("localCollection").await;
    let ipod = common::open_memory(&common::config("ipod"));
    ipod.insert_track(
        &TrackRecord::new("ipod://fire.m4a")
            .title("Fire")
            .artist("X")
            .album("Elements")
            .genre("Rock"),
    )
    .await
    .unwrap();
    ipod.insert_track(
        &TrackRecord::new("ipod://sparks.m4a")
            .title("Sparks")
            .artist("W")
            .genre("Rock"),
    )
    .await
    .unwrap();

    let manager = CollectionManager::new();
    manager.add_collection(local);
    manager.add_collection(ipod);
    manager
}

#[tokio::test]
async fn test_results_are_tagged_per_collection() {
    let manager = manager().await;
    let mut qm = manager.query_maker();
    qm.start_track_query()
        .add_filter(Field::Genre, "Rock", false, false)
        .order_by(Field::Title, false);

    let results = collect(Box::new(qm)).await;
    let mut ids = results.collection_ids();
    ids.sort();
    assert_eq!(ids, vec!["ipod", "localCollection"]);

    let local: Vec<_> = results.tracks("localCollection").iter().map(|t| t.title()).collect();
    let ipod: Vec<_> = results.tracks("ipod").iter().map(|t| t.title()).collect();
    assert_eq!(local, vec!["Fire", "Firefly"]);
    assert_eq!(ipod, vec!["Fire", "Sparks"]);
}

#[tokio::test]
async fn test_include_and_exclude_scope_children() {
    let manager = manager().await;

    let mut qm = manager.query_maker();
    qm.start_artist_query().include_collection("ipod");
    let results = collect(Box::new(qm)).await;
    assert_eq!(results.collection_ids(), vec!["ipod"]);
    assert_eq!(results.artists("ipod").len(), 2);

    let mut qm = manager.query_maker();
    qm.start_artist_query().exclude_collection("ipod");
    let results = collect(Box::new(qm)).await;
    assert_eq!(results.collection_ids(), vec!["localCollection"]);
    assert_eq!(results.artists("localCollection").len(), 3);
}

#[tokio::test]
async fn test_one_done_per_run() {
    let manager = manager().await;
    let mut qm = manager.query_maker();
    assert_eq!(qm.len(), 2);
    qm.start_year_query();

    let (observer, mut events) = ChannelObserver::new();
    qm.subscribe(observer);
    qm.run();
    qm.run();

    let mut batches = 0;
    let mut dones = 0;
    while dones < 2 {
        match events.recv().await.unwrap() {
            QueryEvent::NewResult { .. } => batches += 1,
            QueryEvent::Done => {
                dones += 1;
                // Both children delivered before the first done.
                if dones == 1 {
                    assert!(batches >= 2);
                }
            }
        }
    }
    assert_eq!(batches, 4);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_track_for_url_asks_the_right_collection() -> anyhow::Result<()> {
    let manager = manager().await;

    let local = manager
        .track_for_url("/music/wind.mp3")
        .await
        .context("local track missing")?;
    assert_eq!(local.title(), "Wind");

    let device = manager
        .track_for_url("ipod://sparks.m4a")
        .await
        .context("device track missing")?;
    assert_eq!(device.title(), "Sparks");

    assert!(manager.track_for_url("ipod://missing.m4a").await.is_none());
    assert!(manager.track_for_url("").await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_replacing_and_removing_collections() {
    let manager = manager().await;
    manager.add_collection(common::open_memory(&common::config("ipod")));
    assert_eq!(manager.collections().len(), 2);
    assert!(manager.track_for_url("ipod://sparks.m4a").await.is_none());

    let removed = manager.remove_collection("ipod").unwrap();
    assert_eq!(removed.collection_id(), "ipod");
    assert!(manager.collection("ipod").is_none());
    assert!(manager.remove_collection("ipod").is_none());
    assert!(manager.collection("localCollection").is_some());
}

#[tokio::test]
async fn test_empty_manager_finishes_immediately() {
    let manager = CollectionManager::new();
    let mut qm = manager.query_maker();
    assert!(qm.is_empty());
    qm.start_track_query();
    assert!(collect(Box::new(qm)).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_query_over_federation() {
    let manager = Arc::new(manager().await);

    let results = tokio::task::spawn_blocking(move || {
        let mut query = BlockingQuery::new(Box::new(manager.query_maker()));
        query
            .maker()
            .start_custom_query()
            .add_return_value(Field::Title)
            .add_filter(Field::Title, "Fire", false, false);
        query.start_query().unwrap();
        (
            query.collection_ids().len(),
            query.custom_data("localCollection"),
            query.custom_data("ipod"),
        )
    })
    .await
    .unwrap();

    assert_eq!(results.0, 2);
    assert_eq!(results.1, vec!["Fire"]);
    assert_eq!(results.2, vec!["Fire"]);
}
