//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use core_collection::{CollectionContext, MemoryCollection, SqlCollection, TrackRecord};
use core_runtime::config::CollectionConfig;
use std::path::Path;
use std::sync::Arc;

pub fn config(collection_id: &str) -> CollectionConfig {
    CollectionConfig::builder()
        .collection_id(collection_id)
        .query_worker_threads(2)
        .build()
        .unwrap()
}

pub fn config_with_covers(collection_id: &str, cover_dir: &Path) -> CollectionConfig {
    CollectionConfig::builder()
        .collection_id(collection_id)
        .query_worker_threads(2)
        .cover_dir(cover_dir)
        .build()
        .unwrap()
}

pub async fn open_sql(config: &CollectionConfig) -> Arc<SqlCollection> {
    let context = CollectionContext::from_config(config).unwrap();
    SqlCollection::open(config, context).await.unwrap()
}

pub fn open_memory(config: &CollectionConfig) -> Arc<MemoryCollection> {
    let context = CollectionContext::from_config(config).unwrap();
    MemoryCollection::new(config, context)
}

/// The small library most scenarios run against.
///
/// Albums are keyed by album artist, so "Elements" by X and "Elements" by Z
/// are two albums.
pub fn library() -> Vec<TrackRecord> {
    vec![
        TrackRecord::new("/music/fire.mp3")
            .title("Fire")
            .artist("X")
            .album("Elements")
            .genre("Rock")
            .year("1999")
            .track_number(1)
            .score(80.0),
        TrackRecord::new("/music/firefly.mp3")
            .title("Firefly")
            .artist("X")
            .album("Elements")
            .genre("Rock")
            .year("2003")
            .track_number(2)
            .score(40.0),
        TrackRecord::new("/music/water.mp3")
            .title("Water")
            .artist("Z")
            .album("Elements")
            .genre("Ambient")
            .year("1999")
            .track_number(3)
            .score(10.0),
        TrackRecord::new("/music/wind.mp3")
            .title("Wind")
            .artist("X")
            .album("Weather")
            .genre("Ambient")
            .year("1987")
            .score(60.0),
        TrackRecord::new("/music/mix-1.mp3")
            .title("Opener")
            .artist("Y")
            .album("Summer Mix")
            .compilation(true)
            .year("2010"),
    ]
}

pub async fn seeded_sql(collection_id: &str) -> Arc<SqlCollection> {
    let collection = open_sql(&config(collection_id)).await;
    for record in library() {
        collection.insert_track(&record).await.unwrap();
    }
    collection
}

pub async fn seeded_memory(collection_id: &str) -> Arc<MemoryCollection> {
    let collection = open_memory(&config(collection_id));
    for record in library() {
        collection.insert_track(&record).await.unwrap();
    }
    collection
}
