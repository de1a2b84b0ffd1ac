//! Entity mutators against a SQL collection: persistence, batching,
//! notifications and cache invalidation.

mod common;

use core_collection::meta::{AlbumPtr, TrackPtr};
use core_collection::{Collection, Observer, SqlCollection, TrackRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use store_traits::QueryValue;

#[derive(Default)]
struct Counter {
    tracks: AtomicUsize,
    albums: AtomicUsize,
    images: AtomicUsize,
}

impl Observer for Counter {
    fn track_metadata_changed(&self, _track: &TrackPtr) {
        self.tracks.fetch_add(1, Ordering::SeqCst);
    }

    fn album_metadata_changed(&self, _album: &AlbumPtr) {
        self.albums.fetch_add(1, Ordering::SeqCst);
    }

    fn album_image_changed(&self, _album: &AlbumPtr) {
        self.images.fetch_add(1, Ordering::SeqCst);
    }
}

fn counter() -> (Arc<Counter>, Arc<dyn Observer>) {
    let counter = Arc::new(Counter::default());
    let observer: Arc<dyn Observer> = counter.clone();
    (counter, observer)
}

async fn stored(collection: &SqlCollection, column: &str, url: &str) -> Vec<String> {
    collection
        .query(
            &format!(
                "SELECT {column} FROM tracks \
                 JOIN urls ON tracks.url = urls.id \
                 LEFT JOIN statistics ON statistics.url = urls.id \
                 WHERE urls.rpath = ?"
            ),
            &[QueryValue::from(url)],
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_set_title_persists_and_notifies() {
    let collection = common::seeded_sql("localCollection").await;
    let track = collection.track_for_url("/music/fire.mp3").await.unwrap();
    let (count, observer) = counter();
    track.subscribe(&observer);

    track.set_title("Fire!").await.unwrap();

    assert_eq!(track.title(), "Fire!");
    assert_eq!(stored(&collection, "tracks.title", "/music/fire.mp3").await, vec!["Fire!"]);
    assert_eq!(count.tracks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_batch_update_writes_once() {
    let collection = common::seeded_sql("localCollection").await;
    let track = collection.track_for_url("/music/water.mp3").await.unwrap();
    let (count, observer) = counter();
    track.subscribe(&observer);

    track.begin_metadata_update();
    track.set_title("Still Water").await.unwrap();
    track.set_comment("live").await.unwrap();
    track.set_rating(7).await.unwrap();
    assert_eq!(track.title(), "Water");
    assert_eq!(count.tracks.load(Ordering::SeqCst), 0);

    track.end_metadata_update().await.unwrap();
    assert!(!track.is_in_metadata_update());
    assert_eq!(count.tracks.load(Ordering::SeqCst), 1);
    assert_eq!(
        stored(&collection, "tracks.title, tracks.comment, statistics.rating", "/music/water.mp3")
            .await,
        vec!["Still Water", "live", "7"]
    );
}

#[tokio::test]
async fn test_aborted_batch_discards_staged_values() {
    let collection = common::seeded_sql("localCollection").await;
    let track = collection.track_for_url("/music/wind.mp3").await.unwrap();

    track.begin_metadata_update();
    track.set_title("Gale").await.unwrap();
    track.abort_metadata_update();
    track.end_metadata_update().await.unwrap();

    assert_eq!(track.title(), "Wind");
    assert_eq!(stored(&collection, "tracks.title", "/music/wind.mp3").await, vec!["Wind"]);
}

#[tokio::test]
async fn test_finished_playing_updates_statistics() {
    let collection = common::seeded_sql("localCollection").await;
    let track = collection.track_for_url("/music/fire.mp3").await.unwrap();

    track.finished_playing(0.5).await.unwrap();

    assert_eq!(track.play_count(), 1);
    assert_eq!(track.score(), 50.0);
    assert!(track.last_played().is_some());
    assert!(track.first_played().is_some());
    assert_eq!(
        stored(&collection, "statistics.playcount, statistics.score", "/music/fire.mp3").await,
        vec!["1", "50"]
    );

    track.finished_playing(1.0).await.unwrap();
    assert_eq!(track.play_count(), 2);
    assert_eq!(track.score(), 75.0);
}

#[tokio::test]
async fn test_set_artist_moves_track_between_artists() {
    let collection = common::seeded_sql("localCollection").await;
    let fire = collection.track_for_url("/music/fire.mp3").await.unwrap();
    let water = collection.track_for_url("/music/water.mp3").await.unwrap();
    let x = fire.artist();
    let z = water.artist();

    assert_eq!(x.tracks().await.len(), 3);
    assert_eq!(z.tracks().await.len(), 1);

    fire.set_artist("Z").await.unwrap();

    assert!(Arc::ptr_eq(&fire.artist(), &z));
    assert_eq!(x.tracks().await.len(), 2);
    assert_eq!(z.tracks().await.len(), 2);
    assert_eq!(
        stored(&collection, "tracks.artist", "/music/fire.mp3").await,
        vec![z.id().to_string()]
    );
}

#[tokio::test]
async fn test_set_artist_to_new_name_creates_row() {
    let collection = common::seeded_sql("localCollection").await;
    let track = collection.track_for_url("/music/wind.mp3").await.unwrap();

    track.set_artist("The Newcomers").await.unwrap();

    let artist = track.artist();
    assert!(artist.id() > 0);
    assert_eq!(artist.sortable_name(), "Newcomers, The");
    let rows = collection
        .query("SELECT name FROM artists WHERE id = ?", &[QueryValue::Integer(artist.id())])
        .await
        .unwrap();
    assert_eq!(rows, vec!["The Newcomers"]);
}

#[tokio::test]
async fn test_artist_albums() {
    let collection = common::seeded_sql("localCollection").await;
    let track = collection.track_for_url("/music/fire.mp3").await.unwrap();

    let mut names: Vec<_> = track
        .artist()
        .albums()
        .await
        .iter()
        .map(|a| a.name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Elements", "Weather"]);
}

#[tokio::test]
async fn test_compilation_toggle() {
    let collection = common::seeded_sql("localCollection").await;
    let opener = collection.track_for_url("/music/mix-1.mp3").await.unwrap();
    let album = opener.album();
    assert!(album.is_compilation());
    assert!(album.album_artist().await.is_none());

    let (count, observer) = counter();
    album.subscribe(&observer);

    album.set_compilation(false).await.unwrap();
    assert!(!album.is_compilation());
    let artist = album.album_artist().await.unwrap();
    assert!(Arc::ptr_eq(&artist, &opener.artist()));
    assert_eq!(count.albums.load(Ordering::SeqCst), 1);

    album.set_compilation(true).await.unwrap();
    assert!(album.is_compilation());
    let rows = collection
        .query("SELECT artist FROM albums WHERE id = ?", &[QueryValue::Integer(album.id())])
        .await
        .unwrap();
    assert_eq!(rows, vec![""]);
    assert_eq!(count.albums.load(Ordering::SeqCst), 2);

    // Unchanged flag is a no-op.
    album.set_compilation(true).await.unwrap();
    assert_eq!(count.albums.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_album_cover_lifecycle() {
    let covers = std::env::temp_dir().join(format!("covers-{}", uuid::Uuid::new_v4()));
    let config = common::config_with_covers("localCollection", &covers);
    let collection = common::open_sql(&config).await;
    let track = collection
        .insert_track(&TrackRecord::new("/music/fire.mp3").artist("X").album("Elements"))
        .await
        .unwrap();
    let album = track.album();
    let (count, observer) = counter();
    album.subscribe(&observer);

    assert!(!album.has_image().await);
    assert_eq!(album.image().await.unwrap(), None);

    album.set_image(b"\x89PNG cover").await.unwrap();
    assert!(album.has_image().await);
    assert_eq!(album.image().await.unwrap().as_deref(), Some(&b"\x89PNG cover"[..]));

    album.remove_image().await.unwrap();
    assert!(!album.has_image().await);
    assert_eq!(count.images.load(Ordering::SeqCst), 2);

    // Removing twice is fine and does not notify.
    album.remove_image().await.unwrap();
    assert_eq!(count.images.load(Ordering::SeqCst), 2);

    std::fs::remove_dir_all(&covers).ok();
}

#[tokio::test]
async fn test_album_without_cover_dir_has_no_image() {
    let collection = common::seeded_sql("localCollection").await;
    let album = collection
        .track_for_url("/music/fire.mp3")
        .await
        .unwrap()
        .album();

    album.set_image(b"ignored").await.unwrap();
    assert!(!album.has_image().await);
}

#[tokio::test]
async fn test_read_only_collection_ignores_edits() {
    let config = core_runtime::config::CollectionConfig::builder()
        .collection_id("readOnly")
        .query_worker_threads(1)
        .writable(false)
        .build()
        .unwrap();
    let collection = common::open_sql(&config).await;
    let track = collection
        .insert_track(&TrackRecord::new("/music/fire.mp3").title("Fire").artist("X"))
        .await
        .unwrap();

    track.set_title("Changed").await.unwrap();
    track.finished_playing(1.0).await.unwrap();

    assert_eq!(track.title(), "Fire");
    assert_eq!(track.play_count(), 0);
    assert_eq!(stored(&collection, "tracks.title", "/music/fire.mp3").await, vec!["Fire"]);
}

#[tokio::test]
async fn test_memory_backend_edits_are_queryable() {
    let collection = common::seeded_memory("device").await;
    let track = collection.track_for_url("/music/water.mp3").await.unwrap();

    track.set_genre("Rock").await.unwrap();

    let mut qm = collection.query_maker();
    qm.start_track_query()
        .add_filter(core_collection::query::Field::Genre, "Rock", false, false);
    let rock = core_collection::query::collect(qm).await.tracks("device");
    assert_eq!(rock.len(), 3);
    assert!(rock.iter().any(|t| Arc::ptr_eq(t, &track)));
}
