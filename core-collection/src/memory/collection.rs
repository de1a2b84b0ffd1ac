//! Collection held entirely in memory, for devices and other stores without
//! a relational database.
//!
//! The collection owns its tracks strongly; the registry still hands out the
//! shared instances. Queries walk the track map under a read lock, mutations
//! take the write lock afresh for each change and never hold it across an
//! await point.

use super::query_maker::MemoryQueryMaker;
use crate::collection::{Collection, MetaStore};
use crate::context::CollectionContext;
use crate::error::{CollectionError, Result};
use crate::meta::{AlbumPtr, EntityKind, Track, TrackPtr, TrackRecord, TrackRelations};
use crate::query::QueryMaker;
use crate::registry::Registry;
use async_trait::async_trait;
use core_runtime::config::CollectionConfig;
use core_runtime::events::{CollectionEvent, EventBus};
use core_runtime::logging::strip_path;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, instrument};

#[derive(Default)]
struct MemoryStore {
    tracks: BTreeMap<String, TrackPtr>,
    names: HashMap<EntityKind, BTreeMap<String, i64>>,
    /// album id -> (name, album artist id)
    albums: BTreeMap<i64, (String, i64)>,
    last_id: i64,
}

impl MemoryStore {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    /// Record the rows behind `relations`. The registry hands out live
    /// entities without asking the store, so rows pruned while an entity
    /// stayed alive come back here.
    fn adopt(&mut self, relations: &TrackRelations) {
        for (kind, id, name) in [
            (EntityKind::Artist, relations.artist.id(), relations.artist.name()),
            (EntityKind::Genre, relations.genre.id(), relations.genre.name()),
            (EntityKind::Composer, relations.composer.id(), relations.composer.name()),
            (EntityKind::Year, relations.year.id(), relations.year.name()),
        ] {
            if id > 0 {
                self.names
                    .entry(kind)
                    .or_default()
                    .entry(name.to_string())
                    .or_insert(id);
            }
        }
        let album = &relations.album;
        if album.id() > 0 {
            self.albums
                .entry(album.id())
                .or_insert_with(|| (album.name().to_string(), album.album_artist_id()));
        }
    }

    /// Forget names and albums no remaining track refers to.
    fn prune_orphans(&mut self) {
        let mut live: HashMap<EntityKind, HashSet<i64>> = HashMap::new();
        for track in self.tracks.values() {
            let r = track.relations();
            live.entry(EntityKind::Artist).or_default().insert(r.artist.id());
            live.entry(EntityKind::Artist).or_default().insert(r.album.album_artist_id());
            live.entry(EntityKind::Album).or_default().insert(r.album.id());
            live.entry(EntityKind::Genre).or_default().insert(r.genre.id());
            live.entry(EntityKind::Composer).or_default().insert(r.composer.id());
            live.entry(EntityKind::Year).or_default().insert(r.year.id());
        }
        for (kind, names) in self.names.iter_mut() {
            let keep = live.get(kind);
            names.retain(|_, id| keep.is_some_and(|k| k.contains(id)));
        }
        let keep = live.get(&EntityKind::Album);
        self.albums.retain(|id, _| keep.is_some_and(|k| k.contains(id)));
    }
}

pub struct MemoryCollection {
    collection_id: String,
    pretty_name: String,
    writable: bool,
    cover_dir: Option<PathBuf>,
    store: RwLock<MemoryStore>,
    registry: Registry,
    context: CollectionContext,
    this: Weak<MemoryCollection>,
}

impl MemoryCollection {
    /// An empty collection. `database_path` of `config` is not used.
    pub fn new(config: &CollectionConfig, context: CollectionContext) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<MemoryCollection>| {
            let store: Weak<dyn MetaStore> = this.clone();
            Self {
                collection_id: config.collection_id.clone(),
                pretty_name: config.pretty_name.clone(),
                writable: config.writable,
                cover_dir: config.cover_dir.clone(),
                store: RwLock::new(MemoryStore::default()),
                registry: Registry::new(store),
                context,
                this: this.clone(),
            }
        })
    }

    pub fn context(&self) -> &CollectionContext {
        &self.context
    }

    pub fn track_count(&self) -> usize {
        self.store.read().tracks.len()
    }

    /// Every track, ordered by location.
    pub fn tracks(&self) -> Vec<TrackPtr> {
        self.store.read().tracks.values().cloned().collect()
    }

    /// Tracks accepted by `predicate`, evaluated under the read lock.
    pub(crate) fn select_tracks(&self, predicate: impl Fn(&TrackPtr) -> bool) -> Vec<TrackPtr> {
        let store = self.store.read();
        store.tracks.values().filter(|t| predicate(t)).cloned().collect()
    }

    /// Add a track, or overwrite the one already stored at its location.
    #[instrument(skip(self, record), fields(url = %strip_path(&record.url)))]
    pub async fn insert_track(&self, record: &TrackRecord) -> Result<TrackPtr> {
        if record.url.is_empty() {
            return Err(CollectionError::InvalidInput {
                field: "url".to_string(),
                message: "Track location cannot be empty".to_string(),
            });
        }
        let relations = self.resolve_relations(record).await?;

        let existing = self
            .store
            .read()
            .tracks
            .get(&record.url)
            .cloned()
            .or_else(|| self.registry.track(record.device_id, &record.url));

        let track = match existing {
            Some(track) => {
                track.replace(record.fields(), relations);
                track
            }
            None => {
                let id = self.store.write().next_id();
                let track = self.registry.track_or_insert_with(record.device_id, &record.url, |store| {
                    Track::new(id, record.device_id, &record.url, record.fields(), relations.clone(), store)
                });
                invalidate_all(&relations);
                track
            }
        };

        self.store
            .write()
            .tracks
            .insert(record.url.clone(), track.clone());
        debug!(tracks = self.track_count(), "Track stored");
        self.publish(CollectionEvent::CollectionUpdated {
            collection_id: self.collection_id.clone(),
        });
        Ok(track)
    }

    /// Remove the track at `url`, returning it if it was stored.
    pub fn remove_track(&self, url: &str) -> Option<TrackPtr> {
        let removed = {
            let mut store = self.store.write();
            let removed = store.tracks.remove(url);
            if removed.is_some() {
                store.prune_orphans();
            }
            removed
        };
        let track = removed?;
        invalidate_all(&track.relations());
        debug!(url = %strip_path(url), "Track removed");
        self.publish(CollectionEvent::CollectionUpdated {
            collection_id: self.collection_id.clone(),
        });
        Some(track)
    }

    /// Rewrite the track at `url` through its [`TrackRecord`]. Changes to the
    /// location fields are ignored.
    #[instrument(skip(self, edit), fields(url = %strip_path(url)))]
    pub async fn update_track(
        &self,
        url: &str,
        edit: impl FnOnce(&mut TrackRecord),
    ) -> Result<TrackPtr> {
        let track = self
            .store
            .read()
            .tracks
            .get(url)
            .cloned()
            .ok_or_else(|| CollectionError::NotFound {
                entity_type: EntityKind::Track.to_string(),
                id: url.to_string(),
            })?;

        let mut record = TrackRecord::from_track(&track);
        edit(&mut record);
        record.url = track.url().to_string();
        record.device_id = track.device_id();

        let relations = self.resolve_relations(&record).await?;
        track.replace(record.fields(), relations);
        self.store.write().prune_orphans();

        track.notify_observers();
        self.publish(CollectionEvent::CollectionUpdated {
            collection_id: self.collection_id.clone(),
        });
        Ok(track)
    }

    async fn resolve_relations(&self, record: &TrackRecord) -> Result<TrackRelations> {
        let artist = self.registry.artist_by_name(&record.artist).await?;
        let album_artist = if record.compilation { 0 } else { artist.id() };
        let relations = TrackRelations {
            album: self.registry.album_by_name(&record.album, album_artist).await?,
            artist,
            genre: self.registry.genre_by_name(&record.genre).await?,
            composer: self.registry.composer_by_name(&record.composer).await?,
            year: self.registry.year_by_name(&record.year).await?,
        };
        self.store.write().adopt(&relations);
        Ok(relations)
    }

    fn has_track(&self, track: &TrackPtr) -> Result<()> {
        if self.store.read().tracks.contains_key(track.url()) {
            Ok(())
        } else {
            Err(CollectionError::NotFound {
                entity_type: EntityKind::Track.to_string(),
                id: track.url().to_string(),
            })
        }
    }
}

fn invalidate_all(relations: &TrackRelations) {
    relations.artist.invalidate_cache();
    relations.album.invalidate_cache();
    relations.genre.invalidate_cache();
    relations.composer.invalidate_cache();
    relations.year.invalidate_cache();
}

#[async_trait]
impl Collection for MemoryCollection {
    fn collection_id(&self) -> &str {
        &self.collection_id
    }

    fn pretty_name(&self) -> &str {
        &self.pretty_name
    }

    fn query_maker(&self) -> Box<dyn QueryMaker> {
        Box::new(MemoryQueryMaker::new(
            self.this.clone(),
            self.collection_id.clone(),
            self.context.pool.clone(),
        ))
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn possibly_contains_track(&self, url: &str) -> bool {
        self.store.read().tracks.contains_key(url)
    }

    async fn track_for_url(&self, url: &str) -> Option<TrackPtr> {
        self.store.read().tracks.get(url).cloned()
    }
}

#[async_trait]
impl MetaStore for MemoryCollection {
    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn events(&self) -> &EventBus {
        &self.context.events
    }

    fn cover_dir(&self) -> Option<&Path> {
        self.cover_dir.as_deref()
    }

    async fn resolve_id(&self, kind: EntityKind, name: &str) -> Result<i64> {
        if name.is_empty() {
            return Ok(0);
        }
        if matches!(kind, EntityKind::Track | EntityKind::Album) {
            return Err(CollectionError::InvalidInput {
                field: "kind".to_string(),
                message: format!("{kind} has no name table"),
            });
        }
        let mut store = self.store.write();
        if let Some(id) = store.names.get(&kind).and_then(|n| n.get(name)) {
            return Ok(*id);
        }
        let id = store.next_id();
        store.names.entry(kind).or_default().insert(name.to_string(), id);
        Ok(id)
    }

    async fn resolve_album(&self, name: &str, artist_id: i64) -> Result<(i64, i64)> {
        let mut store = self.store.write();
        let found = [artist_id, 0].into_iter().find_map(|wanted| {
            store
                .albums
                .iter()
                .find(|(_, (n, a))| n == name && *a == wanted)
                .map(|(id, (_, a))| (*id, *a))
        });
        if let Some(found) = found {
            return Ok(found);
        }
        let id = store.next_id();
        store.albums.insert(id, (name.to_string(), artist_id.max(0)));
        Ok((id, artist_id.max(0)))
    }

    async fn entity_name(&self, kind: EntityKind, id: i64) -> Result<String> {
        let store = self.store.read();
        let name = match kind {
            EntityKind::Album => store.albums.get(&id).map(|(name, _)| name.clone()),
            EntityKind::Track => None,
            _ => store.names.get(&kind).and_then(|names| {
                names
                    .iter()
                    .find(|(_, v)| **v == id)
                    .map(|(name, _)| name.clone())
            }),
        };
        name.ok_or_else(|| CollectionError::NotFound {
            entity_type: kind.to_string(),
            id: id.to_string(),
        })
    }

    async fn write_track(&self, track: &TrackPtr) -> Result<()> {
        self.has_track(track)
    }

    async fn write_statistics(&self, track: &TrackPtr) -> Result<()> {
        self.has_track(track)
    }

    async fn write_album_artist(&self, album: &AlbumPtr, artist_id: i64) -> Result<()> {
        let mut store = self.store.write();
        match store.albums.get_mut(&album.id()) {
            Some((_, artist)) => {
                *artist = artist_id.max(0);
                Ok(())
            }
            None => Err(CollectionError::NotFound {
                entity_type: EntityKind::Album.to_string(),
                id: album.id().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_runtime::events::CoreEvent;

    fn collection() -> Arc<MemoryCollection> {
        let config = CollectionConfig::builder()
            .collection_id("device")
            .query_worker_threads(1)
            .build()
            .unwrap();
        let context = CollectionContext::from_config(&config).unwrap();
        MemoryCollection::new(&config, context)
    }

    #[tokio::test]
    async fn test_insert_shares_related_entities() {
        let collection = collection();
        let a = collection
            .insert_track(&TrackRecord::new("/a").artist("X").album("One"))
            .await
            .unwrap();
        let b = collection
            .insert_track(&TrackRecord::new("/b").artist("X").album("One"))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&a.artist(), &b.artist()));
        assert!(Arc::ptr_eq(&a.album(), &b.album()));
        assert_eq!(a.album().album_artist_id(), a.artist().id());
        assert_eq!(a.genre().id(), 0);
        assert_eq!(collection.track_count(), 2);
    }

    #[tokio::test]
    async fn test_reinsert_overwrites_in_place() {
        let collection = collection();
        let first = collection
            .insert_track(&TrackRecord::new("/a").title("Old"))
            .await
            .unwrap();
        let second = collection
            .insert_track(&TrackRecord::new("/a").title("New"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.title(), "New");
        assert_eq!(collection.track_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_prunes_orphan_names() {
        let collection = collection();
        collection
            .insert_track(&TrackRecord::new("/a").artist("Solo").genre("Jazz"))
            .await
            .unwrap();
        let jazz = collection.resolve_id(EntityKind::Genre, "Jazz").await.unwrap();

        assert!(collection.remove_track("/a").is_some());
        assert!(collection.remove_track("/a").is_none());
        assert!(collection.entity_name(EntityKind::Genre, jazz).await.is_err());
        assert!(!collection.possibly_contains_track("/a"));
    }

    #[tokio::test]
    async fn test_reinsert_after_remove_restores_rows_of_live_entities() {
        let collection = collection();
        let track = collection
            .insert_track(&TrackRecord::new("/a").artist("X").album("One").genre("Jazz"))
            .await
            .unwrap();
        let album = track.album();
        let artist = track.artist();
        let genre = track.genre();
        drop(track);

        assert!(collection.remove_track("/a").is_some());
        assert!(collection.entity_name(EntityKind::Album, album.id()).await.is_err());

        let again = collection
            .insert_track(&TrackRecord::new("/a").artist("X").album("One").genre("Jazz"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&again.album(), &album));
        assert_eq!(album.tracks().await.len(), 1);
        assert_eq!(
            collection.entity_name(EntityKind::Genre, genre.id()).await.unwrap(),
            "Jazz"
        );
        assert!(Arc::ptr_eq(&album.album_artist().await.unwrap(), &artist));

        album.set_compilation(true).await.unwrap();
        assert!(album.is_compilation());
        album.set_compilation(false).await.unwrap();
        assert!(Arc::ptr_eq(&album.album_artist().await.unwrap(), &artist));
    }

    #[tokio::test]
    async fn test_update_moves_track_between_artists() {
        let collection = collection();
        let track = collection
            .insert_track(&TrackRecord::new("/a").artist("X").title("Song"))
            .await
            .unwrap();
        let x = track.artist();
        assert_eq!(x.tracks().await.len(), 1);

        collection
            .update_track("/a", |r| {
                r.artist = "Y".to_string();
                r.url = "/elsewhere".to_string();
            })
            .await
            .unwrap();

        assert_eq!(track.artist().name(), "Y");
        assert_eq!(track.url(), "/a");
        assert!(x.tracks().await.is_empty());
        assert_eq!(track.artist().tracks().await.len(), 1);

        assert!(matches!(
            collection.update_track("/missing", |_| {}).await,
            Err(CollectionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_mutations_publish_collection_updated() {
        let collection = collection();
        let mut events = collection.events().subscribe();
        collection
            .insert_track(&TrackRecord::new("/a"))
            .await
            .unwrap();
        match events.recv().await.unwrap() {
            CoreEvent::Collection(CollectionEvent::CollectionUpdated { collection_id }) => {
                assert_eq!(collection_id, "device")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_compilation_album_is_shared() {
        let collection = collection();
        let a = collection
            .insert_track(&TrackRecord::new("/a").artist("X").album("Mix").compilation(true))
            .await
            .unwrap();
        let b = collection
            .insert_track(&TrackRecord::new("/b").artist("Y").album("Mix"))
            .await
            .unwrap();
        assert!(a.album().is_compilation());
        assert!(Arc::ptr_eq(&a.album(), &b.album()));
    }
}
