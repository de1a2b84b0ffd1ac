use super::cache::ListCache;
use super::{Album, AlbumPtr, DataPtr, Observer, ObserverSet, TrackListCache, TrackPtr};
use crate::collection::MetaStore;
use core_runtime::events::CollectionEvent;
use std::fmt;
use std::sync::{Arc, Weak};

pub struct Artist {
    id: i64,
    name: String,
    store: Weak<dyn MetaStore>,
    tracks: TrackListCache,
    albums: ListCache<Album>,
    observers: ObserverSet,
}

impl Artist {
    pub(crate) fn new(id: i64, name: impl Into<String>, store: Weak<dyn MetaStore>) -> Self {
        Self {
            id,
            name: name.into(),
            store,
            tracks: TrackListCache::default(),
            albums: ListCache::default(),
            observers: ObserverSet::default(),
        }
    }

    /// Backing-store id; `0` for the unknown artist.
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pretty_name(&self) -> &str {
        &self.name
    }

    /// Name with a leading article moved to the end: "The Beatles" sorts as
    /// "Beatles, The".
    pub fn sortable_name(&self) -> String {
        let name = self.name.as_str();
        match name.get(..4) {
            Some(article) if article.eq_ignore_ascii_case("the ") => {
                format!("{}, {}", &name[4..], &name[..3])
            }
            _ => name.to_string(),
        }
    }

    pub async fn tracks(self: &Arc<Self>) -> Vec<TrackPtr> {
        self.tracks
            .load(&self.store, DataPtr::Artist(self.clone()))
            .await
    }

    /// Albums with at least one track by this artist.
    pub async fn albums(self: &Arc<Self>) -> Vec<AlbumPtr> {
        let owner = DataPtr::Artist(self.clone());
        self.albums
            .load_with(&self.store, |qm| {
                qm.start_album_query().add_match(&owner);
            })
            .await
    }

    /// Drop the cached track and album lists.
    pub fn invalidate_cache(&self) {
        self.tracks.invalidate();
        self.albums.invalidate();
    }

    pub fn subscribe(&self, observer: &Arc<dyn Observer>) {
        self.observers.subscribe(observer);
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn Observer>) {
        self.observers.unsubscribe(observer);
    }

    pub fn notify_observers(self: &Arc<Self>) {
        for observer in self.observers.snapshot() {
            observer.artist_metadata_changed(self);
        }
        if let Some(store) = self.store.upgrade() {
            store.publish(CollectionEvent::EntityChanged {
                collection_id: store.collection_id().to_string(),
                kind: super::EntityKind::Artist.as_str().to_string(),
                name: self.name.clone(),
            });
        }
    }

    pub(crate) fn has_cached_tracks(&self) -> bool {
        self.tracks.is_loaded()
    }
}

impl fmt::Debug for Artist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artist")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(name: &str) -> Artist {
        let store: Weak<dyn MetaStore> = Weak::<crate::memory::MemoryCollection>::new();
        Artist::new(1, name, store)
    }

    #[test]
    fn test_sortable_name_moves_article() {
        assert_eq!(detached("The Beatles").sortable_name(), "Beatles, The");
        assert_eq!(detached("the national").sortable_name(), "national, the");
        assert_eq!(detached("Theatre").sortable_name(), "Theatre");
        assert_eq!(detached("Firefly").sortable_name(), "Firefly");
        assert_eq!(detached("").sortable_name(), "");
    }

    #[test]
    fn test_album_list_loaded_before_invalidation_is_discarded() {
        let store: Weak<dyn MetaStore> = Weak::<crate::memory::MemoryCollection>::new();
        let artist = detached("Fire");
        let album = Arc::new(Album::new(2, "Elements", 1, store));

        let generation = artist.albums.generation();
        artist.invalidate_cache();
        artist.albums.store_if_current(generation, &[album.clone()]);
        assert!(artist.albums.get().is_none());

        artist
            .albums
            .store_if_current(artist.albums.generation(), &[album.clone()]);
        let cached = artist.albums.get().unwrap();
        assert!(Arc::ptr_eq(&cached[0], &album));

        drop(cached);
        drop(album);
        assert!(artist.albums.get().is_none());
    }

    #[tokio::test]
    async fn test_detached_artist_has_no_tracks() {
        let artist = Arc::new(detached("Fire"));
        assert!(artist.tracks().await.is_empty());
        assert!(artist.albums().await.is_empty());
    }
}
