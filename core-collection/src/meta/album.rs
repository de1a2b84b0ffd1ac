use super::{ArtistPtr, DataPtr, EntityKind, Observer, ObserverSet, TrackListCache, TrackPtr};
use crate::collection::MetaStore;
use crate::error::{CollectionError, Result};
use core_runtime::events::CollectionEvent;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, instrument};

/// An album of a collection.
///
/// The album artist is stored as an id; `0` marks a compilation. The artist
/// object itself is resolved lazily and cached.
pub struct Album {
    id: i64,
    name: String,
    artist_id: AtomicI64,
    album_artist: Mutex<Option<ArtistPtr>>,
    store: Weak<dyn MetaStore>,
    tracks: TrackListCache,
    observers: ObserverSet,
}

impl Album {
    pub(crate) fn new(
        id: i64,
        name: impl Into<String>,
        artist_id: i64,
        store: Weak<dyn MetaStore>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            artist_id: AtomicI64::new(artist_id.max(0)),
            album_artist: Mutex::new(None),
            store,
            tracks: TrackListCache::default(),
            observers: ObserverSet::default(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pretty_name(&self) -> &str {
        &self.name
    }

    /// Id of the album artist, `0` for a compilation.
    pub fn album_artist_id(&self) -> i64 {
        self.artist_id.load(Ordering::Acquire)
    }

    pub fn is_compilation(&self) -> bool {
        self.album_artist_id() == 0
    }

    pub fn has_album_artist(&self) -> bool {
        !self.is_compilation()
    }

    /// Album artist if it has already been resolved.
    pub fn cached_album_artist(&self) -> Option<ArtistPtr> {
        if self.is_compilation() {
            return None;
        }
        self.album_artist.lock().clone()
    }

    /// The album artist, resolved through the collection on first access.
    pub async fn album_artist(&self) -> Option<ArtistPtr> {
        let artist_id = self.album_artist_id();
        if artist_id == 0 {
            return None;
        }
        if let Some(artist) = self.cached_album_artist() {
            if artist.id() == artist_id {
                return Some(artist);
            }
        }

        let store = self.store.upgrade()?;
        let name = match store.entity_name(EntityKind::Artist, artist_id).await {
            Ok(name) => name,
            Err(e) => {
                debug!(album = %self.name, artist_id, error = %e, "Album artist lookup failed");
                return None;
            }
        };
        let artist = store.registry().artist(&name, artist_id);
        *self.album_artist.lock() = Some(artist.clone());
        Some(artist)
    }

    pub(crate) fn set_cached_album_artist(&self, artist: Option<ArtistPtr>) {
        if let Some(artist) = &artist {
            self.artist_id.store(artist.id(), Ordering::Release);
        }
        *self.album_artist.lock() = artist;
    }

    pub async fn tracks(self: &Arc<Self>) -> Vec<TrackPtr> {
        self.tracks
            .load(&self.store, DataPtr::Album(self.clone()))
            .await
    }

    pub fn invalidate_cache(&self) {
        self.tracks.invalidate();
    }

    /// Mark the album as a compilation, or give it back a single album
    /// artist: the artist appearing on most of its tracks.
    #[instrument(skip(self), fields(album = %self.name))]
    pub async fn set_compilation(self: &Arc<Self>, compilation: bool) -> Result<()> {
        if compilation == self.is_compilation() {
            return Ok(());
        }
        let store = self.store.upgrade().ok_or(CollectionError::CollectionGone)?;
        if !store.is_writable() {
            debug!("Collection is read-only, compilation flag unchanged");
            return Ok(());
        }

        let artist = if compilation {
            None
        } else {
            drop(store);
            let tracks = self.tracks().await;
            let Some(artist) = most_frequent_artist(&tracks) else {
                debug!("Album has no tracks, cannot pick an album artist");
                return Ok(());
            };
            Some(artist)
        };

        let store = self.store.upgrade().ok_or(CollectionError::CollectionGone)?;
        let artist_id = artist.as_ref().map(|a| a.id()).unwrap_or(0);
        store.write_album_artist(self, artist_id).await?;

        self.artist_id.store(artist_id, Ordering::Release);
        *self.album_artist.lock() = artist;
        self.invalidate_cache();
        drop(store);
        self.notify_observers();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cover image
    // ------------------------------------------------------------------

    pub async fn has_image(&self) -> bool {
        match self.image_path().await {
            Some(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Raw bytes of the cover image, `None` when the album has none.
    pub async fn image(&self) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.image_path().await else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, bytes), fields(album = %self.name, size = bytes.len()))]
    pub async fn set_image(self: &Arc<Self>, bytes: &[u8]) -> Result<()> {
        let Some(path) = self.image_path().await else {
            debug!("No cover location for album, image not stored");
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        self.notify_image_changed();
        Ok(())
    }

    #[instrument(skip(self), fields(album = %self.name))]
    pub async fn remove_image(self: &Arc<Self>) -> Result<()> {
        let Some(path) = self.image_path().await else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.notify_image_changed();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn image_path(&self) -> Option<PathBuf> {
        let artist = self
            .album_artist()
            .await
            .map(|a| a.name().to_string())
            .unwrap_or_default();
        let key = image_key(&artist, &self.name)?;
        let store = self.store.upgrade()?;
        let dir = store.cover_dir()?;
        Some(dir.join(key))
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn subscribe(&self, observer: &Arc<dyn Observer>) {
        self.observers.subscribe(observer);
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn Observer>) {
        self.observers.unsubscribe(observer);
    }

    pub fn notify_observers(self: &Arc<Self>) {
        for observer in self.observers.snapshot() {
            observer.album_metadata_changed(self);
        }
        if let Some(store) = self.store.upgrade() {
            store.publish(CollectionEvent::EntityChanged {
                collection_id: store.collection_id().to_string(),
                kind: EntityKind::Album.as_str().to_string(),
                name: self.name.clone(),
            });
        }
    }

    fn notify_image_changed(self: &Arc<Self>) {
        for observer in self.observers.snapshot() {
            observer.album_image_changed(self);
        }
        if let Some(store) = self.store.upgrade() {
            store.publish(CollectionEvent::AlbumImageChanged {
                collection_id: store.collection_id().to_string(),
                album: self.name.clone(),
            });
        }
    }
}

impl fmt::Debug for Album {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Album")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("artist_id", &self.album_artist_id())
            .finish()
    }
}

/// File name of a cover: hex SHA-256 of the lowercased artist and album
/// names. `None` when both are empty.
fn image_key(artist: &str, album: &str) -> Option<String> {
    if artist.is_empty() && album.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(artist.to_lowercase().as_bytes());
    hasher.update(album.to_lowercase().as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

fn most_frequent_artist(tracks: &[TrackPtr]) -> Option<ArtistPtr> {
    let mut counts: HashMap<i64, (usize, ArtistPtr)> = HashMap::new();
    for track in tracks {
        let artist = track.artist();
        if artist.id() == 0 {
            continue;
        }
        counts
            .entry(artist.id())
            .or_insert_with(|| (0, artist.clone()))
            .0 += 1;
    }
    counts
        .into_values()
        .max_by(|(a, x), (b, y)| a.cmp(b).then_with(|| y.id().cmp(&x.id())))
        .map(|(_, artist)| artist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_key() {
        assert_eq!(image_key("", ""), None);
        let a = image_key("Fire", "Water").unwrap();
        let b = image_key("FIRE", "water").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, image_key("Fire", "Waters").unwrap());
        assert!(image_key("", "Compilation Hits").is_some());
    }

    #[test]
    fn test_compilation_flag_follows_artist_id() {
        let store: Weak<dyn MetaStore> = Weak::<crate::memory::MemoryCollection>::new();
        let album = Album::new(3, "Hits", 0, store.clone());
        assert!(album.is_compilation());
        assert!(!album.has_album_artist());
        assert!(album.cached_album_artist().is_none());

        let album = Album::new(4, "Debut", 7, store);
        assert!(!album.is_compilation());
        assert_eq!(album.album_artist_id(), 7);
    }
}
