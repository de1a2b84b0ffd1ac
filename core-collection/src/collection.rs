//! # Collection Interface
//!
//! A collection is one backing store of tracks: a relational database, an
//! attached device, a test fixture. Callers only see [`Collection`]; entities
//! additionally reach their collection through [`MetaStore`] to resolve names,
//! load related entities and persist edits.

use crate::meta::{AlbumPtr, EntityKind, TrackPtr};
use crate::query::QueryMaker;
use crate::registry::Registry;
use crate::Result;
use async_trait::async_trait;
use core_runtime::events::{CollectionEvent, CoreEvent, EventBus};
use std::path::Path;

/// A queryable set of tracks.
#[async_trait]
pub trait Collection: Send + Sync {
    /// Stable identifier, attached to every result batch.
    fn collection_id(&self) -> &str;

    fn pretty_name(&self) -> &str;

    /// A fresh, idle query maker bound to this collection.
    fn query_maker(&self) -> Box<dyn QueryMaker>;

    /// Whether entity mutators persist changes.
    fn is_writable(&self) -> bool;

    /// Cheap pre-check; `false` means the track is certainly not here.
    fn possibly_contains_track(&self, url: &str) -> bool;

    /// Resolve the track stored under `url`.
    async fn track_for_url(&self, url: &str) -> Option<TrackPtr>;
}

/// Backing-store operations entities rely on.
///
/// Id `0` means "no row": the unknown-value sentinel for tag entities and
/// "no album artist" for albums.
#[async_trait]
pub trait MetaStore: Collection {
    fn registry(&self) -> &Registry;

    fn events(&self) -> &EventBus;

    /// Directory holding album cover images, if covers are supported.
    fn cover_dir(&self) -> Option<&Path>;

    /// Id of the tag row named `name`, created when missing.
    async fn resolve_id(&self, kind: EntityKind, name: &str) -> Result<i64>;

    /// Id and album-artist id of the album `name` by `artist_id`, created
    /// when missing. An existing compilation of that name also matches.
    async fn resolve_album(&self, name: &str, artist_id: i64) -> Result<(i64, i64)>;

    /// Name stored for `id`.
    ///
    /// Returns [`CollectionError::NotFound`](crate::CollectionError::NotFound)
    /// when no row has that id.
    async fn entity_name(&self, kind: EntityKind, id: i64) -> Result<String>;

    /// Persist the descriptive metadata and relations of `track`.
    async fn write_track(&self, track: &TrackPtr) -> Result<()>;

    /// Persist score, rating and play statistics of `track`.
    async fn write_statistics(&self, track: &TrackPtr) -> Result<()>;

    /// Persist the album artist of `album`; `0` makes it a compilation.
    async fn write_album_artist(&self, album: &AlbumPtr, artist_id: i64) -> Result<()>;

    /// Mirror a change onto the event bus. Nobody listening is not an error.
    fn publish(&self, event: CollectionEvent) {
        self.events().emit(CoreEvent::Collection(event)).ok();
    }
}
