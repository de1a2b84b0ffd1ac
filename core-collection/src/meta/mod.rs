//! # Domain Entities
//!
//! Shared, identity-stable objects for the six entity kinds of a collection.
//!
//! ## Ownership
//!
//! Entities are reference counted (`Arc`). A [`Track`] owns strong references
//! to its artist, album, genre, composer and year. The reverse direction, the
//! lazily loaded track list cached inside an artist or album, holds only
//! `Weak` references so the graph never forms an ownership cycle. The
//! [`Registry`](crate::registry::Registry) holds `Weak` references as well:
//! an entity dies when the last collaborator releases it.
//!
//! Entities reach their collection through a `Weak<dyn MetaStore>`; once the
//! collection is dropped lazy loads return empty lists and mutators return
//! [`CollectionError::CollectionGone`](crate::CollectionError::CollectionGone).

mod album;
mod artist;
mod cache;
mod observer;
mod record;
mod simple;
mod track;

pub use album::Album;
pub use artist::Artist;
pub use observer::{Observer, ObserverSet};
pub use record::TrackRecord;
pub use simple::{Composer, Genre, Year};
pub use track::{MetaCache, Track, TrackFields, TrackRelations};

pub(crate) use cache::TrackListCache;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type TrackPtr = Arc<Track>;
pub type ArtistPtr = Arc<Artist>;
pub type AlbumPtr = Arc<Album>;
pub type GenrePtr = Arc<Genre>;
pub type ComposerPtr = Arc<Composer>;
pub type YearPtr = Arc<Year>;

/// The six entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Track,
    Artist,
    Album,
    Genre,
    Composer,
    Year,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Track => "track",
            EntityKind::Artist => "artist",
            EntityKind::Album => "album",
            EntityKind::Genre => "genre",
            EntityKind::Composer => "composer",
            EntityKind::Year => "year",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to an entity of any kind.
///
/// Equality is identity: two `DataPtr`s are equal when they point at the same
/// live object.
#[derive(Clone)]
pub enum DataPtr {
    Track(TrackPtr),
    Artist(ArtistPtr),
    Album(AlbumPtr),
    Genre(GenrePtr),
    Composer(ComposerPtr),
    Year(YearPtr),
}

impl DataPtr {
    pub fn kind(&self) -> EntityKind {
        match self {
            DataPtr::Track(_) => EntityKind::Track,
            DataPtr::Artist(_) => EntityKind::Artist,
            DataPtr::Album(_) => EntityKind::Album,
            DataPtr::Genre(_) => EntityKind::Genre,
            DataPtr::Composer(_) => EntityKind::Composer,
            DataPtr::Year(_) => EntityKind::Year,
        }
    }

    /// Display name; a track reports its title.
    pub fn name(&self) -> String {
        match self {
            DataPtr::Track(t) => t.title(),
            DataPtr::Artist(a) => a.name().to_string(),
            DataPtr::Album(a) => a.name().to_string(),
            DataPtr::Genre(g) => g.name().to_string(),
            DataPtr::Composer(c) => c.name().to_string(),
            DataPtr::Year(y) => y.name().to_string(),
        }
    }

    pub fn as_track(&self) -> Option<&TrackPtr> {
        match self {
            DataPtr::Track(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_artist(&self) -> Option<&ArtistPtr> {
        match self {
            DataPtr::Artist(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_album(&self) -> Option<&AlbumPtr> {
        match self {
            DataPtr::Album(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_genre(&self) -> Option<&GenrePtr> {
        match self {
            DataPtr::Genre(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_composer(&self) -> Option<&ComposerPtr> {
        match self {
            DataPtr::Composer(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_year(&self) -> Option<&YearPtr> {
        match self {
            DataPtr::Year(y) => Some(y),
            _ => None,
        }
    }
}

impl PartialEq for DataPtr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DataPtr::Track(a), DataPtr::Track(b)) => Arc::ptr_eq(a, b),
            (DataPtr::Artist(a), DataPtr::Artist(b)) => Arc::ptr_eq(a, b),
            (DataPtr::Album(a), DataPtr::Album(b)) => Arc::ptr_eq(a, b),
            (DataPtr::Genre(a), DataPtr::Genre(b)) => Arc::ptr_eq(a, b),
            (DataPtr::Composer(a), DataPtr::Composer(b)) => Arc::ptr_eq(a, b),
            (DataPtr::Year(a), DataPtr::Year(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for DataPtr {}

impl fmt::Debug for DataPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPtr")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

macro_rules! data_ptr_from {
    ($($variant:ident => $ptr:ty),* $(,)?) => {
        $(
            impl From<$ptr> for DataPtr {
                fn from(value: $ptr) -> Self {
                    DataPtr::$variant(value)
                }
            }
        )*
    };
}

data_ptr_from! {
    Track => TrackPtr,
    Artist => ArtistPtr,
    Album => AlbumPtr,
    Genre => GenrePtr,
    Composer => ComposerPtr,
    Year => YearPtr,
}
