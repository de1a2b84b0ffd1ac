//! # Entity Registry
//!
//! Per-collection identity map: at most one live object per (kind, id).
//!
//! Each kind has its own slot map behind its own mutex, so lookups of
//! different kinds never contend. Objects are created while the slot lock is
//! held; two threads asking for the same id therefore always receive the same
//! `Arc`. Slots keep `Weak` references only. An entity dies with its last
//! collaborator and its slot is swept by [`Registry::purge_dead`], which also
//! runs on its own every few hundred insertions.
//!
//! When an id is already live under a different name the live object wins
//! and the new name is ignored (logged at debug level).

use crate::collection::MetaStore;
use crate::error::{CollectionError, Result};
use crate::meta::{
    Album, AlbumPtr, Artist, ArtistPtr, Composer, ComposerPtr, EntityKind, Genre, GenrePtr, Track,
    TrackFields, TrackPtr, TrackRelations, Year, YearPtr,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Number of fields of one track row, see [`crate::sql::schema::TRACK_COLUMNS`].
pub const TRACK_ROW_LEN: usize = 29;

const PURGE_INTERVAL: usize = 256;

trait Entry {
    fn entry_name(&self) -> String;
}

impl Entry for Artist {
    fn entry_name(&self) -> String {
        self.name().to_string()
    }
}

impl Entry for Album {
    fn entry_name(&self) -> String {
        self.name().to_string()
    }
}

impl Entry for Genre {
    fn entry_name(&self) -> String {
        self.name().to_string()
    }
}

impl Entry for Composer {
    fn entry_name(&self) -> String {
        self.name().to_string()
    }
}

impl Entry for Year {
    fn entry_name(&self) -> String {
        self.name().to_string()
    }
}

impl Entry for Track {
    fn entry_name(&self) -> String {
        self.url().to_string()
    }
}

struct Slots<K, T> {
    by_key: HashMap<K, Weak<T>>,
    by_name: HashMap<String, Weak<T>>,
    inserts: usize,
}

impl<K, T> Default for Slots<K, T> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            by_name: HashMap::new(),
            inserts: 0,
        }
    }
}

impl<K: Hash + Eq + Clone + std::fmt::Debug, T: Entry> Slots<K, T> {
    fn by_name(&self, name: &str) -> Option<Arc<T>> {
        self.by_name.get(name).and_then(Weak::upgrade)
    }

    fn get_or_insert_with(
        &mut self,
        key: K,
        name_key: String,
        kind: EntityKind,
        make: impl FnOnce() -> T,
    ) -> Arc<T> {
        if let Some(existing) = self.by_key.get(&key).and_then(Weak::upgrade) {
            let existing_name = existing.entry_name();
            if !name_key.starts_with(existing_name.as_str()) {
                debug!(
                    %kind,
                    key = ?key,
                    cached = %existing_name,
                    requested = %name_key,
                    "Registry entry already live under another name, keeping it"
                );
            }
            return existing;
        }

        let entity = Arc::new(make());
        self.by_key.insert(key, Arc::downgrade(&entity));
        self.by_name.insert(name_key, Arc::downgrade(&entity));
        self.inserts += 1;
        if self.inserts % PURGE_INTERVAL == 0 {
            self.purge();
        }
        entity
    }

    fn purge(&mut self) -> usize {
        let before = self.by_key.len();
        self.by_key.retain(|_, weak| weak.strong_count() > 0);
        self.by_name.retain(|_, weak| weak.strong_count() > 0);
        before - self.by_key.len()
    }

    fn live(&self) -> usize {
        self.by_key.values().filter(|w| w.strong_count() > 0).count()
    }
}

fn album_name_key(name: &str, artist_id: i64) -> String {
    format!("{name}\u{1f}{artist_id}")
}

/// Identity map of one collection.
pub struct Registry {
    store: Weak<dyn MetaStore>,
    tracks: Mutex<Slots<(i64, String), Track>>,
    artists: Mutex<Slots<i64, Artist>>,
    albums: Mutex<Slots<i64, Album>>,
    genres: Mutex<Slots<i64, Genre>>,
    composers: Mutex<Slots<i64, Composer>>,
    years: Mutex<Slots<i64, Year>>,
}

macro_rules! tag_lookups {
    ($($kind:ident, $slots:ident, $get:ident, $by_name:ident, $ty:ident, $ptr:ident);* $(;)?) => {
        $(
            /// Live object for `id`, created with `name` when missing.
            pub fn $get(&self, name: &str, id: i64) -> $ptr {
                let store = self.store.clone();
                self.$slots.lock().get_or_insert_with(
                    id,
                    name.to_string(),
                    EntityKind::$kind,
                    || $ty::new(id, name, store),
                )
            }

            /// Object named `name`, resolving (and creating) its row in the
            /// backing store when it is not live yet. The empty name is the
            /// unknown value with id `0`.
            pub async fn $by_name(&self, name: &str) -> Result<$ptr> {
                let live = self.$slots.lock().by_name(name);
                if let Some(live) = live {
                    return Ok(live);
                }
                if name.is_empty() {
                    return Ok(self.$get(name, 0));
                }
                let store = self.store.upgrade().ok_or(CollectionError::CollectionGone)?;
                let id = store.resolve_id(EntityKind::$kind, name).await?;
                Ok(self.$get(name, id))
            }
        )*
    };
}

impl Registry {
    pub fn new(store: Weak<dyn MetaStore>) -> Self {
        Self {
            store,
            tracks: Mutex::default(),
            artists: Mutex::default(),
            albums: Mutex::default(),
            genres: Mutex::default(),
            composers: Mutex::default(),
            years: Mutex::default(),
        }
    }

    tag_lookups! {
        Artist, artists, artist, artist_by_name, Artist, ArtistPtr;
        Genre, genres, genre, genre_by_name, Genre, GenrePtr;
        Composer, composers, composer, composer_by_name, Composer, ComposerPtr;
        Year, years, year, year_by_name, Year, YearPtr;
    }

    /// Live album for `id`, created when missing. `artist_id` `0` is a
    /// compilation.
    pub fn album(&self, name: &str, id: i64, artist_id: i64) -> AlbumPtr {
        let store = self.store.clone();
        self.albums.lock().get_or_insert_with(
            id,
            album_name_key(name, artist_id),
            EntityKind::Album,
            || Album::new(id, name, artist_id, store),
        )
    }

    /// Album `name` by `artist_id`, resolved through the backing store when
    /// not live. An existing compilation of the same name is reused.
    pub async fn album_by_name(&self, name: &str, artist_id: i64) -> Result<AlbumPtr> {
        {
            let slots = self.albums.lock();
            if let Some(live) = slots
                .by_name(&album_name_key(name, artist_id))
                .or_else(|| slots.by_name(&album_name_key(name, 0)))
            {
                return Ok(live);
            }
        }
        if name.is_empty() {
            return Ok(self.album(name, 0, 0));
        }
        let store = self.store.upgrade().ok_or(CollectionError::CollectionGone)?;
        let (id, album_artist) = store.resolve_album(name, artist_id).await?;
        Ok(self.album(name, id, album_artist))
    }

    /// Live track stored at `url` on `device_id`.
    pub fn track(&self, device_id: i64, url: &str) -> Option<TrackPtr> {
        self.tracks
            .lock()
            .by_key
            .get(&(device_id, url.to_string()))
            .and_then(Weak::upgrade)
    }

    /// Live track at (`device_id`, `url`), built by `make` when missing.
    pub fn track_or_insert_with(
        &self,
        device_id: i64,
        url: &str,
        make: impl FnOnce(Weak<dyn MetaStore>) -> Track,
    ) -> TrackPtr {
        let store = self.store.clone();
        self.tracks.lock().get_or_insert_with(
            (device_id, url.to_string()),
            url.to_string(),
            EntityKind::Track,
            || make(store),
        )
    }

    /// Track described by one positional row of the track query.
    ///
    /// The five related entities are looked up through this registry so the
    /// track shares them with every other track. Returns `None` when the row
    /// does not have exactly [`TRACK_ROW_LEN`] fields.
    pub fn track_from_row(&self, row: &[String]) -> Option<TrackPtr> {
        if row.len() != TRACK_ROW_LEN {
            debug!(fields = row.len(), "Ignoring malformed track row");
            return None;
        }
        let device_id = parse_int(&row[0]);
        let url = row[1].as_str();
        if let Some(live) = self.track(device_id, url) {
            return Some(live);
        }

        let relations = TrackRelations {
            artist: self.artist(&row[18], parse_int(&row[19])),
            album: self.album(&row[20], parse_int(&row[21]), parse_int(&row[22])),
            genre: self.genre(&row[23], parse_int(&row[24])),
            composer: self.composer(&row[25], parse_int(&row[26])),
            year: self.year(&row[27], parse_int(&row[28])),
        };
        let fields = TrackFields {
            title: row[3].clone(),
            comment: row[4].clone(),
            track_number: parse_small(&row[5]),
            disc_number: parse_small(&row[6]),
            score: parse_real(&row[7]),
            rating: parse_small(&row[8]),
            bitrate: parse_small(&row[9]),
            length: parse_int(&row[10]),
            filesize: parse_int(&row[11]),
            sample_rate: parse_small(&row[12]),
            first_played: parse_int(&row[13]),
            last_played: parse_int(&row[14]),
            play_count: parse_small(&row[15]),
            file_type: parse_small(&row[16]),
            bpm: parse_real(&row[17]),
        };
        let id = parse_int(&row[2]);

        Some(self.track_or_insert_with(device_id, url, |store| {
            Track::new(id, device_id, url, fields, relations, store)
        }))
    }

    /// Drop the slots of every released entity; returns how many went.
    pub fn purge_dead(&self) -> usize {
        self.tracks.lock().purge()
            + self.artists.lock().purge()
            + self.albums.lock().purge()
            + self.genres.lock().purge()
            + self.composers.lock().purge()
            + self.years.lock().purge()
    }

    /// Number of live entities of `kind`.
    pub fn live_count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Track => self.tracks.lock().live(),
            EntityKind::Artist => self.artists.lock().live(),
            EntityKind::Album => self.albums.lock().live(),
            EntityKind::Genre => self.genres.lock().live(),
            EntityKind::Composer => self.composers.lock().live(),
            EntityKind::Year => self.years.lock().live(),
        }
    }
}

/// Integer field of a row; empty and unparsable fields are `0`.
pub(crate) fn parse_int(field: &str) -> i64 {
    let field = field.trim();
    field
        .parse::<i64>()
        .or_else(|_| field.parse::<f64>().map(|v| v as i64))
        .unwrap_or(0)
}

/// Integer field stored as `i32`; out-of-range values read as `0`.
pub(crate) fn parse_small(field: &str) -> i32 {
    i32::try_from(parse_int(field)).unwrap_or_default()
}

pub(crate) fn parse_real(field: &str) -> f64 {
    field.trim().parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> Registry {
        let store: Weak<dyn MetaStore> = Weak::<crate::memory::MemoryCollection>::new();
        Registry::new(store)
    }

    #[test]
    fn test_same_id_same_object() {
        let registry = detached();
        let a = registry.artist("Fire", 1);
        let b = registry.artist("Fire", 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.live_count(EntityKind::Artist), 1);
    }

    #[test]
    fn test_existing_name_wins_on_mismatch() {
        let registry = detached();
        let a = registry.genre("Rock", 4);
        let b = registry.genre("Pop", 4);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.name(), "Rock");
    }

    #[test]
    fn test_released_entity_is_recreated() {
        let registry = detached();
        let first = registry.year("1999", 2);
        drop(first);
        assert_eq!(registry.live_count(EntityKind::Year), 0);
        assert_eq!(registry.purge_dead(), 1);

        let second = registry.year("1999", 2);
        assert_eq!(second.id(), 2);
        assert_eq!(registry.live_count(EntityKind::Year), 1);
    }

    #[tokio::test]
    async fn test_empty_name_is_unknown_without_store() {
        let registry = detached();
        let unknown = registry.artist_by_name("").await.unwrap();
        assert_eq!(unknown.id(), 0);
        assert!(Arc::ptr_eq(&unknown, &registry.artist("", 0)));

        let err = registry.artist_by_name("Fire").await.unwrap_err();
        assert!(matches!(err, CollectionError::CollectionGone));
    }

    #[test]
    fn test_track_from_row_rejects_short_rows() {
        let registry = detached();
        let row = vec![String::new(); TRACK_ROW_LEN - 1];
        assert!(registry.track_from_row(&row).is_none());
    }

    #[test]
    fn test_track_from_row_shares_relations() {
        let registry = detached();
        let row = |url: &str, title: &str| -> Vec<String> {
            [
                "-1", url, "10", title, "", "1", "0", "50.5", "8", "192", "240", "4000000",
                "44100", "0", "0", "3", "1", "", "Fire", "1", "Elements", "2", "1", "Rock", "3",
                "Hildegard", "5", "1999", "4",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()
        };

        let a = registry.track_from_row(&row("/a.mp3", "Ember")).unwrap();
        let b = registry.track_from_row(&row("/b.mp3", "Blaze")).unwrap();
        assert_eq!((a.artist().name(), a.artist().id()), ("Fire", 1));
        assert_eq!((a.album().name(), a.album().id()), ("Elements", 2));
        assert_eq!(a.album().album_artist_id(), 1);
        assert_eq!((a.genre().name(), a.genre().id()), ("Rock", 3));
        assert_eq!((a.composer().name(), a.composer().id()), ("Hildegard", 5));
        assert_eq!((a.year().name(), a.year().id()), ("1999", 4));
        assert!(Arc::ptr_eq(&a.artist(), &b.artist()));
        assert!(Arc::ptr_eq(&a.album(), &b.album()));
        assert!(Arc::ptr_eq(&a.genre(), &b.genre()));
        assert!(Arc::ptr_eq(&a.composer(), &b.composer()));
        assert!(Arc::ptr_eq(&a.year(), &b.year()));
        assert_eq!(a.score(), 50.5);

        let mut bare = row("/c.mp3", "Ash");
        bare[25].clear();
        bare[26].clear();
        let c = registry.track_from_row(&bare).unwrap();
        assert_eq!((c.composer().name(), c.composer().id()), ("", 0));

        let again = registry.track_from_row(&row("/a.mp3", "Ember")).unwrap();
        assert!(Arc::ptr_eq(&a, &again));
    }

    #[test]
    fn test_track_from_row_rejects_out_of_range_small_integers() {
        let registry = detached();
        let mut row = vec![String::new(); TRACK_ROW_LEN];
        row[1] = "/big.mp3".to_string();
        row[5] = "4294967297".to_string();
        row[15] = "-3000000000".to_string();
        row[10] = "4294967297".to_string();
        let track = registry.track_from_row(&row).unwrap();
        assert_eq!(track.track_number(), 0);
        assert_eq!(track.play_count(), 0);
        assert_eq!(track.length(), 4_294_967_297);
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_int(""), 0);
        assert_eq!(parse_int(" 42 "), 42);
        assert_eq!(parse_int("3.0"), 3);
        assert_eq!(parse_int("abc"), 0);
        assert_eq!(parse_small("2147483648"), 0);
        assert_eq!(parse_small("-7"), -7);
        assert_eq!(parse_real("4.5"), 4.5);
        assert_eq!(parse_real(""), 0.0);
    }
}
