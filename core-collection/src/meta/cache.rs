use super::{DataPtr, Track};
use crate::collection::MetaStore;
use crate::query::{self, QueryMaker, ResultItem};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Lazily populated entity list of an artist, album, genre, composer or
/// year: its tracks, or an artist's albums.
///
/// Entries are weak. A list in which any entry has died counts as a miss and
/// is reloaded. Every invalidation bumps a generation counter; a load that
/// started before an invalidation is not stored.
pub(crate) struct ListCache<T> {
    state: Mutex<CacheState<T>>,
}

pub(crate) type TrackListCache = ListCache<Track>;

struct CacheState<T> {
    generation: u64,
    entries: Option<Vec<Weak<T>>>,
}

impl<T> Default for ListCache<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(CacheState {
                generation: 0,
                entries: None,
            }),
        }
    }
}

impl<T> ListCache<T> {
    pub(crate) fn get(&self) -> Option<Vec<Arc<T>>> {
        let state = self.state.lock();
        let cached = state.entries.as_ref()?;
        cached.iter().map(Weak::upgrade).collect()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub(crate) fn store_if_current(&self, generation: u64, entries: &[Arc<T>]) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.entries = Some(entries.iter().map(Arc::downgrade).collect());
        }
    }

    pub(crate) fn invalidate(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.entries = None;
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.state.lock().entries.is_some()
    }
}

impl<T> ListCache<T>
where
    Arc<T>: ResultItem,
{
    /// Cached entries, or the entries `start` selects, freshly queried from
    /// `store`.
    pub(crate) async fn load_with(
        &self,
        store: &Weak<dyn MetaStore>,
        start: impl FnOnce(&mut dyn QueryMaker) + Send,
    ) -> Vec<Arc<T>> {
        if let Some(entries) = self.get() {
            return entries;
        }
        let Some(store) = store.upgrade() else {
            return Vec::new();
        };

        let generation = self.generation();
        let mut qm = store.query_maker();
        start(qm.as_mut());
        drop(store);

        let entries: Vec<Arc<T>> = query::collect(qm).await.all();
        self.store_if_current(generation, &entries);
        entries
    }
}

impl ListCache<Track> {
    /// Tracks matching `owner`.
    pub(crate) async fn load(&self, store: &Weak<dyn MetaStore>, owner: DataPtr) -> Vec<Arc<Track>> {
        self.load_with(store, |qm| {
            qm.start_track_query().add_match(&owner);
        })
        .await
    }
}
