//! Querying several collections as one.
//!
//! A [`FederatedQueryMaker`] forwards every builder call to the query maker
//! of each registered collection. Each child still decides on its own whether
//! it takes part (`include_collection` / `exclude_collection`), result batches
//! are relayed tagged with the id of the child that produced them, and a
//! single `query_done` follows once every child finished the run.

use crate::collection::Collection;
use crate::meta::{DataPtr, TrackPtr};
use crate::query::{
    AlbumQueryMode, Field, NumberComparison, QueryKind, QueryMaker, QueryObserver, QueryResult,
    ReturnFunction,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

/// Id reported by a federated query maker.
pub const FEDERATED_COLLECTION_ID: &str = "federated";

#[derive(Default)]
struct RelayState {
    runs_started: u64,
    runs_finished: u64,
    child_done: Vec<u64>,
}

/// Fan-in of the children's callbacks.
#[derive(Default)]
struct Relay {
    observers: Mutex<Vec<Arc<dyn QueryObserver>>>,
    state: Mutex<RelayState>,
}

impl Relay {
    fn child_finished(&self, child: usize) {
        let finished = {
            let mut state = self.state.lock();
            if let Some(done) = state.child_done.get_mut(child) {
                *done += 1;
            }
            let mut finished = 0;
            while state.runs_finished < state.runs_started
                && state.child_done.iter().all(|d| *d > state.runs_finished)
            {
                state.runs_finished += 1;
                finished += 1;
            }
            finished
        };
        for _ in 0..finished {
            self.notify_done();
        }
    }

    fn notify_done(&self) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.query_done();
        }
    }
}

struct ChildObserver {
    relay: Arc<Relay>,
    index: usize,
}

impl QueryObserver for ChildObserver {
    fn new_result_ready(&self, collection_id: &str, result: &QueryResult) {
        let observers = self.relay.observers.lock().clone();
        for observer in observers {
            observer.new_result_ready(collection_id, result);
        }
    }

    fn query_done(&self) {
        self.relay.child_finished(self.index);
    }
}

/// Query maker spanning the query makers of several collections.
pub struct FederatedQueryMaker {
    makers: Vec<Box<dyn QueryMaker>>,
    relay: Arc<Relay>,
    kind: QueryKind,
}

impl FederatedQueryMaker {
    pub fn new(makers: Vec<Box<dyn QueryMaker>>) -> Self {
        let relay = Arc::new(Relay::default());
        relay.state.lock().child_done = vec![0; makers.len()];

        let mut makers = makers;
        for (index, maker) in makers.iter_mut().enumerate() {
            maker.subscribe(Arc::new(ChildObserver {
                relay: relay.clone(),
                index,
            }));
        }
        Self {
            makers,
            relay,
            kind: QueryKind::None,
        }
    }

    /// Number of wrapped query makers.
    pub fn len(&self) -> usize {
        self.makers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.makers.is_empty()
    }

    fn each(&mut self, mut f: impl FnMut(&mut dyn QueryMaker)) -> &mut dyn QueryMaker {
        for maker in &mut self.makers {
            f(maker.as_mut());
        }
        self
    }

    fn start(&mut self, kind: QueryKind, f: impl FnMut(&mut dyn QueryMaker)) -> &mut dyn QueryMaker {
        if self.kind == QueryKind::None {
            self.kind = kind;
        }
        self.each(f)
    }
}

impl QueryMaker for FederatedQueryMaker {
    fn collection_id(&self) -> &str {
        FEDERATED_COLLECTION_ID
    }

    fn reset(&mut self) -> &mut dyn QueryMaker {
        self.kind = QueryKind::None;
        self.each(|m| {
            m.reset();
        })
    }

    fn start_track_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Track, |m| {
            m.start_track_query();
        })
    }

    fn start_artist_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Artist, |m| {
            m.start_artist_query();
        })
    }

    fn start_album_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Album, |m| {
            m.start_album_query();
        })
    }

    fn start_genre_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Genre, |m| {
            m.start_genre_query();
        })
    }

    fn start_composer_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Composer, |m| {
            m.start_composer_query();
        })
    }

    fn start_year_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Year, |m| {
            m.start_year_query();
        })
    }

    fn start_custom_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Custom, |m| {
            m.start_custom_query();
        })
    }

    fn add_return_value(&mut self, field: Field) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.add_return_value(field);
        })
    }

    fn add_return_function(
        &mut self,
        function: ReturnFunction,
        field: Field,
    ) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.add_return_function(function, field);
        })
    }

    fn order_by(&mut self, field: Field, descending: bool) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.order_by(field, descending);
        })
    }

    fn add_match(&mut self, data: &DataPtr) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.add_match(data);
        })
    }

    fn add_filter(
        &mut self,
        field: Field,
        filter: &str,
        match_begin: bool,
        match_end: bool,
    ) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.add_filter(field, filter, match_begin, match_end);
        })
    }

    fn exclude_filter(
        &mut self,
        field: Field,
        filter: &str,
        match_begin: bool,
        match_end: bool,
    ) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.exclude_filter(field, filter, match_begin, match_end);
        })
    }

    fn add_number_filter(
        &mut self,
        field: Field,
        value: i64,
        comparison: NumberComparison,
    ) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.add_number_filter(field, value, comparison);
        })
    }

    fn exclude_number_filter(
        &mut self,
        field: Field,
        value: i64,
        comparison: NumberComparison,
    ) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.exclude_number_filter(field, value, comparison);
        })
    }

    fn limit_max_result_size(&mut self, size: usize) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.limit_max_result_size(size);
        })
    }

    fn set_album_query_mode(&mut self, mode: AlbumQueryMode) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.set_album_query_mode(mode);
        })
    }

    fn begin_and(&mut self) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.begin_and();
        })
    }

    fn begin_or(&mut self) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.begin_or();
        })
    }

    fn end_and_or(&mut self) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.end_and_or();
        })
    }

    fn include_collection(&mut self, collection_id: &str) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.include_collection(collection_id);
        })
    }

    fn exclude_collection(&mut self, collection_id: &str) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.exclude_collection(collection_id);
        })
    }

    fn return_result_as_data_ptrs(&mut self, as_data_ptrs: bool) -> &mut dyn QueryMaker {
        self.each(|m| {
            m.return_result_as_data_ptrs(as_data_ptrs);
        })
    }

    fn subscribe(&mut self, observer: Arc<dyn QueryObserver>) -> &mut dyn QueryMaker {
        self.relay.observers.lock().push(observer);
        self
    }

    fn run(&mut self) {
        if self.makers.is_empty() {
            debug!("Federated query without collections");
            self.relay.notify_done();
            return;
        }
        self.relay.state.lock().runs_started += 1;
        for maker in &mut self.makers {
            maker.run();
        }
    }

    fn abort_query(&mut self) {
        for maker in &mut self.makers {
            maker.abort_query();
        }
    }

    fn is_running(&self) -> bool {
        self.makers.iter().any(|m| m.is_running())
    }

    fn query_kind(&self) -> QueryKind {
        self.kind
    }
}

/// The set of collections known to the application.
#[derive(Default)]
pub struct CollectionManager {
    collections: RwLock<Vec<Arc<dyn Collection>>>,
}

impl CollectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `collection`, replacing one with the same id.
    pub fn add_collection(&self, collection: Arc<dyn Collection>) {
        let mut collections = self.collections.write();
        collections.retain(|c| c.collection_id() != collection.collection_id());
        info!(collection = %collection.collection_id(), "Collection registered");
        collections.push(collection);
    }

    pub fn remove_collection(&self, collection_id: &str) -> Option<Arc<dyn Collection>> {
        let mut collections = self.collections.write();
        let index = collections
            .iter()
            .position(|c| c.collection_id() == collection_id)?;
        info!(collection = %collection_id, "Collection removed");
        Some(collections.remove(index))
    }

    pub fn collection(&self, collection_id: &str) -> Option<Arc<dyn Collection>> {
        self.collections
            .read()
            .iter()
            .find(|c| c.collection_id() == collection_id)
            .cloned()
    }

    /// Registered collections in registration order.
    pub fn collections(&self) -> Vec<Arc<dyn Collection>> {
        self.collections.read().clone()
    }

    /// Query maker spanning every registered collection.
    pub fn query_maker(&self) -> FederatedQueryMaker {
        FederatedQueryMaker::new(
            self.collections
                .read()
                .iter()
                .map(|c| c.query_maker())
                .collect(),
        )
    }

    /// First collection that holds a track at `url`.
    pub async fn track_for_url(&self, url: &str) -> Option<TrackPtr> {
        for collection in self.collections() {
            if !collection.possibly_contains_track(url) {
                continue;
            }
            if let Some(track) = collection.track_for_url(url).await {
                return Some(track);
            }
        }
        None
    }
}
