use super::{is_query_worker_thread, QueryMaker, QueryObserver, QueryResult, QueryResults};
use crate::error::{CollectionError, Result};
use crate::meta::{AlbumPtr, ArtistPtr, ComposerPtr, DataPtr, GenrePtr, TrackPtr, YearPtr};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

#[derive(Default)]
struct CollectorState {
    results: QueryResults,
    expected: usize,
    finished: usize,
}

#[derive(Default)]
struct ResultCollector {
    state: Mutex<CollectorState>,
    finished: Condvar,
}

impl ResultCollector {
    fn expect_run(&self) {
        let mut state = self.state.lock();
        state.results.clear();
        state.expected += 1;
    }

    fn wait(&self) -> QueryResults {
        let mut state = self.state.lock();
        while state.finished < state.expected {
            self.finished.wait(&mut state);
        }
        std::mem::take(&mut state.results)
    }
}

impl QueryObserver for ResultCollector {
    fn new_result_ready(&self, collection_id: &str, result: &QueryResult) {
        self.state.lock().results.push(collection_id, result.clone());
    }

    fn query_done(&self) {
        let mut state = self.state.lock();
        state.finished += 1;
        self.finished.notify_all();
    }
}

/// Synchronous wrapper around a query maker.
///
/// [`start_query`](Self::start_query) blocks the calling thread until the
/// run finished. It refuses to run on a query worker thread, where waiting
/// could exhaust the pool that has to complete the query.
///
/// ```ignore
/// let mut query = BlockingQuery::new(collection.query_maker());
/// query.maker().start_artist_query().order_by(Field::Artist, false);
/// query.start_query()?;
/// let artists = query.artists(collection.collection_id());
/// ```
pub struct BlockingQuery {
    maker: Box<dyn QueryMaker>,
    collector: Arc<ResultCollector>,
    results: QueryResults,
}

impl BlockingQuery {
    pub fn new(mut maker: Box<dyn QueryMaker>) -> Self {
        let collector = Arc::new(ResultCollector::default());
        maker.subscribe(collector.clone());
        Self {
            maker,
            collector,
            results: QueryResults::default(),
        }
    }

    /// The wrapped maker, for builder calls.
    pub fn maker(&mut self) -> &mut dyn QueryMaker {
        self.maker.as_mut()
    }

    /// Run the query and wait for it to finish.
    pub fn start_query(&mut self) -> Result<()> {
        if is_query_worker_thread() {
            return Err(CollectionError::BlockingOnWorker);
        }
        self.collector.expect_run();
        self.maker.run();
        self.results = self.collector.wait();
        Ok(())
    }

    /// Everything the last run delivered.
    pub fn results(&self) -> &QueryResults {
        &self.results
    }

    pub fn collection_ids(&self) -> Vec<String> {
        self.results.collection_ids()
    }

    pub fn tracks(&self, collection_id: &str) -> Vec<TrackPtr> {
        self.results.tracks(collection_id)
    }

    pub fn artists(&self, collection_id: &str) -> Vec<ArtistPtr> {
        self.results.artists(collection_id)
    }

    pub fn albums(&self, collection_id: &str) -> Vec<AlbumPtr> {
        self.results.albums(collection_id)
    }

    pub fn genres(&self, collection_id: &str) -> Vec<GenrePtr> {
        self.results.genres(collection_id)
    }

    pub fn composers(&self, collection_id: &str) -> Vec<ComposerPtr> {
        self.results.composers(collection_id)
    }

    pub fn years(&self, collection_id: &str) -> Vec<YearPtr> {
        self.results.years(collection_id)
    }

    pub fn data(&self, collection_id: &str) -> Vec<DataPtr> {
        self.results.data(collection_id)
    }

    pub fn custom_data(&self, collection_id: &str) -> Vec<String> {
        self.results.custom_data(collection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_waits_for_every_expected_run() {
        let collector = Arc::new(ResultCollector::default());
        collector.expect_run();

        let remote = collector.clone();
        let worker = std::thread::spawn(move || {
            remote.new_result_ready("c", &QueryResult::Custom(vec!["7".to_string()]));
            remote.query_done();
        });

        let results = collector.wait();
        worker.join().unwrap();
        assert_eq!(results.custom_data("c"), vec!["7"]);
    }
}
