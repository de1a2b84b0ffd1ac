//! # Query Abstraction
//!
//! A backend-agnostic builder describing which part of a collection to
//! return, in which shape, in which order and how much of it.
//!
//! ## Lifecycle
//!
//! ```text
//! reset ─> start_*_query (first call wins) ─> add_match / add_filter / ... ─> run
//!                                                                             │
//!              new_result_ready(collection_id, result) ... query_done  <──────┘
//! ```
//!
//! `run` never blocks: the job is queued on the collection's query worker
//! pool and results arrive through the subscribed [`QueryObserver`]s. Runs of
//! one maker execute one at a time in submission order. Use [`collect`] to
//! await the results of one run, or [`BlockingQuery`] from synchronous code
//! outside the worker pool.
//!
//! ## Example
//!
//! ```ignore
//! let mut qm = collection.query_maker();
//! qm.start_track_query()
//!     .add_filter(Field::Title, "fire", true, true)
//!     .order_by(Field::Title, false);
//! let tracks: Vec<TrackPtr> = query::collect(qm).await.all();
//! ```

mod blocking;
pub(crate) mod worker;

pub use blocking::BlockingQuery;
pub use worker::{is_query_worker_thread, QueryPool};

use crate::meta::{
    AlbumPtr, ArtistPtr, ComposerPtr, DataPtr, GenrePtr, TrackPtr, YearPtr,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Builder vocabulary
// ============================================================================

/// Result shape of a query, fixed by the first `start_*_query` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QueryKind {
    #[default]
    None,
    Track,
    Artist,
    Album,
    Genre,
    Composer,
    Year,
    Custom,
}

/// Abstract field identifiers usable in filters, ordering and custom return
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Url,
    Title,
    Artist,
    Album,
    Genre,
    Composer,
    Year,
    Comment,
    TrackNumber,
    DiscNumber,
    Length,
    Bitrate,
    SampleRate,
    FileSize,
    Format,
    Score,
    Rating,
    FirstPlayed,
    LastPlayed,
    PlayCount,
}

impl Field {
    /// Whether the field compares numerically. `Year` is stored as text but
    /// compares as a number.
    pub fn is_numeric(self) -> bool {
        !matches!(
            self,
            Field::Url
                | Field::Title
                | Field::Artist
                | Field::Album
                | Field::Genre
                | Field::Composer
                | Field::Comment
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumberComparison {
    Equals,
    GreaterThan,
    LessThan,
}

impl NumberComparison {
    pub(crate) fn apply(self, lhs: f64, rhs: f64, negated: bool) -> bool {
        match (self, negated) {
            (NumberComparison::Equals, false) => lhs == rhs,
            (NumberComparison::Equals, true) => lhs != rhs,
            (NumberComparison::GreaterThan, false) => lhs > rhs,
            (NumberComparison::GreaterThan, true) => lhs <= rhs,
            (NumberComparison::LessThan, false) => lhs < rhs,
            (NumberComparison::LessThan, true) => lhs >= rhs,
        }
    }

    /// SQL operator, already complemented when `negated`.
    pub(crate) fn sql_operator(self, negated: bool) -> &'static str {
        match (self, negated) {
            (NumberComparison::Equals, false) => "=",
            (NumberComparison::Equals, true) => "<>",
            (NumberComparison::GreaterThan, false) => ">",
            (NumberComparison::GreaterThan, true) => "<=",
            (NumberComparison::LessThan, false) => "<",
            (NumberComparison::LessThan, true) => ">=",
        }
    }
}

/// Aggregates for custom queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnFunction {
    Count,
    Sum,
    Min,
    Max,
}

impl ReturnFunction {
    pub(crate) fn sql_name(self) -> &'static str {
        match self {
            ReturnFunction::Count => "COUNT",
            ReturnFunction::Sum => "SUM",
            ReturnFunction::Min => "MIN",
            ReturnFunction::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlbumQueryMode {
    #[default]
    AllAlbums,
    OnlyCompilations,
    OnlyNormalAlbums,
}

/// A field value as read from a track.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl FieldValue {
    /// Numeric view; text that does not parse is `0`.
    pub fn as_number(&self) -> f64 {
        match self {
            FieldValue::Text(text) => text.trim().parse().unwrap_or(0.0),
            FieldValue::Integer(i) => *i as f64,
            FieldValue::Real(r) => *r,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Real(r) => write!(f, "{r}"),
        }
    }
}

// ============================================================================
// Query maker
// ============================================================================

/// Builder and executor of one collection query.
///
/// Builder methods return the maker itself so calls chain. Misuse is never
/// an error: a second `start_*_query` is ignored, as are filters that do not
/// apply to the current backend.
pub trait QueryMaker: Send {
    /// Collection this maker queries.
    fn collection_id(&self) -> &str;

    /// Forget every builder call. Subscribed observers stay.
    fn reset(&mut self) -> &mut dyn QueryMaker;

    fn start_track_query(&mut self) -> &mut dyn QueryMaker;
    fn start_artist_query(&mut self) -> &mut dyn QueryMaker;
    fn start_album_query(&mut self) -> &mut dyn QueryMaker;
    fn start_genre_query(&mut self) -> &mut dyn QueryMaker;
    fn start_composer_query(&mut self) -> &mut dyn QueryMaker;
    fn start_year_query(&mut self) -> &mut dyn QueryMaker;
    fn start_custom_query(&mut self) -> &mut dyn QueryMaker;

    /// Add a column to a custom query.
    fn add_return_value(&mut self, field: Field) -> &mut dyn QueryMaker;

    /// Add an aggregate column to a custom query.
    fn add_return_function(&mut self, function: ReturnFunction, field: Field)
        -> &mut dyn QueryMaker;

    fn order_by(&mut self, field: Field, descending: bool) -> &mut dyn QueryMaker;

    /// Restrict results to rows related to `data`. Matches always combine
    /// with AND, regardless of open OR groups.
    fn add_match(&mut self, data: &DataPtr) -> &mut dyn QueryMaker;

    /// Text filter. `match_begin` lets the value start anywhere,
    /// `match_end` lets it end anywhere; both set means substring.
    fn add_filter(
        &mut self,
        field: Field,
        filter: &str,
        match_begin: bool,
        match_end: bool,
    ) -> &mut dyn QueryMaker;

    /// Complement of [`add_filter`](Self::add_filter).
    fn exclude_filter(
        &mut self,
        field: Field,
        filter: &str,
        match_begin: bool,
        match_end: bool,
    ) -> &mut dyn QueryMaker;

    fn add_number_filter(
        &mut self,
        field: Field,
        value: i64,
        comparison: NumberComparison,
    ) -> &mut dyn QueryMaker;

    /// Exact complement of [`add_number_filter`](Self::add_number_filter):
    /// `>` becomes `<=`, `=` becomes `<>`.
    fn exclude_number_filter(
        &mut self,
        field: Field,
        value: i64,
        comparison: NumberComparison,
    ) -> &mut dyn QueryMaker;

    fn limit_max_result_size(&mut self, size: usize) -> &mut dyn QueryMaker;

    fn set_album_query_mode(&mut self, mode: AlbumQueryMode) -> &mut dyn QueryMaker;

    fn begin_and(&mut self) -> &mut dyn QueryMaker;
    fn begin_or(&mut self) -> &mut dyn QueryMaker;

    /// Close the innermost group; unbalanced calls are ignored.
    fn end_and_or(&mut self) -> &mut dyn QueryMaker;

    /// Participate only if `collection_id` names this collection.
    fn include_collection(&mut self, collection_id: &str) -> &mut dyn QueryMaker;

    /// Stay out of the query if `collection_id` names this collection.
    fn exclude_collection(&mut self, collection_id: &str) -> &mut dyn QueryMaker;

    /// Deliver results as [`QueryResult::Data`] instead of a typed list.
    fn return_result_as_data_ptrs(&mut self, as_data_ptrs: bool) -> &mut dyn QueryMaker;

    fn subscribe(&mut self, observer: Arc<dyn QueryObserver>) -> &mut dyn QueryMaker;

    /// Queue the query. Observers receive at most one result batch per
    /// collection, then `query_done`.
    fn run(&mut self);

    /// Best-effort cancellation of queued and running jobs.
    fn abort_query(&mut self);

    fn is_running(&self) -> bool;

    fn query_kind(&self) -> QueryKind;
}

// ============================================================================
// Result delivery
// ============================================================================

/// Receives the outcome of query runs.
///
/// Called on a query worker thread.
pub trait QueryObserver: Send + Sync {
    fn new_result_ready(&self, collection_id: &str, result: &QueryResult);
    fn query_done(&self);
}

#[derive(Debug, Clone)]
pub enum QueryEvent {
    NewResult {
        collection_id: String,
        result: QueryResult,
    },
    Done,
}

/// Observer forwarding every callback into a channel.
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<QueryEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<QueryEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl QueryObserver for ChannelObserver {
    fn new_result_ready(&self, collection_id: &str, result: &QueryResult) {
        self.sender
            .send(QueryEvent::NewResult {
                collection_id: collection_id.to_string(),
                result: result.clone(),
            })
            .ok();
    }

    fn query_done(&self) {
        self.sender.send(QueryEvent::Done).ok();
    }
}

/// One result batch.
#[derive(Debug, Clone)]
pub enum QueryResult {
    Tracks(Vec<TrackPtr>),
    Artists(Vec<ArtistPtr>),
    Albums(Vec<AlbumPtr>),
    Genres(Vec<GenrePtr>),
    Composers(Vec<ComposerPtr>),
    Years(Vec<YearPtr>),
    Data(Vec<DataPtr>),
    /// Row-major string values of a custom query.
    Custom(Vec<String>),
}

impl QueryResult {
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Tracks(v) => v.len(),
            QueryResult::Artists(v) => v.len(),
            QueryResult::Albums(v) => v.len(),
            QueryResult::Genres(v) => v.len(),
            QueryResult::Composers(v) => v.len(),
            QueryResult::Years(v) => v.len(),
            QueryResult::Data(v) => v.len(),
            QueryResult::Custom(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entity results as a polymorphic list; custom values yield nothing.
    pub fn to_data_ptrs(&self) -> Vec<DataPtr> {
        match self {
            QueryResult::Tracks(v) => v.iter().cloned().map(DataPtr::from).collect(),
            QueryResult::Artists(v) => v.iter().cloned().map(DataPtr::from).collect(),
            QueryResult::Albums(v) => v.iter().cloned().map(DataPtr::from).collect(),
            QueryResult::Genres(v) => v.iter().cloned().map(DataPtr::from).collect(),
            QueryResult::Composers(v) => v.iter().cloned().map(DataPtr::from).collect(),
            QueryResult::Years(v) => v.iter().cloned().map(DataPtr::from).collect(),
            QueryResult::Data(v) => v.clone(),
            QueryResult::Custom(_) => Vec::new(),
        }
    }
}

/// An entity type a query can return.
pub trait ResultItem: Clone + Send + Sync + 'static {
    fn wrap(items: Vec<Self>) -> QueryResult;
    fn into_data_ptr(self) -> DataPtr;
    fn from_data_ptr(data: &DataPtr) -> Option<Self>;
    fn extract(result: &QueryResult) -> Vec<Self>;
}

macro_rules! result_item {
    ($($ptr:ty => $variant:ident, $accessor:ident);* $(;)?) => {
        $(
            impl ResultItem for $ptr {
                fn wrap(items: Vec<Self>) -> QueryResult {
                    QueryResult::$variant(items)
                }

                fn into_data_ptr(self) -> DataPtr {
                    DataPtr::from(self)
                }

                fn from_data_ptr(data: &DataPtr) -> Option<Self> {
                    data.$accessor().cloned()
                }

                fn extract(result: &QueryResult) -> Vec<Self> {
                    match result {
                        QueryResult::$variant(items) => items.clone(),
                        QueryResult::Data(items) => {
                            items.iter().filter_map(Self::from_data_ptr).collect()
                        }
                        _ => Vec::new(),
                    }
                }
            }
        )*
    };
}

result_item! {
    TrackPtr => Tracks, as_track;
    ArtistPtr => Artists, as_artist;
    AlbumPtr => Albums, as_album;
    GenrePtr => Genres, as_genre;
    ComposerPtr => Composers, as_composer;
    YearPtr => Years, as_year;
}

/// Build the batch for `items` in the representation chosen for the query.
pub fn package<T: ResultItem>(items: Vec<T>, as_data_ptrs: bool) -> QueryResult {
    if as_data_ptrs {
        QueryResult::Data(items.into_iter().map(ResultItem::into_data_ptr).collect())
    } else {
        T::wrap(items)
    }
}

/// Batches accumulated from one run, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    batches: Vec<(String, QueryResult)>,
}

impl QueryResults {
    pub fn push(&mut self, collection_id: impl Into<String>, result: QueryResult) {
        self.batches.push((collection_id.into(), result));
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }

    /// Collections that delivered a batch, in arrival order.
    pub fn collection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for (id, _) in &self.batches {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    pub fn batches(&self) -> &[(String, QueryResult)] {
        &self.batches
    }

    /// Total number of items across batches.
    pub fn len(&self) -> usize {
        self.batches.iter().map(|(_, r)| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every item of type `T` across all collections.
    pub fn all<T: ResultItem>(&self) -> Vec<T> {
        self.batches
            .iter()
            .flat_map(|(_, result)| T::extract(result))
            .collect()
    }

    /// Items of type `T` delivered by `collection_id`.
    pub fn of<T: ResultItem>(&self, collection_id: &str) -> Vec<T> {
        self.batches
            .iter()
            .filter(|(id, _)| id == collection_id)
            .flat_map(|(_, result)| T::extract(result))
            .collect()
    }

    pub fn tracks(&self, collection_id: &str) -> Vec<TrackPtr> {
        self.of(collection_id)
    }

    pub fn artists(&self, collection_id: &str) -> Vec<ArtistPtr> {
        self.of(collection_id)
    }

    pub fn albums(&self, collection_id: &str) -> Vec<AlbumPtr> {
        self.of(collection_id)
    }

    pub fn genres(&self, collection_id: &str) -> Vec<GenrePtr> {
        self.of(collection_id)
    }

    pub fn composers(&self, collection_id: &str) -> Vec<ComposerPtr> {
        self.of(collection_id)
    }

    pub fn years(&self, collection_id: &str) -> Vec<YearPtr> {
        self.of(collection_id)
    }

    pub fn data(&self, collection_id: &str) -> Vec<DataPtr> {
        self.batches
            .iter()
            .filter(|(id, _)| id == collection_id)
            .flat_map(|(_, result)| result.to_data_ptrs())
            .collect()
    }

    pub fn custom_data(&self, collection_id: &str) -> Vec<String> {
        self.batches
            .iter()
            .filter(|(id, _)| id == collection_id)
            .flat_map(|(_, result)| match result {
                QueryResult::Custom(values) => values.clone(),
                _ => Vec::new(),
            })
            .collect()
    }
}

/// Run `maker` once and gather every batch until it reports done.
pub async fn collect(mut maker: Box<dyn QueryMaker>) -> QueryResults {
    let (observer, mut events) = ChannelObserver::new();
    maker.subscribe(observer);
    maker.run();

    let mut results = QueryResults::default();
    while let Some(event) = events.recv().await {
        match event {
            QueryEvent::NewResult {
                collection_id,
                result,
            } => results.push(collection_id, result),
            QueryEvent::Done => break,
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negated_comparison_is_complement() {
        for cmp in [
            NumberComparison::Equals,
            NumberComparison::GreaterThan,
            NumberComparison::LessThan,
        ] {
            for lhs in [-1.0, 0.0, 5.0, 10.0, 11.0] {
                assert_ne!(cmp.apply(lhs, 10.0, false), cmp.apply(lhs, 10.0, true));
            }
        }
        assert_eq!(NumberComparison::GreaterThan.sql_operator(true), "<=");
        assert_eq!(NumberComparison::Equals.sql_operator(true), "<>");
        assert_eq!(NumberComparison::LessThan.sql_operator(true), ">=");
    }

    #[test]
    fn test_field_value_as_number() {
        assert_eq!(FieldValue::Text("1999".to_string()).as_number(), 1999.0);
        assert_eq!(FieldValue::Text("".to_string()).as_number(), 0.0);
        assert_eq!(FieldValue::Integer(3).as_number(), 3.0);
        assert_eq!(FieldValue::Real(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_numeric_fields() {
        assert!(Field::Year.is_numeric());
        assert!(Field::Score.is_numeric());
        assert!(!Field::Title.is_numeric());
        assert!(!Field::Url.is_numeric());
    }

    #[test]
    fn test_query_results_grouping() {
        let mut results = QueryResults::default();
        results.push("a", QueryResult::Custom(vec!["1".to_string()]));
        results.push("b", QueryResult::Custom(vec!["2".to_string(), "3".to_string()]));
        results.push("a", QueryResult::Custom(vec!["4".to_string()]));

        assert_eq!(results.collection_ids(), vec!["a", "b"]);
        assert_eq!(results.custom_data("a"), vec!["1", "4"]);
        assert_eq!(results.len(), 4);
        assert!(results.all::<TrackPtr>().is_empty());
    }
}
