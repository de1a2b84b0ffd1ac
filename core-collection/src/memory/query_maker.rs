//! Query maker walking the track map of a [`MemoryCollection`].
//!
//! Matches and filters are evaluated per track; entity queries then derive
//! their results from the surviving tracks, keeping the first occurrence of
//! every entity. Ordering is applied to the tracks before that derivation and
//! the limit after it.

use super::collection::MemoryCollection;
use super::filter::{compare_values, matches_data, FilterStack, Group, MemoryFilter};
use crate::collection::MetaStore;
use crate::meta::{DataPtr, TrackPtr};
use crate::query::worker::JobLane;
use crate::query::{
    package, AlbumQueryMode, Field, NumberComparison, QueryKind, QueryMaker, QueryObserver,
    QueryPool, QueryResult, ResultItem, ReturnFunction,
};
use core_runtime::events::CollectionEvent;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
enum ReturnColumn {
    Value(Field),
    Function(ReturnFunction, Field),
}

#[derive(Clone)]
struct Builder {
    kind: QueryKind,
    matches: Vec<DataPtr>,
    filters: FilterStack,
    columns: Vec<ReturnColumn>,
    order: Vec<(Field, bool)>,
    limit: Option<usize>,
    album_mode: AlbumQueryMode,
    as_data_ptrs: bool,
    included: bool,
    restricted: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            kind: QueryKind::None,
            matches: Vec::new(),
            filters: FilterStack::default(),
            columns: Vec::new(),
            order: Vec::new(),
            limit: None,
            album_mode: AlbumQueryMode::AllAlbums,
            as_data_ptrs: false,
            included: true,
            restricted: false,
        }
    }
}

/// Frozen form of a [`Builder`] handed to the worker.
struct Plan {
    kind: QueryKind,
    matches: Vec<DataPtr>,
    filter: MemoryFilter,
    columns: Vec<ReturnColumn>,
    order: Vec<(Field, bool)>,
    limit: Option<usize>,
    album_mode: AlbumQueryMode,
    as_data_ptrs: bool,
}

impl Plan {
    fn accepts(&self, track: &TrackPtr) -> bool {
        let mode_ok = match self.album_mode {
            AlbumQueryMode::AllAlbums => true,
            AlbumQueryMode::OnlyCompilations => track.album().is_compilation(),
            AlbumQueryMode::OnlyNormalAlbums => !track.album().is_compilation(),
        };
        mode_ok
            && self.matches.iter().all(|data| matches_data(data, track))
            && self.filter.matches(track)
    }

    fn sort(&self, tracks: &mut [TrackPtr]) {
        if self.order.is_empty() {
            return;
        }
        tracks.sort_by(|a, b| {
            self.order
                .iter()
                .map(|(field, descending)| {
                    let ordering = compare_values(*field, &a.value(*field), &b.value(*field));
                    if *descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    fn materialize(&self, mut tracks: Vec<TrackPtr>) -> QueryResult {
        self.sort(&mut tracks);
        match self.kind {
            QueryKind::Track => {
                if let Some(limit) = self.limit {
                    tracks.truncate(limit);
                }
                package(tracks, self.as_data_ptrs)
            }
            QueryKind::Artist => self.distinct(&tracks, |t| t.artist()),
            QueryKind::Album => self.distinct(&tracks, |t| t.album()),
            QueryKind::Genre => self.distinct(&tracks, |t| t.genre()),
            QueryKind::Composer => self.distinct(&tracks, |t| t.composer()),
            QueryKind::Year => self.distinct(&tracks, |t| t.year()),
            QueryKind::Custom => QueryResult::Custom(self.custom_rows(&tracks)),
            QueryKind::None => QueryResult::Custom(Vec::new()),
        }
    }

    fn distinct<T>(&self, tracks: &[TrackPtr], relation: impl Fn(&TrackPtr) -> Arc<T>) -> QueryResult
    where
        Arc<T>: ResultItem,
    {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for track in tracks {
            if self.limit.is_some_and(|limit| items.len() >= limit) {
                break;
            }
            let item = relation(track);
            if seen.insert(Arc::as_ptr(&item) as usize) {
                items.push(item);
            }
        }
        package(items, self.as_data_ptrs)
    }

    /// Row-major values: one row per track, or a single aggregate row when
    /// any return function was requested.
    fn custom_rows(&self, tracks: &[TrackPtr]) -> Vec<String> {
        if self.columns.is_empty() {
            return Vec::new();
        }
        let aggregate = self
            .columns
            .iter()
            .any(|c| matches!(c, ReturnColumn::Function(..)));

        if aggregate {
            return self
                .columns
                .iter()
                .map(|column| match column {
                    ReturnColumn::Value(field) => tracks
                        .first()
                        .map(|t| t.value(*field).to_string())
                        .unwrap_or_default(),
                    ReturnColumn::Function(function, field) => aggregate_over(*function, *field, tracks),
                })
                .collect();
        }

        let rows = self.limit.map_or(tracks.len(), |l| l.min(tracks.len()));
        tracks[..rows]
            .iter()
            .flat_map(|track| {
                self.columns.iter().map(move |column| match column {
                    ReturnColumn::Value(field) | ReturnColumn::Function(_, field) => {
                        track.value(*field).to_string()
                    }
                })
            })
            .collect()
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

fn aggregate_over(function: ReturnFunction, field: Field, tracks: &[TrackPtr]) -> String {
    let values: Vec<_> = tracks.iter().map(|t| t.value(field)).collect();
    match function {
        ReturnFunction::Count => values
            .iter()
            .filter(|v| field.is_numeric() || !v.to_string().is_empty())
            .count()
            .to_string(),
        ReturnFunction::Sum => format_number(values.iter().map(|v| v.as_number()).sum()),
        ReturnFunction::Min | ReturnFunction::Max if !field.is_numeric() => {
            let texts = values.iter().map(ToString::to_string);
            let picked = if function == ReturnFunction::Min {
                texts.min()
            } else {
                texts.max()
            };
            picked.unwrap_or_default()
        }
        ReturnFunction::Min => values
            .iter()
            .map(|v| v.as_number())
            .reduce(f64::min)
            .map(format_number)
            .unwrap_or_default(),
        ReturnFunction::Max => values
            .iter()
            .map(|v| v.as_number())
            .reduce(f64::max)
            .map(format_number)
            .unwrap_or_default(),
    }
}

/// Query maker of a [`MemoryCollection`].
pub struct MemoryQueryMaker {
    collection: Weak<MemoryCollection>,
    collection_id: String,
    lane: JobLane,
    observers: Vec<Arc<dyn QueryObserver>>,
    builder: Builder,
}

impl MemoryQueryMaker {
    pub(crate) fn new(
        collection: Weak<MemoryCollection>,
        collection_id: impl Into<String>,
        pool: Arc<QueryPool>,
    ) -> Self {
        Self {
            collection,
            collection_id: collection_id.into(),
            lane: JobLane::new(pool),
            observers: Vec::new(),
            builder: Builder::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn lane(&self) -> &JobLane {
        &self.lane
    }

    fn mutate(&mut self, f: impl FnOnce(&mut Builder)) -> &mut dyn QueryMaker {
        f(&mut self.builder);
        self
    }

    fn start(&mut self, kind: QueryKind) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            if b.kind == QueryKind::None {
                b.kind = kind;
            }
        })
    }

    fn finish_immediately(&self) {
        for observer in &self.observers {
            observer.query_done();
        }
    }
}

impl QueryMaker for MemoryQueryMaker {
    fn collection_id(&self) -> &str {
        &self.collection_id
    }

    fn reset(&mut self) -> &mut dyn QueryMaker {
        self.mutate(|b| *b = Builder::default())
    }

    fn start_track_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Track)
    }

    fn start_artist_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Artist)
    }

    fn start_album_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Album)
    }

    fn start_genre_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Genre)
    }

    fn start_composer_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Composer)
    }

    fn start_year_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Year)
    }

    fn start_custom_query(&mut self) -> &mut dyn QueryMaker {
        self.start(QueryKind::Custom)
    }

    fn add_return_value(&mut self, field: Field) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            if b.kind == QueryKind::Custom {
                b.columns.push(ReturnColumn::Value(field));
            }
        })
    }

    fn add_return_function(
        &mut self,
        function: ReturnFunction,
        field: Field,
    ) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            if b.kind == QueryKind::Custom {
                b.columns.push(ReturnColumn::Function(function, field));
            }
        })
    }

    fn order_by(&mut self, field: Field, descending: bool) -> &mut dyn QueryMaker {
        self.mutate(|b| b.order.push((field, descending)))
    }

    fn add_match(&mut self, data: &DataPtr) -> &mut dyn QueryMaker {
        let data = data.clone();
        self.mutate(|b| b.matches.push(data))
    }

    fn add_filter(
        &mut self,
        field: Field,
        filter: &str,
        match_begin: bool,
        match_end: bool,
    ) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            b.filters
                .push(MemoryFilter::text(field, filter, match_begin, match_end))
        })
    }

    fn exclude_filter(
        &mut self,
        field: Field,
        filter: &str,
        match_begin: bool,
        match_end: bool,
    ) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            b.filters
                .push(MemoryFilter::text(field, filter, match_begin, match_end).negate())
        })
    }

    fn add_number_filter(
        &mut self,
        field: Field,
        value: i64,
        comparison: NumberComparison,
    ) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            b.filters.push(MemoryFilter::Number {
                field,
                value,
                comparison,
            })
        })
    }

    fn exclude_number_filter(
        &mut self,
        field: Field,
        value: i64,
        comparison: NumberComparison,
    ) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            b.filters.push(
                MemoryFilter::Number {
                    field,
                    value,
                    comparison,
                }
                .negate(),
            )
        })
    }

    fn limit_max_result_size(&mut self, size: usize) -> &mut dyn QueryMaker {
        self.mutate(|b| b.limit = Some(size))
    }

    fn set_album_query_mode(&mut self, mode: AlbumQueryMode) -> &mut dyn QueryMaker {
        self.mutate(|b| b.album_mode = mode)
    }

    fn begin_and(&mut self) -> &mut dyn QueryMaker {
        self.mutate(|b| b.filters.begin(Group::And))
    }

    fn begin_or(&mut self) -> &mut dyn QueryMaker {
        self.mutate(|b| b.filters.begin(Group::Or))
    }

    fn end_and_or(&mut self) -> &mut dyn QueryMaker {
        self.mutate(|b| b.filters.end())
    }

    fn include_collection(&mut self, collection_id: &str) -> &mut dyn QueryMaker {
        let own = collection_id == self.collection_id;
        self.mutate(|b| {
            if !b.restricted {
                b.restricted = true;
                b.included = false;
            }
            if own {
                b.included = true;
            }
        })
    }

    fn exclude_collection(&mut self, collection_id: &str) -> &mut dyn QueryMaker {
        let own = collection_id == self.collection_id;
        self.mutate(|b| {
            if own {
                b.included = false;
            }
        })
    }

    fn return_result_as_data_ptrs(&mut self, as_data_ptrs: bool) -> &mut dyn QueryMaker {
        self.mutate(|b| b.as_data_ptrs = as_data_ptrs)
    }

    fn subscribe(&mut self, observer: Arc<dyn QueryObserver>) -> &mut dyn QueryMaker {
        self.observers.push(observer);
        self
    }

    fn run(&mut self) {
        if !self.builder.included {
            debug!(collection = %self.collection_id, "Collection excluded from query");
            self.finish_immediately();
            return;
        }
        if self.builder.kind == QueryKind::None {
            debug!(collection = %self.collection_id, "Query run without a query kind");
            self.finish_immediately();
            return;
        }

        let b = &self.builder;
        let job = MemoryJob {
            collection: self.collection.clone(),
            collection_id: self.collection_id.clone(),
            plan: Plan {
                kind: b.kind,
                matches: b.matches.clone(),
                filter: b.filters.build(),
                columns: b.columns.clone(),
                order: b.order.clone(),
                limit: b.limit,
                album_mode: b.album_mode,
                as_data_ptrs: b.as_data_ptrs,
            },
            observers: self.observers.clone(),
        };
        self.lane.submit(move |token| job.execute(token));
    }

    fn abort_query(&mut self) {
        self.lane.abort();
    }

    fn is_running(&self) -> bool {
        self.lane.is_running()
    }

    fn query_kind(&self) -> QueryKind {
        self.builder.kind
    }
}

struct MemoryJob {
    collection: Weak<MemoryCollection>,
    collection_id: String,
    plan: Plan,
    observers: Vec<Arc<dyn QueryObserver>>,
}

impl MemoryJob {
    async fn execute(self, token: CancellationToken) {
        let collection = self.collection.upgrade();
        let mut aborted = token.is_cancelled();
        let mut result_count = 0;

        if let (false, Some(collection)) = (aborted, collection.as_ref()) {
            let matched = collection.select_tracks(|track| self.plan.accepts(track));
            if token.is_cancelled() {
                aborted = true;
            } else {
                let result = self.plan.materialize(matched);
                result_count = result.len();
                for observer in &self.observers {
                    observer.new_result_ready(&self.collection_id, &result);
                }
            }
        }

        for observer in &self.observers {
            observer.query_done();
        }
        if let Some(collection) = collection {
            collection.publish(CollectionEvent::QueryFinished {
                collection_id: self.collection_id.clone(),
                result_count,
                aborted,
            });
        }
    }
}
