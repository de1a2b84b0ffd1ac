//! Query maker translating builder calls into one SELECT statement.

use super::collection::SqlCollection;
use super::schema::{self, column_for, from_clause, kind_columns, kind_width, LinkedTables};
use crate::collection::MetaStore;
use crate::meta::DataPtr;
use crate::query::worker::JobLane;
use crate::query::{
    package, AlbumQueryMode, Field, NumberComparison, QueryKind, QueryMaker, QueryObserver,
    QueryPool, QueryResult, ReturnFunction,
};
use crate::registry::{parse_int, Registry};
use core_runtime::events::CollectionEvent;
use std::sync::{Arc, Weak};
use store_traits::QueryValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const ESCAPE_CHAR: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    And,
    Or,
}

impl Group {
    fn connector(self) -> &'static str {
        match self {
            Group::And => "AND",
            Group::Or => "OR",
        }
    }
}

#[derive(Debug, Clone)]
struct Builder {
    kind: QueryKind,
    linked: LinkedTables,
    return_values: Vec<String>,
    matches: String,
    match_binds: Vec<QueryValue>,
    filters: String,
    filter_binds: Vec<QueryValue>,
    groups: Vec<Group>,
    order: Vec<String>,
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
            linked: LinkedTables::TRACKS,
            return_values: Vec::new(),
            matches: String::new(),
            match_binds: Vec::new(),
            filters: String::new(),
            filter_binds: Vec::new(),
            groups: vec![Group::And],
            order: Vec::new(),
            limit: None,
            album_mode: AlbumQueryMode::AllAlbums,
            as_data_ptrs: false,
            included: true,
            restricted: false,
        }
    }
}

impl Builder {
    fn connector(&self) -> &'static str {
        self.groups.last().copied().unwrap_or(Group::And).connector()
    }

    fn column(&mut self, field: Field) -> &'static str {
        let column = column_for(field);
        self.linked.link(column.table);
        column.expr
    }

    fn push_filter(&mut self, condition: &str, bind: QueryValue) {
        let connector = self.connector();
        self.filters.push_str(&format!(" {connector} {condition}"));
        self.filter_binds.push(bind);
    }

    fn text_filter(&mut self, field: Field, text: &str, begin: bool, end: bool, negate: bool) {
        let expr = self.column(field);
        let not = if negate { "NOT " } else { "" };
        let condition = format!("IFNULL({expr}, '') {not}LIKE ? ESCAPE '{ESCAPE_CHAR}'");
        self.push_filter(&condition, QueryValue::Text(like_pattern(text, begin, end)));
    }

    fn number_filter(&mut self, field: Field, value: i64, cmp: NumberComparison, negate: bool) {
        let expr = self.column(field);
        let op = cmp.sql_operator(negate);
        let condition = format!("COALESCE(CAST({expr} AS REAL), 0) {op} ?");
        self.push_filter(&condition, QueryValue::Integer(value));
    }

    fn push_match(&mut self, condition: &str, binds: impl IntoIterator<Item = QueryValue>) {
        self.matches.push_str(&format!(" AND {condition}"));
        self.match_binds.extend(binds);
    }

    fn add_match(&mut self, data: &DataPtr) {
        match data {
            DataPtr::Track(track) => {
                self.linked.link(LinkedTables::URLS);
                self.push_match(
                    "urls.deviceid = ? AND urls.rpath = ?",
                    [
                        QueryValue::Integer(track.device_id()),
                        QueryValue::from(track.url()),
                    ],
                );
            }
            DataPtr::Artist(artist) => {
                self.linked.link(LinkedTables::ARTISTS);
                self.push_match(
                    "IFNULL(artists.name, '') = ?",
                    [QueryValue::from(artist.name())],
                );
            }
            DataPtr::Album(album) => {
                self.linked.link(LinkedTables::ALBUMS);
                self.push_match(
                    "IFNULL(albums.name, '') = ?",
                    [QueryValue::from(album.name())],
                );
                if album.is_compilation() {
                    self.push_match("albums.artist IS NULL", []);
                } else if let Some(artist) = album.cached_album_artist() {
                    self.linked.link(LinkedTables::ALBUM_ARTISTS);
                    self.push_match("albumartists.name = ?", [QueryValue::from(artist.name())]);
                } else {
                    self.push_match(
                        "albums.artist = ?",
                        [QueryValue::Integer(album.album_artist_id())],
                    );
                }
            }
            DataPtr::Genre(genre) => {
                self.linked.link(LinkedTables::GENRES);
                self.push_match("IFNULL(genres.name, '') = ?", [QueryValue::from(genre.name())]);
            }
            DataPtr::Composer(composer) => {
                self.linked.link(LinkedTables::COMPOSERS);
                self.push_match(
                    "IFNULL(composers.name, '') = ?",
                    [QueryValue::from(composer.name())],
                );
            }
            DataPtr::Year(year) => {
                self.linked.link(LinkedTables::YEARS);
                self.push_match("IFNULL(years.name, '') = ?", [QueryValue::from(year.name())]);
            }
        }
    }

    /// Statement and binds, `None` when there is nothing to select.
    fn build(&self) -> Option<(String, Vec<QueryValue>)> {
        let mut linked = self.linked;
        let (columns, distinct) = match kind_columns(self.kind) {
            Some((columns, tables)) => {
                linked.link(tables);
                (columns, self.kind != QueryKind::Track)
            }
            None if self.kind == QueryKind::Custom && !self.return_values.is_empty() => {
                (self.return_values.join(", "), false)
            }
            None => return None,
        };

        let album_mode = match self.album_mode {
            AlbumQueryMode::AllAlbums => "",
            AlbumQueryMode::OnlyCompilations => {
                linked.link(LinkedTables::ALBUMS);
                " AND albums.artist IS NULL"
            }
            AlbumQueryMode::OnlyNormalAlbums => {
                linked.link(LinkedTables::ALBUMS);
                " AND albums.artist IS NOT NULL"
            }
        };

        let mut filters = self.filters.clone();
        for _ in 1..self.groups.len() {
            filters.push_str(" )");
        }

        let mut sql = format!(
            "SELECT {}{} FROM {} WHERE 1{}{} AND ( 1{} )",
            if distinct { "DISTINCT " } else { "" },
            columns,
            from_clause(linked),
            album_mode,
            self.matches,
            filters,
        );
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit} OFFSET 0"));
        }

        let binds = self
            .match_binds
            .iter()
            .chain(self.filter_binds.iter())
            .cloned()
            .collect();
        Some((sql, binds))
    }
}

/// Escape LIKE wildcards and the escape character itself, then add the
/// requested wildcards.
pub(crate) fn like_pattern(text: &str, match_begin: bool, match_end: bool) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    if match_begin {
        pattern.push('%');
    }
    for c in text.chars() {
        if c == ESCAPE_CHAR || c == '%' || c == '_' {
            pattern.push(ESCAPE_CHAR);
        }
        pattern.push(c);
    }
    if match_end {
        pattern.push('%');
    }
    pattern
}

/// Query maker of a [`SqlCollection`].
pub struct SqlQueryMaker {
    collection: Weak<SqlCollection>,
    collection_id: String,
    lane: JobLane,
    observers: Vec<Arc<dyn QueryObserver>>,
    builder: Builder,
    statement: Option<(String, Vec<QueryValue>)>,
}

impl SqlQueryMaker {
    pub(crate) fn new(
        collection: Weak<SqlCollection>,
        collection_id: impl Into<String>,
        pool: Arc<QueryPool>,
    ) -> Self {
        Self {
            collection,
            collection_id: collection_id.into(),
            lane: JobLane::new(pool),
            observers: Vec::new(),
            builder: Builder::default(),
            statement: None,
        }
    }

    /// The statement `run` would execute, built once and cached until the
    /// next builder call.
    pub fn query(&mut self) -> Option<String> {
        self.statement().map(|(sql, _)| sql)
    }

    fn statement(&mut self) -> Option<(String, Vec<QueryValue>)> {
        if self.statement.is_none() {
            self.statement = self.builder.build();
        }
        self.statement.clone()
    }

    fn mutate(&mut self, f: impl FnOnce(&mut Builder)) -> &mut dyn QueryMaker {
        f(&mut self.builder);
        self.statement = None;
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

impl QueryMaker for SqlQueryMaker {
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
                let expr = b.column(field);
                b.return_values.push(expr.to_string());
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
                let expr = b.column(field);
                b.return_values
                    .push(format!("{}({})", function.sql_name(), expr));
            }
        })
    }

    fn order_by(&mut self, field: Field, descending: bool) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            b.column(field);
            let expr = schema::order_expr(field);
            let direction = if descending { " DESC" } else { "" };
            b.order.push(format!("{expr}{direction}"));
        })
    }

    fn add_match(&mut self, data: &DataPtr) -> &mut dyn QueryMaker {
        self.mutate(|b| b.add_match(data))
    }

    fn add_filter(
        &mut self,
        field: Field,
        filter: &str,
        match_begin: bool,
        match_end: bool,
    ) -> &mut dyn QueryMaker {
        self.mutate(|b| b.text_filter(field, filter, match_begin, match_end, false))
    }

    fn exclude_filter(
        &mut self,
        field: Field,
        filter: &str,
        match_begin: bool,
        match_end: bool,
    ) -> &mut dyn QueryMaker {
        self.mutate(|b| b.text_filter(field, filter, match_begin, match_end, true))
    }

    fn add_number_filter(
        &mut self,
        field: Field,
        value: i64,
        comparison: NumberComparison,
    ) -> &mut dyn QueryMaker {
        self.mutate(|b| b.number_filter(field, value, comparison, false))
    }

    fn exclude_number_filter(
        &mut self,
        field: Field,
        value: i64,
        comparison: NumberComparison,
    ) -> &mut dyn QueryMaker {
        self.mutate(|b| b.number_filter(field, value, comparison, true))
    }

    fn limit_max_result_size(&mut self, size: usize) -> &mut dyn QueryMaker {
        self.mutate(|b| b.limit = Some(size))
    }

    fn set_album_query_mode(&mut self, mode: AlbumQueryMode) -> &mut dyn QueryMaker {
        self.mutate(|b| b.album_mode = mode)
    }

    fn begin_and(&mut self) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            let connector = b.connector();
            b.filters.push_str(&format!(" {connector} ( 1"));
            b.groups.push(Group::And);
        })
    }

    fn begin_or(&mut self) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            let connector = b.connector();
            b.filters.push_str(&format!(" {connector} ( 0"));
            b.groups.push(Group::Or);
        })
    }

    fn end_and_or(&mut self) -> &mut dyn QueryMaker {
        self.mutate(|b| {
            if b.groups.len() > 1 {
                b.filters.push_str(" )");
                b.groups.pop();
            }
        })
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

        let job = SqlJob {
            collection: self.collection.clone(),
            collection_id: self.collection_id.clone(),
            statement: self.statement(),
            kind: self.builder.kind,
            as_data_ptrs: self.builder.as_data_ptrs,
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

struct SqlJob {
    collection: Weak<SqlCollection>,
    collection_id: String,
    statement: Option<(String, Vec<QueryValue>)>,
    kind: QueryKind,
    as_data_ptrs: bool,
    observers: Vec<Arc<dyn QueryObserver>>,
}

impl SqlJob {
    async fn execute(self, token: CancellationToken) {
        let collection = self.collection.upgrade();
        let mut aborted = token.is_cancelled();
        let mut result_count = 0;

        if let (false, Some(collection)) = (aborted, collection.as_ref()) {
            let fields = match &self.statement {
                Some((sql, binds)) => {
                    debug!(collection = %self.collection_id, %sql, "Running query");
                    tokio::select! {
                        rows = collection.adapter().select(sql, binds) => Some(rows),
                        _ = token.cancelled() => None,
                    }
                }
                None => Some(Ok(Vec::new())),
            };

            match fields {
                None => aborted = true,
                Some(_) if token.is_cancelled() => aborted = true,
                Some(fields) => {
                    let fields = fields.unwrap_or_else(|e| {
                        warn!(collection = %self.collection_id, error = %e, "Query failed");
                        Vec::new()
                    });
                    let result = decode(
                        collection.registry(),
                        self.kind,
                        &fields,
                        self.as_data_ptrs,
                    );
                    result_count = result.len();
                    for observer in &self.observers {
                        observer.new_result_ready(&self.collection_id, &result);
                    }
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

/// Turn the flat field list of a statement into entities of `kind`.
pub(crate) fn decode(
    registry: &Registry,
    kind: QueryKind,
    fields: &[String],
    as_data_ptrs: bool,
) -> QueryResult {
    let width = kind_width(kind);
    match kind {
        QueryKind::Track => package(
            fields
                .chunks_exact(width)
                .filter_map(|row| registry.track_from_row(row))
                .collect(),
            as_data_ptrs,
        ),
        QueryKind::Artist => package(
            fields
                .chunks_exact(width)
                .map(|row| registry.artist(&row[0], parse_int(&row[1])))
                .collect(),
            as_data_ptrs,
        ),
        QueryKind::Album => package(
            fields
                .chunks_exact(width)
                .map(|row| registry.album(&row[0], parse_int(&row[1]), parse_int(&row[2])))
                .collect(),
            as_data_ptrs,
        ),
        QueryKind::Genre => package(
            fields
                .chunks_exact(width)
                .map(|row| registry.genre(&row[0], parse_int(&row[1])))
                .collect(),
            as_data_ptrs,
        ),
        QueryKind::Composer => package(
            fields
                .chunks_exact(width)
                .map(|row| registry.composer(&row[0], parse_int(&row[1])))
                .collect(),
            as_data_ptrs,
        ),
        QueryKind::Year => package(
            fields
                .chunks_exact(width)
                .map(|row| registry.year(&row[0], parse_int(&row[1])))
                .collect(),
            as_data_ptrs,
        ),
        QueryKind::Custom | QueryKind::None => QueryResult::Custom(fields.to_vec()),
    }
}
