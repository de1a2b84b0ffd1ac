//! Collection backed by the relational schema in `migrations/`.

use super::query_maker::SqlQueryMaker;
use super::schema::{from_clause, tag_table, TRACK_COLUMNS, TRACK_TABLES};
use crate::adapters::SqliteAdapter;
use crate::collection::{Collection, MetaStore};
use crate::context::CollectionContext;
use crate::db::{self, DatabaseConfig};
use crate::error::{CollectionError, Result};
use crate::meta::{AlbumPtr, EntityKind, TrackPtr, TrackRecord, TrackRelations};
use crate::query::QueryMaker;
use crate::registry::Registry;
use async_trait::async_trait;
use chrono::Utc;
use core_runtime::config::CollectionConfig;
use core_runtime::events::{CollectionEvent, EventBus};
use core_runtime::logging::strip_path;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use store_traits::{DatabaseAdapter, QueryValue};
use tracing::{debug, info, instrument};

pub struct SqlCollection {
    collection_id: String,
    pretty_name: String,
    writable: bool,
    cover_dir: Option<PathBuf>,
    adapter: Arc<dyn DatabaseAdapter>,
    registry: Registry,
    context: CollectionContext,
    this: Weak<SqlCollection>,
}

impl SqlCollection {
    /// Open (and migrate) the database named by `config`.
    #[instrument(skip(config, context), fields(collection = %config.collection_id))]
    pub async fn open(config: &CollectionConfig, context: CollectionContext) -> Result<Arc<Self>> {
        config.validate()?;
        let pool = db::create_pool(DatabaseConfig::from_collection_config(config)).await?;
        let collection = Self::with_adapter(config, context, Arc::new(SqliteAdapter::from_pool(pool)));

        let tracks = collection.track_count().await?;
        info!(tracks, "Collection opened");
        Ok(collection)
    }

    /// Build a collection on top of an existing adapter.
    pub fn with_adapter(
        config: &CollectionConfig,
        context: CollectionContext,
        adapter: Arc<dyn DatabaseAdapter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<SqlCollection>| {
            let store: Weak<dyn MetaStore> = this.clone();
            Self {
                collection_id: config.collection_id.clone(),
                pretty_name: config.pretty_name.clone(),
                writable: config.writable,
                cover_dir: config.cover_dir.clone(),
                adapter,
                registry: Registry::new(store),
                context,
                this: this.clone(),
            }
        })
    }

    pub fn adapter(&self) -> &Arc<dyn DatabaseAdapter> {
        &self.adapter
    }

    pub fn context(&self) -> &CollectionContext {
        &self.context
    }

    /// Run a raw SELECT, returning the flat field list.
    pub async fn query(&self, sql: &str, binds: &[QueryValue]) -> Result<Vec<String>> {
        Ok(self.adapter.select(sql, binds).await?)
    }

    /// Run a raw INSERT, returning the new row id.
    pub async fn insert(&self, sql: &str, binds: &[QueryValue]) -> Result<i64> {
        Ok(self.adapter.insert(sql, binds).await?)
    }

    /// Quote `text` for splicing into a string literal.
    pub fn escape(text: &str) -> String {
        text.replace('\'', "''")
    }

    pub async fn track_count(&self) -> Result<i64> {
        let fields = self.query("SELECT COUNT(*) FROM tracks", &[]).await?;
        Ok(fields
            .first()
            .and_then(|f| f.parse().ok())
            .unwrap_or(0))
    }

    pub async fn is_file_in_collection(&self, url: &str) -> Result<bool> {
        let fields = self
            .query(
                "SELECT urls.id FROM urls JOIN tracks ON tracks.url = urls.id WHERE urls.rpath = ? LIMIT 1",
                &[QueryValue::from(url)],
            )
            .await?;
        Ok(!fields.is_empty())
    }

    /// Store a scanned track and return its entity.
    #[instrument(skip(self, record), fields(url = %strip_path(&record.url)))]
    pub async fn insert_track(&self, record: &TrackRecord) -> Result<TrackPtr> {
        if record.url.is_empty() {
            return Err(CollectionError::InvalidInput {
                field: "url".to_string(),
                message: "Track location cannot be empty".to_string(),
            });
        }

        let artist = self.resolve_id(EntityKind::Artist, &record.artist).await?;
        let (album, album_artist) = if record.album.is_empty() {
            (0, 0)
        } else {
            let album_artist = if record.compilation { 0 } else { artist };
            self.resolve_album(&record.album, album_artist).await?
        };
        let genre = self.resolve_id(EntityKind::Genre, &record.genre).await?;
        let composer = self.resolve_id(EntityKind::Composer, &record.composer).await?;
        let year = self.resolve_id(EntityKind::Year, &record.year).await?;

        self.adapter
            .execute(
                "INSERT OR IGNORE INTO urls (deviceid, rpath) VALUES (?, ?)",
                &[QueryValue::Integer(record.device_id), QueryValue::from(record.url.as_str())],
            )
            .await?;
        let url_id = self.url_id(record.device_id, &record.url).await?;
        let now = Utc::now().timestamp();

        let statements = vec![
            (
                r#"
                INSERT INTO tracks (
                    url, artist, album, genre, composer, year, title, comment,
                    tracknumber, discnumber, bitrate, length, samplerate, filesize,
                    filetype, bpm, createdate, modifydate
                ) VALUES (
                    ?, NULLIF(?, 0), NULLIF(?, 0), NULLIF(?, 0), NULLIF(?, 0), NULLIF(?, 0),
                    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
                )
                ON CONFLICT(url) DO UPDATE SET
                    artist = excluded.artist, album = excluded.album,
                    genre = excluded.genre, composer = excluded.composer,
                    year = excluded.year, title = excluded.title,
                    comment = excluded.comment, tracknumber = excluded.tracknumber,
                    discnumber = excluded.discnumber, bitrate = excluded.bitrate,
                    length = excluded.length, samplerate = excluded.samplerate,
                    filesize = excluded.filesize, filetype = excluded.filetype,
                    bpm = excluded.bpm, modifydate = excluded.modifydate
                "#
                .to_string(),
                vec![
                    QueryValue::Integer(url_id),
                    QueryValue::Integer(artist),
                    QueryValue::Integer(album),
                    QueryValue::Integer(genre),
                    QueryValue::Integer(composer),
                    QueryValue::Integer(year),
                    QueryValue::from(record.title.as_str()),
                    QueryValue::from(record.comment.as_str()),
                    QueryValue::from(record.track_number),
                    QueryValue::from(record.disc_number),
                    QueryValue::from(record.bitrate),
                    QueryValue::Integer(record.length),
                    QueryValue::from(record.sample_rate),
                    QueryValue::Integer(record.filesize),
                    QueryValue::from(record.file_type),
                    QueryValue::Real(record.bpm),
                    QueryValue::Integer(now),
                    QueryValue::Integer(now),
                ],
            ),
            (
                r#"
                INSERT INTO statistics (url, createdate, accessdate, score, rating, playcount)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    createdate = excluded.createdate, accessdate = excluded.accessdate,
                    score = excluded.score, rating = excluded.rating,
                    playcount = excluded.playcount
                "#
                .to_string(),
                vec![
                    QueryValue::Integer(url_id),
                    QueryValue::Integer(record.first_played),
                    QueryValue::Integer(record.last_played),
                    QueryValue::Real(record.score),
                    QueryValue::from(record.rating),
                    QueryValue::from(record.play_count),
                ],
            ),
        ];
        self.adapter.execute_batch(statements).await?;
        debug!(url_id, "Track stored");
        self.publish(CollectionEvent::CollectionUpdated {
            collection_id: self.collection_id.clone(),
        });

        if let Some(live) = self.registry.track(record.device_id, &record.url) {
            let relations = TrackRelations {
                artist: self.registry.artist(&record.artist, artist),
                album: self.registry.album(&record.album, album, album_artist),
                genre: self.registry.genre(&record.genre, genre),
                composer: self.registry.composer(&record.composer, composer),
                year: self.registry.year(&record.year, year),
            };
            live.replace(record.fields(), relations);
            return Ok(live);
        }

        self.load_track(record.device_id, &record.url)
            .await?
            .ok_or_else(|| CollectionError::NotFound {
                entity_type: "track".to_string(),
                id: record.url.clone(),
            })
    }

    async fn url_id(&self, device_id: i64, url: &str) -> Result<i64> {
        let row = self
            .adapter
            .query_one_optional(
                "SELECT id FROM urls WHERE deviceid = ? AND rpath = ?",
                &[QueryValue::Integer(device_id), QueryValue::from(url)],
            )
            .await?;
        row.and_then(|r| r.get("id").and_then(QueryValue::as_i64))
            .ok_or_else(|| CollectionError::NotFound {
                entity_type: "url".to_string(),
                id: url.to_string(),
            })
    }

    /// Track row for `url` on `device_id`, through the registry.
    async fn load_track(&self, device_id: i64, url: &str) -> Result<Option<TrackPtr>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE urls.deviceid = ? AND urls.rpath = ? LIMIT 1",
            TRACK_COLUMNS.join(", "),
            from_clause(TRACK_TABLES),
        );
        let fields = self
            .query(&sql, &[QueryValue::Integer(device_id), QueryValue::from(url)])
            .await?;
        Ok(self.registry.track_from_row(&fields))
    }

    fn table(kind: EntityKind) -> Result<&'static str> {
        match kind {
            EntityKind::Artist | EntityKind::Genre | EntityKind::Composer | EntityKind::Year => {
                tag_table(kind).ok_or_else(|| invalid_kind(kind))
            }
            EntityKind::Album | EntityKind::Track => Err(invalid_kind(kind)),
        }
    }
}

fn invalid_kind(kind: EntityKind) -> CollectionError {
    CollectionError::InvalidInput {
        field: "kind".to_string(),
        message: format!("{kind} has no name table"),
    }
}

fn not_found(kind: EntityKind, id: impl ToString) -> CollectionError {
    CollectionError::NotFound {
        entity_type: kind.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl Collection for SqlCollection {
    fn collection_id(&self) -> &str {
        &self.collection_id
    }

    fn pretty_name(&self) -> &str {
        &self.pretty_name
    }

    fn query_maker(&self) -> Box<dyn QueryMaker> {
        Box::new(SqlQueryMaker::new(
            self.this.clone(),
            self.collection_id.clone(),
            self.context.pool.clone(),
        ))
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn possibly_contains_track(&self, url: &str) -> bool {
        !url.is_empty() && (!url.contains("://") || url.starts_with("file://"))
    }

    async fn track_for_url(&self, url: &str) -> Option<TrackPtr> {
        let sql = format!(
            "SELECT {} FROM {} WHERE urls.rpath = ? LIMIT 1",
            TRACK_COLUMNS.join(", "),
            from_clause(TRACK_TABLES),
        );
        match self.query(&sql, &[QueryValue::from(url)]).await {
            Ok(fields) => self.registry.track_from_row(&fields),
            Err(e) => {
                debug!(url = %strip_path(url), error = %e, "Track lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl MetaStore for SqlCollection {
    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn events(&self) -> &EventBus {
        &self.context.events
    }

    fn cover_dir(&self) -> Option<&Path> {
        self.cover_dir.as_deref()
    }

    async fn resolve_id(&self, kind: EntityKind, name: &str) -> Result<i64> {
        if name.is_empty() {
            return Ok(0);
        }
        let table = Self::table(kind)?;
        self.adapter
            .execute(
                &format!("INSERT OR IGNORE INTO {table} (name) VALUES (?)"),
                &[QueryValue::from(name)],
            )
            .await?;
        let row = self
            .adapter
            .query_one_optional(
                &format!("SELECT id FROM {table} WHERE name = ?"),
                &[QueryValue::from(name)],
            )
            .await?;
        row.and_then(|r| r.get("id").and_then(QueryValue::as_i64))
            .ok_or_else(|| not_found(kind, name))
    }

    async fn resolve_album(&self, name: &str, artist_id: i64) -> Result<(i64, i64)> {
        let row = self
            .adapter
            .query_one_optional(
                r#"
                SELECT id, artist FROM albums
                WHERE name = ? AND (artist = ? OR artist IS NULL)
                ORDER BY artist IS NULL
                LIMIT 1
                "#,
                &[QueryValue::from(name), QueryValue::Integer(artist_id)],
            )
            .await?;
        if let Some(row) = row {
            let id = row.get("id").and_then(QueryValue::as_i64);
            let artist = row.get("artist").and_then(QueryValue::as_i64).unwrap_or(0);
            if let Some(id) = id {
                return Ok((id, artist));
            }
        }

        let id = self
            .adapter
            .insert(
                "INSERT INTO albums (name, artist) VALUES (?, NULLIF(?, 0))",
                &[QueryValue::from(name), QueryValue::Integer(artist_id)],
            )
            .await?;
        Ok((id, artist_id.max(0)))
    }

    async fn entity_name(&self, kind: EntityKind, id: i64) -> Result<String> {
        let table = tag_table(kind).ok_or_else(|| invalid_kind(kind))?;
        let row = self
            .adapter
            .query_one_optional(
                &format!("SELECT name FROM {table} WHERE id = ?"),
                &[QueryValue::Integer(id)],
            )
            .await?;
        row.and_then(|r| r.get("name").and_then(|v| v.as_str().map(str::to_string)))
            .ok_or_else(|| not_found(kind, id))
    }

    #[instrument(skip(self, track), fields(url = %strip_path(track.url())))]
    async fn write_track(&self, track: &TrackPtr) -> Result<()> {
        let fields = track.fields();
        let relations = track.relations();
        let affected = self
            .adapter
            .execute(
                r#"
                UPDATE tracks SET
                    title = ?, comment = ?, tracknumber = ?, discnumber = ?,
                    artist = NULLIF(?, 0), album = NULLIF(?, 0), genre = NULLIF(?, 0),
                    composer = NULLIF(?, 0), year = NULLIF(?, 0), modifydate = ?
                WHERE url = (SELECT id FROM urls WHERE deviceid = ? AND rpath = ?)
                "#,
                &[
                    QueryValue::from(fields.title.as_str()),
                    QueryValue::from(fields.comment.as_str()),
                    QueryValue::from(fields.track_number),
                    QueryValue::from(fields.disc_number),
                    QueryValue::Integer(relations.artist.id()),
                    QueryValue::Integer(relations.album.id()),
                    QueryValue::Integer(relations.genre.id()),
                    QueryValue::Integer(relations.composer.id()),
                    QueryValue::Integer(relations.year.id()),
                    QueryValue::Integer(Utc::now().timestamp()),
                    QueryValue::Integer(track.device_id()),
                    QueryValue::from(track.url()),
                ],
            )
            .await?;
        if affected == 0 {
            return Err(not_found(EntityKind::Track, track.url()));
        }
        Ok(())
    }

    #[instrument(skip(self, track), fields(url = %strip_path(track.url())))]
    async fn write_statistics(&self, track: &TrackPtr) -> Result<()> {
        let fields = track.fields();
        let affected = self
            .adapter
            .execute(
                r#"
                INSERT INTO statistics (url, createdate, accessdate, score, rating, playcount)
                SELECT id, ?, ?, ?, ?, ? FROM urls WHERE deviceid = ? AND rpath = ?
                ON CONFLICT(url) DO UPDATE SET
                    createdate = excluded.createdate, accessdate = excluded.accessdate,
                    score = excluded.score, rating = excluded.rating,
                    playcount = excluded.playcount
                "#,
                &[
                    QueryValue::Integer(fields.first_played),
                    QueryValue::Integer(fields.last_played),
                    QueryValue::Real(fields.score),
                    QueryValue::from(fields.rating),
                    QueryValue::from(fields.play_count),
                    QueryValue::Integer(track.device_id()),
                    QueryValue::from(track.url()),
                ],
            )
            .await?;
        if affected == 0 {
            return Err(not_found(EntityKind::Track, track.url()));
        }
        Ok(())
    }

    async fn write_album_artist(&self, album: &AlbumPtr, artist_id: i64) -> Result<()> {
        let affected = self
            .adapter
            .execute(
                "UPDATE albums SET artist = NULLIF(?, 0) WHERE id = ?",
                &[QueryValue::Integer(artist_id), QueryValue::Integer(album.id())],
            )
            .await?;
        if affected == 0 {
            return Err(not_found(EntityKind::Album, album.id()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::collect;

    async fn open() -> Arc<SqlCollection> {
        let config = CollectionConfig::builder()
            .collection_id("localCollection")
            .pretty_name("Local Collection")
            .build()
            .unwrap();
        let context = CollectionContext::from_config(&config).unwrap();
        SqlCollection::open(&config, context).await.unwrap()
    }

    #[test]
    fn test_escape_doubles_quotes() {
        assert_eq!(SqlCollection::escape("Guns N' Roses"), "Guns N'' Roses");
        assert_eq!(SqlCollection::escape("plain"), "plain");
    }

    #[tokio::test]
    async fn test_open_empty_collection() {
        let collection = open().await;
        assert_eq!(collection.track_count().await.unwrap(), 0);
        assert_eq!(collection.collection_id(), "localCollection");
        assert!(collection.possibly_contains_track("/music/a.mp3"));
        assert!(!collection.possibly_contains_track("http://radio/stream"));
        assert!(collection.track_for_url("/music/a.mp3").await.is_none());
    }

    #[tokio::test]
    async fn test_insert_track_and_look_it_up() {
        let collection = open().await;
        let track = collection
            .insert_track(
                &TrackRecord::new("/music/fire.mp3")
                    .title("Fire")
                    .artist("Elements")
                    .album("Four")
                    .genre("Rock")
                    .year("1999")
                    .track_number(2)
                    .score(75.0),
            )
            .await
            .unwrap();

        assert_eq!(track.title(), "Fire");
        assert_eq!(track.artist().name(), "Elements");
        assert_eq!(track.album().album_artist_id(), track.artist().id());
        assert_eq!(track.composer().id(), 0);
        assert_eq!(track.score(), 75.0);
        assert_eq!(track.track_number(), 2);

        assert!(collection.is_file_in_collection("/music/fire.mp3").await.unwrap());
        assert_eq!(collection.track_count().await.unwrap(), 1);
        let again = collection.track_for_url("/music/fire.mp3").await.unwrap();
        assert!(Arc::ptr_eq(&track, &again));
    }

    #[tokio::test]
    async fn test_resolve_ids_are_stable() {
        let collection = open().await;
        let a = collection.resolve_id(EntityKind::Genre, "Jazz").await.unwrap();
        let b = collection.resolve_id(EntityKind::Genre, "Jazz").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(collection.resolve_id(EntityKind::Genre, "").await.unwrap(), 0);
        assert_eq!(collection.entity_name(EntityKind::Genre, a).await.unwrap(), "Jazz");
        assert!(matches!(
            collection.entity_name(EntityKind::Genre, 999).await,
            Err(CollectionError::NotFound { .. })
        ));
        assert!(collection.resolve_id(EntityKind::Track, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_album_prefers_own_artist_then_compilation() {
        let collection = open().await;
        let a = collection.resolve_id(EntityKind::Artist, "A").await.unwrap();
        let b = collection.resolve_id(EntityKind::Artist, "B").await.unwrap();

        let (own, artist) = collection.resolve_album("Hits", a).await.unwrap();
        assert_eq!(artist, a);
        assert_eq!(collection.resolve_album("Hits", a).await.unwrap(), (own, a));
        let (other, _) = collection.resolve_album("Hits", b).await.unwrap();
        assert_ne!(own, other);

        let (compilation, none) = collection.resolve_album("Mixtape", 0).await.unwrap();
        assert_eq!(none, 0);
        assert_eq!(
            collection.resolve_album("Mixtape", b).await.unwrap(),
            (compilation, 0)
        );
    }

    #[tokio::test]
    async fn test_reinsert_refreshes_live_track() {
        let collection = open().await;
        let first = collection
            .insert_track(&TrackRecord::new("/a.mp3").title("Old").artist("X"))
            .await
            .unwrap();
        let second = collection
            .insert_track(&TrackRecord::new("/a.mp3").title("New").artist("Y"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.title(), "New");
        assert_eq!(first.artist().name(), "Y");
        assert_eq!(collection.track_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_raw_query_passthrough() {
        let collection = open().await;
        let id = collection
            .insert("INSERT INTO genres (name) VALUES (?)", &[QueryValue::from("Blues")])
            .await
            .unwrap();
        let fields = collection
            .query("SELECT name FROM genres WHERE id = ?", &[QueryValue::Integer(id)])
            .await
            .unwrap();
        assert_eq!(fields, vec!["Blues"]);
    }

    #[tokio::test]
    async fn test_query_maker_reaches_rows() {
        let collection = open().await;
        collection
            .insert_track(&TrackRecord::new("/a.mp3").title("A").artist("X"))
            .await
            .unwrap();
        let mut qm = collection.query_maker();
        qm.start_artist_query();
        let artists = collect(qm).await.artists("localCollection");
        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].name(), "X");
    }
}
