use super::{AlbumPtr, ArtistPtr, ComposerPtr, GenrePtr, Observer, ObserverSet, TrackPtr, YearPtr};
use crate::collection::MetaStore;
use crate::error::{CollectionError, Result};
use crate::query::{Field, FieldValue};
use chrono::{DateTime, TimeZone, Utc};
use core_runtime::events::CollectionEvent;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, instrument, warn};

/// Descriptive metadata and play statistics of a track.
///
/// Timestamps are unix seconds, `0` meaning never.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackFields {
    pub title: String,
    pub comment: String,
    pub track_number: i32,
    pub disc_number: i32,
    pub bitrate: i32,
    /// Length in seconds.
    pub length: i64,
    pub filesize: i64,
    pub sample_rate: i32,
    pub file_type: i32,
    pub bpm: f64,
    pub score: f64,
    pub rating: i32,
    pub play_count: i32,
    pub first_played: i64,
    pub last_played: i64,
}

/// The five entities a track always points at. Unknown values are the
/// empty-named entity with id `0`.
#[derive(Clone)]
pub struct TrackRelations {
    pub artist: ArtistPtr,
    pub album: AlbumPtr,
    pub genre: GenrePtr,
    pub composer: ComposerPtr,
    pub year: YearPtr,
}

/// Values staged while a track is in batch-update mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaCache {
    pub title: Option<String>,
    pub comment: Option<String>,
    pub track_number: Option<i32>,
    pub disc_number: Option<i32>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub composer: Option<String>,
    pub year: Option<String>,
    pub score: Option<f64>,
    pub rating: Option<i32>,
}

impl MetaCache {
    pub fn is_empty(&self) -> bool {
        *self == MetaCache::default()
    }

    fn touches_metadata(&self) -> bool {
        self.title.is_some()
            || self.comment.is_some()
            || self.track_number.is_some()
            || self.disc_number.is_some()
            || self.touches_relations()
    }

    fn touches_relations(&self) -> bool {
        self.artist.is_some()
            || self.album.is_some()
            || self.genre.is_some()
            || self.composer.is_some()
            || self.year.is_some()
    }

    fn touches_statistics(&self) -> bool {
        self.score.is_some() || self.rating.is_some()
    }
}

pub struct Track {
    id: i64,
    device_id: i64,
    url: String,
    fields: RwLock<TrackFields>,
    relations: RwLock<TrackRelations>,
    batch: Mutex<Option<MetaCache>>,
    store: Weak<dyn MetaStore>,
    observers: ObserverSet,
}

impl Track {
    pub(crate) fn new(
        id: i64,
        device_id: i64,
        url: impl Into<String>,
        fields: TrackFields,
        relations: TrackRelations,
        store: Weak<dyn MetaStore>,
    ) -> Self {
        Self {
            id,
            device_id,
            url: url.into(),
            fields: RwLock::new(fields),
            relations: RwLock::new(relations),
            batch: Mutex::new(None),
            store,
            observers: ObserverSet::default(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    /// Location of the track relative to its device.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> String {
        self.fields.read().title.clone()
    }

    /// Title, or the file name when the title is empty.
    pub fn pretty_name(&self) -> String {
        let title = self.title();
        if title.is_empty() {
            core_runtime::logging::strip_path(&self.url).to_string()
        } else {
            title
        }
    }

    pub fn comment(&self) -> String {
        self.fields.read().comment.clone()
    }

    pub fn track_number(&self) -> i32 {
        self.fields.read().track_number
    }

    pub fn disc_number(&self) -> i32 {
        self.fields.read().disc_number
    }

    pub fn bitrate(&self) -> i32 {
        self.fields.read().bitrate
    }

    pub fn length(&self) -> i64 {
        self.fields.read().length
    }

    pub fn filesize(&self) -> i64 {
        self.fields.read().filesize
    }

    pub fn sample_rate(&self) -> i32 {
        self.fields.read().sample_rate
    }

    pub fn file_type(&self) -> i32 {
        self.fields.read().file_type
    }

    pub fn bpm(&self) -> f64 {
        self.fields.read().bpm
    }

    pub fn score(&self) -> f64 {
        self.fields.read().score
    }

    pub fn rating(&self) -> i32 {
        self.fields.read().rating
    }

    pub fn play_count(&self) -> i32 {
        self.fields.read().play_count
    }

    pub fn first_played(&self) -> Option<DateTime<Utc>> {
        timestamp(self.fields.read().first_played)
    }

    pub fn last_played(&self) -> Option<DateTime<Utc>> {
        timestamp(self.fields.read().last_played)
    }

    /// Snapshot of all scalar fields.
    pub fn fields(&self) -> TrackFields {
        self.fields.read().clone()
    }

    pub fn artist(&self) -> ArtistPtr {
        self.relations.read().artist.clone()
    }

    pub fn album(&self) -> AlbumPtr {
        self.relations.read().album.clone()
    }

    pub fn genre(&self) -> GenrePtr {
        self.relations.read().genre.clone()
    }

    pub fn composer(&self) -> ComposerPtr {
        self.relations.read().composer.clone()
    }

    pub fn year(&self) -> YearPtr {
        self.relations.read().year.clone()
    }

    pub fn relations(&self) -> TrackRelations {
        self.relations.read().clone()
    }

    /// Value of `field` as used by filters and ordering.
    pub fn value(&self, field: Field) -> FieldValue {
        let fields = self.fields.read();
        match field {
            Field::Url => FieldValue::Text(self.url.clone()),
            Field::Title => FieldValue::Text(fields.title.clone()),
            Field::Comment => FieldValue::Text(fields.comment.clone()),
            Field::Artist => FieldValue::Text(self.artist().name().to_string()),
            Field::Album => FieldValue::Text(self.album().name().to_string()),
            Field::Genre => FieldValue::Text(self.genre().name().to_string()),
            Field::Composer => FieldValue::Text(self.composer().name().to_string()),
            Field::Year => FieldValue::Text(self.year().name().to_string()),
            Field::TrackNumber => FieldValue::Integer(fields.track_number.into()),
            Field::DiscNumber => FieldValue::Integer(fields.disc_number.into()),
            Field::Length => FieldValue::Integer(fields.length),
            Field::Bitrate => FieldValue::Integer(fields.bitrate.into()),
            Field::SampleRate => FieldValue::Integer(fields.sample_rate.into()),
            Field::FileSize => FieldValue::Integer(fields.filesize),
            Field::Format => FieldValue::Integer(fields.file_type.into()),
            Field::Score => FieldValue::Real(fields.score),
            Field::Rating => FieldValue::Integer(fields.rating.into()),
            Field::FirstPlayed => FieldValue::Integer(fields.first_played),
            Field::LastPlayed => FieldValue::Integer(fields.last_played),
            Field::PlayCount => FieldValue::Integer(fields.play_count.into()),
        }
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    pub async fn set_title(self: &Arc<Self>, title: impl Into<String>) -> Result<()> {
        let title = title.into();
        self.update(|c| c.title = Some(title)).await
    }

    pub async fn set_comment(self: &Arc<Self>, comment: impl Into<String>) -> Result<()> {
        let comment = comment.into();
        self.update(|c| c.comment = Some(comment)).await
    }

    pub async fn set_track_number(self: &Arc<Self>, number: i32) -> Result<()> {
        self.update(|c| c.track_number = Some(number)).await
    }

    pub async fn set_disc_number(self: &Arc<Self>, number: i32) -> Result<()> {
        self.update(|c| c.disc_number = Some(number)).await
    }

    pub async fn set_artist(self: &Arc<Self>, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.update(|c| c.artist = Some(name)).await
    }

    pub async fn set_album(self: &Arc<Self>, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.update(|c| c.album = Some(name)).await
    }

    pub async fn set_genre(self: &Arc<Self>, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.update(|c| c.genre = Some(name)).await
    }

    pub async fn set_composer(self: &Arc<Self>, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.update(|c| c.composer = Some(name)).await
    }

    pub async fn set_year(self: &Arc<Self>, year: impl Into<String>) -> Result<()> {
        let year = year.into();
        self.update(|c| c.year = Some(year)).await
    }

    pub async fn set_score(self: &Arc<Self>, score: f64) -> Result<()> {
        self.update(|c| c.score = Some(score)).await
    }

    pub async fn set_rating(self: &Arc<Self>, rating: i32) -> Result<()> {
        self.update(|c| c.rating = Some(rating)).await
    }

    /// Record a finished playback of `fraction` (0.0..=1.0) of the track.
    ///
    /// The score becomes the running average of played percentages.
    #[instrument(skip(self), fields(url = %core_runtime::logging::strip_path(&self.url)))]
    pub async fn finished_playing(self: &Arc<Self>, fraction: f64) -> Result<()> {
        let store = self.store.upgrade().ok_or(CollectionError::CollectionGone)?;
        if !store.is_writable() {
            debug!("Collection is read-only, play not recorded");
            return Ok(());
        }

        let previous = self.fields();
        {
            let now = Utc::now().timestamp();
            let percent = fraction.clamp(0.0, 1.0) * 100.0;
            let mut fields = self.fields.write();
            let plays = f64::from(fields.play_count);
            fields.score = (fields.score * plays + percent) / (plays + 1.0);
            fields.play_count += 1;
            fields.last_played = now;
            if fields.first_played == 0 {
                fields.first_played = now;
            }
        }

        if let Err(e) = store.write_statistics(self).await {
            warn!(error = %e, "Failed to persist play statistics");
            *self.fields.write() = previous;
            return Err(e);
        }
        drop(store);
        self.notify_observers();
        Ok(())
    }

    /// Enter batch mode: setters only stage values until
    /// [`end_metadata_update`](Self::end_metadata_update).
    pub fn begin_metadata_update(&self) {
        let mut batch = self.batch.lock();
        if batch.is_none() {
            *batch = Some(MetaCache::default());
        }
    }

    /// Commit every staged value with one write and one notification.
    pub async fn end_metadata_update(self: &Arc<Self>) -> Result<()> {
        let staged = self.batch.lock().take();
        match staged {
            Some(cache) if !cache.is_empty() => self.commit(cache).await,
            _ => Ok(()),
        }
    }

    /// Leave batch mode, discarding staged values.
    pub fn abort_metadata_update(&self) {
        self.batch.lock().take();
    }

    pub fn is_in_metadata_update(&self) -> bool {
        self.batch.lock().is_some()
    }

    async fn update(self: &Arc<Self>, stage: impl FnOnce(&mut MetaCache)) -> Result<()> {
        {
            let mut batch = self.batch.lock();
            if let Some(cache) = batch.as_mut() {
                stage(cache);
                return Ok(());
            }
        }
        let mut cache = MetaCache::default();
        stage(&mut cache);
        self.commit(cache).await
    }

    #[instrument(skip(self, cache), fields(url = %core_runtime::logging::strip_path(&self.url)))]
    async fn commit(self: &Arc<Self>, cache: MetaCache) -> Result<()> {
        let store = self.store.upgrade().ok_or(CollectionError::CollectionGone)?;
        if !store.is_writable() {
            debug!("Collection is read-only, metadata change dropped");
            return Ok(());
        }

        let old_relations = self.relations();
        let registry = store.registry();

        let artist = match &cache.artist {
            Some(name) => registry.artist_by_name(name).await?,
            None => old_relations.artist.clone(),
        };
        let album = match &cache.album {
            Some(name) => registry.album_by_name(name, artist.id()).await?,
            None => old_relations.album.clone(),
        };
        let genre = match &cache.genre {
            Some(name) => registry.genre_by_name(name).await?,
            None => old_relations.genre.clone(),
        };
        let composer = match &cache.composer {
            Some(name) => registry.composer_by_name(name).await?,
            None => old_relations.composer.clone(),
        };
        let year = match &cache.year {
            Some(name) => registry.year_by_name(name).await?,
            None => old_relations.year.clone(),
        };
        let new_relations = TrackRelations {
            artist,
            album,
            genre,
            composer,
            year,
        };

        let old_fields = {
            let mut fields = self.fields.write();
            let old = fields.clone();
            if let Some(title) = cache.title.clone() {
                fields.title = title;
            }
            if let Some(comment) = cache.comment.clone() {
                fields.comment = comment;
            }
            if let Some(number) = cache.track_number {
                fields.track_number = number;
            }
            if let Some(number) = cache.disc_number {
                fields.disc_number = number;
            }
            if let Some(score) = cache.score {
                fields.score = score;
            }
            if let Some(rating) = cache.rating {
                fields.rating = rating;
            }
            old
        };
        *self.relations.write() = new_relations.clone();

        invalidate_moved(&old_relations, &new_relations);

        let persisted = async {
            if cache.touches_metadata() {
                store.write_track(self).await?;
            }
            if cache.touches_statistics() {
                store.write_statistics(self).await?;
            }
            Ok::<_, CollectionError>(())
        }
        .await;

        if let Err(e) = persisted {
            warn!(error = %e, "Failed to persist track metadata, reverting");
            *self.fields.write() = old_fields;
            *self.relations.write() = old_relations.clone();
            invalidate_moved(&new_relations, &old_relations);
            return Err(e);
        }

        drop(store);
        self.notify_observers();
        Ok(())
    }

    /// Swap in values rewritten by the owning store, invalidating the track
    /// lists the track moved between.
    pub(crate) fn replace(&self, fields: TrackFields, relations: TrackRelations) {
        let old = std::mem::replace(&mut *self.relations.write(), relations.clone());
        *self.fields.write() = fields;
        invalidate_moved(&old, &relations);
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn subscribe(&self, observer: &Arc<dyn Observer>) {
        self.observers.subscribe(observer);
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn Observer>) {
        self.observers.unsubscribe(observer);
    }

    pub fn notify_observers(self: &Arc<Self>) {
        let track: TrackPtr = self.clone();
        for observer in self.observers.snapshot() {
            observer.track_metadata_changed(&track);
        }
        if let Some(store) = self.store.upgrade() {
            store.publish(CollectionEvent::TrackChanged {
                collection_id: store.collection_id().to_string(),
                url: self.url.clone(),
            });
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("url", &self.url)
            .field("title", &self.title())
            .finish()
    }
}

/// Invalidate the track lists of every entity the track left or joined.
fn invalidate_moved(old: &TrackRelations, new: &TrackRelations) {
    if !Arc::ptr_eq(&old.artist, &new.artist) {
        old.artist.invalidate_cache();
        new.artist.invalidate_cache();
    }
    if !Arc::ptr_eq(&old.album, &new.album) {
        old.album.invalidate_cache();
        new.album.invalidate_cache();
    }
    if !Arc::ptr_eq(&old.genre, &new.genre) {
        old.genre.invalidate_cache();
        new.genre.invalidate_cache();
    }
    if !Arc::ptr_eq(&old.composer, &new.composer) {
        old.composer.invalidate_cache();
        new.composer.invalidate_cache();
    }
    if !Arc::ptr_eq(&old.year, &new.year) {
        old.year.invalidate_cache();
        new.year.invalidate_cache();
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_cache_classification() {
        let mut cache = MetaCache::default();
        assert!(cache.is_empty());

        cache.score = Some(80.0);
        assert!(cache.touches_statistics());
        assert!(!cache.touches_metadata());

        cache.genre = Some("Rock".to_string());
        assert!(cache.touches_metadata());
        assert!(cache.touches_relations());
    }

    #[test]
    fn test_timestamp_zero_is_never() {
        assert!(timestamp(0).is_none());
        assert_eq!(timestamp(86_400).unwrap().timestamp(), 86_400);
    }
}
