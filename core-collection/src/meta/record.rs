use serde::{Deserialize, Serialize};

/// Flat description of one track as a scanner or device reports it.
///
/// Relations are given by name; the collection resolves them to entities.
/// An empty name is the unknown value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackRecord {
    pub device_id: i64,
    pub url: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// The album has no single album artist.
    pub compilation: bool,
    pub genre: String,
    pub composer: String,
    pub year: String,
    pub comment: String,
    pub track_number: i32,
    pub disc_number: i32,
    pub bitrate: i32,
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

impl Default for TrackRecord {
    fn default() -> Self {
        Self {
            device_id: -1,
            url: String::new(),
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            compilation: false,
            genre: String::new(),
            composer: String::new(),
            year: String::new(),
            comment: String::new(),
            track_number: 0,
            disc_number: 0,
            bitrate: 0,
            length: 0,
            filesize: 0,
            sample_rate: 0,
            file_type: 0,
            bpm: 0.0,
            score: 0.0,
            rating: 0,
            play_count: 0,
            first_played: 0,
            last_played: 0,
        }
    }
}

impl TrackRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn compilation(mut self, compilation: bool) -> Self {
        self.compilation = compilation;
        self
    }

    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    pub fn composer(mut self, composer: impl Into<String>) -> Self {
        self.composer = composer.into();
        self
    }

    pub fn year(mut self, year: impl Into<String>) -> Self {
        self.year = year.into();
        self
    }

    pub fn track_number(mut self, number: i32) -> Self {
        self.track_number = number;
        self
    }

    pub fn length(mut self, seconds: i64) -> Self {
        self.length = seconds;
        self
    }

    pub fn score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn rating(mut self, rating: i32) -> Self {
        self.rating = rating;
        self
    }

    pub fn play_count(mut self, count: i32) -> Self {
        self.play_count = count;
        self
    }

    /// Record describing `track` as it is now.
    pub fn from_track(track: &super::Track) -> Self {
        let fields = track.fields();
        let relations = track.relations();
        Self {
            device_id: track.device_id(),
            url: track.url().to_string(),
            title: fields.title,
            artist: relations.artist.name().to_string(),
            album: relations.album.name().to_string(),
            compilation: relations.album.is_compilation() && !relations.album.name().is_empty(),
            genre: relations.genre.name().to_string(),
            composer: relations.composer.name().to_string(),
            year: relations.year.name().to_string(),
            comment: fields.comment,
            track_number: fields.track_number,
            disc_number: fields.disc_number,
            bitrate: fields.bitrate,
            length: fields.length,
            filesize: fields.filesize,
            sample_rate: fields.sample_rate,
            file_type: fields.file_type,
            bpm: fields.bpm,
            score: fields.score,
            rating: fields.rating,
            play_count: fields.play_count,
            first_played: fields.first_played,
            last_played: fields.last_played,
        }
    }

    /// Scalar fields of the record.
    pub fn fields(&self) -> super::TrackFields {
        super::TrackFields {
            title: self.title.clone(),
            comment: self.comment.clone(),
            track_number: self.track_number,
            disc_number: self.disc_number,
            bitrate: self.bitrate,
            length: self.length,
            filesize: self.filesize,
            sample_rate: self.sample_rate,
            file_type: self.file_type,
            bpm: self.bpm,
            score: self.score,
            rating: self.rating,
            play_count: self.play_count,
            first_played: self.first_played,
            last_played: self.last_played,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let record: TrackRecord =
            serde_json::from_str(r#"{"url": "/music/fire.mp3", "title": "Fire"}"#).unwrap();
        assert_eq!(record.device_id, -1);
        assert_eq!(record.title, "Fire");
        assert!(record.artist.is_empty());
        assert!(!record.compilation);
    }

    #[test]
    fn test_builder() {
        let record = TrackRecord::new("/a.ogg")
            .title("Water")
            .artist("Elements")
            .year("2001")
            .rating(7);
        assert_eq!(record.fields().title, "Water");
        assert_eq!(record.fields().rating, 7);
        assert_eq!(record.year, "2001");
    }
}
