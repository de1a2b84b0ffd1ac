//! Field to column mapping and join planning for the relational schema.
//!
//! [`column_for`] only looks a field up. Joining is the caller's business:
//! every column reference is followed by an explicit [`LinkedTables::link`]
//! of the table it returned, and [`from_clause`] joins exactly the linked
//! tables.

use crate::query::{Field, QueryKind};
use std::ops::BitOr;

/// Set of tables a statement needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkedTables(u16);

impl LinkedTables {
    pub const NONE: LinkedTables = LinkedTables(0);
    pub const TRACKS: LinkedTables = LinkedTables(1);
    pub const ARTISTS: LinkedTables = LinkedTables(2);
    pub const ALBUMS: LinkedTables = LinkedTables(4);
    pub const GENRES: LinkedTables = LinkedTables(8);
    pub const COMPOSERS: LinkedTables = LinkedTables(16);
    pub const YEARS: LinkedTables = LinkedTables(32);
    pub const STATISTICS: LinkedTables = LinkedTables(64);
    pub const URLS: LinkedTables = LinkedTables(128);
    pub const ALBUM_ARTISTS: LinkedTables = LinkedTables(256);

    pub const fn contains(self, other: LinkedTables) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn link(&mut self, tables: LinkedTables) {
        self.0 |= tables.0;
    }

    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl BitOr for LinkedTables {
    type Output = LinkedTables;

    fn bitor(self, rhs: LinkedTables) -> LinkedTables {
        LinkedTables(self.0 | rhs.0)
    }
}

/// A column expression and the table it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub table: LinkedTables,
    pub expr: &'static str,
}

const fn column(table: LinkedTables, expr: &'static str) -> Column {
    Column { table, expr }
}

/// Physical column of `field`.
pub fn column_for(field: Field) -> Column {
    match field {
        Field::Url => column(LinkedTables::URLS, "urls.rpath"),
        Field::Title => column(LinkedTables::TRACKS, "tracks.title"),
        Field::Artist => column(LinkedTables::ARTISTS, "artists.name"),
        Field::Album => column(LinkedTables::ALBUMS, "albums.name"),
        Field::Genre => column(LinkedTables::GENRES, "genres.name"),
        Field::Composer => column(LinkedTables::COMPOSERS, "composers.name"),
        Field::Year => column(LinkedTables::YEARS, "years.name"),
        Field::Comment => column(LinkedTables::TRACKS, "tracks.comment"),
        Field::TrackNumber => column(LinkedTables::TRACKS, "tracks.tracknumber"),
        Field::DiscNumber => column(LinkedTables::TRACKS, "tracks.discnumber"),
        Field::Length => column(LinkedTables::TRACKS, "tracks.length"),
        Field::Bitrate => column(LinkedTables::TRACKS, "tracks.bitrate"),
        Field::SampleRate => column(LinkedTables::TRACKS, "tracks.samplerate"),
        Field::FileSize => column(LinkedTables::TRACKS, "tracks.filesize"),
        Field::Format => column(LinkedTables::TRACKS, "tracks.filetype"),
        Field::Score => column(LinkedTables::STATISTICS, "statistics.score"),
        Field::Rating => column(LinkedTables::STATISTICS, "statistics.rating"),
        Field::FirstPlayed => column(LinkedTables::STATISTICS, "statistics.createdate"),
        Field::LastPlayed => column(LinkedTables::STATISTICS, "statistics.accessdate"),
        Field::PlayCount => column(LinkedTables::STATISTICS, "statistics.playcount"),
    }
}

/// Columns of a track query. The decoder in
/// [`Registry::track_from_row`](crate::registry::Registry::track_from_row)
/// reads them by position.
pub const TRACK_COLUMNS: [&str; 29] = [
    "urls.deviceid",
    "urls.rpath",
    "tracks.id",
    "tracks.title",
    "tracks.comment",
    "tracks.tracknumber",
    "tracks.discnumber",
    "statistics.score",
    "statistics.rating",
    "tracks.bitrate",
    "tracks.length",
    "tracks.filesize",
    "tracks.samplerate",
    "statistics.createdate",
    "statistics.accessdate",
    "statistics.playcount",
    "tracks.filetype",
    "tracks.bpm",
    "artists.name",
    "artists.id",
    "albums.name",
    "albums.id",
    "albums.artist",
    "genres.name",
    "genres.id",
    "composers.name",
    "composers.id",
    "years.name",
    "years.id",
];

/// Tables the track columns come from.
pub const TRACK_TABLES: LinkedTables = LinkedTables(
    LinkedTables::TRACKS.0
        | LinkedTables::URLS.0
        | LinkedTables::STATISTICS.0
        | LinkedTables::ARTISTS.0
        | LinkedTables::ALBUMS.0
        | LinkedTables::GENRES.0
        | LinkedTables::COMPOSERS.0
        | LinkedTables::YEARS.0,
);

/// Return columns and tables of an entity query, `None` for custom and
/// unset kinds.
pub fn kind_columns(kind: QueryKind) -> Option<(String, LinkedTables)> {
    let columns = match kind {
        QueryKind::Track => (TRACK_COLUMNS.join(", "), TRACK_TABLES),
        QueryKind::Artist => ("artists.name, artists.id".to_string(), LinkedTables::ARTISTS),
        QueryKind::Album => (
            "albums.name, albums.id, albums.artist".to_string(),
            LinkedTables::ALBUMS,
        ),
        QueryKind::Genre => ("genres.name, genres.id".to_string(), LinkedTables::GENRES),
        QueryKind::Composer => (
            "composers.name, composers.id".to_string(),
            LinkedTables::COMPOSERS,
        ),
        QueryKind::Year => ("years.name, years.id".to_string(), LinkedTables::YEARS),
        QueryKind::Custom | QueryKind::None => return None,
    };
    Some(columns)
}

/// Number of fields per row of an entity query.
pub fn kind_width(kind: QueryKind) -> usize {
    match kind {
        QueryKind::Track => TRACK_COLUMNS.len(),
        QueryKind::Album => 3,
        QueryKind::Artist | QueryKind::Genre | QueryKind::Composer | QueryKind::Year => 2,
        QueryKind::Custom | QueryKind::None => 0,
    }
}

/// FROM clause joining exactly the linked tables. `tracks` is always the
/// base table.
pub fn from_clause(linked: LinkedTables) -> String {
    let mut from = String::from("tracks");
    if linked.contains(LinkedTables::URLS) {
        from.push_str(" LEFT JOIN urls ON tracks.url = urls.id");
    }
    if linked.contains(LinkedTables::ARTISTS) {
        from.push_str(" LEFT JOIN artists ON tracks.artist = artists.id");
    }
    if linked.contains(LinkedTables::ALBUMS) || linked.contains(LinkedTables::ALBUM_ARTISTS) {
        from.push_str(" LEFT JOIN albums ON tracks.album = albums.id");
    }
    if linked.contains(LinkedTables::ALBUM_ARTISTS) {
        from.push_str(" LEFT JOIN artists AS albumartists ON albums.artist = albumartists.id");
    }
    if linked.contains(LinkedTables::GENRES) {
        from.push_str(" LEFT JOIN genres ON tracks.genre = genres.id");
    }
    if linked.contains(LinkedTables::COMPOSERS) {
        from.push_str(" LEFT JOIN composers ON tracks.composer = composers.id");
    }
    if linked.contains(LinkedTables::YEARS) {
        from.push_str(" LEFT JOIN years ON tracks.year = years.id");
    }
    if linked.contains(LinkedTables::STATISTICS) {
        from.push_str(" LEFT JOIN statistics ON tracks.url = statistics.url");
    }
    from
}

/// Expression used to sort by `field`: text case-insensitively, the year
/// numerically.
pub fn order_expr(field: Field) -> String {
    let column = column_for(field);
    match field {
        Field::Year => format!("CAST({} AS INTEGER)", column.expr),
        f if f.is_numeric() => column.expr.to_string(),
        _ => format!("{} COLLATE NOCASE", column.expr),
    }
}

/// Table holding the names of a tag entity kind.
pub fn tag_table(kind: crate::meta::EntityKind) -> Option<&'static str> {
    use crate::meta::EntityKind;
    match kind {
        EntityKind::Artist => Some("artists"),
        EntityKind::Album => Some("albums"),
        EntityKind::Genre => Some("genres"),
        EntityKind::Composer => Some("composers"),
        EntityKind::Year => Some("years"),
        EntityKind::Track => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_lookup_is_pure() {
        let col = column_for(Field::Score);
        assert_eq!(col.expr, "statistics.score");
        assert_eq!(col.table, LinkedTables::STATISTICS);
        assert_eq!(column_for(Field::Url).expr, "urls.rpath");
        assert_eq!(column_for(Field::Format).expr, "tracks.filetype");
        assert_eq!(column_for(Field::FirstPlayed).expr, "statistics.createdate");
    }

    #[test]
    fn test_from_clause_joins_only_linked_tables() {
        assert_eq!(from_clause(LinkedTables::TRACKS), "tracks");

        let from = from_clause(LinkedTables::TRACKS | LinkedTables::ARTISTS);
        assert!(from.contains("LEFT JOIN artists ON"));
        assert!(!from.contains("albums"));

        let from = from_clause(LinkedTables::ALBUM_ARTISTS);
        assert!(from.contains("LEFT JOIN albums ON"));
        assert!(from.contains("artists AS albumartists"));
    }

    #[test]
    fn test_track_columns_cover_all_tables() {
        let from = from_clause(TRACK_TABLES);
        for column in TRACK_COLUMNS {
            let table = column.split('.').next().unwrap();
            assert!(
                table == "tracks" || from.contains(&format!("JOIN {table} ON")),
                "{column} not joined"
            );
        }
        assert_eq!(kind_width(QueryKind::Track), 29);
    }

    #[test]
    fn test_linked_tables_set_ops() {
        let mut linked = LinkedTables::NONE;
        linked.link(LinkedTables::YEARS);
        linked.link(LinkedTables::URLS);
        assert!(linked.contains(LinkedTables::YEARS));
        assert!(!linked.contains(LinkedTables::GENRES));
        assert_eq!(linked.bits(), 160);
    }
}
