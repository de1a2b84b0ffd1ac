//! Predicates evaluated against tracks by the memory query maker.

use crate::meta::{DataPtr, Track};
use crate::query::{Field, FieldValue, NumberComparison};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Group {
    And,
    Or,
}

/// Filter tree mirroring the `begin_and`/`begin_or` nesting of the builder.
#[derive(Debug, Clone)]
pub(crate) enum MemoryFilter {
    Container {
        group: Group,
        children: Vec<MemoryFilter>,
    },
    Text {
        field: Field,
        needle: String,
        match_begin: bool,
        match_end: bool,
    },
    Number {
        field: Field,
        value: i64,
        comparison: NumberComparison,
    },
    Negate(Box<MemoryFilter>),
}

impl MemoryFilter {
    /// Case is folded for ASCII letters only, as SQLite's `LIKE` does, so
    /// both backends select the same tracks.
    pub(crate) fn text(field: Field, needle: &str, match_begin: bool, match_end: bool) -> Self {
        MemoryFilter::Text {
            field,
            needle: needle.to_ascii_lowercase(),
            match_begin,
            match_end,
        }
    }

    pub(crate) fn negate(self) -> Self {
        MemoryFilter::Negate(Box::new(self))
    }

    /// An empty AND group accepts everything, an empty OR group nothing.
    pub(crate) fn matches(&self, track: &Track) -> bool {
        match self {
            MemoryFilter::Container {
                group: Group::And,
                children,
            } => children.iter().all(|f| f.matches(track)),
            MemoryFilter::Container {
                group: Group::Or,
                children,
            } => children.iter().any(|f| f.matches(track)),
            MemoryFilter::Text {
                field,
                needle,
                match_begin,
                match_end,
            } => {
                let value = track.value(*field).to_string().to_ascii_lowercase();
                match (match_begin, match_end) {
                    (true, true) => value.contains(needle.as_str()),
                    (false, true) => value.starts_with(needle.as_str()),
                    (true, false) => value.ends_with(needle.as_str()),
                    (false, false) => value == *needle,
                }
            }
            MemoryFilter::Number {
                field,
                value,
                comparison,
            } => comparison.apply(track.value(*field).as_number(), *value as f64, false),
            MemoryFilter::Negate(inner) => !inner.matches(track),
        }
    }
}

/// Stack of open filter groups.
#[derive(Debug, Clone)]
pub(crate) struct FilterStack {
    open: Vec<(Group, Vec<MemoryFilter>)>,
}

impl Default for FilterStack {
    fn default() -> Self {
        Self {
            open: vec![(Group::And, Vec::new())],
        }
    }
}

impl FilterStack {
    pub(crate) fn push(&mut self, filter: MemoryFilter) {
        if let Some((_, children)) = self.open.last_mut() {
            children.push(filter);
        }
    }

    pub(crate) fn begin(&mut self, group: Group) {
        self.open.push((group, Vec::new()));
    }

    /// Close the innermost group; the root group never closes.
    pub(crate) fn end(&mut self) {
        if self.open.len() > 1 {
            if let Some((group, children)) = self.open.pop() {
                self.push(MemoryFilter::Container { group, children });
            }
        }
    }

    /// The whole tree, closing groups left open.
    pub(crate) fn build(&self) -> MemoryFilter {
        let mut open = self.open.clone();
        while open.len() > 1 {
            if let Some((group, children)) = open.pop() {
                if let Some((_, parent)) = open.last_mut() {
                    parent.push(MemoryFilter::Container { group, children });
                }
            }
        }
        let (group, children) = open.pop().unwrap_or((Group::And, Vec::new()));
        MemoryFilter::Container { group, children }
    }
}

/// Whether `track` is related to `data`.
///
/// Entities of the same collection match by identity. Entities from another
/// collection match by name; an album also has to agree on being a
/// compilation and on its album artist.
pub(crate) fn matches_data(data: &DataPtr, track: &Track) -> bool {
    match data {
        DataPtr::Track(other) => other.device_id() == track.device_id() && other.url() == track.url(),
        DataPtr::Artist(artist) => {
            let own = track.artist();
            Arc::ptr_eq(&own, artist) || own.name() == artist.name()
        }
        DataPtr::Album(album) => {
            let own = track.album();
            if Arc::ptr_eq(&own, album) {
                return true;
            }
            if own.name() != album.name() || own.is_compilation() != album.is_compilation() {
                return false;
            }
            if album.is_compilation() {
                return true;
            }
            match (own.cached_album_artist(), album.cached_album_artist()) {
                (Some(a), Some(b)) => a.name() == b.name(),
                _ => own.album_artist_id() == album.album_artist_id(),
            }
        }
        DataPtr::Genre(genre) => {
            let own = track.genre();
            Arc::ptr_eq(&own, genre) || own.name() == genre.name()
        }
        DataPtr::Composer(composer) => {
            let own = track.composer();
            Arc::ptr_eq(&own, composer) || own.name() == composer.name()
        }
        DataPtr::Year(year) => {
            let own = track.year();
            Arc::ptr_eq(&own, year) || own.name() == year.name()
        }
    }
}

/// Sort key comparison of two field values: numbers numerically, text
/// with ASCII case folded like SQLite's `NOCASE`.
pub(crate) fn compare_values(field: Field, a: &FieldValue, b: &FieldValue) -> std::cmp::Ordering {
    if field.is_numeric() {
        a.as_number().total_cmp(&b.as_number())
    } else {
        a.to_string()
            .to_ascii_lowercase()
            .cmp(&b.to_string().to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclosed_groups_are_closed_on_build() {
        let mut stack = FilterStack::default();
        stack.begin(Group::Or);
        stack.push(MemoryFilter::text(Field::Title, "a", true, true));
        stack.begin(Group::And);

        match stack.build() {
            MemoryFilter::Container {
                group: Group::And,
                children,
            } => {
                assert_eq!(children.len(), 1);
                match &children[0] {
                    MemoryFilter::Container {
                        group: Group::Or,
                        children,
                    } => assert_eq!(children.len(), 2),
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_extra_end_is_ignored() {
        let mut stack = FilterStack::default();
        stack.end();
        stack.end();
        assert!(matches!(
            stack.build(),
            MemoryFilter::Container { group: Group::And, ref children } if children.is_empty()
        ));
    }

    #[test]
    fn test_text_filter_lowercases_needle() {
        match MemoryFilter::text(Field::Title, "FiRe", true, false) {
            MemoryFilter::Text { needle, .. } => assert_eq!(needle, "fire"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_compare_values() {
        use std::cmp::Ordering;
        let nine = FieldValue::Text("9".to_string());
        let ten = FieldValue::Text("10".to_string());
        assert_eq!(compare_values(Field::Year, &nine, &ten), Ordering::Less);
        assert_eq!(compare_values(Field::Title, &nine, &ten), Ordering::Greater);
        assert_eq!(
            compare_values(
                Field::Title,
                &FieldValue::Text("abc".to_string()),
                &FieldValue::Text("ABD".to_string())
            ),
            Ordering::Less
        );
    }
}
