//! Tag entities that carry nothing but a name, an id and their tracks.

use super::{DataPtr, EntityKind, Observer, ObserverSet, TrackListCache, TrackPtr};
use crate::collection::MetaStore;
use core_runtime::events::CollectionEvent;
use std::fmt;
use std::sync::{Arc, Weak};

macro_rules! tag_entity {
    ($(#[$doc:meta])* $name:ident, $kind:ident, $notify:ident) => {
        $(#[$doc])*
        pub struct $name {
            id: i64,
            name: String,
            store: Weak<dyn MetaStore>,
            tracks: TrackListCache,
            observers: ObserverSet,
        }

        impl $name {
            pub(crate) fn new(id: i64, name: impl Into<String>, store: Weak<dyn MetaStore>) -> Self {
                Self {
                    id,
                    name: name.into(),
                    store,
                    tracks: TrackListCache::default(),
                    observers: ObserverSet::default(),
                }
            }

            pub fn id(&self) -> i64 {
                self.id
            }

            pub fn name(&self) -> &str {
                &self.name
            }

            pub fn pretty_name(&self) -> &str {
                &self.name
            }

            pub async fn tracks(self: &Arc<Self>) -> Vec<TrackPtr> {
                self.tracks
                    .load(&self.store, DataPtr::$kind(self.clone()))
                    .await
            }

            pub fn invalidate_cache(&self) {
                self.tracks.invalidate();
            }

            pub fn subscribe(&self, observer: &Arc<dyn Observer>) {
                self.observers.subscribe(observer);
            }

            pub fn unsubscribe(&self, observer: &Arc<dyn Observer>) {
                self.observers.unsubscribe(observer);
            }

            pub fn notify_observers(self: &Arc<Self>) {
                for observer in self.observers.snapshot() {
                    observer.$notify(self);
                }
                if let Some(store) = self.store.upgrade() {
                    store.publish(CollectionEvent::EntityChanged {
                        collection_id: store.collection_id().to_string(),
                        kind: EntityKind::$kind.as_str().to_string(),
                        name: self.name.clone(),
                    });
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("id", &self.id)
                    .field("name", &self.name)
                    .finish()
            }
        }
    };
}

tag_entity!(
    /// A genre tag.
    Genre, Genre, genre_metadata_changed
);
tag_entity!(
    /// A composer tag.
    Composer, Composer, composer_metadata_changed
);
tag_entity!(
    /// A release year. The name is kept as text; `"0"` and `""` both mean
    /// unknown.
    Year, Year, year_metadata_changed
);

impl Year {
    /// Numeric value of the year, `0` when it does not parse.
    pub fn value(&self) -> i32 {
        self.name.trim().parse().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_value() {
        let store: Weak<dyn MetaStore> = Weak::<crate::memory::MemoryCollection>::new();
        assert_eq!(Year::new(1, "1999", store.clone()).value(), 1999);
        assert_eq!(Year::new(2, "", store.clone()).value(), 0);
        assert_eq!(Year::new(3, "nineteen", store).value(), 0);
    }
}
