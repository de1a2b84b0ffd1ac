use super::{AlbumPtr, ArtistPtr, ComposerPtr, GenrePtr, TrackPtr, YearPtr};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Receives change notifications from entities it subscribed to.
///
/// Every method has an empty default so an observer only implements the
/// kinds it cares about. Notifications are delivered on the thread that made
/// the change.
pub trait Observer: Send + Sync {
    fn track_metadata_changed(&self, _track: &TrackPtr) {}
    fn artist_metadata_changed(&self, _artist: &ArtistPtr) {}
    fn album_metadata_changed(&self, _album: &AlbumPtr) {}
    fn genre_metadata_changed(&self, _genre: &GenrePtr) {}
    fn composer_metadata_changed(&self, _composer: &ComposerPtr) {}
    fn year_metadata_changed(&self, _year: &YearPtr) {}
    fn album_image_changed(&self, _album: &AlbumPtr) {}
}

/// Weakly held observers of one entity.
#[derive(Default)]
pub struct ObserverSet {
    observers: Mutex<Vec<Weak<dyn Observer>>>,
}

impl ObserverSet {
    pub fn subscribe(&self, observer: &Arc<dyn Observer>) {
        let mut observers = self.observers.lock();
        observers.retain(|o| o.strong_count() > 0);
        let weak = Arc::downgrade(observer);
        if !observers.iter().any(|o| Weak::ptr_eq(o, &weak)) {
            observers.push(weak);
        }
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn Observer>) {
        let weak = Arc::downgrade(observer);
        self.observers
            .lock()
            .retain(|o| o.strong_count() > 0 && !Weak::ptr_eq(o, &weak));
    }

    /// Live observers; dead entries are dropped on the way.
    ///
    /// Callbacks run on the returned snapshot, outside the lock, so an
    /// observer may unsubscribe itself while being notified.
    pub fn snapshot(&self) -> Vec<Arc<dyn Observer>> {
        let mut observers = self.observers.lock();
        observers.retain(|o| o.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
