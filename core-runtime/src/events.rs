//! Collection notifications on a `tokio::sync::broadcast` channel.
//!
//! Entities call their own observers directly; the same changes are mirrored
//! here for listeners that hold no entity (a status line, a cache warmer, a
//! test). Query makers publish `QueryFinished` once per run.
//!
//! ```rust
//! use core_runtime::events::{CollectionEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Collection(CollectionEvent::CollectionUpdated {
//!     collection_id: "localCollection".to_string(),
//! }))
//! .ok();
//!
//! assert_eq!(rx.recv().await.unwrap().description(), "Collection contents changed");
//! # }
//! ```
//!
//! Emitting with nobody listening is an error that publishers drop with `.ok()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, SendError, TryRecvError},
};

pub use tokio::sync::broadcast::Receiver;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Everything published on an [`EventBus`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Collection(CollectionEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Collection(e) => e.description(),
        }
    }

    /// Aborted queries warn, content changes inform, the rest is debug noise.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Collection(CollectionEvent::QueryFinished { aborted: true, .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Collection(CollectionEvent::CollectionUpdated { .. }) => {
                EventSeverity::Info
            }
            _ => EventSeverity::Debug,
        }
    }

    /// Id of the collection the event originates from.
    pub fn collection_id(&self) -> &str {
        match self {
            CoreEvent::Collection(e) => e.collection_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CollectionEvent {
    /// Metadata or statistics of a track changed.
    TrackChanged {
        collection_id: String,
        url: String,
    },
    /// Metadata of an artist, album, genre, composer or year changed.
    EntityChanged {
        collection_id: String,
        /// `artist`, `album`, `genre`, `composer` or `year`.
        kind: String,
        name: String,
    },
    /// Cover image of an album was set or removed.
    AlbumImageChanged {
        collection_id: String,
        album: String,
    },
    /// Tracks were added to or removed from the collection.
    CollectionUpdated {
        collection_id: String,
    },
    /// A query run finished.
    QueryFinished {
        collection_id: String,
        result_count: usize,
        aborted: bool,
    },
}

impl CollectionEvent {
    fn description(&self) -> &str {
        match self {
            CollectionEvent::TrackChanged { .. } => "Track metadata changed",
            CollectionEvent::EntityChanged { .. } => "Entity metadata changed",
            CollectionEvent::AlbumImageChanged { .. } => "Album image changed",
            CollectionEvent::CollectionUpdated { .. } => "Collection contents changed",
            CollectionEvent::QueryFinished { aborted: true, .. } => "Query aborted",
            CollectionEvent::QueryFinished { .. } => "Query finished",
        }
    }

    fn collection_id(&self) -> &str {
        match self {
            CollectionEvent::TrackChanged { collection_id, .. }
            | CollectionEvent::EntityChanged { collection_id, .. }
            | CollectionEvent::AlbumImageChanged { collection_id, .. }
            | CollectionEvent::CollectionUpdated { collection_id }
            | CollectionEvent::QueryFinished { collection_id, .. } => collection_id,
        }
    }
}

/// Broadcast channel of collection events. Clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// A bus buffering `capacity` events per subscriber; a subscriber that
    /// falls further behind gets `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish `event`, returning how many subscribers will see it. Fails
    /// only when nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Raw receiver of events published from now on.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

type Predicate = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver that skips events failing any of its predicates.
///
/// ```rust
/// use core_runtime::events::{CollectionEvent, CoreEvent, EventBus};
///
/// let bus = EventBus::new(16);
/// let device_queries = bus
///     .stream()
///     .for_collection("ipod")
///     .filter(|event| {
///         matches!(event, CoreEvent::Collection(CollectionEvent::QueryFinished { .. }))
///     });
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    predicates: Vec<Predicate>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            predicates: Vec::new(),
        }
    }

    /// Also require `predicate`. Filters accumulate.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Box::new(predicate));
        self
    }

    pub fn for_collection(self, collection_id: impl Into<String>) -> Self {
        let collection_id = collection_id.into();
        self.filter(move |event| event.collection_id() == collection_id)
    }

    /// Only events at `severity` or above.
    pub fn min_severity(self, severity: EventSeverity) -> Self {
        self.filter(move |event| event.severity() >= severity)
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.predicates.iter().all(|predicate| predicate(event))
    }

    /// Next accepted event.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` when `n` events were dropped for this
    /// subscriber, `RecvError::Closed` once every bus clone is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Next accepted event already buffered, `None` when there is none.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => return Some(Err(RecvError::Lagged(n))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            };
            if self.accepts(&event) {
                return Some(Ok(event));
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("predicates", &self.predicates.len())
            .finish()
    }
}
