//! # Event Bus System
//!
//! Broadcasts typed cache telemetry using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: `CacheEvent` (reads served from disk, content removal)
//!   and `PrecacheEvent` (background population progress)
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   emit    ┌───────────┐
//! │ CacheDataSource ├──────────>│           │
//! │   (listener)    │           │ EventBus  │   subscribe   ┌────────────┐
//! └─────────────────┘           │ (broadcast├──────────────>│ Subscriber │
//! ┌─────────────────┐   emit    │  channel) │               └────────────┘
//! │  CoreService    ├──────────>│           │
//! │  (precache)     │           └───────────┘
//! └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Cache(CacheEvent::CachedBytesRead {
//!         cache_size_bytes: 4096,
//!         cached_bytes_read: 1024,
//!     }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Cache(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting with no subscribers returns an error; publishers treat that as
//! "nobody is listening" and ignore it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Cache read/write telemetry
    Cache(CacheEvent),
    /// Precache job progress
    Precache(PrecacheEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Precache(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Precache(PrecacheEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Precache(PrecacheEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Precache(PrecacheEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::ContentRemoved { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A reader session closed after serving bytes from disk.
    CachedBytesRead {
        /// Total bytes held by the cache when the session closed.
        cache_size_bytes: u64,
        /// Bytes the session read from cached spans.
        cached_bytes_read: u64,
    },
    /// All spans and the content length of a key were dropped.
    ContentRemoved { key: String },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::CachedBytesRead { .. } => "Bytes served from cache",
            CacheEvent::ContentRemoved { .. } => "Cached content removed",
        }
    }
}

// ============================================================================
// Precache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PrecacheEvent {
    Started {
        key: String,
        /// Bytes to cache, `None` when the resource length is unknown.
        total_bytes: Option<u64>,
        /// Bytes already on disk before the job started.
        cached_bytes: u64,
    },
    Progress {
        key: String,
        total_bytes: Option<u64>,
        cached_bytes: u64,
    },
    Completed {
        key: String,
        /// Bytes fetched from upstream by this job.
        downloaded_bytes: u64,
    },
    Failed {
        key: String,
        message: String,
    },
    Cancelled {
        key: String,
    },
}

impl PrecacheEvent {
    fn description(&self) -> &str {
        match self {
            PrecacheEvent::Started { .. } => "Precache started",
            PrecacheEvent::Progress { .. } => "Precache progress",
            PrecacheEvent::Completed { .. } => "Precache completed",
            PrecacheEvent::Failed { .. } => "Precache failed",
            PrecacheEvent::Cancelled { .. } => "Precache cancelled",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            PrecacheEvent::Started { key, .. }
            | PrecacheEvent::Progress { key, .. }
            | PrecacheEvent::Completed { key, .. }
            | PrecacheEvent::Failed { key, .. }
            | PrecacheEvent::Cancelled { key } => key,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus yields another producer on the same channel; each
/// `subscribe()` creates an independent receiver that sees future events only.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let precache_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Precache(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
