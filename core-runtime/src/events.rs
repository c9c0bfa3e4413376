//! # Event Bus System
//!
//! Streams sync lifecycle events to callers using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: [`SyncEvent`], whose serde representation *is* the wire
//!   format of the progress stream (one JSON object per line)
//! - **EventBus**: Central broadcast channel the orchestrator publishes into
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Wire Format
//!
//! ```text
//! {"type":"status","step":"preparation","status":"completed","message":"..."}
//! {"type":"progress","step":"conversion","file":"a.mp3","progress":50,"current":1,"total":2,"folder":"Pop"}
//! {"type":"error","file":"b.mp3","error":"..."}
//! {"type":"complete","message":"...","outputDir":"...","stats":{"filesConverted":1,"totalFiles":2,"foldersCreated":1}}
//! ```
//!
//! A fatal failure is not streamed: it is reported once as [`FatalError`],
//! `{"error":"..."}`.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, SyncEvent, SyncStep};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(SyncEvent::status(SyncStep::Preparation, "Device ready"))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! println!("{}", event.to_json_line().unwrap());
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the final [`SyncEvent::Complete`] still carries the totals.
//! - **`RecvError::Closed`**: All senders have been dropped.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Sync producers are slow (disk I/O and decoding), so a modest buffer is
/// enough for a stdout consumer to keep up.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Sync Events
// ============================================================================

/// Phase markers reported through [`SyncEvent::Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStep {
    /// Preconditions checked and folders prepared
    Preparation,
    /// Stale artifacts removed
    Deletion,
    /// Per-file conversion
    Conversion,
    /// Index built and verified in staging
    Index,
    /// Index copied to the device and re-verified
    Copy,
    /// Staged files removed
    Cleanup,
}

impl SyncStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::Preparation => "preparation",
            SyncStep::Deletion => "deletion",
            SyncStep::Conversion => "conversion",
            SyncStep::Index => "index",
            SyncStep::Copy => "copy",
            SyncStep::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status carried by phase markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
}

/// Summary counters of a successful sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Files converted during this run
    pub files_converted: usize,
    /// Files listed in the index after this run
    pub total_files: usize,
    /// Folder directories prepared on the device
    pub folders_created: usize,
}

/// Lifecycle events of one sync call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncEvent {
    /// Phase transition marker.
    Status {
        step: SyncStep,
        status: StepStatus,
        message: String,
    },
    /// Per-file conversion progress, emitted after every attempt.
    Progress {
        step: SyncStep,
        /// Display name of the file just attempted.
        file: String,
        /// Percentage of `toCreate` attempted so far (0-100).
        progress: u8,
        current: usize,
        total: usize,
        /// Folder name, empty for root-level files.
        folder: String,
    },
    /// Recoverable per-file failure; the sync continues.
    Error { file: String, error: String },
    /// Terminal success.
    #[serde(rename_all = "camelCase")]
    Complete {
        message: String,
        output_dir: String,
        stats: SyncStats,
    },
}

impl SyncEvent {
    /// Phase marker with `status: completed`.
    pub fn status(step: SyncStep, message: impl Into<String>) -> Self {
        SyncEvent::Status {
            step,
            status: StepStatus::Completed,
            message: message.into(),
        }
    }

    /// Conversion progress after attempt `current` of `total`.
    pub fn progress(
        file: impl Into<String>,
        folder: impl Into<String>,
        current: usize,
        total: usize,
    ) -> Self {
        let progress = if total > 0 {
            ((current as f64 / total as f64) * 100.0).round().min(100.0) as u8
        } else {
            100
        };

        SyncEvent::Progress {
            step: SyncStep::Conversion,
            file: file.into(),
            progress,
            current,
            total,
            folder: folder.into(),
        }
    }

    /// Recoverable per-file error.
    pub fn file_error(file: impl Into<String>, error: impl Into<String>) -> Self {
        SyncEvent::Error {
            file: file.into(),
            error: error.into(),
        }
    }

    /// Serializes the event as a single NDJSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Single non-streamed response for a fatal sync failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FatalError {
    pub error: String,
}

impl FatalError {
    pub fn new(error: impl fmt::Display) -> Self {
        Self {
            error: error.to_string(),
        }
    }

    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to sync events.
///
/// Uses `tokio::sync::broadcast` internally:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends, so a missing subscriber never stalls a sync
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are no active subscribers.
    pub fn emit(&self, event: SyncEvent) -> std::result::Result<usize, SendError<SyncEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
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
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&SyncEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, SyncEvent};
///
/// let event_bus = EventBus::new(100);
/// let errors_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, SyncEvent::Error { .. }));
/// ```
pub struct EventStream {
    receiver: Receiver<SyncEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<SyncEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&SyncEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> std::result::Result<SyncEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<std::result::Result<SyncEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
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

    /// Drains every event currently buffered.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Some(result) = self.try_recv() {
            match result {
                Ok(event) => events.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        events
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
