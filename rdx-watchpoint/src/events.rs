//! Defines the lifecycle events broadcast by a watcher.
//!
//! Every [`Watcher`](crate::engine::Watcher) owns a `tokio::sync::broadcast`
//! channel. Subscribers receive these events in order; sending never blocks
//! the worker and is silently skipped when nobody is listening.

use crate::error::WatchError;
use chrono::{DateTime, Utc};

/// Why a worker finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called (directly, by a scope guard, or on drop).
    Requested,
    /// A one-shot watcher fired its action.
    Completed,
    /// The probe or the action returned [`Quit`](crate::error::Quit).
    Quit,
}

/// Events related to the lifecycle of a single watcher.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Fired when a worker begins polling.
    Started {
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// Fired each time the probe reports `true`, before the action runs.
    Triggered {
        name: String,
        count: u64,
        timestamp: DateTime<Utc>,
    },
    /// Fired when the probe errors or panics.
    ProbeFailed {
        name: String,
        error: WatchError,
        timestamp: DateTime<Utc>,
    },
    /// Fired when the action errors or panics.
    ActionFailed {
        name: String,
        error: WatchError,
        timestamp: DateTime<Utc>,
    },
    /// Fired once when a worker leaves its poll loop.
    Stopped {
        name: String,
        reason: StopReason,
        timestamp: DateTime<Utc>,
    },
}

impl WatchEvent {
    /// Name of the watcher that produced this event.
    pub fn name(&self) -> &str {
        match self {
            Self::Started { name, .. }
            | Self::Triggered { name, .. }
            | Self::ProbeFailed { name, .. }
            | Self::ActionFailed { name, .. }
            | Self::Stopped { name, .. } => name,
        }
    }

    /// When the event was produced.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Started { timestamp, .. }
            | Self::Triggered { timestamp, .. }
            | Self::ProbeFailed { timestamp, .. }
            | Self::ActionFailed { timestamp, .. }
            | Self::Stopped { timestamp, .. } => *timestamp,
        }
    }
}
