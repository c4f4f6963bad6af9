//! Contains common, primitive types shared across the crate.
//!
//! The lifecycle state and trigger mode are small `Copy` enums so they can be
//! read out of the watcher's lock and handed to callers without borrowing.

use crate::error::WatchError;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Poll period used when a probe does not declare its own interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of a [`Watcher`](crate::engine::Watcher).
///
/// ```text
/// Idle ──start──► Running ──stop──► Stopping ──join──► Stopped
///                    │                                    ▲  │
///                    └──── trigger (Once) / Quit ─────────┘  │
///                    ▲                                       │
///                    └────────────── start (re-arm) ─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchState {
    /// Configured (or not yet) but never started.
    Idle,
    /// A worker is polling the probe.
    Running,
    /// Stop has been requested; the worker has not been joined yet.
    Stopping,
    /// The worker has exited. The watcher may be started again.
    Stopped,
}

impl WatchState {
    /// Returns `true` while a worker thread may still be executing.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Whether a watcher stops after the first trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Invoke the action once, then stop automatically.
    #[default]
    Once,
    /// Keep polling after every trigger until stopped.
    Repeat,
}

/// Converts a number of seconds into a poll interval.
///
/// Zero is allowed (poll as fast as possible); negative, NaN and infinite
/// values are rejected.
pub fn interval_from_secs(seconds: f64) -> Result<Duration, WatchError> {
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        WatchError::configuration(format!(
            "interval must be a finite number of seconds >= 0, got {seconds}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_secs() {
        assert_eq!(interval_from_secs(0.25), Ok(Duration::from_millis(250)));
        assert_eq!(interval_from_secs(0.0), Ok(Duration::ZERO));
        assert!(interval_from_secs(-1.0).is_err());
        assert!(interval_from_secs(f64::NAN).is_err());
        assert!(interval_from_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn test_state_activity() {
        assert!(!WatchState::Idle.is_active());
        assert!(WatchState::Running.is_active());
        assert!(WatchState::Stopping.is_active());
        assert!(!WatchState::Stopped.is_active());
        assert_eq!(WatchState::Stopping.to_string(), "stopping");
    }

    #[test]
    fn test_default_mode_is_once() {
        assert_eq!(TriggerMode::default(), TriggerMode::Once);
    }
}
