//! Error types for the Watchpoint library.
//!
//! Configuration mistakes surface synchronously from the builder and
//! lifecycle methods. Probe and action failures never cross the worker
//! boundary; they are captured as [`WatchError::ProbeFailed`] or
//! [`WatchError::ActionFailed`] and exposed through
//! [`Watcher::last_error`](crate::engine::Watcher::last_error) and the event
//! stream.

use std::time::Duration;

/// Errors reported by a [`Watcher`](crate::engine::Watcher).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// The watcher is misconfigured or was reconfigured after starting.
    #[error("watchpoint configuration error: {0}")]
    Configuration(String),

    /// `start` was called while a previous worker is still shutting down.
    #[error("watchpoint worker is still shutting down")]
    ShuttingDown,

    /// The probe returned an error or panicked. Treated as "not met".
    #[error("'on' probe failed: {message}")]
    ProbeFailed {
        /// Rendered error or panic payload.
        message: String,
        /// `true` if the probe panicked rather than returning an error.
        panicked: bool,
    },

    /// The action returned an error or panicked.
    #[error("'do' action failed: {message}")]
    ActionFailed {
        /// Rendered error or panic payload.
        message: String,
        /// `true` if the action panicked rather than returning an error.
        panicked: bool,
    },

    /// The worker did not exit within the allotted time.
    #[error("watchpoint worker did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    /// The worker thread could not be spawned.
    #[error("failed to spawn watchpoint worker: {0}")]
    Spawn(String),
}

impl WatchError {
    /// Creates a [`WatchError::Configuration`] error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Returns `true` for failures captured from user callbacks.
    ///
    /// These never stop a watcher on their own.
    pub const fn is_callback_failure(&self) -> bool {
        matches!(self, Self::ProbeFailed { .. } | Self::ActionFailed { .. })
    }
}

/// Returned by a probe or an action to end monitoring gracefully.
///
/// The worker recognises this error (through `anyhow` downcasting), stops
/// polling and finishes with [`StopReason::Quit`](crate::events::StopReason::Quit).
/// It is not recorded as a failure.
///
/// ```
/// use watchpoint::error::Quit;
///
/// let action = || -> anyhow::Result<()> {
///     Err(Quit::new("seen enough").into())
/// };
/// # let _ = action;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("watchpoint quit: {reason}")]
pub struct Quit {
    reason: String,
}

impl Quit {
    /// Creates a new `Quit` with a human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The reason given when quitting.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_display() {
        let err = WatchError::configuration("Watchpoint 'on' handler has already been set");
        assert_eq!(
            err.to_string(),
            "watchpoint configuration error: Watchpoint 'on' handler has already been set"
        );
        assert!(!err.is_callback_failure());
    }

    #[test]
    fn test_callback_failures() {
        let probe = WatchError::ProbeFailed {
            message: "disk gone".to_owned(),
            panicked: false,
        };
        let action = WatchError::ActionFailed {
            message: "boom".to_owned(),
            panicked: true,
        };
        assert!(probe.is_callback_failure());
        assert!(action.is_callback_failure());
        assert!(action.to_string().contains("boom"));
    }

    #[test]
    fn test_quit_downcasts_through_anyhow() {
        let err: anyhow::Error = Quit::new("done").into();
        let quit = err.downcast_ref::<Quit>();
        assert_eq!(quit.map(Quit::reason), Some("done"));
    }

    #[test]
    fn test_shutdown_timeout_display() {
        let err = WatchError::ShutdownTimeout(Duration::from_millis(50));
        assert!(err.to_string().contains("50ms"));
    }
}
