//! # Watchpoint
//!
//! Poll a condition on a background worker and run an action when it becomes
//! true.
//!
//! Watchpoint is the small, careful core that sits under "wait until the port
//! is open, then ..." style automation. It owns the worker lifecycle so callers
//! do not have to: at most one worker per watcher, idempotent start and stop,
//! a stop that joins before returning, and failures in user callbacks that are
//! recorded instead of tearing the worker down.
//!
//! ## Core Concepts
//!
//! - **Probe**: a condition check (`FnMut() -> bool` or any [`Probe`]). It may
//!   block and may fail; failures count as "not met".
//! - **Action**: what to run when the probe reports `true`.
//! - **Watcher**: owns the worker thread and its lifecycle
//!   (`Idle → Running → Stopping → Stopped`, re-armable).
//! - **Trigger mode**: `Once` stops after the first trigger, `Repeat` keeps
//!   polling until stopped.
//! - **Scoped acquisition**: [`Watcher::scope`] returns a guard that stops and
//!   joins the worker on every exit path, panics included.
//! - **Events**: every watcher broadcasts [`WatchEvent`]s on a tokio channel.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use watchpoint::prelude::*;
//! use watchpoint::components::conditions::PortOpen;
//!
//! fn main() -> anyhow::Result<()> {
//!     let watcher = watchpoint::on(PortOpen::new("127.0.0.1", 5432))
//!         .then(|| println!("database is up"))?;
//!
//!     // Stops (and joins) automatically when the guard goes out of scope.
//!     let guard = watcher.scope()?;
//!     while guard.is_running() {
//!         std::thread::sleep(std::time::Duration::from_millis(100));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`Probe`]: components::probe::Probe
//! [`Watcher::scope`]: engine::Watcher::scope
//! [`WatchEvent`]: events::WatchEvent

pub const LIBRARY_NAME: &str = "Watchpoint";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod common;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;

pub use engine::{on, watch, watch_boxed, watch_with};

/// A prelude module for easy importing of the most common Watchpoint types.
pub mod prelude {
    pub use crate::common::{TriggerMode, WatchState, DEFAULT_INTERVAL};
    pub use crate::components::action::Action;
    pub use crate::components::probe::{Probe, ProbeExt};
    pub use crate::config::WatchpointConfig;
    pub use crate::engine::{WatchGuard, WatchOptions, Watcher};
    pub use crate::error::{Quit, WatchError};
    pub use crate::events::{StopReason, WatchEvent};
}
