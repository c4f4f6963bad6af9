//! The core watcher: lifecycle control and the background poll loop.
//!
//! A [`Watcher`] owns exactly one worker thread while it is running. The
//! worker polls the bound probe, invokes the bound action when the probe
//! reports `true`, and sleeps between polls on a condition variable so that
//! `stop()` is observed without waiting out a full interval.
//!
//! # Locking
//!
//! Two locks are involved:
//!
//! - the *control* lock holds the bindings and the worker's `JoinHandle`. It
//!   serializes `start`/`stop` and is held for the whole join, so concurrent
//!   `stop()` callers queue behind the one doing the join;
//! - the *lifecycle* lock guards `state` and the stop signal. Both sides read
//!   and write it; the worker never takes the control lock.
//!
//! Lock order is always control → lifecycle.
//!
//! # Limitations
//!
//! Cancellation is cooperative. A probe or action call that is in flight runs
//! to completion before the worker notices the stop signal, so a callback that
//! blocks forever also blocks `stop()`. Use [`Watcher::stop_timeout`] to bound
//! the wait.

use crate::common::{TriggerMode, WatchState, DEFAULT_INTERVAL};
use crate::components::action::{Action, BoxedAction};
use crate::components::probe::{BoxedProbe, Probe};
use crate::error::{Quit, WatchError};
use crate::events::{StopReason, WatchEvent};
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Construction-time options for a [`Watcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// Used in log lines, events and the worker thread's name.
    pub name: String,
    /// Stop after the first trigger, or keep polling.
    pub mode: TriggerMode,
    /// Poll period for probes that do not declare one.
    pub fallback_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            name: "watchpoint".to_owned(),
            mode: TriggerMode::Once,
            fallback_interval: DEFAULT_INTERVAL,
        }
    }
}

/// Probe and action, moved into the worker while it runs and handed back
/// through its `JoinHandle`.
struct Bindings {
    probe: BoxedProbe,
    action: BoxedAction,
}

struct Control {
    probe: Option<BoxedProbe>,
    action: Option<BoxedAction>,
    worker: Option<JoinHandle<Bindings>>,
}

struct Lifecycle {
    state: WatchState,
    stop_requested: bool,
    worker_exited: bool,
    worker_thread: Option<ThreadId>,
}

/// State visible to both the controlling side and the worker.
struct Shared {
    lifecycle: Mutex<Lifecycle>,
    signal: Condvar,
    last_error: Mutex<Option<WatchError>>,
    polls: AtomicU64,
    triggers: AtomicU64,
}

/// Polls a probe on a background thread and runs an action when it is true.
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use watchpoint::prelude::*;
///
/// # fn main() -> Result<(), WatchError> {
/// let ready = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&ready);
///
/// let watcher = watchpoint::on((move || flag.load(Ordering::SeqCst)).every(Duration::from_millis(10)))
///     .then(|| println!("ready!"))?;
///
/// watcher.scoped(|w| {
///     ready.store(true, Ordering::SeqCst);
///     while w.triggers() == 0 {
///         std::thread::sleep(Duration::from_millis(5));
///     }
/// })?;
/// assert_eq!(watcher.state(), WatchState::Stopped);
/// # Ok(())
/// # }
/// ```
pub struct Watcher {
    name: Arc<str>,
    mode: TriggerMode,
    fallback_interval: Duration,
    shared: Arc<Shared>,
    control: Mutex<Control>,
    events: broadcast::Sender<WatchEvent>,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

// Construction and configuration.
impl Watcher {
    /// Creates an unconfigured one-shot watcher with default options.
    pub fn new() -> Self {
        Self::with_options(WatchOptions::default())
    }

    /// Creates an unconfigured watcher that keeps polling after each trigger.
    pub fn repeating() -> Self {
        Self::with_options(WatchOptions {
            mode: TriggerMode::Repeat,
            ..WatchOptions::default()
        })
    }

    /// Creates an unconfigured watcher with explicit options.
    pub fn with_options(options: WatchOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name: Arc::from(options.name),
            mode: options.mode,
            fallback_interval: options.fallback_interval,
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle {
                    state: WatchState::Idle,
                    stop_requested: false,
                    worker_exited: true,
                    worker_thread: None,
                }),
                signal: Condvar::new(),
                last_error: Mutex::new(None),
                polls: AtomicU64::new(0),
                triggers: AtomicU64::new(0),
            }),
            control: Mutex::new(Control {
                probe: None,
                action: None,
                worker: None,
            }),
            events,
        }
    }

    /// Creates a configured watcher from already boxed bindings.
    pub fn from_parts(options: WatchOptions, probe: BoxedProbe, action: BoxedAction) -> Self {
        let mut watcher = Self::with_options(options);
        let control = watcher.control.get_mut();
        control.probe = Some(probe);
        control.action = Some(action);
        watcher
    }

    /// Binds the condition probe.
    ///
    /// # Errors
    ///
    /// [`WatchError::Configuration`] if a probe is already bound or the
    /// watcher has been started.
    pub fn on(mut self, probe: impl Probe) -> Result<Self, WatchError> {
        self.ensure_configurable()?;
        let control = self.control.get_mut();
        if control.probe.is_some() {
            return Err(WatchError::configuration(
                "Watchpoint 'on' handler has already been set",
            ));
        }
        control.probe = Some(Box::new(probe));
        Ok(self)
    }

    /// Binds the action (the `do` half of `on(..).do(..)`).
    ///
    /// # Errors
    ///
    /// [`WatchError::Configuration`] if an action is already bound or the
    /// watcher has been started.
    pub fn then(mut self, action: impl Action) -> Result<Self, WatchError> {
        self.ensure_configurable()?;
        let control = self.control.get_mut();
        if control.action.is_some() {
            return Err(WatchError::configuration(
                "Watchpoint 'do' handler has already been set",
            ));
        }
        control.action = Some(Box::new(action));
        Ok(self)
    }

    /// Renames the watcher.
    pub fn named(mut self, name: impl Into<String>) -> Result<Self, WatchError> {
        self.ensure_configurable()?;
        self.name = Arc::from(name.into());
        Ok(self)
    }

    /// Sets the trigger mode.
    pub fn with_mode(mut self, mode: TriggerMode) -> Result<Self, WatchError> {
        self.ensure_configurable()?;
        self.mode = mode;
        Ok(self)
    }

    /// Sets the poll period used when the probe declares none.
    pub fn with_fallback_interval(mut self, interval: Duration) -> Result<Self, WatchError> {
        self.ensure_configurable()?;
        self.fallback_interval = interval;
        Ok(self)
    }

    fn ensure_configurable(&self) -> Result<(), WatchError> {
        if self.shared.lifecycle.lock().state != WatchState::Idle {
            return Err(WatchError::configuration(
                "Watchpoint cannot be reconfigured after it has been started",
            ));
        }
        Ok(())
    }
}

// Lifecycle control.
impl Watcher {
    /// Starts the worker.
    ///
    /// Calling `start` on a running watcher is a no-op. A stopped watcher is
    /// re-armed: a fresh worker is spawned with the same probe and action.
    ///
    /// # Errors
    ///
    /// - [`WatchError::Configuration`] if the probe or action is missing.
    /// - [`WatchError::ShuttingDown`] if a previous worker is still exiting
    ///   after a timed-out [`stop_timeout`](Self::stop_timeout).
    /// - [`WatchError::Spawn`] if the worker thread cannot be created.
    pub fn start(&self) -> Result<(), WatchError> {
        let mut control = self.control.lock();
        match self.shared.lifecycle.lock().state {
            WatchState::Running => {
                debug!(watchpoint = %self.name, "start() ignored: already running");
                return Ok(());
            }
            WatchState::Stopping => return Err(WatchError::ShuttingDown),
            WatchState::Idle | WatchState::Stopped => {}
        }

        // A one-shot worker that finished on its own still holds the bindings.
        self.reclaim(&mut control);

        let (probe, action) = match (control.probe.take(), control.action.take()) {
            (Some(probe), Some(action)) => (probe, action),
            (probe, action) => {
                control.probe = probe;
                control.action = action;
                return Err(WatchError::configuration(
                    "Watchpoint 'on' and 'do' handlers must be configured before starting",
                ));
            }
        };

        let interval = probe.interval().unwrap_or(self.fallback_interval);
        if interval.is_zero() {
            warn!(watchpoint = %self.name, "Poll interval is zero; the worker will poll continuously and consume a full CPU core.");
        }

        {
            let mut lifecycle = self.shared.lifecycle.lock();
            lifecycle.state = WatchState::Running;
            lifecycle.stop_requested = false;
            lifecycle.worker_exited = false;
        }

        let worker = Worker {
            name: Arc::clone(&self.name),
            mode: self.mode,
            interval,
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            bindings: Bindings { probe, action },
        };
        let spawned = thread::Builder::new()
            .name(format!("watchpoint-{}", self.name))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                control.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                // The closure (and with it the bindings) is gone; allow rebinding.
                let mut lifecycle = self.shared.lifecycle.lock();
                lifecycle.state = WatchState::Idle;
                lifecycle.worker_exited = true;
                Err(WatchError::Spawn(e.to_string()))
            }
        }
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// After `stop` returns, the probe and action are never invoked again
    /// (until the watcher is restarted). Safe to call from any state, any
    /// number of times and from several threads at once; only one caller
    /// performs the join and the others wait for it.
    ///
    /// Called from inside the watcher's own probe or action, `stop` only
    /// requests the shutdown; the worker exits after the callback returns.
    pub fn stop(&self) {
        if self.request_stop_from_worker() {
            return;
        }
        let mut control = self.control.lock();
        if !self.signal_stop() {
            return;
        }
        self.reclaim(&mut control);
        self.finish_stop();
    }

    /// Like [`stop`](Self::stop), but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`WatchError::ShutdownTimeout`] if the worker is still inside a probe
    /// or action call when the timeout elapses. The watcher is left in
    /// [`WatchState::Stopping`]; a later `stop` completes the shutdown.
    pub fn stop_timeout(&self, timeout: Duration) -> Result<(), WatchError> {
        if self.request_stop_from_worker() {
            return Ok(());
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            // Too far out to represent; no different from waiting forever.
            self.stop();
            return Ok(());
        };
        let Some(mut control) = self.control.try_lock_until(deadline) else {
            return Err(WatchError::ShutdownTimeout(timeout));
        };
        if !self.signal_stop() {
            return Ok(());
        }
        if control.worker.is_some() {
            let mut lifecycle = self.shared.lifecycle.lock();
            self.shared
                .signal
                .wait_while_until(&mut lifecycle, |l| !l.worker_exited, deadline);
            if !lifecycle.worker_exited {
                warn!(watchpoint = %self.name, ?timeout, "Worker did not exit in time.");
                return Err(WatchError::ShutdownTimeout(timeout));
            }
        }
        self.reclaim(&mut control);
        self.finish_stop();
        Ok(())
    }

    /// Starts the watcher and returns a guard that stops it when dropped.
    ///
    /// The guard stops and joins the worker on every exit path, including
    /// `?` early returns and panics unwinding through the scope.
    ///
    /// # Errors
    ///
    /// Any error from [`start`](Self::start); nothing is started in that case.
    pub fn scope(&self) -> Result<WatchGuard<'_>, WatchError> {
        self.start()?;
        Ok(WatchGuard { watcher: self })
    }

    /// Runs `body` while the watcher is running, stopping it afterwards.
    ///
    /// # Errors
    ///
    /// Any error from [`start`](Self::start); `body` is not run in that case.
    pub fn scoped<T>(&self, body: impl FnOnce(&Watcher) -> T) -> Result<T, WatchError> {
        let guard = self.scope()?;
        Ok(body(&guard))
    }

    /// Returns `true` and flags the stop when called on the worker thread.
    fn request_stop_from_worker(&self) -> bool {
        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.worker_thread != Some(thread::current().id()) {
            return false;
        }
        // The worker finalizes the state itself when it leaves the loop.
        lifecycle.stop_requested = true;
        debug!(watchpoint = %self.name, "stop() requested from inside a callback");
        true
    }

    /// Raises the stop signal. Returns `false` if there is nothing to stop.
    fn signal_stop(&self) -> bool {
        let mut lifecycle = self.shared.lifecycle.lock();
        match lifecycle.state {
            WatchState::Idle => false,
            WatchState::Stopped => true,
            WatchState::Running | WatchState::Stopping => {
                lifecycle.state = WatchState::Stopping;
                lifecycle.stop_requested = true;
                self.shared.signal.notify_all();
                true
            }
        }
    }

    fn finish_stop(&self) {
        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.state != WatchState::Stopped {
            lifecycle.state = WatchState::Stopped;
            info!(watchpoint = %self.name, "Watchpoint stopped.");
        }
    }

    /// Joins a worker and takes its bindings back.
    fn reclaim(&self, control: &mut Control) {
        let Some(handle) = control.worker.take() else {
            return;
        };
        match handle.join() {
            Ok(bindings) => {
                control.probe = Some(bindings.probe);
                control.action = Some(bindings.action);
            }
            Err(_) => {
                self.shared.lifecycle.lock().worker_exited = true;
                warn!(watchpoint = %self.name, "Worker panicked outside a callback; bindings were lost.");
            }
        }
    }
}

// Inspection.
impl Watcher {
    /// The watcher's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The trigger mode fixed at construction.
    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    /// The poll period used for probes that declare none.
    pub fn fallback_interval(&self) -> Duration {
        self.fallback_interval
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WatchState {
        self.shared.lifecycle.lock().state
    }

    /// Shorthand for `state() == WatchState::Running`.
    pub fn is_running(&self) -> bool {
        self.state() == WatchState::Running
    }

    /// Returns `true` while a worker is inside its poll loop.
    ///
    /// Never blocks on `start` or `stop`, so it is safe to call from the
    /// watcher's own probe or action.
    pub fn is_worker_alive(&self) -> bool {
        !self.shared.lifecycle.lock().worker_exited
    }

    /// The most recent probe or action failure, if any.
    pub fn last_error(&self) -> Option<WatchError> {
        self.shared.last_error.lock().clone()
    }

    /// Number of probe invocations so far, across restarts.
    pub fn polls(&self) -> u64 {
        self.shared.polls.load(Ordering::SeqCst)
    }

    /// Number of action invocations so far, across restarts.
    pub fn triggers(&self) -> u64 {
        self.shared.triggers.load(Ordering::SeqCst)
    }

    /// Subscribes to this watcher's [`WatchEvent`] stream.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Keeps a watcher running for the lifetime of a scope.
///
/// Created by [`Watcher::scope`]. Dropping the guard calls
/// [`Watcher::stop`], which joins the worker.
#[must_use = "dropping the guard stops the watcher immediately"]
pub struct WatchGuard<'a> {
    watcher: &'a Watcher,
}

impl Deref for WatchGuard<'_> {
    type Target = Watcher;

    fn deref(&self) -> &Watcher {
        self.watcher
    }
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        self.watcher.stop();
    }
}

impl fmt::Debug for WatchGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WatchGuard").field(self.watcher).finish()
    }
}

/// A failure captured from a user callback.
enum Failure {
    Error(anyhow::Error),
    Panic(String),
}

impl Failure {
    fn is_quit(&self) -> bool {
        matches!(self, Self::Error(e) if e.downcast_ref::<Quit>().is_some())
    }

    fn into_probe_error(self) -> WatchError {
        let (message, panicked) = self.into_parts();
        WatchError::ProbeFailed { message, panicked }
    }

    fn into_action_error(self) -> WatchError {
        let (message, panicked) = self.into_parts();
        WatchError::ActionFailed { message, panicked }
    }

    fn into_parts(self) -> (String, bool) {
        match self {
            Self::Error(e) => (format!("{e:#}"), false),
            Self::Panic(message) => (message, true),
        }
    }
}

/// Runs a user callback, turning errors and panics into a [`Failure`].
fn contain<T>(callback: impl FnOnce() -> anyhow::Result<T>) -> Result<T, Failure> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Failure::Error(e)),
        Err(payload) => Err(Failure::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_owned()
    }
}

/// Everything the worker thread owns.
struct Worker {
    name: Arc<str>,
    mode: TriggerMode,
    interval: Duration,
    shared: Arc<Shared>,
    events: broadcast::Sender<WatchEvent>,
    bindings: Bindings,
}

impl Worker {
    fn run(mut self) -> Bindings {
        self.shared.lifecycle.lock().worker_thread = Some(thread::current().id());
        info!(
            watchpoint = %self.name,
            interval = ?self.interval,
            mode = ?self.mode,
            "Watchpoint worker started."
        );
        self.emit(WatchEvent::Started {
            name: self.name.to_string(),
            timestamp: Utc::now(),
        });

        let reason = self.poll_loop();

        {
            let mut lifecycle = self.shared.lifecycle.lock();
            // When stop() is driving the shutdown it finalizes the state after the join.
            if lifecycle.state == WatchState::Running {
                lifecycle.state = WatchState::Stopped;
            }
            lifecycle.worker_exited = true;
            lifecycle.worker_thread = None;
            self.shared.signal.notify_all();
        }
        self.emit(WatchEvent::Stopped {
            name: self.name.to_string(),
            reason,
            timestamp: Utc::now(),
        });
        info!(watchpoint = %self.name, ?reason, "Watchpoint worker finished.");
        self.bindings
    }

    fn poll_loop(&mut self) -> StopReason {
        loop {
            if self.shared.lifecycle.lock().stop_requested {
                return StopReason::Requested;
            }

            let poll = self.shared.polls.fetch_add(1, Ordering::SeqCst) + 1;
            trace!(watchpoint = %self.name, poll, "Polling probe.");
            let probe = &mut self.bindings.probe;
            let met = match contain(|| probe.check()) {
                Ok(met) => met,
                Err(failure) if failure.is_quit() => {
                    info!(watchpoint = %self.name, "Probe requested quit.");
                    return StopReason::Quit;
                }
                Err(failure) => {
                    self.record_probe_failure(failure.into_probe_error());
                    false
                }
            };

            if met {
                let count = self.shared.triggers.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(watchpoint = %self.name, count, "Condition met; running action.");
                self.emit(WatchEvent::Triggered {
                    name: self.name.to_string(),
                    count,
                    timestamp: Utc::now(),
                });

                let action = &mut self.bindings.action;
                match contain(|| action.run()) {
                    Ok(()) => {}
                    Err(failure) if failure.is_quit() => {
                        info!(watchpoint = %self.name, "Action requested quit.");
                        return StopReason::Quit;
                    }
                    Err(failure) => self.record_action_failure(failure.into_action_error()),
                }

                if self.mode == TriggerMode::Once {
                    return StopReason::Completed;
                }
            }

            if self.sleep() {
                return StopReason::Requested;
            }
        }
    }

    /// Waits one interval. Returns `true` if stop was requested meanwhile.
    fn sleep(&self) -> bool {
        let mut lifecycle = self.shared.lifecycle.lock();
        if !self.interval.is_zero() {
            self.shared
                .signal
                .wait_while_for(&mut lifecycle, |l| !l.stop_requested, self.interval);
        }
        lifecycle.stop_requested
    }

    fn record_probe_failure(&self, error: WatchError) {
        warn!(watchpoint = %self.name, %error, "Error executing 'on' handler; treating as not met.");
        *self.shared.last_error.lock() = Some(error.clone());
        self.emit(WatchEvent::ProbeFailed {
            name: self.name.to_string(),
            error,
            timestamp: Utc::now(),
        });
    }

    fn record_action_failure(&self, error: WatchError) {
        warn!(watchpoint = %self.name, %error, "Error executing 'do' handler.");
        *self.shared.last_error.lock() = Some(error.clone());
        self.emit(WatchEvent::ActionFailed {
            name: self.name.to_string(),
            error,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: WatchEvent) {
        self.events.send(event).ok();
    }
}

/// Creates a one-shot watcher bound to `probe`.
///
/// Finish the configuration with [`Watcher::then`].
pub fn on(probe: impl Probe) -> Watcher {
    let mut watcher = Watcher::new();
    watcher.control.get_mut().probe = Some(Box::new(probe));
    watcher
}

/// Creates a fully configured one-shot watcher.
pub fn watch(probe: impl Probe, action: impl Action) -> Watcher {
    watch_with(WatchOptions::default(), probe, action)
}

/// Creates a fully configured watcher with explicit options.
pub fn watch_with(options: WatchOptions, probe: impl Probe, action: impl Action) -> Watcher {
    Watcher::from_parts(options, Box::new(probe), Box::new(action))
}

/// Like [`watch_with`], for a probe and action that are already boxed, such
/// as those built from a [`ConditionSpec`](crate::config::ConditionSpec).
///
/// The boxed probe keeps its declared interval.
pub fn watch_boxed(options: WatchOptions, probe: BoxedProbe, action: BoxedAction) -> Watcher {
    Watcher::from_parts(options, probe, action)
}
