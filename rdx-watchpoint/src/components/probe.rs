//! Defines the condition side of a watcher.
//!
//! A probe is anything that can answer "is the condition met yet?". Plain
//! closures work out of the box: any `FnMut() -> bool` or
//! `FnMut() -> Result<bool, E>` is a [`Probe`]. Arguments are bound by
//! capturing them in the closure.

use std::time::Duration;

/// A boxed probe, as stored by the watcher.
pub type BoxedProbe = Box<dyn Probe>;

/// A condition checked repeatedly by a watcher's worker.
///
/// `check` may block (stat a file, open a socket) and may fail; a failure is
/// treated as "not met" for that poll. Returning [`Quit`](crate::error::Quit)
/// instead ends monitoring, for probes that run out of things to report. The
/// probe is only ever called from one worker thread at a time.
pub trait Probe: Send + 'static {
    /// Evaluates the condition once.
    fn check(&mut self) -> anyhow::Result<bool>;

    /// The poll period this probe wants, if any.
    ///
    /// When `None`, the watcher falls back to its own default (one second
    /// unless configured otherwise).
    fn interval(&self) -> Option<Duration> {
        None
    }
}

/// Values a probe closure may return.
pub trait ProbeOutcome {
    /// Normalises the value into the probe result.
    fn into_outcome(self) -> anyhow::Result<bool>;
}

impl ProbeOutcome for bool {
    fn into_outcome(self) -> anyhow::Result<bool> {
        Ok(self)
    }
}

impl<E> ProbeOutcome for Result<bool, E>
where
    E: Into<anyhow::Error>,
{
    fn into_outcome(self) -> anyhow::Result<bool> {
        self.map_err(Into::into)
    }
}

impl<F, R> Probe for F
where
    F: FnMut() -> R + Send + 'static,
    R: ProbeOutcome,
{
    fn check(&mut self) -> anyhow::Result<bool> {
        self().into_outcome()
    }
}

/// A probe with an explicit poll interval. Created by [`ProbeExt::every`].
#[derive(Debug, Clone)]
pub struct Paced<P> {
    inner: P,
    interval: Duration,
}

impl<P> Paced<P> {
    /// Returns the wrapped probe.
    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: Probe> Probe for Paced<P> {
    fn check(&mut self) -> anyhow::Result<bool> {
        self.inner.check()
    }

    fn interval(&self) -> Option<Duration> {
        Some(self.interval)
    }
}

/// Extension methods available on every probe.
pub trait ProbeExt: Probe + Sized {
    /// Polls this probe every `interval` instead of its default.
    ///
    /// ```
    /// use std::time::Duration;
    /// use watchpoint::components::probe::{Probe, ProbeExt};
    ///
    /// let probe = (|| true).every(Duration::from_millis(10));
    /// assert_eq!(probe.interval(), Some(Duration::from_millis(10)));
    /// ```
    fn every(self, interval: Duration) -> Paced<Self> {
        Paced {
            inner: self,
            interval,
        }
    }
}

impl<P: Probe> ProbeExt for P {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_closure_is_probe() {
        let mut calls = 0;
        let mut probe = move || {
            calls += 1;
            calls > 1
        };
        assert!(!probe.check().unwrap());
        assert!(probe.check().unwrap());
        assert_eq!(Probe::interval(&probe), None);
    }

    #[test]
    fn test_fallible_closure_is_probe() {
        let mut probe = || -> std::io::Result<bool> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
        };
        let err = probe.check().unwrap_err();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_every_overrides_interval() {
        let mut probe = (|| true).every(Duration::from_millis(20));
        assert_eq!(probe.interval(), Some(Duration::from_millis(20)));
        assert!(probe.check().unwrap());
    }
}
