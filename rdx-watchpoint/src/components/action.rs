//! Defines the reaction side of a watcher.

/// A boxed action, as stored by the watcher.
pub type BoxedAction = Box<dyn Action>;

/// The callback a watcher invokes each time its probe reports `true`.
///
/// Any `FnMut()` returning `()` or `Result<(), E>` is an action. Returning
/// [`Quit`](crate::error::Quit) ends monitoring; any other error is recorded
/// and, in repeat mode, polling continues.
pub trait Action: Send + 'static {
    /// Runs the action once.
    fn run(&mut self) -> anyhow::Result<()>;
}

/// Values an action closure may return.
pub trait ActionOutcome {
    /// Normalises the value into the action result.
    fn into_outcome(self) -> anyhow::Result<()>;
}

impl ActionOutcome for () {
    fn into_outcome(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E> ActionOutcome for Result<(), E>
where
    E: Into<anyhow::Error>,
{
    fn into_outcome(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

impl<F, R> Action for F
where
    F: FnMut() -> R + Send + 'static,
    R: ActionOutcome,
{
    fn run(&mut self) -> anyhow::Result<()> {
        self().into_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Quit;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_unit_closure_is_action() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut action = move || {
            counter.fetch_add(1, Ordering::SeqCst);
        };
        assert!(action.run().is_ok());
        assert!(action.run().is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_error_closure_is_action() {
        let mut action = || -> Result<(), std::fmt::Error> { Err(std::fmt::Error) };
        assert!(action.run().is_err());
    }

    #[test]
    fn test_quit_passes_through() {
        let mut action = || -> anyhow::Result<()> { Err(Quit::new("manual exit").into()) };
        let err = action.run().unwrap_err();
        assert!(err.downcast_ref::<Quit>().is_some());
    }
}
