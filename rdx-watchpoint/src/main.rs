use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use watchpoint::prelude::*;
use watchpoint::{LIBRARY_NAME, VERSION};

const DEFAULT_CONFIG: &str = "watchpoint.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging. RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // 2. Load the watches.
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = WatchpointConfig::load(Some(&path))
        .with_context(|| format!("failed to load {}", path.display()))?;
    let shutdown_wait = config.shutdown_wait()?;
    let watchers = config.build_watchers()?;
    if watchers.is_empty() {
        warn!("No watches configured in {}; nothing to do.", path.display());
        return Ok(());
    }
    info!(
        "{} v{} running {} watch(es) from {}",
        LIBRARY_NAME,
        VERSION,
        watchers.len(),
        path.display()
    );

    // 3. Subscribe before starting so no event is missed.
    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
    for (index, watcher) in watchers.iter().enumerate() {
        spawn_event_listener(index, watcher.subscribe(), finished_tx.clone());
    }
    drop(finished_tx);

    // 4. Start everything.
    for watcher in &watchers {
        watcher.start()?;
    }

    // 5. Run until the one-shot watches are done, or Ctrl+C.
    let mut completion = Completion::new(watchers.iter().map(Watcher::mode));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("Ctrl+C received; shutting down.");
                break;
            }
            index = finished_rx.recv() => match index {
                Some(index) => {
                    if completion.finished(index) {
                        info!("All watches have finished.");
                        break;
                    }
                }
                None => break,
            }
        }
    }

    // 6. Stop (and join) every worker off the async runtime. The watchers come
    // back out so a stuck one is never dropped, since dropping joins.
    let (stopped, watchers) = tokio::task::spawn_blocking(move || {
        let stopped = stop_all(&watchers, shutdown_wait);
        (stopped, watchers)
    })
    .await?;
    if !stopped {
        error!("Some watchers did not shut down in time; exiting anyway.");
        std::process::exit(1);
    }
    drop(watchers);
    Ok(())
}

/// Tracks which watches `watchdev` still waits for.
///
/// One-shot watches must all finish. Repeat watches only end by quitting, so
/// they are waited for only when there is no one-shot watch at all.
#[derive(Debug)]
struct Completion {
    once_pending: HashSet<usize>,
    running: HashSet<usize>,
    has_once: bool,
}

impl Completion {
    fn new(modes: impl IntoIterator<Item = TriggerMode>) -> Self {
        let mut once_pending = HashSet::new();
        let mut running = HashSet::new();
        for (index, mode) in modes.into_iter().enumerate() {
            running.insert(index);
            if mode == TriggerMode::Once {
                once_pending.insert(index);
            }
        }
        Self {
            has_once: !once_pending.is_empty(),
            once_pending,
            running,
        }
    }

    /// Records that watch `index` stopped. Returns `true` once nothing is left
    /// to wait for.
    fn finished(&mut self, index: usize) -> bool {
        self.once_pending.remove(&index);
        self.running.remove(&index);
        if self.has_once {
            self.once_pending.is_empty()
        } else {
            self.running.is_empty()
        }
    }
}

/// Prints a watcher's events and reports when its worker finishes.
fn spawn_event_listener(
    index: usize,
    mut rx: broadcast::Receiver<WatchEvent>,
    finished: mpsc::UnboundedSender<usize>,
) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    info!("[EVENT] => {:?}", event);
                    if matches!(event, WatchEvent::Stopped { .. }) {
                        finished.send(index).ok();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener lagged behind.");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Stops every watcher. Returns `false` if any of them timed out.
fn stop_all(watchers: &[Watcher], timeout: Option<Duration>) -> bool {
    let mut clean = true;
    for watcher in watchers {
        match timeout {
            Some(timeout) => {
                if let Err(e) = watcher.stop_timeout(timeout) {
                    error!(watchpoint = watcher.name(), "{e}");
                    clean = false;
                }
            }
            None => watcher.stop(),
        }
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_modes_wait_only_for_one_shots() {
        let mut completion =
            Completion::new([TriggerMode::Once, TriggerMode::Repeat, TriggerMode::Once]);
        assert!(!completion.finished(0));
        assert!(completion.finished(2));
    }

    #[test]
    fn test_repeat_only_waits_for_every_quit() {
        let mut completion = Completion::new([TriggerMode::Repeat, TriggerMode::Repeat]);
        assert!(!completion.finished(1));
        assert!(completion.finished(0));
    }

    #[test]
    fn test_repeat_quitting_early_does_not_finish_one_shots() {
        let mut completion = Completion::new([TriggerMode::Repeat, TriggerMode::Once]);
        assert!(!completion.finished(0));
        assert!(completion.finished(1));
    }
}
