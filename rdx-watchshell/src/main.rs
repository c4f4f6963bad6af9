mod command;

use anyhow::Result;
use colored::Colorize;
use command::{Command, HELP};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use slotmap::{new_key_type, SlotMap};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;
use watchpoint::config::ConditionSpec;
use watchpoint::prelude::*;
use watchpoint::{LIBRARY_NAME, VERSION as LIB_VERSION};

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

const LOGO_TEXT: &str = r"
                 _       _                 _       _
 __      ____ _| |_ ___| |__  _ __   ___ (_)_ __ | |_
 \ \ /\ / / _` | __/ __| '_ \| '_ \ / _ \| | '_ \| __|
  \ V  V / (_| | || (__| | | | |_) | (_) | | | | | |_
   \_/\_/ \__,_|\__\___|_| |_| .__/ \___/|_|_| |_|\__|
                             |_|
";

new_key_type! {
    /// Slot key of a watcher owned by the shell.
    struct WatchId;
}

/// A watcher managed by the shell, with the text it was added with.
struct Entry {
    watcher: Watcher,
    label: String,
}

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct ShellHighlighter;

impl Highlighter for ShellHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", LOGO_TEXT.cyan());
    let rule = "-".repeat(60);
    println!("{}", rule.dimmed());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    let license_blurb = "
    This software is provided 'as is', without warranty of any kind.
    Distributed under the MIT OR Apache-2.0 license. Use at your own risk.
    ";
    println!("{}", license_blurb.dimmed());
    println!("{}", rule.dimmed());
}

/// The shell's state: watchers in a slot map, addressed by small handles.
struct Shell {
    watchers: SlotMap<WatchId, Entry>,
    handles: BTreeMap<usize, WatchId>,
    next_handle: usize,
    show_events: Arc<AtomicBool>,
}

impl Shell {
    fn new() -> Self {
        Self {
            watchers: SlotMap::with_key(),
            handles: BTreeMap::new(),
            next_handle: 0,
            show_events: Arc::new(AtomicBool::new(false)),
        }
    }

    fn entry(&self, handle: usize) -> Option<&Entry> {
        self.handles
            .get(&handle)
            .and_then(|id| self.watchers.get(*id))
    }

    fn add(&mut self, condition: ConditionSpec, mode: TriggerMode, label: String) -> Result<()> {
        let handle = self.next_handle;
        let probe = condition.build_probe(None)?;
        let message = format!("<-- [WATCH #{handle}] '{label}' fired!");
        let options = WatchOptions {
            name: format!("#{handle}"),
            mode,
            ..WatchOptions::default()
        };
        let watcher = watchpoint::watch_boxed(
            options,
            probe,
            Box::new(move || println!("{}", message.green())),
        );

        spawn_event_listener(watcher.subscribe(), Arc::clone(&self.show_events));
        watcher.start()?;

        let id = self.watchers.insert(Entry { watcher, label });
        self.handles.insert(handle, id);
        self.next_handle += 1;
        println!("--> Added watcher with handle: #{handle}");
        Ok(())
    }

    fn list(&self) {
        if self.handles.is_empty() {
            println!("No watchers. Try 'add timer 2'.");
            return;
        }
        println!("Watchers:");
        for (handle, id) in &self.handles {
            if let Some(entry) = self.watchers.get(*id) {
                println!(
                    "  #{:<3} {:<9} {:<7} {}",
                    handle,
                    entry.watcher.state().to_string(),
                    mode_label(entry.watcher.mode()),
                    entry.label
                );
            }
        }
    }

    fn status(&self, handle: usize) {
        let Some(entry) = self.entry(handle) else {
            return invalid_handle(handle);
        };
        let watcher = &entry.watcher;
        println!("Watcher #{handle}: {}", entry.label);
        println!("  state:     {}", watcher.state());
        println!("  mode:      {}", mode_label(watcher.mode()));
        println!("  polls:     {}", watcher.polls());
        println!("  triggers:  {}", watcher.triggers());
        match watcher.last_error() {
            Some(error) => println!("  last error: {}", error.to_string().red()),
            None => println!("  last error: none"),
        }
    }

    fn start(&self, handle: usize) {
        let Some(entry) = self.entry(handle) else {
            return invalid_handle(handle);
        };
        match entry.watcher.start() {
            Ok(()) => println!("--> Watcher #{handle} is {}.", entry.watcher.state()),
            Err(e) => println!("Error: {e}"),
        }
    }

    fn stop(&self, handle: usize) {
        let Some(entry) = self.entry(handle) else {
            return invalid_handle(handle);
        };
        entry.watcher.stop();
        println!("--> Watcher #{handle} stopped.");
    }

    fn remove(&mut self, handle: usize) {
        let Some(id) = self.handles.remove(&handle) else {
            return invalid_handle(handle);
        };
        // Dropping the watcher stops and joins its worker.
        if self.watchers.remove(id).is_some() {
            println!("--> Watcher #{handle} removed.");
        }
    }

    fn stop_all(&mut self) {
        for (_, entry) in self.watchers.drain() {
            entry.watcher.stop();
        }
        self.handles.clear();
    }
}

fn mode_label(mode: TriggerMode) -> &'static str {
    match mode {
        TriggerMode::Once => "once",
        TriggerMode::Repeat => "repeat",
    }
}

fn invalid_handle(handle: usize) {
    println!("Error: Invalid handle #{handle}. Use 'list' to see watchers.");
}

/// Prints a watcher's events while the shared flag is on.
fn spawn_event_listener(mut rx: broadcast::Receiver<WatchEvent>, show_events: Arc<AtomicBool>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if show_events.load(Ordering::Relaxed) {
                        println!("\n<-- [EVENT] {:?}\n>> ", event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn print_help() {
    println!("Available commands:");
    for (usage, description) in HELP {
        println!("  {:<36} - {}", usage, description);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let mut shell = Shell::new();
    let mut rl = Editor::new()?;
    rl.set_helper(Some(ShellHighlighter));

    info!("{} shell started.", LIBRARY_NAME);
    println!(
        "{} shell is running. Type 'help' for commands or 'exit' to quit.",
        LIBRARY_NAME.cyan()
    );

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(_) => {
                println!("Exiting watchshell...");
                break;
            }
        };
        rl.add_history_entry(line.as_str())?;

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match command {
            Command::Add { condition, mode } => {
                let label = line.trim().to_owned();
                if let Err(e) = shell.add(condition, mode, label) {
                    println!("Error: {e}");
                }
            }
            Command::List => shell.list(),
            Command::Start(handle) => shell.start(handle),
            Command::Stop(handle) => shell.stop(handle),
            Command::Status(handle) => shell.status(handle),
            Command::Remove(handle) => shell.remove(handle),
            Command::Events(on) => {
                shell.show_events.store(on, Ordering::Relaxed);
                let verb = if on { "Started" } else { "Stopped" };
                println!("--> {verb} printing the event stream.");
            }
            Command::Help => print_help(),
            Command::Exit => break,
            Command::Empty => {}
        }
    }

    shell.stop_all();
    Ok(())
}
