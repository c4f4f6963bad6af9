//! Parsing of shell input lines into commands.

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use watchpoint::common::TriggerMode;
use watchpoint::config::ConditionSpec;

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add {
        condition: ConditionSpec,
        mode: TriggerMode,
    },
    List,
    Start(usize),
    Stop(usize),
    Status(usize),
    Remove(usize),
    Events(bool),
    Help,
    Exit,
    Empty,
}

pub const HELP: &[(&str, &str)] = &[
    ("add [--repeat] timer <S>", "Fires every S seconds."),
    ("add [--repeat] file <PATH>", "Fires when PATH exists."),
    ("add [--repeat] idle <PATH> <S>", "Fires when PATH is unmodified for S seconds."),
    ("add [--repeat] dir <PATH>", "Fires when a new entry appears in PATH."),
    ("add [--repeat] port <HOST> <PORT>", "Fires when HOST:PORT accepts connections."),
    ("list", "Shows watchers and their handles."),
    ("start <#>", "Starts (or re-arms) a watcher."),
    ("stop <#>", "Stops a watcher and waits for its worker."),
    ("status <#>", "Shows state, counters and the last error."),
    ("remove <#>", "Stops and forgets a watcher."),
    ("events on|off", "Toggles printing of the event stream."),
    ("exit", "Stops every watcher and quits the shell."),
];

impl Command {
    /// Parses one input line.
    pub fn parse(line: &str) -> Result<Self> {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, rest)) = args.split_first() else {
            return Ok(Self::Empty);
        };
        match command {
            "add" => parse_add(rest),
            "list" => Ok(Self::List),
            "start" => Ok(Self::Start(handle(rest, "start")?)),
            "stop" => Ok(Self::Stop(handle(rest, "stop")?)),
            "status" => Ok(Self::Status(handle(rest, "status")?)),
            "remove" => Ok(Self::Remove(handle(rest, "remove")?)),
            "events" => match rest {
                ["on"] => Ok(Self::Events(true)),
                ["off"] => Ok(Self::Events(false)),
                _ => bail!("Usage: events on|off"),
            },
            "help" => Ok(Self::Help),
            "exit" | "quit" => Ok(Self::Exit),
            other => bail!("Unknown command: '{other}'. Type 'help'."),
        }
    }
}

fn parse_add(args: &[&str]) -> Result<Command> {
    let (mode, args) = match args.split_first() {
        Some((&"--repeat", rest)) => (TriggerMode::Repeat, rest),
        _ => (TriggerMode::Once, args),
    };
    let condition = match args {
        ["timer", seconds] => ConditionSpec::Every {
            seconds: seconds_arg(seconds)?,
        },
        ["file", path] => ConditionSpec::FileExists {
            path: PathBuf::from(path),
        },
        ["idle", path, seconds] => ConditionSpec::FileNotModifiedFor {
            path: PathBuf::from(path),
            seconds: seconds_arg(seconds)?,
        },
        ["dir", path] => ConditionSpec::NewFileInDirectory {
            path: PathBuf::from(path),
        },
        ["port", host, port] => ConditionSpec::PortOpen {
            host: (*host).to_owned(),
            port: port
                .parse()
                .with_context(|| format!("'{port}' is not a valid port number."))?,
        },
        _ => bail!("Usage: add [--repeat] <timer S | file P | idle P S | dir P | port H N>"),
    };
    Ok(Command::Add { condition, mode })
}

fn seconds_arg(raw: &str) -> Result<f64> {
    match raw.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(anyhow!("'{raw}' is not a valid number of seconds.")),
    }
}

fn handle(args: &[&str], command: &str) -> Result<usize> {
    match args {
        [raw] => raw
            .trim_start_matches('#')
            .parse()
            .map_err(|_| anyhow!("Handle must be a number (e.g., '0', '1').")),
        _ => bail!("Usage: {command} <HANDLE>"),
    }
}
