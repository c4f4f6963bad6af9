//! Defines the configuration structures for declaring watches in a file.
//!
//! These structs are deserialized with `serde` from a TOML file (plus
//! `WATCHPOINT_*` environment overrides) through the `config` crate, so a set
//! of watches can be described outside the application code:
//!
//! ```toml
//! default_interval = 1.0
//! shutdown_timeout = 5.0
//!
//! [[watches]]
//! name = "db-up"
//! mode = "once"
//! message = "database is accepting connections"
//! [watches.condition]
//! kind = "port_open"
//! host = "127.0.0.1"
//! port = 5432
//! ```

use crate::common::{interval_from_secs, TriggerMode, DEFAULT_INTERVAL};
use crate::components::action::BoxedAction;
use crate::components::conditions::{
    Every, FileExists, FileNotModifiedFor, NewFileInDirectory, PortOpen,
};
use crate::components::probe::{BoxedProbe, Probe, ProbeExt};
use crate::engine::{WatchOptions, Watcher};
use crate::error::WatchError;
use anyhow::{bail, Context};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::info;

/// Prefix for environment overrides, e.g. `WATCHPOINT_DEFAULT_INTERVAL`.
pub const ENV_PREFIX: &str = "WATCHPOINT";

/// The top-level configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WatchpointConfig {
    /// Poll period in seconds for watches that set no interval and whose
    /// condition declares none.
    #[serde(default = "default_interval_secs")]
    pub default_interval: f64,

    /// Upper bound in seconds on waiting for each worker at shutdown.
    /// Unbounded when absent.
    #[serde(default)]
    pub shutdown_timeout: Option<f64>,

    /// The watches to run.
    #[serde(default)]
    pub watches: Vec<WatchSpec>,
}

/// One watch: a condition, a trigger mode and what to do when it fires.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WatchSpec {
    /// Name used in logs and events.
    pub name: String,

    /// The condition to poll.
    pub condition: ConditionSpec,

    /// `"once"` (default) or `"repeat"`.
    #[serde(default)]
    pub mode: TriggerMode,

    /// Poll period in seconds, overriding the condition's default.
    #[serde(default)]
    pub interval: Option<f64>,

    /// Logged when the condition is met.
    #[serde(default)]
    pub message: Option<String>,

    /// Program and arguments run when the condition is met.
    #[serde(default)]
    pub command: Vec<String>,
}

/// The built-in conditions, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionSpec {
    /// Fires every `seconds`.
    Every { seconds: f64 },
    /// Fires while `path` exists.
    FileExists { path: PathBuf },
    /// Fires once `path` has not been modified for `seconds`.
    FileNotModifiedFor { path: PathBuf, seconds: f64 },
    /// Fires when a new entry appears in the directory at `path`.
    NewFileInDirectory { path: PathBuf },
    /// Fires when `host:port` accepts TCP connections.
    PortOpen { host: String, port: u16 },
}

fn default_interval_secs() -> f64 {
    DEFAULT_INTERVAL.as_secs_f64()
}

impl Default for WatchpointConfig {
    fn default() -> Self {
        Self {
            default_interval: default_interval_secs(),
            shutdown_timeout: None,
            watches: Vec::new(),
        }
    }
}

impl WatchpointConfig {
    /// Loads the configuration from an optional file plus the environment.
    ///
    /// The file format is inferred from its extension.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Parses a TOML document, ignoring the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// The validated `default_interval`.
    pub fn default_poll_interval(&self) -> Result<Duration, WatchError> {
        interval_from_secs(self.default_interval)
    }

    /// The validated `shutdown_timeout`.
    pub fn shutdown_wait(&self) -> Result<Option<Duration>, WatchError> {
        self.shutdown_timeout.map(interval_from_secs).transpose()
    }

    /// Builds one configured, unstarted watcher per watch.
    pub fn build_watchers(&self) -> Result<Vec<Watcher>, WatchError> {
        let fallback = self.default_poll_interval()?;
        self.watches
            .iter()
            .map(|spec| spec.build_watcher(fallback))
            .collect()
    }
}

impl WatchSpec {
    /// Builds a configured, unstarted watcher for this watch.
    pub fn build_watcher(&self, fallback_interval: Duration) -> Result<Watcher, WatchError> {
        let interval = self.interval.map(interval_from_secs).transpose()?;
        let probe = self.condition.build_probe(interval)?;
        let options = WatchOptions {
            name: self.name.clone(),
            mode: self.mode,
            fallback_interval,
        };
        Ok(Watcher::from_parts(options, probe, self.build_action()))
    }

    fn build_action(&self) -> BoxedAction {
        let name = self.name.clone();
        let message = self.message.clone();
        let command = self.command.clone();
        Box::new(move || -> anyhow::Result<()> {
            match &message {
                Some(message) => info!(watchpoint = %name, "{message}"),
                None => info!(watchpoint = %name, "Condition met."),
            }
            let Some((program, args)) = command.split_first() else {
                return Ok(());
            };
            let status = Command::new(program)
                .args(args)
                .status()
                .with_context(|| format!("failed to run `{program}`"))?;
            if !status.success() {
                bail!("`{}` exited with {status}", command.join(" "));
            }
            Ok(())
        })
    }
}

impl ConditionSpec {
    /// Builds the probe, optionally overriding its poll interval.
    pub fn build_probe(&self, interval: Option<Duration>) -> Result<BoxedProbe, WatchError> {
        fn boxed<P: Probe>(probe: P, interval: Option<Duration>) -> BoxedProbe {
            match interval {
                Some(interval) => Box::new(probe.every(interval)),
                None => Box::new(probe),
            }
        }

        let probe = match self {
            Self::Every { seconds } => boxed(Every::new(interval_from_secs(*seconds)?), interval),
            Self::FileExists { path } => boxed(FileExists::new(path), interval),
            Self::FileNotModifiedFor { path, seconds } => boxed(
                FileNotModifiedFor::new(path, interval_from_secs(*seconds)?),
                interval,
            ),
            Self::NewFileInDirectory { path } => boxed(NewFileInDirectory::new(path), interval),
            Self::PortOpen { host, port } => boxed(PortOpen::new(host.as_str(), *port), interval),
        };
        Ok(probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = include_str!("../watchpoint.example.toml");

    #[test]
    fn test_example_config_parses() {
        let config = WatchpointConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.default_poll_interval(), Ok(Duration::from_secs(1)));
        assert_eq!(config.shutdown_wait(), Ok(Some(Duration::from_secs(5))));
        assert_eq!(config.watches.len(), 3);

        let db = &config.watches[0];
        assert_eq!(db.name, "db-up");
        assert_eq!(db.mode, TriggerMode::Once);
        assert_eq!(
            db.condition,
            ConditionSpec::PortOpen {
                host: "127.0.0.1".to_owned(),
                port: 5432
            }
        );
        assert_eq!(config.watches[1].mode, TriggerMode::Repeat);
    }

    #[test]
    fn test_defaults_apply() {
        let config = WatchpointConfig::from_toml_str("").unwrap();
        assert_eq!(config, WatchpointConfig::default());
        assert!(config.build_watchers().unwrap().is_empty());
    }

    #[test]
    fn test_build_watchers_uses_names_and_modes() {
        let toml = r#"
            default_interval = 0.25

            [[watches]]
            name = "tick"
            mode = "repeat"
            [watches.condition]
            kind = "every"
            seconds = 2

            [[watches]]
            name = "marker"
            interval = 0.1
            [watches.condition]
            kind = "file_exists"
            path = "/tmp/marker"
        "#;
        let config = WatchpointConfig::from_toml_str(toml).unwrap();
        let watchers = config.build_watchers().unwrap();

        assert_eq!(watchers[0].name(), "tick");
        assert_eq!(watchers[0].mode(), TriggerMode::Repeat);
        assert_eq!(watchers[0].fallback_interval(), Duration::from_millis(250));
        assert_eq!(watchers[1].mode(), TriggerMode::Once);
    }

    #[test]
    fn test_negative_interval_is_rejected() {
        let toml = r#"
            [[watches]]
            name = "bad"
            interval = -1.0
            [watches.condition]
            kind = "file_exists"
            path = "/tmp/x"
        "#;
        let config = WatchpointConfig::from_toml_str(toml).unwrap();
        let err = config.build_watchers().unwrap_err();
        assert!(matches!(err, WatchError::Configuration(_)));
    }

    #[test]
    fn test_unknown_condition_kind_fails_to_parse() {
        let toml = r#"
            [[watches]]
            name = "bad"
            [watches.condition]
            kind = "moon_phase"
        "#;
        assert!(WatchpointConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_condition_interval_override() {
        let spec = ConditionSpec::FileExists {
            path: PathBuf::from("/tmp/x"),
        };
        let probe = spec.build_probe(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(probe.interval(), Some(Duration::from_millis(10)));

        let probe = spec.build_probe(None).unwrap();
        assert_eq!(probe.interval(), Some(Duration::from_secs(1)));
    }
}
