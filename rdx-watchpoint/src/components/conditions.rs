//! Built-in probes for common conditions.
//!
//! Each probe is a plain boolean check with its own default poll interval.
//! Override the interval with [`ProbeExt::every`](super::probe::ProbeExt::every).
//! File and socket handles opened by a check are released before it returns.

use super::probe::Probe;
use anyhow::{bail, Context};
use std::collections::HashSet;
use std::ffi::OsString;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::trace;

/// Default poll interval for the filesystem and network probes.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Default TCP connect timeout used by [`PortOpen`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// True each time `period` has elapsed since the last time it was true.
///
/// The first period is measured from construction. Polled every `period`.
#[derive(Debug, Clone)]
pub struct Every {
    period: Duration,
    last_fired: Instant,
}

impl Every {
    /// Creates a new `Every` timer.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_fired: Instant::now(),
        }
    }
}

impl Probe for Every {
    fn check(&mut self) -> anyhow::Result<bool> {
        if self.last_fired.elapsed() >= self.period {
            self.last_fired = Instant::now();
            return Ok(true);
        }
        Ok(false)
    }

    fn interval(&self) -> Option<Duration> {
        Some(self.period)
    }
}

/// True while a path exists.
#[derive(Debug, Clone)]
pub struct FileExists {
    path: PathBuf,
}

impl FileExists {
    /// Creates a probe for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Probe for FileExists {
    fn check(&mut self) -> anyhow::Result<bool> {
        self.path
            .try_exists()
            .with_context(|| format!("cannot stat {}", self.path.display()))
    }

    fn interval(&self) -> Option<Duration> {
        Some(DEFAULT_CHECK_INTERVAL)
    }
}

/// True once a file has gone unmodified for at least `duration`.
///
/// A missing file is never "unmodified"; the check reports `false` for it.
#[derive(Debug, Clone)]
pub struct FileNotModifiedFor {
    path: PathBuf,
    duration: Duration,
}

impl FileNotModifiedFor {
    /// Creates a probe for `path` with the required quiet `duration`.
    pub fn new(path: impl Into<PathBuf>, duration: Duration) -> Self {
        Self {
            path: path.into(),
            duration,
        }
    }
}

impl Probe for FileNotModifiedFor {
    fn check(&mut self) -> anyhow::Result<bool> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(e).with_context(|| format!("cannot stat {}", self.path.display()))
            }
        };
        let modified = metadata.modified()?;
        // A modification time in the future counts as "just modified".
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        trace!(path = %self.path.display(), ?age, "file age");
        Ok(age >= self.duration)
    }

    fn interval(&self) -> Option<Duration> {
        Some(DEFAULT_CHECK_INTERVAL)
    }
}

/// True when an entry appears in a directory that was not there before.
///
/// The first check takes a snapshot and reports `false`. Each later check
/// compares against the previous snapshot, so a given new entry is reported
/// once. Fails if the path is not a directory.
#[derive(Debug, Clone)]
pub struct NewFileInDirectory {
    dir: PathBuf,
    known: Option<HashSet<OsString>>,
}

impl NewFileInDirectory {
    /// Creates a probe watching `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            known: None,
        }
    }

    fn scan(dir: &Path) -> anyhow::Result<HashSet<OsString>> {
        if !dir.is_dir() {
            bail!("not a directory: {}", dir.display());
        }
        let mut names = HashSet::new();
        for entry in std::fs::read_dir(dir)? {
            names.insert(entry?.file_name());
        }
        Ok(names)
    }
}

impl Probe for NewFileInDirectory {
    fn check(&mut self) -> anyhow::Result<bool> {
        let current = Self::scan(&self.dir)?;
        let appeared = match &self.known {
            Some(known) => current.iter().any(|name| !known.contains(name)),
            None => false,
        };
        self.known = Some(current);
        Ok(appeared)
    }

    fn interval(&self) -> Option<Duration> {
        Some(DEFAULT_CHECK_INTERVAL)
    }
}

/// True when a TCP connection to `host:port` succeeds.
///
/// Refused or timed-out connections report `false`; a host that does not
/// resolve is an error. The connection is closed immediately.
#[derive(Debug, Clone)]
pub struct PortOpen {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl PortOpen {
    /// Creates a probe for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the per-address connect timeout. Zero is raised to one millisecond.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout.max(Duration::from_millis(1));
        self
    }
}

impl Probe for PortOpen {
    fn check(&mut self) -> anyhow::Result<bool> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve {}:{}", self.host, self.port))?;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(_stream) => return Ok(true),
                Err(e) => trace!(%addr, error = %e, "port closed"),
            }
        }
        Ok(false)
    }

    fn interval(&self) -> Option<Duration> {
        Some(DEFAULT_CHECK_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::net::TcpListener;
    use std::thread::sleep;
    use tempfile::TempDir;

    fn create_temp_dir() -> TempDir {
        TempDir::new().expect("Failed to create temp directory")
    }

    #[test]
    fn test_every_fires_after_period() {
        let mut timer = Every::new(Duration::from_millis(50));
        assert!(!timer.check().unwrap());
        sleep(Duration::from_millis(60));
        assert!(timer.check().unwrap());
        assert!(!timer.check().unwrap());
        assert_eq!(timer.interval(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_file_exists_tracks_path() {
        let dir = create_temp_dir();
        let path = dir.path().join("watched_file.txt");
        let mut probe = FileExists::new(&path);

        assert!(!probe.check().unwrap());
        fs::write(&path, "x").unwrap();
        assert!(probe.check().unwrap());
        fs::remove_file(&path).unwrap();
        assert!(!probe.check().unwrap());
    }

    #[test]
    fn test_file_not_modified_for() {
        let dir = create_temp_dir();
        let path = dir.path().join("test.log");
        fs::write(&path, "a").unwrap();
        let mut probe = FileNotModifiedFor::new(&path, Duration::from_millis(200));

        assert!(!probe.check().unwrap());
        sleep(Duration::from_millis(300));
        assert!(probe.check().unwrap());
        fs::write(&path, "b").unwrap();
        assert!(!probe.check().unwrap());
    }

    #[test]
    fn test_file_not_modified_for_missing_file() {
        let dir = create_temp_dir();
        let mut probe = FileNotModifiedFor::new(dir.path().join("nope.txt"), Duration::ZERO);
        assert!(!probe.check().unwrap());
    }

    #[test]
    fn test_new_file_in_directory() {
        let dir = create_temp_dir();
        let mut probe = NewFileInDirectory::new(dir.path());

        assert!(!probe.check().unwrap());
        fs::write(dir.path().join("test_file.txt"), "").unwrap();
        assert!(probe.check().unwrap());
        assert!(!probe.check().unwrap());
    }

    #[test]
    fn test_new_file_in_missing_directory_fails() {
        let mut probe = NewFileInDirectory::new("/this/path/absolutely/does/not/exist");
        let err = probe.check().unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_port_open() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut probe =
            PortOpen::new("127.0.0.1", port).with_connect_timeout(Duration::from_millis(200));

        assert!(probe.check().unwrap());
        drop(listener);
        assert!(!probe.check().unwrap());
    }
}
