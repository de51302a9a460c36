//! File watching for configuration reloads.
//!
//! [`ChangeWatcher`] turns `notify` events for a set of paths into debounced
//! [`ChangeEvent`]s. [`Loader::watch_files`](crate::Loader::watch_files) runs
//! one in the background and re-applies the sources on each event.
//!
//! ```no_run
//! use stratum::{ChangeWatcher, WatchConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), stratum::ConfigError> {
//! let config = WatchConfig::new()
//!     .with_debounce(Duration::from_millis(250))
//!     .watch_path("config/")?
//!     .watch_extensions(&["yaml", "json"]);
//!
//! let mut watcher = ChangeWatcher::new(config)?;
//! while let Some(event) = watcher.next().await {
//!     println!("{} changed", event.path.display());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{ConfigError, ConfigResult};

/// Kind of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// File was created.
    Created,
    /// File was modified.
    Modified,
    /// File was removed.
    Removed,
}

impl ChangeKind {
    fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(_) | EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                Some(Self::Modified)
            }
            EventKind::Remove(_) => Some(Self::Removed),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        }
    }
}

/// A change to a watched path.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Path that changed.
    pub path: PathBuf,
    /// Kind of change.
    pub kind: ChangeKind,
    /// When the change was observed.
    pub timestamp: Instant,
}

/// What to watch and how to filter events.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    paths: Vec<PathBuf>,
    debounce: Duration,
    recursive: bool,
    extensions: HashSet<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            debounce: Duration::from_millis(500),
            recursive: true,
            extensions: HashSet::new(),
        }
    }
}

impl WatchConfig {
    /// Create an empty configuration with a 500ms debounce.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debounce duration.
    ///
    /// Repeated changes to the same path within this duration count once.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Add a file or directory to watch.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` with `NotFound` if the path does not exist.
    pub fn watch_path(mut self, path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("path does not exist: {}", path.display()),
            )));
        }
        self.paths.push(path.to_path_buf());
        Ok(self)
    }

    /// Add a path to watch if it exists; skip it otherwise.
    #[must_use]
    pub fn watch_path_optional(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.exists() {
            self.paths.push(path.to_path_buf());
        }
        self
    }

    /// Whether directories are watched recursively. Default is true.
    #[must_use]
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Only report files with these extensions. Empty means all files.
    #[must_use]
    pub fn watch_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// The watched paths.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// The debounce duration.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

/// Debounced change notifications for a set of paths.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Event>,
    config: WatchConfig,
    last_event: Option<(PathBuf, Instant)>,
}

impl ChangeWatcher {
    /// Start watching the paths in `config`.
    ///
    /// # Errors
    ///
    /// Fails if `config` has no paths or a path cannot be watched.
    pub fn new(config: WatchConfig) -> ConfigResult<Self> {
        if config.paths.is_empty() {
            return Err(ConfigError::invalid_config(
                "no paths configured for file watcher",
            ));
        }

        let (tx, rx) = mpsc::channel(64);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                // Dropped when full: one pending event already triggers a reload.
                let _ = tx.try_send(event);
            }
        })
        .map_err(|e| ConfigError::invalid_config(format!("failed to create file watcher: {e}")))?;

        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        for path in &config.paths {
            watcher.watch(path, mode).map_err(|e| {
                ConfigError::Io(io::Error::other(format!(
                    "failed to watch path {}: {e}",
                    path.display()
                )))
            })?;
        }

        Ok(Self {
            _watcher: watcher,
            rx,
            config,
            last_event: None,
        })
    }

    /// Wait for the next change that passes filtering and debouncing.
    ///
    /// Returns `None` once the underlying watcher shuts down.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            let event = self.rx.recv().await?;
            if let Some(change) = self.accept(&event, Instant::now()) {
                return Some(change);
            }
        }
    }

    /// Return a pending change without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        while let Ok(event) = self.rx.try_recv() {
            if let Some(change) = self.accept(&event, Instant::now()) {
                return Some(change);
            }
        }
        None
    }

    fn accept(&mut self, event: &Event, now: Instant) -> Option<ChangeEvent> {
        let kind = ChangeKind::from_event(&event.kind)?;
        // Renames list the destination last.
        let path = event
            .paths
            .iter()
            .rev()
            .find(|path| self.has_watched_extension(path))?;

        if let Some((last_path, last_time)) = &self.last_event {
            if last_path == path && now.duration_since(*last_time) < self.config.debounce {
                return None;
            }
        }
        self.last_event = Some((path.clone(), now));

        Some(ChangeEvent {
            path: path.clone(),
            kind,
            timestamp: now,
        })
    }

    fn has_watched_extension(&self, path: &Path) -> bool {
        if self.config.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.config.extensions.contains(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind, RenameMode};
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    fn modified(path: &str) -> Event {
        event(EventKind::Modify(ModifyKind::Any), Path::new(path))
    }

    fn watcher_for(dir: &TempDir, config: WatchConfig) -> ChangeWatcher {
        ChangeWatcher::new(config.watch_path(dir.path()).unwrap()).unwrap()
    }

    #[test]
    fn test_change_kind_from_event() {
        assert_eq!(
            ChangeKind::from_event(&EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            ChangeKind::from_event(&EventKind::Modify(ModifyKind::Data(DataChange::Any))),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            ChangeKind::from_event(&EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Removed)
        );
        assert_eq!(
            ChangeKind::from_event(&EventKind::Access(AccessKind::Close(AccessMode::Write))),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            ChangeKind::from_event(&EventKind::Access(AccessKind::Any)),
            None
        );
    }

    #[test]
    fn test_default_config() {
        let config = WatchConfig::default();
        assert!(config.paths().is_empty());
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert!(config.recursive);
        assert!(config.extensions.is_empty());
    }

    #[test]
    fn test_watch_path_not_found() {
        let err = WatchConfig::new().watch_path("/nonexistent/path").unwrap_err();
        match err {
            ConfigError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("Expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn test_watch_path_optional_not_found() {
        let config = WatchConfig::new().watch_path_optional("/nonexistent/path");
        assert!(config.paths().is_empty());
    }

    #[test]
    fn test_new_without_paths() {
        match ChangeWatcher::new(WatchConfig::new()) {
            Err(ConfigError::InvalidConfig { message }) => {
                assert!(message.contains("no paths configured"));
            }
            Err(other) => panic!("Expected InvalidConfig, got {other:?}"),
            Ok(_) => panic!("Expected an error"),
        }
    }

    #[test]
    fn test_accept_filters_extensions() {
        let dir = TempDir::new().unwrap();
        let mut watcher = watcher_for(&dir, WatchConfig::new().watch_extensions(&["yaml"]));
        let now = Instant::now();

        assert!(watcher.accept(&modified("/cfg/readme.txt"), now).is_none());
        assert!(watcher.accept(&modified("/cfg/Makefile"), now).is_none());
        assert!(watcher.accept(&modified("/cfg/app.yaml"), now).is_some());
    }

    #[test]
    fn test_accept_debounces_same_path() {
        let dir = TempDir::new().unwrap();
        let mut watcher = watcher_for(
            &dir,
            WatchConfig::new().with_debounce(Duration::from_millis(100)),
        );
        let start = Instant::now();

        assert!(watcher.accept(&modified("/cfg/app.yaml"), start).is_some());
        assert!(watcher
            .accept(&modified("/cfg/app.yaml"), start + Duration::from_millis(10))
            .is_none());
        assert!(watcher
            .accept(&modified("/cfg/other.yaml"), start + Duration::from_millis(20))
            .is_some());
        assert!(watcher
            .accept(&modified("/cfg/app.yaml"), start + Duration::from_millis(200))
            .is_some());
    }

    #[test]
    fn test_accept_uses_rename_destination() {
        let dir = TempDir::new().unwrap();
        let mut watcher = watcher_for(&dir, WatchConfig::new().watch_extensions(&["yaml"]));
        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/cfg/.app.yaml.swp"))
            .add_path(PathBuf::from("/cfg/app.yaml"));

        let change = watcher.accept(&rename, Instant::now()).unwrap();
        assert_eq!(change.path, PathBuf::from("/cfg/app.yaml"));
        assert_eq!(change.kind, ChangeKind::Modified);
    }

    #[test]
    fn test_accept_debounces_by_destination_path() {
        let dir = TempDir::new().unwrap();
        let mut watcher = watcher_for(
            &dir,
            WatchConfig::new().with_debounce(Duration::from_secs(60)),
        );
        let start = Instant::now();
        let rename = |tmp: &str| {
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(PathBuf::from(tmp))
                .add_path(PathBuf::from("/cfg/app.yaml"))
        };

        assert!(watcher.accept(&rename("/cfg/tmp1"), start).is_some());
        assert!(watcher
            .accept(&rename("/cfg/tmp2"), start + Duration::from_millis(5))
            .is_none());
    }

    #[test]
    fn test_accept_ignores_access_events() {
        let dir = TempDir::new().unwrap();
        let mut watcher = watcher_for(&dir, WatchConfig::new());
        let access = event(EventKind::Access(AccessKind::Any), Path::new("/cfg/app.yaml"));
        assert!(watcher.accept(&access, Instant::now()).is_none());
    }

    #[tokio::test]
    async fn test_file_change_detection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.yaml");
        fs::write(&path, "port: 1\n").unwrap();

        let mut watcher = watcher_for(
            &dir,
            WatchConfig::new().with_debounce(Duration::from_millis(10)),
        );
        sleep(Duration::from_millis(100)).await;

        fs::write(&path, "port: 2\n").unwrap();

        let event = timeout(Duration::from_secs(10), watcher.next())
            .await
            .expect("no change event within 10s")
            .expect("watcher closed");
        assert_eq!(event.path.file_name(), path.file_name());
    }
}
