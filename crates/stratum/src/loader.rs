//! The configuration loader.
//!
//! This module provides [`Loader`], which owns the target and an ordered list
//! of sources, applies them on demand and optionally keeps re-applying them in
//! the background.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::env::{DotenvSource, EnvLookup, EnvSource, EnvTarget};
use crate::source::{ContentSource, FileSource, ReaderSource, Source};
use crate::watcher::{ChangeWatcher, WatchConfig};
use crate::{ConfigError, ConfigResult, Format};

/// Counters for background reloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadStats {
    /// Background reloads that applied every source.
    pub reloads: u64,
    /// Background reloads that stopped on an error.
    pub failures: u64,
}

/// State shared with background reload tasks.
struct Shared<T> {
    target: Arc<RwLock<T>>,
    sources: Mutex<Vec<Box<dyn Source<T>>>>,
    reloads: AtomicU64,
    failures: AtomicU64,
}

impl<T> Shared<T> {
    fn process(&self) -> ConfigResult<()> {
        let mut sources = self.sources.lock();
        let mut target = self.target.write();

        for (index, source) in sources.iter_mut().enumerate() {
            if let Err(e) = source.to_target(&mut *target) {
                debug!(index, source = %source.describe(), error = %e, "configuration source failed");
                return Err(e);
            }
            debug!(index, source = %source.describe(), "applied configuration source");
        }

        Ok(())
    }
}

impl<T: Send + Sync + 'static> Shared<T> {
    async fn reload(self: &Arc<Self>, trigger: &'static str) {
        let shared = Arc::clone(self);
        match tokio::task::spawn_blocking(move || shared.process()).await {
            Ok(Ok(())) => {
                self.reloads.fetch_add(1, Ordering::Relaxed);
                debug!(trigger, "configuration reloaded");
            }
            Ok(Err(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(trigger, error = %e, "configuration reload failed");
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(trigger, error = %e, "configuration reload task panicked");
            }
        }
    }
}

/// A background task and the sender that stops it.
struct BackgroundTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    fn signal(&self) {
        // Full means a stop is already pending; closed means the task is gone.
        let _ = self.shutdown_tx.try_send(());
    }
}

#[derive(Default)]
struct Background {
    interval: Option<BackgroundTask>,
    watch: Option<BackgroundTask>,
}

impl Background {
    fn take_all(&mut self) -> Vec<BackgroundTask> {
        self.interval.take().into_iter().chain(self.watch.take()).collect()
    }
}

/// Loads configuration into a target from an ordered list of sources.
///
/// Sources are applied in the order they were added; a value written by a
/// later source replaces the value an earlier source wrote to the same field.
///
/// # Example
///
/// ```no_run
/// use serde::{Deserialize, Serialize};
/// use stratum::{EnvTarget, Loader};
///
/// #[derive(Debug, Default, Serialize, Deserialize, EnvTarget)]
/// struct Settings {
///     #[env("HTTP_ADDR")]
///     http_addr: String,
///     #[env("WORKERS")]
///     workers: usize,
/// }
///
/// # fn main() -> Result<(), stratum::ConfigError> {
/// let loader = Loader::new(Settings::default());
/// loader
///     .from_yaml_file("config/base.yaml")
///     .from_optional_file("config/local.toml")
///     .from_env("APP_");
/// loader.process()?;
///
/// println!("listening on {}", loader.read().http_addr);
/// # Ok(())
/// # }
/// ```
///
/// # Reloading
///
/// [`Loader::with_reload`] and [`Loader::start_reload`] re-run
/// [`Loader::process`] on a fixed period; [`Loader::watch_files`] re-runs it
/// when watched files change. Both need a running tokio runtime, run the
/// sources on the blocking pool, and log failures instead of returning them.
/// [`Loader::stop`] ends all background work, as does dropping the loader.
pub struct Loader<T> {
    shared: Arc<Shared<T>>,
    background: Mutex<Background>,
}

impl<T> Loader<T> {
    /// Create a loader that writes into `target`.
    pub fn new(target: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                target: Arc::new(RwLock::new(target)),
                sources: Mutex::new(Vec::new()),
                reloads: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            background: Mutex::new(Background::default()),
        }
    }

    /// Apply every registered source to the target, in registration order.
    ///
    /// Stops at the first source that fails and returns its error. Values
    /// written by the sources before it stay applied.
    pub fn process(&self) -> ConfigResult<()> {
        self.shared.process()
    }

    /// Register a source. Custom sources and closures go through here.
    pub fn add_source(&self, source: impl Source<T> + 'static) -> &Self {
        let mut sources = self.shared.sources.lock();
        debug!(index = sources.len(), source = %source.describe(), "registered configuration source");
        sources.push(Box::new(source));
        self
    }

    /// Remove every registered source. The target is left as it is.
    pub fn reset_sources(&self) {
        self.shared.sources.lock().clear();
        debug!("cleared configuration sources");
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.shared.sources.lock().len()
    }

    /// Descriptions of the registered sources, in application order.
    pub fn describe_sources(&self) -> Vec<String> {
        self.shared
            .sources
            .lock()
            .iter()
            .map(|s| s.describe())
            .collect()
    }

    /// Shared handle to the target, usable after the loader is dropped.
    pub fn target(&self) -> Arc<RwLock<T>> {
        Arc::clone(&self.shared.target)
    }

    /// Read access to the target.
    ///
    /// Holding the guard blocks [`Loader::process`] and background reloads.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.shared.target.read()
    }

    /// A copy of the current configuration.
    pub fn snapshot(&self) -> T
    where
        T: Clone,
    {
        self.shared.target.read().clone()
    }

    /// Counters for background reloads.
    pub fn stats(&self) -> ReloadStats {
        ReloadStats {
            reloads: self.shared.reloads.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
        }
    }

    /// Whether interval reloading is active.
    pub fn is_reloading(&self) -> bool {
        self.background.lock().interval.is_some()
    }

    /// Whether file watching is active.
    pub fn is_watching(&self) -> bool {
        self.background.lock().watch.is_some()
    }

    /// Stop interval reloading and file watching.
    ///
    /// Does not wait for an in-flight reload to finish and never touches the
    /// target. Calling it again, or on a loader without background work,
    /// does nothing.
    pub fn stop(&self) {
        let tasks = self.background.lock().take_all();
        if tasks.is_empty() {
            return;
        }
        for task in &tasks {
            task.signal();
        }
        info!("stopped configuration reloading");
    }

    /// Stop background work and wait for it to wind down.
    pub async fn shutdown(&self) {
        let tasks = self.background.lock().take_all();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.signal();
            let _ = task.handle.await;
        }
        info!("configuration reloading shut down");
    }
}

impl<T> Loader<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Read values from a YAML file on every [`Loader::process`].
    pub fn from_yaml_file(&self, path: impl Into<PathBuf>) -> &Self {
        self.add_source(FileSource::yaml(path))
    }

    /// Read values from a YAML block.
    pub fn from_yaml(&self, content: impl Into<Vec<u8>>) -> &Self {
        self.add_source(ContentSource::new(content, Format::Yaml))
    }

    /// Read values from a YAML stream. The stream is drained once.
    pub fn from_yaml_reader(&self, reader: impl Read + Send + 'static) -> &Self {
        self.add_source(ReaderSource::new(reader, Format::Yaml))
    }

    /// Read values from a JSON file on every [`Loader::process`].
    pub fn from_json_file(&self, path: impl Into<PathBuf>) -> &Self {
        self.add_source(FileSource::json(path))
    }

    /// Read values from a JSON block.
    pub fn from_json(&self, content: impl Into<Vec<u8>>) -> &Self {
        self.add_source(ContentSource::new(content, Format::Json))
    }

    /// Read values from a JSON stream. The stream is drained once.
    pub fn from_json_reader(&self, reader: impl Read + Send + 'static) -> &Self {
        self.add_source(ReaderSource::new(reader, Format::Json))
    }

    /// Read values from a TOML file on every [`Loader::process`].
    pub fn from_toml_file(&self, path: impl Into<PathBuf>) -> &Self {
        self.add_source(FileSource::toml(path))
    }

    /// Read values from a TOML block.
    pub fn from_toml(&self, content: impl Into<Vec<u8>>) -> &Self {
        self.add_source(ContentSource::new(content, Format::Toml))
    }

    /// Read values from a TOML stream. The stream is drained once.
    pub fn from_toml_reader(&self, reader: impl Read + Send + 'static) -> &Self {
        self.add_source(ReaderSource::new(reader, Format::Toml))
    }

    /// Read values from a file whose format follows its extension.
    pub fn from_file(&self, path: impl Into<PathBuf>) -> &Self {
        self.add_source(FileSource::new(path))
    }

    /// Like [`Loader::from_file`], but a missing file is skipped.
    pub fn from_optional_file(&self, path: impl Into<PathBuf>) -> &Self {
        self.add_source(FileSource::new(path).optional())
    }
}

impl<T: EnvTarget> Loader<T> {
    /// Read tagged fields from process environment variables named
    /// `prefix + tag`.
    pub fn from_env(&self, prefix: impl Into<String>) -> &Self {
        self.add_source(EnvSource::new(prefix))
    }

    /// Read tagged fields from an explicit set of variables.
    pub fn from_env_vars(
        &self,
        prefix: impl Into<String>,
        vars: impl EnvLookup + Send + 'static,
    ) -> &Self {
        self.add_source(EnvSource::with_vars(prefix, vars))
    }

    /// Read tagged fields from a `.env` file.
    pub fn from_dotenv(&self, path: impl Into<PathBuf>, prefix: impl Into<String>) -> &Self {
        self.add_source(DotenvSource::new(path, prefix))
    }
}

impl<T: Send + Sync + 'static> Loader<T> {
    /// Create a loader that re-applies its sources every `period`.
    ///
    /// Returns immediately. The first reload happens one `period` after the
    /// call; call [`Loader::process`] for an initial load.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime or for a zero `period`.
    pub fn with_reload(target: T, period: Duration) -> ConfigResult<Self> {
        let loader = Self::new(target);
        loader.start_reload(period)?;
        Ok(loader)
    }

    /// Start re-applying the sources every `period`.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime, for a zero `period`, or when interval
    /// reloading is already running.
    pub fn start_reload(&self, period: Duration) -> ConfigResult<()> {
        if period.is_zero() {
            return Err(ConfigError::invalid_config(
                "reload period must be greater than zero",
            ));
        }
        let runtime = current_runtime()?;

        let mut background = self.background.lock();
        if background.interval.is_some() {
            return Err(ConfigError::reload_error("interval reload already running"));
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let shared = Arc::clone(&self.shared);

        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => shared.reload("interval").await,
                    _ = shutdown_rx.recv() => {
                        debug!("interval reload received shutdown signal");
                        break;
                    }
                }
            }
        });

        background.interval = Some(BackgroundTask {
            shutdown_tx,
            handle,
        });
        info!(period = ?period, "started interval configuration reload");
        Ok(())
    }

    /// Re-apply the sources whenever a path in `config` changes.
    ///
    /// The reload runs one debounce period after the first change of a
    /// burst, so a file that is still being written is read once complete.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime, when `config` has no paths, when the
    /// paths cannot be watched, or when watching is already running.
    pub fn watch_files(&self, config: WatchConfig) -> ConfigResult<()> {
        let runtime = current_runtime()?;

        let mut background = self.background.lock();
        if background.watch.is_some() {
            return Err(ConfigError::reload_error("file watching already running"));
        }

        let paths = config.paths().len();
        let settle = config.debounce();
        let mut watcher = ChangeWatcher::new(config)?;
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let shared = Arc::clone(&self.shared);

        let handle = runtime.spawn(async move {
            loop {
                tokio::select! {
                    event = watcher.next() => match event {
                        Some(event) => {
                            debug!(path = %event.path.display(), kind = ?event.kind, "watched configuration changed");
                            // Let the writer finish, then fold the burst into one reload.
                            tokio::time::sleep(settle).await;
                            while watcher.try_next().is_some() {}
                            shared.reload("file change").await;
                        }
                        None => break,
                    },
                    _ = shutdown_rx.recv() => {
                        debug!("file watch received shutdown signal");
                        break;
                    }
                }
            }
        });

        background.watch = Some(BackgroundTask {
            shutdown_tx,
            handle,
        });
        info!(paths, "started watching configuration files");
        Ok(())
    }

    /// Watch the files behind the registered file and dotenv sources.
    ///
    /// Files that do not exist yet are skipped.
    ///
    /// # Errors
    ///
    /// See [`Loader::watch_files`]; fails as well when no registered source
    /// reads an existing file.
    pub fn watch_sources(&self, debounce: Duration) -> ConfigResult<()> {
        let config = self
            .source_paths()
            .into_iter()
            .fold(WatchConfig::new().with_debounce(debounce), |config, path| {
                config.watch_path_optional(path)
            });
        self.watch_files(config.recursive(false))
    }

    fn source_paths(&self) -> Vec<PathBuf> {
        self.shared
            .sources
            .lock()
            .iter()
            .filter_map(|s| s.path().map(Path::to_path_buf))
            .collect()
    }
}

impl<T> Drop for Loader<T> {
    fn drop(&mut self) {
        for task in self.background.get_mut().take_all() {
            task.signal();
        }
    }
}

impl<T> fmt::Debug for Loader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("sources", &self.describe_sources())
            .field("reloading", &self.is_reloading())
            .field("watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}

fn current_runtime() -> ConfigResult<Handle> {
    Handle::try_current()
        .map_err(|_| ConfigError::reload_error("background reloading requires a tokio runtime"))
}
