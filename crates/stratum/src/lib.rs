//! Layered configuration loading.
//!
//! This crate populates an application's configuration struct from an
//! ordered list of sources:
//! - YAML, JSON and TOML documents from files, in-memory blocks or streams
//! - Environment variables bound to tagged struct fields
//! - `.env` files
//! - Custom sources, including plain closures
//!
//! Sources are applied in registration order and the last one to mention a
//! field wins. The whole list can be re-applied on a fixed interval or when
//! watched files change, for deployments that reload configuration live.
//!
//! # Example
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use stratum::{EnvTarget, Loader};
//! use std::time::Duration;
//!
//! #[derive(Debug, Default, Clone, Serialize, Deserialize, EnvTarget)]
//! struct Settings {
//!     #[env("HTTP_ADDR")]
//!     http_addr: String,
//!     #[env("LOG_LEVEL")]
//!     log_level: String,
//!     #[env("MAX_CONNECTIONS")]
//!     max_connections: u32,
//! }
//!
//! # async fn run() -> Result<(), stratum::ConfigError> {
//! let loader = Loader::with_reload(Settings::default(), Duration::from_secs(30))?;
//! loader
//!     .from_yaml("log_level: info\nmax_connections: 1024\n")
//!     .from_yaml_file("/etc/my-service/config.yaml")
//!     .from_env("MY_SERVICE_");
//!
//! // Reloads start one period from now; load once up front.
//! loader.process()?;
//!
//! let settings = loader.snapshot();
//! println!("listening on {}", settings.http_addr);
//!
//! loader.stop();
//! # Ok(())
//! # }
//! ```
//!
//! # Merging
//!
//! Document sources merge field by field through a generic value tree (see
//! [`merge`]), so the target needs `Serialize` and `Deserialize`. The
//! environment sources only need [`EnvTarget`], usually derived.
//!
//! # Logging
//!
//! The crate emits `tracing` events and never installs a subscriber.
//! Background reload failures are reported as `WARN` events and counted in
//! [`Loader::stats`].

extern crate self as stratum;

pub mod env;
mod error;
mod format;
mod loader;
pub mod merge;
mod source;
mod watcher;

pub use env::{DotenvSource, EnvLookup, EnvSource, EnvTarget, FromEnvValue, ProcessEnv};
pub use error::{ConfigError, ConfigResult};
pub use format::Format;
pub use loader::{Loader, ReloadStats};
pub use source::{ContentSource, FileSource, ReaderSource, Source};
pub use watcher::{ChangeEvent, ChangeKind, ChangeWatcher, WatchConfig};

pub use stratum_macros::EnvTarget;
