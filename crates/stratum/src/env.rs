//! Environment variable binding.
//!
//! Fields are bound by name: a struct deriving [`EnvTarget`] tags each field
//! with the variable that populates it, and [`EnvSource`] looks up
//! `prefix + tag` for every tagged field.
//!
//! ```
//! use stratum::{EnvSource, EnvTarget, Source};
//! use std::collections::HashMap;
//!
//! #[derive(Default, EnvTarget)]
//! struct Settings {
//!     #[env("PORT")]
//!     port: u16,
//!     #[env("DEBUG")]
//!     debug: bool,
//!     #[env(skip)]
//!     internal: String,
//! }
//!
//! let vars = HashMap::from([
//!     ("APP_PORT".to_string(), "9000".to_string()),
//!     ("APP_DEBUG".to_string(), "T".to_string()),
//! ]);
//!
//! let mut settings = Settings::default();
//! EnvSource::with_vars("APP_", vars).to_target(&mut settings).unwrap();
//! assert_eq!(settings.port, 9000);
//! assert!(settings.debug);
//! ```
//!
//! A variable that is absent leaves its field untouched. A variable that is
//! present but empty is still applied, so an empty `String` overrides an
//! earlier value while an empty `u16` is a parse error.

use std::collections::{BTreeMap, HashMap};
use std::env::{self, VarError};
use std::hash::BuildHasher;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use tracing::{trace, warn};

use crate::{ConfigError, ConfigResult, Source};

/// A structure whose fields can be populated from environment variables.
///
/// Usually derived with `#[derive(EnvTarget)]`; see the [module docs](self).
pub trait EnvTarget {
    /// Populate tagged fields from `vars`, reading `prefix + tag` for each.
    ///
    /// Stops at the first value that fails to parse.
    fn bind_env(&mut self, prefix: &str, vars: &dyn EnvLookup) -> ConfigResult<()>;

    /// The tags of all bound fields, in declaration order and without prefix.
    fn env_keys() -> &'static [&'static str]
    where
        Self: Sized;
}

/// A set of environment variables.
pub trait EnvLookup {
    /// Return the value of `key`, or `None` if it is not set.
    fn lookup(&self, key: &str) -> Option<String>;
}

/// The environment of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn lookup(&self, key: &str) -> Option<String> {
        match env::var(key) {
            Ok(value) => Some(value),
            Err(VarError::NotPresent) => None,
            Err(VarError::NotUnicode(_)) => {
                warn!(var = %key, "ignoring environment variable with non-unicode value");
                None
            }
        }
    }
}

impl<S: BuildHasher> EnvLookup for HashMap<String, String, S> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl EnvLookup for BTreeMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Parse a field value from the raw text of an environment variable.
pub trait FromEnvValue: Sized {
    /// Parse `raw`, returning a human-readable reason on failure.
    fn from_env_value(raw: &str) -> Result<Self, String>;
}

macro_rules! impl_from_env_parse {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromEnvValue for $ty {
                fn from_env_value(raw: &str) -> Result<Self, String> {
                    raw.parse::<$ty>().map_err(|e| e.to_string())
                }
            }
        )*
    };
}

impl_from_env_parse!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, char, IpAddr,
    SocketAddr,
);

impl FromEnvValue for String {
    fn from_env_value(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl FromEnvValue for bool {
    fn from_env_value(raw: &str) -> Result<Self, String> {
        parse_bool(raw).ok_or_else(|| format!("invalid boolean: {raw:?}"))
    }
}

impl FromEnvValue for PathBuf {
    fn from_env_value(raw: &str) -> Result<Self, String> {
        Ok(PathBuf::from(raw))
    }
}

/// Raw bytes of the value.
impl FromEnvValue for Vec<u8> {
    fn from_env_value(raw: &str) -> Result<Self, String> {
        Ok(raw.as_bytes().to_vec())
    }
}

impl<V: FromEnvValue> FromEnvValue for Option<V> {
    fn from_env_value(raw: &str) -> Result<Self, String> {
        V::from_env_value(raw).map(Some)
    }
}

/// Parse a boolean the way command-line flags usually spell it.
///
/// Accepts `1`, `t`, `T`, `TRUE`, `true`, `True` and their negative
/// counterparts `0`, `f`, `F`, `FALSE`, `false`, `False`.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Bind a single field from `prefix + key`.
///
/// Used by the code `#[derive(EnvTarget)]` generates. Leaves `slot` untouched
/// when the variable is not set.
pub fn bind_field<V: FromEnvValue>(
    slot: &mut V,
    prefix: &str,
    key: &str,
    vars: &dyn EnvLookup,
) -> ConfigResult<()> {
    let var = format!("{prefix}{key}");
    let Some(raw) = vars.lookup(&var) else {
        return Ok(());
    };

    *slot = V::from_env_value(&raw).map_err(|reason| ConfigError::env_parse_error(&var, reason))?;
    trace!(var = %var, "applied environment variable");
    Ok(())
}

/// Populates an [`EnvTarget`] from environment variables.
#[derive(Debug, Clone)]
pub struct EnvSource<L = ProcessEnv> {
    prefix: String,
    vars: L,
}

impl EnvSource<ProcessEnv> {
    /// Read from the process environment, prepending `prefix` to every tag.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            vars: ProcessEnv,
        }
    }
}

impl<L: EnvLookup> EnvSource<L> {
    /// Read from an explicit set of variables instead of the process
    /// environment.
    pub fn with_vars(prefix: impl Into<String>, vars: L) -> Self {
        Self {
            prefix: prefix.into(),
            vars,
        }
    }

    /// The prefix prepended to every tag.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl<T, L> Source<T> for EnvSource<L>
where
    T: EnvTarget,
    L: EnvLookup + Send,
{
    fn to_target(&mut self, target: &mut T) -> ConfigResult<()> {
        target.bind_env(&self.prefix, &self.vars)
    }

    fn describe(&self) -> String {
        if self.prefix.is_empty() {
            "environment".to_string()
        } else {
            format!("environment (prefix {})", self.prefix)
        }
    }
}

/// Populates an [`EnvTarget`] from a `.env` file.
///
/// The file is parsed on every invocation and never exported to the process
/// environment.
#[derive(Debug, Clone)]
pub struct DotenvSource {
    path: PathBuf,
    prefix: String,
    required: bool,
}

impl DotenvSource {
    /// Read `path`, prepending `prefix` to every tag.
    pub fn new(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            prefix: prefix.into(),
            required: true,
        }
    }

    /// Treat a missing file as empty instead of an error.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Path of the `.env` file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_vars(&self) -> ConfigResult<Option<HashMap<String, String>>> {
        let iter = match dotenvy::from_path_iter(&self.path) {
            Ok(iter) => iter,
            Err(e) if e.not_found() => {
                if self.required {
                    return Err(ConfigError::file_not_found(&self.path));
                }
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let vars = iter.collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Some(vars))
    }
}

impl<T: EnvTarget> Source<T> for DotenvSource {
    fn to_target(&mut self, target: &mut T) -> ConfigResult<()> {
        match self.read_vars()? {
            Some(vars) => target.bind_env(&self.prefix, &vars),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        format!("dotenv file {}", self.path.display())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
