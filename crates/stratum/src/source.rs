//! Configuration sources.
//!
//! A [`Source`] writes the values found in one origin into a target. The
//! loader applies its sources in registration order, so a value written by
//! a later source replaces the one written by an earlier source.
//!
//! Document sources ([`FileSource`], [`ContentSource`], [`ReaderSource`])
//! decode YAML, JSON or TOML and merge the result field by field. The
//! environment sources live in [`crate::env`].

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::merge::apply_document;
use crate::{ConfigError, ConfigResult, Format};

/// An origin that writes configuration values into a target.
///
/// Implemented by the built-in sources and by any
/// `FnMut(&mut T) -> ConfigResult<()>` closure, which makes custom sources
/// one-liners:
///
/// ```
/// use stratum::{ConfigResult, Loader};
///
/// #[derive(Default)]
/// struct Settings {
///     workers: usize,
/// }
///
/// let loader = Loader::new(Settings::default());
/// loader.add_source(|s: &mut Settings| -> ConfigResult<()> {
///     s.workers = 8;
///     Ok(())
/// });
/// loader.process().unwrap();
/// assert_eq!(loader.read().workers, 8);
/// ```
pub trait Source<T>: Send {
    /// Write configuration values into `target`.
    fn to_target(&mut self, target: &mut T) -> ConfigResult<()>;

    /// Short human-readable description used in log events.
    fn describe(&self) -> String {
        "custom source".to_string()
    }

    /// The file this source reads, if any. Used to decide what to watch.
    fn path(&self) -> Option<&Path> {
        None
    }
}

impl<T, F> Source<T> for F
where
    F: FnMut(&mut T) -> ConfigResult<()> + Send,
{
    fn to_target(&mut self, target: &mut T) -> ConfigResult<()> {
        self(target)
    }
}

/// Decode `content` as `format` and merge it into `target`.
pub(crate) fn apply_content<T>(target: &mut T, format: Format, content: &[u8]) -> ConfigResult<()>
where
    T: Serialize + DeserializeOwned,
{
    match format.decode(content)? {
        Some(document) => apply_document(target, document),
        None => Ok(()),
    }
}

/// Reads a document file on every invocation.
///
/// The format comes from the file extension unless set explicitly.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    format: Option<Format>,
    required: bool,
}

impl FileSource {
    /// Create a source for `path`, detecting the format from its extension.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: None,
            required: true,
        }
    }

    /// Create a YAML file source.
    pub fn yaml(path: impl Into<PathBuf>) -> Self {
        Self::new(path).with_format(Format::Yaml)
    }

    /// Create a JSON file source.
    pub fn json(path: impl Into<PathBuf>) -> Self {
        Self::new(path).with_format(Format::Json)
    }

    /// Create a TOML file source.
    pub fn toml(path: impl Into<PathBuf>) -> Self {
        Self::new(path).with_format(Format::Toml)
    }

    /// Force a format regardless of the file extension.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    /// Treat a missing file as an empty document instead of an error.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Path of the file this source reads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a missing file is an error.
    pub fn is_required(&self) -> bool {
        self.required
    }

    fn format(&self) -> ConfigResult<Format> {
        match self.format {
            Some(format) => Ok(format),
            None => Format::from_path(&self.path),
        }
    }
}

impl<T> Source<T> for FileSource
where
    T: Serialize + DeserializeOwned,
{
    fn to_target(&mut self, target: &mut T) -> ConfigResult<()> {
        let format = self.format()?;

        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.required {
                    return Err(ConfigError::file_not_found(&self.path));
                }
                debug!(path = %self.path.display(), "optional configuration file missing, skipping");
                return Ok(());
            }
            Err(e) => return Err(ConfigError::read_error(&self.path, e)),
        };

        apply_content(target, format, &content)
    }

    fn describe(&self) -> String {
        match self.format {
            Some(format) => format!("{format} file {}", self.path.display()),
            None => format!("file {}", self.path.display()),
        }
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// An in-memory document block.
#[derive(Debug, Clone)]
pub struct ContentSource {
    content: Vec<u8>,
    format: Format,
}

impl ContentSource {
    /// Create a source from raw document bytes.
    pub fn new(content: impl Into<Vec<u8>>, format: Format) -> Self {
        Self {
            content: content.into(),
            format,
        }
    }

    /// The document format.
    pub fn format(&self) -> Format {
        self.format
    }
}

impl<T> Source<T> for ContentSource
where
    T: Serialize + DeserializeOwned,
{
    fn to_target(&mut self, target: &mut T) -> ConfigResult<()> {
        apply_content(target, self.format, &self.content)
    }

    fn describe(&self) -> String {
        format!("{} content ({} bytes)", self.format, self.content.len())
    }
}

/// A document read from a stream.
///
/// The stream is drained on each invocation. Once it is exhausted later
/// invocations see an empty document and change nothing.
pub struct ReaderSource<R> {
    reader: R,
    format: Format,
}

impl<R: Read> ReaderSource<R> {
    /// Create a source reading a document in `format` from `reader`.
    pub fn new(reader: R, format: Format) -> Self {
        Self { reader, format }
    }

    /// Consume the source, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R> fmt::Debug for ReaderSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSource")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl<T, R> Source<T> for ReaderSource<R>
where
    T: Serialize + DeserializeOwned,
    R: Read + Send,
{
    fn to_target(&mut self, target: &mut T) -> ConfigResult<()> {
        let mut content = Vec::new();
        self.reader.read_to_end(&mut content)?;
        apply_content(target, self.format, &content)
    }

    fn describe(&self) -> String {
        format!("{} stream", self.format)
    }
}
