//! Document formats understood by the loader.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::merge::Document;
use crate::ConfigError;

/// A structured document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// YAML documents (`.yaml`, `.yml`).
    Yaml,
    /// JSON documents (`.json`).
    Json,
    /// TOML documents (`.toml`).
    Toml,
}

impl Format {
    /// Detect the format from a file extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Detect the format of a file from its path.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnsupportedFormat` if the path has no extension
    /// or an unknown one.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))
    }

    /// Lowercase name of the format.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }

    /// Decode raw bytes into a generic document tree.
    ///
    /// YAML merge keys (`<<: *anchor`) are resolved. Returns `Ok(None)` for
    /// blank input and for documents that decode to `null`.
    pub fn decode(self, content: &[u8]) -> Result<Option<Document>, ConfigError> {
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let value: Document = match self {
            Self::Yaml => {
                let mut value: Document = serde_yaml::from_slice(content)?;
                value.apply_merge()?;
                value
            }
            Self::Json => serde_json::from_slice(content)?,
            Self::Toml => toml::from_str(std::str::from_utf8(content)?)?,
        };

        Ok(if value.is_null() { None } else { Some(value) })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| ConfigError::UnsupportedFormat(s.to_string()))
    }
}
