//! Procedural macros for stratum.
//!
//! This crate provides `#[derive(EnvTarget)]`, which binds struct fields to
//! environment variables by tag. Use it through the `stratum` crate, which
//! re-exports it next to the trait of the same name.
//!
//! # Example
//!
//! ```rust,ignore
//! use stratum::EnvTarget;
//!
//! #[derive(Default, EnvTarget)]
//! struct Settings {
//!     #[env("HTTP_ADDR")]
//!     http_addr: String,
//!     #[env = "WORKERS"]
//!     workers: usize,
//!     #[env(skip)]
//!     cache: Vec<String>,
//!     // Untagged fields are never bound.
//!     started_at: u64,
//! }
//! ```
//!
//! # Generated Code
//!
//! The derive generates approximately:
//!
//! ```rust,ignore
//! impl stratum::EnvTarget for Settings {
//!     fn bind_env(&mut self, prefix: &str, vars: &dyn stratum::EnvLookup) -> stratum::ConfigResult<()> {
//!         stratum::env::bind_field(&mut self.http_addr, prefix, "HTTP_ADDR", vars)?;
//!         stratum::env::bind_field(&mut self.workers, prefix, "WORKERS", vars)?;
//!         Ok(())
//!     }
//!
//!     fn env_keys() -> &'static [&'static str] {
//!         &["HTTP_ADDR", "WORKERS"]
//!     }
//! }
//! ```

mod env_target;
mod parse;

use proc_macro::TokenStream;

/// Derives `stratum::EnvTarget` for a struct with named fields.
///
/// # Field Attributes
///
/// - `#[env("KEY")]` or `#[env = "KEY"]`: bind the field to `prefix + KEY`
/// - `#[env(skip)]` or `#[env = "-"]`: never bind the field
///
/// Fields without an `env` attribute are not bound. Every bound field type
/// must implement `stratum::FromEnvValue`.
#[proc_macro_derive(EnvTarget, attributes(env))]
pub fn derive_env_target(input: TokenStream) -> TokenStream {
    env_target::expand_env_target(input.into())
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
