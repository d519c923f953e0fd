//! Novel plugin runtime
//!
//! Runs third-party novel source plugins (CommonJS scripts written against a
//! Node-like API) inside an embedded V8 engine and exposes them to the host as
//! typed catalogue sources.

pub mod core;
pub mod plugin;

// Re-export commonly used types
pub use crate::core::{Config, Logger, NovelError};
pub use plugin::{CatalogueSource, NativeApi, NovelJsRuntime, NovelJsSource, PluginDescriptor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for the library
pub type Result<T> = crate::core::error::Result<T>;
