//! Ambient host services
//!
//! - Configuration management
//! - Structured logging system
//! - Error handling and type system

pub mod config;
pub mod error;
pub mod logging;

pub use config::{CliArgs, Command, Config};
pub use error::{NovelError, Result};
pub use logging::Logger;
