//! Configuration management

use clap::{Parser, Subcommand};
use config::{builder::DefaultState, Config as ConfigBuilder, ConfigBuilder as Builder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid runtime configuration: {0}")]
    InvalidRuntime(String),

    #[error("Invalid http configuration: {0}")]
    InvalidHttp(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

impl From<ConfigError> for crate::core::error::NovelError {
    fn from(err: ConfigError) -> Self {
        crate::core::error::NovelError::ConfigError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            http: HttpConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Environment variables are prefixed with NOVEL__ and use __ for nesting
        // Example: NOVEL__RUNTIME__RESOLVE_BUDGET=500000
        builder = builder.add_source(
            Environment::with_prefix("NOVEL")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }
        if let Some(storage_dir) = &cli_args.storage_dir {
            builder = builder
                .set_override("storage.backend", "file")?
                .set_override("storage.data_dir", storage_dir.display().to_string())?;
        }
        if let Some(budget) = cli_args.resolve_budget {
            builder = builder.set_override("runtime.resolve_budget", budget)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;
        self.http.validate()?;
        self.storage.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn with_defaults(builder: Builder<DefaultState>) -> Result<Builder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("runtime.resolve_budget", 200_000)?
        .set_default("runtime.drain_batch", 1_000)?
        .set_default("http.timeout", 30)?
        .set_default("http.connect_timeout", 10)?
        .set_default("http.user_agent", DEFAULT_USER_AGENT)?
        .set_default("http.accept_invalid_certs", false)?
        .set_default("storage.backend", "memory")?
        .set_default("storage.data_dir", "./data/storage")?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")?
        .set_default("logging.max_file_size", 10485760)? // 10 MB
        .set_default("logging.max_backups", 5)?)
}

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 13) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36";

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "novel-runtime")]
#[command(about = "Run a novel source plugin from the command line", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Persist plugin storage as JSON files in this directory
    #[arg(long, value_name = "DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Total job budget for resolving one plugin call
    #[arg(long, value_name = "JOBS")]
    pub resolve_budget: Option<u64>,

    /// Plugin script (compiled CommonJS module)
    #[arg(short, long, value_name = "FILE")]
    pub plugin: PathBuf,

    /// Plugin id (defaults to the script file stem)
    #[arg(long)]
    pub id: Option<String>,

    /// Display name (defaults to the id)
    #[arg(long)]
    pub name: Option<String>,

    /// Site base URL
    #[arg(long, default_value = "")]
    pub site: String,

    /// Language tag
    #[arg(long, default_value = "en")]
    pub lang: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Catalogue operation to run
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the plugin's filter list
    Filters,
    /// Popular novels page
    Popular {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Latest updates page
    Latest {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Search novels
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Novel details for a path
    Details { path: String },
    /// Chapter list for a novel path
    Chapters { path: String },
    /// Chapter text for a chapter path
    ChapterText { path: String },
    /// Browser URL for a novel path, or a chapter path with --chapter
    WebUrl {
        path: String,
        #[arg(long)]
        chapter: bool,
    },
    /// Fetch an image through the plugin
    Image {
        reference: String,
        /// Write the image bytes here instead of printing only the metadata
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum jobs one `__resolve` may run before giving up
    pub resolve_budget: u64,
    /// Jobs drained per pass
    pub drain_batch: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            resolve_budget: 200_000,
            drain_batch: 1_000,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolve_budget == 0 {
            return Err(ConfigError::InvalidRuntime("resolve_budget must be greater than 0".to_string()));
        }

        if self.drain_batch == 0 {
            return Err(ConfigError::InvalidRuntime("drain_batch must be greater than 0".to_string()));
        }

        if self.drain_batch > self.resolve_budget {
            return Err(ConfigError::InvalidRuntime(
                "drain_batch cannot exceed resolve_budget".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub timeout: u64,         // seconds
    pub connect_timeout: u64, // seconds
    pub user_agent: String,
    pub accept_invalid_certs: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: 30,
            connect_timeout: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs: false,
        }
    }
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout == 0 {
            return Err(ConfigError::InvalidHttp("timeout must be greater than 0".to_string()));
        }

        if self.connect_timeout == 0 {
            return Err(ConfigError::InvalidHttp("connect_timeout must be greater than 0".to_string()));
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidHttp("user_agent cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// "memory" or "file"
    pub backend: String,
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            data_dir: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_backends = ["memory", "file"];
        if !valid_backends.contains(&self.backend.as_str()) {
            return Err(ConfigError::InvalidStorage(format!(
                "backend must be one of: {:?}",
                valid_backends
            )));
        }

        if self.backend == "file" && self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidStorage("data_dir cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub max_file_size: usize, // bytes
    pub max_backups: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            output: "stderr".to_string(),
            log_file: None,
            max_file_size: 10485760,
            max_backups: 5,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "stderr", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidLogging("max_file_size must be greater than 0".to_string()));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging("max_backups must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[runtime]\nresolve_budget = 5000\n\n[storage]\nbackend = \"file\"\ndata_dir = \"/tmp/novel\""
        )
        .unwrap();
        file.flush().unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.runtime.resolve_budget, 5000);
        assert_eq!(config.runtime.drain_batch, 1000);
        assert_eq!(config.storage.backend, "file");
        assert_eq!(config.http.timeout, 30);
    }

    #[test]
    fn test_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs::try_parse_from([
            "novel-runtime",
            "--plugin",
            "demo.js",
            "--log-level",
            "debug",
            "--storage-dir",
            dir.path().to_str().unwrap(),
            "--resolve-budget",
            "50000",
            "popular",
            "--page",
            "2",
        ])
        .unwrap();

        let config = Config::load(&args).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.storage.backend, "file");
        assert_eq!(config.storage.data_dir, dir.path());
        assert_eq!(config.runtime.resolve_budget, 50000);
        assert!(matches!(args.command, Command::Popular { page: 2 }));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_runtime_validation() {
        let runtime = RuntimeConfig {
            resolve_budget: 10,
            drain_batch: 100,
        };
        assert!(runtime.validate().is_err());

        let runtime = RuntimeConfig {
            resolve_budget: 0,
            drain_batch: 0,
        };
        assert!(runtime.validate().is_err());
    }

    #[test]
    fn test_storage_backend_validation() {
        let storage = StorageConfig {
            backend: "redis".to_string(),
            data_dir: PathBuf::from("./x"),
        };
        assert!(storage.validate().is_err());
    }

    #[test]
    fn test_logging_requires_file_for_file_output() {
        let logging = LoggingConfig {
            output: "file".to_string(),
            ..LoggingConfig::default()
        };
        assert!(logging.validate().is_err());
    }
}
