//! Error type system for the novel plugin runtime
//!
//! Errors are classified by where they surface:
//! - Runtime construction and plugin bootstrap
//! - Individual guest calls (including unsettled async results)
//! - Host-side collaborators (network, storage, configuration)

/// Boxed cause carried by guest-facing variants
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the novel plugin runtime
#[derive(Debug, thiserror::Error)]
pub enum NovelError {
    /// The plugin script (or the runtime bootstrap) failed to evaluate.
    /// Fatal for the runtime instance it happened in.
    #[error("Plugin bootstrap failed for {plugin_id}: {message}")]
    Bootstrap {
        plugin_id: String,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// A guest exception raised while evaluating one entry point.
    #[error("Plugin call {function} failed for {plugin_id}: {message}")]
    Call {
        plugin_id: String,
        function: String,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// `__resolve` ran out of job budget before the promise settled.
    #[error("Async result not supported: {function} on {plugin_id} never settled")]
    UnsettledAsync { plugin_id: String, function: String },

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Runtime closed for plugin {0}")]
    RuntimeClosed(String),

    #[error("Invalid plugin: {0}")]
    InvalidPlugin(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl NovelError {
    /// Get the error type name, used as a structured log field
    pub fn error_type(&self) -> &'static str {
        match self {
            NovelError::Bootstrap { .. } => "Bootstrap",
            NovelError::Call { .. } => "Call",
            NovelError::UnsettledAsync { .. } => "UnsettledAsync",
            NovelError::ModuleNotFound(_) => "ModuleNotFound",
            NovelError::RuntimeClosed(_) => "RuntimeClosed",
            NovelError::InvalidPlugin(_) => "InvalidPlugin",
            NovelError::ConfigError(_) => "ConfigError",
            NovelError::NetworkError(_) => "NetworkError",
            NovelError::StorageError(_) => "StorageError",
            NovelError::IoError(_) => "IoError",
            NovelError::SerializationError(_) => "SerializationError",
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, NovelError::NetworkError(_))
    }

    /// True for failures scoped to a single call; the runtime instance stays usable
    pub fn is_call_scoped(&self) -> bool {
        matches!(
            self,
            NovelError::Call { .. }
                | NovelError::UnsettledAsync { .. }
                | NovelError::ModuleNotFound(_)
                | NovelError::NetworkError(_)
        )
    }
}

/// Result type alias for operations that can fail with NovelError
pub type Result<T> = std::result::Result<T, NovelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_types() {
        assert_eq!(NovelError::ModuleNotFound("x".into()).error_type(), "ModuleNotFound");
        assert_eq!(
            NovelError::UnsettledAsync {
                plugin_id: "p".into(),
                function: "popularNovels".into()
            }
            .error_type(),
            "UnsettledAsync"
        );
        assert_eq!(NovelError::RuntimeClosed("p".into()).error_type(), "RuntimeClosed");
    }

    #[test]
    fn test_error_retryable() {
        assert!(NovelError::NetworkError("reset".into()).is_retryable());
        assert!(!NovelError::ModuleNotFound("cheerio-x".into()).is_retryable());
        assert!(!NovelError::RuntimeClosed("p".into()).is_retryable());
    }

    #[test]
    fn test_call_error_keeps_guest_cause() {
        let cause = anyhow::anyhow!("Uncaught TypeError: x is not a function");
        let err = NovelError::Call {
            plugin_id: "demo".into(),
            function: "parseNovel".into(),
            message: cause.to_string(),
            source: Some(cause.into()),
        };

        assert!(err.is_call_scoped());
        assert!(err.to_string().contains("parseNovel"));
        let source = err.source().expect("cause preserved");
        assert!(source.to_string().contains("x is not a function"));
    }
}
