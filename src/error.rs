use thiserror::Error;

/// Failure reported by an inventory backend while resolving nodes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Inventory backend error: {0}")]
    Backend(String),

    #[error("Malformed inventory data: {0}")]
    Decode(String),

    #[error("Fetch timed out after {0} ms")]
    Timeout(u64),
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Backend(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Failure to set up filesystem change notifications for a snapshot root.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to start file watcher: {0}")]
    Init(#[source] notify::Error),
    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: String,
        #[source]
        source: notify::Error,
    },
}
