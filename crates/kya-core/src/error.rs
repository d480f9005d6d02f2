use thiserror::Error;

#[derive(Debug, Error)]
pub enum KyaError {
    #[error("suggestion not found: {0}")]
    SuggestionNotFound(i64),

    #[error("suggestion {id} is already {status}")]
    SuggestionClosed { id: i64, status: String },

    #[error("invalid suggestion status '{0}': must be open, applied, or dismissed")]
    InvalidStatus(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error("failed to start '{program}': {source}")]
    GatewaySpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("control utility did not finish within {0}s")]
    GatewayTimeout(u64),

    #[error("notification backend '{backend}' failed: {reason}")]
    Notification { backend: String, reason: String },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KyaError>;
