use std::{path::PathBuf, time::Duration};

/// A host capability refused or failed a guest call. The message is what the
/// guest sees as the thrown error.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("path '{0}' is outside the deployment root")]
    PathEscape(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Exec(String),

    #[error("{0}")]
    Mail(String),
}

impl CapabilityError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// A script could not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to read script {}: {source}", .path.display())]
    ScriptUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Uncaught exception or syntax error raised by the guest.
    #[error("{0}")]
    Guest(String),

    #[error("script exceeded its {}s deadline", .0.as_secs())]
    Timeout(Duration),

    #[error("script engine failure: {0}")]
    Engine(String),
}
