// src/error.rs

//! Crate-wide error type

use thiserror::Error;

/// Errors raised by resolution, caching, installation and lifecycle execution
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown system (or version) in the registry or install store
    #[error("System not found: {0}")]
    NotFound(String),

    #[error("No version of {name} satisfies '{range}'")]
    NoSatisfyingVersion { name: String, range: String },

    #[error("Invalid system {name}: {reason}")]
    InvalidSystem { name: String, reason: String },

    #[error(
        "Version conflict for {name}: {installed} is installed, refusing to replace it with {requested} without --force"
    )]
    VersionConflict {
        name: String,
        installed: String,
        requested: String,
    },

    #[error("Ambiguous install for {name}: found version directories {versions:?}")]
    AmbiguousInstall { name: String, versions: Vec<String> },

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Unpack error: {0}")]
    UnpackError(String),

    #[error("Script {script} for {system} failed: {reason}")]
    ScriptFailure {
        system: String,
        script: String,
        reason: String,
    },

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A batch unit panicked
    #[error("Batch unit {index} panicked: {message}")]
    Panicked { index: usize, message: String },

    /// A lifecycle invocation failed; carries the action and system for context
    #[error("{action} {system} failed: {source}")]
    Action {
        action: String,
        system: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap this error with the action and system it happened under
    pub fn in_action(self, action: impl Into<String>, system: impl Into<String>) -> Self {
        match self {
            // Keep the innermost context
            Error::Action { .. } => self,
            other => Error::Action {
                action: action.into(),
                system: system.into(),
                source: Box::new(other),
            },
        }
    }

    /// Strip any action context and return the underlying error
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Action { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type for quill operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_action_wraps_once() {
        let err = Error::NotFound("nginx".to_string())
            .in_action("install", "web")
            .in_action("install", "outer");

        assert_eq!(err.to_string(), "install web failed: System not found: nginx");
        assert!(matches!(err.root_cause(), Error::NotFound(name) if name == "nginx"));
    }

    #[test]
    fn test_version_conflict_message() {
        let err = Error::VersionConflict {
            name: "a".to_string(),
            installed: "0.1.0".to_string(),
            requested: "0.2.0".to_string(),
        };
        assert!(err.to_string().contains("without --force"));
    }
}
