//! Error types for docker-step operations.
//!
//! Defines the error types for the two places things go wrong:
//! - Docker daemon interaction (pull, network, container lifecycle)
//! - Loading an execution plan from disk

use std::error::Error as StdError;

use thiserror::Error;

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Image '{image}' not found")]
    ImageNotFound { image: String, detail: String },

    #[error("Failed to pull image '{image}': {detail}")]
    ImagePullFailed { image: String, detail: String },

    #[error("Failed to {action}")]
    Api {
        action: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("Unexpected daemon response: {0}")]
    InvalidResponse(String),

    #[error("Exit code of container '{id}' is missing")]
    MissingExitStatus { id: String },
}

impl DockerError {
    /// Wraps a bollard error with the action that was being attempted.
    pub fn api(action: impl Into<String>, source: bollard::errors::Error) -> Self {
        Self::Api {
            action: action.into(),
            source,
        }
    }
}

/// Errors that can occur while loading an execution plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read plan '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid plan: {0}")]
    Invalid(String),
}

/// Renders an error and its `source()` chain on one line, separated by `": "`.
pub fn full_message(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Returns the messages of every error in the `source()` chain, excluding `err` itself.
pub fn cause_chain(err: &(dyn StdError + 'static)) -> Vec<String> {
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    causes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16, message: &str) -> bollard::errors::Error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_image_not_found_display() {
        let err = DockerError::ImageNotFound {
            image: "bad:image".to_string(),
            detail: "404 not found".to_string(),
        };
        assert_eq!(err.to_string(), "Image 'bad:image' not found");
    }

    #[test]
    fn test_full_message_includes_source() {
        let err = DockerError::api("start container 'abc'", server_error(500, "boom"));
        let message = full_message(&err);

        assert!(message.starts_with("Failed to start container 'abc': "));
        assert!(message.contains("boom"));
    }

    #[test]
    fn test_cause_chain() {
        let err = DockerError::api("remove network 'n1'", server_error(409, "in use"));
        let causes = cause_chain(&err);

        assert_eq!(causes.len(), 1);
        assert!(causes[0].contains("in use"));

        let leaf = DockerError::MissingExitStatus {
            id: "c1".to_string(),
        };
        assert!(cause_chain(&leaf).is_empty());
        assert_eq!(full_message(&leaf), "Exit code of container 'c1' is missing");
    }
}
