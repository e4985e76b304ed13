//! Image pulling with progress relay and outcome classification.

use futures::StreamExt;

use crate::error::DockerError;
use crate::execution::console::ConsoleSink;
use crate::execution::engine::{ContainerEngine, PullProgress};

/// Terminal outcome of consuming a pull progress stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// The stream ended without reporting an error.
    Pulled,
    /// The registry does not know the image.
    ImageNotFound { detail: String },
    /// Any other error reported by the daemon.
    ImagePullFailed { detail: String },
}

impl PullOutcome {
    /// Classifies an error reported in the progress stream.
    ///
    /// Errors mentioning "not found" (any case) or a 404 mean the image does
    /// not exist; everything else is a failed pull.
    pub fn from_error(error: &str) -> Self {
        if error.contains("404") || error.to_lowercase().contains("not found") {
            PullOutcome::ImageNotFound {
                detail: error.to_string(),
            }
        } else {
            PullOutcome::ImagePullFailed {
                detail: error.to_string(),
            }
        }
    }

    /// Converts the outcome for `image` into a `Result`.
    pub fn into_result(self, image: &str) -> Result<(), DockerError> {
        match self {
            PullOutcome::Pulled => Ok(()),
            PullOutcome::ImageNotFound { detail } => Err(DockerError::ImageNotFound {
                image: image.to_string(),
                detail,
            }),
            PullOutcome::ImagePullFailed { detail } => Err(DockerError::ImagePullFailed {
                image: image.to_string(),
                detail,
            }),
        }
    }
}

/// Formats a progress event as a console line.
///
/// Only the "Downloading" and "Extracting" phases carry their progress text.
pub fn progress_line(event: &PullProgress) -> String {
    let status = event.status.as_deref().unwrap_or_default();
    match (status, event.progress.as_deref()) {
        ("Downloading" | "Extracting", Some(progress)) => format!("{status} {progress}"),
        _ => status.to_string(),
    }
}

/// Pulls `image`, printing each progress event to `console`.
///
/// Stops at the first error event and returns its classification.
/// Transport failures are returned as `Err`.
pub async fn pull_image(
    engine: &dyn ContainerEngine,
    console: &dyn ConsoleSink,
    image: &str,
) -> Result<PullOutcome, DockerError> {
    console.print_line(&format!("Pulling image: {image}"));
    tracing::info!(image = image, "Pulling image");

    let mut events = engine.pull_image(image);
    while let Some(event) = events.next().await {
        let event = event?;
        if let Some(error) = event.error.as_deref() {
            let outcome = PullOutcome::from_error(error);
            tracing::warn!(image = image, error = error, "Image pull reported an error");
            return Ok(outcome);
        }
        console.print_line(&progress_line(&event));
    }

    tracing::debug!(image = image, "Image pull finished");
    Ok(PullOutcome::Pulled)
}
