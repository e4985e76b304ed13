//! The container engine seam.
//!
//! [`ContainerEngine`] lists the primitive daemon operations the orchestrator
//! drives. [`DockerClient`](super::DockerClient) implements it on top of
//! bollard; [`RecordingEngine`](super::fakes::RecordingEngine) implements it
//! in memory for tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::DockerError;

/// Stream of pull progress events for one image.
pub type PullEvents = BoxStream<'static, Result<PullProgress, DockerError>>;

/// Stream of raw output chunks (stdout and stderr interleaved) from a container.
pub type LogChunks = BoxStream<'static, Result<Vec<u8>, DockerError>>;

/// One progress event reported while pulling an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullProgress {
    /// Status text, e.g. "Downloading" or "Pull complete".
    pub status: Option<String>,
    /// Human-readable progress bar / size, when the daemon sends one.
    pub progress: Option<String>,
    /// Error reported by the daemon; terminates the pull.
    pub error: Option<String>,
}

impl PullProgress {
    /// A status-only event.
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    /// A status event carrying progress text.
    pub fn with_progress(status: impl Into<String>, progress: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            progress: Some(progress.into()),
            error: None,
        }
    }

    /// An error event.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Configuration for creating a new container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name; the daemon generates one when unset.
    pub name: Option<String>,
    /// Docker image to use.
    pub image: String,
    /// Command to run in the container.
    pub cmd: Option<Vec<String>>,
    /// Environment variables as `KEY=VALUE`.
    pub env: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// User to run as (e.g., "1000:1000").
    pub user: Option<String>,
    /// Bind mounts (`host:container[:mode]`).
    pub binds: Vec<String>,
    /// Attach stdout/stderr so output can be streamed.
    pub attach_output: bool,
}

impl ContainerSpec {
    /// Creates a new container specification for `image`.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Sets the container name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the command to run in the container.
    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = Some(cmd);
        self
    }

    /// Sets the environment.
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the user to run as. `None` keeps the image default.
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    /// Mounts `host_dir` at `container_dir` as the first bind, followed by `mounts` in order.
    pub fn with_workspace(mut self, host_dir: &str, container_dir: &str, mounts: &[String]) -> Self {
        self.binds = std::iter::once(format!("{host_dir}:{container_dir}"))
            .chain(mounts.iter().cloned())
            .collect();
        self
    }

    /// Attaches stdout and stderr.
    pub fn attached(mut self) -> Self {
        self.attach_output = true;
        self
    }
}

/// A newly created container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCreated {
    pub id: String,
    pub warnings: Vec<String>,
}

/// A newly created network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCreated {
    pub id: String,
    pub warning: Option<String>,
}

/// Primitive operations against one container daemon.
///
/// Implementations must be safe to share between tasks; every call may
/// suspend on I/O.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Requests a pull of `image` and returns its progress stream.
    fn pull_image(&self, image: &str) -> PullEvents;

    /// Creates a private bridge network.
    async fn create_network(&self, name: &str) -> Result<NetworkCreated, DockerError>;

    /// Creates (but does not start) a container.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerCreated, DockerError>;

    /// Attaches a container to a network, resolvable there under `aliases`.
    async fn connect_to_network(
        &self,
        container_id: &str,
        network_id: &str,
        aliases: &[String],
    ) -> Result<(), DockerError>;

    /// Starts a created container.
    async fn start_container(&self, container_id: &str) -> Result<(), DockerError>;

    /// Follows the combined stdout/stderr of a container until it closes.
    fn stream_logs(&self, container_id: &str) -> LogChunks;

    /// Blocks until the container exits and returns its exit status.
    ///
    /// Returns [`DockerError::MissingExitStatus`] if the daemon reports none.
    async fn wait_for_exit(&self, container_id: &str) -> Result<i64, DockerError>;

    /// Stops a container, killing it after `grace_period_secs`.
    async fn stop_container(&self, container_id: &str, grace_period_secs: i64)
        -> Result<(), DockerError>;

    /// Removes a container together with its anonymous volumes.
    async fn remove_container(&self, container_id: &str) -> Result<(), DockerError>;

    /// Removes a network.
    async fn remove_network(&self, network_id: &str) -> Result<(), DockerError>;
}
