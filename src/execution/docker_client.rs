//! Docker API wrapper using the bollard crate.
//!
//! [`DockerClient`] is the production [`ContainerEngine`]: one connection to
//! one daemon, built once at startup and shared by reference.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{CreateImageInfo, EndpointSettings, HostConfig};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;

use crate::error::DockerError;
use crate::execution::config::EngineConfig;
use crate::execution::engine::{
    ContainerCreated, ContainerEngine, ContainerSpec, LogChunks, NetworkCreated, PullEvents,
    PullProgress,
};

/// Docker client wrapper for container operations.
#[derive(Debug, Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a client for the endpoint in `config`.
    ///
    /// Bollard connects lazily, so this only validates the endpoint; the
    /// first daemon call opens the connection and later calls reuse it.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the endpoint is unusable.
    pub fn connect(config: &EngineConfig) -> Result<Self, DockerError> {
        let host = config.docker_host.as_str();
        let timeout = config.connect_timeout_secs;

        let docker = if let Some(path) = host.strip_prefix("unix://") {
            connect_unix(path, timeout)?
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, timeout, API_DEFAULT_VERSION)
                .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?
        } else {
            return Err(DockerError::DaemonUnavailable(format!(
                "Unsupported Docker host '{host}'"
            )));
        };

        tracing::debug!(host = host, "Docker client configured");
        Ok(Self { docker })
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }
}

#[cfg(unix)]
fn connect_unix(path: &str, timeout: u64) -> Result<Docker, DockerError> {
    Docker::connect_with_unix(path, timeout, API_DEFAULT_VERSION)
        .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))
}

#[cfg(not(unix))]
fn connect_unix(path: &str, _timeout: u64) -> Result<Docker, DockerError> {
    Err(DockerError::DaemonUnavailable(format!(
        "Unix sockets are not supported on this platform: {path}"
    )))
}

/// Splits an image reference into the `fromImage` and `tag` pull parameters.
///
/// An untagged reference pulls `latest`; an empty tag would make the daemon
/// pull every tag of the repository.
pub fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let colon = name_start + i;
            (&image[..colon], &image[colon + 1..])
        }
        None => (image, "latest"),
    }
}

fn progress_from_info(info: CreateImageInfo) -> PullProgress {
    let error = info
        .error
        .or_else(|| info.error_detail.and_then(|detail| detail.message));
    PullProgress {
        status: info.status,
        progress: info.progress,
        error,
    }
}

/// Maps one item of the daemon's pull stream to a progress event.
///
/// Registry-side failures (a 404 for an unknown image included) become
/// error events so they are classified like in-stream errors; transport
/// failures stay daemon errors.
fn progress_from_result(
    image: &str,
    result: Result<CreateImageInfo, BollardError>,
) -> Result<PullProgress, DockerError> {
    match result {
        Ok(info) => Ok(progress_from_info(info)),
        Err(BollardError::DockerResponseServerError {
            status_code,
            message,
        }) => Ok(PullProgress::failed(format!("{status_code} {message}"))),
        Err(BollardError::DockerStreamError { error }) => Ok(PullProgress::failed(error)),
        Err(e) => Err(DockerError::api(format!("pull image '{image}'"), e)),
    }
}

fn log_bytes(output: LogOutput) -> Vec<u8> {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => message.to_vec(),
    }
}

#[async_trait]
impl ContainerEngine for DockerClient {
    fn pull_image(&self, image: &str) -> PullEvents {
        let (from_image, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let image = image.to_string();

        self.docker
            .create_image(Some(options), None, None)
            .map(move |result| progress_from_result(&image, result))
            .boxed()
    }

    async fn create_network(&self, name: &str) -> Result<NetworkCreated, DockerError> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| DockerError::api(format!("create network '{name}'"), e))?;

        let id = response.id.ok_or_else(|| {
            DockerError::InvalidResponse(format!("network '{name}' was created without an id"))
        })?;

        Ok(NetworkCreated {
            id,
            warning: response.warning.filter(|w| !w.is_empty()),
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerCreated, DockerError> {
        let host_config = HostConfig {
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.cmd.clone(),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            working_dir: spec.working_dir.clone(),
            user: spec.user.clone(),
            host_config: Some(host_config),
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(spec.attach_output),
            attach_stderr: Some(spec.attach_output),
            ..Default::default()
        };

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, container_config)
            .await
            .map_err(|e| {
                DockerError::api(format!("create container from image '{}'", spec.image), e)
            })?;

        Ok(ContainerCreated {
            id: response.id,
            warnings: response.warnings,
        })
    }

    async fn connect_to_network(
        &self,
        container_id: &str,
        network_id: &str,
        aliases: &[String],
    ) -> Result<(), DockerError> {
        let options = ConnectNetworkOptions {
            container: container_id.to_string(),
            endpoint_config: EndpointSettings {
                aliases: (!aliases.is_empty()).then(|| aliases.to_vec()),
                ..Default::default()
            },
        };

        self.docker
            .connect_network(network_id, options)
            .await
            .map_err(|e| {
                DockerError::api(
                    format!("connect container '{container_id}' to network '{network_id}'"),
                    e,
                )
            })
    }

    async fn start_container(&self, container_id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::api(format!("start container '{container_id}'"), e))
    }

    fn stream_logs(&self, container_id: &str) -> LogChunks {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: false,
            ..Default::default()
        };
        let id = container_id.to_string();

        self.docker
            .logs(container_id, Some(options))
            .map(move |chunk| {
                chunk
                    .map(log_bytes)
                    .map_err(|e| DockerError::api(format!("read logs of container '{id}'"), e))
            })
            .boxed()
    }

    async fn wait_for_exit(&self, container_id: &str) -> Result<i64, DockerError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(container_id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Bollard reports a non-zero exit as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(DockerError::api(
                format!("wait for container '{container_id}'"),
                e,
            )),
            None => Err(DockerError::MissingExitStatus {
                id: container_id.to_string(),
            }),
        }
    }

    async fn stop_container(
        &self,
        container_id: &str,
        grace_period_secs: i64,
    ) -> Result<(), DockerError> {
        let options = StopContainerOptions {
            t: grace_period_secs,
        };

        // Bollard already maps 304 (container not running) to Ok.
        self.docker
            .stop_container(container_id, Some(options))
            .await
            .map_err(|e| DockerError::api(format!("stop container '{container_id}'"), e))
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| DockerError::api(format!("remove container '{container_id}'"), e))
    }

    async fn remove_network(&self, network_id: &str) -> Result<(), DockerError> {
        self.docker
            .remove_network(network_id)
            .await
            .map_err(|e| DockerError::api(format!("remove network '{network_id}'"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::pull::PullOutcome;

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("busybox"), ("busybox", "latest"));
        assert_eq!(split_image_reference("busybox:1.36"), ("busybox", "1.36"));
        assert_eq!(
            split_image_reference("registry.local:5000/team/app"),
            ("registry.local:5000/team/app", "latest")
        );
        assert_eq!(
            split_image_reference("registry.local:5000/team/app:v2"),
            ("registry.local:5000/team/app", "v2")
        );
        assert_eq!(
            split_image_reference("alpine@sha256:abcd"),
            ("alpine@sha256:abcd", "")
        );
    }

    #[test]
    fn test_progress_from_info_prefers_error() {
        let info = CreateImageInfo {
            status: Some("Downloading".to_string()),
            progress: Some("[=> ] 1MB".to_string()),
            ..Default::default()
        };
        let progress = progress_from_info(info);
        assert_eq!(progress.status.as_deref(), Some("Downloading"));
        assert!(progress.error.is_none());

        let info = CreateImageInfo {
            error: Some("manifest for bad:image not found".to_string()),
            ..Default::default()
        };
        assert_eq!(
            progress_from_info(info).error.as_deref(),
            Some("manifest for bad:image not found")
        );
    }

    fn classify(event: PullProgress) -> PullOutcome {
        let error = event.error.expect("expected an error event");
        PullOutcome::from_error(&error)
    }

    #[test]
    fn test_pull_404_response_is_image_not_found() {
        let event = progress_from_result(
            "nope:1",
            Err(BollardError::DockerResponseServerError {
                status_code: 404,
                message: "pull access denied for nope, repository does not exist".to_string(),
            }),
        )
        .expect("registry errors become events");

        assert!(matches!(classify(event), PullOutcome::ImageNotFound { .. }));
    }

    #[test]
    fn test_pull_500_response_is_pull_failure() {
        let event = progress_from_result(
            "busybox",
            Err(BollardError::DockerResponseServerError {
                status_code: 500,
                message: "registry unreachable".to_string(),
            }),
        )
        .expect("registry errors become events");

        assert_eq!(event.error.as_deref(), Some("500 registry unreachable"));
        assert!(matches!(classify(event), PullOutcome::ImagePullFailed { .. }));
    }

    #[test]
    fn test_pull_stream_error_is_an_error_event() {
        let event = progress_from_result(
            "busybox",
            Err(BollardError::DockerStreamError {
                error: "unexpected EOF".to_string(),
            }),
        )
        .expect("stream errors become events");

        assert_eq!(event.error.as_deref(), Some("unexpected EOF"));
    }

    #[test]
    fn test_pull_transport_error_stays_daemon_error() {
        let result = progress_from_result(
            "busybox",
            Err(BollardError::RequestTimeoutError),
        );

        match result {
            Err(DockerError::Api { action, .. }) => assert_eq!(action, "pull image 'busybox'"),
            other => panic!("expected a daemon error, got {other:?}"),
        }
    }

    #[test]
    fn test_connect_rejects_unknown_scheme() {
        let config = EngineConfig::new().with_docker_host("ftp://nowhere");
        assert!(matches!(
            DockerClient::connect(&config),
            Err(DockerError::DaemonUnavailable(_))
        ));
    }

    #[test]
    fn test_connect_http_is_lazy() {
        let config = EngineConfig::new().with_docker_host("tcp://127.0.0.1:1");
        assert!(DockerClient::connect(&config).is_ok());
    }
}
