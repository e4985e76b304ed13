//! Configuration for the Docker engine connection and step runs.

use serde::{Deserialize, Serialize};

/// Default endpoint of the local Docker daemon.
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Seconds a container gets to exit after SIGTERM before it is killed.
pub const DEFAULT_STOP_GRACE_SECONDS: i64 = 60;

/// Mount point of the step's working directory inside the script container.
pub const DEFAULT_CONTAINER_WORKING_DIR: &str = "/working";

/// Prefix of the private network created for runs with services.
pub const DEFAULT_NETWORK_PREFIX: &str = "step_services";

/// Settings shared by every run against one Docker daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Daemon endpoint (`unix://...`, `tcp://...` or `http://...`).
    pub docker_host: String,
    /// Request timeout for daemon calls, in seconds.
    pub connect_timeout_secs: u64,
    /// Grace period for stopping containers during teardown.
    pub stop_grace_seconds: i64,
    /// Where the host working directory is mounted in the script container.
    pub container_working_dir: String,
    /// Prefix used when naming the per-run services network.
    pub network_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            docker_host: DEFAULT_DOCKER_HOST.to_string(),
            connect_timeout_secs: 120,
            stop_grace_seconds: DEFAULT_STOP_GRACE_SECONDS,
            container_working_dir: DEFAULT_CONTAINER_WORKING_DIR.to_string(),
            network_prefix: DEFAULT_NETWORK_PREFIX.to_string(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the daemon endpoint.
    pub fn with_docker_host(mut self, host: impl Into<String>) -> Self {
        self.docker_host = host.into();
        self
    }

    /// Sets the request timeout in seconds.
    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Sets the stop grace period in seconds.
    pub fn with_stop_grace_seconds(mut self, secs: i64) -> Self {
        self.stop_grace_seconds = secs;
        self
    }

    /// Sets the container-side working directory.
    pub fn with_container_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.container_working_dir = dir.into();
        self
    }

    /// Sets the services network name prefix.
    pub fn with_network_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.network_prefix = prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.docker_host, "unix:///var/run/docker.sock");
        assert_eq!(config.stop_grace_seconds, 60);
        assert_eq!(config.container_working_dir, "/working");
        assert_eq!(config.network_prefix, "step_services");
    }

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new()
            .with_docker_host("tcp://10.0.0.1:2375")
            .with_connect_timeout(30)
            .with_stop_grace_seconds(5)
            .with_container_working_dir("/app")
            .with_network_prefix("ci");

        assert_eq!(config.docker_host, "tcp://10.0.0.1:2375");
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.stop_grace_seconds, 5);
        assert_eq!(config.container_working_dir, "/app");
        assert_eq!(config.network_prefix, "ci");
    }

    #[test]
    fn test_engine_config_partial_yaml() {
        let config: EngineConfig =
            serde_yaml::from_str("stop_grace_seconds: 10\n").expect("valid yaml");
        assert_eq!(config.stop_grace_seconds, 10);
        assert_eq!(config.docker_host, DEFAULT_DOCKER_HOST);
    }
}
