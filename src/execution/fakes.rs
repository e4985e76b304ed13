//! In-memory [`ContainerEngine`] for tests.
//!
//! `RecordingEngine` hands out sequential container ids (`c1`, `c2`, ...),
//! records every call in order, and fails on demand at chosen points.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::DockerError;
use crate::execution::engine::{
    ContainerCreated, ContainerEngine, ContainerSpec, LogChunks, NetworkCreated, PullEvents,
    PullProgress,
};

/// A call made against the fake engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Pull(String),
    CreateNetwork(String),
    CreateContainer(ContainerSpec),
    Connect {
        container: String,
        network: String,
        aliases: Vec<String>,
    },
    Start(String),
    Logs(String),
    Wait(String),
    Stop { id: String, grace: i64 },
    Remove(String),
    RemoveNetwork(String),
}

fn rejected(action: String) -> DockerError {
    DockerError::api(
        action,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "injected failure".to_string(),
        },
    )
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<EngineCall>,
    next_container: usize,
}

/// Records calls and replays scripted daemon behaviour.
#[derive(Debug)]
pub struct RecordingEngine {
    state: Mutex<State>,
    pull_events: HashMap<String, Vec<PullProgress>>,
    log_chunks: Vec<String>,
    exit_status: Option<i64>,
    network_warning: Option<String>,
    container_warnings: Vec<String>,
    fail_create_images: HashSet<String>,
    fail_start_ids: HashSet<String>,
    fail_stop_ids: HashSet<String>,
    fail_remove_ids: HashSet<String>,
    fail_create_network: bool,
    fail_remove_network: bool,
    fail_logs: bool,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingEngine {
    /// An engine where everything succeeds and containers exit with 0.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            pull_events: HashMap::new(),
            log_chunks: Vec::new(),
            exit_status: Some(0),
            network_warning: None,
            container_warnings: Vec::new(),
            fail_create_images: HashSet::new(),
            fail_start_ids: HashSet::new(),
            fail_stop_ids: HashSet::new(),
            fail_remove_ids: HashSet::new(),
            fail_create_network: false,
            fail_remove_network: false,
            fail_logs: false,
        }
    }

    /// Progress events returned when pulling `image`.
    pub fn with_pull_events(mut self, image: impl Into<String>, events: Vec<PullProgress>) -> Self {
        self.pull_events.insert(image.into(), events);
        self
    }

    /// Output chunks returned by `stream_logs`.
    pub fn with_logs(mut self, chunks: &[&str]) -> Self {
        self.log_chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Exit status returned by `wait_for_exit`; `None` means the daemon reports none.
    pub fn with_exit_status(mut self, status: Option<i64>) -> Self {
        self.exit_status = status;
        self
    }

    /// Warning attached to network creation.
    pub fn with_network_warning(mut self, warning: impl Into<String>) -> Self {
        self.network_warning = Some(warning.into());
        self
    }

    /// Warnings attached to every container creation.
    pub fn with_container_warnings(mut self, warnings: &[&str]) -> Self {
        self.container_warnings = warnings.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Fails container creation for `image`.
    pub fn fail_create(mut self, image: impl Into<String>) -> Self {
        self.fail_create_images.insert(image.into());
        self
    }

    /// Fails starting container `id`.
    pub fn fail_start(mut self, id: impl Into<String>) -> Self {
        self.fail_start_ids.insert(id.into());
        self
    }

    /// Fails stopping container `id`.
    pub fn fail_stop(mut self, id: impl Into<String>) -> Self {
        self.fail_stop_ids.insert(id.into());
        self
    }

    /// Fails removing container `id`.
    pub fn fail_remove(mut self, id: impl Into<String>) -> Self {
        self.fail_remove_ids.insert(id.into());
        self
    }

    /// Fails network creation.
    pub fn fail_create_network(mut self) -> Self {
        self.fail_create_network = true;
        self
    }

    /// Fails network removal.
    pub fn fail_remove_network(mut self) -> Self {
        self.fail_remove_network = true;
        self
    }

    /// Makes the log stream end with an error after its chunks.
    pub fn fail_logs(mut self) -> Self {
        self.fail_logs = true;
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// Container specs passed to `create_container`, in order.
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::CreateContainer(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Number of calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: EngineCall) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.push(call);
        }
    }

    fn next_container_id(&self) -> String {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.next_container += 1;
        format!("c{}", state.next_container)
    }
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
    fn pull_image(&self, image: &str) -> PullEvents {
        self.record(EngineCall::Pull(image.to_string()));
        let events = self
            .pull_events
            .get(image)
            .cloned()
            .unwrap_or_else(|| vec![PullProgress::status("Image pulled")]);
        stream::iter(events.into_iter().map(Ok)).boxed()
    }

    async fn create_network(&self, name: &str) -> Result<NetworkCreated, DockerError> {
        self.record(EngineCall::CreateNetwork(name.to_string()));
        if self.fail_create_network {
            return Err(rejected(format!("create network '{name}'")));
        }
        Ok(NetworkCreated {
            id: "net-1".to_string(),
            warning: self.network_warning.clone(),
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerCreated, DockerError> {
        self.record(EngineCall::CreateContainer(spec.clone()));
        if self.fail_create_images.contains(&spec.image) {
            return Err(rejected(format!(
                "create container from image '{}'",
                spec.image
            )));
        }
        Ok(ContainerCreated {
            id: self.next_container_id(),
            warnings: self.container_warnings.clone(),
        })
    }

    async fn connect_to_network(
        &self,
        container_id: &str,
        network_id: &str,
        aliases: &[String],
    ) -> Result<(), DockerError> {
        self.record(EngineCall::Connect {
            container: container_id.to_string(),
            network: network_id.to_string(),
            aliases: aliases.to_vec(),
        });
        Ok(())
    }

    async fn start_container(&self, container_id: &str) -> Result<(), DockerError> {
        self.record(EngineCall::Start(container_id.to_string()));
        if self.fail_start_ids.contains(container_id) {
            return Err(rejected(format!("start container '{container_id}'")));
        }
        Ok(())
    }

    fn stream_logs(&self, container_id: &str) -> LogChunks {
        self.record(EngineCall::Logs(container_id.to_string()));
        let mut chunks: Vec<Result<Vec<u8>, DockerError>> = self
            .log_chunks
            .iter()
            .map(|c| Ok(c.as_bytes().to_vec()))
            .collect();
        if self.fail_logs {
            chunks.push(Err(rejected(format!("read logs of container '{container_id}'"))));
        }
        stream::iter(chunks).boxed()
    }

    async fn wait_for_exit(&self, container_id: &str) -> Result<i64, DockerError> {
        self.record(EngineCall::Wait(container_id.to_string()));
        self.exit_status
            .ok_or_else(|| DockerError::MissingExitStatus {
                id: container_id.to_string(),
            })
    }

    async fn stop_container(
        &self,
        container_id: &str,
        grace_period_secs: i64,
    ) -> Result<(), DockerError> {
        self.record(EngineCall::Stop {
            id: container_id.to_string(),
            grace: grace_period_secs,
        });
        if self.fail_stop_ids.contains(container_id) {
            return Err(rejected(format!("stop container '{container_id}'")));
        }
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), DockerError> {
        self.record(EngineCall::Remove(container_id.to_string()));
        if self.fail_remove_ids.contains(container_id) {
            return Err(rejected(format!("remove container '{container_id}'")));
        }
        Ok(())
    }

    async fn remove_network(&self, network_id: &str) -> Result<(), DockerError> {
        self.record(EngineCall::RemoveNetwork(network_id.to_string()));
        if self.fail_remove_network {
            return Err(rejected(format!("remove network '{network_id}'")));
        }
        Ok(())
    }
}
