//! Ledger of the daemon resources created during one run.
//!
//! Handles are recorded as soon as the daemon hands them out, before they are
//! used, so a failure at any later point still leaves something to clean up.
//! Teardown takes handles out of the ledger as it goes; a second teardown is a
//! no-op and nothing is removed twice.

use std::fmt;

use crate::error::{cause_chain, DockerError};
use crate::execution::console::ConsoleSink;
use crate::execution::engine::ContainerEngine;

/// A running service container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub name: String,
    pub container_id: String,
}

/// Something the tracker tears down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedResource {
    ScriptContainer(String),
    ServiceContainer { name: String, container_id: String },
    Network(String),
}

impl fmt::Display for TrackedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackedResource::ScriptContainer(id) => write!(f, "script container {id}"),
            TrackedResource::ServiceContainer { name, container_id } => {
                write!(f, "service container {name}/{container_id}")
            }
            TrackedResource::Network(id) => write!(f, "network {id}"),
        }
    }
}

/// A resource that could not be torn down.
#[derive(Debug)]
pub struct TeardownFailure {
    pub resource: TrackedResource,
    pub error: DockerError,
}

/// Stops and removes a container, printing each step.
pub async fn tear_down_container(
    engine: &dyn ContainerEngine,
    console: &dyn ConsoleSink,
    container_id: &str,
    grace_period_secs: i64,
) -> Result<(), DockerError> {
    console.print_line(&format!("Stopping container: {container_id}"));
    engine.stop_container(container_id, grace_period_secs).await?;

    console.print_line(&format!("Removing container: {container_id}"));
    engine.remove_container(container_id).await
}

/// Prints an error and each of its causes.
pub fn print_error(console: &dyn ConsoleSink, headline: &str, err: &DockerError) {
    console.print_line(headline);
    console.print_line(&err.to_string());
    for cause in cause_chain(err) {
        console.print_line(&format!("\tcaused by: {cause}"));
    }
}

/// Resources created during one run, in creation order.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    network: Option<String>,
    services: Vec<ServiceHandle>,
    script: Option<String>,
    failures: Vec<TeardownFailure>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the run's services network.
    pub fn record_network(&mut self, network_id: impl Into<String>) {
        self.network = Some(network_id.into());
    }

    /// Records a service container right after creation.
    pub fn record_service(&mut self, name: impl Into<String>, container_id: impl Into<String>) {
        self.services.push(ServiceHandle {
            name: name.into(),
            container_id: container_id.into(),
        });
    }

    /// Records the script container right after creation.
    pub fn record_script(&mut self, container_id: impl Into<String>) {
        self.script = Some(container_id.into());
    }

    pub fn network_id(&self) -> Option<&str> {
        self.network.as_deref()
    }

    pub fn services(&self) -> &[ServiceHandle] {
        &self.services
    }

    pub fn script_container(&self) -> Option<&str> {
        self.script.as_deref()
    }

    /// Returns `true` if anything still needs tearing down.
    pub fn has_resources(&self) -> bool {
        self.network.is_some() || self.script.is_some() || !self.services.is_empty()
    }

    /// Failures collected by previous teardowns.
    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }

    /// Tears down everything recorded: the script container, then service
    /// containers in recorded order, then the network.
    ///
    /// Each step is attempted regardless of earlier failures. Failures are
    /// printed with their causes, kept in [`failures`](Self::failures), and
    /// the number of new failures is returned.
    pub async fn teardown(
        &mut self,
        engine: &dyn ContainerEngine,
        console: &dyn ConsoleSink,
        grace_period_secs: i64,
    ) -> usize {
        let before = self.failures.len();

        if let Some(id) = self.script.take() {
            if let Err(error) = tear_down_container(engine, console, &id, grace_period_secs).await
            {
                self.fail(console, TrackedResource::ScriptContainer(id), error);
            }
        }

        for service in std::mem::take(&mut self.services) {
            if let Err(error) =
                tear_down_container(engine, console, &service.container_id, grace_period_secs)
                    .await
            {
                self.fail(
                    console,
                    TrackedResource::ServiceContainer {
                        name: service.name,
                        container_id: service.container_id,
                    },
                    error,
                );
            }
        }

        if let Some(id) = self.network.take() {
            match engine.remove_network(&id).await {
                Ok(()) => console.print_line(&format!("Removed network: {id}")),
                Err(error) => self.fail(console, TrackedResource::Network(id), error),
            }
        }

        self.failures.len() - before
    }

    fn fail(&mut self, console: &dyn ConsoleSink, resource: TrackedResource, error: DockerError) {
        let headline = match &resource {
            TrackedResource::Network(_) => "Exception occurred while removing network",
            _ => "Exception occurred while removing container",
        };
        tracing::warn!(resource = %resource, error = %error, "Teardown step failed");
        print_error(console, headline, &error);
        self.failures.push(TeardownFailure { resource, error });
    }
}
