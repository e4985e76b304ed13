//! Step orchestration: pull, network, services, script, teardown, report.
//!
//! # Stages
//!
//! ```text
//! Start → [Pulling] → [Networking] → StartingServices → RunningScript → Teardown → Reporting
//! ```
//!
//! Pulling happens only when the plan asks for it; a pull failure goes
//! straight to Reporting since nothing exists yet. Networking happens only
//! when the plan has services. Every later failure goes through Teardown,
//! which removes whatever the [`ResourceTracker`] recorded.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{full_message, DockerError};
use crate::execution::config::EngineConfig;
use crate::execution::console::ConsoleSink;
use crate::execution::engine::{ContainerEngine, ContainerSpec};
use crate::execution::log_relay::LogRelay;
use crate::execution::plan::ExecutionPlan;
use crate::execution::pull::pull_image;
use crate::execution::script::container_script_path;
use crate::execution::tracker::{print_error, ResourceTracker};

/// Stages of a step run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Pulling,
    Networking,
    StartingServices,
    RunningScript,
    Teardown,
    Reporting,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::Pulling => write!(f, "pulling"),
            RunStage::Networking => write!(f, "networking"),
            RunStage::StartingServices => write!(f, "starting_services"),
            RunStage::RunningScript => write!(f, "running_script"),
            RunStage::Teardown => write!(f, "teardown"),
            RunStage::Reporting => write!(f, "reporting"),
        }
    }
}

/// Why a run did not produce an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ImageNotFound,
    ImagePullFailed,
    Daemon,
    MissingExitStatus,
}

impl From<&DockerError> for FailureKind {
    fn from(err: &DockerError) -> Self {
        match err {
            DockerError::ImageNotFound { .. } => FailureKind::ImageNotFound,
            DockerError::ImagePullFailed { .. } => FailureKind::ImagePullFailed,
            DockerError::MissingExitStatus { .. } => FailureKind::MissingExitStatus,
            _ => FailureKind::Daemon,
        }
    }
}

/// Final verdict of a step run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// `true` iff the script container exited with status 0.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Exit status of the script container, if it produced one.
    pub exit_status: Option<i64>,
    /// Classification of the failure when no exit status was produced.
    pub failure: Option<FailureKind>,
    /// Stage in which the failure happened.
    pub failed_stage: Option<RunStage>,
    /// Number of resources that could not be torn down.
    pub teardown_failures: usize,
    /// Timestamp when the run started.
    pub started_at: DateTime<Utc>,
    /// Timestamp when the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Result of a script container that exited with `status`.
    pub fn completed(status: i64, started_at: DateTime<Utc>) -> Self {
        Self {
            success: status == 0,
            message: format!("Container completed with status {status}"),
            exit_status: Some(status),
            failure: None,
            failed_stage: None,
            teardown_failures: 0,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Result of a run aborted by `error` during `stage`.
    pub fn failed(stage: RunStage, error: &DockerError, started_at: DateTime<Utc>) -> Self {
        let message = match error {
            DockerError::ImageNotFound { .. } => error.to_string(),
            _ => full_message(error),
        };
        Self {
            success: false,
            message,
            exit_status: None,
            failure: Some(FailureKind::from(error)),
            failed_stage: Some(stage),
            teardown_failures: 0,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// An error tagged with the stage that produced it.
#[derive(Debug)]
struct StageFailure {
    stage: RunStage,
    error: DockerError,
}

fn at(stage: RunStage) -> impl FnOnce(DockerError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// Runs build steps against a container engine.
pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    console: Arc<dyn ConsoleSink>,
    config: EngineConfig,
}

impl Orchestrator {
    /// Creates an orchestrator that drives `engine` and prints to `console`.
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        console: Arc<dyn ConsoleSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            console,
            config,
        }
    }

    /// Runs `plan` with `script` as the script container's command.
    ///
    /// `script` is a host path to an executable script; `user` is the
    /// `uid:gid` to run it as. Never fails: every error is folded into the
    /// returned [`RunResult`], and every created resource is torn down
    /// before returning.
    pub async fn run(&self, plan: &ExecutionPlan, script: &Path, user: Option<&str>) -> RunResult {
        let started_at = Utc::now();
        let mut tracker = ResourceTracker::new();

        tracing::info!(image = %plan.image, services = plan.services.len(), "Starting step");
        let outcome = self.execute(plan, script, user, &mut tracker).await;

        if let Err(failure) = &outcome {
            tracing::warn!(stage = %failure.stage, error = %failure.error, "Step failed");
            print_error(
                self.console.as_ref(),
                "Exception occurred during build",
                &failure.error,
            );
        }

        let teardown_failures = if tracker.has_resources() {
            tracing::debug!(stage = %RunStage::Teardown, "Tearing down step resources");
            tracker
                .teardown(
                    self.engine.as_ref(),
                    self.console.as_ref(),
                    self.config.stop_grace_seconds,
                )
                .await
        } else {
            0
        };

        let mut result = match outcome {
            Ok(status) => RunResult::completed(status, started_at),
            Err(failure) => RunResult::failed(failure.stage, &failure.error, started_at),
        };
        result.teardown_failures = teardown_failures;

        tracing::info!(
            stage = %RunStage::Reporting,
            success = result.success,
            message = %result.message,
            "Step finished"
        );
        result
    }

    async fn execute(
        &self,
        plan: &ExecutionPlan,
        script: &Path,
        user: Option<&str>,
        tracker: &mut ResourceTracker,
    ) -> Result<i64, StageFailure> {
        if plan.pull {
            self.pull_images(plan).await.map_err(at(RunStage::Pulling))?;
        }

        if plan.has_services() {
            self.create_network(tracker)
                .await
                .map_err(at(RunStage::Networking))?;
        }

        for (name, image) in &plan.services {
            self.start_service(name, image, plan, tracker)
                .await
                .map_err(at(RunStage::StartingServices))?;
        }

        self.run_script(plan, script, user, tracker)
            .await
            .map_err(at(RunStage::RunningScript))
    }

    async fn pull_images(&self, plan: &ExecutionPlan) -> Result<(), DockerError> {
        for image in plan.images_to_pull() {
            pull_image(self.engine.as_ref(), self.console.as_ref(), image)
                .await?
                .into_result(image)?;
        }
        Ok(())
    }

    async fn create_network(&self, tracker: &mut ResourceTracker) -> Result<(), DockerError> {
        let name = format!("{}_{}", self.config.network_prefix, Uuid::new_v4().simple());
        self.console.print_line("Creating services network.");

        let network = self.engine.create_network(&name).await?;
        tracker.record_network(network.id.clone());

        if let Some(warning) = &network.warning {
            self.console.print_line(&format!("WARNING: {warning}"));
        }
        self.console
            .print_line(&format!("Network created: {}", network.id));
        tracing::debug!(network = %network.id, name = %name, "Services network created");
        Ok(())
    }

    fn print_warnings(&self, warnings: &[String]) {
        for warning in warnings {
            self.console.print_line(&format!("WARNING: {warning}"));
        }
    }

    async fn attach_and_start(
        &self,
        container_id: &str,
        aliases: &[String],
        tracker: &ResourceTracker,
    ) -> Result<(), DockerError> {
        if let Some(network) = tracker.network_id() {
            self.engine
                .connect_to_network(container_id, network, aliases)
                .await?;
            self.console
                .print_line(&format!("Attached to network: {network}"));
        }
        self.engine.start_container(container_id).await?;
        self.console
            .print_line(&format!("Started container: {container_id}"));
        Ok(())
    }

    async fn start_service(
        &self,
        name: &str,
        image: &str,
        plan: &ExecutionPlan,
        tracker: &mut ResourceTracker,
    ) -> Result<(), DockerError> {
        self.console
            .print_line(&format!("Starting service '{name}' from image: {image}"));

        // Container names are global to the daemon; the service name is only
        // an alias on this run's network.
        let spec = ContainerSpec::new(image)
            .with_name(format!("{name}_{}", Uuid::new_v4().simple()))
            .with_env(plan.env_pairs());
        let container = self.engine.create_container(&spec).await?;
        tracker.record_service(name, container.id.clone());

        self.print_warnings(&container.warnings);
        self.console
            .print_line(&format!("Created container: {name}/{}", container.id));

        self.attach_and_start(&container.id, &[name.to_string()], tracker)
            .await?;
        tracing::info!(service = name, container = %container.id, "Service started");
        Ok(())
    }

    async fn run_script(
        &self,
        plan: &ExecutionPlan,
        script: &Path,
        user: Option<&str>,
        tracker: &mut ResourceTracker,
    ) -> Result<i64, DockerError> {
        self.console
            .print_line("----- Starting step commands container -----");
        self.console.print_line(&format!(
            "Creating container for script with image: {}",
            plan.image
        ));

        let host_dir = plan.working_directory.display().to_string();
        let command = container_script_path(script, &plan.working_directory);
        let spec = ContainerSpec::new(plan.image.clone())
            .with_cmd(vec![command])
            .with_working_dir(self.config.container_working_dir.clone())
            .with_user(user.map(str::to_string))
            .with_env(plan.env_pairs())
            .with_workspace(&host_dir, &self.config.container_working_dir, &plan.mounts)
            .attached();

        let container = self.engine.create_container(&spec).await?;
        tracker.record_script(container.id.clone());

        self.print_warnings(&container.warnings);
        self.console
            .print_line(&format!("Created container: {}", container.id));
        self.attach_and_start(&container.id, &[], tracker).await?;

        let logs = self.engine.stream_logs(&container.id);
        let mut relay = LogRelay::new(self.console.as_ref());
        let (relayed, exit_status) =
            tokio::join!(relay.relay(logs), self.engine.wait_for_exit(&container.id));

        let exit_status = exit_status?;
        let lines = relayed?;
        tracing::debug!(container = %container.id, lines = lines, "Script output relayed");

        self.console.print_line(&format!(
            "Container '{}' exited with status {exit_status}",
            container.id
        ));
        self.console
            .print_line("----- Finished step commands container -----");
        Ok(exit_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::console::MemoryConsole;
    use crate::execution::fakes::{EngineCall, RecordingEngine};
    use std::path::PathBuf;

    fn orchestrator(engine: Arc<RecordingEngine>, console: Arc<MemoryConsole>) -> Orchestrator {
        Orchestrator::new(engine, console, EngineConfig::default())
    }

    fn script() -> PathBuf {
        PathBuf::from("/some-dir/tmpscript.sh")
    }

    #[test]
    fn test_run_stage_display() {
        assert_eq!(RunStage::StartingServices.to_string(), "starting_services");
        assert_eq!(RunStage::RunningScript.to_string(), "running_script");
    }

    #[test]
    fn test_failure_kind_from_error() {
        let err = DockerError::MissingExitStatus {
            id: "c1".to_string(),
        };
        assert_eq!(FailureKind::from(&err), FailureKind::MissingExitStatus);
        let err = DockerError::InvalidResponse("x".to_string());
        assert_eq!(FailureKind::from(&err), FailureKind::Daemon);
    }

    #[test]
    fn test_completed_result_message() {
        let ok = RunResult::completed(0, Utc::now());
        assert!(ok.success);
        assert_eq!(ok.message, "Container completed with status 0");

        let failed = RunResult::completed(127, Utc::now());
        assert!(!failed.success);
        assert_eq!(failed.message, "Container completed with status 127");
        assert_eq!(failed.exit_status, Some(127));
    }

    #[tokio::test]
    async fn test_script_container_spec() {
        let engine = Arc::new(RecordingEngine::new());
        let console = Arc::new(MemoryConsole::new());
        let plan = ExecutionPlan::new("busybox:latest", "/some-dir")
            .with_pull(false)
            .with_env("ENV1", "value1")
            .with_env("ENV2", "value2")
            .with_mount("/cache:/cache")
            .with_mount("/misc:/misc:ro");

        let result = orchestrator(engine.clone(), console.clone())
            .run(&plan, &script(), Some("10:20"))
            .await;

        assert!(result.success);
        let specs = engine.created_specs();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.image, "busybox:latest");
        assert_eq!(spec.cmd, Some(vec!["./tmpscript.sh".to_string()]));
        assert_eq!(spec.working_dir.as_deref(), Some("/working"));
        assert_eq!(spec.user.as_deref(), Some("10:20"));
        assert_eq!(
            spec.binds,
            vec!["/some-dir:/working", "/cache:/cache", "/misc:/misc:ro"]
        );
        assert_eq!(spec.env, vec!["ENV1=value1", "ENV2=value2"]);
        assert!(spec.attach_output);
    }

    #[tokio::test]
    async fn test_run_script_transcript() {
        let engine = Arc::new(
            RecordingEngine::new().with_logs(&["Script result line 1\n", "Script result line 2\n"]),
        );
        let console = Arc::new(MemoryConsole::new());
        let plan = ExecutionPlan::new("busybox:latest", "/some-dir").with_pull(false);

        orchestrator(engine, console.clone())
            .run(&plan, &script(), None)
            .await;

        assert_eq!(
            console.lines(),
            vec![
                "----- Starting step commands container -----",
                "Creating container for script with image: busybox:latest",
                "Created container: c1",
                "Started container: c1",
                "Script result line 1",
                "Script result line 2",
                "Container 'c1' exited with status 0",
                "----- Finished step commands container -----",
                "Stopping container: c1",
                "Removing container: c1",
            ]
        );
    }

    #[tokio::test]
    async fn test_service_container_spec() {
        let engine = Arc::new(RecordingEngine::new().with_container_warnings(&["low memory"]));
        let console = Arc::new(MemoryConsole::new());
        let plan = ExecutionPlan::new("busybox:latest", "/w")
            .with_pull(false)
            .with_service("serv1", "postgres:16")
            .with_env("ENV1", "value1");

        orchestrator(engine.clone(), console.clone())
            .run(&plan, &script(), None)
            .await;

        let service = &engine.created_specs()[0];
        let container_name = service.name.as_deref().expect("service containers are named");
        assert!(container_name.starts_with("serv1_"));
        assert!(container_name.len() > "serv1_".len());
        assert_eq!(service.image, "postgres:16");
        assert_eq!(service.env, vec!["ENV1=value1"]);
        assert!(service.cmd.is_none());
        assert!(service.binds.is_empty());

        assert!(console.contains("Starting service 'serv1' from image: postgres:16"));
        assert!(console.contains("WARNING: low memory"));
        assert!(console.contains("Created container: serv1/c1"));
        assert!(console.contains("Attached to network: net-1"));
        assert!(engine.calls().contains(&EngineCall::Connect {
            container: "c1".to_string(),
            network: "net-1".to_string(),
            aliases: vec!["serv1".to_string()],
        }));
        // The script container joins the network without an alias.
        assert!(engine.calls().contains(&EngineCall::Connect {
            container: "c2".to_string(),
            network: "net-1".to_string(),
            aliases: Vec::new(),
        }));
    }

    #[tokio::test]
    async fn test_service_container_names_differ_between_runs() {
        let engine = Arc::new(RecordingEngine::new());
        let console = Arc::new(MemoryConsole::new());
        let plan = ExecutionPlan::new("busybox", "/w")
            .with_pull(false)
            .with_service("db", "postgres");

        let orchestrator = orchestrator(engine.clone(), console);
        orchestrator.run(&plan, &script(), None).await;
        orchestrator.run(&plan, &script(), None).await;

        let names: Vec<String> = engine
            .created_specs()
            .into_iter()
            .filter(|spec| spec.image == "postgres")
            .filter_map(|spec| spec.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
    }

    #[tokio::test]
    async fn test_network_name_uses_prefix() {
        let engine = Arc::new(RecordingEngine::new().with_network_warning("subnet reused"));
        let console = Arc::new(MemoryConsole::new());
        let plan = ExecutionPlan::new("busybox", "/w")
            .with_pull(false)
            .with_service("db", "postgres");

        orchestrator(engine.clone(), console.clone())
            .run(&plan, &script(), None)
            .await;

        let names: Vec<String> = engine
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::CreateNetwork(name) => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("step_services_"));
        assert!(console.contains("WARNING: subnet reused"));
        assert!(console.contains("Network created: net-1"));
        assert!(console.contains("Removed network: net-1"));
    }
}
