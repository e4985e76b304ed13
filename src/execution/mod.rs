//! Docker execution layer for build steps.
//!
//! This module runs one build step in ephemeral containers using the bollard
//! crate: it pulls images, creates a private network for service containers,
//! runs the step script while relaying its output, and tears everything down.
//!
//! # Architecture
//!
//! ```text
//! ContainerEngine (DockerClient | RecordingEngine)
//!        ↑
//! LogRelay, ResourceTracker, pull
//!        ↑
//! Orchestrator → RunResult
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docker_step::execution::{
//!     DockerClient, EngineConfig, ExecutionPlan, Orchestrator, StdoutConsole,
//! };
//!
//! let config = EngineConfig::default();
//! let client = DockerClient::connect(&config)?;
//! let orchestrator = Orchestrator::new(Arc::new(client), Arc::new(StdoutConsole), config);
//!
//! let plan = ExecutionPlan::new("python:3.11-slim", "/builds/app")
//!     .with_service("db", "postgres:16");
//! let result = orchestrator.run(&plan, "/builds/app/commands.sh".as_ref(), None).await;
//! println!("{}", result.message);
//! ```

pub mod config;
pub mod console;
pub mod docker_client;
pub mod engine;
pub mod fakes;
pub mod log_relay;
pub mod orchestrator;
pub mod plan;
pub mod pull;
pub mod script;
pub mod tracker;

pub use config::EngineConfig;
pub use console::{ConsoleSink, MemoryConsole, StdoutConsole};
pub use docker_client::DockerClient;
pub use engine::{ContainerCreated, ContainerEngine, ContainerSpec, NetworkCreated, PullProgress};
pub use log_relay::LogRelay;
pub use orchestrator::{FailureKind, Orchestrator, RunResult, RunStage};
pub use plan::ExecutionPlan;
pub use pull::PullOutcome;
pub use tracker::{ResourceTracker, ServiceHandle, TeardownFailure, TrackedResource};
