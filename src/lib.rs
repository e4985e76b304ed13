//! docker-step: run a build step inside ephemeral Docker containers.
//!
//! This library pulls the step's images, starts service containers on a
//! private network, runs the step script in a one-shot container with live
//! output, and always tears down what it created.

pub mod cli;
pub mod error;
pub mod execution;

// Re-export commonly used error types
pub use error::{DockerError, PlanError};
