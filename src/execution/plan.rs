//! The execution plan consumed by the orchestrator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PlanError;

fn default_pull() -> bool {
    true
}

/// Everything needed to run one build step.
///
/// Services and environment are kept in ordered maps, so "plan order" is the
/// lexical order of their keys and every run of the same plan produces the
/// same transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Image the step's commands run in.
    pub image: String,
    /// Pull the step image and all service images before running.
    #[serde(default = "default_pull")]
    pub pull: bool,
    /// Shell command lines making up the step script.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Service name to service image.
    #[serde(default)]
    pub services: BTreeMap<String, String>,
    /// Absolute host path of the step's working directory.
    pub working_directory: PathBuf,
    /// Environment variables for the script and service containers.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Extra bind mounts (`hostPath:containerPath[:mode]`), in order.
    #[serde(default)]
    pub mounts: Vec<String>,
}

impl ExecutionPlan {
    /// Creates a plan for `image` running in `working_directory`, with pulling enabled.
    pub fn new(image: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            pull: true,
            commands: Vec::new(),
            services: BTreeMap::new(),
            working_directory: working_directory.into(),
            environment: BTreeMap::new(),
            mounts: Vec::new(),
        }
    }

    /// Loads a plan from a JSON or YAML file, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let plan: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Checks the fields the orchestrator relies on.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.image.trim().is_empty() {
            return Err(PlanError::Invalid("image must not be empty".to_string()));
        }
        if !self.working_directory.is_absolute() {
            return Err(PlanError::Invalid(format!(
                "working directory '{}' must be absolute",
                self.working_directory.display()
            )));
        }
        if let Some((name, _)) = self.services.iter().find(|(_, image)| image.trim().is_empty()) {
            return Err(PlanError::Invalid(format!(
                "service '{name}' has no image"
            )));
        }
        Ok(())
    }

    /// Enables or disables pulling.
    pub fn with_pull(mut self, pull: bool) -> Self {
        self.pull = pull;
        self
    }

    /// Sets the command lines.
    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.commands = commands;
        self
    }

    /// Adds a service container.
    pub fn with_service(mut self, name: impl Into<String>, image: impl Into<String>) -> Self {
        self.services.insert(name.into(), image.into());
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Appends a bind mount.
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mounts.push(mount.into());
        self
    }

    /// Returns `true` if the run needs a services network.
    pub fn has_services(&self) -> bool {
        !self.services.is_empty()
    }

    /// Images to pull, step image first, then service images in plan order.
    pub fn images_to_pull(&self) -> Vec<&str> {
        std::iter::once(self.image.as_str())
            .chain(self.services.values().map(String::as_str))
            .collect()
    }

    /// Environment serialized as `KEY=VALUE` pairs.
    pub fn env_pairs(&self) -> Vec<String> {
        self.environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }
}
