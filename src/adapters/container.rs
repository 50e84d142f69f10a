use crate::domain::ports::CommandRunner;
use crate::utils::error::{ReconcileError, Result};
use std::path::Path;

pub const DEFAULT_RUNTIME: &str = "docker";

/// The slice of the container runtime CLI the engine relies on.
pub struct ContainerRuntime<'a> {
    runner: &'a dyn CommandRunner,
    binary: String,
}

impl<'a> ContainerRuntime<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self::with_binary(runner, DEFAULT_RUNTIME)
    }

    pub fn with_binary(runner: &'a dyn CommandRunner, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn pull(&self, image: &str) -> Result<()> {
        tracing::info!("Pulling image {}", image);
        self.runner.check_call(&self.binary, &["pull", image])
    }

    /// Starts a detached container and returns the id the runtime printed.
    /// `args` is everything after `--cidfile <path>`: volumes, ports, image, command.
    pub fn run(&self, cidfile: &Path, args: &[String]) -> Result<String> {
        let cidfile = cidfile.to_string_lossy().into_owned();
        let mut full_args: Vec<&str> = vec!["run", "-d", "--cidfile", cidfile.as_str()];
        full_args.extend(args.iter().map(String::as_str));

        let stdout = self.runner.check_output(&self.binary, &full_args)?;
        let instance_id = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string();
        Ok(instance_id)
    }

    pub fn stop(&self, instance_id: &str) -> Result<()> {
        if instance_id.trim().is_empty() {
            return Err(ReconcileError::RuntimeError {
                message: "refusing to stop an empty instance id".to_string(),
            });
        }
        self.runner.check_call(&self.binary, &["stop", instance_id])
    }

    /// Best effort; a container that is already gone is not an error.
    pub fn remove(&self, instance_id: &str) -> bool {
        self.runner.call(&self.binary, &["rm", instance_id])
    }
}
