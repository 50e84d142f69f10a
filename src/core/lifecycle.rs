//! Container lifecycle callbacks.
//!
//! A service is `STOPPED` when it has no instance record and `RUNNING` when it
//! has one. The record file is the only source of truth: the runtime is never
//! queried. Every event first stops whatever the record points at; start
//! events then launch a fresh container and record its id.

use crate::adapters::container::ContainerRuntime;
use crate::core::manager::{ServiceCallback, ServiceDefinition, ServiceManager};
use crate::domain::model::{ArgumentKind, ServiceEvent};
use crate::domain::ports::HookEnvironment;
use crate::utils::error::{ReconcileError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const INSTANCE_RECORD_PREFIX: &str = "CONTAINER_ID";

/// On-disk marker tying a service to its running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    path: PathBuf,
}

impl InstanceRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_service(dir: &Path, service_name: &str) -> Self {
        let safe_name: String = service_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Self::new(dir.join(format!("{}.{}", INSTANCE_RECORD_PREFIX, safe_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// The recorded instance id; an empty record reads as `None`.
    pub fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let id = content.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, instance_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, instance_id)?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Volumes, then ports, then the image, then container arguments. The runtime
/// CLI is positional, so this order is fixed.
pub fn compose_run_args(
    service: &ServiceDefinition<'_>,
    env: &dyn HookEnvironment,
) -> Result<Vec<String>> {
    let mut args = service.arguments(ArgumentKind::Volume, env)?;
    args.extend(service.arguments(ArgumentKind::Port, env)?);
    args.push(service.name().to_string());
    args.extend(service.arguments(ArgumentKind::Container, env)?);
    Ok(args)
}

/// Runs the service's image (the service name) as a container.
pub struct ContainerCallback<'r> {
    runtime: ContainerRuntime<'r>,
}

impl<'r> ContainerCallback<'r> {
    pub fn new(runtime: ContainerRuntime<'r>) -> Self {
        Self { runtime }
    }

    pub fn instance_record(&self, env: &dyn HookEnvironment, service_name: &str) -> InstanceRecord {
        InstanceRecord::for_service(env.execution().charm_dir(), service_name)
    }

    fn stop_tracked(&self, record: &InstanceRecord, service_name: &str) -> Result<()> {
        if let Some(instance_id) = record.read()? {
            tracing::info!("Stopping container {} for {}", instance_id, service_name);
            self.runtime.stop(&instance_id)?;
            if !self.runtime.remove(&instance_id) {
                tracing::warn!("Container {} could not be removed", instance_id);
            }
        }
        record.remove()
    }

    fn launch(
        &self,
        record: &InstanceRecord,
        service: &ServiceDefinition<'_>,
        env: &dyn HookEnvironment,
    ) -> Result<String> {
        let args = compose_run_args(service, env)?;
        let printed_id = self.runtime.run(record.path(), &args)?;

        // The runtime normally writes the record itself via --cidfile.
        if let Some(recorded) = record.read()? {
            return Ok(recorded);
        }
        if printed_id.is_empty() {
            return Err(ReconcileError::RuntimeError {
                message: format!(
                    "{} run reported no container id for {}",
                    self.runtime.binary(),
                    service.name()
                ),
            });
        }
        record.write(&printed_id)?;
        Ok(printed_id)
    }
}

impl ServiceCallback for ContainerCallback<'_> {
    fn call(&self, manager: &ServiceManager<'_>, service_name: &str, event: ServiceEvent) -> Result<()> {
        let env = manager.environment();
        let service = manager
            .get_service(service_name)
            .ok_or_else(|| ReconcileError::ConfigError {
                message: format!("unknown service '{}'", service_name),
            })?;
        let record = self.instance_record(env, service_name);

        self.stop_tracked(&record, service_name)?;

        if event == ServiceEvent::Start {
            let instance_id = self.launch(&record, service, env)?;
            tracing::info!("Started container {} for {}", instance_id, service_name);
        }
        Ok(())
    }
}

/// Opens the service's ports on start and closes them on stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortCallback;

impl ServiceCallback for PortCallback {
    fn call(&self, manager: &ServiceManager<'_>, service_name: &str, event: ServiceEvent) -> Result<()> {
        let env = manager.environment();
        let Some(service) = manager.get_service(service_name) else {
            return Ok(());
        };
        for port in service.ports() {
            match event {
                ServiceEvent::Start => env.open_port(*port, "TCP")?,
                ServiceEvent::Stop => env.close_port(*port, "TCP")?,
            }
        }
        Ok(())
    }
}
