//! Hook handlers for a charm that runs one container described by a
//! [`CharmManifest`].
//!
//! Service definitions are rebuilt from the manifest on every hook; nothing
//! about them survives between invocations except the instance record and the
//! persisted config snapshot.

use crate::adapters::container::ContainerRuntime;
use crate::adapters::host::SystemServices;
use crate::config::manifest::{render_placeholders, CharmManifest, Placeholder};
use crate::core::checksum::ChecksumGuard;
use crate::core::hooks::{hook_name, HookRegistry};
use crate::core::lifecycle::{ContainerCallback, PortCallback};
use crate::core::manager::{ServiceDefinition, ServiceManager};
use crate::core::persistent_config::PersistentConfig;
use crate::core::providers::{
    address_port_mapper, ContainerArgs, PortMappings, ProvidedData, RelationArgs,
    RelationContext, Volumes,
};
use crate::domain::model::{ReconcileOutcome, ServiceEvent};
use crate::domain::ports::{CommandRunner, HookEnvironment};
use crate::utils::error::{ReconcileError, Result};
use serde_json::{Map, Value};

/// Everything a hook handler gets to work with.
pub struct Charm<'a> {
    env: &'a dyn HookEnvironment,
    runner: &'a dyn CommandRunner,
    manifest: CharmManifest,
    hook: String,
    outcomes: Vec<ReconcileOutcome>,
}

impl<'a> Charm<'a> {
    pub fn new(
        env: &'a dyn HookEnvironment,
        runner: &'a dyn CommandRunner,
        manifest: CharmManifest,
    ) -> Self {
        Self {
            env,
            runner,
            manifest,
            hook: String::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn manifest(&self) -> &CharmManifest {
        &self.manifest
    }

    /// Name of the hook currently running, empty outside `run`.
    pub fn hook(&self) -> &str {
        &self.hook
    }

    /// Dispatches `arg0` through `registry` and returns what was reconciled.
    pub fn run(
        &mut self,
        registry: &HookRegistry<Charm<'a>>,
        arg0: &str,
    ) -> Result<Vec<ReconcileOutcome>> {
        self.hook = hook_name(arg0).to_string();
        self.outcomes.clear();
        registry.execute(arg0, self)?;
        Ok(std::mem::take(&mut self.outcomes))
    }

    fn runtime(&self) -> ContainerRuntime<'a> {
        ContainerRuntime::with_binary(self.runner, self.manifest.service.runtime.clone())
    }

    pub fn build_services(&self) -> Result<Vec<ServiceDefinition<'a>>> {
        let config = self.env.config()?;
        let manifest = &self.manifest;

        let mut volumes = Volumes::new();
        if let Some(mode) = manifest.volumes.mode {
            volumes = volumes.with_mode(mode);
        }
        if let Some(owner) = manifest.volumes.owner {
            volumes = volumes.with_owner(owner);
        }
        for volume in &manifest.volumes.anonymous {
            volumes = volumes.with_volume(volume.as_str());
        }
        for volume in &manifest.volumes.named {
            volumes = volumes.with_named(volume.name.as_str(), volume.container.as_str());
        }
        for volume in &manifest.volumes.mapped {
            let host_path = match (&volume.host_path, &volume.host_path_config) {
                (Some(path), _) => path.clone(),
                (None, Some(key)) => config_string(&config, key)?,
                (None, None) => {
                    return Err(ReconcileError::ConfigError {
                        message: format!("volume {} has no host path", volume.container),
                    })
                }
            };
            volumes = volumes.with_mapped(host_path, volume.container.as_str());
        }

        let mut container_args = Vec::new();
        if let Some(command) = &manifest.container.command {
            container_args.push(self.render(command, &config)?);
        }
        for arg in &manifest.container.args {
            container_args.push(self.render(arg, &config)?);
        }
        let mut container = ContainerArgs::new(container_args);
        for (key, value) in &manifest.container.options {
            container = container.with_option(key, self.render(value, &config)?);
        }

        let ports = PortMappings::new(
            manifest
                .ports
                .iter()
                .map(|port| (port.host, port.container)),
        );

        let mut service = ServiceDefinition::new(manifest.service.image.as_str())
            .with_ports(manifest.host_ports())
            .with_required(volumes)
            .with_required(ports)
            .with_required(container);

        for required in &manifest.requires {
            service = service.with_required(RelationArgs::relation(RelationContext::new(
                required.relation.as_str(),
                required.interface.as_str(),
                required.required_keys.iter().cloned(),
            )));
        }

        if let Some(peers) = &manifest.peers {
            let context = RelationContext::new(
                peers.relation.as_str(),
                peers.interface.as_str(),
                peers.required_keys.iter().cloned(),
            );
            service = service.with_required(RelationArgs::peers(context).with_mapper(
                address_port_mapper(peers.flag.as_str(), peers.address_key.as_str(), peers.join_port),
            ));
        }

        for provided in &manifest.provides {
            service = service.with_provided(
                ProvidedData::new(provided.relation.as_str(), provided.data.clone())
                    .with_required_keys(provided.required_keys.iter().cloned())
                    .with_renderer(Box::new(render_value)),
            );
        }

        let service = service
            .on_start(ContainerCallback::new(self.runtime()))
            .on_start(PortCallback);

        Ok(vec![service])
    }

    fn render(&self, template: &str, config: &Map<String, Value>) -> Result<String> {
        render_placeholders(template, |placeholder| resolve(self.env, placeholder, config))
    }

    /// Only what stopping needs: no config lookups and no placeholder rendering,
    /// so a unit can always be stopped.
    pub fn build_stop_services(&self) -> Vec<ServiceDefinition<'a>> {
        let service = ServiceDefinition::new(self.manifest.service.image.as_str())
            .with_ports(self.manifest.host_ports())
            .on_stop(ContainerCallback::new(self.runtime()))
            .on_stop(PortCallback);
        vec![service]
    }

    fn manage(&self) -> Result<Vec<ReconcileOutcome>> {
        let services = match ServiceEvent::from_hook_name(&self.hook) {
            ServiceEvent::Stop => self.build_stop_services(),
            ServiceEvent::Start => self.build_services()?,
        };
        let mut manager = ServiceManager::new(self.env, services)?;
        manager.manage(&self.hook)
    }

    fn load_config(&self) -> Result<PersistentConfig> {
        PersistentConfig::load(self.env.config()?, self.env.execution().charm_dir())
    }
}

/// Renders a manifest value against the current unit and charm config.
pub fn render_value(env: &dyn HookEnvironment, template: &str) -> Result<String> {
    let config = env.config()?;
    render_placeholders(template, |placeholder| resolve(env, placeholder, &config))
}

fn resolve(
    env: &dyn HookEnvironment,
    placeholder: Placeholder<'_>,
    config: &Map<String, Value>,
) -> Result<String> {
    let missing = |what: &str| ReconcileError::ConfigError {
        message: format!("no value available for {}", what),
    };
    match placeholder {
        Placeholder::PublicAddress => env
            .unit_get("public-address")?
            .ok_or_else(|| missing("public-address")),
        Placeholder::PrivateAddress => env
            .unit_get("private-address")?
            .ok_or_else(|| missing("private-address")),
        Placeholder::Hostname => env.hostname().ok_or_else(|| missing("hostname")),
        Placeholder::MachineName => env
            .hostname()
            .map(|hostname| hostname.replace('-', "_"))
            .ok_or_else(|| missing("machine-name")),
        Placeholder::UnitName => Ok(env.execution().unit_name.clone()),
        Placeholder::Config(key) => config_string(config, key),
    }
}

fn config_string(config: &Map<String, Value>, key: &str) -> Result<String> {
    match config.get(key) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
        Some(Value::Null) | None => Err(ReconcileError::ConfigError {
            message: format!("config option '{}' is not set", key),
        }),
        Some(Value::String(_)) => Err(ReconcileError::ConfigError {
            message: format!("config option '{}' is empty", key),
        }),
        Some(other) => Ok(other.to_string()),
    }
}

pub fn install(charm: &mut Charm<'_>) -> Result<()> {
    charm.runtime().pull(&charm.manifest.service.image)
}

pub fn config_changed(charm: &mut Charm<'_>) -> Result<()> {
    let mut config = charm.load_config()?;
    for volume in &charm.manifest.volumes.mapped {
        if let Some(key) = &volume.host_path_config {
            if config.has_previous() && config.changed(key) {
                tracing::info!(
                    "{} changed from {:?} to {:?}; existing data is not moved",
                    key,
                    config.previous(key),
                    config.get(key)
                );
            }
        }
    }

    let services = SystemServices::new(charm.runner);
    let restart_map = charm
        .manifest
        .restart_map(charm.env.execution().charm_dir());
    let guard = ChecksumGuard::new(restart_map, &services)
        .with_strategy(charm.manifest.restart_strategy);
    let outcomes = guard.guard(|| charm.manage())?;

    config.save()?;
    charm.outcomes = outcomes;
    Ok(())
}

pub fn manage(charm: &mut Charm<'_>) -> Result<()> {
    let outcomes = charm.manage()?;
    charm.load_config()?.save()?;
    charm.outcomes = outcomes;
    Ok(())
}

/// Every hook the manifest's service reacts to.
pub fn hook_registry<'a>(manifest: &CharmManifest) -> Result<HookRegistry<Charm<'a>>> {
    let mut registry: HookRegistry<Charm<'a>> = HookRegistry::new();
    registry.register("install", install)?;
    registry.register("config-changed", config_changed)?;
    for hook in ["start", "stop", "upgrade-charm"] {
        registry.register(hook, manage)?;
    }

    if let Some(peers) = &manifest.peers {
        for suffix in ["joined", "changed", "departed"] {
            registry.register(format!("{}-relation-{}", peers.relation, suffix), manage)?;
        }
    }
    for required in &manifest.requires {
        for suffix in ["joined", "changed", "departed", "broken"] {
            registry.register(format!("{}-relation-{}", required.relation, suffix), manage)?;
        }
    }
    for provided in &manifest.provides {
        for suffix in ["joined", "changed"] {
            registry.register(format!("{}-relation-{}", provided.relation, suffix), manage)?;
        }
    }
    Ok(registry)
}
