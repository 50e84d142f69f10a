use crate::adapters::container::DEFAULT_RUNTIME;
use crate::adapters::host::Ownership;
use crate::core::checksum::{RestartMap, RestartStrategy};
use crate::utils::error::{ReconcileError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_port, validate_relation_name,
    validate_unique, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const MANIFEST_FILE_NAME: &str = "charm.toml";

/// Declarative description of the single containerised service a charm runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharmManifest {
    pub service: ServiceSection,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub volumes: VolumeSection,
    #[serde(default)]
    pub container: ContainerSection,
    pub peers: Option<PeerSection>,
    #[serde(default)]
    pub requires: Vec<RequiredRelation>,
    #[serde(default)]
    pub provides: Vec<ProvidedRelation>,
    #[serde(default)]
    pub restart_on_change: Vec<RestartEntry>,
    #[serde(default)]
    pub restart_strategy: RestartStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    pub image: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeSection {
    #[serde(default)]
    pub anonymous: Vec<String>,
    #[serde(default)]
    pub named: Vec<NamedVolume>,
    #[serde(default)]
    pub mapped: Vec<MappedVolume>,
    /// Mode for host directories created for mapped volumes, e.g. `0o750`.
    pub mode: Option<u32>,
    pub owner: Option<Ownership>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedVolume {
    pub name: String,
    pub container: String,
}

/// A bind mount. The host side is either literal or read from a charm config key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappedVolume {
    pub host_path: Option<String>,
    pub host_path_config: Option<String>,
    pub container: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSection {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSection {
    pub relation: String,
    pub interface: String,
    #[serde(default = "default_peer_keys")]
    pub required_keys: Vec<String>,
    pub join_port: u16,
    #[serde(default = "default_join_flag")]
    pub flag: String,
    #[serde(default = "default_address_key")]
    pub address_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredRelation {
    pub relation: String,
    pub interface: String,
    #[serde(default)]
    pub required_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidedRelation {
    pub relation: String,
    pub interface: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub required_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartEntry {
    pub path: String,
    pub services: Vec<String>,
}

fn default_runtime() -> String {
    DEFAULT_RUNTIME.to_string()
}

fn default_peer_keys() -> Vec<String> {
    vec![default_address_key()]
}

fn default_join_flag() -> String {
    "--join".to_string()
}

fn default_address_key() -> String {
    "private-address".to_string()
}

impl CharmManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| ReconcileError::ConfigError {
            message: format!("cannot read manifest {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = substitute_env_vars(content)?;
        Ok(toml::from_str(&processed_content)?)
    }

    /// Watched paths, with relative paths resolved against `charm_dir`.
    pub fn restart_map(&self, charm_dir: &Path) -> RestartMap {
        self.restart_on_change
            .iter()
            .fold(RestartMap::new(), |map, entry| {
                let path = Path::new(&entry.path);
                let path = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    charm_dir.join(path)
                };
                map.watch(path, entry.services.iter().cloned())
            })
    }

    pub fn host_ports(&self) -> Vec<u16> {
        self.ports.iter().map(|port| port.host).collect()
    }

    /// Every string that may carry `{{placeholder}}` tokens.
    fn templated_values(&self) -> impl Iterator<Item = &String> {
        self.container
            .command
            .iter()
            .chain(self.container.args.iter())
            .chain(self.container.options.values())
            .chain(self.provides.iter().flat_map(|provided| provided.data.values()))
    }
}

impl Validate for CharmManifest {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("service.image", &self.service.image)?;
        validate_non_empty_string("service.runtime", &self.service.runtime)?;

        for port in &self.ports {
            validate_port("ports.host", port.host)?;
            validate_port("ports.container", port.container)?;
        }
        validate_unique("ports.host", &self.host_ports())?;

        for volume in &self.volumes.anonymous {
            validate_path("volumes.anonymous", volume)?;
        }
        for volume in &self.volumes.named {
            validate_non_empty_string("volumes.named.name", &volume.name)?;
            validate_path("volumes.named.container", &volume.container)?;
        }
        if let Some(mode) = self.volumes.mode {
            if mode > 0o7777 {
                return Err(ReconcileError::InvalidConfigValueError {
                    field: "volumes.mode".to_string(),
                    value: format!("{:o}", mode),
                    reason: "Mode must fit in 0o7777".to_string(),
                });
            }
        }
        for volume in &self.volumes.mapped {
            validate_path("volumes.mapped.container", &volume.container)?;
            match (&volume.host_path, &volume.host_path_config) {
                (Some(path), None) => validate_path("volumes.mapped.host_path", path)?,
                (None, Some(key)) => validate_non_empty_string("volumes.mapped.host_path_config", key)?,
                _ => {
                    return Err(ReconcileError::InvalidConfigValueError {
                        field: "volumes.mapped".to_string(),
                        value: volume.container.clone(),
                        reason: "Exactly one of host_path or host_path_config is required"
                            .to_string(),
                    })
                }
            }
        }

        let mut relation_names = Vec::new();
        if let Some(peers) = &self.peers {
            validate_relation_name("peers.relation", &peers.relation)?;
            validate_non_empty_string("peers.interface", &peers.interface)?;
            validate_port("peers.join_port", peers.join_port)?;
            relation_names.push(peers.relation.as_str());
        }
        for required in &self.requires {
            validate_relation_name("requires.relation", &required.relation)?;
            validate_non_empty_string("requires.interface", &required.interface)?;
            relation_names.push(required.relation.as_str());
        }
        for provided in &self.provides {
            validate_relation_name("provides.relation", &provided.relation)?;
            validate_non_empty_string("provides.interface", &provided.interface)?;
            relation_names.push(provided.relation.as_str());
        }
        validate_unique("relation", &relation_names)?;

        for entry in &self.restart_on_change {
            validate_path("restart_on_change.path", &entry.path)?;
            if entry.services.is_empty() {
                return Err(ReconcileError::InvalidConfigValueError {
                    field: "restart_on_change.services".to_string(),
                    value: entry.path.clone(),
                    reason: "At least one service must be restarted".to_string(),
                });
            }
        }

        for value in self.templated_values() {
            placeholders(value)?;
        }
        Ok(())
    }
}

/// Replaces `${VAR}` with the environment value. Unset variables are left as-is.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = compile(r"\$\{([^}]+)\}")?;
    let result = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    });
    Ok(result.into_owned())
}

/// A per-invocation value that a manifest string can refer to as `{{token}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder<'t> {
    PublicAddress,
    PrivateAddress,
    Hostname,
    /// The hostname with `-` replaced by `_`.
    MachineName,
    UnitName,
    Config(&'t str),
}

impl<'t> Placeholder<'t> {
    pub fn parse(token: &'t str) -> Result<Self> {
        match token {
            "public-address" => Ok(Placeholder::PublicAddress),
            "private-address" => Ok(Placeholder::PrivateAddress),
            "hostname" => Ok(Placeholder::Hostname),
            "machine-name" => Ok(Placeholder::MachineName),
            "unit-name" => Ok(Placeholder::UnitName),
            _ => match token.strip_prefix("config:") {
                Some(key) if !key.is_empty() => Ok(Placeholder::Config(key)),
                _ => Err(ReconcileError::InvalidConfigValueError {
                    field: "placeholder".to_string(),
                    value: token.to_string(),
                    reason: "Unknown placeholder".to_string(),
                }),
            },
        }
    }
}

fn placeholder_regex() -> Result<Regex> {
    compile(r"\{\{\s*([A-Za-z0-9:_\-]+)\s*\}\}")
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ReconcileError::ConfigError {
        message: format!("invalid pattern {}: {}", pattern, e),
    })
}

/// All placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Result<Vec<Placeholder<'_>>> {
    let re = placeholder_regex()?;
    let mut found = Vec::new();
    for caps in re.captures_iter(template) {
        if let Some(token) = caps.get(1) {
            found.push(Placeholder::parse(token.as_str())?);
        }
    }
    Ok(found)
}

/// Substitutes every `{{token}}` in `template` with the value `lookup` returns.
pub fn render_placeholders<F>(template: &str, mut lookup: F) -> Result<String>
where
    F: FnMut(Placeholder<'_>) -> Result<String>,
{
    let re = placeholder_regex()?;
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let (Some(whole), Some(token)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(&lookup(Placeholder::parse(token.as_str())?)?);
        last = whole.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}
