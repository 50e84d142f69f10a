//! Data providers a service definition is assembled from.
//!
//! Each provider is a `DataCollector` (it knows whether it has enough data) and
//! most are also an `ArgumentBuilder` (they contribute to the container command
//! line). Relation-backed providers query the control plane once, in
//! `collect`, and are read-only afterwards.

use crate::adapters::host::{self, Ownership};
use crate::domain::model::{ArgumentKind, UnitData};
use crate::domain::ports::{ArgumentBuilder, DataCollector, DataPublisher, HookEnvironment};
use crate::utils::error::Result;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Host to container port publications, emitted in the order given.
#[derive(Debug, Clone, Default)]
pub struct PortMappings {
    mappings: Vec<(u16, u16)>,
}

impl PortMappings {
    pub fn new(mappings: impl IntoIterator<Item = (u16, u16)>) -> Self {
        Self {
            mappings: mappings.into_iter().collect(),
        }
    }

    pub fn host_ports(&self) -> Vec<u16> {
        self.mappings.iter().map(|(host, _)| *host).collect()
    }
}

impl DataCollector for PortMappings {
    fn name(&self) -> &str {
        "port-mappings"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn as_argument_builder(&self) -> Option<&dyn ArgumentBuilder> {
        Some(self)
    }
}

impl ArgumentBuilder for PortMappings {
    fn kind(&self) -> ArgumentKind {
        ArgumentKind::Port
    }

    fn build_args(&self, _env: &dyn HookEnvironment) -> Result<Vec<String>> {
        Ok(self
            .mappings
            .iter()
            .flat_map(|(host, container)| ["-p".to_string(), format!("{}:{}", host, container)])
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct Volumes {
    anonymous: Vec<String>,
    named: Vec<(String, String)>,
    mapped: Vec<(PathBuf, String)>,
    mode: u32,
    owner: Option<Ownership>,
}

impl Default for Volumes {
    fn default() -> Self {
        Self {
            anonymous: Vec::new(),
            named: Vec::new(),
            mapped: Vec::new(),
            mode: 0o755,
            owner: None,
        }
    }
}

impl Volumes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(mut self, container_path: impl Into<String>) -> Self {
        self.anonymous.push(container_path.into());
        self
    }

    pub fn with_named(mut self, name: impl Into<String>, container_path: impl Into<String>) -> Self {
        self.named.push((name.into(), container_path.into()));
        self
    }

    /// Relative host paths are resolved against the charm directory.
    pub fn with_mapped(
        mut self,
        host_path: impl Into<PathBuf>,
        container_path: impl Into<String>,
    ) -> Self {
        self.mapped.push((host_path.into(), container_path.into()));
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_owner(mut self, owner: Ownership) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl DataCollector for Volumes {
    fn name(&self) -> &str {
        "volumes"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn as_argument_builder(&self) -> Option<&dyn ArgumentBuilder> {
        Some(self)
    }
}

impl ArgumentBuilder for Volumes {
    fn kind(&self) -> ArgumentKind {
        ArgumentKind::Volume
    }

    fn build_args(&self, env: &dyn HookEnvironment) -> Result<Vec<String>> {
        let mut args = Vec::new();
        for volume in &self.anonymous {
            args.extend(["-v".to_string(), volume.clone()]);
        }
        for (name, volume) in &self.named {
            args.extend(["-v".to_string(), format!("{}:{}", name, volume)]);
        }
        for (host_path, volume) in &self.mapped {
            let host_path = if host_path.is_absolute() {
                host_path.clone()
            } else {
                env.execution().charm_dir().join(host_path)
            };
            host::mkdir(&host_path, self.mode, self.owner)?;
            args.extend(["-v".to_string(), format!("{}:{}", host_path.display(), volume)]);
        }
        Ok(args)
    }
}

/// Literal arguments handed to the container. The first positional token, if
/// any, replaces the image's default command.
#[derive(Debug, Clone, Default)]
pub struct ContainerArgs {
    args: Vec<String>,
}

impl ContainerArgs {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `with_option("machine_name", "db_0")` appends `--machine-name db_0`.
    pub fn with_option(mut self, key: &str, value: impl Into<String>) -> Self {
        self.args.push(format!("--{}", key.replace('_', "-")));
        self.args.push(value.into());
        self
    }

    pub fn command(&self) -> Option<&str> {
        self.args
            .first()
            .map(String::as_str)
            .filter(|first| !first.starts_with('-'))
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl DataCollector for ContainerArgs {
    fn name(&self) -> &str {
        "container-args"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn as_argument_builder(&self) -> Option<&dyn ArgumentBuilder> {
        Some(self)
    }
}

impl ArgumentBuilder for ContainerArgs {
    fn kind(&self) -> ArgumentKind {
        ArgumentKind::Container
    }

    fn build_args(&self, _env: &dyn HookEnvironment) -> Result<Vec<String>> {
        Ok(self.args.clone())
    }
}

/// Complete unit data collected from every relation of one relation name.
///
/// Units are ordered by sorted relation id, then sorted unit name. A unit whose
/// settings lack any required key is left out. `units` stays `None` when the
/// relation has not been established at all.
#[derive(Debug, Clone)]
pub struct RelationContext {
    name: String,
    interface: String,
    required_keys: Vec<String>,
    units: Option<Vec<UnitData>>,
}

impl RelationContext {
    pub fn new<I, S>(name: impl Into<String>, interface: impl Into<String>, required_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            interface: interface.into(),
            required_keys: required_keys.into_iter().map(Into::into).collect(),
            units: None,
        }
    }

    pub fn units(&self) -> &[UnitData] {
        self.units.as_deref().unwrap_or_default()
    }

    pub fn is_established(&self) -> bool {
        self.units.is_some()
    }

    pub fn is_complete(&self, unit_data: &UnitData) -> bool {
        self.required_keys.iter().all(|key| unit_data.contains_key(key))
    }
}

impl DataCollector for RelationContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&mut self, env: &dyn HookEnvironment) -> Result<()> {
        let mut relation_ids = env.relation_ids(&self.name)?;
        if relation_ids.is_empty() {
            self.units = None;
            return Ok(());
        }
        relation_ids.sort();

        let mut units = Vec::new();
        for rid in &relation_ids {
            let mut related = env.related_units(rid)?;
            related.sort();
            for unit in &related {
                match env.relation_get(rid, unit)? {
                    Some(data) if self.is_complete(&data) => units.push(data),
                    Some(_) => tracing::debug!("Unit {} on {} is incomplete", unit, rid),
                    None => tracing::debug!("Unit {} on {} has published nothing", unit, rid),
                }
            }
        }
        self.units = Some(units);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        let ready = !self.units().is_empty();
        if !ready {
            tracing::debug!("Incomplete relation: {} ({})", self.name, self.interface);
        }
        ready
    }

    fn context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        if let Some(units) = &self.units {
            let units = units
                .iter()
                .map(|unit| {
                    Value::Object(
                        unit.iter()
                            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                            .collect(),
                    )
                })
                .collect();
            context.insert(self.name.clone(), Value::Array(units));
        }
        context
    }
}

pub type UnitMapper = Box<dyn Fn(&UnitData) -> Vec<String>>;

/// Every key of the unit's settings becomes `--key value`.
pub fn settings_as_flags(unit: &UnitData) -> Vec<String> {
    unit.iter()
        .flat_map(|(key, value)| [format!("--{}", key), value.clone()])
        .collect()
}

/// Maps each unit to `<flag> <unit[key]>:<port>`, e.g. `--join 10.0.0.2:29015`.
pub fn address_port_mapper(flag: impl Into<String>, key: impl Into<String>, port: u16) -> UnitMapper {
    let flag = flag.into();
    let key = key.into();
    Box::new(move |unit: &UnitData| match unit.get(&key) {
        Some(address) => vec![flag.clone(), format!("{}:{}", address, port)],
        None => Vec::new(),
    })
}

/// Container arguments derived from a relation, one fragment per collected unit.
pub struct RelationArgs {
    context: RelationContext,
    mapper: UnitMapper,
    mandatory: bool,
}

impl RelationArgs {
    /// A relation to another application; the service waits for it.
    pub fn relation(context: RelationContext) -> Self {
        Self {
            context,
            mapper: Box::new(settings_as_flags),
            mandatory: true,
        }
    }

    /// The peer relation. A unit with no peers yet is a valid cluster of one,
    /// so peers never gate readiness.
    pub fn peers(context: RelationContext) -> Self {
        Self {
            context,
            mapper: Box::new(settings_as_flags),
            mandatory: false,
        }
    }

    pub fn with_mapper(mut self, mapper: UnitMapper) -> Self {
        self.mapper = mapper;
        self
    }
}

impl DataCollector for RelationArgs {
    fn name(&self) -> &str {
        self.context.name()
    }

    fn collect(&mut self, env: &dyn HookEnvironment) -> Result<()> {
        self.context.collect(env)
    }

    fn is_ready(&self) -> bool {
        self.context.is_ready()
    }

    fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    fn context(&self) -> Map<String, Value> {
        DataCollector::context(&self.context)
    }

    fn as_argument_builder(&self) -> Option<&dyn ArgumentBuilder> {
        Some(self)
    }
}

impl ArgumentBuilder for RelationArgs {
    fn kind(&self) -> ArgumentKind {
        ArgumentKind::Container
    }

    fn build_args(&self, _env: &dyn HookEnvironment) -> Result<Vec<String>> {
        Ok(self
            .context
            .units()
            .iter()
            .flat_map(|unit| (self.mapper)(unit))
            .collect())
    }
}

/// Turns a stored value into the value to publish, e.g. by filling in addresses.
pub type ValueRenderer = Box<dyn Fn(&dyn HookEnvironment, &str) -> Result<String>>;

/// Settings this unit publishes on one of its relations. Values are rendered
/// only when they are about to be published.
pub struct ProvidedData {
    relation_name: String,
    required_keys: Vec<String>,
    data: UnitData,
    renderer: Option<ValueRenderer>,
}

impl ProvidedData {
    pub fn new(relation_name: impl Into<String>, data: UnitData) -> Self {
        Self {
            relation_name: relation_name.into(),
            required_keys: Vec::new(),
            data,
            renderer: None,
        }
    }

    pub fn with_required_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_renderer(mut self, renderer: ValueRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }
}

impl DataPublisher for ProvidedData {
    fn relation_name(&self) -> &str {
        &self.relation_name
    }

    fn required_keys(&self) -> &[String] {
        &self.required_keys
    }

    fn provide_data(&self, env: &dyn HookEnvironment) -> Result<UnitData> {
        let Some(render) = &self.renderer else {
            return Ok(self.data.clone());
        };
        let mut rendered = UnitData::new();
        for (key, value) in &self.data {
            rendered.insert(key.clone(), render(env, value)?);
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::command::MockRunner;
    use crate::adapters::hookenv::HookContext;
    use crate::domain::model::ExecutionEnvironment;
    use tempfile::TempDir;

    fn context_for<'a>(runner: &'a MockRunner, charm_dir: &str) -> HookContext<'a> {
        let execution = ExecutionEnvironment::from_vars(vec![
            ("JUJU_UNIT_NAME", "rethinkdb/0"),
            ("CHARM_DIR", charm_dir),
        ])
        .unwrap();
        HookContext::new(runner, execution)
    }

    fn peers_runner() -> MockRunner {
        let runner = MockRunner::new();
        runner
            .respond_ok("relation-ids --format=json intracluster", "[\"intracluster:7\", \"intracluster:3\"]")
            .respond_ok("relation-list --format=json -r intracluster:3", "[\"rethinkdb/2\", \"rethinkdb/1\"]")
            .respond_ok("relation-list --format=json -r intracluster:7", "[\"rethinkdb/3\"]")
            .respond_ok(
                "relation-get --format=json -r intracluster:3 - rethinkdb/1",
                r#"{"private-address": "10.0.0.11"}"#,
            )
            .respond_ok(
                "relation-get --format=json -r intracluster:3 - rethinkdb/2",
                r#"{"hostname": "db-2"}"#,
            )
            .respond_ok(
                "relation-get --format=json -r intracluster:7 - rethinkdb/3",
                r#"{"private-address": "10.0.0.13"}"#,
            );
        runner
    }

    #[test]
    fn test_port_mappings_keep_caller_order() {
        let runner = MockRunner::new();
        let env = context_for(&runner, "/tmp");
        let ports = PortMappings::new([(80, 8080), (28015, 28015), (29015, 29015)]);

        assert_eq!(
            ports.build_args(&env).unwrap(),
            vec!["-p", "80:8080", "-p", "28015:28015", "-p", "29015:29015"]
        );
        assert_eq!(ports.host_ports(), vec![80, 28015, 29015]);
    }

    #[test]
    fn test_volumes_create_relative_host_paths() {
        let temp_dir = TempDir::new().unwrap();
        let runner = MockRunner::new();
        let env = context_for(&runner, temp_dir.path().to_str().unwrap());

        let volumes = Volumes::new()
            .with_volume("/scratch")
            .with_named("dbdata", "/data")
            .with_mapped("storage", "/rethinkdb");
        let args = volumes.build_args(&env).unwrap();

        let host_path = temp_dir.path().join("storage");
        assert!(host_path.is_dir());
        assert_eq!(
            args,
            vec![
                "-v".to_string(),
                "/scratch".to_string(),
                "-v".to_string(),
                "dbdata:/data".to_string(),
                "-v".to_string(),
                format!("{}:/rethinkdb", host_path.display()),
            ]
        );

        // Second build against the existing directory is a no-op.
        assert_eq!(volumes.build_args(&env).unwrap(), args);
    }

    #[test]
    fn test_container_args_options() {
        let args = ContainerArgs::new(["rethinkdb", "--bind", "all"])
            .with_option("machine_name", "db_0")
            .with_option("canonical_address", "10.0.0.10");

        assert_eq!(args.command(), Some("rethinkdb"));
        assert_eq!(
            args.args(),
            &[
                "rethinkdb",
                "--bind",
                "all",
                "--machine-name",
                "db_0",
                "--canonical-address",
                "10.0.0.10"
            ]
        );
        assert_eq!(ContainerArgs::new(["--bind", "all"]).command(), None);
    }

    #[test]
    fn test_relation_context_orders_and_filters_units() {
        let runner = peers_runner();
        let env = context_for(&runner, "/tmp");
        let mut context = RelationContext::new("intracluster", "rethinkdb-cluster", ["private-address"]);

        context.collect(&env).unwrap();

        let addresses: Vec<&str> = context
            .units()
            .iter()
            .map(|u| u["private-address"].as_str())
            .collect();
        assert_eq!(addresses, vec!["10.0.0.11", "10.0.0.13"]);
        assert!(context.is_ready());
        assert!(DataCollector::context(&context).contains_key("intracluster"));
    }

    #[test]
    fn test_relation_context_absent_relation() {
        let runner = MockRunner::new();
        runner.respond_ok("relation-ids", "[]");
        let env = context_for(&runner, "/tmp");
        let mut context = RelationContext::new("db", "mysql", ["host"]);

        context.collect(&env).unwrap();

        assert!(!context.is_established());
        assert!(!context.is_ready());
        assert!(DataCollector::context(&context).is_empty());
    }

    #[test]
    fn test_empty_required_keys_still_need_a_unit() {
        let runner = MockRunner::new();
        runner
            .respond_ok("relation-ids", "[\"db:1\"]")
            .respond_ok("relation-list", "[]");
        let env = context_for(&runner, "/tmp");
        let mut context = RelationContext::new("db", "mysql", Vec::<String>::new());

        context.collect(&env).unwrap();

        assert!(context.is_established());
        assert!(!context.is_ready());
    }

    #[test]
    fn test_peer_args_use_mapper() {
        let runner = peers_runner();
        let env = context_for(&runner, "/tmp");
        let mut peers = RelationArgs::peers(RelationContext::new(
            "intracluster",
            "rethinkdb-cluster",
            ["private-address"],
        ))
        .with_mapper(address_port_mapper("--join", "private-address", 29015));

        peers.collect(&env).unwrap();

        assert!(!peers.is_mandatory());
        assert_eq!(
            peers.build_args(&env).unwrap(),
            vec!["--join", "10.0.0.11:29015", "--join", "10.0.0.13:29015"]
        );
    }

    #[test]
    fn test_generic_relation_default_flags() {
        let runner = MockRunner::new();
        runner
            .respond_ok("relation-ids", "[\"db:1\"]")
            .respond_ok("relation-list", "[\"mysql/0\"]")
            .respond_ok("relation-get", r#"{"host": "10.0.0.5", "port": "3306"}"#);
        let env = context_for(&runner, "/tmp");
        let mut db = RelationArgs::relation(RelationContext::new("db", "mysql", ["host"]));

        db.collect(&env).unwrap();

        assert!(db.is_mandatory());
        assert!(db.is_ready());
        assert_eq!(
            db.build_args(&env).unwrap(),
            vec!["--host", "10.0.0.5", "--port", "3306"]
        );
    }

    #[test]
    fn test_provided_data_rendered_on_demand() {
        let runner = MockRunner::new();
        let env = context_for(&runner, "/tmp");
        let mut data = UnitData::new();
        data.insert("hostname".to_string(), "UNIT".to_string());
        let provided = ProvidedData::new("website", data).with_renderer(Box::new(
            |env: &dyn HookEnvironment, value: &str| -> Result<String> {
                Ok(value.replace("UNIT", &env.execution().unit_name))
            },
        ));

        let published = provided.provide_data(&env).unwrap();
        assert_eq!(published["hostname"], "rethinkdb/0");
    }
}
