use crate::domain::model::{ArgumentKind, OutcomeAction, ReconcileOutcome, ServiceEvent};
use crate::domain::ports::{DataCollector, DataPublisher, HookEnvironment};
use crate::utils::error::{ReconcileError, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Invoked by the manager when a service should start or stop.
pub trait ServiceCallback {
    fn call(&self, manager: &ServiceManager<'_>, service_name: &str, event: ServiceEvent) -> Result<()>;
}

/// Everything the manager needs to reconcile one service. Built fresh for every
/// hook invocation and never persisted.
pub struct ServiceDefinition<'a> {
    name: String,
    ports: Vec<u16>,
    required_data: Vec<Box<dyn DataCollector + 'a>>,
    provided_data: Vec<Box<dyn DataPublisher + 'a>>,
    start: Vec<Box<dyn ServiceCallback + 'a>>,
    stop: Vec<Box<dyn ServiceCallback + 'a>>,
}

impl<'a> ServiceDefinition<'a> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: Vec::new(),
            required_data: Vec::new(),
            provided_data: Vec::new(),
            start: Vec::new(),
            stop: Vec::new(),
        }
    }

    pub fn with_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.ports.extend(ports);
        self
    }

    pub fn with_required(mut self, provider: impl DataCollector + 'a) -> Self {
        self.required_data.push(Box::new(provider));
        self
    }

    pub fn with_provided(mut self, publisher: impl DataPublisher + 'a) -> Self {
        self.provided_data.push(Box::new(publisher));
        self
    }

    pub fn on_start(mut self, callback: impl ServiceCallback + 'a) -> Self {
        self.start.push(Box::new(callback));
        self
    }

    pub fn on_stop(mut self, callback: impl ServiceCallback + 'a) -> Self {
        self.stop.push(Box::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    fn collect(&mut self, env: &dyn HookEnvironment) -> Result<()> {
        for provider in &mut self.required_data {
            provider.collect(env)?;
        }
        Ok(())
    }

    /// AND over the mandatory providers. Optional providers never hold the service back.
    pub fn is_ready(&self) -> bool {
        self.required_data
            .iter()
            .filter(|provider| provider.is_mandatory())
            .all(|provider| provider.is_ready())
    }

    /// Arguments of the given kind from every provider, in declaration order.
    pub fn arguments(&self, kind: ArgumentKind, env: &dyn HookEnvironment) -> Result<Vec<String>> {
        let mut args = Vec::new();
        for builder in self
            .required_data
            .iter()
            .filter_map(|provider| provider.as_argument_builder())
            .filter(|builder| builder.kind() == kind)
        {
            args.extend(builder.build_args(env)?);
        }
        Ok(args)
    }

    pub fn template_context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        for provider in &self.required_data {
            context.extend(provider.context());
        }
        context
    }
}

/// Reconciles a set of services against the data currently visible to this unit.
pub struct ServiceManager<'a> {
    env: &'a dyn HookEnvironment,
    services: Vec<ServiceDefinition<'a>>,
}

impl<'a> ServiceManager<'a> {
    pub fn new(env: &'a dyn HookEnvironment, services: Vec<ServiceDefinition<'a>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for service in &services {
            if !seen.insert(service.name.as_str()) {
                return Err(ReconcileError::ConfigError {
                    message: format!("service '{}' is defined more than once", service.name),
                });
            }
        }
        Ok(Self { env, services })
    }

    pub fn environment(&self) -> &'a dyn HookEnvironment {
        self.env
    }

    pub fn get_service(&self, service_name: &str) -> Option<&ServiceDefinition<'a>> {
        self.services.iter().find(|service| service.name == service_name)
    }

    /// Merged provider context for a service, as of the last collection.
    pub fn template_context(&self, service_name: &str) -> Option<Map<String, Value>> {
        self.get_service(service_name)
            .map(ServiceDefinition::template_context)
    }

    /// Entry point for every hook except `install`.
    pub fn manage(&mut self, hook_name: &str) -> Result<Vec<ReconcileOutcome>> {
        match ServiceEvent::from_hook_name(hook_name) {
            ServiceEvent::Stop => self.stop_services(),
            ServiceEvent::Start => {
                self.provide_data(hook_name)?;
                self.reconfigure_services()
            }
        }
    }

    /// Publishes outbound data, but only from within the joined/changed hooks
    /// of the provider's own relation.
    pub fn provide_data(&self, hook_name: &str) -> Result<usize> {
        let mut published = 0;
        for service in &self.services {
            for provider in &service.provided_data {
                let relation = provider.relation_name();
                let joined = format!("{}-relation-joined", relation);
                let changed = format!("{}-relation-changed", relation);
                if hook_name != joined && hook_name != changed {
                    continue;
                }

                let data = provider.provide_data(self.env)?;
                let missing: Vec<&String> = provider
                    .required_keys()
                    .iter()
                    .filter(|key| !data.contains_key(*key))
                    .collect();
                if !missing.is_empty() {
                    tracing::info!(
                        "Not publishing on {}: missing keys {:?}",
                        relation,
                        missing
                    );
                    continue;
                }

                self.env.relation_set(None, &data)?;
                published += 1;
            }
        }
        Ok(published)
    }

    /// Collects fresh data for every service, then starts the ready ones.
    pub fn reconfigure_services(&mut self) -> Result<Vec<ReconcileOutcome>> {
        let env = self.env;
        for service in &mut self.services {
            service.collect(env)?;
        }

        let mut outcomes = Vec::new();
        for service in &self.services {
            let action = if service.is_ready() {
                let context = Value::Object(service.template_context());
                tracing::debug!("Context for {}: {}", service.name, context);
                self.fire_event(service, ServiceEvent::Start)?;
                OutcomeAction::Started
            } else {
                let waiting: Vec<&str> = service
                    .required_data
                    .iter()
                    .filter(|provider| provider.is_mandatory() && !provider.is_ready())
                    .map(|provider| provider.name())
                    .collect();
                tracing::info!(
                    "Service {} is not ready, waiting on: {}",
                    service.name,
                    waiting.join(", ")
                );
                OutcomeAction::Skipped
            };
            outcomes.push(ReconcileOutcome {
                service: service.name.clone(),
                action,
            });
        }
        Ok(outcomes)
    }

    pub fn stop_services(&self) -> Result<Vec<ReconcileOutcome>> {
        let mut outcomes = Vec::new();
        for service in &self.services {
            self.fire_event(service, ServiceEvent::Stop)?;
            outcomes.push(ReconcileOutcome {
                service: service.name.clone(),
                action: OutcomeAction::Stopped,
            });
        }
        Ok(outcomes)
    }

    fn fire_event(&self, service: &ServiceDefinition<'a>, event: ServiceEvent) -> Result<()> {
        let callbacks = match event {
            ServiceEvent::Start => &service.start,
            ServiceEvent::Stop => &service.stop,
        };
        tracing::info!("Firing {} for {}", event.as_str(), service.name);
        for callback in callbacks {
            callback.call(self, &service.name, event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::command::MockRunner;
    use crate::adapters::hookenv::HookContext;
    use crate::core::providers::{ContainerArgs, ProvidedData, RelationArgs, RelationContext};
    use crate::domain::model::{ExecutionEnvironment, UnitData};
    use std::cell::RefCell;

    struct Recorder<'r> {
        events: &'r RefCell<Vec<(String, ServiceEvent)>>,
    }

    impl ServiceCallback for Recorder<'_> {
        fn call(&self, _manager: &ServiceManager<'_>, service_name: &str, event: ServiceEvent) -> Result<()> {
            self.events.borrow_mut().push((service_name.to_string(), event));
            Ok(())
        }
    }

    fn hook_context<'a>(runner: &'a MockRunner, relation: Option<&str>) -> HookContext<'a> {
        let mut vars = vec![
            ("JUJU_UNIT_NAME".to_string(), "rethinkdb/0".to_string()),
            ("CHARM_DIR".to_string(), "/tmp".to_string()),
        ];
        if let Some(relation) = relation {
            vars.push(("JUJU_RELATION".to_string(), relation.to_string()));
            vars.push(("JUJU_RELATION_ID".to_string(), format!("{}:1", relation)));
        }
        HookContext::new(runner, ExecutionEnvironment::from_vars(vars).unwrap())
    }

    #[test]
    fn test_not_ready_service_is_skipped() {
        let runner = MockRunner::new();
        runner.respond_ok("relation-ids", "[]");
        let env = hook_context(&runner, None);
        let events = RefCell::new(Vec::new());

        let service = ServiceDefinition::new("app")
            .with_required(RelationArgs::relation(RelationContext::new("db", "mysql", ["host"])))
            .on_start(Recorder { events: &events });
        let mut manager = ServiceManager::new(&env, vec![service]).unwrap();

        let outcomes = manager.manage("config-changed").unwrap();

        assert_eq!(outcomes[0].action, OutcomeAction::Skipped);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_optional_providers_do_not_gate() {
        let runner = MockRunner::new();
        runner.respond_ok("relation-ids", "[]");
        let env = hook_context(&runner, None);
        let events = RefCell::new(Vec::new());

        let service = ServiceDefinition::new("app")
            .with_required(ContainerArgs::new(["serve"]))
            .with_required(RelationArgs::peers(RelationContext::new(
                "cluster",
                "app-cluster",
                ["private-address"],
            )))
            .on_start(Recorder { events: &events });
        let mut manager = ServiceManager::new(&env, vec![service]).unwrap();

        let outcomes = manager.manage("start").unwrap();

        assert_eq!(outcomes[0].action, OutcomeAction::Started);
        assert_eq!(*events.borrow(), vec![("app".to_string(), ServiceEvent::Start)]);
    }

    #[test]
    fn test_template_context_is_namespaced_by_relation() {
        let runner = MockRunner::new();
        runner.respond_ok("relation-ids --format=json db", r#"["db:4"]"#);
        runner.respond_ok("relation-list --format=json -r db:4", r#"["mysql/0"]"#);
        runner.respond_ok("relation-get --format=json -r db:4 - mysql/0", r#"{"host": "10.0.0.5"}"#);
        let env = hook_context(&runner, None);

        let service = ServiceDefinition::new("app")
            .with_required(RelationArgs::relation(RelationContext::new("db", "mysql", ["host"])));
        let mut manager = ServiceManager::new(&env, vec![service]).unwrap();
        manager.manage("start").unwrap();

        let context = manager.template_context("app").unwrap();
        assert_eq!(context["db"][0]["host"], "10.0.0.5");
        assert!(manager.template_context("other").is_none());
    }

    #[test]
    fn test_stop_hook_fires_stop_without_collecting() {
        let runner = MockRunner::new();
        let env = hook_context(&runner, None);
        let events = RefCell::new(Vec::new());

        let service = ServiceDefinition::new("app")
            .with_required(RelationArgs::relation(RelationContext::new("db", "mysql", ["host"])))
            .on_stop(Recorder { events: &events });
        let mut manager = ServiceManager::new(&env, vec![service]).unwrap();

        let outcomes = manager.manage("stop").unwrap();

        assert_eq!(outcomes[0].action, OutcomeAction::Stopped);
        assert_eq!(*events.borrow(), vec![("app".to_string(), ServiceEvent::Stop)]);
        assert!(runner.commands_starting_with("relation-ids").is_empty());
    }

    #[test]
    fn test_provided_data_only_in_own_relation_hooks() {
        let runner = MockRunner::new();
        runner.respond_ok("relation-ids", "[]");
        let env = hook_context(&runner, Some("website"));

        let mut data = UnitData::new();
        data.insert("hostname".to_string(), "10.0.0.10".to_string());
        data.insert("port".to_string(), "80".to_string());
        let service = ServiceDefinition::new("app")
            .with_required(RelationArgs::relation(RelationContext::new("db", "mysql", ["host"])))
            .with_provided(ProvidedData::new("website", data).with_required_keys(["hostname", "port"]));
        let mut manager = ServiceManager::new(&env, vec![service]).unwrap();

        manager.manage("config-changed").unwrap();
        assert!(runner.commands_starting_with("relation-set").is_empty());

        // Published even though the inbound db relation is not ready.
        manager.manage("website-relation-joined").unwrap();
        assert_eq!(
            runner.commands_starting_with("relation-set"),
            vec!["relation-set hostname=10.0.0.10 port=80"]
        );
    }

    #[test]
    fn test_provided_data_requires_keys() {
        let runner = MockRunner::new();
        let env = hook_context(&runner, Some("website"));

        let service = ServiceDefinition::new("app")
            .with_provided(ProvidedData::new("website", UnitData::new()).with_required_keys(["port"]));
        let manager = ServiceManager::new(&env, vec![service]).unwrap();

        assert_eq!(manager.provide_data("website-relation-changed").unwrap(), 0);
    }

    #[test]
    fn test_duplicate_services_rejected() {
        let runner = MockRunner::new();
        let env = hook_context(&runner, None);
        let result = ServiceManager::new(
            &env,
            vec![ServiceDefinition::new("app"), ServiceDefinition::new("app")],
        );
        assert!(result.is_err());
    }
}
