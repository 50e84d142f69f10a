use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::utils::error::{ReconcileError, Result};

/// Key/value settings published by a single unit on a relation.
pub type UnitData = BTreeMap<String, String>;

/// Snapshot of the variables the control plane sets for one hook invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEnvironment {
    pub unit_name: String,
    pub relation_type: Option<String>,
    pub relation_id: Option<String>,
    pub remote_unit: Option<String>,
    pub charm_dir: PathBuf,
}

impl ExecutionEnvironment {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut unit_name = None;
        let mut relation_type = None;
        let mut relation_id = None;
        let mut remote_unit = None;
        let mut charm_dir = None;

        for (key, value) in vars {
            let value = value.into();
            match key.as_ref() {
                "JUJU_UNIT_NAME" => unit_name = Some(value),
                "JUJU_RELATION" => relation_type = Some(value),
                "JUJU_RELATION_ID" => relation_id = Some(value),
                "JUJU_REMOTE_UNIT" => remote_unit = Some(value),
                "CHARM_DIR" => charm_dir = Some(PathBuf::from(value)),
                _ => {}
            }
        }

        let unit_name = unit_name.ok_or_else(|| ReconcileError::MissingEnvironment {
            var: "JUJU_UNIT_NAME".to_string(),
        })?;

        Ok(Self {
            unit_name,
            relation_type: relation_type.filter(|v| !v.is_empty()),
            relation_id: relation_id.filter(|v| !v.is_empty()),
            remote_unit: remote_unit.filter(|v| !v.is_empty()),
            charm_dir: charm_dir.unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    /// Application name, i.e. the unit name without its `/N` suffix.
    pub fn service_name(&self) -> &str {
        self.unit_name
            .split_once('/')
            .map(|(service, _)| service)
            .unwrap_or(&self.unit_name)
    }

    pub fn in_relation_hook(&self) -> bool {
        self.relation_type.is_some()
    }

    pub fn charm_dir(&self) -> &Path {
        &self.charm_dir
    }
}

/// Lifecycle event delivered to service callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent {
    Start,
    Stop,
}

impl ServiceEvent {
    /// Only the `stop` hook stops services; every other hook reconciles towards running.
    pub fn from_hook_name(hook_name: &str) -> Self {
        if hook_name == "stop" {
            ServiceEvent::Stop
        } else {
            ServiceEvent::Start
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceEvent::Start => "start",
            ServiceEvent::Stop => "stop",
        }
    }
}

/// Init-system action applied to a host service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Reload => "reload",
        }
    }
}

/// Slot a provider's arguments occupy in the container run command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArgumentKind {
    Volume,
    Port,
    Container,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Combined stdout/stderr, used when reporting a failed command.
    pub fn combined(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeAction {
    Started,
    Stopped,
    Skipped,
}

/// What the service manager did for one service during an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub service: String,
    pub action: OutcomeAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_from_vars() {
        let env = ExecutionEnvironment::from_vars(vec![
            ("JUJU_UNIT_NAME", "rethinkdb/2"),
            ("JUJU_RELATION", "intracluster"),
            ("JUJU_RELATION_ID", "intracluster:4"),
            ("CHARM_DIR", "/var/lib/juju/agents/unit-rethinkdb-2/charm"),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert_eq!(env.service_name(), "rethinkdb");
        assert!(env.in_relation_hook());
        assert_eq!(env.relation_id.as_deref(), Some("intracluster:4"));
        assert_eq!(env.remote_unit, None);
    }

    #[test]
    fn test_environment_requires_unit_name() {
        let result = ExecutionEnvironment::from_vars(vec![("CHARM_DIR", "/tmp")]);
        assert!(matches!(
            result,
            Err(ReconcileError::MissingEnvironment { .. })
        ));
    }

    #[test]
    fn test_service_event_classification() {
        assert_eq!(ServiceEvent::from_hook_name("stop"), ServiceEvent::Stop);
        assert_eq!(ServiceEvent::from_hook_name("start"), ServiceEvent::Start);
        assert_eq!(
            ServiceEvent::from_hook_name("intracluster-relation-departed"),
            ServiceEvent::Start
        );
    }

    #[test]
    fn test_command_output_combined() {
        let output = CommandOutput {
            status: Some(1),
            stdout: "partial\n".to_string(),
            stderr: "boom\n".to_string(),
        };
        assert!(!output.is_success());
        assert_eq!(output.combined(), "partial\nboom");
    }
}
