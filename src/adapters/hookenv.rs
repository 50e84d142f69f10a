//! Hook-tool backed `HookEnvironment`.
//!
//! Every query shells out to the control plane's hook tools with
//! `--format=json`. Results are memoised in an `InvocationCache` owned by the
//! `HookContext`, which lives exactly as long as one hook invocation.

use crate::adapters::host;
use crate::domain::model::{ExecutionEnvironment, UnitData};
use crate::domain::ports::{command_line, CommandRunner, HookEnvironment};
use crate::utils::error::{ReconcileError, Result};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;

/// `relation-get` exits with this status when the unit is not on the relation.
const RELATION_GET_ABSENT_STATUS: i32 = 2;

/// Memoised hook-tool answers, keyed by the full command line.
#[derive(Debug, Default)]
pub struct InvocationCache {
    entries: RefCell<HashMap<String, Value>>,
}

impl InvocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: String, value: Value) {
        self.entries.borrow_mut().insert(key, value);
    }

    /// Drops every entry whose key mentions `fragment`.
    pub fn flush(&self, fragment: &str) -> usize {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|key, _| !key.contains(fragment));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

pub struct HookContext<'a> {
    runner: &'a dyn CommandRunner,
    execution: ExecutionEnvironment,
    cache: InvocationCache,
    hostname: Option<String>,
}

impl<'a> HookContext<'a> {
    pub fn new(runner: &'a dyn CommandRunner, execution: ExecutionEnvironment) -> Self {
        Self {
            runner,
            execution,
            cache: InvocationCache::new(),
            hostname: None,
        }
    }

    /// Pins the hostname instead of asking the operating system.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn cache(&self) -> &InvocationCache {
        &self.cache
    }

    /// Runs a JSON-emitting hook tool. `Value::Null` stands for "no data": empty
    /// output, unparseable output, or the tool's documented absent status.
    fn query_json(&self, program: &str, args: &[&str], absent_status: Option<i32>) -> Result<Value> {
        let key = command_line(program, args);
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }

        let output = self.runner.output(program, args)?;
        let value = if output.is_success() {
            let stdout = output.stdout.trim();
            if stdout.is_empty() {
                Value::Null
            } else {
                match serde_json::from_str(stdout) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed output of `{}`: {}", key, e);
                        Value::Null
                    }
                }
            }
        } else if absent_status.is_some() && output.status == absent_status {
            Value::Null
        } else {
            return Err(ReconcileError::CommandFailed {
                command: key,
                code: output.status,
                output: output.combined(),
            });
        };

        self.cache.insert(key, value.clone());
        Ok(value)
    }
}

fn string_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl HookEnvironment for HookContext<'_> {
    fn execution(&self) -> &ExecutionEnvironment {
        &self.execution
    }

    fn relation_ids(&self, relation_name: &str) -> Result<Vec<String>> {
        let value = self.query_json("relation-ids", &["--format=json", relation_name], None)?;
        Ok(string_list(value))
    }

    fn related_units(&self, relation_id: &str) -> Result<Vec<String>> {
        let value = self.query_json("relation-list", &["--format=json", "-r", relation_id], None)?;
        Ok(string_list(value))
    }

    fn relation_get(&self, relation_id: &str, unit: &str) -> Result<Option<UnitData>> {
        let value = self.query_json(
            "relation-get",
            &["--format=json", "-r", relation_id, "-", unit],
            Some(RELATION_GET_ABSENT_STATUS),
        )?;

        match value {
            Value::Object(map) => Ok(Some(
                map.into_iter()
                    .filter_map(|(key, value)| scalar_to_string(value).map(|v| (key, v)))
                    .collect(),
            )),
            Value::Null => Ok(None),
            other => {
                tracing::warn!(
                    "Relation data from {} on {} is not a mapping: {}",
                    unit,
                    relation_id,
                    other
                );
                Ok(None)
            }
        }
    }

    fn relation_set(&self, relation_id: Option<&str>, settings: &UnitData) -> Result<()> {
        let pairs: Vec<String> = settings
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        let mut args: Vec<&str> = Vec::new();
        if let Some(rid) = relation_id {
            args.extend(["-r", rid]);
        }
        args.extend(pairs.iter().map(String::as_str));

        self.runner.check_call("relation-set", &args)?;

        // Our own published settings are stale now.
        let flushed = self.cache.flush(&self.execution.unit_name);
        tracing::debug!("Flushed {} cached entries after relation-set", flushed);
        Ok(())
    }

    fn unit_get(&self, attribute: &str) -> Result<Option<String>> {
        let value = self.query_json("unit-get", &["--format=json", attribute], None)?;
        Ok(scalar_to_string(value))
    }

    fn config(&self) -> Result<Map<String, Value>> {
        match self.query_json("config-get", &["--format=json"], None)? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(ReconcileError::ConfigError {
                message: format!("config-get returned a non-mapping value: {}", other),
            }),
        }
    }

    fn open_port(&self, port: u16, protocol: &str) -> Result<()> {
        self.runner
            .check_call("open-port", &[format!("{}/{}", port, protocol).as_str()])
    }

    fn close_port(&self, port: u16, protocol: &str) -> Result<()> {
        self.runner
            .check_call("close-port", &[format!("{}/{}", port, protocol).as_str()])
    }

    fn hostname(&self) -> Option<String> {
        self.hostname.clone().or_else(host::hostname)
    }
}
