//! Command runners used to reach hook tools, the container runtime and the init system.
//!
//! `ProcessRunner` spawns real processes and blocks until they exit.
//! `MockRunner` records every command line and answers from scripted outputs,
//! so the whole engine can run in tests without any external tooling.

use crate::domain::model::CommandOutput;
use crate::domain::ports::{command_line, CommandRunner};
use crate::utils::error::Result;
use std::cell::RefCell;
use std::process::Command;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        tracing::debug!("Exec command: {}", command_line(program, args));

        let output = Command::new(program).args(args).output()?;
        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !result.is_success() {
            tracing::debug!(
                "Error invoking command: {} -> {:?}",
                command_line(program, args),
                result.status
            );
        }
        Ok(result)
    }
}

/// Test double keyed by command-line prefix. The longest matching prefix wins;
/// commands without a matching rule succeed with empty output.
#[derive(Debug, Default)]
pub struct MockRunner {
    rules: RefCell<Vec<(String, CommandOutput)>>,
    commands: RefCell<Vec<String>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, prefix: &str, output: CommandOutput) -> &Self {
        let mut rules = self.rules.borrow_mut();
        rules.retain(|(existing, _)| existing != prefix);
        rules.push((prefix.to_string(), output));
        self
    }

    pub fn respond_ok(&self, prefix: &str, stdout: &str) -> &Self {
        self.respond(prefix, CommandOutput::success(stdout))
    }

    pub fn respond_err(&self, prefix: &str, status: i32, stderr: &str) -> &Self {
        self.respond(prefix, CommandOutput::failure(status, stderr))
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    /// Commands whose line starts with `prefix`, in execution order.
    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands
            .borrow()
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl CommandRunner for MockRunner {
    fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        self.commands.borrow_mut().push(line.clone());

        let rules = self.rules.borrow();
        let output = rules
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::success(""));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_runner_records_commands() {
        let runner = MockRunner::new();
        runner.check_call("docker", &["pull", "dockerfile/rethinkdb"]).unwrap();
        runner.check_call("open-port", &["80/TCP"]).unwrap();

        let cmds = runner.executed_commands();
        assert_eq!(cmds, vec!["docker pull dockerfile/rethinkdb", "open-port 80/TCP"]);
    }

    #[test]
    fn mock_runner_prefers_longest_prefix() {
        let runner = MockRunner::new();
        runner
            .respond_ok("relation-get", "{}")
            .respond_ok("relation-get --format=json -r db:1 - mysql/0", "{\"host\":\"a\"}");

        let specific = runner
            .check_output("relation-get", &["--format=json", "-r", "db:1", "-", "mysql/0"])
            .unwrap();
        let generic = runner
            .check_output("relation-get", &["--format=json", "-r", "db:1", "-", "mysql/1"])
            .unwrap();

        assert_eq!(specific, "{\"host\":\"a\"}");
        assert_eq!(generic, "{}");
    }

    #[test]
    fn mock_runner_propagates_failures() {
        let runner = MockRunner::new();
        runner.respond_err("docker stop", 1, "No such container");
        assert!(runner.check_call("docker", &["stop", "abc123"]).is_err());
        assert!(!runner.call("docker", &["stop", "abc123"]));
    }

    #[test]
    fn process_runner_reports_exit_status() {
        let runner = ProcessRunner;
        let ok = runner.output("sh", &["-c", "echo hello"]).unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.stdout.trim(), "hello");

        let failed = runner.output("sh", &["-c", "exit 3"]).unwrap();
        assert_eq!(failed.status, Some(3));
    }
}
