use crate::domain::model::{
    ArgumentKind, CommandOutput, ExecutionEnvironment, ServiceAction, UnitData,
};
use crate::utils::error::{ReconcileError, Result};
use serde_json::{Map, Value};

/// Runs external programs. Spawn failures surface as `IoError`; a non-zero exit
/// is reported through `CommandOutput::status` and interpreted by the helpers.
pub trait CommandRunner {
    fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Fail-fast mode: a non-zero exit becomes `CommandFailed`.
    fn check_output(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.output(program, args)?;
        if output.is_success() {
            Ok(output.stdout)
        } else {
            Err(ReconcileError::CommandFailed {
                command: command_line(program, args),
                code: output.status,
                output: output.combined(),
            })
        }
    }

    fn check_call(&self, program: &str, args: &[&str]) -> Result<()> {
        self.check_output(program, args).map(|_| ())
    }

    /// Tolerant mode: failures are logged and reported as `false`.
    fn call(&self, program: &str, args: &[&str]) -> bool {
        match self.output(program, args) {
            Ok(output) if output.is_success() => true,
            Ok(output) => {
                tracing::warn!(
                    "Command `{}` exited with {:?}: {}",
                    command_line(program, args),
                    output.status,
                    output.combined()
                );
                false
            }
            Err(e) => {
                tracing::warn!("Command `{}` could not run: {}", command_line(program, args), e);
                false
            }
        }
    }
}

pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read/write access to the control plane for the current unit.
pub trait HookEnvironment {
    fn execution(&self) -> &ExecutionEnvironment;

    fn relation_ids(&self, relation_name: &str) -> Result<Vec<String>>;

    fn related_units(&self, relation_id: &str) -> Result<Vec<String>>;

    /// `None` when the unit has published nothing or the data could not be parsed.
    fn relation_get(&self, relation_id: &str, unit: &str) -> Result<Option<UnitData>>;

    /// `relation_id` of `None` targets the relation of the current hook.
    fn relation_set(&self, relation_id: Option<&str>, settings: &UnitData) -> Result<()>;

    fn unit_get(&self, attribute: &str) -> Result<Option<String>>;

    fn config(&self) -> Result<Map<String, Value>>;

    fn open_port(&self, port: u16, protocol: &str) -> Result<()>;

    fn close_port(&self, port: u16, protocol: &str) -> Result<()>;

    fn hostname(&self) -> Option<String>;
}

/// Gathers relation or local data and decides whether enough of it is present.
pub trait DataCollector {
    fn name(&self) -> &str;

    fn collect(&mut self, _env: &dyn HookEnvironment) -> Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool;

    /// Optional collectors contribute data but never hold a service back.
    fn is_mandatory(&self) -> bool {
        true
    }

    /// Mapping-style fragment, merged into the service's template context.
    fn context(&self) -> Map<String, Value> {
        Map::new()
    }

    fn as_argument_builder(&self) -> Option<&dyn ArgumentBuilder> {
        None
    }
}

/// Produces a fragment of the container run command line.
pub trait ArgumentBuilder {
    fn kind(&self) -> ArgumentKind;

    fn build_args(&self, env: &dyn HookEnvironment) -> Result<Vec<String>>;
}

/// Outbound data this unit publishes on one of its relations.
pub trait DataPublisher {
    fn relation_name(&self) -> &str;

    fn required_keys(&self) -> &[String] {
        &[]
    }

    fn provide_data(&self, env: &dyn HookEnvironment) -> Result<UnitData>;
}

/// Controls init-system services on the host.
pub trait ServiceControl {
    fn service(&self, action: ServiceAction, service_name: &str) -> bool;
}
