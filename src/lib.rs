pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::command::{MockRunner, ProcessRunner};
pub use adapters::hookenv::HookContext;
pub use app::{hook_registry, Charm};
pub use config::CharmManifest;
pub use crate::core::{HookRegistry, ServiceDefinition, ServiceManager};
pub use domain::model::ExecutionEnvironment;
pub use utils::error::{ReconcileError, Result};
