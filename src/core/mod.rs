pub mod checksum;
pub mod hooks;
pub mod lifecycle;
pub mod manager;
pub mod persistent_config;
pub mod providers;

pub use checksum::{ChecksumGuard, RestartMap, RestartStrategy};
pub use hooks::HookRegistry;
pub use lifecycle::{ContainerCallback, InstanceRecord, PortCallback};
pub use manager::{ServiceCallback, ServiceDefinition, ServiceManager};
pub use persistent_config::PersistentConfig;
pub use crate::utils::error::Result;
