// Adapters layer: concrete implementations for external systems (processes, hook tools, container runtime, host).

pub mod command;
pub mod container;
pub mod hookenv;
pub mod host;
