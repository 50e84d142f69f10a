// Domain layer: plain data shared by the engine and the ports (traits) its adapters implement.

pub mod model;
pub mod ports;
