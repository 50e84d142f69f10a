pub mod charm;
pub mod peers;

pub use charm::{hook_registry, Charm};
