use crate::utils::error::{ReconcileError, Result};
use std::collections::BTreeMap;
use std::path::Path;

pub type HookHandler<C> = fn(&mut C) -> Result<()>;

/// Explicit name to handler table. Nothing is registered implicitly.
pub struct HookRegistry<C> {
    handlers: BTreeMap<String, HookHandler<C>>,
}

impl<C> Default for HookRegistry<C> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<C> HookRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook_name: impl Into<String>, handler: HookHandler<C>) -> Result<()> {
        let hook_name = hook_name.into();
        if self.handlers.contains_key(&hook_name) {
            return Err(ReconcileError::DuplicateHook { hook: hook_name });
        }
        self.handlers.insert(hook_name, handler);
        Ok(())
    }

    pub fn contains(&self, hook_name: &str) -> bool {
        self.handlers.contains_key(hook_name)
    }

    pub fn hook_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Dispatches on the basename of `arg0`, so both `hooks/start` and `start` work.
    pub fn execute(&self, arg0: &str, context: &mut C) -> Result<()> {
        let hook_name = hook_name(arg0);
        let handler = self
            .handlers
            .get(hook_name)
            .ok_or_else(|| ReconcileError::UnregisteredHook {
                hook: hook_name.to_string(),
            })?;
        tracing::info!("Running hook {}", hook_name);
        handler(context)
    }
}

pub fn hook_name(arg0: &str) -> &str {
    Path::new(arg0)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(arg0)
}
