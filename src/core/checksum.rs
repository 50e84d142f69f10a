use crate::adapters::host::file_hash;
use crate::domain::model::ServiceAction;
use crate::domain::ports::ServiceControl;
use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Content hash per watched path; `None` means the file did not exist.
pub type ChecksumSet = Vec<(PathBuf, Option<String>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartStrategy {
    #[default]
    Restart,
    /// Stop every affected service, then start them all.
    StopStart,
}

/// Watched path to the services that must be restarted when it changes.
/// Insertion order is kept so restarts happen in a predictable order.
#[derive(Debug, Clone, Default)]
pub struct RestartMap {
    entries: Vec<(PathBuf, Vec<String>)>,
}

impl RestartMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch<I, S>(mut self, path: impl Into<PathBuf>, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path = path.into();
        let services: Vec<String> = services.into_iter().map(Into::into).collect();
        match self.entries.iter_mut().find(|(existing, _)| *existing == path) {
            Some((_, existing)) => existing.extend(services),
            None => self.entries.push((path, services)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Result<ChecksumSet> {
        let mut checksums = Vec::with_capacity(self.entries.len());
        for (path, _) in &self.entries {
            checksums.push((path.clone(), file_hash(path)?));
        }
        Ok(checksums)
    }

    /// Services mapped to any path whose hash differs, de-duplicated in
    /// first-seen order.
    pub fn restart_targets(&self, before: &ChecksumSet, after: &ChecksumSet) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for ((path, services), (pre, post)) in self
            .entries
            .iter()
            .zip(before.iter().zip(after.iter()))
        {
            if pre.1 == post.1 {
                continue;
            }
            tracing::info!("{} changed", path.display());
            for service in services {
                if seen.insert(service.as_str()) {
                    targets.push(service.clone());
                }
            }
        }
        targets
    }
}

/// Restarts dependent services when a wrapped operation changes the files they read.
pub struct ChecksumGuard<'s> {
    restart_map: RestartMap,
    strategy: RestartStrategy,
    services: &'s dyn ServiceControl,
}

impl<'s> ChecksumGuard<'s> {
    pub fn new(restart_map: RestartMap, services: &'s dyn ServiceControl) -> Self {
        Self {
            restart_map,
            strategy: RestartStrategy::default(),
            services,
        }
    }

    pub fn with_strategy(mut self, strategy: RestartStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Runs `operation`. If it fails nothing is restarted and the error is
    /// returned as-is.
    pub fn guard<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let before = self.restart_map.snapshot()?;
        let value = operation()?;
        let after = self.restart_map.snapshot()?;

        let targets = self.restart_map.restart_targets(&before, &after);
        self.apply(&targets);
        Ok(value)
    }

    fn apply(&self, targets: &[String]) {
        match self.strategy {
            RestartStrategy::Restart => {
                for service in targets {
                    self.services.service(ServiceAction::Restart, service);
                }
            }
            RestartStrategy::StopStart => {
                for action in [ServiceAction::Stop, ServiceAction::Start] {
                    for service in targets {
                        self.services.service(action, service);
                    }
                }
            }
        }
    }
}
