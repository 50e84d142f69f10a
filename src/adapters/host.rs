use crate::domain::model::ServiceAction;
use crate::domain::ports::{CommandRunner, ServiceControl};
use crate::utils::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Numeric owner applied to directories created for the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// Creates `path` (and parents) with `mode`. An existing directory keeps its
/// mode; only ownership is brought in line with `owner`.
pub fn mkdir(path: &Path, mode: u32, owner: Option<Ownership>) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            tracing::debug!(
                "{} exists, keeping mode {:o}",
                path.display(),
                meta.permissions().mode() & 0o7777
            );
        }
        Ok(_) => {
            return Err(ReconcileError::ConfigError {
                message: format!("{} exists and is not a directory", path.display()),
            });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("Making dir {} {:o}", path.display(), mode);
            fs::create_dir_all(path)?;
            // umask applies to create_dir_all
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        Err(e) => return Err(e.into()),
    }

    let meta = fs::metadata(path)?;

    if let Some(owner) = owner {
        use std::os::unix::fs::MetadataExt;
        if meta.uid() != owner.uid || meta.gid() != owner.gid {
            std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))?;
        }
    }
    Ok(())
}

/// Hex SHA-256 of the file contents, or `None` when the file does not exist.
pub fn file_hash(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(content) => Ok(Some(format!("{:x}", Sha256::digest(&content)))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(feature = "cli")]
pub fn hostname() -> Option<String> {
    sysinfo::System::host_name()
}

#[cfg(not(feature = "cli"))]
pub fn hostname() -> Option<String> {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// `service <name> <action>` through the init system's compatibility wrapper.
pub struct SystemServices<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> SystemServices<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }
}

impl ServiceControl for SystemServices<'_> {
    fn service(&self, action: ServiceAction, service_name: &str) -> bool {
        tracing::info!("{} service {}", action.as_str(), service_name);
        self.runner
            .call("service", &[service_name, action.as_str()])
    }
}
