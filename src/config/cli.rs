use crate::config::manifest::MANIFEST_FILE_NAME;
use crate::utils::error::Result;
use crate::utils::validation::{validate_non_empty_string, validate_path, Validate};
use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "unit-reconciler")]
#[command(about = "Keeps a unit's container in line with its relations and config")]
pub struct CliConfig {
    /// Hook to run. Defaults to the name this binary was invoked as.
    #[arg(long)]
    pub hook: Option<String>,

    /// Charm manifest. Defaults to charm.toml in the charm directory.
    #[arg(long, env = "CHARM_MANIFEST")]
    pub manifest: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,
}

impl CliConfig {
    /// `--hook` when given, otherwise `arg0`.
    pub fn hook_name<'a>(&'a self, arg0: &'a str) -> &'a str {
        self.hook.as_deref().unwrap_or(arg0)
    }

    pub fn manifest_path(&self, charm_dir: &Path) -> PathBuf {
        self.manifest
            .clone()
            .unwrap_or_else(|| charm_dir.join(MANIFEST_FILE_NAME))
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        if let Some(hook) = &self.hook {
            validate_non_empty_string("hook", hook)?;
        }
        if let Some(manifest) = &self.manifest {
            validate_path("manifest", &manifest.to_string_lossy())?;
        }
        Ok(())
    }
}
