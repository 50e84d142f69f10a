use anyhow::Context;
use clap::Parser;
use unit_reconciler::domain::model::OutcomeAction;
use unit_reconciler::utils::{logger, validation::Validate};
use unit_reconciler::{
    hook_registry, Charm, CharmManifest, CliConfig, ExecutionEnvironment, HookContext,
    ProcessRunner, ReconcileError,
};

fn main() {
    let config = CliConfig::parse();

    if config.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.verbose);
    }

    if let Err(e) = run(&config) {
        let exit_code = e
            .downcast_ref::<ReconcileError>()
            .map(ReconcileError::exit_code)
            .unwrap_or(1);
        tracing::error!("Hook failed: {:#}", e);
        std::process::exit(exit_code);
    }
}

fn run(config: &CliConfig) -> anyhow::Result<()> {
    config.validate()?;

    let arg0 = std::env::args().next().unwrap_or_default();
    let hook = config.hook_name(&arg0).to_string();

    let execution = ExecutionEnvironment::from_env()?;
    let manifest_path = config.manifest_path(execution.charm_dir());
    let manifest = CharmManifest::from_file(&manifest_path)?;
    manifest.validate()?;
    tracing::debug!("Loaded manifest {}", manifest_path.display());

    let runner = ProcessRunner;
    let env = HookContext::new(&runner, execution);
    let registry = hook_registry(&manifest)?;
    let mut charm = Charm::new(&env, &runner, manifest);

    let outcomes = charm
        .run(&registry, &hook)
        .with_context(|| format!("hook {} failed", hook))?;

    for outcome in &outcomes {
        match outcome.action {
            OutcomeAction::Started => tracing::info!("{} started", outcome.service),
            OutcomeAction::Stopped => tracing::info!("{} stopped", outcome.service),
            OutcomeAction::Skipped => tracing::info!("{} left as is, not ready", outcome.service),
        }
    }
    Ok(())
}
