use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use unit_reconciler::app::peers::{cli_peers, get_peers};
use unit_reconciler::config::manifest::MANIFEST_FILE_NAME;
use unit_reconciler::utils::logger;
use unit_reconciler::{CharmManifest, ExecutionEnvironment, HookContext, ProcessRunner};

/// Prints `--join host:port` for every peer of this unit.
#[derive(Debug, Parser)]
#[command(name = "peers")]
struct Args {
    /// Peer relation name. Defaults to the manifest's peer relation.
    #[arg(long)]
    relation: Option<String>,

    /// Cluster port. Defaults to the manifest's join port.
    #[arg(long)]
    port: Option<u16>,

    #[arg(long, env = "CHARM_MANIFEST")]
    manifest: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    let execution = ExecutionEnvironment::from_env()?;
    let (relation, port) = match (args.relation, args.port) {
        (Some(relation), Some(port)) => (relation, port),
        (relation, port) => {
            let path = args
                .manifest
                .unwrap_or_else(|| execution.charm_dir().join(MANIFEST_FILE_NAME));
            let manifest = CharmManifest::from_file(&path)?;
            let peers = manifest
                .peers
                .with_context(|| format!("{} declares no peer relation", path.display()))?;
            (
                relation.unwrap_or(peers.relation),
                port.unwrap_or(peers.join_port),
            )
        }
    };

    let runner = ProcessRunner;
    let env = HookContext::new(&runner, execution);
    let peers = get_peers(&env, &relation)?;
    println!("{}", cli_peers(&peers, port));
    Ok(())
}
