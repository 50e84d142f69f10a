use crate::core::providers::RelationContext;
use crate::domain::ports::{DataCollector, HookEnvironment};
use crate::utils::error::Result;

pub const ADDRESS_KEY: &str = "private-address";

/// `--join host:port` for every peer, space separated. No peers gives `""`.
pub fn cli_peers<S: AsRef<str>>(peers: &[S], port: u16) -> String {
    peers
        .iter()
        .map(|peer| format!("--join {}:{}", peer.as_ref(), port))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Private addresses of the units on `relation_name`, in collection order.
/// Units that have not published an address yet are skipped.
pub fn get_peers(env: &dyn HookEnvironment, relation_name: &str) -> Result<Vec<String>> {
    let mut context = RelationContext::new(relation_name, "", [ADDRESS_KEY]);
    context.collect(env)?;
    Ok(context
        .units()
        .iter()
        .filter_map(|unit| unit.get(ADDRESS_KEY).cloned())
        .collect())
}
