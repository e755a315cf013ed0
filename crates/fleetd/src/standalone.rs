//! Standalone mode: every subsystem in one process.
//!
//! Nodes come from the `[[nodes]]` bindings in fleet.toml and containers
//! are run by the simulated engine, so the daemon can be exercised without
//! a real fleet behind it.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use fleetgrid_core::FleetConfig;
use fleetgrid_region::RegionTree;
use fleetgrid_scheduler::{FleetController, SimulatedEngine, StaticNodeRegistry};

/// Wire the controller to the config-seeded registry and the simulated engine.
pub fn build_controller(config: &FleetConfig) -> anyhow::Result<FleetController> {
    let registry = Arc::new(StaticNodeRegistry::from_nodes(config.node_refs()));
    let containers = Arc::new(SimulatedEngine::new());
    let controller = FleetController::from_config(config, registry, containers)?;
    Ok(controller)
}

pub async fn run_standalone(config: FleetConfig, port: u16) -> anyhow::Result<()> {
    info!("fleetgrid daemon starting in standalone mode");

    // ── Initialize subsystems ──────────────────────────────────

    let controller = build_controller(&config)?;
    info!(
        regions = controller.regions().len(),
        nodes = config.nodes.len(),
        policy = ?config.placement.policy,
        victims = ?config.placement.victims,
        "controller initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let interval = config.reconcile.interval();
    let reconciler = controller.clone();
    let reconcile_handle = tokio::spawn(async move {
        reconciler.run(interval, shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = fleetgrid_api::build_router(controller);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = reconcile_handle.await;

    info!("fleetgrid daemon stopped");
    Ok(())
}

/// Build the region tree from `config` and describe it.
///
/// Fails on malformed region paths, including a node bound to one. Nodes
/// bound to a region no `[[regions]]` entry declares are reported but
/// accepted; they remain members of every declared ancestor and of the root.
pub fn check_report(config: &FleetConfig) -> anyhow::Result<String> {
    let tree = RegionTree::from_config(&config.regions)?;

    let mut out = tree.render();
    let mut undeclared = Vec::new();
    for node in config.node_refs() {
        match tree.resolve(node.region()) {
            Ok(Some(_)) => {}
            Ok(None) => undeclared.push((node.id.clone(), node.region().to_string())),
            Err(e) => anyhow::bail!("node `{}`: {e}", node.id),
        }
    }

    let _ = writeln!(
        out,
        "{} regions, {} nodes, policy {:?}, victims {:?}",
        tree.len(),
        config.nodes.len(),
        config.placement.policy,
        config.placement.victims,
    );
    for (node, region) in undeclared {
        let _ = writeln!(out, "warning: node `{node}` is bound to undeclared region `{region}`");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLEET: &str = r#"
[[regions]]
path = "eu.west"

[[nodes]]
id = "w1"
region = "eu.west"

[[nodes]]
id = "x1"
region = "us.east"
"#;

    #[test]
    fn check_report_lists_tree_and_undeclared_regions() {
        let config = FleetConfig::from_toml_str(FLEET).unwrap();
        let report = check_report(&config).unwrap();

        assert!(report.contains("west"));
        assert!(report.contains("3 regions, 2 nodes"));
        assert!(report.contains("warning: node `x1` is bound to undeclared region `us.east`"));
        assert!(!report.contains("node `w1`"));
    }

    #[test]
    fn check_report_rejects_malformed_node_region() {
        let config = FleetConfig::from_toml_str(
            r#"
[[nodes]]
id = "bad"
region = "eu..west"
"#,
        )
        .unwrap();
        assert!(check_report(&config).is_err());
    }

    #[test]
    fn check_report_rejects_malformed_region_path() {
        let config = FleetConfig::from_toml_str(
            r#"
[[regions]]
path = "eu."
"#,
        )
        .unwrap();
        assert!(check_report(&config).is_err());
    }

    #[tokio::test]
    async fn build_controller_seeds_registry_from_config() {
        let config = FleetConfig::from_toml_str(FLEET).unwrap();
        let controller = build_controller(&config).unwrap();

        let nodes = controller.registry().list_known_nodes();
        assert_eq!(nodes.len(), 2);
        assert!(controller.registry().lookup("w1").is_some());
        assert_eq!(controller.deployment_count().await, 0);
    }
}
