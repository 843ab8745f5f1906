//! Startup, serving and shutdown.

use nullfs_sync_engine::{Node, NodeConfig};
use nullfs_sync_server::PullServer;
use std::fmt::Write as _;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Human-readable description of a validated configuration.
pub fn summary(config: &NodeConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "node      {}", config.name);
    let _ = writeln!(out, "listen    {}", config.listen_addr());
    let _ = writeln!(out, "data dir  {}", config.data_dir.display());
    let _ = writeln!(out, "refresh   {}s", config.refresh_secs);
    for (alias, relay) in &config.relay_nodes {
        let _ = writeln!(out, "relay     {alias} -> {} as {}", relay.address, relay.auth.name);
    }
    for (name, volume) in &config.volumes {
        let _ = writeln!(
            out,
            "volume    {name}: serves [{}], pulls [{}]",
            volume.allow.join(", "),
            volume.pull_from.join(", ")
        );
    }
    out
}

/// Runs the node until Ctrl-C.
pub async fn run(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.listen_addr();
    let node = Node::builder(config).build().await?;

    let recovery = node.recover().await;
    if recovery.any_halted() {
        error!("a volume halted during recovery; it stays stopped until its journal is repaired");
    } else if !recovery.is_complete() {
        warn!("some entries are still pending after recovery; they are retried every cycle");
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(err) => error!(error = %err, "cannot listen for Ctrl-C, shutting down"),
        }
        on_signal.cancel();
    });

    let server = PullServer::from_node(&node);
    let shutdown = cancel.clone();
    let serve = async {
        let served = server
            .serve_with_shutdown(&addr, async move { shutdown.cancelled().await })
            .await;
        // The loops stop with the endpoint.
        cancel.cancel();
        served
    };

    info!(node = %node.name(), volumes = node.volumes().len(), "node started");
    let (served, ()) = tokio::join!(serve, node.run(cancel.clone()));
    served?;
    info!(node = %node.name(), "node stopped");
    Ok(())
}
