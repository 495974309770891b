//! Node mode: loads the case, starts the scheduler, the gossip loop,
//! and the peer API, then waits for Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use collab_cluster::{Case, Collaborator, CollaboratorConfig, HttpTransport, peer_router};
use collab_core::CollabConfig;
use collab_scheduler::{HandlerRegistry, Scheduler};
use tokio::sync::watch;
use tracing::{error, info};

use crate::handlers;

/// Run a collaborator node until a shutdown signal arrives.
pub async fn run_node(config: CollabConfig) -> anyhow::Result<()> {
    info!("collab daemon starting");

    // ── Membership case ──────────────────────────────────────────
    let mut case = Case::load(&config.node.case_file)
        .context("cannot start without a valid case file, run `collabd init` first")?;
    if let Some(ip) = &config.node.external_ip {
        case = case.with_external_ip(ip.as_str());
    }
    let case = Arc::new(case);
    info!(case = %case.case_id(), local = %case.local(), peers = case.peers().len(), "case ready");

    // ── Scheduler ────────────────────────────────────────────────
    let registry = HandlerRegistry::new();
    handlers::register_builtins(&registry);
    let scheduler = Arc::new(Scheduler::new(registry).with_task_expire(config.task_expire()));
    scheduler.batch_attach(config.node.workers);
    scheduler.launch_all()?;
    info!(workers = scheduler.count_workers(), "scheduler initialized");

    // ── Collaborator ─────────────────────────────────────────────
    let transport = Arc::new(HttpTransport::new(config.dial_timeout()));
    let collaborator = Arc::new(Collaborator::new(
        Arc::clone(&case),
        Arc::clone(&scheduler),
        transport,
        CollaboratorConfig::from(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gossip_handle = tokio::spawn(Arc::clone(&collaborator).run(shutdown_rx));

    // ── Peer API ─────────────────────────────────────────────────
    let router = peer_router(collaborator);
    let listener = tokio::net::TcpListener::bind(config.node.listen)
        .await
        .with_context(|| format!("bind {}", config.node.listen))?;
    info!(addr = %config.node.listen, api = %case.local().api(), "peer API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Clean up.
    let _ = gossip_handle.await;
    scheduler.close();

    info!("collab daemon stopped");
    Ok(())
}
