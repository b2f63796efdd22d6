//! Cross-chain arbiter
//!
//! Watches a main chain and its side chains, and together with the other
//! arbitrators signs the transactions that move assets between them.
//! UTXO state is persisted under the data directory and survives restarts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use arbiter_consensus::ProposalServer;
use arbiter_rpc::HttpRpcServer;
use chain_bridge::{ChainSynchronizer, ReconcileReport, SyncOutcome};
use clap::Parser;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod context;

use config::ArbiterConfig;
use context::ServiceContext;

/// Cross-chain arbiter daemon
#[derive(Parser, Debug)]
#[command(name = "arbiter")]
#[command(about = "Multi-signature arbiter between a main chain and its side chains", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Data directory for the UTXO database and keystore
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Keystore password
    #[arg(long, env = "ARBITER_PASSWORD", hide_env_values = true)]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&args.log_level);

    let config = ArbiterConfig::load(&args.config)?;
    tracing::info!(
        config = %args.config.display(),
        data_dir = %args.data_dir.display(),
        node_port = config.node_port,
        rpc_port = config.http_json_port,
        "arbiter starting"
    );

    std::fs::create_dir_all(&args.data_dir)?;
    let ctx = Arc::new(ServiceContext::build(config, &args.data_dir, &args.password)?);

    ctx.network.start().await?;
    ctx.network.connect_peers();

    let mut tasks: Vec<JoinHandle<()>> = ctx
        .synchronizers()
        .map(|synchronizer| spawn_sync_schedule(ctx.clone(), synchronizer.clone()))
        .collect();
    tasks.extend(
        ctx.servers
            .iter()
            .map(|server| spawn_propose_schedule(ctx.clone(), server.clone())),
    );
    tasks.push(spawn_clear_schedule(ctx.clone()));
    tasks.push(spawn_reconnect_schedule(ctx.clone()));

    let rpc_context = Arc::new(ctx.rpc_context());
    let rpc_addr = format!("0.0.0.0:{}", ctx.config.http_json_port);
    tasks.push(tokio::spawn(async move {
        if let Err(e) = HttpRpcServer::new(rpc_context).run(&rpc_addr).await {
            tracing::error!("Status RPC server error: {}", e);
        }
    }));

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, stopping {} tasks", tasks.len());

    tasks.iter().for_each(JoinHandle::abort);
    if let Err(e) = ctx.shutdown() {
        tracing::error!("Failed to flush UTXO database: {}", e);
    }
    Ok(())
}

/// `RUST_LOG` wins over `--log-level`
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// One task per chain so a stalled node only delays its own chain.
///
/// The main chain task also moves the group to the newly synced height.
fn spawn_sync_schedule(ctx: Arc<ServiceContext>, synchronizer: Arc<ChainSynchronizer>) -> JoinHandle<()> {
    let is_main = Arc::ptr_eq(&synchronizer, &ctx.main_chain);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ctx.config.sync_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;

            match synchronizer.sync().await {
                Ok(SyncOutcome::Synced { from, to }) => {
                    tracing::debug!("[{}] Synced {}..{}", synchronizer.name(), from, to);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[{}] Sync failed: {}", synchronizer.name(), e);
                }
            }
            if is_main {
                ctx.advance_group_height();
            }
        }
    })
}

/// Propose queued intents whenever this arbiter is on duty
fn spawn_propose_schedule(ctx: Arc<ServiceContext>, server: Arc<ProposalServer>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ctx.config.sync_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = server.propose_pending().await {
                tracing::warn!("[{}] Proposing failed: {}", server.node().name(), e);
            }
        }
    })
}

/// Drop expired proposals and audit stores against the nodes
fn spawn_clear_schedule(ctx: Arc<ServiceContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ctx.config.clear_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick fires immediately; nothing can have expired yet
        interval.tick().await;
        loop {
            interval.tick().await;

            for server in &ctx.servers {
                server.sweep_expired();
            }
            for synchronizer in ctx.synchronizers() {
                match synchronizer.reconcile().await {
                    Ok(ReconcileReport::Skipped) => {
                        tracing::trace!("[{}] Reconcile skipped, sync running or behind tip", synchronizer.name());
                    }
                    Ok(ReconcileReport::Compared { .. }) => {}
                    Err(e) => {
                        tracing::warn!("[{}] Reconcile failed: {}", synchronizer.name(), e);
                    }
                }
            }
            if let Err(e) = ctx.store.flush() {
                tracing::error!("Failed to flush UTXO database: {}", e);
            }
        }
    })
}

fn spawn_reconnect_schedule(ctx: Arc<ServiceContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ctx.config.reconnect_interval());
        loop {
            interval.tick().await;
            ctx.network.connect_peers();
            tracing::trace!("{} peers connected", ctx.network.connected_peers().len());
        }
    })
}
