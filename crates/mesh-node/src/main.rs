//! Harness binary: brings up a single mesh node process from CLI flags and
//! an optional TOML config file, then runs until Ctrl-C.
//!
//! Not part of the library's contract (§6) — operators embedding `mesh`
//! wire `NodeConfig` their own way. This exists so the workspace is
//! exercisable end-to-end without a real WiFi radio underneath it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mesh_core::NodeId;
use mesh_gateway::GatewayConfig;
use rand::Rng;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "mesh-node", about = "Run a single painlessMesh-compatible node", version)]
struct Args {
    /// TOML config file layered on top of NodeConfig::default().
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node identity. Random if omitted.
    #[arg(long)]
    node_id: Option<u32>,

    /// Address to accept incoming connections on.
    #[arg(long, default_value = "0.0.0.0:5555")]
    listen: SocketAddr,

    /// Peer address to dial on startup. Repeatable.
    #[arg(long = "connect")]
    connect: Vec<SocketAddr>,

    /// Mark this node as the mesh root.
    #[arg(long)]
    root: bool,

    /// Enable the gateway subsystem with default tuning.
    #[arg(long)]
    gateway: bool,

    /// Verbose, pretty console logging.
    #[arg(long)]
    verbose: bool,

    /// Also log to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Partial, serde-deserializable overlay onto [`mesh::NodeConfig`]. Only the
/// operator-relevant top-level knobs are exposed; subsystem tuning beyond
/// this is a library-level concern, not a harness one.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigOverlay {
    mesh_prefix: Option<String>,
    mesh_password: Option<String>,
    node_sync_interval_ms: Option<u64>,
    max_offset_staleness_ms: Option<u64>,
    ota_role: Option<String>,
    ota_hardware: Option<String>,
    ota_running_md5: Option<String>,
    gateway: Option<GatewayOverlay>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GatewayOverlay {
    internet_check_host: Option<String>,
    internet_check_port: Option<u16>,
    participate_in_election: Option<bool>,
}

fn load_overlay(path: &PathBuf) -> anyhow::Result<ConfigOverlay> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

fn apply_overlay(mut config: mesh::NodeConfig, overlay: ConfigOverlay) -> mesh::NodeConfig {
    if let (Some(prefix), Some(password)) = (&overlay.mesh_prefix, &overlay.mesh_password) {
        config = config.with_mesh_credentials(prefix.clone(), password.clone());
    }
    if let Some(ms) = overlay.node_sync_interval_ms {
        config = config.with_node_sync_interval_ms(ms);
    }
    if let Some(ms) = overlay.max_offset_staleness_ms {
        config = config.with_max_offset_staleness_ms(ms);
    }
    if overlay.ota_role.is_some() || overlay.ota_hardware.is_some() || overlay.ota_running_md5.is_some() {
        config = config.with_ota_identity(
            overlay.ota_role.unwrap_or_else(|| config.ota_role.clone()),
            overlay.ota_hardware.unwrap_or_else(|| config.ota_hardware.clone()),
            overlay.ota_running_md5.unwrap_or_else(|| config.ota_running_md5.clone()),
        );
    }
    if let Some(gw) = overlay.gateway {
        let mut gateway_config = config.gateway.clone().unwrap_or_default();
        if let Some(host) = gw.internet_check_host {
            gateway_config.internet_check_host = host;
        }
        if let Some(port) = gw.internet_check_port {
            gateway_config.internet_check_port = port;
        }
        if let Some(participate) = gw.participate_in_election {
            gateway_config.participate_in_election = participate;
        }
        config = config.with_gateway_config(gateway_config);
    }
    config
}

fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let mut log_config = if verbose {
        mesh_logging::LogConfig::development()
    } else {
        mesh_logging::LogConfig::default()
    };
    if let Some(path) = log_file {
        log_config.file = Some(mesh_logging::FileConfig::new(path));
    }
    mesh_logging::MeshSubscriberBuilder::new()
        .with_config(log_config)
        .init()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.verbose, args.log_file.clone());

    let node_id = NodeId::new(args.node_id.unwrap_or_else(|| rand::rng().random_range(1..u32::MAX)));
    let _context = mesh_logging::NodeContextGuard::new(node_id);

    let mut config = mesh::NodeConfig::default().with_port(args.listen.port()).with_root(args.root);
    if args.gateway && config.gateway.is_none() {
        config = config.with_gateway_config(GatewayConfig::default());
    }
    if let Some(path) = &args.config {
        let overlay = load_overlay(path)?;
        config = apply_overlay(config, overlay);
    }

    tracing::info!(%node_id, listen = %args.listen, "starting mesh node");
    let node = mesh::Mesh::new(node_id, config);
    install_logging_callbacks(&node);

    node.listen(args.listen).await.context("binding listen address")?;
    for peer in &args.connect {
        tracing::info!(%peer, "dialing peer");
        node.connect(*peer).await.with_context(|| format!("connecting to {peer}"))?;
    }
    node.start().context("starting scheduler")?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    node.shutdown();
    Ok(())
}

fn install_logging_callbacks(node: &Arc<mesh::Mesh>) {
    node.callbacks().set_on_new_connection(Box::new(|peer| {
        tracing::info!(%peer, "new connection established");
    }));
    node.callbacks().set_on_dropped_connection(Box::new(|peer| {
        tracing::info!(%peer, "connection dropped");
    }));
    node.callbacks().set_on_changed_connections(Box::new(|| {
        tracing::debug!("topology changed");
    }));
    node.callbacks().set_on_node_time_adjusted(Box::new(|offset_micros| {
        tracing::debug!(offset_micros, "node time adjusted");
    }));
    node.callbacks().set_on_receive(Box::new(|from, payload| {
        tracing::info!(%from, %payload, "received broadcast/single message");
    }));
}
