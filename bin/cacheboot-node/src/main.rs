//! cacheboot node daemon
//!
//! Runs one cluster member: an in-memory cache manager, the control-plane
//! listener other members send bootstrap requests to, and the loader that
//! fills newly created caches from the cluster.

use anyhow::{Context, Result};
use cacheboot_cache::{CacheManager, MemoryCacheManager};
use cacheboot_common::{BootstrapConfig, Config, NodeAddress, NodeConfig};
use cacheboot_stream::{
    BootstrapCacheLoader, BootstrapClient, BootstrapCoordinator, BootstrapResponder, RpcServer,
    TcpClusterTransport,
};
use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cacheboot-node")]
#[command(about = "cacheboot cluster node")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/cacheboot/node.toml")]
    config: PathBuf,

    /// Node name
    #[arg(short, long)]
    name: Option<String>,

    /// Control-plane listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Control-plane address of another member (repeatable)
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Cache to create on startup (repeatable)
    #[arg(long = "cache")]
    caches: Vec<String>,

    /// Address transfer listeners bind to
    #[arg(long)]
    bind_addr: Option<IpAddr>,

    /// First port tried for transfer listeners (0 = ephemeral)
    #[arg(long)]
    start_port: Option<u16>,

    /// Log level
    #[arg(long, env = "CACHEBOOT_LOG")]
    log_level: Option<String>,
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    node: NodeConfig,
    #[serde(default)]
    bootstrap: BootstrapConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parse config file {}", path.display()))
}

/// Merge CLI args over the file (CLI takes precedence)
fn merge(args: Args, file: FileConfig) -> (Config, String) {
    let FileConfig {
        mut node,
        mut bootstrap,
        logging,
    } = file;

    if let Some(name) = args.name {
        node.name = name;
    }
    if let Some(listen) = args.listen {
        node.rpc_listen = listen;
    }
    if !args.peers.is_empty() {
        node.peers = args.peers;
    }
    if !args.caches.is_empty() {
        node.caches = args.caches;
    }
    if let Some(bind_addr) = args.bind_addr {
        bootstrap.bind_addr = bind_addr;
    }
    if let Some(port) = args.start_port {
        bootstrap.socket_start_port = port;
    }

    let log_level = args.log_level.unwrap_or(logging.level);
    (Config { node, bootstrap }, log_level)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file = load_file_config(&args.config)?;
    let config_path = args.config.clone();
    let (config, log_level) = merge(args, file);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting cacheboot node");
    info!("Config file: {}", config_path.display());
    config.validate().context("invalid configuration")?;

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    let Config { node, bootstrap } = config;
    let local = NodeAddress::new(node.name.clone());
    info!(node = %local, peers = ?node.peers, "cluster membership");

    let manager = Arc::new(MemoryCacheManager::new());

    // ── Control plane ─────────────────────────────────────────────────────────
    let responder = Arc::new(BootstrapResponder::new(manager.clone(), bootstrap.clone()));
    let listener = TcpListener::bind(node.rpc_listen)
        .await
        .with_context(|| format!("bind control plane on {}", node.rpc_listen))?;
    let rpc = Arc::new(RpcServer::new(local.clone(), responder));
    tokio::spawn(async move {
        if let Err(e) = rpc.serve(listener).await {
            error!(error = %e, "control plane stopped");
        }
    });

    // ── Bootstrap on cache creation ───────────────────────────────────────────
    let transport = Arc::new(
        TcpClusterTransport::new(local.clone(), node.peers.clone(), &bootstrap)
            .context("create control plane clients")?,
    );
    let coordinator = Arc::new(BootstrapCoordinator::new(
        transport,
        BootstrapClient::new(manager.clone(), bootstrap.clone()),
        bootstrap.node_bootup_response_timeout(),
    ));
    let loader = Arc::new(BootstrapCacheLoader::new(
        Arc::clone(&coordinator),
        Handle::current(),
        bootstrap.bootstrap_asynchronously,
    ));
    manager.register_listener(loader.clone());

    if bootstrap.synchronize_on_start {
        loader.synchronize(manager.as_ref()).await;
    }

    for name in &node.caches {
        if let Err(e) = manager.add_cache_if_absent(name) {
            warn!(cache = %name, error = %e, "failed to create configured cache");
        }
    }

    for name in manager.cache_names() {
        let len = manager.cache(&name).map_or(0, |cache| cache.len());
        info!(cache = %name, entries = len, "cache ready");
    }

    info!("cacheboot node {} running", local);
    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;

    info!("Shutting down cacheboot node");
    coordinator.interrupt();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["cacheboot-node"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let file = load_file_config(Path::new("/nonexistent/cacheboot.toml")).unwrap();
        assert_eq!(file.logging.level, "info");
        assert_eq!(file.node.name, "cacheboot-node");
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"
[node]
name = "from-file"
peers = ["127.0.0.1:7701"]
caches = ["sessions"]

[bootstrap]
socket_start_port = 9000

[logging]
level = "debug"
"#
        )
        .unwrap();

        let file = load_file_config(tmp.path()).unwrap();
        let (config, level) = merge(
            args(&["--name", "from-cli", "--cache", "users", "--cache", "orders"]),
            file,
        );

        assert_eq!(config.node.name, "from-cli");
        assert_eq!(config.node.caches, vec!["users", "orders"]);
        assert_eq!(config.node.peers, vec!["127.0.0.1:7701".parse::<SocketAddr>().unwrap()]);
        assert_eq!(config.bootstrap.socket_start_port, 9000);
        assert_eq!(level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_malformed_config_file_is_an_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[node\nname = 1").unwrap();
        assert!(load_file_config(tmp.path()).is_err());
    }
}
