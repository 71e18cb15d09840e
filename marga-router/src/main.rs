//! MargaRouter daemon.
//!
//! Usage:
//!
//! ```text
//! marga-router [CONFIG] [--config PATH] [--mqtt HOST[:PORT]] [--nodesrv ADDR]
//! ```
//!
//! Without a config path, `marga.toml` in the working directory is used if
//! present, else built-in defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use marga_router::backend::TcpBackend;
use marga_router::{Result, RouterConfig, RouterError, RouterService};
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "marga.toml";
const BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Command line overrides.
#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    mqtt: Option<String>,
    node_server: Option<String>,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => cli.config = Some(PathBuf::from(value(&mut iter, arg)?)),
            "--mqtt" => cli.mqtt = Some(value(&mut iter, arg)?),
            "--nodesrv" => cli.node_server = Some(value(&mut iter, arg)?),
            other if !other.starts_with('-') && cli.config.is_none() => {
                cli.config = Some(PathBuf::from(other))
            }
            other => return Err(RouterError::Config(format!("Unknown argument: {}", other))),
        }
    }
    Ok(cli)
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| RouterError::Config(format!("{} requires a value", flag)))
}

fn load_config(cli: &CliArgs) -> Result<RouterConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            RouterConfig::load(path)?
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            info!("Loading configuration from {}", DEFAULT_CONFIG);
            RouterConfig::load(Path::new(DEFAULT_CONFIG))?
        }
        None => {
            info!("Using default configuration");
            RouterConfig::default()
        }
    };

    if let Some(mqtt) = &cli.mqtt {
        match mqtt.rsplit_once(':') {
            Some((host, port)) => {
                config.mqtt.host = host.to_string();
                config.mqtt.port = port
                    .parse()
                    .map_err(|_| RouterError::Config(format!("Invalid MQTT port: {}", port)))?;
            }
            None => config.mqtt.host = mqtt.clone(),
        }
    }
    if let Some(server) = &cli.node_server {
        config.node.server = server.clone();
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("marga_router=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args)?;
    let config = load_config(&cli)?;

    info!("MargaRouter v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Node server {}, MQTT {}:{} ({}), {} planner",
        config.node.server,
        config.mqtt.host,
        config.mqtt.port,
        config.mqtt.costmap_topic,
        config.planner.mode
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            running.store(false, Ordering::SeqCst);
        })
        .map_err(|e| RouterError::Config(format!("Failed to set signal handler: {}", e)))?;
    }

    let backend = Arc::new(TcpBackend::new(BACKEND_TIMEOUT));
    let mut service = RouterService::connect(config, backend.clone(), backend, Arc::clone(&running))?;
    service.start()?;
    if let Err(e) = service.start_mqtt_feed() {
        error!("Costmap feed not started: {}", e);
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    service.shutdown()?;
    info!("MargaRouter stopped");
    Ok(())
}
