//! hap-accessory - a HomeKit accessory with no services of its own.
//!
//! Pairs with controllers, advertises itself over mDNS and serves the
//! encrypted HAP transport. Requests beyond pairing get a 404 until a real
//! accessory database is plugged in as the router.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hap_core::AccessoryConfig;
use hap_discovery::{announce_on_change, Announcer, MdnsResponder, ServiceAdvertisement};
use hap_pairing::{FileStore, PairingContext};
use hap_server::{AccessoryServer, NotFoundRouter};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hap-accessory")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter (overrides RUST_LOG and the config file)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn setup_logging(args: &Args, config: &AccessoryConfig) {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AccessoryConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AccessoryConfig::default(),
    };
    setup_logging(&args, &config);
    info!(name = %config.name, "starting accessory");

    let store = Arc::new(FileStore::new(&config.storage_path));
    let context = Arc::new(
        PairingContext::load_or_create(store, config.setup_code()?, config.device_id()?)
            .await
            .context("loading pairing state")?,
    );
    info!(device_id = %context.device_id(), paired = context.is_paired().await, "identity ready");

    let server = AccessoryServer::bind(
        config.bind,
        context.clone(),
        Arc::new(NotFoundRouter),
        config.max_message_size,
    )
    .await
    .context("binding accessory server")?;
    let port = server.local_addr()?.port();

    let responder = Arc::new(
        MdnsResponder::start(&config.mdns)
            .await
            .context("starting mDNS responder")?,
    );
    let advertisement = ServiceAdvertisement::from_config(&config, context.device_id(), port);
    let paired = context.paired_changes();
    responder
        .register(move || advertisement.packet(*paired.borrow()))
        .await;
    if let Err(e) = responder.broadcast().await {
        warn!(error = %e, "initial announcement failed");
    }
    let announcer: Arc<dyn Announcer> = responder.clone();
    let reannounce = tokio::spawn(announce_on_change(context.paired_changes(), announcer));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutting down");

    let _ = shutdown_tx.send(true);
    server_task.await??;
    reannounce.abort();
    responder.stop().await;
    Ok(())
}
