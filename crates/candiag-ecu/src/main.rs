//! Multi-ECU UDS emulator
//!
//! Hosts several virtual ECUs on one CAN interface. Each ECU gets its own
//! receive identifier, parameter store and session task; a shared router
//! fans inbound frames out by CAN ID.
//!
//! # Usage
//!
//! ```bash
//! ./candiag-ecu --config config/emulator.toml
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use candiag_can::{CanIdRouter, CanTransport, SingleFrameChannel, DEFAULT_QUEUE_DEPTH};
use candiag_ecu::{parse_can_id, EcuDef, EcuSession, EmulatorConfig};
use candiag_uds::{standard_dispatcher, ParameterStore};
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "candiag-ecu")]
#[command(about = "Multi-ECU UDS emulator over CAN")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, default_value = "config/emulator.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "candiag=debug"
    } else {
        "candiag=info"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Loading config from: {}", args.config);
    let config = EmulatorConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    if config.ecus.is_empty() {
        anyhow::bail!("Config defines no ECUs");
    }

    let transport = open_transport(&config.transport.interface).await?;
    let router = Arc::new(CanIdRouter::new(transport));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut stores: Vec<(EcuDef, Arc<ParameterStore>)> = Vec::new();

    for ecu in &config.ecus {
        let rx_id = parse_can_id(&ecu.rx_id)?;
        let tx_id = parse_can_id(&ecu.tx_id)?;

        let store = Arc::new(match ParameterStore::load(&ecu.store_file) {
            Ok(store) => store,
            Err(err) => {
                warn!(
                    ecu = %ecu.name,
                    file = %ecu.store_file.display(),
                    "Starting with empty store: {err}"
                );
                ParameterStore::default()
            }
        });

        let depth = ecu.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH);
        let endpoint = router.register_with_depth(rx_id, depth)?;
        let channel = SingleFrameChannel::new(router.transport(), endpoint, tx_id);
        let dispatcher = standard_dispatcher(store.clone());
        let session = EcuSession::new(&ecu.name, Arc::new(channel), dispatcher);

        info!(
            ecu = %ecu.name,
            rx_id = format_args!("0x{rx_id:X}"),
            tx_id = format_args!("0x{tx_id:X}"),
            dids = store.len(),
            "ECU registered"
        );

        let name = ecu.name.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = session.run(rx).await {
                error!(ecu = %name, "ECU session failed: {err}");
            }
        }));
        stores.push((ecu.clone(), store));
    }

    router.start();
    info!("Emulator ready ({} ECUs) - press Ctrl+C to stop", tasks.len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    router.shutdown().await;

    for (ecu, store) in stores {
        if let Err(err) = store.save(&ecu.store_file) {
            error!(
                ecu = %ecu.name,
                file = %ecu.store_file.display(),
                "Failed to save store: {err}"
            );
        }
    }

    info!("Emulator stopped");
    Ok(())
}

#[cfg(all(target_os = "linux", feature = "socketcan"))]
async fn open_transport(interface: &str) -> Result<Arc<dyn CanTransport>> {
    use candiag_can::socketcan::SocketCanTransport;
    let transport = SocketCanTransport::open(interface)
        .with_context(|| format!("Failed to open CAN interface {interface}"))?;
    Ok(Arc::new(transport))
}

#[cfg(not(all(target_os = "linux", feature = "socketcan")))]
async fn open_transport(interface: &str) -> Result<Arc<dyn CanTransport>> {
    anyhow::bail!(
        "No CAN backend available for interface {interface}; \
         rebuild with the 'socketcan' feature on Linux"
    )
}
