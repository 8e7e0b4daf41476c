//! Diagnostic scanner CLI
//!
//! `discover` sweeps a CAN ID range with TesterPresent probes;
//! `dump` walks a DID range on one ECU and can persist the result as a
//! JSON parameter file the emulator accepts back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use candiag_can::{CanIdRouter, CanTransport, SingleFrameChannel};
use candiag_scan::{
    discover_ids, dump_dids, prepare_dump_session, report, DiscoveryConfig, DumpConfig, ScanError,
};
use candiag_uds::{ParameterStore, UdsClient};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "candiag-scan")]
#[command(about = "UDS scanner: ECU discovery and DID dumps over CAN")]
struct Args {
    /// CAN interface name
    #[arg(short, long, default_value = "vcan0")]
    interface: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe a CAN ID range for responding ECUs
    Discover {
        /// First CAN ID to probe (hex)
        #[arg(long, default_value = "0x700")]
        base_id: String,

        /// Number of IDs to probe
        #[arg(long, default_value_t = 0x100)]
        count: u32,

        /// Per-probe listen window in milliseconds
        #[arg(long, default_value_t = 50)]
        window_ms: u64,
    },

    /// Read every DID in a range from one ECU
    Dump {
        /// ECU's receive CAN ID (hex)
        #[arg(long)]
        tx_id: String,

        /// ECU's response CAN ID (hex)
        #[arg(long)]
        rx_id: String,

        /// First DID, inclusive (hex)
        #[arg(long, default_value = "0x0000")]
        start: String,

        /// Last DID, inclusive (hex)
        #[arg(long, default_value = "0xFFFF")]
        end: String,

        /// Retries per DID after the first timeout
        #[arg(long, default_value_t = 5)]
        retries: u32,

        /// Per-request response timeout in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,

        /// Use CAN FD single frames (payloads up to 62 bytes)
        #[arg(long)]
        fd: bool,

        /// Write the records as a JSON parameter file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
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

    let transport = open_transport(&args.interface).await?;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping scan");
            let _ = cancel_tx.send(true);
        }
    });

    match args.command {
        Command::Discover {
            base_id,
            count,
            window_ms,
        } => {
            let config = DiscoveryConfig {
                base_id: parse_hex_u32(&base_id)?,
                count,
                response_timeout: Duration::from_millis(window_ms),
            };
            match discover_ids(transport, &config, cancel_rx).await {
                Ok(pairs) => print!("{}", report::format_discovery(&pairs)),
                Err(ScanError::Cancelled) => info!("Scan cancelled"),
                Err(err) => return Err(err.into()),
            }
        }
        Command::Dump {
            tx_id,
            rx_id,
            start,
            end,
            retries,
            timeout_ms,
            fd,
            output,
        } => {
            let tx_id = parse_hex_u32(&tx_id)?;
            let rx_id = parse_hex_u32(&rx_id)?;

            let router = CanIdRouter::new(transport);
            let endpoint = router.register(rx_id)?;
            router.start();

            let channel = if fd {
                SingleFrameChannel::new_fd(router.transport(), endpoint, tx_id)
            } else {
                SingleFrameChannel::new(router.transport(), endpoint, tx_id)
            };
            let mut client =
                UdsClient::new(Arc::new(channel)).with_timeout(Duration::from_millis(timeout_ms));

            // Extended session first; its P2 replaces the startup
            // timeout. An ECU that rejects 0x10 0x03 still gets dumped
            // in its default session.
            if let Err(err) = prepare_dump_session(&mut client).await {
                warn!("Extended session setup failed, dumping in the default session: {err}");
            }

            let config = DumpConfig {
                start: parse_hex_u16(&start)?,
                end: parse_hex_u16(&end)?,
                retry_budget: retries,
                retry_delay: Duration::from_millis(50),
            };
            let result = match dump_dids(&client, &config, cancel_rx).await {
                Ok(result) => result,
                Err(ScanError::Cancelled) => {
                    info!("Scan cancelled");
                    router.shutdown().await;
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            router.shutdown().await;

            print!("{}", report::format_dump(&result));
            if let Some(path) = output {
                let store = ParameterStore::from_entries(result.records.clone());
                store
                    .save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(file = %path.display(), "Dump saved");
            }
        }
    }

    Ok(())
}

fn parse_hex_u32(s: &str) -> Result<u32> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).with_context(|| format!("Invalid hex value '{s}'"))
}

fn parse_hex_u16(s: &str) -> Result<u16> {
    let value = parse_hex_u32(s)?;
    u16::try_from(value).with_context(|| format!("Value '{s}' does not fit a DID"))
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
