//! ECU discovery by TesterPresent sweep
//!
//! Sends a single-frame TesterPresent probe to each candidate CAN ID
//! and listens for the positive echo (`0x7E`). Every frame arriving in
//! the probe window is inspected, so several ECUs answering one probe
//! (functional addressing, gateways) all get recorded.

use std::sync::Arc;
use std::time::Duration;

use candiag_can::{CanFrame, CanTransport};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::ScanError;

/// TesterPresent single frame: PCI 0x02, SID 0x3E, sub-function 0x00.
pub const PROBE_FRAME: [u8; 8] = [0x02, 0x3E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// First CAN ID to probe.
    pub base_id: u32,
    /// Number of consecutive IDs to probe.
    pub count: u32,
    /// How long to listen after each probe.
    pub response_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_id: 0x700,
            count: 0x100,
            response_timeout: Duration::from_millis(50),
        }
    }
}

/// A (request, response) CAN ID pair observed during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IdPair {
    pub request_id: u32,
    pub response_id: u32,
}

/// Probe `config.count` IDs starting at `config.base_id` and return
/// every responding pair, ordered by probe.
pub async fn discover_ids(
    transport: Arc<dyn CanTransport>,
    config: &DiscoveryConfig,
    mut cancel: watch::Receiver<bool>,
) -> Result<Vec<IdPair>, ScanError> {
    let mut pairs = Vec::new();

    info!(
        base_id = format_args!("0x{:X}", config.base_id),
        count = config.count,
        "Starting ID discovery"
    );

    for offset in 0..config.count {
        if *cancel.borrow() {
            return Err(ScanError::Cancelled);
        }
        let probe_id = config.base_id + offset;
        let frame = CanFrame::new(probe_id, PROBE_FRAME.to_vec())?;

        tokio::select! {
            result = probe_window(transport.as_ref(), frame, config.response_timeout, &mut pairs) => {
                result?;
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return Err(ScanError::Cancelled);
                }
            }
        }
    }

    info!(found = pairs.len(), "Discovery finished");
    Ok(pairs)
}

/// Send one probe and collect hits for the full window. Draining until
/// the deadline (instead of stopping at the first hit) keeps slow and
/// additional responders from leaking into the next probe's window.
async fn probe_window(
    transport: &dyn CanTransport,
    probe: CanFrame,
    window: Duration,
    pairs: &mut Vec<IdPair>,
) -> Result<(), ScanError> {
    let probe_id = probe.id();
    transport.send_frame(probe).await?;

    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        match transport.recv_frame(remaining).await? {
            Some(frame) if is_tester_present_echo(&frame) => {
                debug!(
                    request_id = format_args!("0x{probe_id:X}"),
                    response_id = format_args!("0x{:X}", frame.id()),
                    "ECU responded"
                );
                pairs.push(IdPair {
                    request_id: probe_id,
                    response_id: frame.id(),
                });
            }
            Some(_) => {}
            None => return Ok(()),
        }
    }
}

fn is_tester_present_echo(frame: &CanFrame) -> bool {
    frame.data().len() >= 2 && frame.data()[1] == 0x7E
}

#[cfg(test)]
mod tests {
    use super::*;
    use candiag_can::VirtualBus;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn sweep_reports_every_responder_in_a_window() {
        let bus = VirtualBus::new();
        let scanner: Arc<dyn CanTransport> = Arc::new(bus.attach());
        let responder = bus.attach();

        let answer = tokio::spawn(async move {
            // Answer probes 0x701 and 0x703; 0x703 gets two replies.
            loop {
                match responder.recv_frame(Duration::from_secs(1)).await {
                    Ok(Some(frame)) if frame.data().get(1) == Some(&0x3E) => {
                        let reply = |id| {
                            CanFrame::new(id, vec![0x02, 0x7E, 0x00, 0, 0, 0, 0, 0]).unwrap()
                        };
                        match frame.id() {
                            0x701 => responder.send_frame(reply(0x709)).await.unwrap(),
                            0x703 => {
                                responder.send_frame(reply(0x70B)).await.unwrap();
                                responder.send_frame(reply(0x70C)).await.unwrap();
                            }
                            _ => {}
                        }
                    }
                    Ok(Some(_)) => {}
                    _ => break,
                }
            }
        });

        let config = DiscoveryConfig {
            base_id: 0x700,
            count: 8,
            response_timeout: Duration::from_millis(50),
        };
        let (_tx, cancel) = watch::channel(false);
        let pairs = discover_ids(scanner, &config, cancel).await.unwrap();

        assert_eq!(
            pairs,
            vec![
                IdPair { request_id: 0x701, response_id: 0x709 },
                IdPair { request_id: 0x703, response_id: 0x70B },
                IdPair { request_id: 0x703, response_id: 0x70C },
            ]
        );
        answer.abort();
    }

    #[tokio::test]
    async fn cancellation_stops_the_sweep() {
        let bus = VirtualBus::new();
        let scanner: Arc<dyn CanTransport> = Arc::new(bus.attach());
        let _peer = bus.attach();

        let (tx, cancel) = watch::channel(false);
        tx.send(true).unwrap();

        let config = DiscoveryConfig::default();
        let result = discover_ids(scanner, &config, cancel).await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }
}
