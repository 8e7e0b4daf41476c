//! Exhaustive DID dump
//!
//! Walks a DID range with ReadDataByIdentifier. A negative response or
//! a malformed reply settles a DID immediately; a timeout is retried
//! with exponential backoff up to the configured budget, and DIDs that
//! never answer are reported separately instead of silently dropped.

use std::collections::BTreeMap;
use std::time::Duration;

use candiag_uds::{UdsClient, UdsError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ScanError;

#[derive(Debug, Clone)]
pub struct DumpConfig {
    /// First DID, inclusive.
    pub start: u16,
    /// Last DID, inclusive.
    pub end: u16,
    /// Retries granted per DID after the first timeout.
    pub retry_budget: u32,
    /// Base backoff delay; doubles per retry.
    pub retry_delay: Duration,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            start: 0x0000,
            end: 0xFFFF,
            retry_budget: 5,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Outcome of a dump over one DID range.
#[derive(Debug, Default, Clone)]
pub struct DumpResult {
    /// DIDs the ECU answered positively, with their payloads.
    pub records: BTreeMap<u16, Vec<u8>>,
    /// DIDs that exhausted the retry budget without any answer.
    pub timed_out: Vec<u16>,
}

impl DumpResult {
    pub fn found(&self) -> usize {
        self.records.len()
    }
}

enum DidOutcome {
    Present(Vec<u8>),
    Absent,
    TimedOut,
}

/// Diagnostic session requested before a dump (0x03, extended).
const DUMP_SESSION: u8 = 0x03;

/// Per-request timeout once the extended session is up. Matches the P2
/// the emulated ECUs advertise.
const SESSION_P2: Duration = Duration::from_millis(50);

/// Enter the extended diagnostic session and tighten the client's
/// per-request timeout to P2. A dump runs against the session this
/// sets up; on an ECU that rejects 0x10 0x03 the caller may still dump
/// in the default session with the original timeout.
pub async fn prepare_dump_session(client: &mut UdsClient) -> Result<(), UdsError> {
    client.diagnostic_session_control(DUMP_SESSION).await?;
    client.set_timeout(SESSION_P2);
    Ok(())
}

/// Read every DID in `config`'s range through `client`.
///
/// Cancellation is cooperative: flipping `cancel` to true aborts at the
/// next DID boundary (or mid-backoff) with [`ScanError::Cancelled`],
/// never disguised as a timeout.
pub async fn dump_dids(
    client: &UdsClient,
    config: &DumpConfig,
    mut cancel: watch::Receiver<bool>,
) -> Result<DumpResult, ScanError> {
    let mut result = DumpResult::default();

    info!(
        start = format_args!("0x{:04X}", config.start),
        end = format_args!("0x{:04X}", config.end),
        "Starting DID dump"
    );

    for did in config.start..=config.end {
        match read_did_with_retry(client, did, config, &mut cancel).await? {
            DidOutcome::Present(payload) => {
                debug!(
                    did = format_args!("0x{did:04X}"),
                    len = payload.len(),
                    "DID present"
                );
                result.records.insert(did, payload);
            }
            DidOutcome::Absent => {}
            DidOutcome::TimedOut => {
                warn!(did = format_args!("0x{did:04X}"), "DID timed out");
                result.timed_out.push(did);
            }
        }

        if did % 0x1000 == 0xFFF {
            info!(
                progress = format_args!("0x{did:04X}"),
                found = result.found(),
                "Dump progress"
            );
        }
    }

    info!(
        found = result.found(),
        timed_out = result.timed_out.len(),
        "Dump finished"
    );
    Ok(result)
}

async fn read_did_with_retry(
    client: &UdsClient,
    did: u16,
    config: &DumpConfig,
    cancel: &mut watch::Receiver<bool>,
) -> Result<DidOutcome, ScanError> {
    for attempt in 0..=config.retry_budget {
        if *cancel.borrow() {
            return Err(ScanError::Cancelled);
        }

        // The request future is pinned outside the select loop so a
        // watch update that is not a cancellation neither abandons the
        // in-flight request nor consumes a retry attempt.
        let request = client.read_data_by_identifier(did);
        tokio::pin!(request);
        let read = loop {
            tokio::select! {
                read = &mut request => break read,
                changed = cancel.changed() => {
                    if *cancel.borrow() {
                        return Err(ScanError::Cancelled);
                    }
                    if changed.is_err() {
                        // Sender gone: no cancellation can arrive.
                        break request.as_mut().await;
                    }
                }
            }
        };

        match read {
            Ok(payload) => return Ok(DidOutcome::Present(payload)),
            Err(UdsError::Timeout) => {
                if attempt == config.retry_budget {
                    return Ok(DidOutcome::TimedOut);
                }
                let backoff = config.retry_delay * 2u32.saturating_pow(attempt);
                debug!(
                    did = format_args!("0x{did:04X}"),
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Timeout, retrying"
                );
                let sleep = tokio::time::sleep(backoff);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        changed = cancel.changed() => {
                            if *cancel.borrow() {
                                return Err(ScanError::Cancelled);
                            }
                            if changed.is_err() {
                                sleep.as_mut().await;
                                break;
                            }
                        }
                    }
                }
            }
            Err(err @ UdsError::Transport(_)) => return Err(err.into()),
            Err(err) => {
                debug!(did = format_args!("0x{did:04X}"), "DID absent: {err}");
                return Ok(DidOutcome::Absent);
            }
        }
    }
    Ok(DidOutcome::TimedOut)
}
