//! UDS client over an ISO-TP channel

use std::sync::Arc;
use std::time::{Duration, Instant};

use candiag_can::IsoTpChannel;
use tracing::{debug, trace};

use crate::error::UdsError;
use crate::nrc::NegativeResponseCode;
use crate::protocol::service_id;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long a ResponsePending exchange may stretch one request.
const RESPONSE_PENDING_BUDGET: Duration = Duration::from_millis(30_000);

/// Diagnostic tester side of a UDS connection.
///
/// Strictly request/response: one request is in flight at a time, and
/// every wait carries the configured timeout.
pub struct UdsClient {
    channel: Arc<dyn IsoTpChannel>,
    timeout: Duration,
}

impl UdsClient {
    pub fn new(channel: Arc<dyn IsoTpChannel>) -> Self {
        Self {
            channel,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adjust the response timeout (P2) of subsequent requests, e.g.
    /// after the ECU advertised its timing in a session-control reply.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a raw request and return the raw positive-response bytes.
    ///
    /// Negative responses become [`UdsError::NegativeResponse`], except
    /// ResponsePending, which extends the wait.
    pub async fn send_request(&self, request: &[u8]) -> Result<Vec<u8>, UdsError> {
        self.channel
            .send(request)
            .await
            .map_err(|e| UdsError::Transport(e.to_string()))?;

        let started = Instant::now();
        loop {
            let response = self
                .channel
                .recv(self.timeout)
                .await
                .map_err(|e| UdsError::Transport(e.to_string()))?
                .ok_or(UdsError::Timeout)?;

            if response.first() == Some(&service_id::NEGATIVE_RESPONSE) {
                if response.len() < 3 {
                    return Err(UdsError::InvalidResponse(
                        "negative response too short".to_string(),
                    ));
                }
                let sid = response[1];
                let nrc = NegativeResponseCode::from(response[2]);

                if nrc == NegativeResponseCode::ResponsePending {
                    if started.elapsed() > RESPONSE_PENDING_BUDGET {
                        return Err(UdsError::Timeout);
                    }
                    trace!(sid = format!("0x{:02X}", sid), "Response pending, waiting");
                    continue;
                }

                return Err(UdsError::NegativeResponse {
                    service_id: sid,
                    nrc,
                });
            }

            return Ok(response);
        }
    }

    /// Diagnostic Session Control (0x10). Returns the raw response so
    /// callers can read the advertised P2/P2* timing bytes.
    pub async fn diagnostic_session_control(&self, session: u8) -> Result<Vec<u8>, UdsError> {
        let response = self.send_request(&[service_id::DIAGNOSTIC_SESSION_CONTROL, session]).await?;
        expect_echo(&response, service_id::DIAGNOSTIC_SESSION_CONTROL, &[session])?;
        debug!(session = format!("0x{:02X}", session), "Session entered");
        Ok(response)
    }

    /// Tester Present (0x3E).
    pub async fn tester_present(&self) -> Result<(), UdsError> {
        let response = self.send_request(&[service_id::TESTER_PRESENT, 0x00]).await?;
        expect_echo(&response, service_id::TESTER_PRESENT, &[])?;
        Ok(())
    }

    /// Read Data By Identifier (0x22). Returns the payload with the
    /// `[0x62, hi, lo]` header stripped after verifying the DID echo.
    pub async fn read_data_by_identifier(&self, did: u16) -> Result<Vec<u8>, UdsError> {
        let [hi, lo] = did.to_be_bytes();
        let response = self
            .send_request(&[service_id::READ_DATA_BY_ID, hi, lo])
            .await?;
        expect_echo(&response, service_id::READ_DATA_BY_ID, &[hi, lo])?;
        Ok(response[3..].to_vec())
    }

    /// Write Data By Identifier (0x2E).
    pub async fn write_data_by_identifier(&self, did: u16, payload: &[u8]) -> Result<(), UdsError> {
        let [hi, lo] = did.to_be_bytes();
        let mut request = vec![service_id::WRITE_DATA_BY_ID, hi, lo];
        request.extend_from_slice(payload);
        let response = self.send_request(&request).await?;
        expect_echo(&response, service_id::WRITE_DATA_BY_ID, &[hi, lo])?;
        Ok(())
    }
}

/// Check a positive response starts with `sid + 0x40` followed by the
/// expected echo bytes.
fn expect_echo(response: &[u8], sid: u8, echo: &[u8]) -> Result<(), UdsError> {
    let expected = sid.wrapping_add(service_id::POSITIVE_OFFSET);
    if response.first() != Some(&expected) || response.len() < 1 + echo.len() {
        return Err(UdsError::InvalidResponse(format!(
            "unexpected reply {:02X?} to service 0x{:02X}",
            response, sid
        )));
    }
    if &response[1..1 + echo.len()] != echo {
        return Err(UdsError::InvalidResponse(format!(
            "echo mismatch in reply to service 0x{:02X}",
            sid
        )));
    }
    Ok(())
}
