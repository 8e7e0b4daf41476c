//! One emulated ECU serving loop

use std::sync::Arc;
use std::time::Duration;

use candiag_can::{IsoTpChannel, TransportError};
use candiag_uds::{
    negative_response, NegativeResponseCode, ServiceDispatcher, SessionContext, UdsRequest,
};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// How often the serve loop re-checks the shutdown flag on a quiet bus.
const RECV_POLL: Duration = Duration::from_millis(100);

/// One virtual ECU: an ISO-TP channel, a service table and the session
/// state threaded through every dispatch. Strictly one request at a
/// time; UDS has no pipelining within a session.
pub struct EcuSession {
    name: String,
    channel: Arc<dyn IsoTpChannel>,
    dispatcher: ServiceDispatcher,
    ctx: SessionContext,
}

impl EcuSession {
    pub fn new(
        name: impl Into<String>,
        channel: Arc<dyn IsoTpChannel>,
        dispatcher: ServiceDispatcher,
    ) -> Self {
        Self {
            name: name.into(),
            channel,
            dispatcher,
            ctx: SessionContext::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serve requests until `shutdown` flips to true or the channel
    /// goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        info!(ecu = %self.name, "ECU session serving");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.channel.recv(RECV_POLL) => {
                    match received {
                        Ok(Some(payload)) => self.handle(&payload).await?,
                        Ok(None) => {}
                        Err(TransportError::ConnectionClosed) => {
                            debug!(ecu = %self.name, "Channel closed, session exiting");
                            break;
                        }
                        Err(e) => {
                            error!(ecu = %self.name, error = %e, "Channel receive error");
                            return Err(e);
                        }
                    }
                }
            }
        }

        info!(ecu = %self.name, "ECU session stopped");
        Ok(())
    }

    async fn handle(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let response = match UdsRequest::parse(payload) {
            Some(request) => {
                debug!(ecu = %self.name, request = ?payload, "Request");
                self.dispatcher.dispatch(&mut self.ctx, &request).to_bytes()
            }
            // An empty reassembled payload has no service ID to echo.
            None => negative_response(0x00, NegativeResponseCode::IncorrectMessageLengthOrFormat),
        };

        debug!(ecu = %self.name, response = ?response, "Response");
        self.channel.send(&response).await
    }
}
