//! UDS service dispatch
//!
//! The handler table is built once at session construction; there is no
//! runtime registration. Dispatch is total: every service identifier
//! either has a handler or yields ServiceNotSupported, and the
//! service's minimum length is checked before its handler ever runs.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::nrc::NegativeResponseCode;
use crate::protocol::{UdsRequest, UdsResponse};

/// What a handler produces: the positive-response payload (everything
/// after the SID+0x40 byte) or the NRC to send instead.
pub type ServiceResult = Result<Vec<u8>, NegativeResponseCode>;

type Handler = Box<dyn Fn(&mut SessionContext, &UdsRequest) -> ServiceResult + Send + Sync>;

/// Per-session diagnostic state, threaded explicitly through dispatch
/// rather than living as ambient mutable state on a connection object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    /// Active diagnostic session (0x01 default, 0x03 extended, ...)
    pub session: u8,
    /// P2: how long the tester waits for a response
    pub p2: Duration,
    /// P2*: the extended wait after a ResponsePending
    pub p2_star: Duration,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            session: 0x01,
            p2: Duration::from_millis(50),
            p2_star: Duration::from_millis(5000),
        }
    }
}

struct ServiceEntry {
    /// Minimum request length in wire bytes, service ID included.
    min_len: usize,
    handler: Handler,
}

/// Maps service identifiers to handlers for one emulated ECU.
#[derive(Default)]
pub struct ServiceDispatcher {
    services: HashMap<u8, ServiceEntry>,
}

impl ServiceDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service at construction time. `min_len` counts the whole
    /// request including the SID byte; shorter requests are rejected
    /// with IncorrectMessageLengthOrFormat before `handler` runs.
    pub fn service<F>(mut self, sid: u8, min_len: usize, handler: F) -> Self
    where
        F: Fn(&mut SessionContext, &UdsRequest) -> ServiceResult + Send + Sync + 'static,
    {
        self.services.insert(
            sid,
            ServiceEntry {
                min_len,
                handler: Box::new(handler),
            },
        );
        self
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Produce exactly one response for the request.
    pub fn dispatch(&self, ctx: &mut SessionContext, request: &UdsRequest) -> UdsResponse {
        let Some(entry) = self.services.get(&request.sid) else {
            debug!(sid = format!("0x{:02X}", request.sid), "Unsupported service");
            return UdsResponse::Negative {
                sid: request.sid,
                nrc: NegativeResponseCode::ServiceNotSupported,
            };
        };

        if request.wire_len() < entry.min_len {
            debug!(
                sid = format!("0x{:02X}", request.sid),
                got = request.wire_len(),
                need = entry.min_len,
                "Request below service minimum length"
            );
            return UdsResponse::Negative {
                sid: request.sid,
                nrc: NegativeResponseCode::IncorrectMessageLengthOrFormat,
            };
        }

        match (entry.handler)(ctx, request) {
            Ok(data) => UdsResponse::Positive {
                sid: request.sid,
                data,
            },
            Err(nrc) => UdsResponse::Negative {
                sid: request.sid,
                nrc,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn req(bytes: &[u8]) -> UdsRequest {
        UdsRequest::parse(bytes).unwrap()
    }

    #[test]
    fn unknown_service_is_not_supported() {
        let dispatcher = ServiceDispatcher::new();
        let mut ctx = SessionContext::default();
        let resp = dispatcher.dispatch(&mut ctx, &req(&[0x99]));
        assert_eq!(
            resp,
            UdsResponse::Negative {
                sid: 0x99,
                nrc: NegativeResponseCode::ServiceNotSupported
            }
        );
    }

    #[test]
    fn short_request_never_reaches_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_handler = calls.clone();
        let dispatcher = ServiceDispatcher::new().service(0x10, 2, move |_, _| {
            calls_in_handler.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        });

        let mut ctx = SessionContext::default();
        let resp = dispatcher.dispatch(&mut ctx, &req(&[0x10]));

        assert_eq!(
            resp,
            UdsResponse::Negative {
                sid: 0x10,
                nrc: NegativeResponseCode::IncorrectMessageLengthOrFormat
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_error_becomes_negative_response() {
        let dispatcher = ServiceDispatcher::new()
            .service(0x22, 3, |_, _| Err(NegativeResponseCode::RequestOutOfRange));
        let mut ctx = SessionContext::default();
        let resp = dispatcher.dispatch(&mut ctx, &req(&[0x22, 0x00, 0x01]));
        assert_eq!(
            resp,
            UdsResponse::Negative {
                sid: 0x22,
                nrc: NegativeResponseCode::RequestOutOfRange
            }
        );
    }

    #[test]
    fn context_changes_are_visible_to_later_requests() {
        let dispatcher = ServiceDispatcher::new().service(0x10, 2, |ctx, request| {
            ctx.session = request.data[0];
            Ok(vec![request.data[0]])
        });

        let mut ctx = SessionContext::default();
        dispatcher.dispatch(&mut ctx, &req(&[0x10, 0x03]));
        assert_eq!(ctx.session, 0x03);
    }
}
