//! Standard emulation service table
//!
//! Reply shapes follow what a tester expects from a bench ECU; the 0x27
//! implementation is deliberately permissive (fixed seed, any key of
//! sufficient length accepted) because this is an emulation target, not
//! a security boundary.

use std::sync::Arc;

use tracing::{debug, info};

use crate::dispatcher::{ServiceDispatcher, SessionContext};
use crate::nrc::NegativeResponseCode;
use crate::protocol::{service_id, UdsRequest};
use crate::store::ParameterStore;

/// Fixed security-access seed, kept constant so captures reproduce.
pub const SECURITY_SEED: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

/// P2 / P2* timing bytes advertised in the session-control response:
/// P2 = 50 ms, P2* = 5000 ms.
const P2_BYTES: [u8; 2] = [0x00, 0x32];
const P2_STAR_BYTES: [u8; 2] = [0x01, 0xF4];

fn did_of(request: &UdsRequest) -> u16 {
    u16::from_be_bytes([request.data[0], request.data[1]])
}

/// Build the dispatcher for a standard emulated ECU over `store`.
///
/// The table is fixed at construction; 0x2E is the only service that
/// mutates the store.
pub fn standard_dispatcher(store: Arc<ParameterStore>) -> ServiceDispatcher {
    let rdbi_store = store.clone();
    let wdbi_store = store;

    ServiceDispatcher::new()
        .service(
            service_id::DIAGNOSTIC_SESSION_CONTROL,
            2,
            |ctx: &mut SessionContext, request: &UdsRequest| {
                let session = request.data[0];
                info!(session = format!("0x{:02X}", session), "Session control");
                ctx.session = session;
                Ok(vec![
                    session,
                    P2_BYTES[0],
                    P2_BYTES[1],
                    P2_STAR_BYTES[0],
                    P2_STAR_BYTES[1],
                ])
            },
        )
        .service(service_id::ECU_RESET, 2, |_ctx, request| {
            info!(
                reset_type = format!("0x{:02X}", request.data[0]),
                "ECU reset"
            );
            Ok(vec![request.data[0]])
        })
        .service(service_id::CLEAR_DIAGNOSTIC_INFO, 1, |_ctx, _request| {
            // Nothing stored to clear; the group mask echo says "done".
            Ok(vec![0xFF, 0xFF, 0xFF, 0xFF])
        })
        .service(service_id::READ_DTC_INFO, 1, |_ctx, _request| {
            // Fixed empty report: no DTCs on a bench ECU.
            Ok(vec![0x00])
        })
        .service(service_id::READ_DATA_BY_ID, 3, move |_ctx, request| {
            let did = did_of(request);
            match rdbi_store.get(did) {
                Some(payload) => {
                    debug!(
                        did = format!("0x{:04X}", did),
                        len = payload.len(),
                        "Read parameter"
                    );
                    let mut data = request.data[..2].to_vec();
                    data.extend_from_slice(&payload);
                    Ok(data)
                }
                None => Err(NegativeResponseCode::RequestOutOfRange),
            }
        })
        .service(service_id::SECURITY_ACCESS, 2, |_ctx, request| {
            let sub = request.data[0];
            if sub & 0x01 != 0 {
                // Seed request.
                let mut data = vec![sub];
                data.extend_from_slice(&SECURITY_SEED);
                Ok(data)
            } else {
                // Key submission: require the 4 key bytes, accept any.
                if request.wire_len() < 6 {
                    return Err(NegativeResponseCode::IncorrectMessageLengthOrFormat);
                }
                Ok(vec![sub])
            }
        })
        .service(service_id::WRITE_DATA_BY_ID, 4, move |_ctx, request| {
            let did = did_of(request);
            let payload = request.data[2..].to_vec();
            info!(
                did = format!("0x{:04X}", did),
                len = payload.len(),
                "Write parameter"
            );
            wdbi_store.set(did, payload);
            Ok(request.data[..2].to_vec())
        })
        .service(service_id::ROUTINE_CONTROL, 4, |_ctx, request| {
            info!(
                sub = format!("0x{:02X}", request.data[0]),
                routine = format!("0x{:02X}{:02X}", request.data[1], request.data[2]),
                "Routine control"
            );
            Ok(request.data[..3].to_vec())
        })
        .service(service_id::TESTER_PRESENT, 1, |_ctx, request| {
            let sub = request.data.first().copied().unwrap_or(0x00);
            Ok(vec![sub])
        })
}
