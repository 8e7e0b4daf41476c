//! UDS (Unified Diagnostic Services) protocol layer for candiag.
//!
//! Server side: a [`ServiceDispatcher`] maps service identifiers to
//! handlers built once at construction, validates request lengths and
//! turns handler results into positive or negative responses; the
//! standard emulation service table lives in [`standard_dispatcher`].
//! Client side: [`UdsClient`] issues requests over any
//! [`candiag_can::IsoTpChannel`] and classifies negative responses and
//! timeouts. The [`ParameterStore`] holds the DID-keyed byte payloads
//! both sides trade in.

mod client;
mod dispatcher;
mod error;
mod nrc;
mod protocol;
mod services;
mod store;

pub use client::UdsClient;
pub use dispatcher::{ServiceDispatcher, ServiceResult, SessionContext};
pub use error::UdsError;
pub use nrc::NegativeResponseCode;
pub use protocol::{negative_response, positive_response, service_id, UdsRequest, UdsResponse};
pub use services::{standard_dispatcher, SECURITY_SEED};
pub use store::{ParameterStore, StoreError};
