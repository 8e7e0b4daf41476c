//! Virtual ECU emulation for candiag.
//!
//! An [`EcuSession`] glues together the pieces the other crates
//! provide: a routed endpoint feeding an ISO-TP channel, a service
//! dispatcher, and a parameter store. Several sessions run side by
//! side on one bus, each behind its own CAN identifier.

mod config;
mod session;

pub use config::{parse_can_id, ConfigError, EcuDef, EmulatorConfig, TransportSection};
pub use session::EcuSession;
