//! CAN/UDS scanning: ECU discovery and exhaustive DID dumps.

pub mod discovery;
pub mod dump;
pub mod error;
pub mod report;

pub use discovery::{discover_ids, DiscoveryConfig, IdPair, PROBE_FRAME};
pub use dump::{dump_dids, prepare_dump_session, DumpConfig, DumpResult};
pub use error::ScanError;
