//! Integration tests for the candiag toolkit
//!
//! This crate contains end-to-end tests that exercise the full stack
//! in-process over the virtual CAN bus:
//! - CAN ID routing and single-frame ISO-TP channels
//! - The UDS service dispatcher behind emulated ECUs
//! - Scanner discovery and DID dumps
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p candiag-tests
//! ```
//!
//! No real CAN interface is needed; everything runs over
//! `candiag_can::VirtualBus`.

// This crate only contains tests, no library code
