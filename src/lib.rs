//! advmon: BLE advertising monitor and OTA trigger.
//!
//! The library holds everything that does not touch an operating system:
//! advertising-data decoding, target selection, RSSI statistics, GATT
//! discovery bookkeeping, the BGAPI wire codec and the session state machine
//! that ties them together. It is `no_std` + `alloc` outside of tests.
//!
//! The `advmon` binary (feature `host`) adds the command line, the serial /
//! TCP transport and the signal handling.
//!
//! Usage: `cargo test --lib` for the unit tests, `cargo test` for everything.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// Must come first: the logging macros are textually scoped.
#[macro_use]
mod fmt;

pub mod ble;
pub mod config;
pub mod error;
pub mod rssi;
pub mod session;

pub use ble::selector::Selector;
pub use ble::{Address, AddressType, Advertisement, Command, Event};
pub use error::Error;
pub use rssi::{RssiAccumulator, RssiSamples, RssiStats};
pub use session::{
    run, Clock, Controller, Exit, Mode, Phase, Report, Session, SessionConfig, Transport,
};

// ═══════════════════════════════════════════════════════════════════════════
// Cross-module tests
// ═══════════════════════════════════════════════════════════════════════════
