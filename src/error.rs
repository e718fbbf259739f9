//! Unified error type for advmon.
//!
//! Every variant is a protocol or invariant violation. The session never
//! recovers from one: it logs the error and parks in the `confused` phase.
//! All variants carry only fixed-size data.

use crate::session::Phase;
use thiserror::Error;

/// Top-level error type used across the library.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // RSSI
    /// A sample was recorded in flat mode after per-channel samples (or vice versa).
    #[error("rssi accumulator mode cannot change once samples exist")]
    ModeMismatch,

    /// Per-channel sample for a channel outside 37..=39.
    #[error("advertising channel {0} is not a primary channel")]
    InvalidChannel(u8),

    /// Reset requested before any sample fixed the accumulator mode.
    #[error("rssi accumulator has no mode to reset")]
    NoRssiMode,

    /// Statistics requested over zero samples.
    #[error("no rssi samples recorded")]
    NoSamples,

    // GATT
    /// Characteristic reported while no service is being explored.
    #[error("characteristic discovered with no current service")]
    NoCurrentService,

    /// The current service is not in the discovered service table.
    #[error("service 0x{0:032x} was never discovered")]
    UnknownService(u128),

    /// The peer does not expose the OTA service.
    #[error("ota service not found")]
    OtaServiceMissing,

    /// The OTA service has no control characteristic.
    #[error("ota control characteristic not found")]
    OtaControlMissing,

    /// Characteristic value does not fit in one write command.
    #[error("write value of {0} bytes exceeds 16")]
    WriteTooLong(usize),

    // Session
    /// A connection-phase event arrived before any target was matched.
    #[error("no target has been matched")]
    NoTarget,

    /// An event arrived that is impossible in the current phase.
    #[error("{event} event is not valid in phase {phase}")]
    UnexpectedEvent {
        /// Phase the session was in.
        phase: Phase,
        /// Short name of the offending event.
        event: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            Error::InvalidChannel(12).to_string(),
            "advertising channel 12 is not a primary channel"
        );
        assert_eq!(
            Error::UnexpectedEvent {
                phase: Phase::Connected,
                event: "procedure-completed",
            }
            .to_string(),
            "procedure-completed event is not valid in phase connected"
        );
        assert_eq!(
            Error::UnknownService(0x1509).to_string(),
            "service 0x00000000000000000000000000001509 was never discovered"
        );
        assert_eq!(
            Error::WriteTooLong(20).to_string(),
            "write value of 20 bytes exceeds 16"
        );
    }
}
