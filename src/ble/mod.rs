//! Bluetooth Low Energy subsystem.
//!
//! This module drives a radio controller in **Central/Observer** role over
//! a command/event transport:
//!
//! 1. **Advertising parser** - decodes AD structures from scan reports.
//! 2. **Selector** - decides whether an advertiser is the target.
//! 3. **Directory** - remembers every advertiser seen in list mode.
//! 4. **GATT tracker** - records the service/characteristic tree built up
//!    by discovery events on a connected target.
//! 5. **BGAPI codec** - frames [`Command`]s and decodes [`Event`]s for the
//!    controller's wire protocol.
//!
//! The types below are the vocabulary shared by all of them and by the
//! session state machine.

pub mod adv_parser;
pub mod bgapi;
pub mod directory;
pub mod gatt;
pub mod selector;

use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;
use thiserror::Error;

use crate::config::{SCAN_DISCOVER_OBSERVATION, SCAN_PHY_1M};

/// 48-bit link-layer address, stored in over-the-air (little-endian) order.
///
/// `Display` and `FromStr` use the conventional most-significant-byte-first
/// `aa:bb:cc:dd:ee:ff` notation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 6]);

impl Address {
    /// Build from the textual byte order (`bytes[0]` is printed first).
    pub fn from_msb(bytes: [u8; 6]) -> Self {
        let mut le = bytes;
        le.reverse();
        Address(le)
    }

    /// Raw bytes in over-the-air order.
    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Address {
    fn format(&self, f: defmt::Formatter) {
        let b = &self.0;
        defmt::write!(
            f,
            "{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}",
            b[5],
            b[4],
            b[3],
            b[2],
            b[1],
            b[0]
        )
    }
}

/// Error returned when a textual address is not six `:`-separated hex octets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid bluetooth address (expected aa:bb:cc:dd:ee:ff)")]
pub struct ParseAddressError;

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(ParseAddressError)?;
            if part.len() != 2 {
                return Err(ParseAddressError);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseAddressError)?;
        }
        if parts.next().is_some() {
            return Err(ParseAddressError);
        }
        Ok(Address::from_msb(bytes))
    }
}

/// Address type as reported by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressType {
    Public,
    Random,
    /// Anonymous or any code this crate does not name.
    Other(u8),
}

impl AddressType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => AddressType::Public,
            1 => AddressType::Random,
            other => AddressType::Other(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            AddressType::Public => 0,
            AddressType::Random => 1,
            AddressType::Other(raw) => raw,
        }
    }
}

/// A single advertising (or scan response) report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advertisement {
    pub address: Address,
    pub address_type: AddressType,
    /// Received signal strength (dBm).
    pub rssi: i8,
    /// Primary channel (37/38/39); only extended scan reports carry it.
    pub channel: Option<u8>,
    /// Raw AD structures.
    pub data: Vec<u8>,
}

impl Advertisement {
    /// A legacy report: no channel information.
    pub fn legacy(address: Address, address_type: AddressType, rssi: i8, data: &[u8]) -> Self {
        Self {
            address,
            address_type,
            rssi,
            channel: None,
            data: data.to_vec(),
        }
    }

    /// An extended scan report received on `channel`.
    pub fn extended(
        address: Address,
        address_type: AddressType,
        rssi: i8,
        channel: u8,
        data: &[u8],
    ) -> Self {
        Self {
            address,
            address_type,
            rssi,
            channel: Some(channel),
            data: data.to_vec(),
        }
    }
}

/// Scanner parameters passed with [`Command::StartScan`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanMode {
    pub phy: u8,
    pub discover: u8,
}

impl Default for ScanMode {
    fn default() -> Self {
        Self {
            phy: SCAN_PHY_1M,
            discover: SCAN_DISCOVER_OBSERVATION,
        }
    }
}

/// Maximum characteristic value carried by a single write command.
pub const MAX_WRITE_LEN: usize = 16;

/// Commands the session sends to the radio controller.
///
/// All of them are fire-and-continue: results arrive later as [`Event`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Reboot the controller; a [`Event::Boot`] follows.
    Reset,
    StartScan(ScanMode),
    StopScan,
    OpenConnection {
        address: Address,
        address_type: AddressType,
        phy: u8,
    },
    DiscoverPrimaryServices {
        connection: u8,
    },
    DiscoverCharacteristics {
        connection: u8,
        service: u32,
    },
    WriteCharacteristic {
        connection: u8,
        characteristic: u16,
        value: heapless::Vec<u8, MAX_WRITE_LEN>,
    },
}

/// Controller firmware version carried by the boot event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootInfo {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub build: u16,
}

/// Recognized events that carry nothing the session acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IgnoredEvent {
    ConnectionParameters,
    PhyStatus,
    RemoteUsedFeatures,
}

/// Events the controller delivers to the session, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Boot(BootInfo),
    Advertisement(Advertisement),
    ConnectionOpened {
        connection: u8,
        address: Address,
        address_type: AddressType,
    },
    MtuExchanged {
        connection: u8,
        mtu: u16,
    },
    Service {
        connection: u8,
        handle: u32,
        uuid: u128,
    },
    Characteristic {
        connection: u8,
        handle: u16,
        uuid: u128,
    },
    ProcedureCompleted {
        connection: u8,
        result: u16,
    },
    ConnectionClosed {
        connection: u8,
        reason: u16,
    },
    Ignored(IgnoredEvent),
    Unknown {
        class: u8,
        method: u8,
    },
}

impl Event {
    /// Short kebab-case name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Boot(_) => "system-boot",
            Event::Advertisement(adv) if adv.channel.is_some() => "extended-scan-report",
            Event::Advertisement(_) => "legacy-advertisement-report",
            Event::ConnectionOpened { .. } => "connection-opened",
            Event::MtuExchanged { .. } => "mtu-exchanged",
            Event::Service { .. } => "service-found",
            Event::Characteristic { .. } => "characteristic-found",
            Event::ProcedureCompleted { .. } => "procedure-completed",
            Event::ConnectionClosed { .. } => "connection-closed",
            Event::Ignored(IgnoredEvent::ConnectionParameters) => "connection-parameters",
            Event::Ignored(IgnoredEvent::PhyStatus) => "connection-phy-status",
            Event::Ignored(IgnoredEvent::RemoteUsedFeatures) => "connection-remote-used-features",
            Event::Unknown { .. } => "unknown",
        }
    }
}
