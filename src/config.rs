//! Application-wide constants and compile-time configuration.
//!
//! All protocol UUIDs, timing parameters, capacities and transport
//! defaults live here so they can be tuned in one place.

// GATT / OTA

/// 128-bit UUID of the OTA (bootloader trigger) service.
pub const OTA_SERVICE_UUID: u128 = 0x1d14d6eefd634fa1bfa48f47b42119f0;

/// 128-bit UUID of the OTA control characteristic inside [`OTA_SERVICE_UUID`].
pub const OTA_CONTROL_UUID: u128 = 0xf7bf3564fb6d4e5388a45e37e0326063;

/// Value written to the OTA control characteristic to reboot into the bootloader.
pub const OTA_CONTROL_VALUE: [u8; 1] = [0x00];

// Advertising / selection

/// 16-bit service UUID advertised by the generic OTA/bootloader image.
pub const DEFAULT_MATCH_SERVICE: u16 = 0x1509;

/// Default observation window (seconds).
pub const DEFAULT_DURATION_SECS: f64 = 10.0;

/// Primary advertising channels reported by extended scanning.
pub const ADV_CHANNELS: [u8; 3] = [37, 38, 39];

// Scanner

/// Scanning PHY: 1 = LE 1M.
pub const SCAN_PHY_1M: u8 = 1;

/// Discovery mode: 2 = observation (report every advertiser).
pub const SCAN_DISCOVER_OBSERVATION: u8 = 2;

// Host transport

/// How long the driving loop waits for an event before re-checking deadlines (ms).
pub const IDLE_POLL_MS: u64 = 100;

/// How long a command may wait for its response frame (ms).
pub const COMMAND_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// UART baud rate of the NCP firmware.
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// TCP port of a network-attached NCP (WSTK).
pub const DEFAULT_TCP_PORT: u16 = 4901;
