//! BGAPI wire codec.
//!
//! The network co-processor speaks a binary command/response/event protocol.
//! Every message is a 4-byte header followed by its payload:
//!
//! ```text
//! byte 0: [7] event flag | [6:3] technology (0b0100 = Bluetooth) | [2:0] len[10:8]
//! byte 1: len[7:0]
//! byte 2: class id
//! byte 3: method id
//! ```
//!
//! Multi-byte integers are little-endian; byte arrays are prefixed by a
//! one-byte length. Addresses travel in over-the-air order, which is the
//! order [`Address`] stores them in.
//!
//! This module is pure: it turns [`Command`]s into bytes and bytes into
//! [`Event`]s. Moving the bytes is the transport's job.

use alloc::vec::Vec;
use thiserror::Error;

use super::gatt::uuid_from_le;
use super::{Address, AddressType, Advertisement, BootInfo, Command, Event, IgnoredEvent};

/// Header length in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest encoded command this crate ever builds.
pub const MAX_COMMAND_LEN: usize = 64;

const TYPE_MASK: u8 = 0xF8;
const TYPE_COMMAND: u8 = 0x20;
const TYPE_EVENT: u8 = 0xA0;

// Class ids
const CLASS_SYSTEM: u8 = 0x01;
const CLASS_SCANNER: u8 = 0x05;
const CLASS_CONNECTION: u8 = 0x06;
const CLASS_GATT: u8 = 0x09;

// Commands
const SYSTEM_RESET: u8 = 0x01;
const SCANNER_START: u8 = 0x03;
const SCANNER_STOP: u8 = 0x05;
const CONNECTION_OPEN: u8 = 0x04;
const GATT_DISCOVER_PRIMARY_SERVICES: u8 = 0x01;
const GATT_DISCOVER_CHARACTERISTICS: u8 = 0x03;
const GATT_WRITE_CHARACTERISTIC_VALUE: u8 = 0x09;

// Events
const EVT_SYSTEM_BOOT: u8 = 0x00;
const EVT_SCANNER_LEGACY_REPORT: u8 = 0x00;
const EVT_SCANNER_EXTENDED_REPORT: u8 = 0x02;
const EVT_CONNECTION_OPENED: u8 = 0x00;
const EVT_CONNECTION_CLOSED: u8 = 0x01;
const EVT_CONNECTION_PARAMETERS: u8 = 0x02;
const EVT_CONNECTION_PHY_STATUS: u8 = 0x04;
const EVT_CONNECTION_REMOTE_FEATURES: u8 = 0x05;
const EVT_GATT_MTU_EXCHANGED: u8 = 0x00;
const EVT_GATT_SERVICE: u8 = 0x01;
const EVT_GATT_CHARACTERISTIC: u8 = 0x02;
const EVT_GATT_PROCEDURE_COMPLETED: u8 = 0x06;

/// Codec failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    #[error("encoded command exceeds 64 bytes")]
    CommandTooLong,

    #[error("truncated payload for class 0x{class:02x} method 0x{method:02x}")]
    Truncated { class: u8, method: u8 },
}

// ═══════════════════════════════════════════════════════════════════════════
// Encoding
// ═══════════════════════════════════════════════════════════════════════════

type CommandBuf = heapless::Vec<u8, MAX_COMMAND_LEN>;

fn put(buf: &mut CommandBuf, bytes: &[u8]) -> Result<(), CodecError> {
    buf.extend_from_slice(bytes)
        .map_err(|_| CodecError::CommandTooLong)
}

/// Class and method id of `command`.
pub fn command_id(command: &Command) -> (u8, u8) {
    match command {
        Command::Reset => (CLASS_SYSTEM, SYSTEM_RESET),
        Command::StartScan(_) => (CLASS_SCANNER, SCANNER_START),
        Command::StopScan => (CLASS_SCANNER, SCANNER_STOP),
        Command::OpenConnection { .. } => (CLASS_CONNECTION, CONNECTION_OPEN),
        Command::DiscoverPrimaryServices { .. } => (CLASS_GATT, GATT_DISCOVER_PRIMARY_SERVICES),
        Command::DiscoverCharacteristics { .. } => (CLASS_GATT, GATT_DISCOVER_CHARACTERISTICS),
        Command::WriteCharacteristic { .. } => (CLASS_GATT, GATT_WRITE_CHARACTERISTIC_VALUE),
    }
}

/// The response `command` waits for, or `None` when the controller reboots
/// instead of answering.
pub fn response_id(command: &Command) -> Option<(u8, u8)> {
    match command {
        Command::Reset => None,
        other => Some(command_id(other)),
    }
}

/// Serialize a command frame.
pub fn encode_command(command: &Command) -> Result<CommandBuf, CodecError> {
    let mut payload = CommandBuf::new();
    match command {
        // dfu = 0: boot the application, not the bootloader.
        Command::Reset => put(&mut payload, &[0])?,
        Command::StartScan(mode) => put(&mut payload, &[mode.phy, mode.discover])?,
        Command::StopScan => {}
        Command::OpenConnection {
            address,
            address_type,
            phy,
        } => {
            put(&mut payload, &address.bytes())?;
            put(&mut payload, &[address_type.raw(), *phy])?;
        }
        Command::DiscoverPrimaryServices { connection } => put(&mut payload, &[*connection])?,
        Command::DiscoverCharacteristics {
            connection,
            service,
        } => {
            put(&mut payload, &[*connection])?;
            put(&mut payload, &service.to_le_bytes())?;
        }
        Command::WriteCharacteristic {
            connection,
            characteristic,
            value,
        } => {
            put(&mut payload, &[*connection])?;
            put(&mut payload, &characteristic.to_le_bytes())?;
            // MAX_WRITE_LEN is far below 256.
            put(&mut payload, &[value.len() as u8])?;
            put(&mut payload, value)?;
        }
    }

    let (class, method) = command_id(command);
    let len = payload.len();
    let mut frame = CommandBuf::new();
    put(
        &mut frame,
        &[TYPE_COMMAND | ((len >> 8) as u8 & 0x07), len as u8, class, method],
    )?;
    put(&mut frame, &payload)?;
    Ok(frame)
}

// ═══════════════════════════════════════════════════════════════════════════
// Framing
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    Response,
    Event,
}

/// One complete message off the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub class: u8,
    pub method: u8,
    pub payload: Vec<u8>,
}

/// Reassembles frames from an arbitrarily chunked byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one has fully arrived.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let header = self.buf.get(..HEADER_LEN)?;
            let kind = match header[0] & TYPE_MASK {
                TYPE_COMMAND => FrameKind::Response,
                TYPE_EVENT => FrameKind::Event,
                other => {
                    warn!("bgapi: bad frame type 0x{:02x}, resyncing", other);
                    self.buf.remove(0);
                    continue;
                }
            };
            let len = usize::from(header[0] & 0x07) << 8 | usize::from(header[1]);
            let (class, method) = (header[2], header[3]);
            let end = HEADER_LEN + len;
            if self.buf.len() < end {
                return None;
            }
            let payload = self.buf[HEADER_LEN..end].to_vec();
            self.buf.drain(..end);
            return Some(Frame {
                kind,
                class,
                method,
                payload,
            });
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Decoding
// ═══════════════════════════════════════════════════════════════════════════

/// A decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    /// Reply to a command; `result` 0 means success.
    Response { class: u8, method: u8, result: u16 },
    Event(Event),
}

struct Reader<'a> {
    bytes: &'a [u8],
    class: u8,
    method: u8,
}

impl<'a> Reader<'a> {
    fn new(frame: &'a Frame) -> Self {
        Self {
            bytes: &frame.payload,
            class: frame.class,
            method: frame.method,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.bytes.len() < n {
            return Err(CodecError::Truncated {
                class: self.class,
                method: self.method,
            });
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.u8()? as i8)
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn address(&mut self) -> Result<Address, CodecError> {
        let b = self.take(6)?;
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(b);
        Ok(Address(bytes))
    }

    /// `uint8array`: one length byte, then that many bytes.
    fn array(&mut self) -> Result<&'a [u8], CodecError> {
        let len = usize::from(self.u8()?);
        self.take(len)
    }
}

impl Packet {
    pub fn parse(frame: &Frame) -> Result<Packet, CodecError> {
        let mut r = Reader::new(frame);
        match frame.kind {
            FrameKind::Response => Ok(Packet::Response {
                class: frame.class,
                method: frame.method,
                result: r.u16()?,
            }),
            FrameKind::Event => parse_event(frame.class, frame.method, &mut r).map(Packet::Event),
        }
    }
}

/// Fields shared by legacy and extended scan reports, up to and including
/// the target address type.
fn scan_report_prefix(r: &mut Reader<'_>) -> Result<(Address, AddressType, i8, u8), CodecError> {
    r.skip(1)?; // event_flags
    let address = r.address()?;
    let address_type = AddressType::from_raw(r.u8()?);
    r.skip(1)?; // bonding
    let rssi = r.i8()?;
    let channel = r.u8()?;
    r.skip(7)?; // target address + type
    Ok((address, address_type, rssi, channel))
}

fn parse_event(class: u8, method: u8, r: &mut Reader<'_>) -> Result<Event, CodecError> {
    let event = match (class, method) {
        (CLASS_SYSTEM, EVT_SYSTEM_BOOT) => Event::Boot(BootInfo {
            major: r.u16()?,
            minor: r.u16()?,
            patch: r.u16()?,
            build: r.u16()?,
        }),
        (CLASS_SCANNER, EVT_SCANNER_LEGACY_REPORT) => {
            let (address, address_type, rssi, _) = scan_report_prefix(r)?;
            let data = r.array()?;
            Event::Advertisement(Advertisement::legacy(address, address_type, rssi, data))
        }
        (CLASS_SCANNER, EVT_SCANNER_EXTENDED_REPORT) => {
            let (address, address_type, rssi, channel) = scan_report_prefix(r)?;
            // sid, phys, tx power, periodic interval, completeness, counter
            r.skip(8)?;
            let data = r.array()?;
            Event::Advertisement(Advertisement::extended(
                address,
                address_type,
                rssi,
                channel,
                data,
            ))
        }
        (CLASS_CONNECTION, EVT_CONNECTION_OPENED) => {
            let address = r.address()?;
            let address_type = AddressType::from_raw(r.u8()?);
            r.skip(1)?; // master
            Event::ConnectionOpened {
                connection: r.u8()?,
                address,
                address_type,
            }
        }
        (CLASS_CONNECTION, EVT_CONNECTION_CLOSED) => {
            let reason = r.u16()?;
            Event::ConnectionClosed {
                connection: r.u8()?,
                reason,
            }
        }
        (CLASS_CONNECTION, EVT_CONNECTION_PARAMETERS) => {
            Event::Ignored(IgnoredEvent::ConnectionParameters)
        }
        (CLASS_CONNECTION, EVT_CONNECTION_PHY_STATUS) => Event::Ignored(IgnoredEvent::PhyStatus),
        (CLASS_CONNECTION, EVT_CONNECTION_REMOTE_FEATURES) => {
            Event::Ignored(IgnoredEvent::RemoteUsedFeatures)
        }
        (CLASS_GATT, EVT_GATT_MTU_EXCHANGED) => Event::MtuExchanged {
            connection: r.u8()?,
            mtu: r.u16()?,
        },
        (CLASS_GATT, EVT_GATT_SERVICE) => Event::Service {
            connection: r.u8()?,
            handle: r.u32()?,
            uuid: uuid_from_le(r.array()?),
        },
        (CLASS_GATT, EVT_GATT_CHARACTERISTIC) => {
            let connection = r.u8()?;
            let handle = r.u16()?;
            r.skip(1)?; // properties
            Event::Characteristic {
                connection,
                handle,
                uuid: uuid_from_le(r.array()?),
            }
        }
        (CLASS_GATT, EVT_GATT_PROCEDURE_COMPLETED) => Event::ProcedureCompleted {
            connection: r.u8()?,
            result: r.u16()?,
        },
        _ => Event::Unknown { class, method },
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{ScanMode, MAX_WRITE_LEN};
    use crate::config::OTA_SERVICE_UUID;

    fn event_frame(class: u8, method: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![TYPE_EVENT, payload.len() as u8, class, method];
        bytes.extend_from_slice(payload);
        bytes
    }

    fn decode_one(bytes: &[u8]) -> Result<Packet, CodecError> {
        let mut decoder = FrameDecoder::new();
        decoder.push(bytes);
        let frame = decoder.next_frame().expect("complete frame");
        assert_eq!(decoder.pending(), 0);
        Packet::parse(&frame)
    }

    // ───────────────────────────────────────────────────────────────────
    // Encoding
    // ───────────────────────────────────────────────────────────────────

    #[test]
    fn encode_reset_and_scan() {
        assert_eq!(
            encode_command(&Command::Reset).unwrap().as_slice(),
            [0x20, 0x01, 0x01, 0x01, 0x00]
        );
        assert_eq!(
            encode_command(&Command::StartScan(ScanMode::default()))
                .unwrap()
                .as_slice(),
            [0x20, 0x02, 0x05, 0x03, 0x01, 0x02]
        );
        assert_eq!(
            encode_command(&Command::StopScan).unwrap().as_slice(),
            [0x20, 0x00, 0x05, 0x05]
        );
    }

    #[test]
    fn encode_open_connection_keeps_air_order() {
        let address: Address = "84:2e:14:31:a9:c0".parse().unwrap();
        let cmd = Command::OpenConnection {
            address,
            address_type: AddressType::Random,
            phy: 1,
        };
        assert_eq!(
            encode_command(&cmd).unwrap().as_slice(),
            [0x20, 0x08, 0x06, 0x04, 0xc0, 0xa9, 0x31, 0x14, 0x2e, 0x84, 0x01, 0x01]
        );
    }

    #[test]
    fn encode_gatt_commands() {
        let discover = Command::DiscoverCharacteristics {
            connection: 1,
            service: 0x0002_0010,
        };
        assert_eq!(
            encode_command(&discover).unwrap().as_slice(),
            [0x20, 0x05, 0x09, 0x03, 0x01, 0x10, 0x00, 0x02, 0x00]
        );

        let mut value: heapless::Vec<u8, MAX_WRITE_LEN> = heapless::Vec::new();
        value.push(0).unwrap();
        let write = Command::WriteCharacteristic {
            connection: 1,
            characteristic: 0x0022,
            value,
        };
        assert_eq!(
            encode_command(&write).unwrap().as_slice(),
            [0x20, 0x05, 0x09, 0x09, 0x01, 0x22, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn reset_expects_no_response() {
        assert_eq!(response_id(&Command::Reset), None);
        assert_eq!(response_id(&Command::StopScan), Some((0x05, 0x05)));
    }

    // ───────────────────────────────────────────────────────────────────
    // Framing
    // ───────────────────────────────────────────────────────────────────

    #[test]
    fn decoder_reassembles_split_frames() {
        let bytes = event_frame(0x09, 0x06, &[0x01, 0x00, 0x00]);
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..2]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&bytes[2..5]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&bytes[5..]);
        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame.kind, FrameKind::Event);
        assert_eq!(frame.payload, [0x01, 0x00, 0x00]);
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn decoder_skips_garbage() {
        let mut bytes = vec![0x00, 0xFF];
        bytes.extend(event_frame(0x01, 0x00, &[0; 8]));
        bytes.extend([0x20, 0x02, 0x05, 0x05, 0x00, 0x00]);

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.next_frame().unwrap().kind, FrameKind::Event);
        let response = decoder.next_frame().unwrap();
        assert_eq!(
            Packet::parse(&response),
            Ok(Packet::Response {
                class: 0x05,
                method: 0x05,
                result: 0,
            })
        );
    }

    #[test]
    fn long_length_uses_high_bits() {
        let mut bytes = vec![TYPE_EVENT | 0x01, 0x02, 0x7F, 0x7F];
        bytes.extend(core::iter::repeat(0xAB).take(0x102));
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..bytes.len() - 1]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&bytes[bytes.len() - 1..]);
        assert_eq!(decoder.next_frame().unwrap().payload.len(), 0x102);
    }

    // ───────────────────────────────────────────────────────────────────
    // Events
    // ───────────────────────────────────────────────────────────────────

    #[test]
    fn parse_boot() {
        let payload = [3, 0, 2, 0, 4, 0, 183, 0, 0, 0, 0, 0];
        assert_eq!(
            decode_one(&event_frame(0x01, 0x00, &payload)),
            Ok(Packet::Event(Event::Boot(BootInfo {
                major: 3,
                minor: 2,
                patch: 4,
                build: 183,
            })))
        );
    }

    #[test]
    fn parse_legacy_report() {
        let mut payload = vec![0x03];
        payload.extend([0xc0, 0xa9, 0x31, 0x14, 0x2e, 0x84]);
        payload.extend([0x00, 0xFF, (-57i8) as u8, 38]);
        payload.extend([0; 7]);
        payload.extend([3, 0x02, 0x01, 0x06]);

        let Ok(Packet::Event(Event::Advertisement(adv))) =
            decode_one(&event_frame(0x05, 0x00, &payload))
        else {
            panic!("expected advertisement");
        };
        assert_eq!(adv.address.to_string(), "84:2e:14:31:a9:c0");
        assert_eq!(adv.address_type, AddressType::Public);
        assert_eq!(adv.rssi, -57);
        assert_eq!(adv.channel, None);
        assert_eq!(adv.data, [0x02, 0x01, 0x06]);
    }

    #[test]
    fn parse_extended_report_carries_channel() {
        let mut payload = vec![0x00];
        payload.extend([1, 2, 3, 4, 5, 6]);
        payload.extend([0x01, 0xFF, (-70i8) as u8, 39]);
        payload.extend([0; 7]);
        payload.extend([0xFF, 1, 0, 127, 0, 0, 0, 0]);
        payload.extend([0]);

        let Ok(Packet::Event(Event::Advertisement(adv))) =
            decode_one(&event_frame(0x05, 0x02, &payload))
        else {
            panic!("expected advertisement");
        };
        assert_eq!(adv.address_type, AddressType::Random);
        assert_eq!(adv.rssi, -70);
        assert_eq!(adv.channel, Some(39));
        assert!(adv.data.is_empty());
    }

    #[test]
    fn parse_gatt_service_uuid() {
        let mut payload = vec![0x01, 0x10, 0x00, 0x02, 0x00, 16];
        payload.extend(OTA_SERVICE_UUID.to_le_bytes());
        assert_eq!(
            decode_one(&event_frame(0x09, 0x01, &payload)),
            Ok(Packet::Event(Event::Service {
                connection: 1,
                handle: 0x0002_0010,
                uuid: OTA_SERVICE_UUID,
            }))
        );
    }

    #[test]
    fn parse_connection_events() {
        let closed = decode_one(&event_frame(0x06, 0x01, &[0x13, 0x02, 0x01]));
        assert_eq!(
            closed,
            Ok(Packet::Event(Event::ConnectionClosed {
                connection: 1,
                reason: 0x0213,
            }))
        );
        let phy = decode_one(&event_frame(0x06, 0x04, &[0x01, 0x01]));
        assert_eq!(phy, Ok(Packet::Event(Event::Ignored(IgnoredEvent::PhyStatus))));
    }

    #[test]
    fn unknown_event_is_reported_not_rejected() {
        assert_eq!(
            decode_one(&event_frame(0x0B, 0x01, &[1, 2, 3])),
            Ok(Packet::Event(Event::Unknown {
                class: 0x0B,
                method: 0x01,
            }))
        );
    }

    #[test]
    fn truncated_payload_is_an_error() {
        assert_eq!(
            decode_one(&event_frame(0x09, 0x06, &[0x01, 0x00])),
            Err(CodecError::Truncated {
                class: 0x09,
                method: 0x06,
            })
        );
        // Array length byte pointing past the end.
        assert_eq!(
            decode_one(&event_frame(0x09, 0x01, &[0x01, 0, 0, 0, 0, 16, 0xAA])),
            Err(CodecError::Truncated {
                class: 0x09,
                method: 0x01,
            })
        );
    }
}
