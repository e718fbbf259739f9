//! GATT discovery tracker.
//!
//! After the connection is up, the session walks the peer's attribute
//! table in three steps:
//! 1. Discover all primary services (each reported with handle + UUID).
//! 2. Narrow to the OTA service and discover its characteristics.
//! 3. Look up the OTA control characteristic so it can be written.
//!
//! This module only records what discovery reports and answers lookups;
//! the session decides when each step runs.

use alloc::collections::BTreeMap;

use crate::config::{OTA_CONTROL_UUID, OTA_SERVICE_UUID};
use crate::Error;

/// A discovered characteristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Characteristic {
    pub handle: u16,
}

/// A discovered primary service and the characteristics found under it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Service {
    pub handle: u32,
    pub characteristics: BTreeMap<u128, Characteristic>,
}

/// Service/characteristic tree of the connected target, keyed by UUID.
#[derive(Clone, Debug, Default)]
pub struct GattTree {
    services: BTreeMap<u128, Service>,
    current: Option<u128>,
}

/// Interpret a little-endian UUID of 2, 4 or 16 bytes as an integer.
///
/// Bytes past the sixteenth are ignored.
pub fn uuid_from_le(bytes: &[u8]) -> u128 {
    bytes
        .iter()
        .take(16)
        .rev()
        .fold(0u128, |acc, &b| (acc << 8) | u128::from(b))
}

impl GattTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a service; a repeated UUID replaces the earlier entry.
    pub fn add_service(&mut self, handle: u32, uuid: u128) {
        self.services.insert(
            uuid,
            Service {
                handle,
                characteristics: BTreeMap::new(),
            },
        );
    }

    /// Record a characteristic under the current service.
    pub fn add_characteristic(&mut self, handle: u16, uuid: u128) -> Result<(), Error> {
        let current = self.current.ok_or(Error::NoCurrentService)?;
        let service = self
            .services
            .get_mut(&current)
            .ok_or(Error::UnknownService(current))?;
        service
            .characteristics
            .insert(uuid, Characteristic { handle });
        Ok(())
    }

    /// Make the OTA service current and return its handle.
    pub fn select_ota_service(&mut self) -> Result<u32, Error> {
        self.current = Some(OTA_SERVICE_UUID);
        self.services
            .get(&OTA_SERVICE_UUID)
            .map(|service| service.handle)
            .ok_or(Error::OtaServiceMissing)
    }

    /// Handle of the OTA control characteristic within the current service.
    pub fn ota_control_handle(&self) -> Result<u16, Error> {
        let current = self.current.ok_or(Error::NoCurrentService)?;
        let service = self
            .services
            .get(&current)
            .ok_or(Error::UnknownService(current))?;
        service
            .characteristics
            .get(&OTA_CONTROL_UUID)
            .map(|c| c.handle)
            .ok_or(Error::OtaControlMissing)
    }

    pub fn current_service(&self) -> Option<u128> {
        self.current
    }

    pub fn service(&self, uuid: u128) -> Option<&Service> {
        self.services.get(&uuid)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENERIC_ACCESS: u128 = 0x1800;
    const DEVICE_NAME: u128 = 0x2A00;

    #[test]
    fn uuid_bytes_are_little_endian() {
        assert_eq!(uuid_from_le(&[0x00, 0x18]), 0x1800);
        assert_eq!(uuid_from_le(&[]), 0);
        let ota = OTA_SERVICE_UUID.to_le_bytes();
        assert_eq!(uuid_from_le(&ota), OTA_SERVICE_UUID);
    }

    #[test]
    fn full_ota_lookup() {
        let mut tree = GattTree::new();
        tree.add_service(1, GENERIC_ACCESS);
        tree.add_service(0x2A, OTA_SERVICE_UUID);
        assert_eq!(tree.select_ota_service(), Ok(0x2A));
        assert_eq!(tree.current_service(), Some(OTA_SERVICE_UUID));

        tree.add_characteristic(0x2C, OTA_CONTROL_UUID).unwrap();
        assert_eq!(tree.ota_control_handle(), Ok(0x2C));
    }

    #[test]
    fn characteristic_without_current_service_is_rejected() {
        let mut tree = GattTree::new();
        tree.add_service(1, GENERIC_ACCESS);
        assert_eq!(
            tree.add_characteristic(3, DEVICE_NAME),
            Err(Error::NoCurrentService)
        );
    }

    #[test]
    fn missing_ota_service_is_reported() {
        let mut tree = GattTree::new();
        tree.add_service(1, GENERIC_ACCESS);
        assert_eq!(tree.select_ota_service(), Err(Error::OtaServiceMissing));
        // The OTA UUID is still marked current, but it has no entry.
        assert_eq!(
            tree.add_characteristic(3, OTA_CONTROL_UUID),
            Err(Error::UnknownService(OTA_SERVICE_UUID))
        );
    }

    #[test]
    fn missing_control_characteristic_is_reported() {
        let mut tree = GattTree::new();
        tree.add_service(0x2A, OTA_SERVICE_UUID);
        tree.select_ota_service().unwrap();
        tree.add_characteristic(0x2E, DEVICE_NAME).unwrap();
        assert_eq!(tree.ota_control_handle(), Err(Error::OtaControlMissing));
    }

    #[test]
    fn rediscovered_service_replaces_entry() {
        let mut tree = GattTree::new();
        tree.add_service(0x2A, OTA_SERVICE_UUID);
        tree.select_ota_service().unwrap();
        tree.add_characteristic(0x2C, OTA_CONTROL_UUID).unwrap();

        tree.add_service(0x40, OTA_SERVICE_UUID);
        let service = tree.service(OTA_SERVICE_UUID).unwrap();
        assert_eq!(service.handle, 0x40);
        assert!(service.characteristics.is_empty());
        assert_eq!(tree.service_count(), 1);
    }
}
