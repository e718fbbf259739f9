//! List-mode device directory.
//!
//! Remembers the first advertisement seen from every address during an
//! observation window. Later sightings of a known address are ignored.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use super::adv_parser::AdFields;
use super::Address;

/// One line of the directory report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryLine {
    pub address: Address,
    pub name: Option<String>,
}

impl fmt::Display for DirectoryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if let Some(name) = &self.name {
            write!(f, " Complete Local Name: {}", name)?;
        }
        Ok(())
    }
}

/// Insertion-ordered set of distinct advertisers. Unbounded.
pub struct Directory {
    /// First-seen order.
    devices: Vec<(Address, AdFields)>,
    seen: BTreeSet<Address>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            seen: BTreeSet::new(),
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.seen.contains(address)
    }

    /// Record `fields` for `address` unless it was already seen.
    ///
    /// Returns `true` when a new entry was inserted.
    pub fn observe(&mut self, address: Address, fields: AdFields) -> bool {
        if !self.seen.insert(address) {
            return false;
        }
        self.devices.push((address, fields));
        true
    }

    pub fn get(&self, address: &Address) -> Option<&AdFields> {
        self.devices
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, fields)| fields)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Listing in first-seen order.
    pub fn report(&self) -> Vec<DirectoryLine> {
        self.devices
            .iter()
            .map(|(address, fields)| DirectoryLine {
                address: *address,
                name: fields.local_name.clone(),
            })
            .collect()
    }
}
