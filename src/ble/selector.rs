//! Target selection.
//!
//! A [`Selector`] carries exactly one criterion; the other two are absent by
//! construction.

use alloc::string::String;
use core::fmt;

use super::adv_parser::AdFields;
use super::Address;
use crate::config::DEFAULT_MATCH_SERVICE;

/// The single criterion an advertisement must satisfy to be the target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    /// Exact link-layer address.
    Address(Address),
    /// 16-bit service UUID in the complete or incomplete advertised list.
    Service(u16),
    /// Exact complete local name.
    Name(String),
}

impl Default for Selector {
    fn default() -> Self {
        Selector::Service(DEFAULT_MATCH_SERVICE)
    }
}

impl Selector {
    pub fn matches(&self, address: &Address, fields: &AdFields) -> bool {
        match self {
            Selector::Address(target) => target == address,
            Selector::Service(uuid) => fields.has_service(*uuid),
            Selector::Name(name) => fields.local_name() == Some(name.as_str()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Address(address) => write!(f, "address {}", address),
            Selector::Service(uuid) => write!(f, "service 0x{:04x}", uuid),
            Selector::Name(name) => write!(f, "name \"{}\"", name),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Selector {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Selector::Address(address) => defmt::write!(f, "address {}", address),
            Selector::Service(uuid) => defmt::write!(f, "service 0x{=u16:04x}", uuid),
            Selector::Name(name) => defmt::write!(f, "name \"{=str}\"", name.as_str()),
        }
    }
}
