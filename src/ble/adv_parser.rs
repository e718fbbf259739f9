//! Advertising-data decoder.
//!
//! Advertising payloads are a run of AD structures, each
//! `[length, type, payload(length - 1)]`. Only the fields this tool
//! selects on are kept; every other AD type is skipped.

use alloc::collections::BTreeSet;
use alloc::string::String;

/// AD type: Flags.
pub const AD_TYPE_FLAGS: u8 = 0x01;
/// AD type: Incomplete List of 16-bit Service UUIDs.
pub const AD_TYPE_INCOMPLETE_16: u8 = 0x02;
/// AD type: Complete List of 16-bit Service UUIDs.
pub const AD_TYPE_COMPLETE_16: u8 = 0x03;
/// AD type: Complete Local Name.
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// Fields decoded from one advertising payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdFields {
    pub flags: Option<u8>,
    pub services_complete: Option<BTreeSet<u16>>,
    pub services_incomplete: Option<BTreeSet<u16>>,
    pub local_name: Option<String>,
}

impl AdFields {
    /// True when `uuid` appears in either the complete or incomplete list.
    pub fn has_service(&self, uuid: u16) -> bool {
        [&self.services_complete, &self.services_incomplete]
            .into_iter()
            .flatten()
            .any(|set| set.contains(&uuid))
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        *self == AdFields::default()
    }
}

/// Decode raw advertisement data.
///
/// A structure whose declared length runs past the end of `data` makes the
/// whole payload unusable and yields empty fields. A zero length byte marks
/// the start of padding and ends decoding.
pub fn decode(data: &[u8]) -> AdFields {
    let mut fields = AdFields::default();
    let mut rest = data;

    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len == 0 {
            break;
        }
        if len > tail.len() {
            return AdFields::default();
        }
        let (structure, next) = tail.split_at(len);
        let (ad_type, payload) = (structure[0], &structure[1..]);

        match ad_type {
            AD_TYPE_FLAGS => {
                if let Some(&flags) = payload.first() {
                    fields.flags = Some(flags);
                }
            }
            AD_TYPE_INCOMPLETE_16 | AD_TYPE_COMPLETE_16 => {
                let list = if ad_type == AD_TYPE_COMPLETE_16 {
                    &mut fields.services_complete
                } else {
                    &mut fields.services_incomplete
                };
                list.get_or_insert_with(BTreeSet::new).extend(
                    payload
                        .chunks_exact(2)
                        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]])),
                );
            }
            AD_TYPE_COMPLETE_LOCAL_NAME => {
                fields.local_name = Some(String::from_utf8_lossy(payload).into_owned());
            }
            _ => {}
        }

        rest = next;
    }

    fields
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host)
// ═══════════════════════════════════════════════════════════════════════════
