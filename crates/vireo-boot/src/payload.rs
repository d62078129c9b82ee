//! Embedded payload slots and the two-part payload format.
//!
//! The configuration slot is a fixed in-memory region that starts with a
//! 4-byte big-endian size field followed by a compressed body. The
//! reserved pattern [`CONFIG_ABSENT`] in the size field means "no payload
//! embedded", which is a valid outcome, not an error.
//!
//! The decompressed body is an ordered pair: the configuration value's
//! serialized bytes first, the module overlay table second. That ordering
//! is a wire contract.

use crate::bundle::{read_u32, ModuleBundle};
use crate::error::PayloadError;

/// Size-field pattern meaning "no payload embedded".
pub const CONFIG_ABSENT: u32 = 0x2323_2323;

/// Length of the size field at the head of the configuration slot.
pub const CONFIG_HEADER_LEN: usize = 4;

/// Upper bound for a decompressed configuration payload.
pub const MAX_PAYLOAD_SIZE: usize = 8 * 1024 * 1024;

/// Logical path of the entry unit inside the merged bundle.
pub const ENTRY_UNIT_PATH: &str = "app/__init__.vbc";

/// Callable looked up in the evaluated entry namespace.
pub const ENTRY_FUNCTION: &str = "main";

/// Name of the synthetic top-level module the payload runs in.
pub const APP_MODULE: &str = "app";

/// Logical origin stamped onto the synthetic module. Not a filesystem
/// path; the engine must accept non-filesystem origins.
pub const APP_ORIGIN: &str = "vireo://app/__init__.vbc";

/// Logical search-path entry stamped onto the synthetic module.
pub const APP_SEARCH_PATH: &str = "vireo://app";

/// Opaque header length at the front of the entry unit's bytes.
pub const ENTRY_HEADER_LEN: usize = 8;

/// The decompressed two-part payload.
#[derive(Debug, PartialEq, Eq)]
pub struct Payload {
    /// Element 0: the configuration value, serialized in the engine's
    /// own format, opaque to this layer
    pub config: Vec<u8>,
    /// Element 1: module overlay, merged over the standard library
    pub overlay: ModuleBundle,
}

/// Probe the configuration slot's size field.
///
/// Returns the compressed body length, or `None` when the absent
/// sentinel is embedded. The sentinel short-circuits without touching
/// the decompressor.
pub fn probe_config(slot: &[u8]) -> Result<Option<usize>, PayloadError> {
    if slot.len() < CONFIG_HEADER_LEN {
        return Err(PayloadError::TruncatedHeader);
    }

    let declared = u32::from_be_bytes([slot[0], slot[1], slot[2], slot[3]]);
    if declared == CONFIG_ABSENT {
        return Ok(None);
    }

    let declared = declared as usize;
    let capacity = slot.len() - CONFIG_HEADER_LEN;
    if declared > capacity {
        return Err(PayloadError::Oversized { declared, capacity });
    }

    Ok(Some(declared))
}

/// Split a decompressed payload into its two parts.
pub fn split_payload(bytes: &[u8]) -> Result<Payload, PayloadError> {
    let config_len = read_u32(bytes)? as usize;
    let rest = &bytes[4..];
    if rest.len() < config_len {
        return Err(PayloadError::Truncated);
    }

    let config = rest[..config_len].to_vec();
    let overlay = ModuleBundle::decode(&rest[config_len..])?;

    Ok(Payload { config, overlay })
}

/// Encode a two-part payload body (the packer-side counterpart of
/// [`split_payload`]; the result is compressed before embedding).
pub fn encode_payload(config: &[u8], overlay: &ModuleBundle) -> Vec<u8> {
    let table = overlay.encode();
    let mut body = Vec::with_capacity(4 + config.len() + table.len());
    body.extend_from_slice(&(config.len() as u32).to_be_bytes());
    body.extend_from_slice(config);
    body.extend_from_slice(&table);
    body
}

/// Write a compressed payload into a configuration slot, header first.
///
/// Fails if the slot cannot hold the header plus the body. Packer-side
/// helper; the runtime only ever reads slots.
pub fn fill_config_slot(slot: &mut [u8], compressed: &[u8]) -> Result<(), PayloadError> {
    if slot.len() < CONFIG_HEADER_LEN + compressed.len() {
        return Err(PayloadError::Oversized {
            declared: compressed.len(),
            capacity: slot.len().saturating_sub(CONFIG_HEADER_LEN),
        });
    }
    slot[..CONFIG_HEADER_LEN]
        .copy_from_slice(&(compressed.len() as u32).to_be_bytes());
    slot[CONFIG_HEADER_LEN..CONFIG_HEADER_LEN + compressed.len()]
        .copy_from_slice(compressed);
    Ok(())
}

/// Stamp the absent sentinel into a slot.
pub fn mark_config_absent(slot: &mut [u8]) -> Result<(), PayloadError> {
    if slot.len() < CONFIG_HEADER_LEN {
        return Err(PayloadError::TruncatedHeader);
    }
    slot[..CONFIG_HEADER_LEN].copy_from_slice(&CONFIG_ABSENT.to_be_bytes());
    Ok(())
}
