//! Module bundle and its wire format.
//!
//! A bundle maps module paths to compiled-unit bytes. On the wire it is a
//! checksummed table:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ magic  b"VMOD"           │  4 bytes
//! │ entry count              │  u32 big-endian
//! │ entries                  │  path_len u16 BE | data_len u32 BE
//! │   ...                    │  | path | data
//! │ CRC32 of count + entries │  u32 big-endian
//! └──────────────────────────┘
//! ```
//!
//! All integers are big-endian, decoded explicitly from byte slices.

use std::collections::BTreeMap;

use crate::error::PayloadError;

/// Magic bytes identifying a module table.
pub const MODULE_TABLE_MAGIC: [u8; 4] = *b"VMOD";

/// Mapping from module path to compiled-unit bytes.
///
/// Iteration order is the path order, which keeps encoding deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleBundle {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ModuleBundle {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one module, replacing any previous entry at that path.
    pub fn insert(&mut self, path: impl Into<String>, unit: Vec<u8>) {
        self.entries.insert(path.into(), unit);
    }

    /// Look up a module's compiled-unit bytes.
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(|v| v.as_slice())
    }

    /// Remove a module, returning its bytes.
    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.entries.remove(path)
    }

    /// Whether a module path is present.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bundle holds no modules.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(path, unit)` pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(p, d)| (p.as_str(), d.as_slice()))
    }

    /// Overlay another bundle onto this one.
    ///
    /// Right-biased: on a path collision the overlay's entry wins.
    pub fn overlay(&mut self, overlay: ModuleBundle) {
        self.entries.extend(overlay.entries);
    }

    /// Decode a bundle from a complete module table.
    ///
    /// The slice must contain exactly one table: magic through checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() < 12 {
            return Err(PayloadError::Truncated);
        }
        if bytes[..4] != MODULE_TABLE_MAGIC {
            return Err(PayloadError::BadMagic);
        }

        let body = &bytes[4..bytes.len() - 4];
        let declared_crc = read_u32(&bytes[bytes.len() - 4..])?;
        if crc32fast::hash(body) != declared_crc {
            return Err(PayloadError::ChecksumMismatch);
        }

        let count = read_u32(body)? as usize;
        let mut offset = 4;
        let mut entries = BTreeMap::new();

        for _ in 0..count {
            if body.len() < offset + 6 {
                return Err(PayloadError::Truncated);
            }
            let path_len =
                u16::from_be_bytes([body[offset], body[offset + 1]]) as usize;
            let data_len = read_u32(&body[offset + 2..])? as usize;
            offset += 6;

            if body.len() < offset + path_len + data_len {
                return Err(PayloadError::Truncated);
            }
            let path = std::str::from_utf8(&body[offset..offset + path_len])
                .map_err(|_| PayloadError::BadPath)?
                .to_string();
            offset += path_len;

            entries.insert(path, body[offset..offset + data_len].to_vec());
            offset += data_len;
        }

        if offset != body.len() {
            return Err(PayloadError::Truncated);
        }

        Ok(ModuleBundle { entries })
    }

    /// Encode the bundle as a module table.
    ///
    /// The packer-side counterpart of [`ModuleBundle::decode`].
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for (path, unit) in &self.entries {
            body.extend_from_slice(&(path.len() as u16).to_be_bytes());
            body.extend_from_slice(&(unit.len() as u32).to_be_bytes());
            body.extend_from_slice(path.as_bytes());
            body.extend_from_slice(unit);
        }

        let mut table = Vec::with_capacity(body.len() + 8);
        table.extend_from_slice(&MODULE_TABLE_MAGIC);
        let crc = crc32fast::hash(&body);
        table.extend_from_slice(&body);
        table.extend_from_slice(&crc.to_be_bytes());
        table
    }
}

impl FromIterator<(String, Vec<u8>)> for ModuleBundle {
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        ModuleBundle {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Explicit big-endian u32 decode from the head of a slice.
pub(crate) fn read_u32(bytes: &[u8]) -> Result<u32, PayloadError> {
    if bytes.len() < 4 {
        return Err(PayloadError::Truncated);
    }
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(pairs: &[(&str, &[u8])]) -> ModuleBundle {
        pairs
            .iter()
            .map(|(p, d)| (p.to_string(), d.to_vec()))
            .collect()
    }

    #[test]
    fn test_roundtrip() {
        let original = bundle(&[
            ("app/util.vbc", b"\x01\x02\x03" as &[u8]),
            ("app/net.vbc", b""),
            ("app/__init__.vbc", &[0u8; 300]),
        ]);
        let decoded = ModuleBundle::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_empty_roundtrip() {
        let decoded = ModuleBundle::decode(&ModuleBundle::new().encode()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_overlay_right_biased() {
        let mut base = bundle(&[("a", b"1" as &[u8]), ("b", b"2")]);
        base.overlay(bundle(&[("b", b"3" as &[u8]), ("c", b"4")]));

        assert_eq!(base.len(), 3);
        assert_eq!(base.get("a"), Some(&b"1"[..]));
        assert_eq!(base.get("b"), Some(&b"3"[..]));
        assert_eq!(base.get("c"), Some(&b"4"[..]));
    }

    #[test]
    fn test_overlay_disjoint_is_union() {
        let mut left = bundle(&[("a", b"1")]);
        left.overlay(bundle(&[("b", b"2")]));

        let mut right = bundle(&[("b", b"2")]);
        right.overlay(bundle(&[("a", b"1")]));

        assert_eq!(left, right);
    }

    #[test]
    fn test_bad_magic() {
        let mut table = bundle(&[("a", b"1")]).encode();
        table[0] = b'X';
        assert_eq!(ModuleBundle::decode(&table), Err(PayloadError::BadMagic));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut table = bundle(&[("a", b"1")]).encode();
        let flip = table.len() - 6;
        table[flip] ^= 0xFF;
        assert_eq!(
            ModuleBundle::decode(&table),
            Err(PayloadError::ChecksumMismatch)
        );
    }

    #[test]
    fn test_truncated_table() {
        let table = bundle(&[("a", b"123456")]).encode();
        assert_eq!(
            ModuleBundle::decode(&table[..table.len() - 5]),
            Err(PayloadError::ChecksumMismatch)
        );
        assert_eq!(ModuleBundle::decode(&table[..8]), Err(PayloadError::Truncated));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut table = bundle(&[("a", b"1")]).encode();
        table.extend_from_slice(b"junk");
        // Extra bytes shift the checksum window, so the table no longer
        // verifies.
        assert!(ModuleBundle::decode(&table).is_err());
    }

    #[test]
    fn test_bad_utf8_path() {
        // Hand-build a table with a non-UTF-8 path.
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&[0xFF, 0xFE]);

        let mut table = Vec::new();
        table.extend_from_slice(&MODULE_TABLE_MAGIC);
        let crc = crc32fast::hash(&body);
        table.extend_from_slice(&body);
        table.extend_from_slice(&crc.to_be_bytes());

        assert_eq!(ModuleBundle::decode(&table), Err(PayloadError::BadPath));
    }
}
