use std::fmt;
use std::str::FromStr;

/// Identity of a pack, as computed by the pack writer: the raw SHA-1 of the
/// pack's contents. Equality and hashing are over the 20 raw bytes; the hex
/// `name` form only ever appears at the filesystem/log boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackId([u8; 20]);

/// Number of bytes a `PackId` occupies in the binary pack log.
pub const PACK_ID_SIZE: usize = 20;

impl PackId {
    pub fn from_raw(raw: [u8; PACK_ID_SIZE]) -> Self {
        PackId(raw)
    }

    pub fn raw_bytes(&self) -> &[u8; PACK_ID_SIZE] {
        &self.0
    }

    /// Lowercase 40-character hex form, e.g. as used in `pack-<name>.pack`.
    pub fn name(&self) -> String {
        hex::encode(self.0)
    }

    pub fn pack_filename(&self) -> String {
        format!("pack-{}.pack", self.name())
    }

    pub fn idx_filename(&self) -> String {
        format!("pack-{}.idx", self.name())
    }

    pub fn bitmap_filename(&self) -> String {
        format!("pack-{}.bitmap", self.name())
    }

    pub fn keep_filename(&self) -> String {
        format!("pack-{}.keep", self.name())
    }
}

impl fmt::Debug for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackId({})", self.name())
    }
}

impl fmt::Display for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PackIdParseError {
    #[error("expected a 40 character hex string, got {0} characters")]
    WrongLength(usize),
    #[error("invalid hex digit in pack id")]
    InvalidHex(#[from] hex::FromHexError),
}

impl FromStr for PackId {
    type Err = PackIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != PACK_ID_SIZE * 2 {
            return Err(PackIdParseError::WrongLength(s.len()));
        }
        let mut raw = [0u8; PACK_ID_SIZE];
        hex::decode_to_slice(s, &mut raw)?;
        Ok(PackId(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_hex() {
        let raw = [0x5a; PACK_ID_SIZE];
        let id = PackId::from_raw(raw);
        let name = id.name();
        assert_eq!(name.len(), 40);
        let parsed: PackId = name.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = "abcd".parse::<PackId>().unwrap_err();
        assert!(matches!(err, PackIdParseError::WrongLength(4)));
    }

    #[test]
    fn filenames() {
        let id = PackId::from_raw([0u8; PACK_ID_SIZE]);
        assert_eq!(id.pack_filename(), format!("pack-{}.pack", id.name()));
        assert_eq!(id.idx_filename(), format!("pack-{}.idx", id.name()));
        assert_eq!(id.bitmap_filename(), format!("pack-{}.bitmap", id.name()));
    }
}
