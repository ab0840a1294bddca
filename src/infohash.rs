//! The 20-byte BitTorrent infohash identity.

use std::fmt;

/// SHA-1 of a `.torrent`'s bencoded `info` dictionary; the canonical
/// identity of a torrent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Infohash([u8; 20]);

impl Infohash {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex form, the canonical printed representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse hex, stripping a legacy two-character `0x`-style prefix
    /// if present so either a 40 or 42 character string is accepted.
    pub fn parse_hex(input: &str) -> Result<Self, InfohashParseError> {
        let stripped = match input.len() {
            40 => input,
            42 => &input[2..],
            _ => return Err(InfohashParseError::WrongLength(input.len())),
        };

        let bytes = hex::decode(stripped).map_err(InfohashParseError::InvalidHex)?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| InfohashParseError::WrongLength(stripped.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Infohash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Infohash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Infohash({})", self.to_hex())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InfohashParseError {
    #[error("infohash must be 40 hex characters (or 42 with a legacy prefix), got {0}")]
    WrongLength(usize),
    #[error("infohash is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let bytes = [0xabu8; 20];
        let h = Infohash::from_bytes(bytes);
        let hex = h.to_hex();
        let parsed = Infohash::parse_hex(&hex).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn strips_legacy_two_char_prefix() {
        let bytes = [0x11u8; 20];
        let plain = Infohash::from_bytes(bytes).to_hex();
        let prefixed = format!("0x{plain}");
        let parsed = Infohash::parse_hex(&prefixed).unwrap();
        assert_eq!(parsed, Infohash::from_bytes(bytes));
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Infohash::parse_hex("deadbeef").unwrap_err();
        assert!(matches!(err, InfohashParseError::WrongLength(8)));
    }

    #[test]
    fn rejects_invalid_hex() {
        let bogus = "zz".repeat(20);
        let err = Infohash::parse_hex(&bogus).unwrap_err();
        assert!(matches!(err, InfohashParseError::InvalidHex(_)));
    }
}
