//! Client identity: the 16-byte token carried in every handshake.
//!
//! Configured as a UUID string. Hyphens are stripped before parsing, so
//! `37a0bd7c-8b9f-4693-8916-bd1e2da0a817` and `37a0bd7c8b9f46938916bd1e2da0a817`
//! name the same client.

use crate::error::{RelayError, RelayResult};
use std::fmt;
use uuid::Uuid;

/// Length of the identity field in the handshake.
pub const CLIENT_ID_LEN: usize = 16;

/// Fixed-length opaque client identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId([u8; CLIENT_ID_LEN]);

impl ClientId {
    pub fn from_bytes(bytes: [u8; CLIENT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a UUID string, ignoring hyphens.
    pub fn parse(s: &str) -> RelayResult<Self> {
        let stripped: String = s.trim().chars().filter(|c| *c != '-').collect();
        let uuid = Uuid::try_parse(&stripped)
            .map_err(|e| RelayError::Config(format!("invalid client UUID {s:?}: {e}")))?;
        Ok(Self(*uuid.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; CLIENT_ID_LEN] {
        &self.0
    }

    /// Lowercase hex without hyphens (the form used in the WebSocket path).
    pub fn simple(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Byte-for-byte comparison against a received token.
    ///
    /// Runs over all 16 bytes regardless of where the first difference is.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        if candidate.len() != CLIENT_ID_LEN {
            return false;
        }
        self.0
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({}…)", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "37a0bd7c-8b9f-4693-8916-bd1e2da0a817";

    #[test]
    fn parse_strips_hyphens() {
        let a = ClientId::parse(UUID).unwrap();
        let b = ClientId::parse("37a0bd7c8b9f46938916bd1e2da0a817").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.simple(), "37a0bd7c8b9f46938916bd1e2da0a817");
        assert_eq!(a.short(), "37a0bd7c");
        assert_eq!(a.as_bytes()[0], 0x37);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ClientId::parse("not-a-uuid").is_err());
        assert!(ClientId::parse("37a0bd7c8b9f46938916bd1e2da0a8").is_err());
    }

    #[test]
    fn matches_every_bit() {
        let id = ClientId::parse(UUID).unwrap();
        assert!(id.matches(id.as_bytes()));
        for byte in 0..CLIENT_ID_LEN {
            for bit in 0..8 {
                let mut flipped = *id.as_bytes();
                flipped[byte] ^= 1 << bit;
                assert!(!id.matches(&flipped), "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn matches_requires_exact_length() {
        let id = ClientId::parse(UUID).unwrap();
        assert!(!id.matches(&id.as_bytes()[..15]));
        let mut longer = id.as_bytes().to_vec();
        longer.push(0);
        assert!(!id.matches(&longer));
    }

    #[test]
    fn debug_does_not_print_full_identity() {
        let id = ClientId::parse(UUID).unwrap();
        let dbg = format!("{id:?}");
        assert!(dbg.contains("37a0bd7c"));
        assert!(!dbg.contains("bd1e2da0a817"));
    }
}
