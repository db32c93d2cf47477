//! Destination addresses and the address-type (ATYP) code point table.
//!
//! Deployments disagree on which code point means "domain" and which means
//! "IPv6", so the mapping is a value ([`AddressTypeTable`]) rather than a set
//! of constants. Two presets exist:
//!
//! | Preset              | IPv4 | Domain | IPv6 |
//! |---------------------|------|--------|------|
//! | `socks` (default)   | 1    | 3      | 4    |
//! | `compact`           | 1    | 2      | 3    |

use crate::codec::ByteCursor;
use crate::error::{RelayError, RelayResult};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// How the destination address bytes are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Ipv4,
    Domain,
    Ipv6,
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressKind::Ipv4 => f.write_str("ipv4"),
            AddressKind::Domain => f.write_str("domain"),
            AddressKind::Ipv6 => f.write_str("ipv6"),
        }
    }
}

/// A decoded destination address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl Address {
    pub fn kind(&self) -> AddressKind {
        match self {
            Address::Ipv4(_) => AddressKind::Ipv4,
            Address::Domain(_) => AddressKind::Domain,
            Address::Ipv6(_) => AddressKind::Ipv6,
        }
    }

    /// The literal IP, or `None` for a domain that still needs resolving.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Address::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Address::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Address::Domain(_) => None,
        }
    }
}

/// IPv4 renders dot-decimal, IPv6 with RFC 5952 zero-run compression.
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip) => write!(f, "{ip}"),
            Address::Domain(name) => f.write_str(name),
            Address::Ipv6(ip) => write!(f, "{ip}"),
        }
    }
}

/// Mapping between ATYP code points and [`AddressKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTypeTable {
    pub ipv4: u8,
    pub domain: u8,
    pub ipv6: u8,
}

impl AddressTypeTable {
    /// SOCKS-style code points: IPv4=1, Domain=3, IPv6=4.
    pub const SOCKS: Self = Self {
        ipv4: 1,
        domain: 3,
        ipv6: 4,
    };

    /// Compact code points: IPv4=1, Domain=2, IPv6=3.
    pub const COMPACT: Self = Self {
        ipv4: 1,
        domain: 2,
        ipv6: 3,
    };

    /// Build a custom table. Code points must be distinct.
    pub fn new(ipv4: u8, domain: u8, ipv6: u8) -> RelayResult<Self> {
        if ipv4 == domain || ipv4 == ipv6 || domain == ipv6 {
            return Err(RelayError::Config(format!(
                "address type code points must be distinct (ipv4={ipv4}, domain={domain}, ipv6={ipv6})"
            )));
        }
        Ok(Self { ipv4, domain, ipv6 })
    }

    /// Look up a preset by name (`"socks"` or `"compact"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "socks" => Some(Self::SOCKS),
            "compact" => Some(Self::COMPACT),
            _ => None,
        }
    }

    pub fn kind_of(&self, code: u8) -> Option<AddressKind> {
        if code == self.ipv4 {
            Some(AddressKind::Ipv4)
        } else if code == self.domain {
            Some(AddressKind::Domain)
        } else if code == self.ipv6 {
            Some(AddressKind::Ipv6)
        } else {
            None
        }
    }

    pub fn code_of(&self, kind: AddressKind) -> u8 {
        match kind {
            AddressKind::Ipv4 => self.ipv4,
            AddressKind::Domain => self.domain,
            AddressKind::Ipv6 => self.ipv6,
        }
    }

    /// Read an ATYP byte followed by the address bytes it announces.
    pub fn read_address(&self, cursor: &mut ByteCursor<'_>) -> RelayResult<Address> {
        let code = cursor.read_u8()?;
        let kind = self
            .kind_of(code)
            .ok_or(RelayError::UnsupportedAddressType(code))?;

        match kind {
            AddressKind::Ipv4 => {
                let octets: [u8; 4] = cursor.read_array()?;
                Ok(Address::Ipv4(Ipv4Addr::from(octets)))
            }
            AddressKind::Domain => {
                let len = cursor.read_u8()? as usize;
                if len == 0 {
                    return Err(RelayError::InvalidMessage("empty domain name".into()));
                }
                let raw = cursor.read_bytes(len)?;
                let name = std::str::from_utf8(raw).map_err(|e| {
                    RelayError::InvalidMessage(format!("domain is not valid UTF-8: {e}"))
                })?;
                Ok(Address::Domain(name.to_string()))
            }
            AddressKind::Ipv6 => {
                let octets: [u8; 16] = cursor.read_array()?;
                Ok(Address::Ipv6(Ipv6Addr::from(octets)))
            }
        }
    }

    /// Append the ATYP byte and address bytes for `address`.
    pub fn write_address(&self, address: &Address, out: &mut Vec<u8>) -> RelayResult<()> {
        out.push(self.code_of(address.kind()));
        match address {
            Address::Ipv4(ip) => out.extend_from_slice(&ip.octets()),
            Address::Ipv6(ip) => out.extend_from_slice(&ip.octets()),
            Address::Domain(name) => {
                let len = u8::try_from(name.len()).map_err(|_| {
                    RelayError::InvalidMessage(format!(
                        "domain too long: {} bytes (max 255)",
                        name.len()
                    ))
                })?;
                if len == 0 {
                    return Err(RelayError::InvalidMessage("empty domain name".into()));
                }
                out.push(len);
                out.extend_from_slice(name.as_bytes());
            }
        }
        Ok(())
    }
}

impl Default for AddressTypeTable {
    fn default() -> Self {
        Self::SOCKS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(table: &AddressTypeTable, bytes: &[u8]) -> RelayResult<Address> {
        let mut cur = ByteCursor::new(bytes);
        table.read_address(&mut cur)
    }

    #[test]
    fn ipv4_dot_decimal() {
        let addr = decode(&AddressTypeTable::SOCKS, &[1, 93, 184, 216, 34]).unwrap();
        assert_eq!(addr.to_string(), "93.184.216.34");
        assert_eq!(addr.kind(), AddressKind::Ipv4);
    }

    #[test]
    fn ipv6_compresses_longest_zero_run() {
        let mut bytes = vec![4u8];
        bytes.extend_from_slice(&[
            0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01,
        ]);
        let addr = decode(&AddressTypeTable::SOCKS, &bytes).unwrap();
        assert_eq!(addr.to_string(), "2001:db8::1");
    }

    #[test]
    fn ipv6_collapses_only_one_run() {
        // 2001:0:0:1:0:0:0:1: the longer run is the one collapsed.
        let ip: Ipv6Addr = "2001:0:0:1:0:0:0:1".parse().unwrap();
        let mut bytes = vec![4u8];
        bytes.extend_from_slice(&ip.octets());
        let addr = decode(&AddressTypeTable::SOCKS, &bytes).unwrap();
        assert_eq!(addr.to_string(), "2001:0:0:1::1");
    }

    #[test]
    fn ipv6_leading_zero_groups() {
        let mut bytes = vec![4u8];
        bytes.extend_from_slice(&[0; 15]);
        bytes.push(1);
        let addr = decode(&AddressTypeTable::SOCKS, &bytes).unwrap();
        assert_eq!(addr.to_string(), "::1");
    }

    #[test]
    fn domain_with_length_prefix() {
        let mut bytes = vec![3u8, 11];
        bytes.extend_from_slice(b"example.com");
        let addr = decode(&AddressTypeTable::SOCKS, &bytes).unwrap();
        assert_eq!(addr, Address::Domain("example.com".into()));
        assert!(addr.ip().is_none());
    }

    #[test]
    fn domain_rejects_empty_and_bad_utf8() {
        assert!(decode(&AddressTypeTable::SOCKS, &[3, 0]).is_err());
        assert!(matches!(
            decode(&AddressTypeTable::SOCKS, &[3, 2, 0xff, 0xfe]),
            Err(RelayError::InvalidMessage(_))
        ));
    }

    #[test]
    fn truncated_address_is_codec_error() {
        assert!(matches!(
            decode(&AddressTypeTable::SOCKS, &[1, 10, 0]),
            Err(RelayError::Codec(_))
        ));
        assert!(matches!(
            decode(&AddressTypeTable::SOCKS, &[3, 10, b'a']),
            Err(RelayError::Codec(_))
        ));
    }

    #[test]
    fn unknown_code_point() {
        assert!(matches!(
            decode(&AddressTypeTable::SOCKS, &[2, 1, 2, 3, 4]),
            Err(RelayError::UnsupportedAddressType(2))
        ));
    }

    #[test]
    fn compact_table_swaps_domain_and_ipv6() {
        let mut bytes = vec![2u8, 3];
        bytes.extend_from_slice(b"a.b");
        let addr = decode(&AddressTypeTable::COMPACT, &bytes).unwrap();
        assert_eq!(addr.kind(), AddressKind::Domain);

        let mut bytes = vec![3u8];
        bytes.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        let addr = decode(&AddressTypeTable::COMPACT, &bytes).unwrap();
        assert_eq!(addr.kind(), AddressKind::Ipv6);
        assert!(decode(&AddressTypeTable::COMPACT, &[4; 17]).is_err());
    }

    #[test]
    fn table_presets_and_validation() {
        assert_eq!(AddressTypeTable::from_name("SOCKS"), Some(AddressTypeTable::SOCKS));
        assert_eq!(AddressTypeTable::from_name("compact"), Some(AddressTypeTable::COMPACT));
        assert_eq!(AddressTypeTable::from_name("other"), None);
        assert_eq!(AddressTypeTable::default(), AddressTypeTable::SOCKS);
        assert!(AddressTypeTable::new(1, 1, 4).is_err());
        assert!(AddressTypeTable::new(1, 5, 6).is_ok());
    }

    #[test]
    fn write_address_matches_decoded_bytes() {
        let table = AddressTypeTable::SOCKS;
        for bytes in [
            vec![1u8, 10, 0, 0, 1],
            [vec![3u8, 7], b"a.b.com".to_vec()].concat(),
            [vec![4u8], Ipv6Addr::LOCALHOST.octets().to_vec()].concat(),
        ] {
            let addr = decode(&table, &bytes).unwrap();
            let mut out = Vec::new();
            table.write_address(&addr, &mut out).unwrap();
            assert_eq!(out, bytes);
        }
    }

    #[test]
    fn write_rejects_oversized_domain() {
        let mut out = Vec::new();
        let long = Address::Domain("a".repeat(256));
        assert!(AddressTypeTable::SOCKS.write_address(&long, &mut out).is_err());
    }
}
