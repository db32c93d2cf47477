//! The handshake message: the first binary message on every session.
//!
//! Wire format (all integers big-endian):
//!
//! ```text
//! +---------+--------------+-----------+-------------+---------+------+------+---------+---------+
//! | version | client id    | addon len | addon bytes | command | port | atyp | address | payload |
//! | 1       | 16           | 1         | addon len   | 1       | 2    | 1    | varies  | rest    |
//! +---------+--------------+-----------+-------------+---------+------+------+---------+---------+
//! ```
//!
//! Anything after the address is the first fragment of tunneled payload.
//! On success the server answers with the two-byte [`ack`].

use crate::address::{Address, AddressTypeTable};
use crate::codec::ByteCursor;
use crate::error::{RelayError, RelayResult};
use crate::identity::{ClientId, CLIENT_ID_LEN};

/// The only supported protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Bytes that precede the address bytes when the addon block is empty:
/// version, client id, addon length, command, port, atyp.
pub const MIN_HEADER_LEN: usize = 1 + CLIENT_ID_LEN + 1 + 1 + 2 + 1;

/// Proxy command requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Tcp = 1,
    Udp = 2,
    Mux = 3,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Command::Tcp),
            2 => Some(Command::Udp),
            3 => Some(Command::Mux),
            _ => None,
        }
    }
}

/// A parsed handshake. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub version: u8,
    pub client_id: ClientId,
    /// Raw addon block; carried but never interpreted.
    pub addon: Vec<u8>,
    pub command: Command,
    pub port: u16,
    pub address: Address,
    /// Offset of the first payload byte within the handshake message.
    pub payload_offset: usize,
}

impl ConnectionRequest {
    /// Decode a handshake message.
    ///
    /// Checks structure only: the caller decides whether the identity and
    /// command are acceptable.
    pub fn decode(data: &[u8], table: &AddressTypeTable) -> RelayResult<Self> {
        if data.len() < MIN_HEADER_LEN {
            return Err(RelayError::Codec(format!(
                "handshake too short: {} bytes (min {})",
                data.len(),
                MIN_HEADER_LEN
            )));
        }

        let mut cur = ByteCursor::new(data);

        let version = cur.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(RelayError::UnsupportedVersion(version));
        }

        let client_id = ClientId::from_bytes(cur.read_array()?);

        let addon_len = cur.read_u8()? as usize;
        let addon = cur.read_bytes(addon_len)?.to_vec();

        let command_byte = cur.read_u8()?;
        let command =
            Command::from_u8(command_byte).ok_or(RelayError::UnsupportedCommand(command_byte))?;

        let port = cur.read_u16_be()?;
        let address = table.read_address(&mut cur)?;

        Ok(Self {
            version,
            client_id,
            addon,
            command,
            port,
            address,
            payload_offset: cur.position(),
        })
    }

    /// Encode the header (everything before the payload).
    pub fn encode_header(&self, table: &AddressTypeTable) -> RelayResult<Vec<u8>> {
        let addon_len = u8::try_from(self.addon.len()).map_err(|_| {
            RelayError::InvalidMessage(format!("addon block too long: {}", self.addon.len()))
        })?;

        let mut out = Vec::with_capacity(MIN_HEADER_LEN + self.addon.len() + 16);
        out.push(self.version);
        out.extend_from_slice(self.client_id.as_bytes());
        out.push(addon_len);
        out.extend_from_slice(&self.addon);
        out.push(self.command as u8);
        out.extend_from_slice(&self.port.to_be_bytes());
        table.write_address(&self.address, &mut out)?;
        Ok(out)
    }

    /// The inline payload fragment that followed the header in `message`.
    pub fn payload<'a>(&self, message: &'a [u8]) -> &'a [u8] {
        message.get(self.payload_offset..).unwrap_or(&[])
    }
}

/// The two-byte handshake acknowledgment: echoed version, empty addon block.
pub fn ack(version: u8) -> [u8; 2] {
    [version, 0x00]
}
