//! relay-core: wire protocol for the WebSocket relay.
//!
//! Provides the handshake codec (version, client identity, addon block,
//! command, destination), the bounds-checked byte cursor it is built on,
//! destination address decoding with a configurable address-type table,
//! and the error taxonomy shared with the server.

pub mod address;
pub mod codec;
pub mod error;
pub mod identity;
pub mod request;

// Re-export commonly used items at crate root.
pub use address::{Address, AddressKind, AddressTypeTable};
pub use codec::ByteCursor;
pub use error::{close_code, RelayError, RelayResult};
pub use identity::ClientId;
pub use request::{ack, Command, ConnectionRequest, MIN_HEADER_LEN, PROTOCOL_VERSION};
