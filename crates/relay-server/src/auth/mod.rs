//! Authentication: basic credentials and the WebSocket connection gate.

pub mod basic;
pub mod gate;

pub use basic::{Credentials, CHALLENGE};
pub use gate::ConnectionGate;
