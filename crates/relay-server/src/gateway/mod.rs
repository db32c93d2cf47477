//! Gateway module: DNS-over-HTTPS resolution and outbound TCP forwarding.
//!
//! # Submodule Architecture
//!
//! - **[`resolver`]**: The [`DohResolver`] turns a domain into an IPv4
//!   literal with a JSON DNS-over-HTTPS query. One fresh HTTPS round trip per
//!   lookup; no cache, no retry.
//!
//! - **[`forwarder`]**: Opens the outbound TCP connection to a resolved
//!   destination and runs the bidirectional relay between that socket and the
//!   session's WebSocket until either side ends.
//!
//! # Data Flow
//!
//! ```text
//! handshake (domain destination)
//!   → DohResolver::resolve_ipv4
//! handshake ack sent
//!   → forwarder::connect
//!   → forwarder::relay (inline payload first, then both directions)
//! ```

pub mod forwarder;
pub mod resolver;

pub use resolver::DohResolver;
