//! Transport layer: HTTP request-head parsing and WebSocket accept.

pub mod http;
pub mod rewind;
pub mod websocket;

pub use http::{read_request_head, write_response, HeadError, RequestHead};
pub use rewind::Rewind;
