use thiserror::Error;

/// WebSocket close codes sent when a session terminates.
pub mod close_code {
    /// Upstream closed cleanly.
    pub const NORMAL: u16 = 1000;
    /// Server is shutting down.
    pub const GOING_AWAY: u16 = 1001;
    /// Malformed or rejected handshake.
    pub const PROTOCOL: u16 = 1002;
    /// Unexpected server-side failure.
    pub const INTERNAL: u16 = 1011;
    /// DNS-over-HTTPS lookup failed.
    pub const RESOLUTION_FAILED: u16 = 4001;
    /// Outbound TCP connect failed or the upstream socket errored.
    pub const UPSTREAM_ERROR: u16 = 4002;
}

/// Errors produced by the relay protocol layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("client identity mismatch")]
    IdentityMismatch,

    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(u8),

    #[error("resolution failed: {0}")]
    Resolution(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// The close code a session reports to the client when it ends with this error.
    pub fn close_code(&self) -> u16 {
        match self {
            RelayError::Codec(_)
            | RelayError::InvalidMessage(_)
            | RelayError::UnsupportedVersion(_)
            | RelayError::IdentityMismatch
            | RelayError::UnsupportedCommand(_)
            | RelayError::UnsupportedAddressType(_) => close_code::PROTOCOL,
            RelayError::Resolution(_) => close_code::RESOLUTION_FAILED,
            RelayError::Upstream(_) | RelayError::Io(_) => close_code::UPSTREAM_ERROR,
            RelayError::Transport(_)
            | RelayError::Config(_)
            | RelayError::Timeout
            | RelayError::Other(_) => close_code::INTERNAL,
        }
    }

    /// Whether this error belongs to the handshake (protocol) category.
    pub fn is_protocol(&self) -> bool {
        self.close_code() == close_code::PROTOCOL
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
