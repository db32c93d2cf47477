//! Connection gate: decides whether a WebSocket upgrade may proceed.
//!
//! Runs on the parsed request head, before the WebSocket handshake and
//! before any protocol byte is read. Checks, in order:
//!
//! 1. method is `GET` (else 404),
//! 2. path equals the expected path (else 401),
//! 3. when credential checking is enabled, a well-formed (else 400) and
//!    matching (else 401) basic `Authorization` header.

use super::basic::Credentials;
use crate::config::RelayConfig;
use crate::transport::RequestHead;

/// Why an upgrade was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GateRejection {
    #[error("upgrade method is not GET")]
    MethodNotAllowed,
    #[error("unexpected upgrade path")]
    PathMismatch,
    #[error("missing credentials")]
    MissingCredentials,
    #[error("malformed Authorization header")]
    MalformedCredentials,
    #[error("invalid credentials")]
    BadCredentials,
}

impl GateRejection {
    /// HTTP status sent back to the client.
    pub fn status(&self) -> u16 {
        match self {
            GateRejection::MethodNotAllowed => 404,
            GateRejection::MalformedCredentials => 400,
            GateRejection::PathMismatch
            | GateRejection::MissingCredentials
            | GateRejection::BadCredentials => 401,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self.status() {
            400 => "Bad Request",
            404 => "Not Found",
            _ => "Unauthorized",
        }
    }

    /// Whether the response should carry a `WWW-Authenticate` challenge.
    pub fn wants_challenge(&self) -> bool {
        matches!(
            self,
            GateRejection::MissingCredentials | GateRejection::BadCredentials
        )
    }
}

/// Upgrade admission policy. Built once from the config.
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    expected_path: String,
    /// Required credentials; `None` disables the credential check.
    credentials: Option<Credentials>,
}

impl ConnectionGate {
    pub fn new(expected_path: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            expected_path: expected_path.into(),
            credentials,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        let credentials = config
            .gate_auth
            .then(|| Credentials::new(&config.web_username, &config.web_password));
        Self::new(config.ws_path.clone(), credentials)
    }

    pub fn expected_path(&self) -> &str {
        &self.expected_path
    }

    /// Accept or reject an upgrade request.
    pub fn check(&self, head: &RequestHead) -> Result<(), GateRejection> {
        if !head.method.eq_ignore_ascii_case("GET") {
            return Err(GateRejection::MethodNotAllowed);
        }

        if head.path() != self.expected_path {
            return Err(GateRejection::PathMismatch);
        }

        if let Some(expected) = &self.credentials {
            let header = head
                .header("authorization")
                .ok_or(GateRejection::MissingCredentials)?;
            let presented = Credentials::from_header(header)
                .map_err(|_| GateRejection::MalformedCredentials)?;
            if presented != *expected {
                return Err(GateRejection::BadCredentials);
            }
        }

        Ok(())
    }
}
