//! HTTP basic-auth credentials (`Authorization: Basic base64(user:pass)`).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// `WWW-Authenticate` value sent with 401 responses.
pub const CHALLENGE: &str = r#"Basic realm="Node""#;

/// Why an `Authorization` header could not be read as basic credentials.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BasicAuthError {
    #[error("authorization scheme is not Basic")]
    NotBasic,
    /// Token is not valid base64 or not UTF-8.
    #[error("credentials are not valid base64 UTF-8")]
    InvalidEncoding,
    #[error("credentials have no ':' separator")]
    MissingSeparator,
}

/// A username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse the value of an `Authorization` header.
    pub fn from_header(value: &str) -> Result<Self, BasicAuthError> {
        let (scheme, token) = value
            .trim()
            .split_once(' ')
            .ok_or(BasicAuthError::NotBasic)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(BasicAuthError::NotBasic);
        }

        let decoded = STANDARD
            .decode(token.trim())
            .map_err(|_| BasicAuthError::InvalidEncoding)?;
        let decoded = String::from_utf8(decoded).map_err(|_| BasicAuthError::InvalidEncoding)?;

        let (username, password) = decoded
            .split_once(':')
            .ok_or(BasicAuthError::MissingSeparator)?;
        Ok(Self::new(username, password))
    }

    /// Header value carrying these credentials.
    #[cfg(test)]
    pub fn to_header(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
