//! Minimal HTTP/1.1 request-head handling.
//!
//! Every accepted TCP connection starts with an HTTP request. The head is
//! read once and classified: WebSocket upgrades go to the connection gate,
//! everything else to the link page. The bytes read here are replayed to the
//! WebSocket handshake through [`super::Rewind`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest request head accepted (bytes).
pub const MAX_HEAD_LEN: usize = 8192;

const MAX_HEADERS: usize = 64;

/// Failure while reading a request head.
#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    /// Peer closed before sending anything.
    #[error("connection closed before request")]
    Closed,
    /// Head exceeded [`MAX_HEAD_LEN`].
    #[error("request head exceeds {} bytes", MAX_HEAD_LEN)]
    TooLarge,
    /// Not a parseable HTTP/1.x request.
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed request head plus every byte read from the socket so far.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    /// Request target as sent (path and query).
    pub target: String,
    pub headers: Vec<(String, String)>,
    raw: Vec<u8>,
}

impl RequestHead {
    /// Path component of the target, without the query string.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// Case-insensitive header lookup (first match).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Upgrade: websocket` present.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
            })
            .unwrap_or(false)
    }

    /// All bytes read from the socket, including anything past the head.
    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }
}

/// Read from `stream` until a complete request head is buffered.
pub async fn read_request_head<R>(stream: &mut R) -> Result<RequestHead, HeadError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(if buf.is_empty() {
                HeadError::Closed
            } else {
                HeadError::Malformed("connection closed mid-request".into())
            });
        }
        buf.extend_from_slice(&chunk[..n]);

        let parsed = {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut req = httparse::Request::new(&mut headers);
            match req.parse(&buf) {
                Ok(httparse::Status::Complete(_)) => Some((
                    req.method.unwrap_or_default().to_string(),
                    req.path.unwrap_or_default().to_string(),
                    req.headers
                        .iter()
                        .map(|h| {
                            (
                                h.name.to_string(),
                                String::from_utf8_lossy(h.value).into_owned(),
                            )
                        })
                        .collect::<Vec<_>>(),
                )),
                Ok(httparse::Status::Partial) => None,
                Err(e) => return Err(HeadError::Malformed(e.to_string())),
            }
        };

        match parsed {
            Some((method, target, headers)) => {
                return Ok(RequestHead {
                    method,
                    target,
                    headers,
                    raw: buf,
                });
            }
            None if buf.len() >= MAX_HEAD_LEN => return Err(HeadError::TooLarge),
            None => continue,
        }
    }
}

/// Write a complete `Connection: close` response and flush it.
pub async fn write_response<W>(
    stream: &mut W,
    status: u16,
    reason: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut response = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));
    response.push_str(body);

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}
