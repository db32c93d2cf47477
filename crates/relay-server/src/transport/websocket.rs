//! WebSocket accept and send helpers using tokio-tungstenite.

use super::{RequestHead, Rewind};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use relay_core::{RelayError, RelayResult};
use std::borrow::Cow;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Close reasons are limited to 123 bytes by the WebSocket framing.
const MAX_CLOSE_REASON: usize = 123;

/// Complete the WebSocket handshake on a connection whose request head has
/// already been read and accepted by the gate.
pub async fn accept<S>(head: RequestHead, stream: S) -> RelayResult<WebSocketStream<Rewind<S>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio_tungstenite::accept_async(Rewind::new(head.into_raw(), stream))
        .await
        .map_err(|e| RelayError::Transport(format!("WS handshake failed: {e}")))
}

/// Helper: send a binary message.
pub async fn send_binary<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    data: &[u8],
) -> RelayResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sink.send(Message::Binary(data.to_vec().into()))
        .await
        .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
}

/// Build a close frame, truncating the reason to what fits on the wire.
pub fn close_frame(code: u16, reason: &str) -> CloseFrame<'static> {
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    CloseFrame {
        code: CloseCode::from(code),
        reason: Cow::Owned(reason[..end].to_string()),
    }
}
