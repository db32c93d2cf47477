//! Session lifecycle: one accepted WebSocket, at most one outbound TCP socket.
//!
//! A session runs as a single task. It waits for the handshake message,
//! resolves the destination, sends the ack, connects upstream and then hands
//! over to [`forwarder::relay`](crate::gateway::forwarder::relay), which runs
//! each direction as its own future. Every suspension point also watches the
//! liveness timer and the server shutdown broadcast, so dropping the session
//! future cancels whatever is in flight.

pub mod liveness;

pub use liveness::{LivenessMonitor, Pulse};

use crate::config::RelayConfig;
use crate::gateway::{forwarder, DohResolver};
use crate::handshake::HandshakeProcessor;
use crate::transport::websocket;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_core::{ack, close_code, RelayError, RelayResult};
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Upper bound on sending the final close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything a session needs that outlives it. Built once, shared by `Arc`.
#[derive(Debug)]
pub struct SessionContext {
    pub handshake: HandshakeProcessor,
    pub resolver: DohResolver,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl SessionContext {
    pub fn from_config(config: &RelayConfig) -> RelayResult<Self> {
        Ok(Self {
            handshake: HandshakeProcessor::new(config.client_id, config.address_table),
            resolver: DohResolver::new(&config.doh_server, config.doh_timeout)?,
            connect_timeout: config.connect_timeout,
            heartbeat_interval: config.heartbeat_interval,
        })
    }
}

/// Why a session ended. Decides the close frame sent to the client.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client closed the WebSocket or its stream ended.
    PeerClosed,
    /// The upstream TCP peer sent EOF.
    UpstreamClosed,
    /// A heartbeat ping went unanswered.
    PeerTimeout,
    /// The server is shutting down.
    Shutdown,
    Failed(RelayError),
}

impl From<RelayError> for SessionEnd {
    fn from(err: RelayError) -> Self {
        SessionEnd::Failed(err)
    }
}

impl SessionEnd {
    /// The close frame to send, or `None` when no close handshake is owed.
    pub fn close_frame(&self) -> Option<CloseFrame<'static>> {
        match self {
            SessionEnd::PeerClosed | SessionEnd::PeerTimeout => None,
            SessionEnd::UpstreamClosed => {
                Some(websocket::close_frame(close_code::NORMAL, "upstream closed"))
            }
            SessionEnd::Shutdown => Some(websocket::close_frame(
                close_code::GOING_AWAY,
                "server shutting down",
            )),
            SessionEnd::Failed(err) => {
                Some(websocket::close_frame(err.close_code(), &err.to_string()))
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SessionEnd::PeerClosed => "peer closed",
            SessionEnd::UpstreamClosed => "upstream closed",
            SessionEnd::PeerTimeout => "peer timeout",
            SessionEnd::Shutdown => "shutdown",
            SessionEnd::Failed(_) => "failed",
        }
    }
}

/// A live WebSocket session. Fields are split so `select!` branches can
/// borrow them independently.
pub struct Session<S> {
    pub(crate) id: u64,
    pub(crate) peer: SocketAddr,
    pub(crate) sink: SplitSink<WebSocketStream<S>, Message>,
    pub(crate) stream: SplitStream<WebSocketStream<S>>,
    pub(crate) liveness: LivenessMonitor,
    pub(crate) shutdown: broadcast::Receiver<()>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        id: u64,
        peer: SocketAddr,
        ws: WebSocketStream<S>,
        heartbeat_interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id,
            peer,
            sink,
            stream,
            liveness: LivenessMonitor::new(heartbeat_interval),
            shutdown,
        }
    }

    /// Handle a due liveness check: send a ping, or report the peer dead.
    pub(crate) async fn heartbeat(&mut self) -> Result<(), SessionEnd> {
        match self.liveness.on_tick() {
            Pulse::Send => self
                .sink
                .send(Message::Ping(Vec::new()))
                .await
                .map_err(|e| RelayError::Transport(format!("ping failed: {e}")).into()),
            Pulse::Dead => {
                debug!(conn_id = self.id, "pong overdue");
                Err(SessionEnd::PeerTimeout)
            }
        }
    }

    /// Wait for the first data message. Pings and pongs are handled on the way.
    async fn await_handshake(&mut self) -> Result<Vec<u8>, SessionEnd> {
        loop {
            tokio::select! {
                msg = self.stream.next() => match msg {
                    Some(Ok(Message::Binary(data))) => return Ok(data),
                    Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                    Some(Ok(Message::Pong(_))) => self.liveness.on_pong(),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => return Err(SessionEnd::PeerClosed),
                    Some(Err(e)) => {
                        return Err(RelayError::Transport(format!("WS read failed: {e}")).into())
                    }
                },
                _ = self.liveness.tick() => self.heartbeat().await?,
                _ = self.shutdown.recv() => return Err(SessionEnd::Shutdown),
            }
        }
    }

    /// Run `fut` while still answering the heartbeat and honoring shutdown.
    /// The WebSocket is not read meanwhile; early client data stays queued.
    pub(crate) async fn guarded<T, F>(&mut self, fut: F) -> Result<T, SessionEnd>
    where
        F: Future<Output = RelayResult<T>>,
    {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                result = &mut fut => return result.map_err(SessionEnd::from),
                _ = self.liveness.tick() => self.heartbeat().await?,
                _ = self.shutdown.recv() => return Err(SessionEnd::Shutdown),
            }
        }
    }

    async fn send_ack(&mut self, version: u8) -> Result<(), SessionEnd> {
        websocket::send_binary(&mut self.sink, &ack(version))
            .await
            .map_err(SessionEnd::from)
    }

    async fn drive(&mut self, ctx: &SessionContext) -> Result<SessionEnd, SessionEnd> {
        let message = self.await_handshake().await?;
        let request = ctx.handshake.parse(&message).map_err(|e| {
            warn!(conn_id = self.id, remote = %self.peer, error = %e, "handshake rejected");
            SessionEnd::from(e)
        })?;

        let destination = self
            .guarded(ctx.handshake.resolve(&request, &ctx.resolver))
            .await?;
        debug!(conn_id = self.id, destination = %destination, "destination resolved");

        self.send_ack(request.version).await?;

        let tcp = self
            .guarded(forwarder::connect(
                destination.socket_addr(),
                ctx.connect_timeout,
            ))
            .await?;
        info!(conn_id = self.id, destination = %destination, "upstream connected");

        let (end, stats) = forwarder::relay(self, tcp, request.payload(&message)).await;
        info!(
            conn_id = self.id,
            upstream_bytes = stats.upstream_bytes,
            downstream_bytes = stats.downstream_bytes,
            "relay finished"
        );
        Ok(end)
    }

    /// Send the close frame owed for `end` and release the transport.
    /// A client that stops reading gets at most [`CLOSE_TIMEOUT`].
    async fn finish(mut self, end: &SessionEnd) {
        let closing = async {
            match end.close_frame() {
                Some(frame) => {
                    let _ = self.sink.send(Message::Close(Some(frame))).await;
                    let _ = self.sink.close().await;
                }
                // Flushes the automatic reply to the client's close frame.
                None if matches!(end, SessionEnd::PeerClosed) => {
                    let _ = self.sink.close().await;
                }
                None => {}
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            debug!(conn_id = self.id, "close handshake timed out");
        }
    }
}

/// Drive one session to completion.
pub async fn run_session<S>(
    id: u64,
    peer: SocketAddr,
    ws: WebSocketStream<S>,
    ctx: &SessionContext,
    shutdown: broadcast::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let mut session = Session::new(id, peer, ws, ctx.heartbeat_interval, shutdown);
    debug!(conn_id = id, remote = %peer, "session started");

    let end = session.drive(ctx).await.unwrap_or_else(|end| end);

    match &end {
        SessionEnd::Failed(err) => warn!(
            conn_id = id,
            remote = %peer,
            error = %err,
            close_code = err.close_code(),
            "session failed"
        ),
        other => info!(
            conn_id = id,
            remote = %peer,
            reason = other.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "session closed"
        ),
    }

    session.finish(&end).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_follow_session_end() {
        let code = |end: SessionEnd| end.close_frame().map(|f| u16::from(f.code));
        assert_eq!(code(SessionEnd::UpstreamClosed), Some(1000));
        assert_eq!(code(SessionEnd::Shutdown), Some(1001));
        assert_eq!(code(SessionEnd::Failed(RelayError::IdentityMismatch)), Some(1002));
        assert_eq!(
            code(SessionEnd::Failed(RelayError::Resolution("nx".into()))),
            Some(4001)
        );
        assert_eq!(
            code(SessionEnd::Failed(RelayError::Upstream("refused".into()))),
            Some(4002)
        );
        assert_eq!(code(SessionEnd::PeerTimeout), None);
        assert_eq!(code(SessionEnd::PeerClosed), None);
    }

    #[test]
    fn relay_errors_convert_into_failures() {
        let end: SessionEnd = RelayError::Timeout.into();
        assert!(matches!(end, SessionEnd::Failed(RelayError::Timeout)));
        assert_eq!(end.label(), "failed");
    }
}
