//! Outbound TCP: connect to the resolved destination and pipe bytes.

use crate::session::{LivenessMonitor, Pulse, Session, SessionEnd};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_core::{RelayError, RelayResult};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// Read buffer for the upstream socket; one WebSocket message per read.
const READ_BUF_SIZE: usize = 16 * 1024;

/// Byte counters for one bridged session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to upstream, including the inline handshake payload.
    pub upstream_bytes: u64,
    /// Upstream to client.
    pub downstream_bytes: u64,
}

/// Connect to `addr`, giving up after `timeout`.
pub async fn connect(addr: SocketAddr, timeout: Duration) -> RelayResult<TcpStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(addr = %addr, error = %e, "TCP connect failed");
            return Err(RelayError::Upstream(format!("connect to {addr} failed: {e}")));
        }
        Err(_) => {
            warn!(addr = %addr, timeout_secs = timeout.as_secs(), "TCP connect timed out");
            return Err(RelayError::Upstream(format!("connect to {addr} timed out")));
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(addr = %addr, error = %e, "set_nodelay failed");
    }
    Ok(stream)
}

/// Bridge the session's WebSocket with `tcp` until either side ends.
///
/// `first_payload` (the bytes that trailed the handshake) is written before
/// anything read from the WebSocket. Each direction runs as its own future so
/// a write stalled by a slow reader never holds up the others:
/// - **WS→TCP**: binary and text payloads are written verbatim.
/// - **TCP→WS**: each read becomes one binary message; pings share this sink.
/// - **Supervisor**: liveness ticks and the shutdown broadcast.
pub(crate) async fn relay<S>(
    session: &mut Session<S>,
    tcp: TcpStream,
    first_payload: &[u8],
) -> (SessionEnd, RelayStats)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let conn_id = session.id;
    let (tcp_r, tcp_w) = tcp.into_split();
    let upstream_bytes = AtomicU64::new(0);
    let downstream_bytes = AtomicU64::new(0);
    let ping_due = Notify::new();
    let pong_seen = Notify::new();

    let end = tokio::select! {
        end = client_to_upstream(
            conn_id,
            &mut session.stream,
            tcp_w,
            first_payload,
            &pong_seen,
            &upstream_bytes,
        ) => end,
        end = upstream_to_client(
            conn_id,
            tcp_r,
            &mut session.sink,
            &ping_due,
            &downstream_bytes,
        ) => end,
        end = supervise(
            conn_id,
            &mut session.liveness,
            &mut session.shutdown,
            &ping_due,
            &pong_seen,
        ) => end,
    };

    let stats = RelayStats {
        upstream_bytes: upstream_bytes.load(Ordering::Relaxed),
        downstream_bytes: downstream_bytes.load(Ordering::Relaxed),
    };
    (end, stats)
}

async fn client_to_upstream<S>(
    conn_id: u64,
    ws_rx: &mut SplitStream<WebSocketStream<S>>,
    mut tcp_w: OwnedWriteHalf,
    first_payload: &[u8],
    pong_seen: &Notify,
    bytes: &AtomicU64,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !first_payload.is_empty() {
        if let Err(e) = tcp_w.write_all(first_payload).await {
            warn!(conn_id, error = %e, "TCP write error");
            return SessionEnd::Failed(RelayError::Upstream(format!("write failed: {e}")));
        }
        bytes.fetch_add(first_payload.len() as u64, Ordering::Relaxed);
    }

    loop {
        let data = match ws_rx.next().await {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Pong(_))) => {
                pong_seen.notify_one();
                continue;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                debug!(conn_id, "client closed WebSocket");
                let _ = tcp_w.shutdown().await;
                return SessionEnd::PeerClosed;
            }
            Some(Err(e)) => {
                return SessionEnd::Failed(RelayError::Transport(format!("WS read failed: {e}")));
            }
        };
        if let Err(e) = tcp_w.write_all(&data).await {
            warn!(conn_id, error = %e, "TCP write error");
            return SessionEnd::Failed(RelayError::Upstream(format!("write failed: {e}")));
        }
        bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
    }
}

async fn upstream_to_client<S>(
    conn_id: u64,
    mut tcp_r: OwnedReadHalf,
    ws_tx: &mut SplitSink<WebSocketStream<S>, Message>,
    ping_due: &Notify,
    bytes: &AtomicU64,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let (message, len) = tokio::select! {
            result = tcp_r.read(&mut buf) => match result {
                Ok(0) => {
                    debug!(conn_id, "TCP peer closed connection");
                    return SessionEnd::UpstreamClosed;
                }
                Ok(n) => (Message::Binary(buf[..n].to_vec()), n),
                Err(e) => {
                    warn!(conn_id, error = %e, "TCP read error");
                    return SessionEnd::Failed(RelayError::Upstream(format!("read failed: {e}")));
                }
            },
            _ = ping_due.notified() => (Message::Ping(Vec::new()), 0),
        };
        if let Err(e) = ws_tx.send(message).await {
            return SessionEnd::Failed(RelayError::Transport(format!("WS send failed: {e}")));
        }
        bytes.fetch_add(len as u64, Ordering::Relaxed);
    }
}

/// Drive the heartbeat and watch for shutdown. A ping that cannot go out
/// because the sink is stalled still counts as unanswered.
async fn supervise(
    conn_id: u64,
    liveness: &mut LivenessMonitor,
    shutdown: &mut broadcast::Receiver<()>,
    ping_due: &Notify,
    pong_seen: &Notify,
) -> SessionEnd {
    loop {
        tokio::select! {
            _ = liveness.tick() => match liveness.on_tick() {
                Pulse::Send => ping_due.notify_one(),
                Pulse::Dead => {
                    debug!(conn_id, "pong overdue");
                    return SessionEnd::PeerTimeout;
                }
            },
            _ = pong_seen.notified() => liveness.on_pong(),
            _ = shutdown.recv() => return SessionEnd::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().1 });

        let stream = connect(addr, Duration::from_secs(5)).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert!(stream.nodelay().unwrap());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connect_is_upstream_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(addr, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
        assert_eq!(err.close_code(), relay_core::close_code::UPSTREAM_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_ping_ends_supervision_after_two_periods() {
        let mut liveness = LivenessMonitor::new(Duration::from_secs(30));
        let (_tx, mut shutdown) = broadcast::channel(1);
        let (ping_due, pong_seen) = (Notify::new(), Notify::new());
        let started = tokio::time::Instant::now();

        let end = supervise(1, &mut liveness, &mut shutdown, &ping_due, &pong_seen).await;
        assert!(matches!(end, SessionEnd::PeerTimeout));
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_supervision_running_until_shutdown() {
        let mut liveness = LivenessMonitor::new(Duration::from_secs(30));
        let (tx, mut shutdown) = broadcast::channel(1);
        let (ping_due, pong_seen) = (Notify::new(), Notify::new());

        let peer = async {
            for _ in 0..3 {
                ping_due.notified().await;
                pong_seen.notify_one();
            }
            let _ = tx.send(());
        };
        let (end, ()) = tokio::join!(
            supervise(1, &mut liveness, &mut shutdown, &ping_due, &pong_seen),
            peer
        );
        assert!(matches!(end, SessionEnd::Shutdown));
    }
}
