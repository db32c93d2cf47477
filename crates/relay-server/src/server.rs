//! Accept loop: one task per TCP connection, graceful shutdown.

use crate::auth::{ConnectionGate, CHALLENGE};
use crate::config::RelayConfig;
use crate::page;
use crate::session::{run_session, SessionContext};
use crate::transport::{read_request_head, websocket, write_response, HeadError};
use relay_core::{RelayError, RelayResult};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// The relay server: listener plus everything sessions share.
pub struct RelayServer {
    config: Arc<RelayConfig>,
    listener: TcpListener,
    gate: ConnectionGate,
    sessions: Arc<SessionContext>,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
    next_conn_id: AtomicU64,
}

impl RelayServer {
    /// Bind the listening socket and build the shared session context.
    pub async fn bind(config: RelayConfig) -> RelayResult<Self> {
        let addr = SocketAddr::new(config.bind, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Transport(format!("bind {addr} failed: {e}")))?;

        let gate = ConnectionGate::from_config(&config);
        let sessions = Arc::new(SessionContext::from_config(&config)?);

        Ok(Self {
            config: Arc::new(config),
            listener,
            gate,
            sessions,
            shutdown_tx: broadcast::channel(1).0,
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` completes, then drain sessions.
    ///
    /// Sessions get the shutdown broadcast (and close with "going away");
    /// whatever is still running after the configured timeout is aborted.
    pub async fn run<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        let server = Arc::new(self);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        info!(
            addr = %server.local_addr()?,
            ws_path = %server.gate.expected_path(),
            doh = %server.sessions.resolver.endpoint(),
            gate_auth = server.config.gate_auth,
            "relay-server ready"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("received shutdown signal");
                    break;
                }
                accepted = server.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn_id = server.next_conn_id.fetch_add(1, Ordering::Relaxed);
                        let shutdown_rx = server.shutdown_tx.subscribe();
                        let srv = server.clone();
                        connections.spawn(async move {
                            srv.handle_connection(stream, peer, conn_id, shutdown_rx).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "TCP accept failed");
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "connection task panicked");
                        }
                    }
                }
            }
        }

        // Broadcast shutdown to all connected clients
        info!(active = connections.len(), "broadcasting shutdown to connected clients");
        let _ = server.shutdown_tx.send(());

        let drained = tokio::time::timeout(server.config.shutdown_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "shutdown timeout elapsed, aborting sessions"
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        info!("relay-server stopped");
        Ok(())
    }

    async fn handle_connection(
        self: Arc<Self>,
        mut stream: TcpStream,
        peer: SocketAddr,
        conn_id: u64,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let head = tokio::select! {
            head = tokio::time::timeout(self.config.head_timeout, read_request_head(&mut stream)) => head,
            _ = shutdown_rx.recv() => return,
        };

        let head = match head {
            Ok(head) => head,
            Err(_) => {
                debug!(
                    conn_id,
                    remote = %peer,
                    timeout_secs = self.config.head_timeout.as_secs(),
                    "request head timed out"
                );
                let _ = write_response(&mut stream, 408, "Request Timeout", &[], "").await;
                return;
            }
        };

        let head = match head {
            Ok(head) => head,
            Err(HeadError::Closed) => {
                debug!(conn_id, remote = %peer, "connection closed before request");
                return;
            }
            Err(HeadError::Io(e)) => {
                debug!(conn_id, remote = %peer, error = %e, "request read failed");
                return;
            }
            Err(e @ HeadError::TooLarge) => {
                debug!(conn_id, remote = %peer, error = %e, "rejecting request");
                let _ = write_response(
                    &mut stream,
                    431,
                    "Request Header Fields Too Large",
                    &[],
                    "",
                )
                .await;
                return;
            }
            Err(e @ HeadError::Malformed(_)) => {
                debug!(conn_id, remote = %peer, error = %e, "rejecting request");
                let _ = write_response(&mut stream, 400, "Bad Request", &[], "").await;
                return;
            }
        };

        if !head.is_websocket_upgrade() {
            if let Err(e) = page::serve(&self.config, &head, &mut stream).await {
                debug!(conn_id, remote = %peer, error = %e, "link page write failed");
            }
            return;
        }

        if let Err(rejection) = self.gate.check(&head) {
            warn!(
                conn_id,
                remote = %peer,
                path = %head.path(),
                reason = %rejection,
                "upgrade rejected"
            );
            let headers: &[(&str, &str)] = if rejection.wants_challenge() {
                &[("WWW-Authenticate", CHALLENGE)]
            } else {
                &[]
            };
            let _ = write_response(
                &mut stream,
                rejection.status(),
                rejection.reason_phrase(),
                headers,
                rejection.reason_phrase(),
            )
            .await;
            return;
        }

        let ws = match websocket::accept(head, stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(conn_id, remote = %peer, error = %e, "WebSocket handshake failed");
                return;
            }
        };
        info!(conn_id, remote = %peer, "WebSocket connection accepted");

        run_session(conn_id, peer, ws, &self.sessions, shutdown_rx).await;
    }
}
