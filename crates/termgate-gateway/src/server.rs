//! Listener and accept loop

use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use termgate_api::CloseCode;
use termgate_config::{Config, ShellConfig};
use termgate_core::{Auditor, SecurityContext, SecurityLedger, Session};
use termgate_host_api::{ShellHost, SpawnOptions};
use termgate_store::AuditEventType;
use termgate_util::{MonotonicInstant, SessionId};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, error, info, warn};

use crate::driver::SessionDriver;
use crate::{GatewayError, GatewayResult, SessionRegistry};

/// How long to wait for the peer to acknowledge a close frame
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// State shared by the accept loop and every session driver
pub(crate) struct Shared {
    pub security: SecurityContext,
    pub host: Arc<dyn ShellHost>,
    pub spawn: SpawnOptions,
    pub auditor: Auditor,
    pub registry: SessionRegistry,
    pub shutting_down: AtomicBool,
}

/// WebSocket gatekeeper
pub struct Gateway {
    listen_addr: SocketAddr,
    listener: Option<TcpListener>,
    shared: Arc<Shared>,
}

impl Gateway {
    pub fn new(
        config: &Config,
        ledger: Arc<SecurityLedger>,
        host: Arc<dyn ShellHost>,
        auditor: Auditor,
    ) -> Self {
        Self {
            listen_addr: config.server.socket_addr(),
            listener: None,
            shared: Arc::new(Shared {
                security: SecurityContext::new(&config.auth, ledger),
                host,
                spawn: spawn_options(&config.shell),
                auditor,
                registry: SessionRegistry::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Bind the listener
    pub async fn start(&mut self) -> GatewayResult<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!(addr = %listener.local_addr()?, "Gateway listening");
        self.listener = Some(listener);
        Ok(())
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> GatewayResult<SocketAddr> {
        let listener = self.listener.as_ref().ok_or(GatewayError::NotStarted)?;
        Ok(listener.local_addr()?)
    }

    pub fn registry(&self) -> SessionRegistry {
        self.shared.registry.clone()
    }

    pub fn ledger(&self) -> Arc<SecurityLedger> {
        self.shared.security.ledger.clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.security.gate.is_open()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> GatewayResult<()> {
        let listener = self.listener.as_ref().ok_or(GatewayError::NotStarted)?;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        on_connect(shared, stream, peer).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Close every live session with "going away" and wait up to `wait` for
    /// them to finish. Returns the number still registered afterwards.
    pub async fn shutdown(&self, wait: Duration) -> usize {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        let asked = self.shared.registry.shutdown_all().await;
        info!(sessions = asked, "Closing live sessions");

        let registry = &self.shared.registry;
        let drained = tokio::time::timeout(wait, async {
            while !registry.is_empty().await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        let remaining = registry.len().await;
        if drained.is_err() {
            warn!(remaining, "Sessions still open after shutdown wait");
        }
        remaining
    }
}

/// Spawn options for the configured shell
pub fn spawn_options(shell: &ShellConfig) -> SpawnOptions {
    SpawnOptions {
        program: shell.program.clone(),
        args: shell.args.clone(),
        cols: shell.cols,
        rows: shell.rows,
        cwd: Some(shell.cwd.clone()),
        env: shell.env.clone(),
    }
}

async fn on_connect(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let origin = peer.ip().to_canonical();

    // The auth deadline only exists once a session does, so the upgrade
    // gets the same budget
    let upgrade = tokio::time::timeout(shared.security.auth_timeout, accept_async(stream));
    let mut ws = match upgrade.await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            debug!(origin = %origin, error = %e, "WebSocket handshake failed");
            return;
        }
        Err(_) => {
            debug!(origin = %origin, "WebSocket upgrade timed out");
            return;
        }
    };

    if shared.security.ledger.is_banned(origin) {
        warn!(origin = %origin, "Rejected connection from banned origin");
        shared
            .auditor
            .record(AuditEventType::BannedOnConnect { origin });
        close_with(&mut ws, CloseCode::BannedOnConnect).await;
        return;
    }

    if shared.shutting_down.load(Ordering::SeqCst) {
        close_with(&mut ws, CloseCode::GoingAway).await;
        return;
    }

    let id = SessionId::new();
    let session = Session::new(
        id.clone(),
        origin,
        shared.security.auth_timeout,
        MonotonicInstant::now(),
    );
    let commands = shared.registry.register(id.clone(), origin).await;

    info!(session_id = %id, origin = %origin, "Client connected");
    shared.auditor.record(AuditEventType::ClientConnected {
        session_id: id,
        origin,
    });

    SessionDriver::new(shared, session, ws, commands).run().await;
}

/// Send a close frame and give the peer a moment to answer it
pub(crate) async fn close_with(ws: &mut WebSocketStream<TcpStream>, code: CloseCode) {
    let frame = CloseFrame {
        code: code.code().into(),
        reason: code.reason().into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!(error = %e, "Failed to send close frame");
        return;
    }
    let _ = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}
