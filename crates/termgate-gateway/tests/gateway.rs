//! End-to-end gateway tests over real sockets with a mock shell host

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use termgate_config::Config;
use termgate_core::{Auditor, SecurityLedger};
use termgate_gateway::{Gateway, SessionTarget};
use termgate_host_api::{ExitStatus, MockHost, MockShell};
use termgate_store::{AuditEventType, MemoryAuditSink};
use termgate_util::SessionId;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const TOKEN: &str = "Sup3r$ecure!!";
const STEP: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: SocketAddr,
    gateway: Arc<Gateway>,
    host: Arc<MockHost>,
    audit: Arc<MemoryAuditSink>,
    spawns: mpsc::UnboundedReceiver<SessionId>,
}

impl Harness {
    async fn start(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.server.bind = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.server.port = 0;
        config.auth.token = Some(TOKEN.to_string());
        config.auth.failure_grace = Duration::from_millis(20);
        configure(&mut config);

        let host = Arc::new(MockHost::new());
        let spawns = host.subscribe_spawns();
        let audit = Arc::new(MemoryAuditSink::new());

        let mut gateway = Gateway::new(
            &config,
            Arc::new(SecurityLedger::new()),
            host.clone(),
            Auditor::new(audit.clone()),
        );
        gateway.start().await.unwrap();
        let addr = gateway.local_addr().unwrap();

        let gateway = Arc::new(gateway);
        let runner = gateway.clone();
        tokio::spawn(async move {
            let _ = runner.run().await;
        });

        Self {
            addr,
            gateway,
            host,
            audit,
            spawns,
        }
    }

    async fn connect(&self) -> Client {
        let (ws, _) = connect_async(format!("ws://{}", self.addr))
            .await
            .expect("Failed to connect to gateway");
        ws
    }

    /// Connect, authenticate and return the client with its shell
    async fn authenticated(&mut self) -> (Client, SessionId, Arc<MockShell>) {
        let mut ws = self.connect().await;
        send_auth(&mut ws, TOKEN).await;
        let ack = recv_json(&mut ws).await;
        assert_eq!(ack["status"], "success");

        let id = SessionId::from_str(ack["sessionId"].as_str().unwrap()).unwrap();
        let spawned = tokio::time::timeout(STEP, self.spawns.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spawned, id);
        let shell = self.host.shell(&id).unwrap();
        (ws, id, shell)
    }

    fn audit_count(&self, pred: impl Fn(&AuditEventType) -> bool) -> usize {
        self.audit.count_where(pred)
    }
}

async fn send_auth(ws: &mut Client, token: &str) {
    let frame = json!({ "type": "auth", "token": token }).to_string();
    ws.send(Message::Text(frame.into())).await.unwrap();
}

async fn recv(ws: &mut Client) -> Message {
    tokio::time::timeout(STEP, ws.next())
        .await
        .expect("Timed out waiting for a message")
        .expect("Stream ended")
        .expect("Read error")
}

async fn recv_json(ws: &mut Client) -> Value {
    match recv(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("Expected text frame, got {:?}", other),
    }
}

async fn recv_close(ws: &mut Client) -> u16 {
    match recv(ws).await {
        Message::Close(Some(frame)) => u16::from(frame.code),
        other => panic!("Expected close frame, got {:?}", other),
    }
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + STEP;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "Timed out: {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn successful_session_relays_both_ways() {
    let mut h = Harness::start(|_| {}).await;
    let (mut ws, id, shell) = h.authenticated().await;

    ws.send(Message::Text("ls -la\r".into())).await.unwrap();
    eventually("input reaches shell", || shell.written_string() == "ls -la\r").await;

    shell.emit_output("total 0\r\n");
    match recv(&mut ws).await {
        Message::Text(text) => assert_eq!(text.as_str(), "total 0\r\n"),
        other => panic!("Expected output, got {:?}", other),
    }

    shell.simulate_exit(ExitStatus::with_code(0));
    let exit = recv_json(&mut ws).await;
    assert_eq!(exit, json!({ "type": "shell_exit", "exitCode": 0, "signal": null }));
    assert_eq!(recv_close(&mut ws).await, 1000);

    eventually("session unregistered", || {
        h.audit_count(|e| matches!(e, AuditEventType::Disconnected { .. })) == 1
    })
    .await;
    assert_eq!(shell.kill_count(), 0);
    assert_eq!(
        h.audit_count(|e| matches!(
            e,
            AuditEventType::Command { session_id, line, .. } if session_id == &id && line == "ls -la"
        )),
        1
    );
    assert!(h.gateway.registry().is_empty().await);
}

#[tokio::test]
async fn open_mode_accepts_anything() {
    let mut h = Harness::start(|config| config.auth.token = None).await;
    let mut ws = h.connect().await;

    ws.send(Message::Text("hello".into())).await.unwrap();
    let ack = recv_json(&mut ws).await;
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["noAuth"], true);

    let spawned = tokio::time::timeout(STEP, h.spawns.recv()).await.unwrap();
    assert!(spawned.is_some());
    assert_eq!(
        h.audit_count(|e| matches!(e, AuditEventType::AuthSucceeded { no_auth: true, .. })),
        1
    );
}

#[tokio::test]
async fn bare_payload_is_the_token() {
    let h = Harness::start(|_| {}).await;
    let mut ws = h.connect().await;

    ws.send(Message::Text(format!("  {}\n", TOKEN).into()))
        .await
        .unwrap();
    let ack = recv_json(&mut ws).await;
    assert_eq!(ack["status"], "success");
    assert!(ack.get("noAuth").is_none());
    assert_eq!(
        h.audit_count(|e| matches!(e, AuditEventType::AuthAttempt { structured: false, .. })),
        1
    );
}

#[tokio::test]
async fn wrong_token_fails_after_ack() {
    let h = Harness::start(|_| {}).await;
    let mut ws = h.connect().await;

    send_auth(&mut ws, "hunter2hunter2").await;
    let ack = recv_json(&mut ws).await;
    assert_eq!(ack["type"], "auth");
    assert_eq!(ack["status"], "failed");
    assert_eq!(recv_close(&mut ws).await, 4003);

    assert_eq!(h.host.spawn_count(), 0);
    assert_eq!(
        h.audit_count(|e| matches!(
            e,
            AuditEventType::AuthFailed { failures: 1, token_hint, .. } if token_hint == "hunt****"
        )),
        1
    );
}

#[tokio::test]
async fn repeated_failures_ban_the_origin() {
    let h = Harness::start(|config| config.auth.max_failures = 5).await;

    for _ in 0..4 {
        let mut ws = h.connect().await;
        send_auth(&mut ws, "wrong").await;
        assert_eq!(recv_json(&mut ws).await["status"], "failed");
        assert_eq!(recv_close(&mut ws).await, 4003);
    }

    let mut ws = h.connect().await;
    send_auth(&mut ws, "wrong").await;
    assert_eq!(recv_json(&mut ws).await["status"], "failed");
    assert_eq!(recv_close(&mut ws).await, 4004);

    // Refused before any handshake; even the right token is never read
    let mut ws = h.connect().await;
    assert_eq!(recv_close(&mut ws).await, 4005);

    assert!(h.gateway.ledger().is_banned(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    assert_eq!(
        h.audit_count(|e| matches!(e, AuditEventType::OriginBanned { failures: 5, .. })),
        1
    );
    assert_eq!(
        h.audit_count(|e| matches!(e, AuditEventType::BannedOnConnect { .. })),
        1
    );
    assert_eq!(
        h.audit_count(|e| matches!(e, AuditEventType::ClientConnected { .. })),
        5
    );
}

#[tokio::test]
async fn silent_client_times_out() {
    let h = Harness::start(|config| config.auth.timeout = Duration::from_millis(50)).await;
    let mut ws = h.connect().await;

    let ack = recv_json(&mut ws).await;
    assert_eq!(ack["type"], "auth");
    assert_eq!(ack["status"], "timeout");
    assert_eq!(recv_close(&mut ws).await, 4001);
    assert_eq!(
        h.audit_count(|e| matches!(e, AuditEventType::AuthTimedOut { .. })),
        1
    );
}

#[tokio::test]
async fn stalled_upgrade_is_dropped_within_auth_timeout() {
    let h = Harness::start(|config| config.auth.timeout = Duration::from_millis(50)).await;
    let mut raw = TcpStream::connect(h.addr).await.unwrap();

    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(2), raw.read(&mut buf)).await;
    assert!(
        matches!(read, Ok(Ok(0)) | Ok(Err(_))),
        "connection still open: {:?}",
        read
    );
    assert_eq!(
        h.audit_count(|e| matches!(e, AuditEventType::ClientConnected { .. })),
        0
    );
    assert!(h.gateway.registry().is_empty().await);
}

#[tokio::test]
async fn authenticated_session_never_times_out() {
    let mut h = Harness::start(|config| config.auth.timeout = Duration::from_millis(100)).await;
    let (mut ws, _, _shell) = h.authenticated().await;

    let quiet = tokio::time::timeout(Duration::from_millis(400), ws.next()).await;
    assert!(quiet.is_err(), "unexpected frame: {:?}", quiet);
}

#[tokio::test]
async fn registry_commands_are_typed_into_the_latest_session() {
    let mut h = Harness::start(|_| {}).await;
    let (_ws, id, shell) = h.authenticated().await;

    let target = h
        .gateway
        .registry()
        .send_command(&SessionTarget::Latest, "uptime")
        .await
        .unwrap();
    assert_eq!(target, id);

    eventually("command reaches shell", || shell.written_string() == "uptime\r").await;
    eventually("command audited", || {
        h.audit_count(|e| matches!(e, AuditEventType::Command { line, .. } if line == "uptime"))
            == 1
    })
    .await;
}

#[tokio::test]
async fn shutdown_closes_sessions_and_kills_shells() {
    let mut h = Harness::start(|_| {}).await;
    let (mut ws, _, shell) = h.authenticated().await;

    let gateway = h.gateway.clone();
    let shutdown = tokio::spawn(async move { gateway.shutdown(Duration::from_secs(3)).await });

    assert_eq!(recv_close(&mut ws).await, 1001);
    assert_eq!(shutdown.await.unwrap(), 0);
    assert_eq!(shell.kill_count(), 1);
    assert_eq!(
        h.audit_count(|e| matches!(e, AuditEventType::ShellKilled { .. })),
        1
    );
}

#[tokio::test]
async fn client_disconnect_kills_shell() {
    let mut h = Harness::start(|_| {}).await;
    let (mut ws, _, shell) = h.authenticated().await;

    ws.close(None).await.unwrap();
    eventually("shell killed", || shell.kill_count() == 1).await;
    eventually("disconnect audited", || {
        h.audit_count(|e| {
            matches!(
                e,
                AuditEventType::Disconnected {
                    code: 1000,
                    authenticated: true,
                    ..
                }
            )
        }) == 1
    })
    .await;
}

#[tokio::test]
async fn spawn_failure_closes_with_internal_error() {
    let h = Harness::start(|_| {}).await;
    h.host.set_fail_spawn(true);
    let mut ws = h.connect().await;

    send_auth(&mut ws, TOKEN).await;
    assert_eq!(recv_json(&mut ws).await["status"], "success");
    assert_eq!(recv_close(&mut ws).await, 1011);
    assert_eq!(
        h.audit_count(|e| matches!(e, AuditEventType::SpawnFailed { .. })),
        1
    );
}
