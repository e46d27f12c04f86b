//! Per-session driver task

use futures_util::{SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use termgate_api::{AuthRequest, ServerMessage};
use termgate_core::{AuthOutcome, CloseReason, Session, SessionError, TapEvent, mask_token};
use termgate_host_api::ShellEvent;
use termgate_store::AuditEventType;
use termgate_util::MonotonicInstant;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::SessionCommand;
use crate::server::{Shared, close_with};

/// Drives one session from handshake to teardown
pub(crate) struct SessionDriver {
    shared: Arc<Shared>,
    session: Session,
    ws: WebSocketStream<TcpStream>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    shell_events: Option<mpsc::UnboundedReceiver<ShellEvent>>,
}

impl SessionDriver {
    pub fn new(
        shared: Arc<Shared>,
        session: Session,
        ws: WebSocketStream<TcpStream>,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Self {
        Self {
            shared,
            session,
            ws,
            commands,
            shell_events: None,
        }
    }

    pub async fn run(mut self) {
        let reason = self.drive().await;
        self.finish(reason).await;
    }

    async fn drive(&mut self) -> CloseReason {
        let remaining = self
            .session
            .time_until_deadline(MonotonicInstant::now())
            .unwrap_or_default();
        let deadline = tokio::time::sleep(remaining);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline, if self.session.is_awaiting_auth() => {
                    if let Some(reason) = self.on_deadline(deadline.as_mut()).await {
                        return reason;
                    }
                }

                Some(command) = self.commands.recv() => {
                    match command {
                        SessionCommand::Input(text) => self.on_input(&text),
                        SessionCommand::Shutdown => return CloseReason::Shutdown,
                    }
                }

                event = next_shell_event(&mut self.shell_events) => {
                    if let Some(reason) = self.on_shell_event(event).await {
                        return reason;
                    }
                }

                frame = self.ws.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reason) = self.on_frame(text.as_str()).await {
                                return reason;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            let text = String::from_utf8_lossy(&data).into_owned();
                            if let Some(reason) = self.on_frame(&text).await {
                                return reason;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(
                                session_id = %self.session.id,
                                code = ?frame.as_ref().map(|f| u16::from(f.code)),
                                "Client sent close"
                            );
                            return CloseReason::ClientClosed;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(session_id = %self.session.id, error = %e, "Read error");
                            return CloseReason::ClientClosed;
                        }
                        None => return CloseReason::ClientClosed,
                    }
                }
            }
        }
    }

    async fn on_deadline(&mut self, deadline: Pin<&mut Sleep>) -> Option<CloseReason> {
        let now = MonotonicInstant::now();
        if !self.session.deadline_elapsed(now) {
            // Timer fired a hair early relative to the session clock
            if let Some(left) = self.session.time_until_deadline(now) {
                deadline.reset(Instant::now() + left);
            }
            return None;
        }

        self.timed_out().await;
        Some(SessionError::AuthTimeout.into())
    }

    async fn timed_out(&mut self) {
        warn!(
            session_id = %self.session.id,
            origin = %self.session.origin,
            "Authentication timeout"
        );
        self.shared.auditor.record(AuditEventType::AuthTimedOut {
            session_id: self.session.id.clone(),
            origin: self.session.origin,
        });
        let _ = self.send_message(&ServerMessage::auth_timeout()).await;
    }

    async fn on_frame(&mut self, payload: &str) -> Option<CloseReason> {
        if self.session.is_awaiting_auth() {
            return self.on_auth_frame(payload).await;
        }
        self.on_input(payload);
        None
    }

    async fn on_auth_frame(&mut self, payload: &str) -> Option<CloseReason> {
        let id = self.session.id.clone();
        let origin = self.session.origin;
        let auditor = self.shared.auditor.clone();

        let request = AuthRequest::from_frame(payload);
        auditor.record(AuditEventType::AuthAttempt {
            session_id: id.clone(),
            origin,
            structured: request.structured,
        });

        let now = MonotonicInstant::now();
        let outcome = self
            .session
            .submit_token(&self.shared.security, &request.token, now);

        match outcome {
            AuthOutcome::Accepted { no_auth } => {
                info!(session_id = %id, origin = %origin, no_auth, "Authentication succeeded");
                auditor.record(AuditEventType::AuthSucceeded {
                    session_id: id.clone(),
                    origin,
                    no_auth,
                });
                self.shared.registry.mark_authenticated(&id, now).await;

                let ack = if no_auth {
                    ServerMessage::auth_open(&id)
                } else {
                    ServerMessage::auth_success(&id)
                };
                if let Err(reason) = self.send_message(&ack).await {
                    return Some(reason);
                }
                self.spawn_shell().await
            }
            AuthOutcome::Rejected { failures } => {
                let token_hint = mask_token(&request.token);
                warn!(
                    session_id = %id,
                    origin = %origin,
                    failures,
                    token = %token_hint,
                    "Authentication failed"
                );
                auditor.record(AuditEventType::AuthFailed {
                    session_id: id,
                    origin,
                    failures,
                    token_hint,
                });
                let _ = self.send_message(&ServerMessage::auth_failed()).await;
                tokio::time::sleep(self.shared.security.failure_grace).await;
                Some(SessionError::AuthFailed.into())
            }
            AuthOutcome::Banned {
                failures,
                newly_banned,
            } => {
                let token_hint = mask_token(&request.token);
                auditor.record(AuditEventType::AuthFailed {
                    session_id: id.clone(),
                    origin,
                    failures,
                    token_hint,
                });
                if newly_banned {
                    let ban_seconds = self.shared.security.policy.ban_duration.as_secs();
                    warn!(origin = %origin, failures, ban_seconds, "Origin banned");
                    auditor.record(AuditEventType::OriginBanned {
                        session_id: id,
                        origin,
                        failures,
                        ban_seconds,
                    });
                }
                let _ = self.send_message(&ServerMessage::auth_failed()).await;
                Some(SessionError::Banned { on_connect: false }.into())
            }
            AuthOutcome::TimedOut => {
                self.timed_out().await;
                Some(SessionError::AuthTimeout.into())
            }
            AuthOutcome::Ignored => None,
        }
    }

    async fn spawn_shell(&mut self) -> Option<CloseReason> {
        let id = self.session.id.clone();
        let options = self.shared.spawn.clone();
        let program = options.program.clone();

        match self.shared.host.spawn(id.clone(), options).await {
            Ok(process) => {
                info!(
                    session_id = %id,
                    program = %program,
                    pid = ?process.handle.pid,
                    "Shell started"
                );
                self.shared.auditor.record(AuditEventType::ShellSpawned {
                    session_id: id,
                    program,
                    pid: process.handle.pid,
                });
                if self
                    .session
                    .attach_child(process.handle, process.control)
                {
                    self.shell_events = Some(process.events);
                }
                None
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Shell spawn failed");
                self.shared.auditor.record(AuditEventType::SpawnFailed {
                    session_id: id,
                    error: e.to_string(),
                });
                Some(SessionError::SpawnFailed(e.to_string()).into())
            }
        }
    }

    /// Relay input to the shell, auditing what it received
    fn on_input(&mut self, text: &str) {
        let events = match self.session.forward_input(text) {
            Ok(Some(events)) => events,
            Ok(None) => {
                debug!(session_id = %self.session.id, "Input dropped, no shell attached");
                return;
            }
            Err(e) => {
                warn!(session_id = %self.session.id, error = %e, "Failed to write to shell");
                return;
            }
        };

        for event in events {
            let session_id = self.session.id.clone();
            let event = match event {
                TapEvent::Command(line) => {
                    debug!(session_id = %session_id, command = %line, "Command");
                    AuditEventType::Command {
                        session_id,
                        origin: self.session.origin,
                        line,
                    }
                }
                TapEvent::ControlKey(key) => AuditEventType::ControlKey {
                    session_id,
                    key: key.to_string(),
                },
            };
            self.shared.auditor.record(event);
        }
    }

    async fn on_shell_event(&mut self, event: Option<ShellEvent>) -> Option<CloseReason> {
        match event {
            Some(ShellEvent::Output(chunk)) => {
                let text = match self.session.relay_output(&chunk) {
                    Some(data) => String::from_utf8_lossy(data).into_owned(),
                    None => return None,
                };
                self.send_text(text).await.err()
            }
            Some(ShellEvent::Exited(status)) => {
                self.shell_events = None;
                self.session.child_exited();
                info!(
                    session_id = %self.session.id,
                    code = ?status.code,
                    signal = ?status.signal,
                    "Shell exited"
                );
                self.shared.auditor.record(AuditEventType::ShellExited {
                    session_id: self.session.id.clone(),
                    code: status.code,
                    signal: status.signal.clone(),
                });
                let _ = self
                    .send_message(&ServerMessage::shell_exit(status.code, status.signal))
                    .await;
                Some(CloseReason::ShellExited)
            }
            None => {
                // Host dropped the channel without an exit notice
                self.shell_events = None;
                self.session.child_exited();
                Some(CloseReason::ShellExited)
            }
        }
    }

    async fn send_message(&mut self, message: &ServerMessage) -> Result<(), CloseReason> {
        match message.to_json() {
            Ok(json) => self.send_text(json).await,
            Err(e) => {
                warn!(session_id = %self.session.id, error = %e, "Failed to encode message");
                Ok(())
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), CloseReason> {
        if let Err(e) = self.ws.send(Message::Text(text.into())).await {
            debug!(session_id = %self.session.id, error = %e, "Send failed");
            if self.session.is_authenticated() {
                self.shared.auditor.record(AuditEventType::RelayError {
                    session_id: self.session.id.clone(),
                    error: e.to_string(),
                });
            }
            return Err(SessionError::RelayError(e.to_string()).into());
        }
        Ok(())
    }

    async fn finish(mut self, reason: CloseReason) {
        let authenticated = self.session.authenticated_at.is_some();
        let Some(teardown) = self.session.teardown(reason) else {
            return;
        };

        if teardown.killed.is_some() {
            self.shared.auditor.record(AuditEventType::ShellKilled {
                session_id: self.session.id.clone(),
            });
        }

        let code = teardown.reason.close_code();
        match teardown.reason {
            CloseReason::ClientClosed | CloseReason::Failed(SessionError::RelayError(_)) => {
                // Peer is gone or already closing; flush whatever reply is queued
                let _ = self.ws.close(None).await;
            }
            _ => close_with(&mut self.ws, code).await,
        }

        info!(
            session_id = %self.session.id,
            code = code.code(),
            authenticated,
            "Client disconnected"
        );
        self.shared.auditor.record(AuditEventType::Disconnected {
            session_id: self.session.id.clone(),
            origin: self.session.origin,
            code: code.code(),
            authenticated,
        });
        self.shared.registry.unregister(&self.session.id).await;
    }
}

async fn next_shell_event(
    events: &mut Option<mpsc::UnboundedReceiver<ShellEvent>>,
) -> Option<ShellEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
