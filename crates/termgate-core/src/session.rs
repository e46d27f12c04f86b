//! Session state machine

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use termgate_config::AuthConfig;
use termgate_host_api::{HostResult, ShellControl, ShellHandle};
use termgate_util::{MonotonicInstant, SessionId};
use tracing::{debug, warn};

use crate::{
    AuthGate, BanPolicy, CloseReason, CommandTap, FailureVerdict, SecurityLedger, SessionError,
    TapEvent, Verdict,
};

/// Everything a session consults while authenticating
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub gate: AuthGate,
    pub ledger: Arc<SecurityLedger>,
    pub policy: BanPolicy,
    pub auth_timeout: Duration,
    /// Delay between a failure ack and the close, so the ack reaches the peer
    pub failure_grace: Duration,
}

impl SecurityContext {
    pub fn new(auth: &AuthConfig, ledger: Arc<SecurityLedger>) -> Self {
        Self {
            gate: AuthGate::from_config(auth),
            ledger,
            policy: BanPolicy::from(auth),
            auth_timeout: auth.timeout,
            failure_grace: auth.failure_grace,
        }
    }
}

/// Authentication state of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    AwaitingAuth,
    Authenticated,
    Closed(CloseReason),
}

/// Result of handing a token to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted { no_auth: bool },
    /// Wrong token, below the ban threshold
    Rejected { failures: u32 },
    /// Wrong token and the origin is now banned
    Banned { failures: u32, newly_banned: bool },
    /// The deadline had already passed
    TimedOut,
    /// Not awaiting authentication; nothing happened
    Ignored,
}

/// The shell a session owns
struct ShellChild {
    handle: ShellHandle,
    control: Arc<dyn ShellControl>,
}

/// What teardown did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teardown {
    /// The reason the session closed (the first one recorded wins)
    pub reason: CloseReason,
    /// Shell that was killed, if one was still running
    pub killed: Option<ShellHandle>,
}

/// One accepted connection
pub struct Session {
    pub id: SessionId,
    pub origin: IpAddr,
    state: AuthState,
    pub auth_deadline: MonotonicInstant,
    pub authenticated_at: Option<MonotonicInstant>,
    child: Option<ShellChild>,
    child_attached: bool,
    tap: CommandTap,
    torn_down: bool,
}

impl Session {
    pub fn new(
        id: SessionId,
        origin: IpAddr,
        auth_timeout: Duration,
        now: MonotonicInstant,
    ) -> Self {
        Self {
            id,
            origin,
            state: AuthState::AwaitingAuth,
            auth_deadline: now + auth_timeout,
            authenticated_at: None,
            child: None,
            child_attached: false,
            tap: CommandTap::new(),
            torn_down: false,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_awaiting_auth(&self) -> bool {
        matches!(self.state, AuthState::AwaitingAuth)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, AuthState::Closed(_))
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        match &self.state {
            AuthState::Closed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Time left before the handshake deadline, while awaiting auth
    pub fn time_until_deadline(&self, now: MonotonicInstant) -> Option<Duration> {
        self.is_awaiting_auth()
            .then(|| self.auth_deadline.saturating_duration_until(now))
    }

    /// Handle a presented token. Only acts while awaiting authentication.
    pub fn submit_token(
        &mut self,
        ctx: &SecurityContext,
        token: &str,
        now: MonotonicInstant,
    ) -> AuthOutcome {
        if !self.is_awaiting_auth() {
            return AuthOutcome::Ignored;
        }

        if now >= self.auth_deadline {
            self.state = AuthState::Closed(SessionError::AuthTimeout.into());
            return AuthOutcome::TimedOut;
        }

        match ctx.gate.verify(token) {
            Verdict::Open | Verdict::Match => {
                let no_auth = ctx.gate.is_open();
                self.state = AuthState::Authenticated;
                self.authenticated_at = Some(now);
                debug!(session_id = %self.id, no_auth, "Session authenticated");
                AuthOutcome::Accepted { no_auth }
            }
            Verdict::Mismatch => {
                let verdict = ctx.ledger.register_failure(self.origin, &ctx.policy, now);
                match verdict {
                    FailureVerdict::Retry { failures } => {
                        self.state = AuthState::Closed(SessionError::AuthFailed.into());
                        AuthOutcome::Rejected { failures }
                    }
                    FailureVerdict::Banned {
                        failures,
                        newly_banned,
                        ..
                    } => {
                        self.state =
                            AuthState::Closed(SessionError::Banned { on_connect: false }.into());
                        AuthOutcome::Banned {
                            failures,
                            newly_banned,
                        }
                    }
                }
            }
        }
    }

    /// Fire the handshake deadline. Returns true if the session timed out;
    /// a no-op unless still awaiting authentication.
    pub fn deadline_elapsed(&mut self, now: MonotonicInstant) -> bool {
        if self.is_awaiting_auth() && now >= self.auth_deadline {
            self.state = AuthState::Closed(SessionError::AuthTimeout.into());
            true
        } else {
            false
        }
    }

    /// True once authenticated and before any shell has been attached
    pub fn needs_shell(&self) -> bool {
        self.is_authenticated() && !self.child_attached
    }

    /// Take ownership of the spawned shell.
    ///
    /// A session gets at most one shell. If the session is no longer
    /// authenticated, or already has had a shell, the new one is killed
    /// immediately and false is returned.
    pub fn attach_child(&mut self, handle: ShellHandle, control: Arc<dyn ShellControl>) -> bool {
        if !self.needs_shell() {
            warn!(session_id = %self.id, "Shell attached to a session that cannot own it");
            if let Err(e) = control.kill() {
                warn!(session_id = %self.id, error = %e, "Failed to kill orphaned shell");
            }
            return false;
        }
        self.child_attached = true;
        self.child = Some(ShellChild { handle, control });
        true
    }

    pub fn child(&self) -> Option<&ShellHandle> {
        self.child.as_ref().map(|c| &c.handle)
    }

    /// Gate shell output: chunks are only delivered once authenticated
    pub fn relay_output<'a>(&self, chunk: &'a [u8]) -> Option<&'a [u8]> {
        self.is_authenticated().then_some(chunk)
    }

    /// Forward input verbatim to the shell. Returns false if dropped.
    pub fn write_input(&self, data: &[u8]) -> HostResult<bool> {
        match (&self.state, &self.child) {
            (AuthState::Authenticated, Some(child)) => {
                child.control.write(data)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Forward input and, once the shell has taken it, feed the command tap.
    ///
    /// Returns `None` when the input was dropped; the tap never sees it.
    pub fn forward_input(&mut self, text: &str) -> HostResult<Option<Vec<TapEvent>>> {
        if !self.write_input(text.as_bytes())? {
            return Ok(None);
        }
        Ok(Some(self.tap.observe(text)))
    }

    /// The shell exited on its own; forget it without killing
    pub fn child_exited(&mut self) -> Option<ShellHandle> {
        self.child.take().map(|c| c.handle)
    }

    /// Enter `Closed` and kill the shell if one is running.
    ///
    /// Returns `None` if teardown already happened.
    pub fn teardown(&mut self, reason: CloseReason) -> Option<Teardown> {
        if self.torn_down {
            return None;
        }
        self.torn_down = true;

        let reason = match &self.state {
            AuthState::Closed(existing) => existing.clone(),
            _ => {
                self.state = AuthState::Closed(reason.clone());
                reason
            }
        };

        let killed = self.child.take().map(|child| {
            if let Err(e) = child.control.kill() {
                warn!(session_id = %self.id, error = %e, "Failed to kill shell");
            }
            child.handle
        });

        Some(Teardown { reason, killed })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("state", &self.state)
            .field("child", &self.child())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use termgate_host_api::{MockHost, ShellHost, SpawnOptions};

    const ORIGIN: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 9));
    const TOKEN: &str = "Sup3r$ecure!!";

    fn context(token: Option<&str>, max_failures: u32) -> SecurityContext {
        SecurityContext {
            gate: AuthGate::new(token),
            ledger: Arc::new(SecurityLedger::new()),
            policy: BanPolicy {
                max_failures,
                ban_duration: Duration::from_secs(300),
            },
            auth_timeout: Duration::from_secs(10),
            failure_grace: Duration::from_millis(500),
        }
    }

    fn session(ctx: &SecurityContext, now: MonotonicInstant) -> Session {
        Session::new(SessionId::new(), ORIGIN, ctx.auth_timeout, now)
    }

    #[test]
    fn correct_token_authenticates() {
        let ctx = context(Some(TOKEN), 5);
        let now = MonotonicInstant::now();
        let mut s = session(&ctx, now);

        assert_eq!(
            s.submit_token(&ctx, TOKEN, now),
            AuthOutcome::Accepted { no_auth: false }
        );
        assert!(s.is_authenticated());
        assert_eq!(s.authenticated_at, Some(now));
        assert!(s.needs_shell());
    }

    #[test]
    fn open_mode_accepts_without_token() {
        let ctx = context(None, 5);
        let now = MonotonicInstant::now();
        let mut s = session(&ctx, now);

        assert_eq!(
            s.submit_token(&ctx, "", now),
            AuthOutcome::Accepted { no_auth: true }
        );
        assert!(s.is_authenticated());
    }

    #[test]
    fn wrong_token_fails_and_counts() {
        let ctx = context(Some(TOKEN), 5);
        let now = MonotonicInstant::now();
        let mut s = session(&ctx, now);

        assert_eq!(
            s.submit_token(&ctx, "guess", now),
            AuthOutcome::Rejected { failures: 1 }
        );
        assert_eq!(
            s.close_reason().map(|r| r.close_code().code()),
            Some(4003)
        );
        assert_eq!(ctx.ledger.failure_count(ORIGIN, now), 1);
    }

    #[test]
    fn threshold_failure_bans() {
        let ctx = context(Some(TOKEN), 2);
        let now = MonotonicInstant::now();

        let mut first = session(&ctx, now);
        assert!(matches!(
            first.submit_token(&ctx, "nope", now),
            AuthOutcome::Rejected { failures: 1 }
        ));

        let mut second = session(&ctx, now);
        assert_eq!(
            second.submit_token(&ctx, "nope", now),
            AuthOutcome::Banned {
                failures: 2,
                newly_banned: true
            }
        );
        assert_eq!(
            second.close_reason().map(|r| r.close_code().code()),
            Some(4004)
        );
        assert!(ctx.ledger.is_banned_at(ORIGIN, now));
    }

    #[test]
    fn deadline_only_fires_while_awaiting() {
        let ctx = context(Some(TOKEN), 5);
        let t0 = MonotonicInstant::now();
        let mut s = session(&ctx, t0);

        assert!(!s.deadline_elapsed(t0));
        assert_eq!(s.time_until_deadline(t0), Some(ctx.auth_timeout));

        s.submit_token(&ctx, TOKEN, t0 + Duration::from_secs(1));
        assert!(!s.deadline_elapsed(t0 + ctx.auth_timeout));
        assert!(s.is_authenticated());
        assert_eq!(s.time_until_deadline(t0), None);
    }

    #[test]
    fn timeout_wins_when_first() {
        let ctx = context(Some(TOKEN), 5);
        let t0 = MonotonicInstant::now();
        let mut s = session(&ctx, t0);

        assert!(s.deadline_elapsed(t0 + ctx.auth_timeout));
        assert_eq!(
            s.close_reason().map(|r| r.close_code().code()),
            Some(4001)
        );
        assert_eq!(
            s.submit_token(&ctx, TOKEN, t0 + ctx.auth_timeout),
            AuthOutcome::Ignored
        );
    }

    #[test]
    fn late_token_times_out() {
        let ctx = context(Some(TOKEN), 5);
        let t0 = MonotonicInstant::now();
        let mut s = session(&ctx, t0);

        assert_eq!(
            s.submit_token(&ctx, TOKEN, t0 + ctx.auth_timeout),
            AuthOutcome::TimedOut
        );
        assert!(s.is_closed());
    }

    #[test]
    fn second_token_is_ignored() {
        let ctx = context(Some(TOKEN), 5);
        let now = MonotonicInstant::now();
        let mut s = session(&ctx, now);
        s.submit_token(&ctx, TOKEN, now);

        assert_eq!(s.submit_token(&ctx, "other", now), AuthOutcome::Ignored);
        assert_eq!(ctx.ledger.failure_count(ORIGIN, now), 0);
    }

    #[test]
    fn output_gated_on_auth() {
        let ctx = context(Some(TOKEN), 5);
        let now = MonotonicInstant::now();
        let mut s = session(&ctx, now);

        assert_eq!(s.relay_output(b"motd"), None);
        s.submit_token(&ctx, TOKEN, now);
        assert_eq!(s.relay_output(b"prompt$ "), Some(&b"prompt$ "[..]));
        s.teardown(CloseReason::ClientClosed);
        assert_eq!(s.relay_output(b"late"), None);
    }

    #[tokio::test]
    async fn teardown_kills_once() {
        let ctx = context(Some(TOKEN), 5);
        let host = MockHost::new();
        let now = MonotonicInstant::now();
        let mut s = session(&ctx, now);
        s.submit_token(&ctx, TOKEN, now);

        let process = host
            .spawn(s.id.clone(), SpawnOptions::default())
            .await
            .unwrap();
        assert!(s.attach_child(process.handle.clone(), process.control.clone()));
        assert!(!s.needs_shell());

        assert!(s.write_input(b"ls\r").unwrap());
        let shell = host.shell(&s.id).unwrap();
        assert_eq!(shell.written_string(), "ls\r");

        let first = s.teardown(CloseReason::ClientClosed).unwrap();
        assert_eq!(first.reason, CloseReason::ClientClosed);
        assert_eq!(first.killed, Some(process.handle));
        assert!(s.teardown(CloseReason::Shutdown).is_none());
        assert_eq!(shell.kill_count(), 1);
        assert!(!s.write_input(b"more").unwrap());
    }

    #[tokio::test]
    async fn only_delivered_input_is_tapped() {
        let ctx = context(Some(TOKEN), 5);
        let host = MockHost::new();
        let now = MonotonicInstant::now();
        let mut s = session(&ctx, now);

        assert_eq!(s.forward_input("id\r").unwrap(), None);
        s.submit_token(&ctx, TOKEN, now);
        // Authenticated but no shell attached yet
        assert_eq!(s.forward_input("rm -rf /tmp/x\r").unwrap(), None);

        let process = host
            .spawn(s.id.clone(), SpawnOptions::default())
            .await
            .unwrap();
        s.attach_child(process.handle, process.control);

        assert_eq!(
            s.forward_input("whoami\r").unwrap(),
            Some(vec![TapEvent::Command("whoami".into())])
        );
        assert_eq!(host.shell(&s.id).unwrap().written_string(), "whoami\r");

        s.teardown(CloseReason::ClientClosed);
        assert_eq!(s.forward_input("exit\r").unwrap(), None);
    }

    #[tokio::test]
    async fn exited_shell_is_not_killed() {
        let ctx = context(None, 5);
        let host = MockHost::new();
        let now = MonotonicInstant::now();
        let mut s = session(&ctx, now);
        s.submit_token(&ctx, "", now);

        let process = host
            .spawn(s.id.clone(), SpawnOptions::default())
            .await
            .unwrap();
        s.attach_child(process.handle.clone(), process.control);

        assert_eq!(s.child_exited(), Some(process.handle));
        let teardown = s.teardown(CloseReason::ShellExited).unwrap();
        assert_eq!(teardown.killed, None);
        assert_eq!(host.shell(&s.id).unwrap().kill_count(), 0);
    }

    #[tokio::test]
    async fn late_shell_is_killed() {
        let ctx = context(Some(TOKEN), 5);
        let host = MockHost::new();
        let now = MonotonicInstant::now();
        let mut s = session(&ctx, now);
        s.submit_token(&ctx, TOKEN, now);
        s.teardown(CloseReason::ClientClosed);

        let process = host
            .spawn(s.id.clone(), SpawnOptions::default())
            .await
            .unwrap();
        assert!(!s.attach_child(process.handle, process.control));
        assert_eq!(host.shell(&s.id).unwrap().kill_count(), 1);
    }

    #[test]
    fn teardown_keeps_first_reason() {
        let ctx = context(Some(TOKEN), 5);
        let now = MonotonicInstant::now();
        let mut s = session(&ctx, now);
        s.submit_token(&ctx, "wrong", now);

        let teardown = s.teardown(CloseReason::ClientClosed).unwrap();
        assert_eq!(teardown.reason, CloseReason::Failed(SessionError::AuthFailed));
    }
}
