//! Registry of live sessions

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use termgate_util::{MonotonicInstant, SessionId};
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::{GatewayError, GatewayResult};

/// Instructions delivered to a session's driver task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Treat as if the client had typed it
    Input(String),
    /// Close with "going away" and kill the shell
    Shutdown,
}

/// Which session a command is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    Id(SessionId),
    /// The most recently authenticated session
    Latest,
}

/// Public view of a registered session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub origin: IpAddr,
    pub authenticated: bool,
}

struct RegisteredSession {
    origin: IpAddr,
    authenticated_at: Option<MonotonicInstant>,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
}

/// Live sessions keyed by id. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, RegisteredSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session; the returned receiver feeds its driver
    pub async fn register(
        &self,
        id: SessionId,
        origin: IpAddr,
    ) -> mpsc::UnboundedReceiver<SessionCommand> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id,
            RegisteredSession {
                origin,
                authenticated_at: None,
                command_tx,
            },
        );
        command_rx
    }

    pub async fn mark_authenticated(&self, id: &SessionId, at: MonotonicInstant) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(id) {
            session.authenticated_at = Some(at);
        }
    }

    pub async fn unregister(&self, id: &SessionId) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(id).is_some() {
            debug!(session_id = %id, "Session unregistered");
        }
    }

    /// Resolve a target to a live authenticated session
    pub async fn find(&self, target: &SessionTarget) -> Option<SessionId> {
        let sessions = self.sessions.read().await;
        match target {
            SessionTarget::Id(id) => sessions
                .get(id)
                .filter(|s| s.authenticated_at.is_some())
                .map(|_| id.clone()),
            SessionTarget::Latest => sessions
                .iter()
                .filter_map(|(id, s)| s.authenticated_at.map(|at| (at, id)))
                .max_by_key(|(at, _)| *at)
                .map(|(_, id)| id.clone()),
        }
    }

    /// Write `command` followed by a carriage return to the target's shell
    pub async fn send_command(
        &self,
        target: &SessionTarget,
        command: &str,
    ) -> GatewayResult<SessionId> {
        let id = self
            .find(target)
            .await
            .ok_or(GatewayError::SessionNotFound)?;

        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(GatewayError::SessionNotFound)?;
        session
            .command_tx
            .send(SessionCommand::Input(format!("{}\r", command)))
            .map_err(|_| GatewayError::SessionClosed)?;

        Ok(id)
    }

    /// Ask every live session to close. Returns how many were asked.
    pub async fn shutdown_all(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.command_tx.send(SessionCommand::Shutdown).is_ok())
            .count()
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .map(|(id, s)| SessionInfo {
                id: id.clone(),
                origin: s.origin,
                authenticated: s.authenticated_at.is_some(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const ORIGIN: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn unauthenticated_sessions_are_not_targets() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        let _rx = registry.register(id.clone(), ORIGIN).await;

        assert_eq!(registry.find(&SessionTarget::Id(id.clone())).await, None);
        assert_eq!(registry.find(&SessionTarget::Latest).await, None);
        assert!(matches!(
            registry.send_command(&SessionTarget::Latest, "ls").await,
            Err(GatewayError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn latest_is_most_recently_authenticated() {
        let registry = SessionRegistry::new();
        let t0 = MonotonicInstant::now();
        let first = SessionId::new();
        let second = SessionId::new();
        let mut first_rx = registry.register(first.clone(), ORIGIN).await;
        let _second_rx = registry.register(second.clone(), ORIGIN).await;

        registry
            .mark_authenticated(&second, t0 + Duration::from_secs(1))
            .await;
        registry
            .mark_authenticated(&first, t0 + Duration::from_secs(2))
            .await;

        assert_eq!(registry.find(&SessionTarget::Latest).await, Some(first.clone()));

        let sent_to = registry
            .send_command(&SessionTarget::Latest, "uptime")
            .await
            .unwrap();
        assert_eq!(sent_to, first);
        assert_eq!(
            first_rx.recv().await,
            Some(SessionCommand::Input("uptime\r".into()))
        );
    }

    #[tokio::test]
    async fn shutdown_reaches_every_session() {
        let registry = SessionRegistry::new();
        let mut a = registry.register(SessionId::new(), ORIGIN).await;
        let mut b = registry.register(SessionId::new(), ORIGIN).await;

        assert_eq!(registry.shutdown_all().await, 2);
        assert_eq!(a.recv().await, Some(SessionCommand::Shutdown));
        assert_eq!(b.recv().await, Some(SessionCommand::Shutdown));
    }

    #[tokio::test]
    async fn unregister_removes() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        let _rx = registry.register(id.clone(), ORIGIN).await;
        assert_eq!(registry.len().await, 1);
        assert!(!registry.list().await[0].authenticated);

        registry.unregister(&id).await;
        assert!(registry.is_empty().await);
    }
}
