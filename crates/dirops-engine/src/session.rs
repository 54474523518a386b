//! Connection/session state machine.
//!
//! One [`SessionManager`] owns at most one live protocol handle. State lives behind a
//! synchronous mutex that is never held across an `.await`; the handle itself sits behind an
//! async mutex so that `disconnect` waits for an operation that has already reached the
//! directory and later operations observe the released handle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use dirops_core::credential::BindCredential;
use dirops_core::ids::SessionId;
use dirops_core::Error;
use dirops_ldap::{DirectoryAdapter, DirectoryEntry, DirectoryHandle};

use crate::Result;

type SharedHandle = Arc<tokio::sync::Mutex<Option<Box<dyn DirectoryHandle>>>>;

/// Lifecycle state of the engine's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connect has been attempted yet.
    Disconnected,
    /// A bind is in flight.
    Connecting,
    /// Bound and usable.
    Connected,
    /// The last connect attempt failed.
    Failed,
    /// Explicitly closed.
    Closed,
}

impl SessionState {
    /// Lower-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of the session.
///
/// `bound_identity` is the bind name only; the secret never leaves the credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Identifier of the connect attempt, absent before the first one.
    pub id: Option<SessionId>,
    /// Current state.
    pub state: SessionState,
    /// Controller of the current or last connect attempt.
    pub target_controller: Option<String>,
    /// Bind identity of the current or last connect attempt.
    pub bound_identity: Option<String>,
    /// When the bind succeeded.
    pub established_at: Option<DateTime<Utc>>,
    /// Why the last connect failed (only in [`SessionState::Failed`]).
    pub failure: Option<Error>,
}

impl Session {
    fn disconnected() -> Self {
        Self {
            id: None,
            state: SessionState::Disconnected,
            target_controller: None,
            bound_identity: None,
            established_at: None,
            failure: None,
        }
    }

    fn connecting(controller: &str, identity: &str) -> Self {
        Self {
            id: Some(SessionId::new_v4()),
            state: SessionState::Connecting,
            target_controller: Some(controller.to_string()),
            bound_identity: Some(identity.to_string()),
            established_at: None,
            failure: None,
        }
    }

    /// Returns true while the session can serve searches and mutations.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}

struct Inner {
    session: Session,
    handle: Option<SharedHandle>,
    generation: u64,
}

/// Owns the connection state machine and the single protocol handle.
pub struct SessionManager {
    adapter: Arc<dyn DirectoryAdapter>,
    inner: Mutex<Inner>,
}

impl SessionManager {
    /// Creates a manager in the `Disconnected` state.
    #[must_use]
    pub fn new(adapter: Arc<dyn DirectoryAdapter>) -> Self {
        Self {
            adapter,
            inner: Mutex::new(Inner {
                session: Session::disconnected(),
                handle: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds to `controller`, superseding a connected session if there is one.
    ///
    /// # Errors
    ///
    /// - [`Error::ConcurrentOperation`] if another connect is in flight, or a `disconnect`
    ///   landed while this one was binding.
    /// - [`Error::Connection`] (or another adapter error) if the bind fails; the session is
    ///   then `Failed` with the reason preserved.
    pub async fn connect(&self, controller: &str, credential: &BindCredential) -> Result<Session> {
        let (generation, superseded) = {
            let mut inner = self.lock();
            if inner.session.state == SessionState::Connecting {
                return Err(Error::ConcurrentOperation(
                    "a connect is already in progress".to_string(),
                ));
            }
            let superseded = inner.handle.take();
            inner.generation += 1;
            inner.session = Session::connecting(controller, credential.identity());
            (inner.generation, superseded)
        };

        if let Some(handle) = superseded {
            info!(controller, "Releasing previous session before reconnecting");
            release(handle).await;
        }

        debug!(controller, identity = credential.identity(), "Binding");
        let outcome = self.adapter.bind(controller, credential).await;

        let late = {
            let mut inner = self.lock();
            if inner.generation == generation && inner.session.state == SessionState::Connecting {
                return match outcome {
                    Ok(handle) => {
                        inner.session.state = SessionState::Connected;
                        inner.session.established_at = Some(Utc::now());
                        inner.handle = Some(Arc::new(tokio::sync::Mutex::new(Some(handle))));
                        info!(
                            controller,
                            identity = credential.identity(),
                            "Session established"
                        );
                        Ok(inner.session.clone())
                    }
                    Err(err) => {
                        inner.session.state = SessionState::Failed;
                        inner.session.failure = Some(err.clone());
                        warn!(controller, "Connect failed: {err}");
                        Err(err)
                    }
                };
            }
            outcome
        };

        if let Ok(mut handle) = late {
            if let Err(err) = handle.close().await {
                warn!(controller, "Failed to release late bind: {err}");
            }
        }
        Err(Error::ConcurrentOperation(
            "connect was interrupted by a disconnect".to_string(),
        ))
    }

    /// Closes the session and releases the handle. Valid from any state.
    ///
    /// Waits for a protocol call that already holds the handle; close failures are logged.
    pub async fn disconnect(&self) {
        let handle = {
            let mut inner = self.lock();
            inner.generation += 1;
            if inner.session.state != SessionState::Closed {
                info!(state = %inner.session.state, "Closing session");
            }
            inner.session.state = SessionState::Closed;
            inner.session.established_at = None;
            inner.session.failure = None;
            inner.handle.take()
        };

        if let Some(handle) = handle {
            release(handle).await;
        }
    }

    /// Current snapshot; never waits on protocol I/O.
    #[must_use]
    pub fn current(&self) -> Session {
        self.lock().session.clone()
    }

    /// Borrows the live handle for one or more protocol calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the session is `Connected`.
    pub fn lease(&self) -> Result<SessionLease> {
        let inner = self.lock();
        match (&inner.handle, inner.session.state) {
            (Some(handle), SessionState::Connected) => Ok(SessionLease {
                handle: Arc::clone(handle),
                generation: inner.generation,
            }),
            (_, state) => Err(not_connected(state)),
        }
    }
}

/// Access to the session handle, obtained from [`SessionManager::lease`].
///
/// A lease outliving a `disconnect` fails with [`Error::NotConnected`] on its next call.
pub struct SessionLease {
    handle: SharedHandle,
    generation: u64,
}

impl SessionLease {
    /// Identifies the session the lease belongs to; changes on every connect or disconnect.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Subtree search through the leased handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the session was released, or the adapter's error.
    pub async fn search(
        &self,
        base_dn: &str,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>> {
        let mut guard = self.handle.lock().await;
        let handle = guard.as_mut().ok_or_else(released)?;
        handle.search(base_dn, filter, attributes).await
    }

    /// Adds a member through the leased handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the session was released, or the adapter's error.
    pub async fn modify_add_member(&self, group_dn: &str, user_dn: &str) -> Result<()> {
        let mut guard = self.handle.lock().await;
        let handle = guard.as_mut().ok_or_else(released)?;
        handle.modify_add_member(group_dn, user_dn).await
    }
}

async fn release(handle: SharedHandle) {
    let mut guard = handle.lock().await;
    if let Some(mut handle) = guard.take() {
        match handle.close().await {
            Ok(()) => debug!("Directory handle closed"),
            Err(err) => warn!("Failed to close directory handle: {err}"),
        }
    }
}

fn not_connected(state: SessionState) -> Error {
    Error::NotConnected(format!("session is {state}"))
}

fn released() -> Error {
    Error::NotConnected("session was closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dirops_core::ConnectFailure;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Counters {
        binds: AtomicUsize,
        closes: AtomicUsize,
    }

    struct StubHandle {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl DirectoryHandle for StubHandle {
        async fn search(
            &mut self,
            _base_dn: &str,
            _filter: &str,
            _attributes: &[&'static str],
        ) -> Result<Vec<DirectoryEntry>> {
            Ok(vec![DirectoryEntry::new("CN=User,DC=example")])
        }

        async fn modify_add_member(&mut self, _group_dn: &str, _user_dn: &str) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            Err(Error::Directory {
                operation: "unbind".to_string(),
                message: "connection reset".to_string(),
            })
        }
    }

    /// Binds succeed unless the controller is `down`; with a gate the bind waits for it.
    struct StubAdapter {
        counters: Arc<Counters>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl DirectoryAdapter for StubAdapter {
        async fn bind(
            &self,
            controller: &str,
            _credential: &BindCredential,
        ) -> Result<Box<dyn DirectoryHandle>> {
            self.counters.binds.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if controller == "down" {
                return Err(Error::connection(
                    ConnectFailure::Unreachable,
                    "controller `down` is unreachable",
                ));
            }
            Ok(Box::new(StubHandle {
                counters: Arc::clone(&self.counters),
            }))
        }
    }

    fn manager(gate: Option<Arc<Notify>>) -> (Arc<SessionManager>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let adapter = StubAdapter {
            counters: Arc::clone(&counters),
            gate,
        };
        (Arc::new(SessionManager::new(Arc::new(adapter))), counters)
    }

    fn credential() -> BindCredential {
        BindCredential::from_password("EXAMPLE\\operator", "secret")
    }

    #[tokio::test]
    async fn connect_then_disconnect() {
        let (sessions, counters) = manager(None);
        assert_eq!(sessions.current().state, SessionState::Disconnected);
        assert!(matches!(sessions.lease(), Err(Error::NotConnected(_))));

        let session = sessions.connect("dc1", &credential()).await.unwrap();
        assert_eq!(session.state, SessionState::Connected);
        assert_eq!(session.target_controller.as_deref(), Some("dc1"));
        assert_eq!(session.bound_identity.as_deref(), Some("EXAMPLE\\operator"));
        assert!(session.established_at.is_some());

        let lease = sessions.lease().unwrap();
        assert_eq!(lease.search("DC=example", "(cn=*)", &["cn"]).await.unwrap().len(), 1);

        sessions.disconnect().await;
        assert_eq!(sessions.current().state, SessionState::Closed);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            lease.modify_add_member("CN=G,DC=example", "CN=U,DC=example").await,
            Err(Error::NotConnected(_))
        ));

        sessions.disconnect().await;
        assert_eq!(sessions.current().state, SessionState::Closed);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_connect_preserves_reason_and_allows_retry() {
        let (sessions, _) = manager(None);
        let err = sessions.connect("down", &credential()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Connection {
                reason: ConnectFailure::Unreachable,
                ..
            }
        ));

        let session = sessions.current();
        assert_eq!(session.state, SessionState::Failed);
        assert_eq!(session.failure, Some(err));

        let session = sessions.connect("dc1", &credential()).await.unwrap();
        assert_eq!(session.state, SessionState::Connected);
        assert!(session.failure.is_none());
    }

    #[tokio::test]
    async fn reconnect_supersedes_connected_session() {
        let (sessions, counters) = manager(None);
        let first = sessions.connect("dc1", &credential()).await.unwrap();
        let stale = sessions.lease().unwrap();

        let second = sessions.connect("dc2", &credential()).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.target_controller.as_deref(), Some("dc2"));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(stale.generation() < sessions.lease().unwrap().generation());
        assert!(matches!(
            stale.search("DC=example", "(cn=*)", &["cn"]).await,
            Err(Error::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_connect_is_rejected() {
        let gate = Arc::new(Notify::new());
        let (sessions, counters) = manager(Some(Arc::clone(&gate)));

        let pending = {
            let sessions = Arc::clone(&sessions);
            tokio::spawn(async move { sessions.connect("dc1", &credential()).await })
        };
        while counters.binds.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sessions.current().state, SessionState::Connecting);

        let err = sessions.connect("dc2", &credential()).await.unwrap_err();
        assert!(matches!(err, Error::ConcurrentOperation(_)));
        assert_eq!(counters.binds.load(Ordering::SeqCst), 1);

        gate.notify_one();
        let session = pending.await.unwrap().unwrap();
        assert_eq!(session.target_controller.as_deref(), Some("dc1"));
    }

    #[tokio::test]
    async fn disconnect_during_connect_wins() {
        let gate = Arc::new(Notify::new());
        let (sessions, counters) = manager(Some(Arc::clone(&gate)));

        let pending = {
            let sessions = Arc::clone(&sessions);
            tokio::spawn(async move { sessions.connect("dc1", &credential()).await })
        };
        while counters.binds.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        sessions.disconnect().await;
        gate.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConcurrentOperation(_)));
        assert_eq!(sessions.current().state, SessionState::Closed);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(sessions.lease().is_err());
    }
}
