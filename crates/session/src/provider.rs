//! Authentication provider boundary.
//!
//! The provider is the external identity system: it knows who is currently
//! signed in and emits a change event on sign-in, token refresh, and
//! sign-out. Consumers must subscribe **before** reading the current
//! snapshot so no event can slip between check and subscribe.

use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;

use campus_auth::Principal;

/// Kind of provider auth event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    TokenRefreshed,
    SignedOut,
}

/// A provider state change: the event kind plus the principal now in effect
/// (`None` on sign-out / expired session).
pub type AuthChange = (AuthEvent, Option<Principal>);

/// Authentication provider contract.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    /// Current principal snapshot, if a session exists.
    async fn current_principal(&self) -> Option<Principal>;

    /// Subscribe to the change stream. Dropping the receiver releases the
    /// subscription.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;

    /// Terminate the current session. Emits a `SignedOut` change.
    async fn sign_out(&self);
}

/// In-memory auth provider for tests/dev.
///
/// Test code drives it through [`sign_in`](InMemoryAuthProvider::sign_in) /
/// [`refresh`](InMemoryAuthProvider::refresh) / `sign_out`.
#[derive(Debug)]
pub struct InMemoryAuthProvider {
    current: RwLock<Option<Principal>>,
    tx: broadcast::Sender<AuthChange>,
}

impl InMemoryAuthProvider {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            current: RwLock::new(None),
            tx,
        }
    }

    /// Start with an existing session (provider restored it from storage).
    pub fn with_session(principal: Principal) -> Self {
        let provider = Self::new();
        *provider.current.write().unwrap_or_else(|e| e.into_inner()) = Some(principal);
        provider
    }

    pub fn sign_in(&self, principal: Principal) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(principal.clone());
        let _ = self.tx.send((AuthEvent::SignedIn, Some(principal)));
    }

    pub fn refresh(&self, principal: Principal) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(principal.clone());
        let _ = self.tx.send((AuthEvent::TokenRefreshed, Some(principal)));
    }
}

impl Default for InMemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for InMemoryAuthProvider {
    async fn current_principal(&self) -> Option<Principal> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.tx.subscribe()
    }

    async fn sign_out(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
        let _ = self.tx.send((AuthEvent::SignedOut, None));
    }
}
