//! Session state controller.
//!
//! The long-lived task that owns the current session: it subscribes to the
//! auth provider's change stream, drives the identity materializer on each
//! change, and publishes [`SessionState`] over a `watch` channel.
//!
//! State machine: `Uninitialized → Resolving → Ready(Some) | Ready(None) |
//! Failed`. Race rules:
//! - subscribe to the change stream *before* reading the current session
//!   snapshot, so no event slips between check and subscribe;
//! - a change for the principal already being resolved is suppressed;
//! - completions are tagged with an epoch and dropped when a newer
//!   resolution (or a sign-out) has superseded them;
//! - after shutdown no state update is published.
//!
//! If resolution is still pending when the initialization timeout elapses,
//! the controller degrades silently to `Ready(None)`: blocking sign-in
//! indefinitely is worse than a transient signed-out state.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, broadcast, mpsc, watch};

use campus_auth::{ReportType, Section, SessionIdentity, can_access, can_access_report_type};
use campus_core::PrincipalId;

use crate::materializer::{DEFAULT_FETCH_TIMEOUT, IdentityMaterializer, MaterializeError};
use crate::provider::AuthProvider;
use crate::store::ProfileStore;

/// Timeouts for a session controller. The fetch bound must stay shorter
/// than the initialization bound, or the init timeout can never help.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bound on each profile-store fetch (and the lazy record creation).
    pub fetch_timeout: Duration,
    /// Bound on reaching a first `Ready`/`Failed` state after startup.
    pub init_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            init_timeout: Duration::from_secs(6),
        }
    }
}

/// Published session state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Uninitialized,
    Resolving,
    /// Resolution settled: either a signed-in identity or signed-out.
    Ready(Option<SessionIdentity>),
    /// A fatal resolution error with no session to fall back to.
    Failed(MaterializeError),
}

type Outcome = Result<SessionIdentity, MaterializeError>;
type Completion = (u64, PrincipalId, Outcome);

/// Handle to the running controller task.
///
/// The sole writer of session state; consumers read through this handle or
/// a [`subscribe`](SessionController::subscribe)d receiver. Dropping the
/// handle (or calling [`shutdown`](SessionController::shutdown)) stops the
/// task; in-flight resolutions are abandoned without further state updates.
pub struct SessionController {
    state_rx: watch::Receiver<SessionState>,
    last_error: Arc<Mutex<Option<MaterializeError>>>,
    shutdown: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

impl SessionController {
    /// Start a controller over the given provider and profile store.
    pub fn spawn<P, S>(provider: Arc<P>, store: Arc<S>, config: SessionConfig) -> Self
    where
        P: AuthProvider,
        S: ProfileStore,
    {
        let (state_tx, state_rx) = watch::channel(SessionState::Uninitialized);
        let last_error = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(Notify::new());
        let materializer = Arc::new(IdentityMaterializer::new(store, config.fetch_timeout));

        let task = tokio::spawn(run_loop(
            provider,
            materializer,
            state_tx,
            last_error.clone(),
            shutdown.clone(),
            config,
        ));

        Self {
            state_rx,
            last_error,
            shutdown,
            task,
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Current session identity, if resolution produced one.
    pub fn identity(&self) -> Option<SessionIdentity> {
        match &*self.state_rx.borrow() {
            SessionState::Ready(identity) => identity.clone(),
            _ => None,
        }
    }

    pub fn is_resolving(&self) -> bool {
        matches!(
            &*self.state_rx.borrow(),
            SessionState::Uninitialized | SessionState::Resolving
        )
    }

    /// Last fatal resolution error, retained across the forced sign-out
    /// that follows a deactivation. Cleared by the next success.
    pub fn last_error(&self) -> Option<MaterializeError> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Watch the state stream (UI bindings, tests).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Section access for the current identity. With no identity only the
    /// universal dashboard is reachable.
    pub fn can_access(&self, section: Section) -> bool {
        match self.identity() {
            Some(identity) => can_access(&identity, section),
            None => section == Section::Dashboard,
        }
    }

    /// Report-type access for the current identity.
    pub fn can_access_report_type(&self, report_type: ReportType) -> bool {
        self.identity()
            .map(|identity| can_access_report_type(identity.role, report_type))
            .unwrap_or(false)
    }

    /// Stop the controller task. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Whether the background task has exited.
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

async fn run_loop<P, S>(
    provider: Arc<P>,
    materializer: Arc<IdentityMaterializer<S>>,
    state_tx: watch::Sender<SessionState>,
    last_error: Arc<Mutex<Option<MaterializeError>>>,
    shutdown: Arc<Notify>,
    config: SessionConfig,
) where
    P: AuthProvider,
    S: ProfileStore,
{
    // Subscribe before snapshotting the current session; an event arriving
    // in between would otherwise be lost.
    let mut events = provider.subscribe();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();

    let mut epoch: u64 = 0;
    let mut resolving: Option<(u64, PrincipalId)> = None;
    let mut initialized = false;

    let init_deadline = tokio::time::sleep(config.init_timeout);
    tokio::pin!(init_deadline);

    match provider.current_principal().await {
        Some(principal) => begin_resolution(
            principal,
            &mut epoch,
            &mut resolving,
            &state_tx,
            &done_tx,
            &materializer,
        ),
        None => {
            state_tx.send_replace(SessionState::Ready(None));
            initialized = true;
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::debug!("session controller shutting down");
                break;
            }

            _ = &mut init_deadline, if !initialized => {
                // Still resolving at the bound: degrade silently to a
                // signed-out state, never an indefinite spinner.
                tracing::warn!(timeout = ?config.init_timeout,
                    "session initialization timed out, degrading to signed-out");
                resolving = None;
                initialized = true;
                state_tx.send_replace(SessionState::Ready(None));
            }

            change = events.recv() => match change {
                Ok((event, Some(principal))) => {
                    if let Some((_, in_flight_id)) = resolving {
                        if in_flight_id == principal.id {
                            tracing::debug!(?event, principal_id = %principal.id,
                                "resolution already in flight, suppressing");
                            continue;
                        }
                    }
                    tracing::info!(?event, principal_id = %principal.id, "resolving session");
                    begin_resolution(
                        principal,
                        &mut epoch,
                        &mut resolving,
                        &state_tx,
                        &done_tx,
                        &materializer,
                    );
                }
                Ok((event, None)) => {
                    // Sign-out settles directly, never through Resolving.
                    tracing::info!(?event, "session cleared");
                    resolving = None;
                    initialized = true;
                    state_tx.send_replace(SessionState::Ready(None));
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "auth change stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("auth provider stream closed");
                    break;
                }
            },

            Some((done_epoch, principal_id, outcome)) = done_rx.recv() => {
                // Drop completions a newer resolution or sign-out superseded.
                if resolving.map(|(e, _)| e) != Some(done_epoch) {
                    tracing::debug!(done_epoch, %principal_id, "dropping stale resolution");
                    continue;
                }
                resolving = None;
                initialized = true;

                match outcome {
                    Ok(identity) => {
                        *last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
                        state_tx.send_replace(SessionState::Ready(Some(identity)));
                    }
                    Err(error @ MaterializeError::AccountDeactivated) => {
                        // Surfaced through last_error; the session itself is
                        // force-terminated.
                        tracing::info!(%principal_id, "account deactivated, forcing sign-out");
                        *last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
                        provider.sign_out().await;
                        state_tx.send_replace(SessionState::Ready(None));
                    }
                    Err(error) => {
                        *last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.clone());
                        state_tx.send_replace(SessionState::Failed(error));
                    }
                }
            }
        }
    }
}

fn begin_resolution<S: ProfileStore>(
    principal: campus_auth::Principal,
    epoch: &mut u64,
    resolving: &mut Option<(u64, PrincipalId)>,
    state_tx: &watch::Sender<SessionState>,
    done_tx: &mpsc::UnboundedSender<Completion>,
    materializer: &Arc<IdentityMaterializer<S>>,
) {
    *epoch += 1;
    let this_epoch = *epoch;
    *resolving = Some((this_epoch, principal.id));
    state_tx.send_replace(SessionState::Resolving);

    let materializer = materializer.clone();
    let done_tx = done_tx.clone();
    tokio::spawn(async move {
        let outcome = materializer.materialize(&principal).await;
        let _ = done_tx.send((this_epoch, principal.id, outcome));
    });
}
