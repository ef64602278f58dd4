//! Identity materialization.
//!
//! Orchestrates the one I/O step of resolution: fetch the durable profile
//! record (bounded by a timeout), run the pure resolver over every available
//! source, and assemble the canonical [`SessionIdentity`].
//!
//! Degradation rules:
//! - Store timeout or transient store error → resolve without a profile
//!   role (heuristic fallback). Never fails a sign-in.
//! - Missing record → create one from resolver output; persistence failure
//!   is logged and swallowed.
//! - Only two outcomes are fatal: a deactivated account and a principal
//!   without an email address.
//!
//! At most one materialization is in flight per principal id; concurrent
//! callers for the same id await the shared outcome instead of issuing a
//! second fetch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;

use campus_auth::{AccountStatus, Principal, SessionIdentity, resolve};
use campus_core::PrincipalId;

use crate::profile::ProfileRecord;
use crate::store::ProfileStore;

/// Fatal materialization failures. Everything transient is absorbed
/// internally with best-effort fallback and never surfaces here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    /// The profile or the provider marks the account deactivated. The
    /// caller must force sign-out; no session identity is produced.
    #[error("account is deactivated")]
    AccountDeactivated,

    /// The principal carries no email address; the identity is unusable.
    #[error("principal has no email address")]
    MissingEmail,
}

type Outcome = Result<SessionIdentity, MaterializeError>;
type InFlightMap = Mutex<HashMap<PrincipalId, watch::Receiver<Option<Outcome>>>>;

/// Default bound on the profile fetch. Must stay shorter than the session
/// controller's overall initialization timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Materializes a [`SessionIdentity`] for a principal.
pub struct IdentityMaterializer<S> {
    store: Arc<S>,
    fetch_timeout: Duration,
    in_flight: InFlightMap,
}

impl<S: ProfileStore> IdentityMaterializer<S> {
    pub fn new(store: Arc<S>, fetch_timeout: Duration) -> Self {
        Self {
            store,
            fetch_timeout,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a principal into a session identity.
    ///
    /// Concurrent calls for the same principal id share one store fetch:
    /// later callers await the in-flight outcome. If the owning call is
    /// dropped before it publishes, the slot is freed and the next caller
    /// claims it.
    pub async fn materialize(&self, principal: &Principal) -> Outcome {
        if principal.email.trim().is_empty() {
            return Err(MaterializeError::MissingEmail);
        }

        loop {
            // Claim the slot (or pick up the in-flight receiver). The lock
            // is confined to this block; nothing awaits while it is held.
            let claim = {
                let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                match map.get(&principal.id) {
                    Some(rx) => Claim::Waiter(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        map.insert(principal.id, rx);
                        Claim::Owner(tx)
                    }
                }
            };

            match claim {
                Claim::Owner(tx) => {
                    // Freed on drop, so a cancelled owner cannot wedge the
                    // slot for its principal id.
                    let _slot = SlotGuard {
                        map: &self.in_flight,
                        id: principal.id,
                    };
                    let result = self.run(principal).await;
                    let _ = tx.send(Some(result.clone()));
                    return result;
                }
                Claim::Waiter(mut rx) => match rx.wait_for(Option::is_some).await {
                    Ok(outcome) => return outcome.clone().expect("wait_for guarantees Some"),
                    // The owner was cancelled before publishing; loop
                    // around and claim the freed slot.
                    Err(_) => continue,
                },
            }
        }
    }

    async fn run(&self, principal: &Principal) -> Outcome {
        // Step 1: bounded profile fetch. Unavailability degrades to
        // heuristic resolution, it does not block sign-in. Degraded is kept
        // distinct from Missing: only a confirmed absence may create (or
        // later overwrite) a record.
        let fetched = match timeout(self.fetch_timeout, self.store.fetch(principal.id)).await {
            Ok(Ok(Some(profile))) => Fetched::Found(profile),
            Ok(Ok(None)) => Fetched::Missing,
            Ok(Err(e)) => {
                tracing::warn!(principal_id = %principal.id, error = %e,
                    "profile fetch failed, falling back to heuristic resolution");
                Fetched::Degraded
            }
            Err(_) => {
                tracing::warn!(principal_id = %principal.id, timeout = ?self.fetch_timeout,
                    "profile fetch timed out, falling back to heuristic resolution");
                Fetched::Degraded
            }
        };
        let profile = fetched.record();

        // Step 2: deactivated accounts never produce an identity.
        if principal.is_deactivated()
            || profile.is_some_and(|p| p.status == AccountStatus::Inactive)
        {
            return Err(MaterializeError::AccountDeactivated);
        }

        // Step 3: resolve the role across all sources.
        let profile_role = profile.map(|p| p.role.as_str());
        let resolved = resolve(principal, profile_role);

        let name = display_name(principal, profile);

        match &fetched {
            Fetched::Missing => {
                // Lazy record creation, bounded like the fetch. Failure is
                // logged and swallowed: absence of a profile must never
                // block materialization.
                let record = ProfileRecord::new(principal.id, resolved.role, name.clone());
                match timeout(self.fetch_timeout, self.store.upsert(record)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(principal_id = %principal.id, error = %e,
                            "failed to persist new profile record, continuing");
                    }
                    Err(_) => {
                        tracing::warn!(principal_id = %principal.id,
                            "profile record creation timed out, continuing");
                    }
                }
            }
            Fetched::Found(existing) if resolved.is_inferred() => {
                // The record exists but held no valid role. Persist the
                // inferred role off the hot path so later sessions resolve
                // from the profile tier.
                let mut record = existing.clone();
                record.role = resolved.role.as_str().to_string();
                record.updated_at = chrono::Utc::now();
                let store = self.store.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.upsert(record).await {
                        tracing::warn!(error = %e, "deferred profile role upsert failed");
                    }
                });
            }
            // A degraded fetch writes nothing: the store may well hold a
            // record this resolution never saw.
            Fetched::Found(_) | Fetched::Degraded => {}
        }

        // Step 4: field merge — profile wins over metadata over defaults,
        // except `role`, which follows resolver precedence exactly.
        Ok(SessionIdentity {
            id: principal.id,
            email: principal.email.clone(),
            role: resolved.role,
            school_id: profile.and_then(|p| p.school_id),
            name,
            avatar_url: profile.and_then(|p| p.avatar_url.clone()),
            mfa_enabled: profile.is_some_and(|p| p.mfa_enabled),
            status: profile.map(|p| p.status).unwrap_or_default(),
        })
    }
}

/// Outcome of the bounded profile fetch.
enum Fetched {
    Found(ProfileRecord),
    Missing,
    /// Timeout or transient store error: resolution proceeds without a
    /// profile, and nothing may be written.
    Degraded,
}

impl Fetched {
    fn record(&self) -> Option<&ProfileRecord> {
        match self {
            Fetched::Found(record) => Some(record),
            Fetched::Missing | Fetched::Degraded => None,
        }
    }
}

/// Role of a `materialize` call in the per-principal dedup protocol.
enum Claim {
    /// First caller for the id: owns the fetch and publishes the outcome.
    Owner(watch::Sender<Option<Outcome>>),
    /// Later caller: awaits the owner's published outcome.
    Waiter(watch::Receiver<Option<Outcome>>),
}

/// Frees the owning call's dedup slot, whether it completed or was dropped
/// mid-run.
struct SlotGuard<'a> {
    map: &'a InFlightMap,
    id: PrincipalId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// Name fallback chain: profile name → metadata full name → email local
/// part → literal "User".
fn display_name(principal: &Principal, profile: Option<&ProfileRecord>) -> String {
    if let Some(name) = profile.map(|p| p.name.trim()).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    if let Some(name) = principal.full_name() {
        return name.to_string();
    }
    let local = principal.email_local_part().trim();
    if local.is_empty() {
        "User".to_string()
    } else {
        local.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_auth::{Role, RoleSource};
    use campus_core::SchoolId;
    use serde_json::json;

    use crate::store::{InMemoryProfileStore, StoreError};

    fn principal(email: &str) -> Principal {
        Principal::new(PrincipalId::new(), email)
    }

    fn materializer(store: Arc<InMemoryProfileStore>) -> IdentityMaterializer<InMemoryProfileStore> {
        IdentityMaterializer::new(store, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn missing_email_is_fatal() {
        let store = Arc::new(InMemoryProfileStore::new());
        let m = materializer(store.clone());

        let err = m.materialize(&principal("  ")).await.unwrap_err();
        assert_eq!(err, MaterializeError::MissingEmail);
        // Nothing was fetched or created.
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn first_sign_in_creates_profile_with_inferred_role() {
        let store = Arc::new(InMemoryProfileStore::new());
        let m = materializer(store.clone());

        let p = principal("teacher.jane@school.test");
        let identity = m.materialize(&p).await.unwrap();

        assert_eq!(identity.role, Role::Teacher);
        assert_eq!(identity.name, "teacher.jane");
        assert!(identity.school_id.is_none());

        let record = store.get(p.id).expect("record created lazily");
        assert_eq!(record.role, "teacher");
        assert_eq!(record.name, "teacher.jane");
    }

    #[tokio::test]
    async fn profile_fields_win_over_derived_defaults() {
        let store = Arc::new(InMemoryProfileStore::new());
        let p = principal("jane@school.test");
        let school = SchoolId::new();
        let mut record = ProfileRecord::new(p.id, Role::FinanceOfficer, "Jane Smith")
            .with_school(school);
        record.avatar_url = Some("https://cdn.example/jane.png".to_string());
        record.mfa_enabled = true;
        store.insert(record);

        let m = materializer(store);
        let identity = m.materialize(&p).await.unwrap();

        assert_eq!(identity.role, Role::FinanceOfficer);
        assert_eq!(identity.school_id, Some(school));
        assert_eq!(identity.name, "Jane Smith");
        assert_eq!(identity.avatar_url.as_deref(), Some("https://cdn.example/jane.png"));
        assert!(identity.mfa_enabled);
    }

    #[tokio::test]
    async fn metadata_full_name_beats_email_local_part() {
        let store = Arc::new(InMemoryProfileStore::new());
        let mut p = principal("teacher.jane@school.test");
        p.user_metadata.insert("full_name".to_string(), json!("Jane Doe"));

        let m = materializer(store);
        let identity = m.materialize(&p).await.unwrap();
        assert_eq!(identity.name, "Jane Doe");
    }

    #[tokio::test(start_paused = true)]
    async fn store_timeout_degrades_to_heuristic_resolution() {
        let store = Arc::new(InMemoryProfileStore::new());
        store.set_latency(Duration::from_secs(60));
        // A persisted role exists, but the fetch never returns in time.
        let p = principal("bursar@school.test");
        store.insert(ProfileRecord::new(p.id, Role::Owner, "ignored"));

        let m = IdentityMaterializer::new(store, Duration::from_millis(50));
        let identity = m.materialize(&p).await.unwrap();

        // Fallback resolution from the email pattern, not the stale record.
        assert_eq!(identity.role, Role::FinanceOfficer);
        assert!(identity.school_id.is_none());
    }

    #[tokio::test]
    async fn transient_store_error_is_absorbed() {
        let store = Arc::new(InMemoryProfileStore::new());
        store.fail_next_fetches(1);

        let m = materializer(store);
        let identity = m.materialize(&principal("guardian.parent@family.example")).await.unwrap();
        assert_eq!(identity.role, Role::Guardian);
    }

    #[tokio::test]
    async fn degraded_fetch_never_writes() {
        let store = Arc::new(InMemoryProfileStore::new());
        let p = principal("teacher.jane@school.test");
        store.insert(ProfileRecord::new(p.id, Role::Owner, "Jane"));
        store.fail_next_fetches(1);

        let m = materializer(store.clone());
        let identity = m.materialize(&p).await.unwrap();

        // Fallback role for this session only; the unseen record survives.
        assert_eq!(identity.role, Role::Teacher);
        assert_eq!(store.get(p.id).unwrap().role, "owner");
    }

    #[tokio::test]
    async fn failed_lazy_profile_creation_is_swallowed() {
        let store = Arc::new(InMemoryProfileStore::new());
        store.fail_next_upserts(1);

        let p = principal("teacher.jane@school.test");
        let m = materializer(store.clone());
        let identity = m.materialize(&p).await.unwrap();

        assert_eq!(identity.role, Role::Teacher);
        assert!(store.get(p.id).is_none(), "upsert failed, record absent");
    }

    #[tokio::test]
    async fn inactive_profile_is_fatal() {
        let store = Arc::new(InMemoryProfileStore::new());
        let p = principal("jane@school.test");
        store.insert(
            ProfileRecord::new(p.id, Role::Teacher, "Jane").with_status(AccountStatus::Inactive),
        );

        let m = materializer(store);
        let err = m.materialize(&p).await.unwrap_err();
        assert_eq!(err, MaterializeError::AccountDeactivated);
    }

    #[tokio::test]
    async fn provider_deactivation_flag_is_fatal() {
        let store = Arc::new(InMemoryProfileStore::new());
        let mut p = principal("jane@school.test");
        p.app_metadata.insert("deactivated".to_string(), json!(true));

        let m = materializer(store);
        let err = m.materialize(&p).await.unwrap_err();
        assert_eq!(err, MaterializeError::AccountDeactivated);
    }

    #[tokio::test]
    async fn invalid_persisted_role_is_corrected_in_background() {
        let store = Arc::new(InMemoryProfileStore::new());
        let p = principal("teacher.jane@school.test");
        let mut record = ProfileRecord::new(p.id, Role::Teacher, "Jane");
        record.role = "head_wizard".to_string();
        store.insert(record);

        let m = materializer(store.clone());
        let identity = m.materialize(&p).await.unwrap();
        assert_eq!(identity.role, Role::Teacher);

        // The deferred upsert rewrites the invalid role string.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if store.get(p.id).map(|r| r.role) == Some("teacher".to_string()) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "deferred upsert never landed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn concurrent_calls_for_same_principal_share_one_fetch() {
        let store = Arc::new(InMemoryProfileStore::new());
        store.set_latency(Duration::from_millis(50));

        let p = principal("teacher.jane@school.test");
        let m = Arc::new(materializer(store.clone()));

        let (a, b) = tokio::join!(m.materialize(&p), m.materialize(&p));
        assert_eq!(a, b);
        assert_eq!(store.fetch_count(), 1, "duplicate call must not refetch");
    }

    #[tokio::test]
    async fn cancelled_materialization_releases_the_dedup_slot() {
        let store = Arc::new(InMemoryProfileStore::new());
        store.set_latency(Duration::from_millis(50));
        let p = principal("teacher.jane@school.test");
        let m = Arc::new(materializer(store.clone()));

        // Caller-side cancellation mid-fetch.
        let cancelled = timeout(Duration::from_millis(10), m.materialize(&p)).await;
        assert!(cancelled.is_err());
        let fetches_after_cancel = store.fetch_count();

        // The freed slot is claimable again, and duplicates still share it.
        let (a, b) = tokio::join!(m.materialize(&p), m.materialize(&p));
        assert!(a.is_ok());
        assert_eq!(a, b);
        assert_eq!(
            store.fetch_count() - fetches_after_cancel,
            1,
            "one fetch in flight per principal id"
        );
    }

    #[tokio::test]
    async fn waiter_outlives_a_cancelled_owner() {
        let store = Arc::new(InMemoryProfileStore::new());
        store.set_latency(Duration::from_millis(50));
        let p = principal("teacher.jane@school.test");
        let m = Arc::new(materializer(store.clone()));

        let owner = timeout(Duration::from_millis(10), m.materialize(&p));
        let waiter = async {
            // Join after the owner claims the slot, before its cancellation.
            tokio::time::sleep(Duration::from_millis(5)).await;
            m.materialize(&p).await
        };
        let (owner, waiter) = tokio::join!(owner, waiter);

        assert!(owner.is_err(), "owner cancelled mid-fetch");
        // The waiter reclaims the slot and resolves on its own.
        assert_eq!(waiter.unwrap().role, Role::Teacher);
    }

    #[tokio::test]
    async fn distinct_principals_fetch_independently() {
        let store = Arc::new(InMemoryProfileStore::new());
        let m = Arc::new(materializer(store.clone()));

        let a = principal("teacher.a@school.test");
        let b = principal("teacher.b@school.test");
        let (ra, rb) = tokio::join!(m.materialize(&a), m.materialize(&b));
        assert_eq!(ra.unwrap().id, a.id);
        assert_eq!(rb.unwrap().id, b.id);
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn resolution_source_is_profile_when_record_valid() {
        // Direct resolver sanity at this boundary: a valid persisted role
        // means nothing is inferred and no write happens.
        let store = Arc::new(InMemoryProfileStore::new());
        let p = principal("admin@school.test");
        store.insert(ProfileRecord::new(p.id, Role::Guardian, "Pat"));

        let resolved = resolve(&p, Some("guardian"));
        assert_eq!(resolved.source, RoleSource::Profile);

        let m = materializer(store);
        let identity = m.materialize(&p).await.unwrap();
        assert_eq!(identity.role, Role::Guardian);
    }

    #[tokio::test]
    async fn store_error_display_is_stable() {
        let err = StoreError::Unavailable("boom".to_string());
        assert_eq!(err.to_string(), "profile store unavailable: boom");
    }
}
