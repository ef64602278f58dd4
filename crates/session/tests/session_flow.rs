//! Integration tests for the full resolution pipeline.
//!
//! Tests: auth provider → session controller → identity materializer →
//! role resolver → access evaluator, over the in-memory store/provider.
//!
//! Verifies:
//! - First sign-in with no profile record infers the role and creates one
//! - Tenant gating overrides static role grants
//! - Deactivated accounts are forced out with a surfaced error
//! - Unmatched principals land on the guardian tier

use std::sync::Arc;
use std::time::Duration;

use campus_auth::{
    AccountStatus, Principal, ReportType, Role, Section, can_access, has_tenant_assignment,
    requires_tenant,
};
use campus_core::{PrincipalId, SchoolId};
use campus_session::{
    AuthProvider, InMemoryAuthProvider, InMemoryProfileStore, MaterializeError, ProfileRecord,
    SessionConfig, SessionController, SessionState,
};

fn test_config() -> SessionConfig {
    SessionConfig {
        fetch_timeout: Duration::from_millis(200),
        init_timeout: Duration::from_millis(500),
    }
}

async fn settled(controller: &SessionController) -> SessionState {
    let mut rx = controller.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = rx.borrow_and_update().clone();
            if matches!(state, SessionState::Ready(_) | SessionState::Failed(_)) {
                return state;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("controller never settled")
}

#[tokio::test]
async fn teacher_inferred_on_first_sign_in() {
    campus_observability::init();

    let store = Arc::new(InMemoryProfileStore::new());
    let jane = Principal::new(PrincipalId::new(), "teacher.jane@school.test");
    let provider = Arc::new(InMemoryAuthProvider::with_session(jane.clone()));

    let controller = SessionController::spawn(provider, store.clone(), test_config());

    let state = settled(&controller).await;
    let SessionState::Ready(Some(identity)) = state else {
        panic!("expected resolved identity, got {state:?}");
    };

    // Inferred from the "teacher" substring; no authoritative source existed.
    assert_eq!(identity.role, Role::Teacher);
    assert_eq!(identity.name, "teacher.jane");
    assert!(identity.school_id.is_none());

    // The profile record was created lazily with the inferred role.
    let record = store.get(jane.id).expect("profile record created");
    assert_eq!(record.role, "teacher");
    assert_eq!(record.name, "teacher.jane");
    assert_eq!(record.status, AccountStatus::Active);

    // Coarse access follows the teacher tier.
    assert!(controller.can_access(Section::Grades));
    assert!(controller.can_access(Section::Attendance));
    assert!(!controller.can_access(Section::Finance));
    assert!(controller.can_access_report_type(ReportType::Academic));
    assert!(!controller.can_access_report_type(ReportType::Financial));
}

#[tokio::test]
async fn finance_officer_without_school_is_locked_out_of_finance() {
    let store = Arc::new(InMemoryProfileStore::new());
    let officer = Principal::new(PrincipalId::new(), "pat@school.test");
    // Persisted role with no school assignment yet.
    store.insert(ProfileRecord::new(officer.id, Role::FinanceOfficer, "Pat"));
    let provider = Arc::new(InMemoryAuthProvider::with_session(officer));

    let controller = SessionController::spawn(provider, store, test_config());

    let state = settled(&controller).await;
    let SessionState::Ready(Some(identity)) = state else {
        panic!("expected resolved identity, got {state:?}");
    };

    assert_eq!(identity.role, Role::FinanceOfficer);
    assert!(identity.school_id.is_none());
    assert!(!identity.is_complete());
    assert!(requires_tenant(identity.role));
    assert!(!has_tenant_assignment(&identity));

    // Finance is in the role's static table, but the missing tenant
    // assignment overrides it.
    assert!(!controller.can_access(Section::Finance));
    assert!(!can_access(&identity, Section::Finance));
    assert!(controller.can_access(Section::Dashboard));
}

#[tokio::test]
async fn finance_officer_with_school_reaches_finance() {
    let store = Arc::new(InMemoryProfileStore::new());
    let officer = Principal::new(PrincipalId::new(), "pat@school.test");
    store.insert(
        ProfileRecord::new(officer.id, Role::FinanceOfficer, "Pat").with_school(SchoolId::new()),
    );
    let provider = Arc::new(InMemoryAuthProvider::with_session(officer));

    let controller = SessionController::spawn(provider, store, test_config());

    let state = settled(&controller).await;
    assert!(matches!(state, SessionState::Ready(Some(_))));
    assert!(controller.can_access(Section::Finance));
    assert!(controller.can_access_report_type(ReportType::Financial));
    assert!(!controller.can_access(Section::Grades));
}

#[tokio::test]
async fn deactivated_profile_forces_sign_out_with_surfaced_error() {
    let store = Arc::new(InMemoryProfileStore::new());
    let p = Principal::new(PrincipalId::new(), "jane@school.test");
    store.insert(
        ProfileRecord::new(p.id, Role::Teacher, "Jane").with_status(AccountStatus::Inactive),
    );
    let provider = Arc::new(InMemoryAuthProvider::with_session(p));

    let controller = SessionController::spawn(provider.clone(), store, test_config());

    let state = settled(&controller).await;
    assert_eq!(state, SessionState::Ready(None));
    // Surfaced, not silent: the caller can show "account deactivated".
    assert_eq!(
        controller.last_error(),
        Some(MaterializeError::AccountDeactivated)
    );
    assert!(provider.current_principal().await.is_none());
}

#[tokio::test]
async fn unmatched_principal_lands_on_guardian_tier() {
    let store = Arc::new(InMemoryProfileStore::new());
    let parent = Principal::new(PrincipalId::new(), "jordan.lee@family.example");
    let provider = Arc::new(InMemoryAuthProvider::with_session(parent));

    let controller = SessionController::spawn(provider, store, test_config());

    let state = settled(&controller).await;
    let SessionState::Ready(Some(identity)) = state else {
        panic!("expected resolved identity, got {state:?}");
    };
    assert_eq!(identity.role, Role::Guardian);
    assert!(controller.can_access(Section::Grades));
    assert!(!controller.can_access(Section::Settings));
    assert!(!controller.can_access_report_type(ReportType::Academic));
}

#[tokio::test]
async fn degraded_store_still_signs_in_with_fallback_role() {
    let store = Arc::new(InMemoryProfileStore::new());
    store.fail_next_fetches(1);
    // A persisted owner role exists, but the store is briefly down.
    let p = Principal::new(PrincipalId::new(), "bursar@school.test");
    store.insert(ProfileRecord::new(p.id, Role::Owner, "ignored"));
    let provider = Arc::new(InMemoryAuthProvider::with_session(p.clone()));

    let controller = SessionController::spawn(provider.clone(), store.clone(), test_config());

    let state = settled(&controller).await;
    let SessionState::Ready(Some(identity)) = state else {
        panic!("expected degraded sign-in, got {state:?}");
    };
    // Heuristic resolution from the email pattern, not a hard failure.
    assert_eq!(identity.role, Role::FinanceOfficer);
    assert!(controller.last_error().is_none());

    // The degraded cycle must not clobber the record it never saw.
    let record = store.get(p.id).expect("record untouched");
    assert_eq!(record.role, "owner");
}
