//! Durable profile store boundary.
//!
//! The store is an external system (row-level security is its own backstop);
//! this module only defines the fetch/upsert contract the materializer needs
//! plus an in-memory implementation for tests and development.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use campus_core::PrincipalId;

use crate::profile::ProfileRecord;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transient failure (network, overload, lock contention). Callers
    /// degrade to fallback resolution; this never fails a sign-in.
    #[error("profile store unavailable: {0}")]
    Unavailable(String),
}

/// Row-fetch / row-upsert contract for the profile record.
#[async_trait]
pub trait ProfileStore: Send + Sync + 'static {
    /// Fetch the record for a principal. `Ok(None)` means "no record yet"
    /// (a normal state on first sign-in), not an error.
    async fn fetch(&self, id: PrincipalId) -> Result<Option<ProfileRecord>, StoreError>;

    /// Insert or replace the record keyed by `record.id`.
    async fn upsert(&self, record: ProfileRecord) -> Result<(), StoreError>;
}

/// In-memory profile store.
///
/// Intended for tests/dev. Supports injectable latency and failure so
/// degraded-store behavior (timeouts, transient errors, swallowed writes)
/// is exercisable without a real backend.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    records: RwLock<HashMap<PrincipalId, ProfileRecord>>,
    latency: RwLock<Option<Duration>>,
    fail_fetches: AtomicU32,
    fail_upserts: AtomicU32,
    fetch_count: AtomicUsize,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly (test setup).
    pub fn insert(&self, record: ProfileRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id, record);
    }

    /// Snapshot a record directly (test assertions).
    pub fn get(&self, id: PrincipalId) -> Option<ProfileRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Delay every fetch/upsert by `latency` (simulates a slow backend).
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write().unwrap_or_else(|e| e.into_inner()) = Some(latency);
    }

    /// Fail the next `n` fetches with [`StoreError::Unavailable`].
    pub fn fail_next_fetches(&self, n: u32) {
        self.fail_fetches.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` upserts with [`StoreError::Unavailable`].
    pub fn fail_next_upserts(&self, n: u32) {
        self.fail_upserts.store(n, Ordering::SeqCst);
    }

    /// Number of fetches issued so far (dedup assertions).
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.read().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn fetch(&self, id: PrincipalId) -> Result<Option<ProfileRecord>, StoreError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if Self::take_failure(&self.fail_fetches) {
            return Err(StoreError::Unavailable("injected fetch failure".to_string()));
        }

        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn upsert(&self, record: ProfileRecord) -> Result<(), StoreError> {
        self.simulate_latency().await;

        if Self::take_failure(&self.fail_upserts) {
            return Err(StoreError::Unavailable("injected upsert failure".to_string()));
        }

        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id, record);
        Ok(())
    }
}
