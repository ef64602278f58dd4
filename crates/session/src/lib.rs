//! `campus-session` — session lifecycle for the role-resolution engine.
//!
//! This crate owns all the I/O around resolution: fetching the durable
//! profile record (bounded by a timeout), merging it with the pure resolver
//! in `campus-auth`, and running the long-lived controller that tracks the
//! authentication provider and publishes the current [`SessionState`].
//!
//! The durable store and the auth provider are trait boundaries; in-memory
//! implementations are provided for tests and development.

pub mod controller;
pub mod materializer;
pub mod profile;
pub mod provider;
pub mod store;

pub use controller::{SessionConfig, SessionController, SessionState};
pub use materializer::{IdentityMaterializer, MaterializeError};
pub use profile::ProfileRecord;
pub use provider::{AuthChange, AuthEvent, AuthProvider, InMemoryAuthProvider};
pub use store::{InMemoryProfileStore, ProfileStore, StoreError};
