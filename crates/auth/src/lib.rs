//! `campus-auth` — pure role-resolution / access-control boundary (zero-trust).
//!
//! This crate is intentionally decoupled from storage and transport: it holds
//! the closed role model, the deterministic role resolver, and the access
//! evaluator. All I/O (profile fetch, session lifecycle) lives in
//! `campus-session`.

pub mod access;
pub mod identity;
pub mod principal;
pub mod resolver;
pub mod roles;

pub use access::{
    ReportType, Section, can_access, can_access_report_type, has_tenant_assignment,
    requires_tenant,
};
pub use identity::{AccountStatus, SessionIdentity};
pub use principal::{Metadata, Principal};
pub use resolver::{ResolvedRole, RoleSource, resolve};
pub use roles::{Role, RoleParseError};
