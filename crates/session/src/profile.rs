use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_auth::{AccountStatus, Role};
use campus_core::{PrincipalId, SchoolId};

/// Durable, tenant-scoped profile record keyed by principal id.
///
/// `role` is a **raw string** at this layer: the store is not trusted to
/// hold only valid roles, and parsing into the closed [`Role`] set happens
/// at the resolver boundary. Records are created lazily on first resolution
/// when absent and mutated by administrative flows outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: PrincipalId,
    pub role: String,
    pub name: String,
    pub school_id: Option<SchoolId>,
    pub avatar_url: Option<String>,
    pub mfa_enabled: bool,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProfileRecord {
    /// Fresh record as written on first resolution (no school assignment
    /// yet; that lands through administrative flows).
    pub fn new(id: PrincipalId, role: Role, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            role: role.as_str().to_string(),
            name: name.into(),
            school_id: None,
            avatar_url: None,
            mfa_enabled: false,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_school(mut self, school_id: SchoolId) -> Self {
        self.school_id = Some(school_id);
        self
    }

    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }
}
