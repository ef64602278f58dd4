use serde::{Deserialize, Serialize};

use campus_core::{PrincipalId, SchoolId};

use crate::Role;

/// Account status as recorded on the durable profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    /// Deactivated accounts never produce a session identity.
    Inactive,
}

impl core::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AccountStatus::Active => f.write_str("active"),
            AccountStatus::Inactive => f.write_str("inactive"),
        }
    }
}

/// The canonical resolved identity the rest of the application consumes.
///
/// # Invariants
/// - `role` is always a member of the closed [`Role`] set; resolution never
///   produces an arbitrary string.
/// - For tenant-requiring roles a missing `school_id` marks the identity
///   incomplete; the access evaluator denies every tenant-scoped section for
///   incomplete identities rather than silently allowing them.
///
/// Constructed fresh on every successful resolution cycle and superseded
/// atomically by the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub id: PrincipalId,
    pub email: String,
    pub role: Role,
    pub school_id: Option<SchoolId>,
    pub name: String,
    pub avatar_url: Option<String>,
    pub mfa_enabled: bool,
    pub status: AccountStatus,
}

impl SessionIdentity {
    /// Whether the identity satisfies its role's tenant requirement.
    pub fn is_complete(&self) -> bool {
        !self.role.requires_tenant() || self.school_id.is_some()
    }
}
