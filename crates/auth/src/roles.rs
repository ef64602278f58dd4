use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role tier used for access-control decisions.
///
/// This is a **closed** set: strings coming from the durable store or from
/// provider metadata must be parsed through [`Role::from_str`] and are never
/// trusted verbatim. An unrecognized string is a parse error, not a new role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// School owner tier (full tenant access).
    Owner,
    /// School principal tier (academic administration).
    Principal,
    /// Teaching staff tier.
    Teacher,
    /// Finance/bursary tier.
    FinanceOfficer,
    /// Human-resources tier.
    HrOfficer,
    /// Guardian/parent tier. Default when no authoritative source exists.
    Guardian,
    /// Platform administrator. Valid only on a separate administrative
    /// surface; denied every tenant section in this application.
    SystemAdmin,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized role: '{0}'")]
pub struct RoleParseError(pub String);

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Owner,
        Role::Principal,
        Role::Teacher,
        Role::FinanceOfficer,
        Role::HrOfficer,
        Role::Guardian,
        Role::SystemAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Principal => "principal",
            Role::Teacher => "teacher",
            Role::FinanceOfficer => "finance_officer",
            Role::HrOfficer => "hr_officer",
            Role::Guardian => "guardian",
            Role::SystemAdmin => "system_admin",
        }
    }

    /// Whether this role is unusable without a school (tenant) assignment.
    ///
    /// Administrative tiers operate *on* a school, so they are incomplete
    /// without one. Teacher and guardian tiers may exist before a school
    /// assignment lands (e.g. a heuristically inferred teacher on first
    /// sign-in); system_admin never holds a tenant assignment at all.
    pub fn requires_tenant(&self) -> bool {
        match self {
            Role::Owner | Role::Principal | Role::FinanceOfficer | Role::HrOfficer => true,
            Role::Teacher | Role::Guardian | Role::SystemAdmin => false,
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "principal" => Ok(Role::Principal),
            "teacher" => Ok(Role::Teacher),
            "finance_officer" => Ok(Role::FinanceOfficer),
            "hr_officer" => Ok(Role::HrOfficer),
            "guardian" => Ok(Role::Guardian),
            "system_admin" => Ok(Role::SystemAdmin),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}
