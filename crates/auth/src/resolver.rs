//! Deterministic role resolution.
//!
//! Turns a raw [`Principal`] plus an optional persisted profile role into
//! exactly one [`Role`], applying a fixed source precedence:
//!
//! 1. persisted profile role
//! 2. application-controlled metadata role
//! 3. user-controlled metadata role
//! 4. email-pattern inference
//! 5. default tier (guardian)
//!
//! Each source is validated against the closed role set; an invalid string at
//! any tier falls through to the next, it is never passed along verbatim.
//!
//! - No IO
//! - No panics
//! - Same inputs, same output

use serde::Serialize;

use crate::{Principal, Role};

/// Which source tier produced the resolved role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    Profile,
    AppMetadata,
    UserMetadata,
    EmailPattern,
    Default,
}

/// Resolver output: the role plus the tier that won.
///
/// The source matters to the caller: when resolution bottomed out in
/// inference, the identity materializer persists the inferred role so later
/// sessions resolve from the profile tier. The resolver itself never writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResolvedRole {
    pub role: Role,
    pub source: RoleSource,
}

impl ResolvedRole {
    /// True when no authoritative source existed and the role was guessed.
    pub fn is_inferred(&self) -> bool {
        matches!(self.source, RoleSource::EmailPattern | RoleSource::Default)
    }
}

/// Keyword table for email inference. Checked in order, first match wins.
///
/// Deliberately no `hr` keyword: a two-letter substring collides with
/// ordinary names, and the HR tier is only ever assigned from an
/// authoritative source.
const EMAIL_PATTERNS: &[(&[&str], Role)] = &[
    (&["admin"], Role::SystemAdmin),
    (&["principal"], Role::Principal),
    (&["owner"], Role::Owner),
    (&["teacher"], Role::Teacher),
    (&["finance", "bursar", "accounts"], Role::FinanceOfficer),
];

/// Resolve the canonical role for a principal.
///
/// Pure and total: every input yields a member of the closed role set.
pub fn resolve(principal: &Principal, profile_role: Option<&str>) -> ResolvedRole {
    let candidates: [(Option<&str>, RoleSource); 3] = [
        (profile_role, RoleSource::Profile),
        (principal.app_role(), RoleSource::AppMetadata),
        (principal.user_role(), RoleSource::UserMetadata),
    ];

    for (candidate, source) in candidates {
        if let Some(role) = candidate.and_then(|s| s.parse::<Role>().ok()) {
            return ResolvedRole { role, source };
        }
    }

    if let Some(role) = infer_from_email(&principal.email) {
        return ResolvedRole {
            role,
            source: RoleSource::EmailPattern,
        };
    }

    ResolvedRole {
        role: Role::Guardian,
        source: RoleSource::Default,
    }
}

fn infer_from_email(email: &str) -> Option<Role> {
    let email = email.to_ascii_lowercase();
    for (keywords, role) in EMAIL_PATTERNS {
        if keywords.iter().any(|kw| email.contains(kw)) {
            return Some(*role);
        }
    }
    None
}
