use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use campus_core::PrincipalId;

/// Provider-supplied metadata tier (free-form JSON object).
pub type Metadata = serde_json::Map<String, Value>;

/// Raw authenticated identity as issued by the authentication provider.
///
/// Immutable once issued for a given session; a fresh value arrives on every
/// provider auth event. This is **pre-resolution** data: nothing in it has
/// been validated against the durable store yet, and the metadata tiers are
/// untrusted (`user_metadata` in particular is user-controlled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    /// Application-controlled metadata (set by backoffice flows).
    #[serde(default)]
    pub app_metadata: Metadata,
    /// User-controlled metadata (set during self-service sign-up).
    #[serde(default)]
    pub user_metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
}

impl Principal {
    /// Minimal constructor; metadata tiers start empty.
    pub fn new(id: PrincipalId, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: email.into(),
            app_metadata: Metadata::new(),
            user_metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            last_sign_in_at: None,
        }
    }

    /// Role claim from application-controlled metadata, if present.
    pub fn app_role(&self) -> Option<&str> {
        metadata_str(&self.app_metadata, "role")
    }

    /// Role claim from user-controlled metadata, if present.
    pub fn user_role(&self) -> Option<&str> {
        metadata_str(&self.user_metadata, "role")
    }

    /// Display name claim, user tier first (sign-up form), then app tier.
    pub fn full_name(&self) -> Option<&str> {
        metadata_str(&self.user_metadata, "full_name")
            .or_else(|| metadata_str(&self.app_metadata, "full_name"))
    }

    /// Local part of the email address (everything before the first `@`).
    pub fn email_local_part(&self) -> &str {
        self.email.split('@').next().unwrap_or(&self.email)
    }

    /// Provider-side deactivation flag (app-controlled tier only; the user
    /// tier cannot deactivate an account).
    pub fn is_deactivated(&self) -> bool {
        self.app_metadata
            .get("deactivated")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

fn metadata_str<'a>(meta: &'a Metadata, key: &str) -> Option<&'a str> {
    meta.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
