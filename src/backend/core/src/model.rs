//! Built-in persistent entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::DomainEntity;
use crate::security::DataDomain;

// ═══════════════════════════════════════════════════════════════════════════════
// User Profile
// ═══════════════════════════════════════════════════════════════════════════════

/// A user's profile record, scoped to a realm by its data domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// Store-assigned identifier (None until first save).
    pub id: Option<String>,
    /// The authenticated user this profile belongs to.
    pub user_id: String,
    /// Display/login name; also the profile's reference name.
    pub username: String,
    pub email: String,
    /// Unique human-meaningful name within the realm.
    pub ref_name: String,
    /// Segmentation descriptor; stamped from the active context on save if
    /// unset.
    pub data_domain: Option<DataDomain>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let username = username.into();
        Self {
            id: None,
            user_id: user_id.into(),
            ref_name: username.clone(),
            username,
            email: email.into(),
            data_domain: None,
            created_at: Utc::now(),
        }
    }
}

impl DomainEntity for UserProfile {
    const COLLECTION: &'static str = "user_profile";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn ref_name(&self) -> &str {
        &self.ref_name
    }

    fn data_domain(&self) -> Option<&DataDomain> {
        self.data_domain.as_ref()
    }

    fn set_data_domain(&mut self, domain: DataDomain) {
        self.data_domain = Some(domain);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_ref_name_defaults_to_username() {
        let profile = UserProfile::new("u1", "alice", "alice@example.com");
        assert_eq!(profile.ref_name, "alice");
        assert!(profile.id.is_none());
        assert!(profile.data_domain.is_none());
    }

    #[test]
    fn test_profile_round_trips_through_json() {
        let mut profile = UserProfile::new("u1", "alice", "alice@example.com");
        profile.set_id("abc".to_string());
        let doc = serde_json::to_value(&profile).unwrap();
        assert_eq!(doc["id"], "abc");
        assert_eq!(doc["ref_name"], "alice");

        let back: UserProfile = serde_json::from_value(doc).unwrap();
        assert_eq!(back.id(), Some("abc"));
        assert_eq!(back.username, "alice");
    }
}
