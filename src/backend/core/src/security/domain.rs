//! Security value types: data domains, principals, and resource contexts.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Strongly-typed user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Data Domain (tenant segmentation descriptor)
// ═══════════════════════════════════════════════════════════════════════════════

/// Describes tenant/segment ownership of a record or context.
///
/// Every persisted entity carries a `DataDomain`, and every query against a
/// tenant-scoped collection is constrained by one to prevent cross-tenant
/// data leakage. Two domains are equal iff all fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataDomain {
    /// The realm (tenant/environment boundary) owning the record.
    pub realm: String,
    /// Organization reference name within the realm.
    pub org_ref_name: String,
    /// Owning account identifier.
    pub account_id: String,
    /// Owning user identifier.
    pub owner_id: String,
    /// Tenant identifier (usually the realm, kept separate for resellers).
    pub tenant_id: String,
}

impl DataDomain {
    /// Create a fully-specified data domain.
    pub fn new(
        realm: impl Into<String>,
        org_ref_name: impl Into<String>,
        account_id: impl Into<String>,
        owner_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            realm: realm.into(),
            org_ref_name: org_ref_name.into(),
            account_id: account_id.into(),
            owner_id: owner_id.into(),
            tenant_id: tenant_id.into(),
        }
    }

    /// Create the domain a record owned by `owner` in `realm` gets by default.
    ///
    /// Organization and account default to the realm itself until an
    /// organization structure is provisioned.
    pub fn for_owner(realm: impl Into<String>, owner: &UserId) -> Self {
        let realm = realm.into();
        Self {
            org_ref_name: realm.clone(),
            account_id: realm.clone(),
            owner_id: owner.as_str().to_string(),
            tenant_id: realm.clone(),
            realm,
        }
    }
}

impl fmt::Display for DataDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.realm, self.org_ref_name, self.account_id, self.owner_id
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Action
// ═══════════════════════════════════════════════════════════════════════════════

/// The operation a caller is performing on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    List,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Principal Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity of the caller, built once per authenticated call from claims
/// supplied by the authentication layer. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalContext {
    /// The authenticated user.
    pub user_id: UserId,
    /// Role names granted to the user.
    pub roles: HashSet<String>,
    /// The realm the user's own records live in.
    pub default_realm: String,
    /// System principals bypass identity-based scope derivation.
    pub system: bool,
}

impl PrincipalContext {
    /// Build a principal for an ordinary authenticated user.
    pub fn user(
        user_id: impl Into<UserId>,
        roles: impl IntoIterator<Item = impl Into<String>>,
        default_realm: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            default_realm: default_realm.into(),
            system: false,
        }
    }

    /// Build the system principal for internal operations (e.g. migrations).
    pub fn system_principal(default_realm: impl Into<String>) -> Self {
        let mut roles = HashSet::new();
        roles.insert("system".to_string());
        Self {
            user_id: UserId::new("system"),
            roles,
            default_realm: default_realm.into(),
            system: true,
        }
    }

    /// The anonymous principal used when no session is active.
    pub fn anonymous() -> Self {
        Self {
            user_id: UserId::new("anonymous"),
            roles: HashSet::new(),
            default_realm: String::new(),
            system: false,
        }
    }

    /// Whether the principal carries a given role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Whether this is the anonymous (no session) principal.
    pub fn is_anonymous(&self) -> bool {
        !self.system && self.user_id.as_str() == "anonymous" && self.roles.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Context
// ═══════════════════════════════════════════════════════════════════════════════

/// The resource/action being accessed. Created per call; immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceContext {
    /// The resource type (usually a collection name, e.g. "user_profile").
    pub resource_type: String,
    /// The operation being performed.
    pub action: Action,
    /// The realm being targeted.
    pub realm: String,
    /// Caller-supplied segmentation, honored only for system principals.
    pub data_domain: Option<DataDomain>,
}

impl ResourceContext {
    pub fn new(
        resource_type: impl Into<String>,
        action: Action,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            action,
            realm: realm.into(),
            data_domain: None,
        }
    }

    /// Attach an explicit data domain.
    pub fn with_data_domain(mut self, domain: DataDomain) -> Self {
        self.data_domain = Some(domain);
        self
    }

    /// Copy of this context with a different action; used by the repository
    /// to derive the per-operation context from the session's entry.
    pub fn for_action(&self, action: Action) -> Self {
        Self {
            action,
            ..self.clone()
        }
    }

    /// Copy of this context retargeted at a resource type and action.
    pub fn for_resource(&self, resource_type: impl Into<String>, action: Action) -> Self {
        Self {
            resource_type: resource_type.into(),
            action,
            ..self.clone()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
