//! Security rule table and evaluation engine.
//!
//! The engine answers two questions for every data access:
//! "may this principal perform this action on this resource?" and
//! "which slice of the data may they see while doing it?"
//!
//! Rules are plain data records (a predicate, an effect, and a priority)
//! rather than a trait hierarchy, so the rule table can be inspected and
//! tested directly. The table is built once at startup and shared read-only
//! (`Arc<RuleSet>`), making concurrent evaluation lock-free.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::domain::{Action, DataDomain, PrincipalContext, ResourceContext};
use crate::store::DocFilter;

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The action is allowed.
    Allow,
    /// The action is denied, with the winning rule's id (or "no matching
    /// rule") as the reason.
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rule Scope
// ═══════════════════════════════════════════════════════════════════════════════

/// What part of the resource space a rule is scoped to.
///
/// Scope drives the specificity tie-break: a rule pinned to a single
/// resource type and action outranks a type-scoped rule, which outranks a
/// catch-all, when priorities are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleScope {
    /// Matches any resource and action.
    Any,
    /// Matches one resource type, any action.
    Resource(String),
    /// Matches one resource type and one action.
    ResourceAction(String, Action),
}

impl RuleScope {
    pub fn any() -> Self {
        Self::Any
    }

    pub fn resource(resource_type: impl Into<String>) -> Self {
        Self::Resource(resource_type.into())
    }

    pub fn resource_action(resource_type: impl Into<String>, action: Action) -> Self {
        Self::ResourceAction(resource_type.into(), action)
    }

    /// Whether this scope covers the given resource context.
    pub fn covers(&self, resource: &ResourceContext) -> bool {
        match self {
            Self::Any => true,
            Self::Resource(rt) => rt == &resource.resource_type,
            Self::ResourceAction(rt, action) => {
                rt == &resource.resource_type && *action == resource.action
            }
        }
    }

    /// Rank used for priority tie-breaks; higher is more specific.
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Any => 0,
            Self::Resource(_) => 1,
            Self::ResourceAction(_, _) => 2,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Security Rule
// ═══════════════════════════════════════════════════════════════════════════════

/// Effect of a matched rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEffect {
    Allow,
    Deny,
}

/// Predicate over (principal, resource).
pub type RulePredicate =
    Arc<dyn Fn(&PrincipalContext, &ResourceContext) -> bool + Send + Sync>;

/// A single authorization rule.
#[derive(Clone)]
pub struct SecurityRule {
    /// Stable identifier, reported as the deny reason when this rule wins.
    pub id: String,
    /// Resource-space coverage; also the specificity rank.
    pub scope: RuleScope,
    /// Allow or Deny when matched.
    pub effect: RuleEffect,
    /// Higher priority wins among matching rules.
    pub priority: i32,
    predicate: RulePredicate,
}

impl SecurityRule {
    /// Create an allow rule.
    pub fn allow(
        id: impl Into<String>,
        scope: RuleScope,
        priority: i32,
        predicate: impl Fn(&PrincipalContext, &ResourceContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            effect: RuleEffect::Allow,
            priority,
            predicate: Arc::new(predicate),
        }
    }

    /// Create a deny rule.
    pub fn deny(
        id: impl Into<String>,
        scope: RuleScope,
        priority: i32,
        predicate: impl Fn(&PrincipalContext, &ResourceContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            effect: RuleEffect::Deny,
            priority,
            predicate: Arc::new(predicate),
        }
    }

    /// Whether this rule applies to the given pair.
    pub fn applies_to(&self, principal: &PrincipalContext, resource: &ResourceContext) -> bool {
        self.scope.covers(resource) && (self.predicate)(principal, resource)
    }
}

impl fmt::Debug for SecurityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityRule")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("effect", &self.effect)
            .field("priority", &self.priority)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rule Set
// ═══════════════════════════════════════════════════════════════════════════════

/// The process-wide rule table: registered once at startup, read-only
/// thereafter.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<SecurityRule>,
}

impl RuleSet {
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    pub fn rules(&self) -> &[SecurityRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Builder for the startup rule table.
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    rules: Vec<SecurityRule>,
}

impl RuleSetBuilder {
    /// Register a rule.
    pub fn rule(mut self, rule: SecurityRule) -> Self {
        debug!(rule_id = %rule.id, priority = rule.priority, "Registering security rule");
        self.rules.push(rule);
        self
    }

    /// Register the standard "system principals may do anything" rule.
    pub fn with_system_access(self) -> Self {
        self.rule(SecurityRule::allow(
            "system-all",
            RuleScope::any(),
            i32::MAX,
            |principal, _| principal.system,
        ))
    }

    pub fn build(self) -> Arc<RuleSet> {
        Arc::new(RuleSet { rules: self.rules })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Domain Filter
// ═══════════════════════════════════════════════════════════════════════════════

/// The DataDomain-shaped constraint a repository must apply to store queries.
///
/// `None` fields are unconstrained. For non-system principals the engine
/// always pins `realm` and `owner_id`, so a forged `ResourceContext` cannot
/// widen scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainFilter {
    pub realm: Option<String>,
    pub org_ref_name: Option<String>,
    pub account_id: Option<String>,
    pub owner_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl DomainFilter {
    /// Convert into store filter terms against the entity's embedded domain.
    pub fn to_doc_filter(&self) -> DocFilter {
        let mut filter = DocFilter::new();
        let mut put = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                filter.insert(format!("data_domain.{key}"), v.clone().into());
            }
        };
        put("realm", &self.realm);
        put("org_ref_name", &self.org_ref_name);
        put("account_id", &self.account_id);
        put("owner_id", &self.owner_id);
        put("tenant_id", &self.tenant_id);
        filter
    }

    /// Intersect with a caller-supplied filter (strict AND semantics).
    ///
    /// A caller term on a key the derived filter also constrains must agree
    /// with it; a conflicting term makes the intersection provably empty and
    /// returns `None`, so callers can neither widen scope nor retarget a
    /// derived key.
    pub fn intersect(&self, caller: Option<DocFilter>) -> Option<DocFilter> {
        let mut merged = caller.unwrap_or_default();
        for (key, value) in self.to_doc_filter() {
            if let Some(existing) = merged.get(&key) {
                if existing != &value {
                    return None;
                }
            }
            merged.insert(key, value);
        }
        Some(merged)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rule Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluates (principal, resource) pairs against the shared rule table and
/// derives the data-segmentation filter repositories must apply.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Arc<RuleSet>,
}

impl RuleEngine {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    pub fn rule_set(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    /// Evaluate the pair against registered rules.
    ///
    /// No matching rule is a Deny. Among matches, the highest priority wins;
    /// priority ties fall to the most specific scope; remaining ties fall to
    /// registration order.
    pub fn evaluate(
        &self,
        principal: &PrincipalContext,
        resource: &ResourceContext,
    ) -> Decision {
        let mut winner: Option<&SecurityRule> = None;
        for rule in self.rules.rules() {
            if !rule.applies_to(principal, resource) {
                continue;
            }
            let better = match winner {
                None => true,
                Some(current) => {
                    (rule.priority, rule.scope.specificity())
                        > (current.priority, current.scope.specificity())
                }
            };
            if better {
                winner = Some(rule);
            }
        }

        match winner {
            Some(rule) => {
                debug!(
                    rule_id = %rule.id,
                    effect = ?rule.effect,
                    principal = %principal.user_id,
                    resource = %resource.resource_type,
                    action = %resource.action,
                    "Rule evaluation complete"
                );
                match rule.effect {
                    RuleEffect::Allow => Decision::Allow,
                    RuleEffect::Deny => Decision::Deny(rule.id.clone()),
                }
            }
            None => {
                debug!(
                    principal = %principal.user_id,
                    resource = %resource.resource_type,
                    action = %resource.action,
                    "No matching rule; denying by default"
                );
                Decision::Deny("no matching rule".to_string())
            }
        }
    }

    /// Derive the segmentation filter for a store query.
    ///
    /// Non-system principals are always pinned to the target realm and their
    /// own `owner_id`; a caller-supplied `DataDomain` can only narrow the
    /// remaining fields. System principals may pass an explicit domain
    /// through unconstrained, or fall back to a realm-only filter.
    pub fn derive_filter(
        &self,
        principal: &PrincipalContext,
        resource: &ResourceContext,
    ) -> DomainFilter {
        if principal.system {
            return match &resource.data_domain {
                Some(domain) => domain_to_filter(domain),
                None => DomainFilter {
                    realm: Some(resource.realm.clone()),
                    ..DomainFilter::default()
                },
            };
        }

        let mut filter = match &resource.data_domain {
            Some(domain) => DomainFilter {
                org_ref_name: Some(domain.org_ref_name.clone()),
                account_id: Some(domain.account_id.clone()),
                tenant_id: Some(domain.tenant_id.clone()),
                ..DomainFilter::default()
            },
            None => DomainFilter::default(),
        };
        filter.realm = Some(resource.realm.clone());
        filter.owner_id = Some(principal.user_id.as_str().to_string());
        filter
    }
}

fn domain_to_filter(domain: &DataDomain) -> DomainFilter {
    DomainFilter {
        realm: Some(domain.realm.clone()),
        org_ref_name: Some(domain.org_ref_name.clone()),
        account_id: Some(domain.account_id.clone()),
        owner_id: Some(domain.owner_id.clone()),
        tenant_id: Some(domain.tenant_id.clone()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn user(realm: &str) -> PrincipalContext {
        PrincipalContext::user("u1", ["user"], realm)
    }

    fn resource(action: Action) -> ResourceContext {
        ResourceContext::new("user_profile", action, "r1")
    }

    #[test]
    fn test_default_deny_with_no_rules() {
        let engine = RuleEngine::new(RuleSet::builder().build());
        let decision = engine.evaluate(&user("r1"), &resource(Action::Read));
        assert_eq!(decision, Decision::Deny("no matching rule".to_string()));
    }

    #[test]
    fn test_higher_priority_wins_regardless_of_registration_order() {
        let rules = RuleSet::builder()
            .rule(SecurityRule::allow("allow-low", RuleScope::any(), 1, |_, _| true))
            .rule(SecurityRule::deny("deny-high", RuleScope::any(), 10, |_, _| true))
            .build();
        let engine = RuleEngine::new(rules);
        assert_eq!(
            engine.evaluate(&user("r1"), &resource(Action::Read)),
            Decision::Deny("deny-high".to_string())
        );

        // Same rules, reversed registration order: same outcome.
        let rules = RuleSet::builder()
            .rule(SecurityRule::deny("deny-high", RuleScope::any(), 10, |_, _| true))
            .rule(SecurityRule::allow("allow-low", RuleScope::any(), 1, |_, _| true))
            .build();
        let engine = RuleEngine::new(rules);
        assert_eq!(
            engine.evaluate(&user("r1"), &resource(Action::Read)),
            Decision::Deny("deny-high".to_string())
        );
    }

    #[test]
    fn test_specificity_breaks_priority_ties() {
        let rules = RuleSet::builder()
            .rule(SecurityRule::deny("deny-any", RuleScope::any(), 5, |_, _| true))
            .rule(SecurityRule::allow(
                "allow-profile-read",
                RuleScope::resource_action("user_profile", Action::Read),
                5,
                |_, _| true,
            ))
            .build();
        let engine = RuleEngine::new(rules);
        assert!(engine.evaluate(&user("r1"), &resource(Action::Read)).is_allowed());
        // Other actions only match the catch-all deny.
        assert!(engine.evaluate(&user("r1"), &resource(Action::Delete)).is_denied());
    }

    #[test]
    fn test_predicate_gates_match() {
        let rules = RuleSet::builder()
            .rule(SecurityRule::allow("allow-users", RuleScope::any(), 1, |p, _| {
                p.has_role("user")
            }))
            .build();
        let engine = RuleEngine::new(rules);
        assert!(engine.evaluate(&user("r1"), &resource(Action::Read)).is_allowed());
        assert!(engine
            .evaluate(&PrincipalContext::anonymous(), &resource(Action::Read))
            .is_denied());
    }

    #[test]
    fn test_system_access_rule() {
        let engine = RuleEngine::new(RuleSet::builder().with_system_access().build());
        let system = PrincipalContext::system_principal("system");
        assert!(engine.evaluate(&system, &resource(Action::Delete)).is_allowed());
        assert!(engine.evaluate(&user("r1"), &resource(Action::Read)).is_denied());
    }

    #[test]
    fn test_non_system_filter_pins_realm_and_owner() {
        let engine = RuleEngine::new(RuleSet::builder().build());
        // Forged resource context claiming someone else's domain.
        let forged = resource(Action::Read)
            .with_data_domain(DataDomain::new("r1", "org", "acct", "victim", "r1"));
        let filter = engine.derive_filter(&user("r1"), &forged);
        assert_eq!(filter.realm.as_deref(), Some("r1"));
        assert_eq!(filter.owner_id.as_deref(), Some("u1"));
        // The narrowing fields pass through.
        assert_eq!(filter.account_id.as_deref(), Some("acct"));
    }

    #[test]
    fn test_system_filter_honors_explicit_domain() {
        let engine = RuleEngine::new(RuleSet::builder().build());
        let system = PrincipalContext::system_principal("system");
        let explicit = resource(Action::List)
            .with_data_domain(DataDomain::new("r2", "org", "acct", "any", "r2"));
        let filter = engine.derive_filter(&system, &explicit);
        assert_eq!(filter.realm.as_deref(), Some("r2"));
        assert_eq!(filter.owner_id.as_deref(), Some("any"));

        let unscoped = engine.derive_filter(&system, &resource(Action::List));
        assert_eq!(unscoped.realm.as_deref(), Some("r1"));
        assert_eq!(unscoped.owner_id, None);
    }

    #[test]
    fn test_intersect_merges_agreeing_terms() {
        let filter = DomainFilter {
            realm: Some("r1".to_string()),
            owner_id: Some("u1".to_string()),
            ..DomainFilter::default()
        };
        let mut caller = DocFilter::new();
        caller.insert("data_domain.realm".to_string(), "r1".into());
        caller.insert("username".to_string(), "bob".into());

        let merged = filter.intersect(Some(caller)).unwrap();
        assert_eq!(merged.get("data_domain.owner_id"), Some(&"u1".into()));
        assert_eq!(merged.get("data_domain.realm"), Some(&"r1".into()));
        assert_eq!(merged.get("username"), Some(&"bob".into()));
    }

    #[test]
    fn test_intersect_conflicting_term_is_empty() {
        let filter = DomainFilter {
            realm: Some("r1".to_string()),
            owner_id: Some("u1".to_string()),
            ..DomainFilter::default()
        };
        let mut caller = DocFilter::new();
        caller.insert("data_domain.owner_id".to_string(), "victim".into());

        assert!(filter.intersect(Some(caller)).is_none());
    }
}
