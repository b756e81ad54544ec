//! Per-execution-unit security context stack and the session guard that
//! manages it.
//!
//! A `RuleContext` is an explicitly-owned value created for each request (or
//! task) and threaded through data-access calls; it is never shared across
//! execution units, so reads and pushes need no coordination beyond an
//! uncontended mutex. A `SecuritySession` owns exactly one stack entry for
//! its lifetime: opening pushes, and `Drop` pops on normal return, early
//! `?` exit, panic unwind, and task cancellation alike. Sessions nest; the
//! inner entry shadows the outer until the inner guard drops.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::domain::{Action, PrincipalContext, ResourceContext};
use super::rules::{RuleEngine, RuleSet};

// ═══════════════════════════════════════════════════════════════════════════════
// Active Context
// ═══════════════════════════════════════════════════════════════════════════════

/// The (principal, resource) pair governing the current call.
#[derive(Debug, Clone)]
pub struct ActiveContext {
    pub principal: PrincipalContext,
    pub resource: ResourceContext,
}

impl ActiveContext {
    pub fn new(principal: PrincipalContext, resource: ResourceContext) -> Self {
        Self {
            principal,
            resource,
        }
    }

    /// The sentinel returned when no session is active. Anonymous callers
    /// are rejected by default unless a rule explicitly grants them access.
    pub fn anonymous() -> Self {
        Self {
            principal: PrincipalContext::anonymous(),
            resource: ResourceContext::new("*", Action::Read, ""),
        }
    }

    /// Whether this is the no-session sentinel.
    pub fn is_anonymous(&self) -> bool {
        self.principal.is_anonymous()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rule Context
// ═══════════════════════════════════════════════════════════════════════════════

/// The ordered stack of active (principal, resource) pairs for one execution
/// unit, plus a handle to the shared rule table.
///
/// Invariant: only `SecuritySession` guards mutate the stack (push/pop are
/// module-private). The stack must be empty at the start and end of any
/// top-level request; a non-zero [`depth`](Self::depth) at a request
/// boundary indicates a leaked session.
#[derive(Debug)]
pub struct RuleContext {
    stack: Mutex<Vec<ActiveContext>>,
    engine: RuleEngine,
}

impl RuleContext {
    /// Create an empty context bound to the shared rule table.
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            stack: Mutex::new(Vec::new()),
            engine: RuleEngine::new(rules),
        }
    }

    /// The rule engine evaluating against this context's rule table.
    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// The top entry, or the anonymous sentinel if the stack is empty.
    pub fn current(&self) -> ActiveContext {
        self.stack
            .lock()
            .last()
            .cloned()
            .unwrap_or_else(ActiveContext::anonymous)
    }

    /// Number of active entries. Diagnostic: non-zero at a request boundary
    /// means some session was opened and never closed.
    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// Forcibly empty the stack.
    ///
    /// Last-resort cleanup for leaked entries after an abnormal exit (e.g.
    /// in a top-level handler's cleanup path). Never a substitute for
    /// closing sessions; the guard's `Drop` is the release mechanism.
    pub fn clear(&self) {
        let mut stack = self.stack.lock();
        if !stack.is_empty() {
            warn!(leaked = stack.len(), "Clearing leaked security context entries");
            stack.clear();
        }
    }

    fn push(&self, entry: ActiveContext) {
        debug!(
            principal = %entry.principal.user_id,
            realm = %entry.resource.realm,
            "Entering security session"
        );
        self.stack.lock().push(entry);
    }

    fn pop(&self) {
        let entry = self.stack.lock().pop();
        match entry {
            Some(entry) => debug!(
                principal = %entry.principal.user_id,
                realm = %entry.resource.realm,
                "Leaving security session"
            ),
            // Only reachable after a clear() raced a live guard.
            None => warn!("Security session closed on an empty context stack"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Security Session
// ═══════════════════════════════════════════════════════════════════════════════

/// Scoped acquisition of a (principal, resource) pair.
///
/// Opening never fails; authorization failures surface from repository and
/// engine calls made while the session is active. The previously active
/// entry (possibly none) is restored exactly when the guard drops.
#[must_use = "a session releases its context entry when dropped"]
pub struct SecuritySession<'a> {
    ctx: &'a RuleContext,
}

impl<'a> SecuritySession<'a> {
    /// Push the pair onto the context stack and return the owning guard.
    pub fn open(
        ctx: &'a RuleContext,
        principal: PrincipalContext,
        resource: ResourceContext,
    ) -> Self {
        ctx.push(ActiveContext::new(principal, resource));
        Self { ctx }
    }
}

impl Drop for SecuritySession<'_> {
    fn drop(&mut self) {
        self.ctx.pop();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
