//! Tenant/endpoint/subsystem allowlist: determines whether the controller is
//! in scope to act on a given target at all.
//!
//! A small registry type wrapping a `Vec` of match rules with an
//! `is_in_scope` / `scope_reason` pair, matching on a tenant/endpoint/subsystem
//! triple where each field may be wildcarded.

use crate::control::model::AllowlistEntry;

const WILDCARD: &str = "*";

/// Determines whether `(tenant_id, endpoint_class, subsystem_id)` is in
/// scope for controller action. An empty allowlist is inert by construction:
/// `is_in_scope` always returns `false`, making every signal impossible.
#[derive(Debug, Clone, Default)]
pub struct AllowlistManager {
    entries: Vec<AllowlistEntry>,
}

impl AllowlistManager {
    /// Build a manager from a set of entries (as loaded from config).
    #[must_use]
    pub fn new(entries: Vec<AllowlistEntry>) -> Self {
        Self { entries }
    }

    /// The entries currently in effect.
    #[must_use]
    pub fn entries(&self) -> &[AllowlistEntry] {
        &self.entries
    }

    /// Whether the allowlist has any entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `target` is in scope for controller action.
    ///
    /// A wildcard (`"*"`) field in an entry matches any value of that field;
    /// a non-wildcard field requires exact equality. An empty allowlist never
    /// matches anything, regardless of target.
    #[must_use]
    pub fn is_in_scope(&self, tenant_id: &str, endpoint_class: &str, subsystem_id: &str) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        self.entries
            .iter()
            .any(|entry| field_matches(&entry.tenant_id, tenant_id)
                && field_matches(&entry.endpoint_class, endpoint_class)
                && field_matches(&entry.subsystem_id, subsystem_id))
    }

    /// Convenience overload for subsystem-only scoping (tenant/endpoint
    /// wildcarded), the shape the `DecisionEngine` needs for budget- and
    /// mode-triggered signals that are not yet tenant-scoped.
    #[must_use]
    pub fn is_subsystem_in_scope(&self, subsystem_id: &str) -> bool {
        self.is_in_scope(WILDCARD, WILDCARD, subsystem_id)
    }

    /// Replace the entry set wholesale, returning the old set for audit
    /// logging by the caller (§6: `allowlist_update` audit record).
    pub fn replace(&mut self, new_entries: Vec<AllowlistEntry>) -> Vec<AllowlistEntry> {
        std::mem::replace(&mut self.entries, new_entries)
    }
}

fn field_matches(configured: &str, actual: &str) -> bool {
    configured == WILDCARD || configured == actual
}
