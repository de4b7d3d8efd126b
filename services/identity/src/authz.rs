//! Role × section × permission authorization
//!
//! Guards resolve an operation's rules from a [`PolicyTable`] and ask the
//! [`AuthorizationEngine`] for a decision. Both steps fail closed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{DenyReason, IdentityError, IdentityResult};
use crate::models::{Principal, RoleRule};
use crate::repositories::RoleRepository;

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow { role_name: String },
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow { .. })
    }
}

/// Operation name → acceptable role rules
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    rules: HashMap<String, Vec<RoleRule>>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rules` for `operation`, replacing any earlier entry.
    pub fn with(mut self, operation: impl Into<String>, rules: Vec<RoleRule>) -> Self {
        self.rules.insert(operation.into(), rules);
        self
    }

    /// Rules for `operation`; unknown operations have none and are denied.
    pub fn resolve_required_rules(&self, operation: &str) -> &[RoleRule] {
        self.rules.get(operation).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Gates for the role administration endpoints.
    pub fn role_admin_defaults() -> Self {
        let admin = || vec![RoleRule::role("admin")];
        Self::new()
            .with("roles.create", admin())
            .with("roles.delete", admin())
            .with("roles.update_permissions", admin())
            .with("roles.assign", admin())
            .with("roles.remove", admin())
            .with("sections.create", admin())
            .with("permissions.create", admin())
            .with(
                "roles.list_grants",
                vec![
                    RoleRule::role("admin"),
                    RoleRule::scoped("manager", "roles", ["read"]),
                ],
            )
    }
}

#[derive(Clone)]
pub struct AuthorizationEngine<S> {
    store: S,
    policies: Arc<PolicyTable>,
}

impl<S: RoleRepository> AuthorizationEngine<S> {
    pub fn new(store: S, policies: PolicyTable) -> Self {
        Self {
            store,
            policies: Arc::new(policies),
        }
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Decide whether `principal` satisfies any of `rules`.
    pub async fn evaluate(
        &self,
        principal: Option<Principal>,
        rules: &[RoleRule],
    ) -> IdentityResult<AccessDecision> {
        if rules.is_empty() {
            return Ok(AccessDecision::Deny(DenyReason::NoRequiredRules));
        }
        let Some(principal) = principal else {
            return Ok(AccessDecision::Deny(DenyReason::MissingPrincipal));
        };

        let mut allowed: Vec<String> = rules.iter().map(|r| r.role.clone()).collect();
        allowed.sort();
        allowed.dedup();

        let Some(role) = self.store.find_principal_role(principal, &allowed).await? else {
            return Ok(AccessDecision::Deny(DenyReason::RoleMismatch));
        };

        let held: Vec<&RoleRule> = rules.iter().filter(|r| r.role == role.role_name).collect();
        if held.iter().any(|r| r.permissions.is_empty()) {
            return Ok(AccessDecision::Allow {
                role_name: role.role_name,
            });
        }

        for rule in held {
            if self
                .store
                .role_grants_any(role.id, rule.section.as_deref(), &rule.permissions)
                .await?
            {
                return Ok(AccessDecision::Allow {
                    role_name: role.role_name,
                });
            }
        }

        Ok(AccessDecision::Deny(DenyReason::PermissionMismatch))
    }

    /// Boolean projection of [`evaluate`](Self::evaluate).
    pub async fn check(&self, principal: Principal, rules: &[RoleRule]) -> IdentityResult<bool> {
        Ok(self.evaluate(Some(principal), rules).await?.is_allowed())
    }

    /// Guard entry point: resolve `operation` and raise `Forbidden` on denial.
    pub async fn authorize(
        &self,
        principal: Option<Principal>,
        operation: &str,
    ) -> IdentityResult<()> {
        let rules = self.policies.resolve_required_rules(operation);
        match self.evaluate(principal, rules).await? {
            AccessDecision::Allow { role_name } => {
                debug!(operation, role = %role_name, "Access granted");
                Ok(())
            }
            AccessDecision::Deny(reason) => {
                match reason {
                    DenyReason::MissingPrincipal => {
                        warn!(operation, "Guard reached without an authenticated principal")
                    }
                    _ => warn!(operation, reason = reason.as_str(), "Access denied"),
                }
                Err(IdentityError::Forbidden(reason))
            }
        }
    }
}
