//! Coarse policy plus ownership-scoped authorization.
//!
//! Evaluation order for a single-target operation:
//! authentication, role policy, ownership scope. Each stage fails with a
//! distinct error (`Unauthenticated`, `PermissionDenied` at `policy`,
//! `PermissionDenied` at `ownership`). Scope resolution walks parents
//! (User → Account → Operator); a dangling parent is `NotFound`.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::permissions::{is_operation_allowed, Operation, Role};
use super::principal::Principal;
use crate::db::schemas::{Account, ApiUser, Cluster, Operator, ScopedSigningKey, User};
use crate::db::Stores;
use crate::types::{GatekeeperError, Result};

/// Position of an entity in the operator/account hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub operator_id: String,
    pub account_id: Option<String>,
}

/// What an entity hangs off, as recorded on the entity itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner<'a> {
    /// The entity is this operator, or lives directly under it
    Operator(&'a str),
    /// The entity is this account
    Account {
        operator_id: &'a str,
        account_id: &'a str,
    },
    /// The entity lives under this account
    UnderAccount(&'a str),
    /// Outside the identity hierarchy (API users)
    Unscoped,
}

/// Entities with a position in the hierarchy
pub trait Owned {
    fn owner(&self) -> Owner<'_>;
}

impl Owned for Operator {
    fn owner(&self) -> Owner<'_> {
        Owner::Operator(&self.id)
    }
}

impl Owned for Account {
    fn owner(&self) -> Owner<'_> {
        Owner::Account {
            operator_id: &self.operator_id,
            account_id: &self.id,
        }
    }
}

impl Owned for User {
    fn owner(&self) -> Owner<'_> {
        Owner::UnderAccount(&self.account_id)
    }
}

impl Owned for ScopedSigningKey {
    fn owner(&self) -> Owner<'_> {
        Owner::UnderAccount(&self.account_id)
    }
}

impl Owned for Cluster {
    fn owner(&self) -> Owner<'_> {
        Owner::Operator(&self.operator_id)
    }
}

impl Owned for ApiUser {
    fn owner(&self) -> Owner<'_> {
        Owner::Unscoped
    }
}

/// Target of a single-entity operation.
///
/// Creates name the parent they create under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Global,
    Operator(&'a str),
    Account(&'a str),
    User(&'a str),
    ScopedSigningKey(&'a str),
    Cluster(&'a str),
    ApiUser(&'a str),
}

/// Parent lookups memoized across one authorization or filter pass
#[derive(Default)]
struct ScopeCache {
    operators: HashSet<String>,
    accounts: HashMap<String, String>,
}

/// Authorization engine over the entity stores
#[derive(Clone)]
pub struct Authorizer {
    stores: Stores,
}

impl Authorizer {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Authentication stage
    pub fn authenticate(principal: Option<&Principal>) -> Result<&Principal> {
        principal.ok_or_else(|| GatekeeperError::Unauthenticated("no principal".into()))
    }

    /// Coarse policy stage only. List operations use this, then filter.
    pub fn check_policy(principal: &Principal, operation: Operation) -> Result<()> {
        if is_operation_allowed(operation, principal.role) {
            Ok(())
        } else {
            debug!(
                user = %principal.username,
                role = %principal.role,
                operation = %operation,
                "Denied by role policy"
            );
            Err(GatekeeperError::policy_denied(format!(
                "{} may not {} {}",
                principal.role,
                operation.action(),
                operation.resource()
            )))
        }
    }

    /// Full check for an operation on one target
    pub async fn authorize(
        &self,
        principal: Option<&Principal>,
        operation: Operation,
        target: Target<'_>,
    ) -> Result<()> {
        let principal = Self::authenticate(principal)?;
        Self::check_policy(principal, operation)?;
        if principal.is_admin() {
            return Ok(());
        }

        let scope = self.scope_of_target(target).await?;
        if permits(principal, scope.as_ref()) {
            Ok(())
        } else {
            debug!(
                user = %principal.username,
                operation = %operation,
                target = ?target,
                "Denied by ownership scope"
            );
            Err(GatekeeperError::ownership_denied(format!(
                "{operation} target is outside the principal's scope"
            )))
        }
    }

    /// Keep only the entities the principal may see.
    ///
    /// Never fails: entities whose parents cannot be resolved are dropped.
    pub async fn filter_visible<T: Owned>(&self, principal: &Principal, items: Vec<T>) -> Vec<T> {
        if principal.is_admin() {
            return items;
        }
        let mut cache = ScopeCache::default();
        let mut visible = Vec::with_capacity(items.len());
        for item in items {
            match self.resolve(item.owner(), &mut cache).await {
                Ok(scope) if permits(principal, scope.as_ref()) => visible.push(item),
                Ok(_) => {}
                Err(e) => debug!("Dropping entity with unresolvable scope: {}", e),
            }
        }
        visible
    }

    async fn scope_of_target(&self, target: Target<'_>) -> Result<Option<Scope>> {
        let mut cache = ScopeCache::default();
        match target {
            Target::Global => Ok(None),
            Target::Operator(id) => {
                let op = self.stores.operators.get_by_id(id).await?;
                self.resolve(op.owner(), &mut cache).await
            }
            Target::Account(id) => {
                let account = self.stores.accounts.get_by_id(id).await?;
                self.resolve(account.owner(), &mut cache).await
            }
            Target::User(id) => {
                let user = self.stores.users.get_by_id(id).await?;
                self.resolve(user.owner(), &mut cache).await
            }
            Target::ScopedSigningKey(id) => {
                let key = self.stores.signing_keys.get_by_id(id).await?;
                self.resolve(key.owner(), &mut cache).await
            }
            Target::Cluster(id) => {
                let cluster = self.stores.clusters.get_by_id(id).await?;
                self.resolve(cluster.owner(), &mut cache).await
            }
            Target::ApiUser(id) => {
                let user = self.stores.api_users.get_by_id(id).await?;
                self.resolve(user.owner(), &mut cache).await
            }
        }
    }

    async fn resolve(&self, owner: Owner<'_>, cache: &mut ScopeCache) -> Result<Option<Scope>> {
        match owner {
            Owner::Unscoped => Ok(None),
            Owner::Operator(operator_id) => {
                self.require_operator(operator_id, cache).await?;
                Ok(Some(Scope {
                    operator_id: operator_id.to_string(),
                    account_id: None,
                }))
            }
            Owner::Account {
                operator_id,
                account_id,
            } => {
                self.require_operator(operator_id, cache).await?;
                Ok(Some(Scope {
                    operator_id: operator_id.to_string(),
                    account_id: Some(account_id.to_string()),
                }))
            }
            Owner::UnderAccount(account_id) => {
                let operator_id = match cache.accounts.get(account_id) {
                    Some(operator_id) => operator_id.clone(),
                    None => {
                        let account = self.stores.accounts.get_by_id(account_id).await?;
                        cache
                            .accounts
                            .insert(account.id.clone(), account.operator_id.clone());
                        account.operator_id
                    }
                };
                self.require_operator(&operator_id, cache).await?;
                Ok(Some(Scope {
                    operator_id,
                    account_id: Some(account_id.to_string()),
                }))
            }
        }
    }

    async fn require_operator(&self, operator_id: &str, cache: &mut ScopeCache) -> Result<()> {
        if !cache.operators.contains(operator_id) {
            self.stores.operators.get_by_id(operator_id).await?;
            cache.operators.insert(operator_id.to_string());
        }
        Ok(())
    }
}

/// Ownership rule for the scoped roles
fn permits(principal: &Principal, scope: Option<&Scope>) -> bool {
    match (principal.role, scope) {
        (Role::Admin, _) => true,
        (_, None) => false,
        (Role::OperatorAdmin, Some(scope)) => {
            principal.operator_id.as_deref() == Some(scope.operator_id.as_str())
        }
        (Role::AccountAdmin, Some(scope)) => {
            principal.account_id.is_some() && principal.account_id == scope.account_id
        }
    }
}
