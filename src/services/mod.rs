//! Service operations for each entity type
//!
//! Every operation takes the caller's principal (or `None` when the
//! transport could not authenticate one), asks the [`Authorizer`] for a
//! decision, then issues, persists and optionally synchronizes.

pub mod accounts;
pub mod api_users;
pub mod auth;
pub mod clusters;
pub mod health;
pub mod locks;
pub mod operators;
pub mod signing_keys;
pub mod users;
pub mod views;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

pub use accounts::{AccountService, CreateAccountRequest, DeleteAccountOptions, UpdateAccountRequest};
pub use api_users::{ApiUserService, CreateApiUserRequest, UpdateApiUserRequest};
pub use auth::{AuthService, LoginResponse};
pub use clusters::{
    ClusterService, CreateClusterRequest, FailedPush, SyncReport, UpdateClusterRequest,
};
pub use health::{HealthMonitor, HealthMonitorConfig};
pub use locks::WriteLocks;
pub use operators::{CreateOperatorRequest, OperatorService, UpdateOperatorRequest};
pub use signing_keys::{
    CreateSigningKeyRequest, SigningKeyService, UpdateSigningKeyRequest,
};
pub use users::{CreateUserRequest, UpdateUserRequest, UserService};
pub use views::{AccountView, ApiUserView, ClusterView, OperatorView, SigningKeyView, UserView};

use crate::auth::{Authorizer, Operation, Owned, Principal, SessionTokens};
use crate::db::{Entity, EntityStore, Page, Stores};
use crate::issuance::Issuer;
use crate::nats::ResolverConnector;
use crate::types::{GatekeeperError, Result};

/// Dependencies shared by every service
#[derive(Clone)]
pub struct ServiceContext {
    pub stores: Stores,
    pub issuer: Issuer,
    pub authorizer: Authorizer,
    pub connector: Arc<dyn ResolverConnector>,
    pub resolver_timeout: Duration,
    pub write_locks: WriteLocks,
}

impl ServiceContext {
    pub fn new(
        stores: Stores,
        issuer: Issuer,
        connector: Arc<dyn ResolverConnector>,
        resolver_timeout: Duration,
    ) -> Self {
        Self {
            authorizer: Authorizer::new(stores.clone()),
            stores,
            issuer,
            connector,
            resolver_timeout,
            write_locks: WriteLocks::new(),
        }
    }
}

/// Parent filter and pagination for list calls
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl ListQuery {
    pub fn under(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            ..Self::default()
        }
    }

    /// Page applied after visibility filtering
    pub fn page(&self) -> Page {
        Page::new(
            self.limit.unwrap_or(Page::MAX_LIMIT).clamp(1, Page::MAX_LIMIT),
            self.offset,
        )
    }
}

/// Names must be non-empty and free of whitespace at either end
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(GatekeeperError::Validation(format!("{kind} name is required")));
    }
    if name.trim() != name {
        return Err(GatekeeperError::Validation(format!(
            "{kind} name must not start or end with whitespace"
        )));
    }
    if name.len() > 128 {
        return Err(GatekeeperError::Validation(format!(
            "{kind} name must be at most 128 characters"
        )));
    }
    Ok(())
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Policy check, candidate fetch, visibility filter, then pagination
pub(crate) async fn list_visible<T: Entity + Owned>(
    ctx: &ServiceContext,
    principal: Option<&Principal>,
    operation: Operation,
    store: &dyn EntityStore<T>,
    query: &ListQuery,
) -> Result<Vec<T>> {
    let principal = Authorizer::authenticate(principal)?;
    Authorizer::check_policy(principal, operation)?;

    let candidates = match &query.parent_id {
        Some(parent_id) => store.list_by_parent(parent_id, Page::all()).await?,
        None => store.list(Page::all()).await?,
    };
    let visible = ctx.authorizer.filter_visible(principal, candidates).await;
    Ok(query.page().apply(visible))
}

/// All services over one context
#[derive(Clone)]
pub struct Services {
    pub operators: OperatorService,
    pub accounts: AccountService,
    pub users: UserService,
    pub signing_keys: SigningKeyService,
    pub clusters: ClusterService,
    pub api_users: ApiUserService,
    pub auth: AuthService,
}

impl Services {
    pub fn new(ctx: ServiceContext, tokens: SessionTokens) -> Self {
        Self {
            operators: OperatorService::new(ctx.clone()),
            accounts: AccountService::new(ctx.clone()),
            users: UserService::new(ctx.clone()),
            signing_keys: SigningKeyService::new(ctx.clone()),
            clusters: ClusterService::new(ctx.clone()),
            api_users: ApiUserService::new(ctx.clone()),
            auth: AuthService::new(ctx, tokens),
        }
    }
}
