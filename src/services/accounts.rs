//! Account service

use serde::Deserialize;
use tracing::{info, warn};

use super::clusters::open_resolver;
use super::views::AccountView;
use super::{list_visible, new_id, validate_name, ListQuery, ServiceContext};
use crate::auth::{Operation, Principal, Target};
use crate::db::schemas::{Account, JetStreamLimits, Metadata, ScopedSigningKey};
use crate::db::{Page, Stores};
use crate::types::{GatekeeperError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccountRequest {
    pub operator_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Unlimited when omitted
    #[serde(default)]
    pub jetstream: Option<JetStreamLimits>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub description: Option<String>,
    /// New quotas; the JWT is re-signed when present
    #[serde(default)]
    pub jetstream: Option<JetStreamLimits>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DeleteAccountOptions {
    /// Delete users and scoped signing keys too
    #[serde(default)]
    pub force: bool,
    /// Ask every cluster of the operator to drop the account JWT
    #[serde(default)]
    pub remove_from_clusters: bool,
}

/// Sign `account` under its operator with the given scoped keys registered
pub(crate) async fn signed_account_jwt(
    ctx: &ServiceContext,
    account: &Account,
    signing_keys: &[ScopedSigningKey],
) -> Result<String> {
    let operator = ctx.stores.operators.get_by_id(&account.operator_id).await?;
    ctx.issuer.account_jwt(&operator, account, signing_keys)
}

/// Remove an account with its users and scoped signing keys
pub(crate) async fn delete_account_tree(stores: &Stores, account: &Account) -> Result<()> {
    for user in stores.users.list_by_parent(&account.id, Page::all()).await? {
        stores.users.delete(&user.id).await?;
    }
    for key in stores.signing_keys.list_by_parent(&account.id, Page::all()).await? {
        stores.signing_keys.delete(&key.id).await?;
    }
    stores.accounts.delete(&account.id).await?;
    Ok(())
}

#[derive(Clone)]
pub struct AccountService {
    ctx: ServiceContext,
}

impl AccountService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(
        &self,
        principal: Option<&Principal>,
        request: CreateAccountRequest,
    ) -> Result<AccountView> {
        self.ctx
            .authorizer
            .authorize(
                principal,
                Operation::CreateAccount,
                Target::Operator(&request.operator_id),
            )
            .await?;
        validate_name("account", &request.name)?;

        let operator = self.ctx.stores.operators.get_by_id(&request.operator_id).await?;
        let limits = request.jetstream.unwrap_or_default();
        let identity = self
            .ctx
            .issuer
            .issue_account(&operator, &request.name, &limits)?;

        let account = Account {
            id: new_id(),
            operator_id: operator.id,
            name: request.name,
            description: request.description,
            encrypted_seed: identity.encrypted_seed,
            public_key: identity.public_key,
            jwt: identity.jwt,
            jetstream: limits,
            metadata: Metadata::new(),
        };
        let account = self.ctx.stores.accounts.create(account).await?;

        info!(
            account_id = %account.id,
            operator_id = %account.operator_id,
            name = %account.name,
            "Created account"
        );
        Ok(account.into())
    }

    pub async fn get(&self, principal: Option<&Principal>, id: &str) -> Result<AccountView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::GetAccount, Target::Account(id))
            .await?;
        Ok(self.ctx.stores.accounts.get_by_id(id).await?.into())
    }

    /// `parent_id` filters by operator
    pub async fn list(
        &self,
        principal: Option<&Principal>,
        query: &ListQuery,
    ) -> Result<Vec<AccountView>> {
        let accounts = list_visible(
            &self.ctx,
            principal,
            Operation::ListAccounts,
            self.ctx.stores.accounts.as_ref(),
            query,
        )
        .await?;
        Ok(accounts.into_iter().map(Into::into).collect())
    }

    /// Update descriptive fields; quota changes re-sign the JWT
    pub async fn update(
        &self,
        principal: Option<&Principal>,
        id: &str,
        request: UpdateAccountRequest,
    ) -> Result<AccountView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::UpdateAccount, Target::Account(id))
            .await?;

        let _guard = self.ctx.write_locks.lock(id).await;
        let mut account = self.ctx.stores.accounts.get_by_id(id).await?;
        if request.description.is_some() {
            account.description = request.description;
        }
        if let Some(limits) = request.jetstream {
            limits.validate().map_err(GatekeeperError::ClaimsValidation)?;
            account.jetstream = limits;
            let keys = self
                .ctx
                .stores
                .signing_keys
                .list_by_parent(id, Page::all())
                .await?;
            account.jwt = signed_account_jwt(&self.ctx, &account, &keys).await?;
            info!(account_id = %id, "Re-signed account with new JetStream limits");
        }
        Ok(self.ctx.stores.accounts.update(account).await?.into())
    }

    /// Delete an account.
    ///
    /// Fails with `Conflict` while it has users or scoped signing keys,
    /// unless `force` is set. System accounts go with their operator.
    pub async fn delete(
        &self,
        principal: Option<&Principal>,
        id: &str,
        options: DeleteAccountOptions,
    ) -> Result<()> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::DeleteAccount, Target::Account(id))
            .await?;

        let _guard = self.ctx.write_locks.lock(id).await;
        let stores = &self.ctx.stores;
        let account = stores.accounts.get_by_id(id).await?;
        let operator = stores.operators.get_by_id(&account.operator_id).await?;
        if operator.system_account_public_key.as_deref() == Some(account.public_key.as_str()) {
            return Err(GatekeeperError::Conflict(format!(
                "account '{}' is the system account of operator '{}'",
                account.name, operator.name
            )));
        }

        let users = stores.users.list_by_parent(id, Page::all()).await?;
        let keys = stores.signing_keys.list_by_parent(id, Page::all()).await?;
        if (!users.is_empty() || !keys.is_empty()) && !options.force {
            return Err(GatekeeperError::Conflict(format!(
                "account '{}' still has {} user(s) and {} scoped signing key(s)",
                account.name,
                users.len(),
                keys.len()
            )));
        }

        if options.remove_from_clusters {
            self.remove_from_clusters(&account).await;
        }

        delete_account_tree(stores, &account).await?;
        self.ctx.write_locks.forget(id);
        info!(account_id = %id, users = users.len(), "Deleted account");
        Ok(())
    }

    /// Best effort; failures are logged
    async fn remove_from_clusters(&self, account: &Account) {
        let clusters = match self
            .ctx
            .stores
            .clusters
            .list_by_parent(&account.operator_id, Page::all())
            .await
        {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!(account_id = %account.id, "Could not list clusters for removal: {}", e);
                return;
            }
        };

        for cluster in clusters {
            let removed = match open_resolver(&self.ctx, &cluster).await {
                Ok(resolver) => resolver
                    .delete_account(&account.public_key)
                    .await
                    .map_err(GatekeeperError::from),
                Err(e) => Err(e),
            };
            match removed {
                Ok(_) => info!(cluster = %cluster.name, account = %account.name, "Removed account from cluster"),
                Err(e) => warn!(
                    cluster = %cluster.name,
                    account = %account.name,
                    "Failed to remove account from cluster: {}", e
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::UNLIMITED;
    use crate::issuance::{decode_and_verify, AccountClaims, Claims};
    use crate::services::testing::{account_admin, admin, context, operator_admin};
    use crate::services::{CreateOperatorRequest, OperatorService, OperatorView};
    use crate::types::ErrorClass;

    async fn operator(ctx: &ServiceContext, name: &str) -> OperatorView {
        OperatorService::new(ctx.clone())
            .create(
                Some(&admin()),
                CreateOperatorRequest {
                    name: name.into(),
                    description: None,
                    skip_system_account: false,
                },
            )
            .await
            .unwrap()
    }

    fn request(operator_id: &str, name: &str) -> CreateAccountRequest {
        CreateAccountRequest {
            operator_id: operator_id.into(),
            name: name.into(),
            description: None,
            jetstream: None,
        }
    }

    #[tokio::test]
    async fn test_account_signed_by_operator() {
        let ctx = context();
        let op = operator(&ctx, "acme").await;
        let service = AccountService::new(ctx);
        let account = service
            .create(Some(&admin()), request(&op.id, "payments"))
            .await
            .unwrap();

        let claims: Claims<AccountClaims> = decode_and_verify(&account.jwt).unwrap();
        assert_eq!(claims.iss, op.public_key);
        assert_eq!(claims.nats.limits.streams, UNLIMITED);
    }

    #[tokio::test]
    async fn test_sibling_name_collision() {
        let ctx = context();
        let op = operator(&ctx, "acme").await;
        let other = operator(&ctx, "globex").await;
        let service = AccountService::new(ctx);
        service.create(Some(&admin()), request(&op.id, "payments")).await.unwrap();

        let err = service
            .create(Some(&admin()), request(&op.id, "payments"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::AlreadyExists);

        service
            .create(Some(&admin()), request(&other.id, "payments"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_negative_quota_is_invalid_argument() {
        let ctx = context();
        let op = operator(&ctx, "acme").await;
        let service = AccountService::new(ctx.clone());
        let mut req = request(&op.id, "payments");
        req.jetstream = Some(JetStreamLimits {
            max_streams: -3,
            ..JetStreamLimits::unlimited()
        });
        let err = service.create(Some(&admin()), req).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidArgument);
        assert!(ctx
            .stores
            .accounts
            .get_by_name(Some(&op.id), "payments")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_quota_update_resigns_with_same_key() {
        let ctx = context();
        let op = operator(&ctx, "acme").await;
        let service = AccountService::new(ctx);
        let account = service
            .create(Some(&admin()), request(&op.id, "payments"))
            .await
            .unwrap();

        let updated = service
            .update(
                Some(&admin()),
                &account.id,
                UpdateAccountRequest {
                    description: None,
                    jetstream: Some(JetStreamLimits {
                        max_streams: 10,
                        ..JetStreamLimits::unlimited()
                    }),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.public_key, account.public_key);
        assert_ne!(updated.jwt, account.jwt);
        let claims: Claims<AccountClaims> = decode_and_verify(&updated.jwt).unwrap();
        assert_eq!(claims.nats.limits.streams, 10);
        assert_eq!(claims.sub, account.public_key);
    }

    #[tokio::test]
    async fn test_operator_admin_confined_to_own_operator() {
        let ctx = context();
        let mine = operator(&ctx, "acme").await;
        let theirs = operator(&ctx, "globex").await;
        let service = AccountService::new(ctx);
        let p = operator_admin(&mine.id);

        service.create(Some(&p), request(&mine.id, "payments")).await.unwrap();
        let err = service
            .create(Some(&p), request(&theirs.id, "payments"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::PermissionDenied);

        let visible = service.list(Some(&p), &ListQuery::default()).await.unwrap();
        assert!(visible.iter().all(|a| a.operator_id == mine.id));
    }

    #[tokio::test]
    async fn test_account_admin_cannot_update_quotas() {
        let ctx = context();
        let op = operator(&ctx, "acme").await;
        let service = AccountService::new(ctx);
        let account = service
            .create(Some(&admin()), request(&op.id, "payments"))
            .await
            .unwrap();
        let p = account_admin(&account.id);

        service.get(Some(&p), &account.id).await.unwrap();
        let err = service
            .update(Some(&p), &account.id, UpdateAccountRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::PermissionDenied);
    }

    #[tokio::test]
    async fn test_system_account_not_deletable() {
        let ctx = context();
        let op = operator(&ctx, "acme").await;
        let sys = ctx
            .stores
            .accounts
            .get_by_name(Some(&op.id), "SYS")
            .await
            .unwrap();
        let err = AccountService::new(ctx)
            .delete(Some(&admin()), &sys.id, DeleteAccountOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeeperError::Conflict(_)));
    }
}
