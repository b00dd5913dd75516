//! Operator service
//!
//! Creating an operator also creates its `SYS` system account unless
//! suppressed. The pair is persisted operator first; if the account
//! cannot be stored the operator is removed again.

use serde::Deserialize;
use tracing::{error, info, warn};

use super::accounts::delete_account_tree;
use super::views::OperatorView;
use super::{list_visible, new_id, validate_name, ListQuery, ServiceContext};
use crate::auth::{Operation, Principal, Target};
use crate::db::schemas::{Account, Metadata, Operator, SYSTEM_ACCOUNT_NAME};
use crate::db::Page;
use crate::issuance::issuer::SYSTEM_ACCOUNT_LIMITS;
use crate::types::{GatekeeperError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOperatorRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Do not create the `SYS` system account
    #[serde(default)]
    pub skip_system_account: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOperatorRequest {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct OperatorService {
    ctx: ServiceContext,
}

impl OperatorService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(
        &self,
        principal: Option<&Principal>,
        request: CreateOperatorRequest,
    ) -> Result<OperatorView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::CreateOperator, Target::Global)
            .await?;
        validate_name("operator", &request.name)?;

        let issued = self
            .ctx
            .issuer
            .issue_operator(&request.name, !request.skip_system_account)?;

        let operator = Operator {
            id: new_id(),
            name: request.name,
            description: request.description,
            encrypted_seed: issued.operator.encrypted_seed,
            public_key: issued.operator.public_key,
            jwt: issued.operator.jwt,
            system_account_public_key: issued
                .system_account
                .as_ref()
                .map(|sys| sys.public_key.clone()),
            metadata: Metadata::new(),
        };
        let operator = self.ctx.stores.operators.create(operator).await?;

        if let Some(sys) = issued.system_account {
            let account = Account {
                id: new_id(),
                operator_id: operator.id.clone(),
                name: SYSTEM_ACCOUNT_NAME.to_string(),
                description: Some("System account".to_string()),
                encrypted_seed: sys.encrypted_seed,
                public_key: sys.public_key,
                jwt: sys.jwt,
                jetstream: SYSTEM_ACCOUNT_LIMITS,
                metadata: Metadata::new(),
            };
            if let Err(e) = self.ctx.stores.accounts.create(account).await {
                warn!(operator_id = %operator.id, "System account creation failed: {}", e);
                if let Err(cleanup) = self.ctx.stores.operators.delete(&operator.id).await {
                    error!(
                        operator_id = %operator.id,
                        "Failed to remove operator after system account failure: {}", cleanup
                    );
                }
                return Err(e.into());
            }
        }

        info!(operator_id = %operator.id, name = %operator.name, "Created operator");
        Ok(operator.into())
    }

    pub async fn get(&self, principal: Option<&Principal>, id: &str) -> Result<OperatorView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::GetOperator, Target::Operator(id))
            .await?;
        Ok(self.ctx.stores.operators.get_by_id(id).await?.into())
    }

    pub async fn list(
        &self,
        principal: Option<&Principal>,
        query: &ListQuery,
    ) -> Result<Vec<OperatorView>> {
        let operators = list_visible(
            &self.ctx,
            principal,
            Operation::ListOperators,
            self.ctx.stores.operators.as_ref(),
            &ListQuery {
                parent_id: None,
                ..query.clone()
            },
        )
        .await?;
        Ok(operators.into_iter().map(Into::into).collect())
    }

    pub async fn update(
        &self,
        principal: Option<&Principal>,
        id: &str,
        request: UpdateOperatorRequest,
    ) -> Result<OperatorView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::UpdateOperator, Target::Operator(id))
            .await?;

        let mut operator = self.ctx.stores.operators.get_by_id(id).await?;
        if request.description.is_some() {
            operator.description = request.description;
        }
        Ok(self.ctx.stores.operators.update(operator).await?.into())
    }

    /// Delete an operator.
    ///
    /// Fails with `Conflict` while it has accounts (other than its system
    /// account) or clusters, unless `force` is set.
    pub async fn delete(&self, principal: Option<&Principal>, id: &str, force: bool) -> Result<()> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::DeleteOperator, Target::Operator(id))
            .await?;

        let stores = &self.ctx.stores;
        let operator = stores.operators.get_by_id(id).await?;
        let accounts = stores.accounts.list_by_parent(id, Page::all()).await?;
        let clusters = stores.clusters.list_by_parent(id, Page::all()).await?;

        let tenant_accounts = accounts
            .iter()
            .filter(|a| Some(a.public_key.as_str()) != operator.system_account_public_key.as_deref())
            .count();
        if (tenant_accounts > 0 || !clusters.is_empty()) && !force {
            return Err(GatekeeperError::Conflict(format!(
                "operator '{}' still has {} account(s) and {} cluster(s)",
                operator.name,
                tenant_accounts,
                clusters.len()
            )));
        }

        for cluster in &clusters {
            stores.clusters.delete(&cluster.id).await?;
            self.ctx.write_locks.forget(&cluster.id);
        }
        for account in &accounts {
            delete_account_tree(stores, account).await?;
            self.ctx.write_locks.forget(&account.id);
        }
        stores.operators.delete(id).await?;

        info!(
            operator_id = %id,
            accounts = accounts.len(),
            clusters = clusters.len(),
            "Deleted operator"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::{decode_and_verify, AccountClaims, Claims, OperatorClaims};
    use crate::services::testing::{account_admin, admin, context, operator_admin};
    use crate::services::{AccountService, CreateAccountRequest};
    use crate::types::ErrorClass;

    fn create(name: &str) -> CreateOperatorRequest {
        CreateOperatorRequest {
            name: name.into(),
            description: None,
            skip_system_account: false,
        }
    }

    #[tokio::test]
    async fn test_create_operator_with_system_account() {
        let ctx = context();
        let service = OperatorService::new(ctx.clone());
        let op = service.create(Some(&admin()), create("acme")).await.unwrap();

        let claims: Claims<OperatorClaims> = decode_and_verify(&op.jwt).unwrap();
        assert_eq!(claims.iss, op.public_key);
        assert!(op.public_key.starts_with('O'));

        let sys = ctx
            .stores
            .accounts
            .get_by_name(Some(&op.id), SYSTEM_ACCOUNT_NAME)
            .await
            .unwrap();
        assert_eq!(op.system_account_public_key.as_deref(), Some(sys.public_key.as_str()));
        let sys_claims: Claims<AccountClaims> = decode_and_verify(&sys.jwt).unwrap();
        assert_eq!(sys_claims.iss, op.public_key);
    }

    #[tokio::test]
    async fn test_duplicate_operator_name() {
        let service = OperatorService::new(context());
        service.create(Some(&admin()), create("acme")).await.unwrap();
        let err = service.create(Some(&admin()), create("acme")).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::AlreadyExists);
    }

    #[tokio::test]
    async fn test_only_admin_creates_operators() {
        let service = OperatorService::new(context());
        let err = service
            .create(Some(&operator_admin("x")), create("acme"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::PermissionDenied);
        let err = service.create(None, create("acme")).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unauthenticated);
    }

    #[tokio::test]
    async fn test_list_is_filtered_for_operator_admin() {
        let service = OperatorService::new(context());
        let a = service.create(Some(&admin()), create("a")).await.unwrap();
        service.create(Some(&admin()), create("b")).await.unwrap();

        let visible = service
            .list(Some(&operator_admin(&a.id)), &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, a.id);

        let none = service
            .list(Some(&account_admin("nope")), &ListQuery::default())
            .await;
        assert_eq!(none.unwrap_err().class(), ErrorClass::PermissionDenied);
    }

    #[tokio::test]
    async fn test_delete_with_accounts_requires_force() {
        let ctx = context();
        let service = OperatorService::new(ctx.clone());
        let op = service.create(Some(&admin()), create("acme")).await.unwrap();
        AccountService::new(ctx.clone())
            .create(
                Some(&admin()),
                CreateAccountRequest {
                    operator_id: op.id.clone(),
                    name: "payments".into(),
                    description: None,
                    jetstream: None,
                },
            )
            .await
            .unwrap();

        let err = service.delete(Some(&admin()), &op.id, false).await.unwrap_err();
        assert!(matches!(err, GatekeeperError::Conflict(_)));

        service.delete(Some(&admin()), &op.id, true).await.unwrap();
        assert!(ctx.stores.accounts.list(Page::all()).await.unwrap().is_empty());
        assert_eq!(
            service.get(Some(&admin()), &op.id).await.unwrap_err().class(),
            ErrorClass::NotFound
        );
    }

    #[tokio::test]
    async fn test_delete_with_only_system_account() {
        let ctx = context();
        let service = OperatorService::new(ctx.clone());
        let op = service.create(Some(&admin()), create("acme")).await.unwrap();
        service.delete(Some(&admin()), &op.id, false).await.unwrap();
        assert!(ctx.stores.accounts.list(Page::all()).await.unwrap().is_empty());
    }
}
