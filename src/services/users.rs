//! User service

use serde::Deserialize;
use tracing::info;

use super::views::UserView;
use super::{list_visible, new_id, validate_name, ListQuery, ServiceContext};
use crate::auth::{Operation, Principal, Target};
use crate::db::schemas::{Metadata, User};
use crate::issuance::{Credentials, UserSigner};
use crate::types::{GatekeeperError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Sign with this scoped key and inherit its permissions
    #[serde(default)]
    pub scoped_signing_key_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct UserService {
    ctx: ServiceContext,
}

impl UserService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(
        &self,
        principal: Option<&Principal>,
        request: CreateUserRequest,
    ) -> Result<UserView> {
        self.ctx
            .authorizer
            .authorize(
                principal,
                Operation::CreateUser,
                Target::Account(&request.account_id),
            )
            .await?;
        validate_name("user", &request.name)?;

        // Held so a concurrent template edit cannot leave this user on the old template
        let _guard = self.ctx.write_locks.lock(&request.account_id).await;
        let stores = &self.ctx.stores;
        let account = stores.accounts.get_by_id(&request.account_id).await?;
        let scoped_key = match &request.scoped_signing_key_id {
            Some(key_id) => {
                let key = stores.signing_keys.get_by_id(key_id).await?;
                if key.account_id != account.id {
                    return Err(GatekeeperError::Validation(format!(
                        "scoped signing key '{}' does not belong to account '{}'",
                        key.name, account.name
                    )));
                }
                Some(key)
            }
            None => None,
        };

        let signer = match &scoped_key {
            Some(key) => UserSigner::Scoped(key),
            None => UserSigner::Account,
        };
        let identity = self.ctx.issuer.issue_user(&account, &request.name, signer)?;

        let user = User {
            id: new_id(),
            account_id: account.id,
            name: request.name,
            description: request.description,
            encrypted_seed: identity.encrypted_seed,
            public_key: identity.public_key,
            jwt: identity.jwt,
            scoped_signing_key_id: scoped_key.map(|k| k.id),
            metadata: Metadata::new(),
        };
        let user = stores.users.create(user).await?;

        info!(
            user_id = %user.id,
            account_id = %user.account_id,
            scoped = user.scoped_signing_key_id.is_some(),
            "Created user"
        );
        Ok(user.into())
    }

    pub async fn get(&self, principal: Option<&Principal>, id: &str) -> Result<UserView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::GetUser, Target::User(id))
            .await?;
        Ok(self.ctx.stores.users.get_by_id(id).await?.into())
    }

    /// `parent_id` filters by account
    pub async fn list(&self, principal: Option<&Principal>, query: &ListQuery) -> Result<Vec<UserView>> {
        let users = list_visible(
            &self.ctx,
            principal,
            Operation::ListUsers,
            self.ctx.stores.users.as_ref(),
            query,
        )
        .await?;
        Ok(users.into_iter().map(Into::into).collect())
    }

    pub async fn update(
        &self,
        principal: Option<&Principal>,
        id: &str,
        request: UpdateUserRequest,
    ) -> Result<UserView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::UpdateUser, Target::User(id))
            .await?;

        let account_id = self.ctx.stores.users.get_by_id(id).await?.account_id;
        let _guard = self.ctx.write_locks.lock(&account_id).await;
        let mut user = self.ctx.stores.users.get_by_id(id).await?;
        if request.description.is_some() {
            user.description = request.description;
        }
        Ok(self.ctx.stores.users.update(user).await?.into())
    }

    pub async fn delete(&self, principal: Option<&Principal>, id: &str) -> Result<()> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::DeleteUser, Target::User(id))
            .await?;
        self.ctx.stores.users.delete(id).await?;
        info!(user_id = %id, "Deleted user");
        Ok(())
    }

    /// Credentials bundle for a user. Contains the user's seed.
    pub async fn credentials(&self, principal: Option<&Principal>, id: &str) -> Result<Credentials> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::GetUserCredentials, Target::User(id))
            .await?;
        let user = self.ctx.stores.users.get_by_id(id).await?;
        info!(user_id = %id, "Issued credentials download");
        self.ctx.issuer.user_credentials(&user)
    }
}
