//! Scoped signing key service
//!
//! The owning account's JWT lists every scoped key, so creating, editing
//! or deleting a key re-signs the account. Template edits also re-sign
//! every user issued under the key. All new JWTs are signed before
//! anything is written, and each operation holds the account lock from
//! its first read to its last write.

use serde::Deserialize;
use tracing::{error, info};

use super::accounts::signed_account_jwt;
use super::views::SigningKeyView;
use super::{list_visible, new_id, validate_name, ListQuery, ServiceContext};
use crate::auth::{Operation, Principal, Target};
use crate::db::schemas::{Metadata, PermissionTemplate, ScopedSigningKey};
use crate::db::Page;
use crate::issuance::UserSigner;
use crate::types::{GatekeeperError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSigningKeyRequest {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: PermissionTemplate,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSigningKeyRequest {
    #[serde(default)]
    pub description: Option<String>,
    /// New template; re-signs the account and the key's users
    #[serde(default)]
    pub permissions: Option<PermissionTemplate>,
}

#[derive(Clone)]
pub struct SigningKeyService {
    ctx: ServiceContext,
}

impl SigningKeyService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(
        &self,
        principal: Option<&Principal>,
        request: CreateSigningKeyRequest,
    ) -> Result<SigningKeyView> {
        self.ctx
            .authorizer
            .authorize(
                principal,
                Operation::CreateScopedSigningKey,
                Target::Account(&request.account_id),
            )
            .await?;
        validate_name("scoped signing key", &request.name)?;

        let _guard = self.ctx.write_locks.lock(&request.account_id).await;
        let stores = &self.ctx.stores;
        let mut account = stores.accounts.get_by_id(&request.account_id).await?;
        let sealed = self
            .ctx
            .issuer
            .issue_signing_key(&account, &request.permissions)?;

        let key = ScopedSigningKey {
            id: new_id(),
            account_id: account.id.clone(),
            name: request.name,
            description: request.description,
            encrypted_seed: sealed.encrypted_seed,
            public_key: sealed.public_key,
            permissions: request.permissions,
            metadata: Metadata::new(),
        };

        let mut keys = stores.signing_keys.list_by_parent(&account.id, Page::all()).await?;
        keys.push(key.clone());
        account.jwt = signed_account_jwt(&self.ctx, &account, &keys).await?;

        let key = stores.signing_keys.create(key).await?;
        if let Err(e) = stores.accounts.update(account).await {
            if let Err(cleanup) = stores.signing_keys.delete(&key.id).await {
                error!(key_id = %key.id, "Failed to remove scoped key after account re-sign failure: {}", cleanup);
            }
            return Err(e.into());
        }

        info!(
            key_id = %key.id,
            account_id = %key.account_id,
            name = %key.name,
            "Created scoped signing key"
        );
        Ok(key.into())
    }

    pub async fn get(&self, principal: Option<&Principal>, id: &str) -> Result<SigningKeyView> {
        self.ctx
            .authorizer
            .authorize(
                principal,
                Operation::GetScopedSigningKey,
                Target::ScopedSigningKey(id),
            )
            .await?;
        Ok(self.ctx.stores.signing_keys.get_by_id(id).await?.into())
    }

    /// `parent_id` filters by account
    pub async fn list(
        &self,
        principal: Option<&Principal>,
        query: &ListQuery,
    ) -> Result<Vec<SigningKeyView>> {
        let keys = list_visible(
            &self.ctx,
            principal,
            Operation::ListScopedSigningKeys,
            self.ctx.stores.signing_keys.as_ref(),
            query,
        )
        .await?;
        Ok(keys.into_iter().map(Into::into).collect())
    }

    pub async fn update(
        &self,
        principal: Option<&Principal>,
        id: &str,
        request: UpdateSigningKeyRequest,
    ) -> Result<SigningKeyView> {
        self.ctx
            .authorizer
            .authorize(
                principal,
                Operation::UpdateScopedSigningKey,
                Target::ScopedSigningKey(id),
            )
            .await?;

        let stores = &self.ctx.stores;
        let account_id = stores.signing_keys.get_by_id(id).await?.account_id;
        let _guard = self.ctx.write_locks.lock(&account_id).await;
        let mut key = stores.signing_keys.get_by_id(id).await?;
        if request.description.is_some() {
            key.description = request.description;
        }

        let Some(permissions) = request.permissions else {
            return Ok(stores.signing_keys.update(key).await?.into());
        };
        permissions
            .validate()
            .map_err(GatekeeperError::ClaimsValidation)?;
        key.permissions = permissions;

        let mut account = stores.accounts.get_by_id(&key.account_id).await?;
        let keys: Vec<ScopedSigningKey> = stores
            .signing_keys
            .list_by_parent(&account.id, Page::all())
            .await?
            .into_iter()
            .map(|k| if k.id == key.id { key.clone() } else { k })
            .collect();
        account.jwt = signed_account_jwt(&self.ctx, &account, &keys).await?;

        let mut users = stores
            .users
            .list_by_parent(&account.id, Page::all())
            .await?;
        users.retain(|u| u.scoped_signing_key_id.as_deref() == Some(id));
        for user in &mut users {
            user.jwt = self
                .ctx
                .issuer
                .user_jwt(&account, user, UserSigner::Scoped(&key))?;
        }

        let key = stores.signing_keys.update(key).await?;
        stores.accounts.update(account).await?;
        let resigned = users.len();
        for user in users {
            stores.users.update(user).await?;
        }

        info!(key_id = %id, users = resigned, "Updated scoped signing key template");
        Ok(key.into())
    }

    /// Delete a scoped key.
    ///
    /// Users issued under it make this a `Conflict` unless `force` is set,
    /// in which case those users are deleted too.
    pub async fn delete(&self, principal: Option<&Principal>, id: &str, force: bool) -> Result<()> {
        self.ctx
            .authorizer
            .authorize(
                principal,
                Operation::DeleteScopedSigningKey,
                Target::ScopedSigningKey(id),
            )
            .await?;

        let stores = &self.ctx.stores;
        let account_id = stores.signing_keys.get_by_id(id).await?.account_id;
        let _guard = self.ctx.write_locks.lock(&account_id).await;
        let key = stores.signing_keys.get_by_id(id).await?;
        let mut account = stores.accounts.get_by_id(&key.account_id).await?;

        let mut users = stores.users.list_by_parent(&account.id, Page::all()).await?;
        users.retain(|u| u.scoped_signing_key_id.as_deref() == Some(id));
        if !users.is_empty() && !force {
            return Err(GatekeeperError::Conflict(format!(
                "scoped signing key '{}' has signed {} user(s)",
                key.name,
                users.len()
            )));
        }

        let mut keys = stores.signing_keys.list_by_parent(&account.id, Page::all()).await?;
        keys.retain(|k| k.id != key.id);
        account.jwt = signed_account_jwt(&self.ctx, &account, &keys).await?;

        for user in &users {
            stores.users.delete(&user.id).await?;
        }
        stores.signing_keys.delete(id).await?;
        stores.accounts.update(account).await?;

        info!(key_id = %id, users = users.len(), "Deleted scoped signing key");
        Ok(())
    }
}
