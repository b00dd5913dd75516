//! API user administration
//!
//! API users log in to this service; they are not NATS identities. Role
//! bindings are checked on every write: operator-admins need an existing
//! operator, account-admins an existing account.

use serde::Deserialize;
use tracing::info;

use super::views::ApiUserView;
use super::{list_visible, new_id, ListQuery, ServiceContext};
use crate::auth::{hash_password, Operation, Principal, Role, Target};
use crate::db::schemas::{ApiUser, Metadata};
use crate::types::{GatekeeperError, Result};

#[derive(Clone, Deserialize)]
pub struct CreateApiUserRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub operator_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
}

impl std::fmt::Debug for CreateApiUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateApiUserRequest")
            .field("username", &self.username)
            .field("role", &self.role)
            .field("operator_id", &self.operator_id)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

/// Role changes replace both bindings
#[derive(Clone, Default, Deserialize)]
pub struct UpdateApiUserRequest {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub operator_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > 64 {
        return Err(GatekeeperError::Validation(
            "username must be 1 to 64 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(GatekeeperError::Validation(
            "username may contain only letters, digits and -_.@".into(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ApiUserService {
    ctx: ServiceContext,
}

impl ApiUserService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Drop the binding the role does not use, then check the one it needs
    async fn check_binding(&self, user: &mut ApiUser) -> Result<()> {
        match user.role {
            Role::Admin => {
                user.operator_id = None;
                user.account_id = None;
            }
            Role::OperatorAdmin => user.account_id = None,
            Role::AccountAdmin => user.operator_id = None,
        }
        user.validate_binding().map_err(GatekeeperError::Validation)?;

        if let Some(operator_id) = &user.operator_id {
            self.ctx.stores.operators.get_by_id(operator_id).await?;
        }
        if let Some(account_id) = &user.account_id {
            self.ctx.stores.accounts.get_by_id(account_id).await?;
        }
        Ok(())
    }

    /// Create without an authorization check. Used for the bootstrap admin.
    pub(crate) async fn insert(&self, request: CreateApiUserRequest) -> Result<ApiUser> {
        validate_username(&request.username)?;
        let mut user = ApiUser {
            id: new_id(),
            username: request.username,
            password_hash: hash_password(&request.password)?,
            role: request.role,
            operator_id: request.operator_id,
            account_id: request.account_id,
            metadata: Metadata::new(),
        };
        self.check_binding(&mut user).await?;
        let user = self.ctx.stores.api_users.create(user).await?;

        info!(api_user_id = %user.id, username = %user.username, role = %user.role, "Created API user");
        Ok(user)
    }

    pub async fn create(
        &self,
        principal: Option<&Principal>,
        request: CreateApiUserRequest,
    ) -> Result<ApiUserView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::CreateApiUser, Target::Global)
            .await?;
        Ok(self.insert(request).await?.into())
    }

    pub async fn get(&self, principal: Option<&Principal>, id: &str) -> Result<ApiUserView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::GetApiUser, Target::ApiUser(id))
            .await?;
        Ok(self.ctx.stores.api_users.get_by_id(id).await?.into())
    }

    pub async fn list(
        &self,
        principal: Option<&Principal>,
        query: &ListQuery,
    ) -> Result<Vec<ApiUserView>> {
        let users = list_visible(
            &self.ctx,
            principal,
            Operation::ListApiUsers,
            self.ctx.stores.api_users.as_ref(),
            query,
        )
        .await?;
        Ok(users.into_iter().map(Into::into).collect())
    }

    pub async fn update(
        &self,
        principal: Option<&Principal>,
        id: &str,
        request: UpdateApiUserRequest,
    ) -> Result<ApiUserView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::UpdateApiUser, Target::ApiUser(id))
            .await?;

        let mut user = self.ctx.stores.api_users.get_by_id(id).await?;
        if let Some(password) = &request.password {
            user.password_hash = hash_password(password)?;
        }
        if let Some(role) = request.role {
            user.role = role;
            user.operator_id = request.operator_id;
            user.account_id = request.account_id;
        } else {
            if request.operator_id.is_some() {
                user.operator_id = request.operator_id;
            }
            if request.account_id.is_some() {
                user.account_id = request.account_id;
            }
        }
        self.check_binding(&mut user).await?;

        let user = self.ctx.stores.api_users.update(user).await?;
        info!(api_user_id = %user.id, role = %user.role, "Updated API user");
        Ok(user.into())
    }

    pub async fn delete(&self, principal: Option<&Principal>, id: &str) -> Result<()> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::DeleteApiUser, Target::ApiUser(id))
            .await?;
        if principal.is_some_and(|p| p.user_id == id) {
            return Err(GatekeeperError::Validation(
                "API users cannot delete themselves".into(),
            ));
        }
        self.ctx.stores.api_users.delete(id).await?;
        info!(api_user_id = %id, "Deleted API user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verify_password;
    use crate::services::testing::{account_admin, admin, context};
    use crate::types::ErrorClass;

    fn request(username: &str, role: Role) -> CreateApiUserRequest {
        CreateApiUserRequest {
            username: username.into(),
            password: "correct horse".into(),
            role,
            operator_id: None,
            account_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_hashes_password() {
        let ctx = context();
        let service = ApiUserService::new(ctx.clone());
        let view = service.create(Some(&admin()), request("alice", Role::Admin)).await.unwrap();

        let stored = ctx.stores.api_users.get_by_id(&view.id).await.unwrap();
        assert_ne!(stored.password_hash, "correct horse");
        assert!(verify_password("correct horse", &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let service = ApiUserService::new(context());
        service.create(Some(&admin()), request("alice", Role::Admin)).await.unwrap();
        let err = service
            .create(Some(&admin()), request("alice", Role::Admin))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::AlreadyExists);
    }

    #[tokio::test]
    async fn test_binding_must_exist() {
        let service = ApiUserService::new(context());
        let err = service
            .create(Some(&admin()), request("bob", Role::AccountAdmin))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidArgument);

        let mut req = request("bob", Role::OperatorAdmin);
        req.operator_id = Some("missing".into());
        let err = service.create(Some(&admin()), req).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn test_scoped_roles_cannot_manage_api_users() {
        let service = ApiUserService::new(context());
        let err = service
            .create(Some(&account_admin("x")), request("eve", Role::Admin))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::PermissionDenied);

        let err = service
            .list(Some(&account_admin("x")), &ListQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::PermissionDenied);
    }

    #[tokio::test]
    async fn test_short_password_rejected() {
        let service = ApiUserService::new(context());
        let mut req = request("carol", Role::Admin);
        req.password = "short".into();
        let err = service.create(Some(&admin()), req).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidArgument);
    }
}
