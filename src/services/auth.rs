//! API user login and token authentication

use serde::Serialize;
use tracing::{debug, info};

use super::api_users::{ApiUserService, CreateApiUserRequest};
use super::ServiceContext;
use crate::auth::password::{prepare_dummy_hash, verify_dummy_password};
use crate::auth::{verify_password, Operation, Principal, Role, SessionTokens, Target};
use crate::db::StoreError;
use crate::types::{GatekeeperError, Result};

const INVALID_LOGIN: &str = "invalid username or password";

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    /// Seconds until the token expires
    pub expires_in: i64,
    pub principal: Principal,
}

#[derive(Clone)]
pub struct AuthService {
    ctx: ServiceContext,
    tokens: SessionTokens,
}

impl AuthService {
    pub fn new(ctx: ServiceContext, tokens: SessionTokens) -> Self {
        prepare_dummy_hash();
        Self { ctx, tokens }
    }

    /// Exchange a username and password for a session token.
    ///
    /// Unknown users and wrong passwords fail identically, and both pay
    /// for one Argon2 verification.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let user = match self.ctx.stores.api_users.get_by_name(None, username).await {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => {
                verify_dummy_password(password);
                debug!(username = %username, "Login for unknown user");
                return Err(GatekeeperError::Unauthenticated(INVALID_LOGIN.into()));
            }
            Err(e) => return Err(e.into()),
        };
        if !verify_password(password, &user.password_hash)? {
            debug!(username = %username, "Login with wrong password");
            return Err(GatekeeperError::Unauthenticated(INVALID_LOGIN.into()));
        }

        let token = self.tokens.issue(&user.id, &user.username, user.role)?;
        info!(api_user_id = %user.id, role = %user.role, "API user logged in");
        Ok(LoginResponse {
            token,
            expires_in: self.tokens.expiry_seconds(),
            principal: Principal::from(&user),
        })
    }

    /// Resolve a bearer token to the current principal.
    ///
    /// The API user is reloaded so deletions and role changes apply at once.
    pub async fn authenticate_token(&self, token: &str) -> Result<Principal> {
        let claims = self.tokens.verify(token)?;
        match self.ctx.stores.api_users.get_by_id(&claims.sub).await {
            Ok(user) => Ok(Principal::from(&user)),
            Err(StoreError::NotFound(_)) => {
                Err(GatekeeperError::Unauthenticated("API user no longer exists".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn whoami(&self, principal: Option<&Principal>) -> Result<Principal> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::WhoAmI, Target::Global)
            .await?;
        principal
            .cloned()
            .ok_or_else(|| GatekeeperError::Unauthenticated("no principal".into()))
    }

    /// Create an admin API user unless the username is taken.
    ///
    /// Returns whether a user was created.
    pub async fn bootstrap_admin(&self, username: &str, password: &str) -> Result<bool> {
        match self.ctx.stores.api_users.get_by_name(None, username).await {
            Ok(_) => {
                debug!(username = %username, "Bootstrap admin already present");
                return Ok(false);
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        ApiUserService::new(self.ctx.clone())
            .insert(CreateApiUserRequest {
                username: username.to_string(),
                password: password.to_string(),
                role: Role::Admin,
                operator_id: None,
                account_id: None,
            })
            .await?;
        info!(username = %username, "Created bootstrap admin");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::context;
    use crate::types::ErrorClass;

    fn service() -> AuthService {
        AuthService::new(context(), SessionTokens::new_dev())
    }

    #[tokio::test]
    async fn test_login_and_authenticate() {
        let auth = service();
        assert!(auth.bootstrap_admin("root", "hunter2hunter2").await.unwrap());
        assert!(!auth.bootstrap_admin("root", "another-password").await.unwrap());

        let login = auth.login("root", "hunter2hunter2").await.unwrap();
        assert_eq!(login.principal.role, Role::Admin);
        assert_eq!(login.expires_in, 3600);

        let principal = auth.authenticate_token(&login.token).await.unwrap();
        assert_eq!(principal, login.principal);
        assert_eq!(auth.whoami(Some(&principal)).await.unwrap(), principal);
    }

    #[tokio::test]
    async fn test_login_failures_are_uniform() {
        let auth = service();
        auth.bootstrap_admin("root", "hunter2hunter2").await.unwrap();

        let wrong = auth.login("root", "nope-nope-nope").await.unwrap_err();
        let unknown = auth.login("nobody", "hunter2hunter2").await.unwrap_err();
        assert_eq!(wrong.class(), ErrorClass::Unauthenticated);
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_unknown_user_pays_hash_cost() {
        let auth = service();
        auth.bootstrap_admin("root", "hunter2hunter2").await.unwrap();
        // Warm up so neither measurement includes one-time setup
        auth.login("nobody", "hunter2hunter2").await.unwrap_err();

        let started = std::time::Instant::now();
        auth.login("root", "nope-nope-nope").await.unwrap_err();
        let wrong_password = started.elapsed();

        let started = std::time::Instant::now();
        auth.login("nobody", "nope-nope-nope").await.unwrap_err();
        let unknown_user = started.elapsed();

        assert!(unknown_user * 4 >= wrong_password);
    }

    #[tokio::test]
    async fn test_deleted_user_token_rejected() {
        let ctx = context();
        let auth = AuthService::new(ctx.clone(), SessionTokens::new_dev());
        auth.bootstrap_admin("root", "hunter2hunter2").await.unwrap();
        let login = auth.login("root", "hunter2hunter2").await.unwrap();

        ctx.stores.api_users.delete(&login.principal.user_id).await.unwrap();
        let err = auth.authenticate_token(&login.token).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unauthenticated);
    }

    #[tokio::test]
    async fn test_whoami_requires_principal() {
        let err = service().whoami(None).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unauthenticated);
    }
}
