//! Session tokens for API users
//!
//! HS256 bearer tokens issued by login. The claims carry only the API
//! user id and role; the principal is reloaded from the store on every
//! request so deleted users lose access immediately.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::permissions::Role;
use crate::types::GatekeeperError;

const DEV_SECRET: &str = "dev-mode-secret-not-for-production-use-123456";

/// Minimum secret length outside dev mode
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// API user id
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and validates session tokens
#[derive(Clone)]
pub struct SessionTokens {
    secret: String,
    expiry_seconds: i64,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("expiry_seconds", &self.expiry_seconds)
            .finish_non_exhaustive()
    }
}

impl SessionTokens {
    pub fn new(secret: String, expiry_seconds: i64) -> Result<Self, GatekeeperError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(GatekeeperError::Config(format!(
                "JWT secret must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        if expiry_seconds <= 0 {
            return Err(GatekeeperError::Config("JWT expiry must be positive".into()));
        }
        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Fixed secret for dev mode
    pub fn new_dev() -> Self {
        Self {
            secret: DEV_SECRET.into(),
            expiry_seconds: 3600,
        }
    }

    pub fn expiry_seconds(&self) -> i64 {
        self.expiry_seconds
    }

    pub fn issue(&self, user_id: &str, username: &str, role: Role) -> Result<String, GatekeeperError> {
        let now = chrono::Utc::now().timestamp();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            role,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| GatekeeperError::Internal(format!("Failed to generate token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, GatekeeperError> {
        use jsonwebtoken::errors::ErrorKind;

        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|err| {
            let reason = match err.kind() {
                ErrorKind::ExpiredSignature => "token expired",
                ErrorKind::InvalidSignature => "invalid signature",
                ErrorKind::InvalidToken => "invalid token",
                _ => "token validation failed",
            };
            GatekeeperError::Unauthenticated(reason.into())
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let tokens = SessionTokens::new_dev();
        let token = tokens.issue("u1", "alice", Role::AccountAdmin).unwrap();
        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, Role::AccountAdmin);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_wrong_secret_is_unauthenticated() {
        let token = SessionTokens::new_dev().issue("u1", "alice", Role::Admin).unwrap();
        let other = SessionTokens::new("x".repeat(40), 60).unwrap();
        assert!(matches!(
            other.verify(&token),
            Err(GatekeeperError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(SessionTokens::new("short".into(), 60).is_err());
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }
}
