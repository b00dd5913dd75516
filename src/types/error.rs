//! Error types for Gatekeeper
//!
//! Every failure surfaced to a caller collapses into one of a handful of
//! coarse classes (see [`ErrorClass`]) regardless of which store, crypto
//! or resolver backend produced it.

use hyper::StatusCode;
use serde::Serialize;

use crate::db::StoreError;
use crate::encryption::EncryptionError;
use crate::issuance::{ClaimsError, CredentialsError};
use crate::nats::ResolverError;

/// Authorization stage that rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialStage {
    /// The role policy table does not grant the resource/action pair
    Policy,
    /// The target lies outside the principal's operator/account subtree
    Ownership,
}

impl std::fmt::Display for DenialStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialStage::Policy => write!(f, "policy"),
            DenialStage::Ownership => write!(f, "ownership"),
        }
    }
}

/// Coarse error class exposed at the API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Unauthenticated,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Internal,
}

/// Main error type for Gatekeeper operations
#[derive(Debug, thiserror::Error)]
pub enum GatekeeperError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Permission denied at {stage}: {reason}")]
    PermissionDenied { stage: DenialStage, reason: String },

    #[error("Crypto error: {0}")]
    Crypto(#[from] EncryptionError),

    #[error("Signing key decryption failed for {entity}: {source}")]
    SigningKeyDecryption {
        entity: String,
        #[source]
        source: EncryptionError,
    },

    #[error("Invalid parent state: {0}")]
    InvalidParentState(String),

    #[error("Claims validation failed: {0}")]
    ClaimsValidation(String),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatekeeperError {
    pub fn policy_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            stage: DenialStage::Policy,
            reason: reason.into(),
        }
    }

    pub fn ownership_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            stage: DenialStage::Ownership,
            reason: reason.into(),
        }
    }

    /// Collapse into the coarse class shown to API callers
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::ClaimsValidation(_) => ErrorClass::InvalidArgument,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::AlreadyExists(_) | Self::Conflict(_) => ErrorClass::AlreadyExists,
            Self::Unauthenticated(_) => ErrorClass::Unauthenticated,
            Self::PermissionDenied { .. } => ErrorClass::PermissionDenied,
            Self::Crypto(_)
            | Self::SigningKeyDecryption { .. }
            | Self::InvalidParentState(_)
            | Self::Resolver(_)
            | Self::Database(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self.class() {
            ErrorClass::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorClass::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::AlreadyExists => StatusCode::CONFLICT,
            ErrorClass::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorClass::Internal => match self {
                Self::Resolver(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message safe to return to API callers.
    ///
    /// Internal failures are reported generically; the detail goes to the log.
    pub fn public_message(&self) -> String {
        match self.class() {
            ErrorClass::Internal => match self {
                Self::Resolver(e) => format!("resolver error: {e}"),
                _ => "internal error".to_string(),
            },
            _ => self.to_string(),
        }
    }
}

impl From<StoreError> for GatekeeperError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::AlreadyExists(what) => Self::AlreadyExists(what),
            StoreError::Backend(msg) => Self::Database(msg),
        }
    }
}

impl From<ClaimsError> for GatekeeperError {
    fn from(err: ClaimsError) -> Self {
        match err {
            ClaimsError::Signing(_) | ClaimsError::IssuerMismatch { .. } => {
                Self::Internal(format!("JWT signing failed: {err}"))
            }
            other => Self::ClaimsValidation(other.to_string()),
        }
    }
}

impl From<CredentialsError> for GatekeeperError {
    fn from(err: CredentialsError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<nkeys::error::Error> for GatekeeperError {
    fn from(err: nkeys::error::Error) -> Self {
        Self::Internal(format!("NKey error: {err}"))
    }
}

impl From<serde_json::Error> for GatekeeperError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {err}"))
    }
}

impl From<jsonwebtoken::errors::Error> for GatekeeperError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthenticated(format!("JWT error: {err}"))
    }
}

impl From<std::io::Error> for GatekeeperError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<hyper::Error> for GatekeeperError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {err}"))
    }
}

/// Result type alias for Gatekeeper operations
pub type Result<T> = std::result::Result<T, GatekeeperError>;
