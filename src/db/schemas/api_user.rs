//! API user document schema
//!
//! Principals of the management API. Not part of the NATS identity
//! hierarchy.

use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::schemas::Metadata;
use crate::db::Entity;

/// Collection name for API users
pub const API_USER_COLLECTION: &str = "api_users";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiUser {
    pub id: String,

    /// Globally unique login name
    pub username: String,

    /// Argon2 PHC hash
    pub password_hash: String,

    pub role: Role,

    /// Required for operator-admin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<String>,

    /// Required for account-admin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl ApiUser {
    /// Check that the role carries the binding it needs
    pub fn validate_binding(&self) -> Result<(), String> {
        match self.role {
            Role::Admin => Ok(()),
            Role::OperatorAdmin if self.operator_id.is_none() => {
                Err("operator-admin requires an operator_id".into())
            }
            Role::AccountAdmin if self.account_id.is_none() => {
                Err("account-admin requires an account_id".into())
            }
            _ => Ok(()),
        }
    }
}

impl Entity for ApiUser {
    const KIND: &'static str = "api user";
    const COLLECTION: &'static str = API_USER_COLLECTION;
    const NAME_FIELD: &'static str = "username";
    const PARENT_FIELD: Option<&'static str> = None;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.username
    }

    fn parent_id(&self) -> Option<&str> {
        None
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
