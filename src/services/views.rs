//! API representations of stored entities
//!
//! Views never carry sealed seeds, sealed credentials or password hashes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::Role;
use crate::db::schemas::{
    Account, ApiUser, Cluster, ClusterHealth, JetStreamLimits, Operator, PermissionTemplate,
    ScopedSigningKey, User,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OperatorView {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub public_key: String,
    pub jwt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_account_public_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Operator> for OperatorView {
    fn from(o: Operator) -> Self {
        Self {
            id: o.id,
            name: o.name,
            description: o.description,
            public_key: o.public_key,
            jwt: o.jwt,
            system_account_public_key: o.system_account_public_key,
            created_at: o.metadata.created_at,
            updated_at: o.metadata.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccountView {
    pub id: String,
    pub operator_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub public_key: String,
    pub jwt: String,
    pub jetstream: JetStreamLimits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountView {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            operator_id: a.operator_id,
            name: a.name,
            description: a.description,
            public_key: a.public_key,
            jwt: a.jwt,
            jetstream: a.jetstream,
            created_at: a.metadata.created_at,
            updated_at: a.metadata.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserView {
    pub id: String,
    pub account_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub public_key: String,
    pub jwt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoped_signing_key_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            account_id: u.account_id,
            name: u.name,
            description: u.description,
            public_key: u.public_key,
            jwt: u.jwt,
            scoped_signing_key_id: u.scoped_signing_key_id,
            created_at: u.metadata.created_at,
            updated_at: u.metadata.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SigningKeyView {
    pub id: String,
    pub account_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub public_key: String,
    pub permissions: PermissionTemplate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ScopedSigningKey> for SigningKeyView {
    fn from(k: ScopedSigningKey) -> Self {
        Self {
            id: k.id,
            account_id: k.account_id,
            name: k.name,
            description: k.description,
            public_key: k.public_key,
            permissions: k.permissions,
            created_at: k.metadata.created_at,
            updated_at: k.metadata.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClusterView {
    pub id: String,
    pub operator_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub server_urls: Vec<String>,
    pub system_account_public_key: String,
    pub skip_verify_tls: bool,
    pub health: ClusterHealth,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Cluster> for ClusterView {
    fn from(c: Cluster) -> Self {
        Self {
            id: c.id,
            operator_id: c.operator_id,
            name: c.name,
            description: c.description,
            server_urls: c.server_urls,
            system_account_public_key: c.system_account_public_key,
            skip_verify_tls: c.skip_verify_tls,
            health: c.health,
            created_at: c.metadata.created_at,
            updated_at: c.metadata.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApiUserView {
    pub id: String,
    pub username: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ApiUser> for ApiUserView {
    fn from(u: ApiUser) -> Self {
        Self {
            id: u.id,
            username: u.username,
            role: u.role,
            operator_id: u.operator_id,
            account_id: u.account_id,
            created_at: u.metadata.created_at,
            updated_at: u.metadata.updated_at,
        }
    }
}
