//! User document schema
//!
//! Connection credential under an account.

use serde::{Deserialize, Serialize};

use crate::db::schemas::Metadata;
use crate::db::Entity;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub id: String,

    pub account_id: String,

    /// Unique within the account
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub encrypted_seed: String,

    /// U-prefixed NKey public key
    pub public_key: String,

    /// JWT signed by the account or by `scoped_signing_key_id`
    pub jwt: String,

    /// Scoped signing key this user was issued with (same account)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoped_signing_key_id: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Entity for User {
    const KIND: &'static str = "user";
    const COLLECTION: &'static str = USER_COLLECTION;
    const NAME_FIELD: &'static str = "name";
    const PARENT_FIELD: Option<&'static str> = Some("account_id");
    const PUBLIC_KEY_FIELD: Option<&'static str> = Some("public_key");

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.account_id)
    }

    fn public_key(&self) -> Option<&str> {
        Some(&self.public_key)
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
