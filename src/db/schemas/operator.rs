//! Operator document schema
//!
//! Root of trust. The JWT is self-signed; the system account is referenced
//! by public key only and owns no back-pointer.

use serde::{Deserialize, Serialize};

use crate::db::schemas::Metadata;
use crate::db::Entity;

/// Collection name for operators
pub const OPERATOR_COLLECTION: &str = "operators";

/// Conventional name of the system account created with each operator
pub const SYSTEM_ACCOUNT_NAME: &str = "SYS";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Operator {
    pub id: String,

    /// Globally unique name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Seed sealed by the keyring
    pub encrypted_seed: String,

    /// O-prefixed NKey public key
    pub public_key: String,

    /// Self-signed operator JWT
    pub jwt: String,

    /// Public key of the designated system account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_account_public_key: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Entity for Operator {
    const KIND: &'static str = "operator";
    const COLLECTION: &'static str = OPERATOR_COLLECTION;
    const NAME_FIELD: &'static str = "name";
    const PARENT_FIELD: Option<&'static str> = None;
    const PUBLIC_KEY_FIELD: Option<&'static str> = Some("public_key");

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn parent_id(&self) -> Option<&str> {
        None
    }

    fn public_key(&self) -> Option<&str> {
        Some(&self.public_key)
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
