//! Account document schema
//!
//! Tenancy boundary under an operator, carrying JetStream quotas.

use serde::{Deserialize, Serialize};

use crate::db::schemas::Metadata;
use crate::db::Entity;

/// Collection name for accounts
pub const ACCOUNT_COLLECTION: &str = "accounts";

/// Quota value meaning "no limit"
pub const UNLIMITED: i64 = -1;

/// JetStream quotas. Each field is a non-negative quota or [`UNLIMITED`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct JetStreamLimits {
    /// Memory storage in bytes
    pub max_memory: i64,
    /// File storage in bytes
    pub max_storage: i64,
    pub max_streams: i64,
    pub max_consumers: i64,
}

impl Default for JetStreamLimits {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl JetStreamLimits {
    pub fn unlimited() -> Self {
        Self {
            max_memory: UNLIMITED,
            max_storage: UNLIMITED,
            max_streams: UNLIMITED,
            max_consumers: UNLIMITED,
        }
    }

    /// Reject negative values other than the unlimited sentinel
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("max_memory", self.max_memory),
            ("max_storage", self.max_storage),
            ("max_streams", self.max_streams),
            ("max_consumers", self.max_consumers),
        ] {
            if value < UNLIMITED {
                return Err(format!(
                    "{field} must be >= 0 or {UNLIMITED} (unlimited), got {value}"
                ));
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Account {
    pub id: String,

    pub operator_id: String,

    /// Unique within the operator
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub encrypted_seed: String,

    /// A-prefixed NKey public key
    pub public_key: String,

    /// JWT signed by the operator
    pub jwt: String,

    #[serde(default)]
    pub jetstream: JetStreamLimits,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Entity for Account {
    const KIND: &'static str = "account";
    const COLLECTION: &'static str = ACCOUNT_COLLECTION;
    const NAME_FIELD: &'static str = "name";
    const PARENT_FIELD: Option<&'static str> = Some("operator_id");
    const PUBLIC_KEY_FIELD: Option<&'static str> = Some("public_key");

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.operator_id)
    }

    fn public_key(&self) -> Option<&str> {
        Some(&self.public_key)
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_accept_sentinel_and_quotas() {
        let limits = JetStreamLimits {
            max_memory: 0,
            max_storage: 1 << 30,
            max_streams: UNLIMITED,
            max_consumers: 10,
        };
        assert!(limits.validate().is_ok());
        assert!(JetStreamLimits::unlimited().validate().is_ok());
    }

    #[test]
    fn test_limits_reject_other_negatives() {
        let limits = JetStreamLimits {
            max_streams: -2,
            ..JetStreamLimits::unlimited()
        };
        let err = limits.validate().unwrap_err();
        assert!(err.contains("max_streams"));
    }
}
