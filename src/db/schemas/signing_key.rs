//! Scoped signing key document schema
//!
//! An account-class keypair acting as a permission template: users it
//! signs inherit its pub/sub and response permissions.

use serde::{Deserialize, Serialize};

use crate::db::schemas::Metadata;
use crate::db::Entity;

/// Collection name for scoped signing keys
pub const SIGNING_KEY_COLLECTION: &str = "scoped_signing_keys";

/// Response permission for request/reply users
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponsePermission {
    /// Maximum number of responses per request
    pub max_msgs: i64,
    /// Time window for responses, in seconds (0 = no limit)
    #[serde(default)]
    pub ttl_seconds: i64,
}

/// Pub/sub permission template carried by a scoped signing key
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionTemplate {
    #[serde(default)]
    pub pub_allow: Vec<String>,
    #[serde(default)]
    pub pub_deny: Vec<String>,
    #[serde(default)]
    pub sub_allow: Vec<String>,
    #[serde(default)]
    pub sub_deny: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponsePermission>,
}

impl PermissionTemplate {
    /// Reject empty subjects and nonsensical response limits
    pub fn validate(&self) -> Result<(), String> {
        for (field, subjects) in [
            ("pub_allow", &self.pub_allow),
            ("pub_deny", &self.pub_deny),
            ("sub_allow", &self.sub_allow),
            ("sub_deny", &self.sub_deny),
        ] {
            if let Some(bad) = subjects
                .iter()
                .find(|s| s.trim().is_empty() || s.chars().any(char::is_whitespace))
            {
                return Err(format!("{field} contains an invalid subject '{bad}'"));
            }
        }
        if let Some(resp) = &self.response {
            if resp.max_msgs < -1 || resp.max_msgs == 0 {
                return Err(format!(
                    "response max_msgs must be positive or -1, got {}",
                    resp.max_msgs
                ));
            }
            if resp.ttl_seconds < 0 {
                return Err(format!(
                    "response ttl_seconds must be >= 0, got {}",
                    resp.ttl_seconds
                ));
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ScopedSigningKey {
    pub id: String,

    pub account_id: String,

    /// Unique within the account; doubles as the scope role name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub encrypted_seed: String,

    /// A-prefixed NKey public key
    pub public_key: String,

    #[serde(default)]
    pub permissions: PermissionTemplate,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Entity for ScopedSigningKey {
    const KIND: &'static str = "scoped signing key";
    const COLLECTION: &'static str = SIGNING_KEY_COLLECTION;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_validation() {
        let ok = PermissionTemplate {
            pub_allow: vec!["orders.>".into()],
            sub_allow: vec!["_INBOX.>".into()],
            response: Some(ResponsePermission {
                max_msgs: 1,
                ttl_seconds: 30,
            }),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad_subject = PermissionTemplate {
            pub_deny: vec!["orders. >".into()],
            ..Default::default()
        };
        assert!(bad_subject.validate().is_err());

        let bad_resp = PermissionTemplate {
            response: Some(ResponsePermission {
                max_msgs: 0,
                ttl_seconds: 0,
            }),
            ..Default::default()
        };
        assert!(bad_resp.validate().is_err());
    }
}
