//! Cluster document schema
//!
//! A remote NATS deployment whose resolver receives this operator's
//! account JWTs. Health fields are written only by the health monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::schemas::Metadata;
use crate::db::Entity;

/// Collection name for clusters
pub const CLUSTER_COLLECTION: &str = "clusters";

/// Last observed reachability
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterHealth {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ClusterHealth {
    pub fn reachable(at: DateTime<Utc>) -> Self {
        Self {
            healthy: true,
            last_checked_at: Some(at),
            last_error: None,
        }
    }

    pub fn unreachable(at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            last_checked_at: Some(at),
            last_error: Some(error.into()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Cluster {
    pub id: String,

    pub operator_id: String,

    /// Unique within the operator
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// NATS server URLs (nats://, tls://)
    pub server_urls: Vec<String>,

    /// Public key of the system account the credentials belong to
    pub system_account_public_key: String,

    /// System user credentials bundle sealed by the keyring
    pub encrypted_system_creds: String,

    /// Recorded for display; TLS verification is never disabled on connect
    #[serde(default)]
    pub skip_verify_tls: bool,

    #[serde(default)]
    pub health: ClusterHealth,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Entity for Cluster {
    const KIND: &'static str = "cluster";
    const COLLECTION: &'static str = CLUSTER_COLLECTION;
    const NAME_FIELD: &'static str = "name";
    const PARENT_FIELD: Option<&'static str> = Some("operator_id");

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.operator_id)
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
