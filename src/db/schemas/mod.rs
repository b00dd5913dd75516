//! Database schemas for Gatekeeper
//!
//! Documents for the identity hierarchy (operators, accounts, users,
//! scoped signing keys), remote clusters and API users.

mod account;
mod api_user;
mod cluster;
mod metadata;
mod operator;
mod signing_key;
mod user;

pub use account::{Account, JetStreamLimits, ACCOUNT_COLLECTION, UNLIMITED};
pub use api_user::{ApiUser, API_USER_COLLECTION};
pub use cluster::{Cluster, ClusterHealth, CLUSTER_COLLECTION};
pub use metadata::Metadata;
pub use operator::{Operator, OPERATOR_COLLECTION, SYSTEM_ACCOUNT_NAME};
pub use signing_key::{
    PermissionTemplate, ResponsePermission, ScopedSigningKey, SIGNING_KEY_COLLECTION,
};
pub use user::{User, USER_COLLECTION};
