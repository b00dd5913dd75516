//! Roles, resources, actions and the static policy table
//!
//! Every API operation is an [`Operation`] variant with a fixed resource
//! and action. There is no string-keyed lookup and no default action: a
//! request that names no variant never reaches a service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// API principal roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Unrestricted
    Admin,
    /// Bound to one operator subtree
    OperatorAdmin,
    /// Bound to one account subtree
    AccountAdmin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::OperatorAdmin => write!(f, "operator-admin"),
            Role::AccountAdmin => write!(f, "account-admin"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "operator-admin" => Ok(Role::OperatorAdmin),
            "account-admin" => Ok(Role::AccountAdmin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Operator,
    Account,
    User,
    ScopedSigningKey,
    Cluster,
    ApiUser,
    Auth,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Operator => "operator",
            Resource::Account => "account",
            Resource::User => "user",
            Resource::ScopedSigningKey => "scoped_signing_key",
            Resource::Cluster => "cluster",
            Resource::ApiUser => "api_user",
            Resource::Auth => "auth",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Every operation exposed by the services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateOperator,
    GetOperator,
    ListOperators,
    UpdateOperator,
    DeleteOperator,

    CreateAccount,
    GetAccount,
    ListAccounts,
    UpdateAccount,
    DeleteAccount,

    CreateUser,
    GetUser,
    ListUsers,
    UpdateUser,
    DeleteUser,
    GetUserCredentials,

    CreateScopedSigningKey,
    GetScopedSigningKey,
    ListScopedSigningKeys,
    UpdateScopedSigningKey,
    DeleteScopedSigningKey,

    CreateCluster,
    GetCluster,
    ListClusters,
    UpdateCluster,
    DeleteCluster,
    SyncCluster,
    GetClusterHealth,
    CheckClusterHealth,
    DeleteAccountFromCluster,
    LookupAccountOnCluster,

    CreateApiUser,
    GetApiUser,
    ListApiUsers,
    UpdateApiUser,
    DeleteApiUser,

    WhoAmI,
}

impl Operation {
    pub fn resource(self) -> Resource {
        use Operation::*;
        match self {
            CreateOperator | GetOperator | ListOperators | UpdateOperator | DeleteOperator => {
                Resource::Operator
            }
            CreateAccount | GetAccount | ListAccounts | UpdateAccount | DeleteAccount => {
                Resource::Account
            }
            CreateUser | GetUser | ListUsers | UpdateUser | DeleteUser | GetUserCredentials => {
                Resource::User
            }
            CreateScopedSigningKey
            | GetScopedSigningKey
            | ListScopedSigningKeys
            | UpdateScopedSigningKey
            | DeleteScopedSigningKey => Resource::ScopedSigningKey,
            CreateCluster | GetCluster | ListClusters | UpdateCluster | DeleteCluster
            | SyncCluster | GetClusterHealth | CheckClusterHealth | DeleteAccountFromCluster
            | LookupAccountOnCluster => Resource::Cluster,
            CreateApiUser | GetApiUser | ListApiUsers | UpdateApiUser | DeleteApiUser => {
                Resource::ApiUser
            }
            WhoAmI => Resource::Auth,
        }
    }

    pub fn action(self) -> Action {
        use Operation::*;
        match self {
            CreateOperator | CreateAccount | CreateUser | CreateScopedSigningKey
            | CreateCluster | CreateApiUser => Action::Create,

            GetOperator | ListOperators | GetAccount | ListAccounts | GetUser | ListUsers
            | GetUserCredentials | GetScopedSigningKey | ListScopedSigningKeys | GetCluster
            | ListClusters | GetClusterHealth | LookupAccountOnCluster | GetApiUser
            | ListApiUsers | WhoAmI => Action::Read,

            // Sync and probes write cluster state
            UpdateOperator | UpdateAccount | UpdateUser | UpdateScopedSigningKey
            | UpdateCluster | SyncCluster | CheckClusterHealth | UpdateApiUser => Action::Update,

            DeleteOperator | DeleteAccount | DeleteUser | DeleteScopedSigningKey
            | DeleteCluster | DeleteAccountFromCluster | DeleteApiUser => Action::Delete,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Policy table
// =============================================================================

const CRUD: &[Action] = &[Action::Create, Action::Read, Action::Update, Action::Delete];
const READ: &[Action] = &[Action::Read];
const READ_UPDATE: &[Action] = &[Action::Read, Action::Update];

/// Grants for the scoped roles. Admin is allowed everything.
const POLICY: &[(Role, Resource, &[Action])] = &[
    (Role::OperatorAdmin, Resource::Operator, READ_UPDATE),
    (Role::OperatorAdmin, Resource::Account, CRUD),
    (Role::OperatorAdmin, Resource::User, CRUD),
    (Role::OperatorAdmin, Resource::ScopedSigningKey, CRUD),
    (Role::OperatorAdmin, Resource::Cluster, CRUD),
    (Role::OperatorAdmin, Resource::Auth, READ),
    (Role::AccountAdmin, Resource::Account, READ),
    (Role::AccountAdmin, Resource::User, CRUD),
    (Role::AccountAdmin, Resource::ScopedSigningKey, CRUD),
    (Role::AccountAdmin, Resource::Auth, READ),
];

/// Check the role policy for a resource/action pair
pub fn role_allows(role: Role, resource: Resource, action: Action) -> bool {
    if role == Role::Admin {
        return true;
    }
    POLICY
        .iter()
        .any(|(r, res, actions)| *r == role && *res == resource && actions.contains(&action))
}

/// Check the role policy for an operation
pub fn is_operation_allowed(operation: Operation, role: Role) -> bool {
    role_allows(role, operation.resource(), operation.action())
}
