//! Authenticated API principal

use serde::Serialize;

use super::permissions::Role;
use crate::db::schemas::ApiUser;

/// Caller identity attached by the transport after authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&ApiUser> for Principal {
    fn from(user: &ApiUser) -> Self {
        Self {
            user_id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            operator_id: user.operator_id.clone(),
            account_id: user.account_id.clone(),
        }
    }
}
