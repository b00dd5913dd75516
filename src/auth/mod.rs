//! Authentication and authorization for the management API
//!
//! Provides:
//! - Role / resource / action policy table
//! - Ownership-scoped authorization and list filtering
//! - Session token generation and validation
//! - Password hashing with Argon2

pub mod authorize;
pub mod jwt;
pub mod password;
pub mod permissions;
pub mod principal;

pub use authorize::{Authorizer, Owned, Owner, Scope, Target};
pub use jwt::{extract_bearer, SessionClaims, SessionTokens};
pub use password::{hash_password, verify_password};
pub use permissions::{is_operation_allowed, role_allows, Action, Operation, Resource, Role};
pub use principal::Principal;
