//! Gatekeeper - credential issuance and key custody for NATS
//!
//! Gatekeeper holds the keys of a NATS operator → account → user trust
//! chain, signs every JWT in it, seals every seed at rest and pushes
//! account JWTs to the resolvers of remote clusters.
//!
//! ## Components
//!
//! - **Encryption**: envelope encryption of seeds and cluster credentials
//! - **Issuance**: NKey generation, JWT claims and credentials bundles
//! - **Auth**: API users, session tokens and scoped authorization
//! - **Services**: one service per entity plus the cluster health monitor
//! - **Server**: JSON management API over hyper

pub mod auth;
pub mod config;
pub mod db;
pub mod encryption;
pub mod issuance;
pub mod nats;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GatekeeperError, Result};
