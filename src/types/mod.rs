//! Shared types

pub mod error;

pub use error::{DenialStage, ErrorClass, GatekeeperError, Result};
