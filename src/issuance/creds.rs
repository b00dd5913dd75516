//! NATS credentials bundle (`.creds`) format
//!
//! ```text
//! -----BEGIN NATS USER JWT-----
//! <jwt>
//! ------END NATS USER JWT------
//!
//! ************************* IMPORTANT *************************
//! NKEY Seed printed below can be used to sign and prove identity.
//! NKEYs are sensitive and should be treated as secrets.
//!
//! -----BEGIN USER NKEY SEED-----
//! <seed>
//! ------END USER NKEY SEED------
//!
//! *************************************************************
//! ```

use zeroize::Zeroizing;

pub const JWT_BEGIN: &str = "-----BEGIN NATS USER JWT-----";
pub const JWT_END: &str = "------END NATS USER JWT------";
pub const SEED_BEGIN: &str = "-----BEGIN USER NKEY SEED-----";
pub const SEED_END: &str = "------END USER NKEY SEED------";

const NOTICE: &str = "************************* IMPORTANT *************************\n\
NKEY Seed printed below can be used to sign and prove identity.\n\
NKEYs are sensitive and should be treated as secrets.";

const FOOTER: &str = "*************************************************************";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("credentials are missing the {0} block")]
    MissingBlock(&'static str),

    #[error("credentials {0} block is empty")]
    EmptyBlock(&'static str),
}

/// A user JWT and its seed
#[derive(Clone)]
pub struct Credentials {
    pub jwt: String,
    pub seed: Zeroizing<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("jwt", &self.jwt)
            .field("seed", &"..")
            .finish()
    }
}

impl Credentials {
    pub fn new(jwt: impl Into<String>, seed: impl Into<String>) -> Self {
        Self {
            jwt: jwt.into(),
            seed: Zeroizing::new(seed.into()),
        }
    }

    /// Render the bundle. The returned text contains the seed.
    pub fn format(&self) -> Zeroizing<String> {
        Zeroizing::new(format_credentials(&self.jwt, &self.seed))
    }

    /// Parse a bundle, tolerating surrounding whitespace and CRLF line endings
    pub fn parse(text: &str) -> Result<Self, CredentialsError> {
        let jwt = block(text, JWT_BEGIN, JWT_END, "JWT")?;
        let seed = block(text, SEED_BEGIN, SEED_END, "seed")?;
        Ok(Self {
            jwt,
            seed: Zeroizing::new(seed),
        })
    }
}

/// Render a credentials bundle from its parts
pub fn format_credentials(jwt: &str, seed: &str) -> String {
    format!("{JWT_BEGIN}\n{jwt}\n{JWT_END}\n\n{NOTICE}\n\n{SEED_BEGIN}\n{seed}\n{SEED_END}\n\n{FOOTER}\n")
}

fn block(text: &str, begin: &str, end: &str, what: &'static str) -> Result<String, CredentialsError> {
    let start = text
        .find(begin)
        .ok_or(CredentialsError::MissingBlock(what))?
        + begin.len();
    let len = text[start..]
        .find(end)
        .ok_or(CredentialsError::MissingBlock(what))?;
    let body = text[start..start + len].trim();
    if body.is_empty() {
        return Err(CredentialsError::EmptyBlock(what));
    }
    Ok(body.to_string())
}
