//! Transient plaintext seeds.
//!
//! A parent's seed is decrypted only for the duration of one signing call.
//! [`DecryptedSeed`] owns the plaintext in zeroizing memory and is consumed
//! by [`with_signer`], so the seed cannot outlive the closure that uses it.

use nkeys::KeyPair;
use zeroize::Zeroizing;

use super::keyring::{EncryptionError, Keyring};
use crate::types::{GatekeeperError, Result};

/// Plaintext NKey seed, wiped from memory on drop
pub struct DecryptedSeed {
    seed: Zeroizing<String>,
}

impl DecryptedSeed {
    /// Decrypt a stored seed reference
    pub fn open(keyring: &Keyring, reference: &str) -> std::result::Result<Self, EncryptionError> {
        let bytes = keyring.decrypt(reference)?;
        let seed = std::str::from_utf8(&bytes)
            .map_err(|_| EncryptionError::MalformedReference)?
            .to_string();
        Ok(Self {
            seed: Zeroizing::new(seed),
        })
    }

    /// The seed text. Callers must not copy it into long-lived storage.
    pub fn expose(&self) -> &str {
        &self.seed
    }

    /// Rebuild the keypair from the seed
    pub fn keypair(&self) -> Result<KeyPair> {
        KeyPair::from_seed(&self.seed)
            .map_err(|e| GatekeeperError::InvalidParentState(format!("stored seed is not a valid nkey: {e}")))
    }
}

impl std::fmt::Debug for DecryptedSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DecryptedSeed(..)")
    }
}

/// Decrypt `reference`, hand the keypair to `sign`, then discard the seed.
///
/// `entity` names the key owner for error reporting only.
pub fn with_signer<R>(
    keyring: &Keyring,
    entity: &str,
    reference: &str,
    sign: impl FnOnce(&KeyPair) -> Result<R>,
) -> Result<R> {
    let seed = DecryptedSeed::open(keyring, reference).map_err(|source| {
        GatekeeperError::SigningKeyDecryption {
            entity: entity.to_string(),
            source,
        }
    })?;
    let keypair = seed.keypair()?;
    let out = sign(&keypair);
    drop(keypair);
    drop(seed);
    out
}
