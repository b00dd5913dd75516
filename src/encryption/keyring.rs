//! Envelope encryption for seed material at rest.
//!
//! # Algorithms
//!
//! - **Encryption**: ChaCha20-Poly1305 (256-bit key, 96-bit nonce, 128-bit tag)
//! - **Nonces**: fresh random nonce per encryption from the OS RNG
//!
//! # Reference format
//!
//! ```text
//! encrypted:<keyID>:<base64(nonce || ciphertext || tag)>
//! ```
//!
//! The key id travels with the ciphertext so several keys can be valid at
//! once. Changing the current key only affects new encryptions; older
//! references stay readable while their key id remains configured.

use std::collections::{BTreeMap, HashMap};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};
use zeroize::Zeroizing;

// =============================================================================
// Constants
// =============================================================================

/// Prefix of every encrypted reference
pub const REFERENCE_PREFIX: &str = "encrypted";

/// Required raw key length (32 bytes)
pub const KEY_LEN: usize = 32;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncryptionError {
    #[error("encryption key '{0}' is not configured")]
    KeyNotFound(String),

    #[error("encrypted reference is malformed")]
    MalformedReference,

    #[error("authentication failed for data under key '{0}'")]
    AuthenticationFailed(String),

    #[error("encryption key '{key_id}' must be exactly {KEY_LEN} bytes, got {len}")]
    InvalidKeyLength { key_id: String, len: usize },

    #[error("invalid encryption key id '{0}'")]
    InvalidKeyId(String),

    #[error("invalid key encoding for '{0}'")]
    InvalidKeyEncoding(String),

    #[error("no encryption keys configured")]
    NoKeys,

    #[error("current key id '{0}' is not among the configured keys")]
    MissingCurrentKey(String),

    #[error("encryption failed under key '{0}'")]
    EncryptionFailed(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Immutable keyring configuration, validated by [`Keyring::new`].
#[derive(Clone)]
pub struct KeyringConfig {
    /// Raw key bytes by key id
    pub keys: BTreeMap<String, Zeroizing<Vec<u8>>>,
    /// Key id used for new encryptions
    pub current_key_id: String,
}

impl std::fmt::Debug for KeyringConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringConfig")
            .field("key_ids", &self.keys.keys().collect::<Vec<_>>())
            .field("current_key_id", &self.current_key_id)
            .finish()
    }
}

impl KeyringConfig {
    /// A keyring with exactly one key, which is also current.
    pub fn single(key_id: impl Into<String>, key: Vec<u8>) -> Self {
        let key_id = key_id.into();
        let mut keys = BTreeMap::new();
        keys.insert(key_id.clone(), Zeroizing::new(key));
        Self {
            keys,
            current_key_id: key_id,
        }
    }

    /// A named key set with a designated current key.
    pub fn with_keys(keys: BTreeMap<String, Vec<u8>>, current_key_id: impl Into<String>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|(id, key)| (id, Zeroizing::new(key)))
                .collect(),
            current_key_id: current_key_id.into(),
        }
    }

    /// Parse `<keyID>:<base64 key>` entries as supplied on the command line.
    ///
    /// When `current_key_id` is `None` and exactly one key is given, that
    /// key becomes current.
    pub fn from_encoded(
        entries: &[String],
        current_key_id: Option<&str>,
    ) -> Result<Self, EncryptionError> {
        let mut keys = BTreeMap::new();
        for entry in entries {
            let (key_id, encoded) = entry
                .split_once(':')
                .ok_or_else(|| EncryptionError::InvalidKeyEncoding(entry_label(entry)))?;
            let key = BASE64
                .decode(encoded.trim())
                .map_err(|_| EncryptionError::InvalidKeyEncoding(key_id.to_string()))?;
            keys.insert(key_id.trim().to_string(), Zeroizing::new(key));
        }

        let current_key_id = match current_key_id {
            Some(id) => id.to_string(),
            None if keys.len() == 1 => keys.keys().next().cloned().unwrap_or_default(),
            None => String::new(),
        };

        Ok(Self {
            keys,
            current_key_id,
        })
    }
}

// Never echo key material in errors; show only the part before ':'
fn entry_label(entry: &str) -> String {
    entry.chars().take_while(|c| *c != ':').take(32).collect()
}

// =============================================================================
// Keyring
// =============================================================================

/// In-memory keyring shared by all issuance paths.
///
/// Read-only after construction; rotation means restarting with a new
/// current key id.
pub struct Keyring {
    ciphers: HashMap<String, ChaCha20Poly1305>,
    current_key_id: String,
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.ciphers.keys().collect();
        ids.sort();
        f.debug_struct("Keyring")
            .field("key_ids", &ids)
            .field("current_key_id", &self.current_key_id)
            .finish()
    }
}

impl Keyring {
    /// Build and validate a keyring. Every key must be exactly 32 bytes.
    pub fn new(config: KeyringConfig) -> Result<Self, EncryptionError> {
        if config.keys.is_empty() {
            return Err(EncryptionError::NoKeys);
        }

        let mut ciphers = HashMap::with_capacity(config.keys.len());
        for (key_id, key) in &config.keys {
            if key_id.is_empty() || key_id.contains(':') || key_id.chars().any(char::is_whitespace)
            {
                return Err(EncryptionError::InvalidKeyId(key_id.clone()));
            }
            if key.len() != KEY_LEN {
                return Err(EncryptionError::InvalidKeyLength {
                    key_id: key_id.clone(),
                    len: key.len(),
                });
            }
            ciphers.insert(
                key_id.clone(),
                ChaCha20Poly1305::new(Key::from_slice(key.as_slice())),
            );
        }

        if !ciphers.contains_key(&config.current_key_id) {
            return Err(EncryptionError::MissingCurrentKey(config.current_key_id));
        }

        debug!(
            keys = ciphers.len(),
            current_key_id = %config.current_key_id,
            "Encryption keyring initialised"
        );

        Ok(Self {
            ciphers,
            current_key_id: config.current_key_id,
        })
    }

    /// Key id used for new encryptions
    pub fn current_key_id(&self) -> &str {
        &self.current_key_id
    }

    /// Encrypt under the current key with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, EncryptionError> {
        let cipher = self
            .ciphers
            .get(&self.current_key_id)
            .ok_or_else(|| EncryptionError::KeyNotFound(self.current_key_id.clone()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| EncryptionError::EncryptionFailed(self.current_key_id.clone()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(format!(
            "{REFERENCE_PREFIX}:{}:{}",
            self.current_key_id,
            BASE64.encode(blob)
        ))
    }

    /// Decrypt a reference produced by [`Keyring::encrypt`].
    pub fn decrypt(&self, reference: &str) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
        let parsed = parse_reference(reference)?;

        let cipher = self.ciphers.get(parsed.key_id).ok_or_else(|| {
            warn!(key_id = %parsed.key_id, "Decryption requested for unknown key id");
            EncryptionError::KeyNotFound(parsed.key_id.to_string())
        })?;

        let (nonce, ciphertext) = parsed.blob.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                warn!(key_id = %parsed.key_id, "Authentication tag verification failed");
                EncryptionError::AuthenticationFailed(parsed.key_id.to_string())
            })?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Decrypt and re-encrypt under the current key.
    ///
    /// Returns `None` when the reference already uses the current key.
    pub fn reencrypt(&self, reference: &str) -> Result<Option<String>, EncryptionError> {
        if key_id_of(reference)? == self.current_key_id {
            return Ok(None);
        }
        let plaintext = self.decrypt(reference)?;
        self.encrypt(&plaintext).map(Some)
    }
}

struct ParsedReference<'a> {
    key_id: &'a str,
    blob: Vec<u8>,
}

fn parse_reference(reference: &str) -> Result<ParsedReference<'_>, EncryptionError> {
    let mut parts = reference.splitn(3, ':');
    let (Some(prefix), Some(key_id), Some(encoded)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(EncryptionError::MalformedReference);
    };

    if prefix != REFERENCE_PREFIX || key_id.is_empty() {
        return Err(EncryptionError::MalformedReference);
    }

    let blob = BASE64
        .decode(encoded)
        .map_err(|_| EncryptionError::MalformedReference)?;

    if blob.len() < NONCE_LEN + AUTH_TAG_LEN {
        return Err(EncryptionError::MalformedReference);
    }

    Ok(ParsedReference { key_id, blob })
}

/// Key id embedded in an encrypted reference
pub fn key_id_of(reference: &str) -> Result<&str, EncryptionError> {
    parse_reference(reference).map(|parsed| parsed.key_id)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> Vec<u8> {
        vec![byte; KEY_LEN]
    }

    fn two_key_config(current: &str) -> KeyringConfig {
        let mut keys = BTreeMap::new();
        keys.insert("k1".to_string(), key(1));
        keys.insert("k2".to_string(), key(2));
        KeyringConfig::with_keys(keys, current)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let keyring = Keyring::new(KeyringConfig::single("k1", key(7))).unwrap();
        let reference = keyring.encrypt(b"SUAEXAMPLESEED").unwrap();

        assert!(reference.starts_with("encrypted:k1:"));
        assert_eq!(keyring.decrypt(&reference).unwrap().as_slice(), b"SUAEXAMPLESEED");
    }

    #[test]
    fn test_same_plaintext_yields_different_references() {
        let keyring = Keyring::new(KeyringConfig::single("k1", key(7))).unwrap();
        let a = keyring.encrypt(b"same").unwrap();
        let b = keyring.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_key_rejected_at_construction() {
        let err = Keyring::new(KeyringConfig::single("k1", vec![0u8; 16])).unwrap_err();
        assert_eq!(
            err,
            EncryptionError::InvalidKeyLength {
                key_id: "k1".into(),
                len: 16
            }
        );
    }

    #[test]
    fn test_missing_current_key_rejected() {
        let err = Keyring::new(two_key_config("k3")).unwrap_err();
        assert_eq!(err, EncryptionError::MissingCurrentKey("k3".into()));
    }

    #[test]
    fn test_unknown_key_id_fails() {
        let writer = Keyring::new(KeyringConfig::single("k-old", key(1))).unwrap();
        let reader = Keyring::new(KeyringConfig::single("k-new", key(1))).unwrap();
        let reference = writer.encrypt(b"seed").unwrap();

        assert_eq!(
            reader.decrypt(&reference).unwrap_err(),
            EncryptionError::KeyNotFound("k-old".into())
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let keyring = Keyring::new(KeyringConfig::single("k1", key(9))).unwrap();
        let reference = keyring.encrypt(b"seed material").unwrap();

        let encoded = reference.rsplit(':').next().unwrap();
        let mut blob = BASE64.decode(encoded).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let tampered = format!("encrypted:k1:{}", BASE64.encode(blob));

        assert_eq!(
            keyring.decrypt(&tampered).unwrap_err(),
            EncryptionError::AuthenticationFailed("k1".into())
        );
    }

    #[test]
    fn test_wrong_key_same_id_fails_authentication() {
        let a = Keyring::new(KeyringConfig::single("k1", key(1))).unwrap();
        let b = Keyring::new(KeyringConfig::single("k1", key(2))).unwrap();
        let reference = a.encrypt(b"seed").unwrap();
        assert!(matches!(
            b.decrypt(&reference),
            Err(EncryptionError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_malformed_references() {
        let keyring = Keyring::new(KeyringConfig::single("k1", key(1))).unwrap();
        for bad in [
            "",
            "plain-seed",
            "encrypted:k1",
            "sealed:k1:AAAA",
            "encrypted::AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "encrypted:k1:not base64!",
            "encrypted:k1:AAAA",
        ] {
            assert_eq!(
                keyring.decrypt(bad).unwrap_err(),
                EncryptionError::MalformedReference,
                "{bad}"
            );
        }
    }

    #[test]
    fn test_rotation_only_changes_new_references() {
        let before = Keyring::new(two_key_config("k1")).unwrap();
        let old_reference = before.encrypt(b"seed").unwrap();

        let after = Keyring::new(two_key_config("k2")).unwrap();
        let new_reference = after.encrypt(b"seed").unwrap();

        assert_eq!(key_id_of(&old_reference).unwrap(), "k1");
        assert_eq!(key_id_of(&new_reference).unwrap(), "k2");
        assert_eq!(after.decrypt(&old_reference).unwrap().as_slice(), b"seed");
    }

    #[test]
    fn test_reencrypt_moves_to_current_key() {
        let before = Keyring::new(two_key_config("k1")).unwrap();
        let old_reference = before.encrypt(b"seed").unwrap();

        let after = Keyring::new(two_key_config("k2")).unwrap();
        let moved = after.reencrypt(&old_reference).unwrap().unwrap();
        assert_eq!(key_id_of(&moved).unwrap(), "k2");
        assert_eq!(after.decrypt(&moved).unwrap().as_slice(), b"seed");

        assert!(after.reencrypt(&moved).unwrap().is_none());
    }

    #[test]
    fn test_from_encoded_entries() {
        let entries = vec![format!("primary:{}", BASE64.encode(key(3)))];
        let config = KeyringConfig::from_encoded(&entries, None).unwrap();
        assert_eq!(config.current_key_id, "primary");
        assert!(Keyring::new(config).is_ok());

        let err = KeyringConfig::from_encoded(&["nocolon".to_string()], None).unwrap_err();
        assert!(matches!(err, EncryptionError::InvalidKeyEncoding(_)));
    }
}
