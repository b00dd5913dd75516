//! Encryption of NKey seeds at rest
//!
//! Provides the keyring used to seal every seed and system credential
//! before it reaches a store, plus the scoped plaintext handling used
//! while a parent key signs a child JWT.
//!
//! # Rotation
//!
//! Start with the new key added and marked current. New seeds are sealed
//! under it immediately; existing references keep decrypting under their
//! recorded key id. Moving old data to the new key is an explicit step
//! ([`migration::reencrypt_all`]) and the old key may only be removed
//! after it has completed.

pub mod keyring;
pub mod migration;
pub mod seed;

pub use keyring::{key_id_of, EncryptionError, Keyring, KeyringConfig, KEY_LEN, NONCE_LEN};
pub use migration::{reencrypt_all, MigrationReport};
pub use seed::{with_signer, DecryptedSeed};
