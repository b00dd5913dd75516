//! Keypair generation and delegation-chain signing.
//!
//! ```text
//! Operator (self-signed)
//!   └── Account (signed by operator)
//!         ├── ScopedSigningKey (account-class key, registered on the account JWT)
//!         └── User (signed by account, or by one of its scoped keys)
//! ```
//!
//! Issuance moves through [`Provisioned`] (fresh keypair + unsigned claims)
//! to [`SignedIdentity`] (sealed seed + JWT). Only a `SignedIdentity` can
//! be turned into a stored record, so nothing is ever persisted unsigned.
//! Parent seeds are opened through [`with_signer`] and dropped as soon as
//! the signature exists.

use std::sync::Arc;

use nkeys::KeyPair;
use serde::Serialize;
use tracing::debug;
use zeroize::Zeroizing;

use super::claims::{
    self, AccountClaims, Claims, OperatorClaims, SigningKeyScope, UserClaims,
    UserPermissionLimits,
};
use super::creds::Credentials;
use crate::db::schemas::{
    Account, JetStreamLimits, Operator, PermissionTemplate, ScopedSigningKey, User,
    SYSTEM_ACCOUNT_NAME,
};
use crate::encryption::{with_signer, Keyring};
use crate::types::{GatekeeperError, Result};

/// Quotas given to system accounts; JetStream stays disabled there
pub const SYSTEM_ACCOUNT_LIMITS: JetStreamLimits = JetStreamLimits {
    max_memory: 0,
    max_storage: 0,
    max_streams: 0,
    max_consumers: 0,
};

/// Fresh keypair with unsigned claims
pub struct Provisioned<N> {
    keypair: KeyPair,
    claims: Claims<N>,
    seed: Zeroizing<String>,
}

impl<N: Serialize> Provisioned<N> {
    fn new(keypair: KeyPair, issuer: String, name: &str, nats: N) -> Result<Self> {
        let seed = Zeroizing::new(keypair.seed()?);
        let claims = Claims::new(issuer, keypair.public_key(), name, nats);
        Ok(Self {
            keypair,
            claims,
            seed,
        })
    }

    pub fn public_key(&self) -> String {
        self.keypair.public_key()
    }

    /// Seal the seed, then sign the claims with `signer`
    pub fn sign(self, signer: &KeyPair, keyring: &Keyring) -> Result<SignedIdentity> {
        let encrypted_seed = keyring.encrypt(self.seed.as_bytes())?;
        let jwt = claims::encode(self.claims, signer)?;
        Ok(SignedIdentity {
            public_key: self.keypair.public_key(),
            jwt,
            encrypted_seed,
        })
    }

    /// Seal the seed, then sign the claims with the entity's own key
    pub fn self_sign(self, keyring: &Keyring) -> Result<SignedIdentity> {
        let encrypted_seed = keyring.encrypt(self.seed.as_bytes())?;
        let jwt = claims::encode(self.claims, &self.keypair)?;
        Ok(SignedIdentity {
            public_key: self.keypair.public_key(),
            jwt,
            encrypted_seed,
        })
    }
}

/// Signed identity with its seed sealed, ready to persist
#[derive(Debug, Clone)]
pub struct SignedIdentity {
    pub public_key: String,
    pub jwt: String,
    pub encrypted_seed: String,
}

/// Sealed keypair without a JWT (scoped signing keys)
#[derive(Debug, Clone)]
pub struct SealedKey {
    pub public_key: String,
    pub encrypted_seed: String,
}

/// Operator plus its system account, issued together
#[derive(Debug, Clone)]
pub struct IssuedOperator {
    pub operator: SignedIdentity,
    pub system_account: Option<SignedIdentity>,
}

/// Key that signs a user JWT
pub enum UserSigner<'a> {
    Account,
    Scoped(&'a ScopedSigningKey),
}

fn require_prefix(kind: &str, public_key: &str, prefix: char) -> Result<()> {
    if public_key.starts_with(prefix) {
        Ok(())
    } else {
        Err(GatekeeperError::InvalidParentState(format!(
            "{kind} public key {public_key} is not {prefix}-prefixed"
        )))
    }
}

fn require_seed(kind: &str, encrypted_seed: &str) -> Result<()> {
    if encrypted_seed.is_empty() {
        return Err(GatekeeperError::InvalidParentState(format!(
            "{kind} has no stored seed"
        )));
    }
    Ok(())
}

fn require_operator(operator: &Operator) -> Result<()> {
    require_prefix("operator", &operator.public_key, 'O')?;
    require_seed("operator", &operator.encrypted_seed)
}

fn require_account(account: &Account) -> Result<()> {
    require_prefix("account", &account.public_key, 'A')?;
    require_seed("account", &account.encrypted_seed)
}

/// Issues and re-signs identities using the shared keyring
#[derive(Clone)]
pub struct Issuer {
    keyring: Arc<Keyring>,
}

impl Issuer {
    pub fn new(keyring: Arc<Keyring>) -> Self {
        Self { keyring }
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    // -------------------------------------------------------------------------
    // Operators
    // -------------------------------------------------------------------------

    /// Issue an operator, optionally with its system account.
    ///
    /// The system account is signed with the new operator key while it is
    /// still in memory; the operator JWT names it as `system_account`.
    pub fn issue_operator(&self, name: &str, with_system_account: bool) -> Result<IssuedOperator> {
        let operator_kp = KeyPair::new_operator();
        let operator_public = operator_kp.public_key();
        let system_kp = with_system_account.then(KeyPair::new_account);

        let system_public = system_kp.as_ref().map(KeyPair::public_key);
        let operator = Provisioned::new(
            operator_kp,
            operator_public.clone(),
            name,
            OperatorClaims::new(system_public),
        )?;

        let system_account = match system_kp {
            Some(kp) => {
                let provisioned = Provisioned::new(
                    kp,
                    operator_public,
                    SYSTEM_ACCOUNT_NAME,
                    AccountClaims::new(&SYSTEM_ACCOUNT_LIMITS, vec![]),
                )?;
                Some(provisioned.sign(&operator.keypair, &self.keyring)?)
            }
            None => None,
        };

        let operator = operator.self_sign(&self.keyring)?;
        debug!(public_key = %operator.public_key, "Issued operator identity");

        Ok(IssuedOperator {
            operator,
            system_account,
        })
    }

    /// Re-sign an operator JWT from its current record
    pub fn operator_jwt(&self, operator: &Operator) -> Result<String> {
        require_operator(operator)?;
        let claims = Claims::new(
            operator.public_key.clone(),
            operator.public_key.clone(),
            operator.name.clone(),
            OperatorClaims::new(operator.system_account_public_key.clone()),
        );
        with_signer(&self.keyring, &operator.label_for_errors(), &operator.encrypted_seed, |kp| {
            Ok(claims::encode(claims, kp)?)
        })
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    /// Issue an account under `operator`
    pub fn issue_account(
        &self,
        operator: &Operator,
        name: &str,
        limits: &JetStreamLimits,
    ) -> Result<SignedIdentity> {
        limits.validate().map_err(GatekeeperError::ClaimsValidation)?;
        require_operator(operator)?;

        let provisioned = Provisioned::new(
            KeyPair::new_account(),
            operator.public_key.clone(),
            name,
            AccountClaims::new(limits, vec![]),
        )?;

        let identity = with_signer(
            &self.keyring,
            &operator.label_for_errors(),
            &operator.encrypted_seed,
            |signer| provisioned.sign(signer, &self.keyring),
        )?;
        debug!(public_key = %identity.public_key, "Issued account identity");
        Ok(identity)
    }

    /// Re-sign an account JWT with its current limits and scoped keys.
    ///
    /// The account keypair is unchanged; only the operator signs.
    pub fn account_jwt(
        &self,
        operator: &Operator,
        account: &Account,
        signing_keys: &[ScopedSigningKey],
    ) -> Result<String> {
        account
            .jetstream
            .validate()
            .map_err(GatekeeperError::ClaimsValidation)?;
        require_operator(operator)?;
        if account.operator_id != operator.id {
            return Err(GatekeeperError::InvalidParentState(format!(
                "account {} does not belong to operator {}",
                account.id, operator.id
            )));
        }

        let scopes = signing_keys
            .iter()
            .filter(|key| key.account_id == account.id)
            .map(|key| SigningKeyScope::user_scope(&key.public_key, &key.name, &key.permissions))
            .collect();

        let claims = Claims::new(
            operator.public_key.clone(),
            account.public_key.clone(),
            account.name.clone(),
            AccountClaims::new(&account.jetstream, scopes),
        );
        with_signer(&self.keyring, &operator.label_for_errors(), &operator.encrypted_seed, |kp| {
            Ok(claims::encode(claims, kp)?)
        })
    }

    // -------------------------------------------------------------------------
    // Scoped signing keys
    // -------------------------------------------------------------------------

    /// Generate and seal an account-class signing key
    pub fn issue_signing_key(&self, account: &Account, template: &PermissionTemplate) -> Result<SealedKey> {
        template.validate().map_err(GatekeeperError::ClaimsValidation)?;
        require_account(account)?;

        let keypair = KeyPair::new_account();
        let seed = Zeroizing::new(keypair.seed()?);
        let key = SealedKey {
            public_key: keypair.public_key(),
            encrypted_seed: self.keyring.encrypt(seed.as_bytes())?,
        };
        debug!(public_key = %key.public_key, account_id = %account.id, "Issued scoped signing key");
        Ok(key)
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    fn user_claims(
        account: &Account,
        subject: String,
        name: &str,
        signer: &UserSigner<'_>,
    ) -> Result<(Claims<UserClaims>, String, String)> {
        require_account(account)?;
        match signer {
            UserSigner::Account => Ok((
                Claims::new(
                    account.public_key.clone(),
                    subject,
                    name,
                    UserClaims::new(UserPermissionLimits::default(), None),
                ),
                account.encrypted_seed.clone(),
                format!("account '{}'", account.name),
            )),
            UserSigner::Scoped(key) => {
                if key.account_id != account.id {
                    return Err(GatekeeperError::Validation(format!(
                        "scoped signing key '{}' belongs to a different account",
                        key.name
                    )));
                }
                require_prefix("scoped signing key", &key.public_key, 'A')?;
                require_seed("scoped signing key", &key.encrypted_seed)?;
                key.permissions
                    .validate()
                    .map_err(GatekeeperError::ClaimsValidation)?;
                Ok((
                    Claims::new(
                        key.public_key.clone(),
                        subject,
                        name,
                        UserClaims::new(
                            (&key.permissions).into(),
                            Some(account.public_key.clone()),
                        ),
                    ),
                    key.encrypted_seed.clone(),
                    format!("scoped signing key '{}'", key.name),
                ))
            }
        }
    }

    /// Issue a user under `account`, signed by the account or a scoped key
    pub fn issue_user(&self, account: &Account, name: &str, signer: UserSigner<'_>) -> Result<SignedIdentity> {
        let keypair = KeyPair::new_user();
        let (claims, signer_seed, signer_label) =
            Self::user_claims(account, keypair.public_key(), name, &signer)?;
        let seed = Zeroizing::new(keypair.seed()?);
        let provisioned = Provisioned {
            keypair,
            claims,
            seed,
        };

        let identity = with_signer(&self.keyring, &signer_label, &signer_seed, |kp| {
            provisioned.sign(kp, &self.keyring)
        })?;
        debug!(public_key = %identity.public_key, account_id = %account.id, "Issued user identity");
        Ok(identity)
    }

    /// Re-sign an existing user's JWT (e.g. after its template changed)
    pub fn user_jwt(&self, account: &Account, user: &User, signer: UserSigner<'_>) -> Result<String> {
        require_prefix("user", &user.public_key, 'U')?;
        let (claims, signer_seed, signer_label) =
            Self::user_claims(account, user.public_key.clone(), &user.name, &signer)?;
        with_signer(&self.keyring, &signer_label, &signer_seed, |kp| {
            Ok(claims::encode(claims, kp)?)
        })
    }

    /// Decrypt a user's seed and render its credentials bundle
    pub fn user_credentials(&self, user: &User) -> Result<Credentials> {
        let seed = crate::encryption::DecryptedSeed::open(&self.keyring, &user.encrypted_seed)?;
        Ok(Credentials::new(user.jwt.clone(), seed.expose()))
    }

    /// Mint credentials for an unpersisted user of `account`.
    ///
    /// Used for system-account connections to remote resolvers.
    pub fn ephemeral_credentials(&self, account: &Account, name: &str) -> Result<Credentials> {
        let keypair = KeyPair::new_user();
        let (claims, signer_seed, signer_label) =
            Self::user_claims(account, keypair.public_key(), name, &UserSigner::Account)?;
        let jwt = with_signer(&self.keyring, &signer_label, &signer_seed, |kp| {
            Ok(claims::encode(claims, kp)?)
        })?;
        Ok(Credentials::new(jwt, keypair.seed()?))
    }
}

impl Operator {
    fn label_for_errors(&self) -> String {
        format!("operator '{}'", self.name)
    }
}
