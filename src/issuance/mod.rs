//! Identity issuance: NATS JWT claims, credentials bundles and the
//! Operator → Account → User signing chain.

pub mod claims;
pub mod creds;
pub mod issuer;

pub use claims::{
    decode_and_verify, encode, AccountClaims, Claims, ClaimsError, OperatorClaims, UserClaims,
};
pub use creds::{format_credentials, Credentials, CredentialsError};
pub use issuer::{IssuedOperator, Issuer, Provisioned, SealedKey, SignedIdentity, UserSigner};
