//! NATS JWT claims (v2) encoding and verification.
//!
//! Tokens are `base64url(header).base64url(claims).base64url(signature)`
//! with header `{"typ":"JWT","alg":"ed25519-nats"}`; the signature is an
//! ed25519 signature by the issuer's NKey over the first two segments.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use nkeys::KeyPair;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::schemas::{JetStreamLimits, PermissionTemplate, UNLIMITED};

/// Token type in the header
pub const TOKEN_TYPE: &str = "JWT";

/// Signing algorithm in the header
pub const ALGORITHM: &str = "ed25519-nats";

/// Claims schema version
pub const CLAIMS_VERSION: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimsError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported token algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("token signature does not verify against issuer {0}")]
    BadSignature(String),

    #[error("signer {signer} does not match issuer {issuer}")]
    IssuerMismatch { signer: String, issuer: String },

    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Serialize, Deserialize)]
struct Header {
    typ: String,
    alg: String,
}

/// Claim body discriminator (`nats.type`)
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    Operator,
    Account,
    User,
}

/// Standard claims wrapping a NATS-specific body
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Claims<N> {
    #[serde(default)]
    pub jti: String,
    pub iat: i64,
    pub iss: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    pub nats: N,
}

impl<N> Claims<N> {
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>, name: impl Into<String>, nats: N) -> Self {
        Self {
            jti: String::new(),
            iat: chrono::Utc::now().timestamp(),
            iss: issuer.into(),
            name: name.into(),
            sub: subject.into(),
            exp: None,
            nats,
        }
    }
}

// =============================================================================
// Claim bodies
// =============================================================================

fn version() -> u8 {
    CLAIMS_VERSION
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OperatorClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_account: Option<String>,
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    #[serde(default = "version")]
    pub version: u8,
}

impl OperatorClaims {
    pub fn new(system_account: Option<String>) -> Self {
        Self {
            system_account,
            claim_type: ClaimType::Operator,
            version: CLAIMS_VERSION,
        }
    }
}

/// Allow/deny subject lists
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Permission {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

impl Permission {
    fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponsePermissionClaim {
    pub max: i64,
    /// Nanoseconds
    #[serde(default)]
    pub ttl: i64,
}

/// Pub/sub permissions and connection limits for users
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserPermissionLimits {
    #[serde(rename = "pub", default, skip_serializing_if = "Permission::is_empty")]
    pub publish: Permission,
    #[serde(rename = "sub", default, skip_serializing_if = "Permission::is_empty")]
    pub subscribe: Permission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp: Option<ResponsePermissionClaim>,
    #[serde(default = "unlimited")]
    pub subs: i64,
    #[serde(default = "unlimited")]
    pub data: i64,
    #[serde(default = "unlimited")]
    pub payload: i64,
}

fn unlimited() -> i64 {
    UNLIMITED
}

impl Default for UserPermissionLimits {
    fn default() -> Self {
        Self {
            publish: Permission::default(),
            subscribe: Permission::default(),
            resp: None,
            subs: UNLIMITED,
            data: UNLIMITED,
            payload: UNLIMITED,
        }
    }
}

impl From<&PermissionTemplate> for UserPermissionLimits {
    fn from(template: &PermissionTemplate) -> Self {
        Self {
            publish: Permission {
                allow: template.pub_allow.clone(),
                deny: template.pub_deny.clone(),
            },
            subscribe: Permission {
                allow: template.sub_allow.clone(),
                deny: template.sub_deny.clone(),
            },
            resp: template.response.map(|r| ResponsePermissionClaim {
                max: r.max_msgs,
                ttl: r.ttl_seconds.saturating_mul(1_000_000_000),
            }),
            ..Self::default()
        }
    }
}

/// Account limits including JetStream quotas
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountLimits {
    pub subs: i64,
    pub data: i64,
    pub payload: i64,
    pub imports: i64,
    pub exports: i64,
    pub wildcards: bool,
    pub conn: i64,
    pub leaf: i64,
    pub mem_storage: i64,
    pub disk_storage: i64,
    pub streams: i64,
    pub consumer: i64,
}

impl From<&JetStreamLimits> for AccountLimits {
    fn from(js: &JetStreamLimits) -> Self {
        Self {
            subs: UNLIMITED,
            data: UNLIMITED,
            payload: UNLIMITED,
            imports: UNLIMITED,
            exports: UNLIMITED,
            wildcards: true,
            conn: UNLIMITED,
            leaf: UNLIMITED,
            mem_storage: js.max_memory,
            disk_storage: js.max_storage,
            streams: js.max_streams,
            consumer: js.max_consumers,
        }
    }
}

/// Registered scoped signing key with its user template
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SigningKeyScope {
    /// Always `user_scope`
    pub kind: String,
    pub key: String,
    pub role: String,
    pub template: UserPermissionLimits,
}

impl SigningKeyScope {
    pub fn user_scope(key: impl Into<String>, role: impl Into<String>, template: &PermissionTemplate) -> Self {
        Self {
            kind: "user_scope".into(),
            key: key.into(),
            role: role.into(),
            template: template.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AccountClaims {
    pub limits: AccountLimits,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_keys: Vec<SigningKeyScope>,
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    #[serde(default = "version")]
    pub version: u8,
}

impl AccountClaims {
    pub fn new(limits: &JetStreamLimits, signing_keys: Vec<SigningKeyScope>) -> Self {
        Self {
            limits: limits.into(),
            signing_keys,
            claim_type: ClaimType::Account,
            version: CLAIMS_VERSION,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserClaims {
    #[serde(flatten)]
    pub permissions: UserPermissionLimits,
    /// Set when signed by a scoped key rather than the account itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_account: Option<String>,
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    #[serde(default = "version")]
    pub version: u8,
}

impl UserClaims {
    pub fn new(permissions: UserPermissionLimits, issuer_account: Option<String>) -> Self {
        Self {
            permissions,
            issuer_account,
            claim_type: ClaimType::User,
            version: CLAIMS_VERSION,
        }
    }
}

// =============================================================================
// Encoding / verification
// =============================================================================

fn json_segment<T: Serialize>(value: &T) -> Result<Vec<u8>, ClaimsError> {
    serde_json::to_vec(value).map_err(|e| ClaimsError::Signing(format!("serialize claims: {e}")))
}

/// Sign claims with `signer`, whose public key must equal `claims.iss`.
///
/// The `jti` is derived from the claims content.
pub fn encode<N: Serialize>(mut claims: Claims<N>, signer: &KeyPair) -> Result<String, ClaimsError> {
    let signer_key = signer.public_key();
    if signer_key != claims.iss {
        return Err(ClaimsError::IssuerMismatch {
            signer: signer_key,
            issuer: claims.iss,
        });
    }

    claims.jti = String::new();
    let digest = Sha256::digest(json_segment(&claims)?);
    claims.jti = hex::encode_upper(digest);

    let header = json_segment(&Header {
        typ: TOKEN_TYPE.into(),
        alg: ALGORITHM.into(),
    })?;
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(json_segment(&claims)?)
    );

    let signature = signer
        .sign(signing_input.as_bytes())
        .map_err(|e| ClaimsError::Signing(e.to_string()))?;

    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Decode a token and check its signature against the `iss` NKey.
pub fn decode_and_verify<N: DeserializeOwned>(token: &str) -> Result<Claims<N>, ClaimsError> {
    let mut parts = token.trim().split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ClaimsError::Malformed("expected three segments".into()));
    };

    let decode = |segment: &str, what: &str| {
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|_| ClaimsError::Malformed(format!("{what} is not base64url")))
    };

    let parsed_header: Header = serde_json::from_slice(&decode(header, "header")?)
        .map_err(|e| ClaimsError::Malformed(format!("header: {e}")))?;
    if parsed_header.alg != ALGORITHM {
        return Err(ClaimsError::UnsupportedAlgorithm(parsed_header.alg));
    }

    let claims: Claims<N> = serde_json::from_slice(&decode(payload, "claims")?)
        .map_err(|e| ClaimsError::Malformed(format!("claims: {e}")))?;

    let issuer = KeyPair::from_public_key(&claims.iss)
        .map_err(|e| ClaimsError::Malformed(format!("issuer is not an nkey: {e}")))?;
    let signature = decode(signature, "signature")?;
    issuer
        .verify(format!("{header}.{payload}").as_bytes(), &signature)
        .map_err(|_| ClaimsError::BadSignature(claims.iss.clone()))?;

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::ResponsePermission;

    #[test]
    fn test_operator_token_verifies() {
        let operator = KeyPair::new_operator();
        let claims = Claims::new(
            operator.public_key(),
            operator.public_key(),
            "acme",
            OperatorClaims::new(None),
        );
        let token = encode(claims, &operator).unwrap();

        let decoded: Claims<OperatorClaims> = decode_and_verify(&token).unwrap();
        assert_eq!(decoded.iss, operator.public_key());
        assert_eq!(decoded.sub, operator.public_key());
        assert_eq!(decoded.name, "acme");
        assert_eq!(decoded.nats.claim_type, ClaimType::Operator);
        assert_eq!(decoded.jti.len(), 64);
    }

    #[test]
    fn test_signer_must_match_issuer() {
        let operator = KeyPair::new_operator();
        let other = KeyPair::new_operator();
        let claims = Claims::new(other.public_key(), other.public_key(), "x", OperatorClaims::new(None));
        assert!(matches!(
            encode(claims, &operator),
            Err(ClaimsError::IssuerMismatch { .. })
        ));
    }

    #[test]
    fn test_tampered_claims_fail_verification() {
        let operator = KeyPair::new_operator();
        let account = KeyPair::new_account();
        let claims = Claims::new(
            operator.public_key(),
            account.public_key(),
            "payments",
            AccountClaims::new(&JetStreamLimits::unlimited(), vec![]),
        );
        let token = encode(claims, &operator).unwrap();

        let mut forged: Claims<AccountClaims> = decode_and_verify(&token).unwrap();
        forged.nats.limits.streams = 1000;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let mut segments: Vec<&str> = token.split('.').collect();
        segments[1] = &forged_payload;
        let forged_token = segments.join(".");

        assert!(matches!(
            decode_and_verify::<AccountClaims>(&forged_token),
            Err(ClaimsError::BadSignature(_))
        ));
    }

    #[test]
    fn test_account_limits_carry_jetstream_quotas() {
        let js = JetStreamLimits {
            max_memory: 1024,
            max_storage: 4096,
            max_streams: UNLIMITED,
            max_consumers: 5,
        };
        let body = serde_json::to_value(AccountClaims::new(&js, vec![])).unwrap();
        assert_eq!(body["limits"]["mem_storage"], 1024);
        assert_eq!(body["limits"]["disk_storage"], 4096);
        assert_eq!(body["limits"]["streams"], -1);
        assert_eq!(body["limits"]["consumer"], 5);
        assert_eq!(body["type"], "account");
        assert_eq!(body["version"], 2);
    }

    #[test]
    fn test_user_permissions_serialize_in_nats_shape() {
        let template = PermissionTemplate {
            pub_allow: vec!["orders.>".into()],
            sub_deny: vec!["admin.>".into()],
            response: Some(ResponsePermission {
                max_msgs: 1,
                ttl_seconds: 2,
            }),
            ..Default::default()
        };
        let body = serde_json::to_value(UserClaims::new((&template).into(), Some("ACCT".into()))).unwrap();
        assert_eq!(body["pub"]["allow"][0], "orders.>");
        assert_eq!(body["sub"]["deny"][0], "admin.>");
        assert!(body["pub"].get("deny").is_none());
        assert_eq!(body["resp"]["max"], 1);
        assert_eq!(body["resp"]["ttl"], 2_000_000_000i64);
        assert_eq!(body["issuer_account"], "ACCT");
        assert_eq!(body["subs"], -1);
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(decode_and_verify::<OperatorClaims>("abc"), Err(ClaimsError::Malformed(_))));
        assert!(matches!(decode_and_verify::<OperatorClaims>("a.b.c.d"), Err(ClaimsError::Malformed(_))));
    }
}
