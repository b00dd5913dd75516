//! Account resolver protocol.
//!
//! Request-reply over three fixed subjects on the cluster's system
//! account. Replies are raw text: a leading `-` is an error with the
//! remainder as its message, anything else (including an empty body) is
//! success.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::issuance::Credentials;

/// Push an account JWT; payload is the raw token
pub const CLAIMS_UPDATE_SUBJECT: &str = "$SYS.REQ.CLAIMS.UPDATE";

/// Default deadline for connect and for each request
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(5);

pub fn claims_delete_subject(public_key: &str) -> String {
    format!("$SYS.REQ.CLAIMS.DELETE.{public_key}")
}

pub fn claims_lookup_subject(public_key: &str) -> String {
    format!("$SYS.REQ.ACCOUNT.{public_key}.CLAIMS.LOOKUP")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    #[error("failed to connect to {servers}: {reason}")]
    Connect { servers: String, reason: String },

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("request to {subject} failed: {reason}")]
    Request { subject: String, reason: String },

    #[error("resolver rejected request: {0}")]
    Rejected(String),
}

/// Interpret a resolver reply body
pub fn parse_resolver_response(body: &[u8]) -> Result<String, ResolverError> {
    let text = String::from_utf8_lossy(body);
    match text.strip_prefix('-') {
        Some(message) => Err(ResolverError::Rejected(message.trim().to_string())),
        None => Ok(text.trim().to_string()),
    }
}

/// Everything needed to open a system-account connection to one cluster
#[derive(Debug, Clone)]
pub struct ClusterConnection {
    /// Cluster name, used as the client connection name
    pub name: String,
    pub server_urls: Vec<String>,
    pub credentials: Credentials,
    pub skip_verify_tls: bool,
}

/// An open connection able to make resolver requests
#[async_trait]
pub trait ResolverSession: Send + Sync {
    async fn request(&self, subject: &str, payload: Bytes) -> Result<Bytes, ResolverError>;

    /// Lightweight round trip to prove reachability
    async fn ping(&self) -> Result<(), ResolverError>;
}

/// Opens resolver sessions; swapped for a fake in tests
#[async_trait]
pub trait ResolverConnector: Send + Sync {
    async fn connect(
        &self,
        connection: &ClusterConnection,
    ) -> Result<Box<dyn ResolverSession>, ResolverError>;
}

async fn bounded<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, ResolverError>>,
) -> Result<T, ResolverError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ResolverError::Timeout(what.to_string()))?
}

/// Resolver client with a deadline on connect and on every request.
///
/// Dropping a timed-out future drops the in-flight request with it.
pub struct Resolver {
    session: Box<dyn ResolverSession>,
    timeout: Duration,
}

impl Resolver {
    pub async fn connect(
        connector: &dyn ResolverConnector,
        connection: &ClusterConnection,
        timeout: Duration,
    ) -> Result<Self, ResolverError> {
        let servers = connection.server_urls.join(",");
        let session = bounded(timeout, &servers, connector.connect(connection)).await?;
        Ok(Self { session, timeout })
    }

    async fn call(&self, subject: &str, payload: Bytes) -> Result<String, ResolverError> {
        let body = bounded(self.timeout, subject, self.session.request(subject, payload)).await?;
        parse_resolver_response(&body)
    }

    /// Push an account JWT, returning the resolver's message
    pub async fn push_account_jwt(&self, jwt: &str) -> Result<String, ResolverError> {
        self.call(CLAIMS_UPDATE_SUBJECT, Bytes::copy_from_slice(jwt.as_bytes()))
            .await
    }

    pub async fn delete_account(&self, public_key: &str) -> Result<String, ResolverError> {
        self.call(&claims_delete_subject(public_key), Bytes::new())
            .await
    }

    /// Fetch the resolver's copy of an account JWT; `None` when empty
    pub async fn lookup_account(&self, public_key: &str) -> Result<Option<String>, ResolverError> {
        let jwt = self
            .call(&claims_lookup_subject(public_key), Bytes::new())
            .await?;
        Ok((!jwt.is_empty()).then_some(jwt))
    }

    pub async fn ping(&self) -> Result<(), ResolverError> {
        bounded(self.timeout, "ping", self.session.ping()).await
    }
}
