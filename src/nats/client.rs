//! NATS connections to remote clusters
//!
//! Connects with a system-account credentials bundle and fails fast if
//! the cluster is not reachable.

use async_nats::{Client, ConnectOptions, ServerAddr};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

use super::resolver::{ClusterConnection, ResolverConnector, ResolverError, ResolverSession};

/// Connection timeout for the initial handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// NATS client for one cluster's system account
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    pub async fn connect(connection: &ClusterConnection) -> Result<Self, ResolverError> {
        let servers = connection.server_urls.join(",");
        let connect_error = |reason: String| ResolverError::Connect {
            servers: servers.clone(),
            reason,
        };

        if connection.skip_verify_tls {
            warn!(
                cluster = %connection.name,
                "TLS verification skip requested but not supported; verifying"
            );
        }

        let creds = connection.credentials.format();
        // No retry_on_initial_connect(): an unreachable cluster should fail now
        let options = ConnectOptions::with_credentials(&creds)
            .map_err(|e| connect_error(format!("invalid credentials: {e}")))?
            .name(format!("gatekeeper-{}", connection.name))
            .connection_timeout(CONNECT_TIMEOUT);

        let addrs = connection
            .server_urls
            .iter()
            .map(|url| url.parse::<ServerAddr>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| connect_error(format!("invalid server url: {e}")))?;

        debug!(servers = %servers, "Connecting to cluster");
        let client = options
            .connect(addrs.as_slice())
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ResolverSession for NatsClient {
    async fn request(&self, subject: &str, payload: Bytes) -> Result<Bytes, ResolverError> {
        self.client
            .request(subject.to_string(), payload)
            .await
            .map(|message| message.payload)
            .map_err(|e| ResolverError::Request {
                subject: subject.to_string(),
                reason: e.to_string(),
            })
    }

    async fn ping(&self) -> Result<(), ResolverError> {
        self.client
            .flush()
            .await
            .map_err(|e| ResolverError::Request {
                subject: "PING".into(),
                reason: e.to_string(),
            })
    }
}

/// Connector backed by real NATS connections
#[derive(Debug, Clone, Copy, Default)]
pub struct NatsConnector;

#[async_trait]
impl ResolverConnector for NatsConnector {
    async fn connect(
        &self,
        connection: &ClusterConnection,
    ) -> Result<Box<dyn ResolverSession>, ResolverError> {
        Ok(Box::new(NatsClient::connect(connection).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::Credentials;

    #[tokio::test]
    async fn test_invalid_credentials_fail_before_dialing() {
        let connection = ClusterConnection {
            name: "east".into(),
            server_urls: vec!["nats://127.0.0.1:1".into()],
            credentials: Credentials::new("not-a-jwt", "not-a-seed"),
            skip_verify_tls: false,
        };
        let err = NatsConnector.connect(&connection).await.err().unwrap();
        assert!(matches!(err, ResolverError::Connect { .. }));
    }
}
