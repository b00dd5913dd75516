//! Cluster registration and resolver synchronization
//!
//! A cluster stores sealed system-account credentials used to reach its
//! resolver. Sync pushes every account JWT of the operator; a failed push
//! is recorded and the loop continues, so the report always says which
//! accounts made it.

use nkeys::KeyPair;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::health::{probe_cluster, record_health};
use super::views::ClusterView;
use super::{list_visible, new_id, validate_name, ListQuery, ServiceContext};
use crate::auth::{Operation, Principal, Target};
use crate::db::schemas::{Account, Cluster, ClusterHealth, Metadata, Operator};
use crate::db::Page;
use crate::issuance::{decode_and_verify, Claims, Credentials, UserClaims};
use crate::nats::{ClusterConnection, Resolver};
use crate::types::{GatekeeperError, Result};

const URL_SCHEMES: &[&str] = &["nats://", "tls://", "ws://", "wss://"];

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClusterRequest {
    pub operator_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub server_urls: Vec<String>,
    /// System user credentials bundle; minted from the operator's system
    /// account when omitted
    #[serde(default)]
    pub system_credentials: Option<String>,
    #[serde(default)]
    pub skip_verify_tls: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateClusterRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub server_urls: Option<Vec<String>>,
    #[serde(default)]
    pub system_credentials: Option<String>,
    #[serde(default)]
    pub skip_verify_tls: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPush {
    pub account: String,
    pub error: String,
}

/// Outcome of one sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub cluster_id: String,
    /// Account names pushed successfully
    pub pushed: Vec<String>,
    pub failed: Vec<FailedPush>,
}

fn validate_server_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        return Err(GatekeeperError::Validation(
            "at least one server URL is required".into(),
        ));
    }
    if let Some(bad) = urls
        .iter()
        .find(|u| !URL_SCHEMES.iter().any(|scheme| u.starts_with(scheme)))
    {
        return Err(GatekeeperError::Validation(format!(
            "server URL '{bad}' must use one of {}",
            URL_SCHEMES.join(", ")
        )));
    }
    Ok(())
}

/// Check a supplied bundle and return its system account public key
fn validate_supplied_credentials(operator: &Operator, text: &str) -> Result<(Credentials, String)> {
    let creds = Credentials::parse(text)?;
    let claims: Claims<UserClaims> = decode_and_verify(&creds.jwt)?;

    let seed_key = KeyPair::from_seed(&creds.seed)
        .map_err(|e| GatekeeperError::Validation(format!("credentials seed is invalid: {e}")))?
        .public_key();
    if seed_key != claims.sub {
        return Err(GatekeeperError::Validation(
            "credentials seed does not match the JWT subject".into(),
        ));
    }

    let account_key = claims.nats.issuer_account.unwrap_or(claims.iss);
    if let Some(expected) = &operator.system_account_public_key {
        if &account_key != expected {
            return Err(GatekeeperError::Validation(format!(
                "credentials belong to account {account_key}, not the system account of operator '{}'",
                operator.name
            )));
        }
    }
    Ok((creds, account_key))
}

/// Open an operator's system account for minting
async fn system_account(ctx: &ServiceContext, operator: &Operator) -> Result<Account> {
    let Some(public_key) = &operator.system_account_public_key else {
        return Err(GatekeeperError::Validation(format!(
            "operator '{}' has no system account; supply system credentials",
            operator.name
        )));
    };
    Ok(ctx.stores.accounts.get_by_public_key(public_key).await?)
}

async fn system_credentials(
    ctx: &ServiceContext,
    operator: &Operator,
    cluster_name: &str,
    supplied: Option<&str>,
) -> Result<(Credentials, String)> {
    match supplied {
        Some(text) => validate_supplied_credentials(operator, text),
        None => {
            let account = system_account(ctx, operator).await?;
            let creds = ctx
                .issuer
                .ephemeral_credentials(&account, &format!("gatekeeper-{cluster_name}"))?;
            Ok((creds, account.public_key))
        }
    }
}

/// Decrypt a cluster's credentials into connection settings
pub(crate) fn connection_for(ctx: &ServiceContext, cluster: &Cluster) -> Result<ClusterConnection> {
    let plaintext = ctx.issuer.keyring().decrypt(&cluster.encrypted_system_creds)?;
    let text = std::str::from_utf8(&plaintext)
        .map_err(|_| GatekeeperError::Internal("stored cluster credentials are not UTF-8".into()))?;
    Ok(ClusterConnection {
        name: cluster.name.clone(),
        server_urls: cluster.server_urls.clone(),
        credentials: Credentials::parse(text)?,
        skip_verify_tls: cluster.skip_verify_tls,
    })
}

/// Connect to a cluster's resolver with the configured deadline
pub(crate) async fn open_resolver(ctx: &ServiceContext, cluster: &Cluster) -> Result<Resolver> {
    let connection = connection_for(ctx, cluster)?;
    Ok(Resolver::connect(ctx.connector.as_ref(), &connection, ctx.resolver_timeout).await?)
}

#[derive(Clone)]
pub struct ClusterService {
    ctx: ServiceContext,
}

impl ClusterService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(
        &self,
        principal: Option<&Principal>,
        request: CreateClusterRequest,
    ) -> Result<ClusterView> {
        self.ctx
            .authorizer
            .authorize(
                principal,
                Operation::CreateCluster,
                Target::Operator(&request.operator_id),
            )
            .await?;
        validate_name("cluster", &request.name)?;
        validate_server_urls(&request.server_urls)?;

        let operator = self.ctx.stores.operators.get_by_id(&request.operator_id).await?;
        let (creds, system_account_public_key) = system_credentials(
            &self.ctx,
            &operator,
            &request.name,
            request.system_credentials.as_deref(),
        )
        .await?;
        let encrypted_system_creds = self.ctx.issuer.keyring().encrypt(creds.format().as_bytes())?;

        if request.skip_verify_tls {
            warn!(cluster = %request.name, "skip_verify_tls is recorded but not honored on connect");
        }

        let cluster = Cluster {
            id: new_id(),
            operator_id: operator.id,
            name: request.name,
            description: request.description,
            server_urls: request.server_urls,
            system_account_public_key,
            encrypted_system_creds,
            skip_verify_tls: request.skip_verify_tls,
            health: ClusterHealth::default(),
            metadata: Metadata::new(),
        };
        let cluster = self.ctx.stores.clusters.create(cluster).await?;

        info!(cluster_id = %cluster.id, name = %cluster.name, "Registered cluster");
        Ok(cluster.into())
    }

    pub async fn get(&self, principal: Option<&Principal>, id: &str) -> Result<ClusterView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::GetCluster, Target::Cluster(id))
            .await?;
        Ok(self.ctx.stores.clusters.get_by_id(id).await?.into())
    }

    /// `parent_id` filters by operator
    pub async fn list(
        &self,
        principal: Option<&Principal>,
        query: &ListQuery,
    ) -> Result<Vec<ClusterView>> {
        let clusters = list_visible(
            &self.ctx,
            principal,
            Operation::ListClusters,
            self.ctx.stores.clusters.as_ref(),
            query,
        )
        .await?;
        Ok(clusters.into_iter().map(Into::into).collect())
    }

    pub async fn update(
        &self,
        principal: Option<&Principal>,
        id: &str,
        request: UpdateClusterRequest,
    ) -> Result<ClusterView> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::UpdateCluster, Target::Cluster(id))
            .await?;

        // Health writes wait on this lock, so the copy read here stays current
        let _guard = self.ctx.write_locks.lock(id).await;
        let mut cluster = self.ctx.stores.clusters.get_by_id(id).await?;
        if request.description.is_some() {
            cluster.description = request.description;
        }
        if let Some(urls) = request.server_urls {
            validate_server_urls(&urls)?;
            cluster.server_urls = urls;
        }
        if let Some(skip) = request.skip_verify_tls {
            cluster.skip_verify_tls = skip;
        }
        if let Some(text) = request.system_credentials {
            let operator = self.ctx.stores.operators.get_by_id(&cluster.operator_id).await?;
            let (creds, account_key) = validate_supplied_credentials(&operator, &text)?;
            cluster.encrypted_system_creds =
                self.ctx.issuer.keyring().encrypt(creds.format().as_bytes())?;
            cluster.system_account_public_key = account_key;
        }
        Ok(self.ctx.stores.clusters.update(cluster).await?.into())
    }

    pub async fn delete(&self, principal: Option<&Principal>, id: &str) -> Result<()> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::DeleteCluster, Target::Cluster(id))
            .await?;
        self.ctx.stores.clusters.delete(id).await?;
        self.ctx.write_locks.forget(id);
        info!(cluster_id = %id, "Deleted cluster");
        Ok(())
    }

    /// Push every account JWT of the cluster's operator.
    ///
    /// Fails only if the cluster cannot be reached; individual push
    /// failures are listed in the report.
    pub async fn sync(&self, principal: Option<&Principal>, id: &str) -> Result<SyncReport> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::SyncCluster, Target::Cluster(id))
            .await?;

        let cluster = self.ctx.stores.clusters.get_by_id(id).await?;
        let accounts = self
            .ctx
            .stores
            .accounts
            .list_by_parent(&cluster.operator_id, Page::all())
            .await?;
        let resolver = open_resolver(&self.ctx, &cluster).await?;

        let mut report = SyncReport {
            cluster_id: cluster.id.clone(),
            pushed: Vec::new(),
            failed: Vec::new(),
        };
        for account in accounts {
            match resolver.push_account_jwt(&account.jwt).await {
                Ok(_) => report.pushed.push(account.name),
                Err(e) => {
                    warn!(
                        cluster = %cluster.name,
                        account = %account.name,
                        "Account push failed: {}", e
                    );
                    report.failed.push(FailedPush {
                        account: account.name,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            cluster = %cluster.name,
            pushed = report.pushed.len(),
            failed = report.failed.len(),
            "Cluster sync complete"
        );
        Ok(report)
    }

    /// Last recorded health
    pub async fn health(&self, principal: Option<&Principal>, id: &str) -> Result<ClusterHealth> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::GetClusterHealth, Target::Cluster(id))
            .await?;
        Ok(self.ctx.stores.clusters.get_by_id(id).await?.health)
    }

    /// Probe one cluster now and record the result
    pub async fn check_health(&self, principal: Option<&Principal>, id: &str) -> Result<ClusterHealth> {
        self.ctx
            .authorizer
            .authorize(principal, Operation::CheckClusterHealth, Target::Cluster(id))
            .await?;
        let cluster = self.ctx.stores.clusters.get_by_id(id).await?;
        let health = probe_cluster(&self.ctx, &cluster).await;
        Ok(record_health(&self.ctx, id, health).await?.health)
    }

    async fn cluster_and_account(&self, cluster_id: &str, account_id: &str) -> Result<(Cluster, Account)> {
        let cluster = self.ctx.stores.clusters.get_by_id(cluster_id).await?;
        let account = self.ctx.stores.accounts.get_by_id(account_id).await?;
        if account.operator_id != cluster.operator_id {
            return Err(GatekeeperError::Validation(format!(
                "account '{}' does not belong to the operator of cluster '{}'",
                account.name, cluster.name
            )));
        }
        Ok((cluster, account))
    }

    /// Ask the cluster's resolver to drop an account JWT
    pub async fn delete_account_from_cluster(
        &self,
        principal: Option<&Principal>,
        cluster_id: &str,
        account_id: &str,
    ) -> Result<String> {
        self.ctx
            .authorizer
            .authorize(
                principal,
                Operation::DeleteAccountFromCluster,
                Target::Cluster(cluster_id),
            )
            .await?;
        let (cluster, account) = self.cluster_and_account(cluster_id, account_id).await?;
        let resolver = open_resolver(&self.ctx, &cluster).await?;
        let message = resolver.delete_account(&account.public_key).await?;
        info!(cluster = %cluster.name, account = %account.name, "Removed account from resolver");
        Ok(message)
    }

    /// The resolver's copy of an account JWT, if it has one
    pub async fn lookup_account_on_cluster(
        &self,
        principal: Option<&Principal>,
        cluster_id: &str,
        account_id: &str,
    ) -> Result<Option<String>> {
        self.ctx
            .authorizer
            .authorize(
                principal,
                Operation::LookupAccountOnCluster,
                Target::Cluster(cluster_id),
            )
            .await?;
        let (cluster, account) = self.cluster_and_account(cluster_id, account_id).await?;
        let resolver = open_resolver(&self.ctx, &cluster).await?;
        Ok(resolver.lookup_account(&account.public_key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::CLAIMS_UPDATE_SUBJECT;
    use crate::services::testing::{admin, context_with, RecordingConnector};
    use crate::services::{
        AccountService, CreateAccountRequest, CreateOperatorRequest, OperatorService, OperatorView,
    };
    use crate::types::ErrorClass;
    use std::sync::Arc;

    async fn operator(ctx: &ServiceContext, with_sys: bool) -> OperatorView {
        OperatorService::new(ctx.clone())
            .create(
                Some(&admin()),
                CreateOperatorRequest {
                    name: "acme".into(),
                    description: None,
                    skip_system_account: !with_sys,
                },
            )
            .await
            .unwrap()
    }

    fn request(operator_id: &str, urls: &[&str]) -> CreateClusterRequest {
        CreateClusterRequest {
            operator_id: operator_id.into(),
            name: "east".into(),
            description: None,
            server_urls: urls.iter().map(|u| u.to_string()).collect(),
            system_credentials: None,
            skip_verify_tls: false,
        }
    }

    #[tokio::test]
    async fn test_sync_pushes_every_account() {
        let connector = Arc::new(RecordingConnector::default());
        let ctx = context_with(connector.clone());
        let op = operator(&ctx, true).await;
        AccountService::new(ctx.clone())
            .create(
                Some(&admin()),
                CreateAccountRequest {
                    operator_id: op.id.clone(),
                    name: "payments".into(),
                    description: None,
                    jetstream: None,
                },
            )
            .await
            .unwrap();

        let service = ClusterService::new(ctx);
        let cluster = service
            .create(Some(&admin()), request(&op.id, &["nats://east:4222"]))
            .await
            .unwrap();
        assert_eq!(
            Some(cluster.system_account_public_key.as_str()),
            op.system_account_public_key.as_deref()
        );

        let report = service.sync(Some(&admin()), &cluster.id).await.unwrap();
        let mut pushed = report.pushed.clone();
        pushed.sort();
        assert_eq!(pushed, vec!["SYS", "payments"]);
        assert!(report.failed.is_empty());

        let requests = connector.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|(subject, _)| subject == CLAIMS_UPDATE_SUBJECT));
    }

    #[tokio::test]
    async fn test_sync_to_unreachable_cluster_is_resolver_error() {
        let ctx = context_with(Arc::new(RecordingConnector::default()));
        let op = operator(&ctx, true).await;
        let service = ClusterService::new(ctx);
        let cluster = service
            .create(Some(&admin()), request(&op.id, &["nats://down:4222"]))
            .await
            .unwrap();

        let err = service.sync(Some(&admin()), &cluster.id).await.unwrap_err();
        assert!(matches!(err, GatekeeperError::Resolver(_)));
    }

    #[tokio::test]
    async fn test_operator_without_system_account_needs_credentials() {
        let ctx = context_with(Arc::new(RecordingConnector::default()));
        let op = operator(&ctx, false).await;
        let err = ClusterService::new(ctx)
            .create(Some(&admin()), request(&op.id, &["nats://east:4222"]))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidArgument);
    }

    #[tokio::test]
    async fn test_supplied_credentials_are_verified() {
        let ctx = context_with(Arc::new(RecordingConnector::default()));
        let op = operator(&ctx, false).await;
        let mut req = request(&op.id, &["nats://east:4222"]);
        req.system_credentials = Some("garbage".into());
        let err = ClusterService::new(ctx)
            .create(Some(&admin()), req)
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidArgument);
    }

    #[tokio::test]
    async fn test_bad_server_url() {
        let ctx = context_with(Arc::new(RecordingConnector::default()));
        let op = operator(&ctx, true).await;
        let err = ClusterService::new(ctx)
            .create(Some(&admin()), request(&op.id, &["http://east"]))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidArgument);
    }

    #[tokio::test]
    async fn test_check_health_records_result() {
        let ctx = context_with(Arc::new(RecordingConnector::default()));
        let op = operator(&ctx, true).await;
        let service = ClusterService::new(ctx);
        let cluster = service
            .create(Some(&admin()), request(&op.id, &["nats://east:4222"]))
            .await
            .unwrap();
        assert!(cluster.health.last_checked_at.is_none());

        let health = service.check_health(Some(&admin()), &cluster.id).await.unwrap();
        assert!(health.healthy);
        assert_eq!(service.health(Some(&admin()), &cluster.id).await.unwrap(), health);
    }
}
