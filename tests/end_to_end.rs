//! End-to-end flows against the in-memory store and a fake resolver

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nkeys::KeyPair;

use gatekeeper::auth::{Principal, Role, SessionTokens};
use gatekeeper::db::schemas::JetStreamLimits;
use gatekeeper::db::Stores;
use gatekeeper::encryption::{DecryptedSeed, Keyring, KeyringConfig};
use gatekeeper::issuance::{decode_and_verify, AccountClaims, Claims, Credentials, Issuer, UserClaims};
use gatekeeper::nats::{ClusterConnection, ResolverConnector, ResolverError, ResolverSession};
use gatekeeper::services::{
    CreateAccountRequest, CreateApiUserRequest, CreateClusterRequest, CreateOperatorRequest,
    CreateUserRequest, HealthMonitor, HealthMonitorConfig, ListQuery, ServiceContext, Services,
    UpdateUserRequest,
};
use gatekeeper::types::ErrorClass;

/// Records pushes; refuses servers whose URL mentions "offline"
#[derive(Default)]
struct FakeResolver {
    pushed: Arc<Mutex<Vec<String>>>,
}

struct FakeSession {
    pushed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ResolverSession for FakeSession {
    async fn request(&self, subject: &str, _payload: Bytes) -> Result<Bytes, ResolverError> {
        self.pushed.lock().unwrap().push(subject.to_string());
        Ok(Bytes::from_static(b"+OK"))
    }

    async fn ping(&self) -> Result<(), ResolverError> {
        Ok(())
    }
}

#[async_trait]
impl ResolverConnector for FakeResolver {
    async fn connect(
        &self,
        connection: &ClusterConnection,
    ) -> Result<Box<dyn ResolverSession>, ResolverError> {
        if connection.server_urls.iter().any(|u| u.contains("offline")) {
            return Err(ResolverError::Connect {
                servers: connection.server_urls.join(","),
                reason: "connection refused".into(),
            });
        }
        Ok(Box::new(FakeSession {
            pushed: self.pushed.clone(),
        }))
    }
}

fn context(connector: Arc<dyn ResolverConnector>) -> ServiceContext {
    let keyring = Keyring::new(KeyringConfig::single("primary", vec![42u8; 32])).unwrap();
    ServiceContext::new(
        Stores::memory(),
        Issuer::new(Arc::new(keyring)),
        connector,
        Duration::from_millis(500),
    )
}

fn admin() -> Principal {
    Principal {
        user_id: "root".into(),
        username: "root".into(),
        role: Role::Admin,
        operator_id: None,
        account_id: None,
    }
}

fn account_request(operator_id: &str, name: &str) -> CreateAccountRequest {
    CreateAccountRequest {
        operator_id: operator_id.into(),
        name: name.into(),
        description: None,
        jetstream: None,
    }
}

fn user_request(account_id: &str, name: &str) -> CreateUserRequest {
    CreateUserRequest {
        account_id: account_id.into(),
        name: name.into(),
        description: None,
        scoped_signing_key_id: None,
    }
}

async fn operator(services: &Services, name: &str) -> String {
    services
        .operators
        .create(
            Some(&admin()),
            CreateOperatorRequest {
                name: name.into(),
                description: None,
                skip_system_account: false,
            },
        )
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_operator_account_user_credentials() {
    let ctx = context(Arc::new(FakeResolver::default()));
    let services = Services::new(ctx.clone(), SessionTokens::new_dev());

    let acme = services
        .operators
        .create(
            Some(&admin()),
            CreateOperatorRequest {
                name: "acme".into(),
                description: None,
                skip_system_account: false,
            },
        )
        .await
        .unwrap();

    let mut payments = account_request(&acme.id, "payments");
    payments.jetstream = Some(JetStreamLimits {
        max_streams: -1,
        ..JetStreamLimits::default()
    });
    let payments = services.accounts.create(Some(&admin()), payments).await.unwrap();
    let account_claims: Claims<AccountClaims> = decode_and_verify(&payments.jwt).unwrap();
    assert_eq!(account_claims.iss, acme.public_key);

    let svc1 = services
        .users
        .create(Some(&admin()), user_request(&payments.id, "svc1"))
        .await
        .unwrap();
    let user_claims: Claims<UserClaims> = decode_and_verify(&svc1.jwt).unwrap();
    assert_eq!(user_claims.iss, payments.public_key);

    let bundle = services
        .users
        .credentials(Some(&admin()), &svc1.id)
        .await
        .unwrap()
        .format();
    assert_eq!(bundle.matches("-----BEGIN NATS USER JWT-----").count(), 1);
    assert_eq!(bundle.matches("------END NATS USER JWT------").count(), 1);
    assert_eq!(bundle.matches("-----BEGIN USER NKEY SEED-----").count(), 1);
    assert_eq!(bundle.matches("------END USER NKEY SEED------").count(), 1);

    let parsed = Credentials::parse(&bundle).unwrap();
    assert_eq!(parsed.jwt, svc1.jwt);

    let stored = ctx.stores.users.get_by_id(&svc1.id).await.unwrap();
    let seed = DecryptedSeed::open(ctx.issuer.keyring(), &stored.encrypted_seed).unwrap();
    assert_eq!(parsed.seed.as_str(), seed.expose());
    assert_eq!(KeyPair::from_seed(&parsed.seed).unwrap().public_key(), svc1.public_key);
}

#[tokio::test]
async fn test_account_admin_sees_only_its_account() {
    let ctx = context(Arc::new(FakeResolver::default()));
    let services = Services::new(ctx, SessionTokens::new_dev());

    let op = operator(&services, "acme").await;
    let x = services.accounts.create(Some(&admin()), account_request(&op, "x")).await.unwrap();
    let y = services.accounts.create(Some(&admin()), account_request(&op, "y")).await.unwrap();
    let ux = services.users.create(Some(&admin()), user_request(&x.id, "ux")).await.unwrap();
    let uy = services.users.create(Some(&admin()), user_request(&y.id, "uy")).await.unwrap();

    services
        .api_users
        .create(
            Some(&admin()),
            CreateApiUserRequest {
                username: "x-admin".into(),
                password: "x-admin-password".into(),
                role: Role::AccountAdmin,
                operator_id: None,
                account_id: Some(x.id.clone()),
            },
        )
        .await
        .unwrap();
    let login = services.auth.login("x-admin", "x-admin-password").await.unwrap();
    let principal = services.auth.authenticate_token(&login.token).await.unwrap();
    assert_eq!(principal.account_id.as_deref(), Some(x.id.as_str()));

    services.users.get(Some(&principal), &ux.id).await.unwrap();
    services
        .users
        .update(
            Some(&principal),
            &ux.id,
            UpdateUserRequest {
                description: Some("billing worker".into()),
            },
        )
        .await
        .unwrap();

    let err = services.users.get(Some(&principal), &uy.id).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::PermissionDenied);

    let visible = services.users.list(Some(&principal), &ListQuery::default()).await.unwrap();
    assert_eq!(visible.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec![ux.id.as_str()]);

    let err = services.users.list(None, &ListQuery::default()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Unauthenticated);
}

#[tokio::test]
async fn test_sibling_names_are_unique() {
    let ctx = context(Arc::new(FakeResolver::default()));
    let services = Services::new(ctx, SessionTokens::new_dev());
    let acme = operator(&services, "acme").await;
    let globex = operator(&services, "globex").await;

    services
        .accounts
        .create(Some(&admin()), account_request(&acme, "payments"))
        .await
        .unwrap();
    let err = services
        .accounts
        .create(Some(&admin()), account_request(&acme, "payments"))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::AlreadyExists);

    services
        .accounts
        .create(Some(&admin()), account_request(&globex, "payments"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_health_cycle_with_one_cluster_down() {
    let resolver = Arc::new(FakeResolver::default());
    let ctx = context(resolver.clone());
    let services = Services::new(ctx.clone(), SessionTokens::new_dev());
    let op = operator(&services, "acme").await;

    let mut ids = Vec::new();
    for (name, url) in [("east", "nats://east:4222"), ("west", "nats://offline:4222")] {
        let cluster = services
            .clusters
            .create(
                Some(&admin()),
                CreateClusterRequest {
                    operator_id: op.clone(),
                    name: name.into(),
                    description: None,
                    server_urls: vec![url.into()],
                    system_credentials: None,
                    skip_verify_tls: false,
                },
            )
            .await
            .unwrap();
        ids.push(cluster.id);
    }

    let monitor = HealthMonitor::new(ctx, HealthMonitorConfig::default());
    assert_eq!(monitor.run_cycle().await, (1, 1));

    let east = services.clusters.health(Some(&admin()), &ids[0]).await.unwrap();
    assert!(east.healthy);
    assert!(east.last_error.is_none());

    let west = services.clusters.health(Some(&admin()), &ids[1]).await.unwrap();
    assert!(!west.healthy);
    assert!(west.last_error.is_some_and(|e| !e.is_empty()));

    let report = services.clusters.sync(Some(&admin()), &ids[0]).await.unwrap();
    assert_eq!(report.pushed, vec!["SYS"]);
    assert_eq!(resolver.pushed.lock().unwrap().len(), 1);
}
