//! Gatekeeper - credential issuance and key custody for NATS

use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gatekeeper::{
    auth::SessionTokens,
    config::{Args, StoreBackend},
    db::{MongoClient, Stores},
    encryption::{reencrypt_all, Keyring},
    issuance::Issuer,
    nats::NatsConnector,
    server::{self, AppState},
    services::{HealthMonitor, ServiceContext, Services},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("gatekeeper={},info", args.log_level).into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Gatekeeper - NATS credential custody");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Store: {:?}", args.store);
    info!("Resolver timeout: {:?}", args.resolver_timeout());
    info!("======================================");

    let keyring = Keyring::new(args.keyring_config()?)?;
    info!(current_key_id = %keyring.current_key_id(), "Encryption keyring loaded");
    let keyring = Arc::new(keyring);

    let stores = match args.store {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; all data is lost on exit");
            Stores::memory()
        }
        StoreBackend::Mongodb => {
            let client = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
                Ok(client) => {
                    info!("MongoDB connected successfully");
                    client
                }
                Err(e) => {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            };
            Stores::mongo(&client, args.store_timeout()).await?
        }
    };

    if args.reencrypt_seeds {
        let report = reencrypt_all(&stores, &keyring).await?;
        info!(
            examined = report.examined,
            reencrypted = report.reencrypted,
            "Seed re-encryption complete"
        );
        return Ok(());
    }

    let tokens = match &args.jwt_secret {
        Some(secret) => SessionTokens::new(secret.clone(), args.jwt_expiry_seconds as i64)?,
        None => {
            warn!("No JWT_SECRET configured; using the development session secret");
            SessionTokens::new_dev()
        }
    };

    let ctx = ServiceContext::new(
        stores,
        Issuer::new(keyring),
        Arc::new(NatsConnector),
        args.resolver_timeout(),
    );
    let services = Services::new(ctx.clone(), tokens);

    if let Some((username, password)) = args.bootstrap_admin() {
        services.auth.bootstrap_admin(username, password).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = Arc::new(HealthMonitor::new(ctx, args.health_config()));
    let monitor_task = monitor.spawn(shutdown_rx.clone());

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            // Dropping the sender would stop the server
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let state = Arc::new(AppState { services });
    server::run(state, args.listen, shutdown_rx).await?;

    if let Err(e) = monitor_task.await {
        warn!("Health monitor task ended abnormally: {}", e);
    }
    info!("Gatekeeper stopped");
    Ok(())
}
