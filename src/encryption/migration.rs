//! Explicit re-encryption of stored secrets under the current key.
//!
//! Never runs implicitly. Records already under the current key are left
//! untouched, so the migration can be re-run after a partial failure.

use serde::Serialize;
use tracing::{info, warn};

use super::keyring::Keyring;
use crate::db::{Entity, EntityStore, Page, Stores};
use crate::types::Result;

/// Outcome of one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Secrets inspected
    pub examined: usize,
    /// Secrets rewritten under the current key
    pub reencrypted: usize,
}

impl MigrationReport {
    fn absorb(&mut self, other: MigrationReport) {
        self.examined += other.examined;
        self.reencrypted += other.reencrypted;
    }
}

async fn migrate<T: Entity>(
    store: &dyn EntityStore<T>,
    keyring: &Keyring,
    secret: impl Fn(&mut T) -> &mut String,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    for mut item in store.list(Page::all()).await? {
        report.examined += 1;
        let field = secret(&mut item);
        if let Some(moved) = keyring.reencrypt(field)? {
            *field = moved;
            store.update(item).await?;
            report.reencrypted += 1;
        }
    }
    Ok(report)
}

/// Re-encrypt every stored seed and system credential under the current key.
///
/// Fails on the first reference that cannot be decrypted; earlier records
/// stay migrated.
pub async fn reencrypt_all(stores: &Stores, keyring: &Keyring) -> Result<MigrationReport> {
    info!(current_key_id = %keyring.current_key_id(), "Starting seed re-encryption");

    let mut report = MigrationReport::default();
    report.absorb(migrate(stores.operators.as_ref(), keyring, |o| &mut o.encrypted_seed).await?);
    report.absorb(migrate(stores.accounts.as_ref(), keyring, |a| &mut a.encrypted_seed).await?);
    report.absorb(migrate(stores.users.as_ref(), keyring, |u| &mut u.encrypted_seed).await?);
    report.absorb(
        migrate(stores.signing_keys.as_ref(), keyring, |k| &mut k.encrypted_seed).await?,
    );
    report.absorb(
        migrate(stores.clusters.as_ref(), keyring, |c| &mut c.encrypted_system_creds)
            .await
            .inspect_err(|e| warn!("Cluster credential re-encryption failed: {}", e))?,
    );

    info!(
        examined = report.examined,
        reencrypted = report.reencrypted,
        "Seed re-encryption complete"
    );
    Ok(report)
}
