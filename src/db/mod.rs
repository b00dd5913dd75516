//! Persistence for the identity hierarchy
//!
//! Services depend only on [`EntityStore`]; [`Stores`] bundles one store
//! per entity type behind trait objects so the in-memory and MongoDB
//! backends are interchangeable.

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

pub use memory::MemoryStore;
pub use mongo::{MongoClient, MongoStore};
pub use store::{ClusterHealthStore, Entity, EntityStore, Page, StoreError};

use crate::types::Result;
use schemas::{Account, ApiUser, Cluster, Operator, ScopedSigningKey, User};

/// One store per entity type
#[derive(Clone)]
pub struct Stores {
    pub operators: Arc<dyn EntityStore<Operator>>,
    pub accounts: Arc<dyn EntityStore<Account>>,
    pub users: Arc<dyn EntityStore<User>>,
    pub signing_keys: Arc<dyn EntityStore<ScopedSigningKey>>,
    pub clusters: Arc<dyn EntityStore<Cluster>>,
    /// Same backend as `clusters`, for health writes
    pub cluster_health: Arc<dyn ClusterHealthStore>,
    pub api_users: Arc<dyn EntityStore<ApiUser>>,
}

impl Stores {
    /// Fresh in-memory stores
    pub fn memory() -> Self {
        let clusters = Arc::new(MemoryStore::<Cluster>::new());
        Self {
            operators: Arc::new(MemoryStore::<Operator>::new()),
            accounts: Arc::new(MemoryStore::<Account>::new()),
            users: Arc::new(MemoryStore::<User>::new()),
            signing_keys: Arc::new(MemoryStore::<ScopedSigningKey>::new()),
            clusters: clusters.clone(),
            cluster_health: clusters,
            api_users: Arc::new(MemoryStore::<ApiUser>::new()),
        }
    }

    /// MongoDB-backed stores; every call is bounded by `timeout`
    pub async fn mongo(client: &MongoClient, timeout: Duration) -> Result<Self> {
        let clusters = Arc::new(client.store::<Cluster>(timeout).await?);
        Ok(Self {
            operators: Arc::new(client.store::<Operator>(timeout).await?),
            accounts: Arc::new(client.store::<Account>(timeout).await?),
            users: Arc::new(client.store::<User>(timeout).await?),
            signing_keys: Arc::new(client.store::<ScopedSigningKey>(timeout).await?),
            clusters: clusters.clone(),
            cluster_health: clusters,
            api_users: Arc::new(client.store::<ApiUser>(timeout).await?),
        })
    }
}
