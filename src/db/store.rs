//! Persistence contract consumed by the services
//!
//! Every entity type is stored through the same CRUD surface. Backends
//! enforce uniqueness of ids, of names within a parent, and of public keys
//! atomically: two concurrent creates of the same name under one parent
//! yield exactly one record and one `AlreadyExists`.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::db::schemas::{Cluster, ClusterHealth, Metadata};

/// Store-level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Pagination window for list calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    /// Maximum number of items; `None` means no limit
    pub limit: Option<usize>,
    /// Number of items to skip
    pub offset: usize,
}

impl Page {
    /// Maximum page size accepted from API callers
    pub const MAX_LIMIT: usize = 500;

    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }

    /// Apply the window to an already ordered sequence
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// A persisted identity-fabric document
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// Human-readable kind used in error messages ("account")
    const KIND: &'static str;
    /// MongoDB collection name
    const COLLECTION: &'static str;
    /// Document field holding the sibling-unique name
    const NAME_FIELD: &'static str;
    /// Document field holding the parent id, if the entity has a parent
    const PARENT_FIELD: Option<&'static str>;
    /// Document field holding the NKey public key, if any
    const PUBLIC_KEY_FIELD: Option<&'static str> = None;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn parent_id(&self) -> Option<&str>;

    /// NKey public key, for entities that carry one
    fn public_key(&self) -> Option<&str> {
        None
    }

    fn metadata_mut(&mut self) -> &mut Metadata;

    /// Label like `account 'payments'` for messages
    fn label(&self) -> String {
        format!("{} '{}'", Self::KIND, self.name())
    }
}

/// CRUD + pagination over one entity type
#[async_trait]
pub trait EntityStore<T: Entity>: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` on id, name-within-parent
    /// or public-key collisions.
    async fn create(&self, item: T) -> Result<T, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<T, StoreError>;

    /// Look up by name within a parent (`None` for root entities)
    async fn get_by_name(&self, parent_id: Option<&str>, name: &str) -> Result<T, StoreError>;

    async fn get_by_public_key(&self, public_key: &str) -> Result<T, StoreError>;

    /// All records ordered by creation time
    async fn list(&self, page: Page) -> Result<Vec<T>, StoreError>;

    /// Records under one parent ordered by creation time
    async fn list_by_parent(&self, parent_id: &str, page: Page) -> Result<Vec<T>, StoreError>;

    /// Replace an existing record
    async fn update(&self, item: T) -> Result<T, StoreError>;

    /// Hard delete
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Field-scoped write of the health-monitor-owned cluster fields
#[async_trait]
pub trait ClusterHealthStore: Send + Sync {
    /// Set `health` only, leaving every other field as stored
    async fn update_health(&self, id: &str, health: &ClusterHealth) -> Result<Cluster, StoreError>;
}

/// Not-found error for an id lookup
pub fn not_found<T: Entity>(id: &str) -> StoreError {
    StoreError::NotFound(format!("{} {id}", T::KIND))
}
