//! MongoDB client and entity store
//!
//! Uniqueness is enforced by unique indexes derived from each
//! [`Entity`]'s field constants; duplicate-key write errors surface as
//! `StoreError::AlreadyExists`.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument},
    Client, Collection, IndexModel,
};
use tracing::{debug, info};

use crate::db::schemas::{Cluster, ClusterHealth};
use crate::db::store::{not_found, ClusterHealthStore, Entity, EntityStore, Page, StoreError};
use crate::types::GatekeeperError;

/// MongoDB duplicate key error code
const DUPLICATE_KEY: i32 = 11000;

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, GatekeeperError> {
        info!("Connecting to MongoDB");

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{uri}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        } else {
            format!("{uri}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| GatekeeperError::Database(format!("Failed to connect to MongoDB: {e}")))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| GatekeeperError::Database(format!("MongoDB ping failed: {e}")))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Open the store for one entity type, creating its indexes
    pub async fn store<T: Entity>(&self, timeout: Duration) -> Result<MongoStore<T>, GatekeeperError> {
        let collection = self
            .client
            .database(&self.db_name)
            .collection::<T>(T::COLLECTION);
        let store = MongoStore {
            inner: collection,
            timeout,
            _marker: PhantomData,
        };
        store.apply_indexes().await?;
        Ok(store)
    }
}

/// Typed collection implementing [`EntityStore`]
pub struct MongoStore<T: Entity> {
    inner: Collection<T>,
    /// Deadline applied to every call
    timeout: Duration,
    _marker: PhantomData<T>,
}

fn index_specs<T: Entity>() -> Vec<(Document, IndexOptions)> {
    let unique = |name: String| IndexOptions::builder().unique(true).name(name).build();

    let mut specs = vec![(doc! { "id": 1 }, unique(format!("{}_id_unique", T::COLLECTION)))];

    let mut name_keys = Document::new();
    if let Some(parent) = T::PARENT_FIELD {
        name_keys.insert(parent, 1);
    }
    name_keys.insert(T::NAME_FIELD, 1);
    specs.push((name_keys, unique(format!("{}_name_unique", T::COLLECTION))));

    if let Some(field) = T::PUBLIC_KEY_FIELD {
        let mut keys = Document::new();
        keys.insert(field, 1);
        specs.push((keys, unique(format!("{}_public_key_unique", T::COLLECTION))));
    }

    if let Some(parent) = T::PARENT_FIELD {
        let mut keys = Document::new();
        keys.insert(parent, 1);
        specs.push((
            keys,
            IndexOptions::builder()
                .name(format!("{}_parent_index", T::COLLECTION))
                .build(),
        ));
    }

    specs
}

fn backend(e: mongodb::error::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn map_write_error<T: Entity>(e: mongodb::error::Error, item: &T) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(ref write_error)) = *e.kind {
        if write_error.code == DUPLICATE_KEY {
            return StoreError::AlreadyExists(item.label());
        }
    }
    backend(e)
}

impl<T: Entity> MongoStore<T> {
    async fn apply_indexes(&self) -> Result<(), GatekeeperError> {
        let indices: Vec<IndexModel> = index_specs::<T>()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| GatekeeperError::Database(format!("Failed to create indexes: {e}")))?;

        debug!(collection = T::COLLECTION, "Indexes applied");
        Ok(())
    }

    async fn bounded<F, R>(&self, fut: F) -> Result<R, StoreError>
    where
        F: std::future::Future<Output = Result<R, StoreError>>,
    {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            StoreError::Backend(format!(
                "{} operation timed out after {:?}",
                T::COLLECTION,
                self.timeout
            ))
        })?
    }

    async fn find_one(&self, filter: Document, missing: impl FnOnce() -> StoreError) -> Result<T, StoreError> {
        self.bounded(async {
            self.inner
                .find_one(filter)
                .await
                .map_err(backend)?
                .ok_or_else(missing)
        })
        .await
    }

    async fn find_many(&self, filter: Document, page: Page) -> Result<Vec<T>, StoreError> {
        self.bounded(async {
            let mut find = self
                .inner
                .find(filter)
                .sort(doc! { "metadata.created_at": 1, "id": 1 })
                .skip(page.offset as u64);
            if let Some(limit) = page.limit {
                find = find.limit(limit as i64);
            }
            let cursor = find.await.map_err(backend)?;
            cursor.try_collect().await.map_err(backend)
        })
        .await
    }
}

#[async_trait]
impl<T: Entity> EntityStore<T> for MongoStore<T> {
    async fn create(&self, item: T) -> Result<T, StoreError> {
        self.bounded(async {
            self.inner
                .insert_one(&item)
                .await
                .map_err(|e| map_write_error(e, &item))?;
            Ok(item.clone())
        })
        .await
    }

    async fn get_by_id(&self, id: &str) -> Result<T, StoreError> {
        self.find_one(doc! { "id": id }, || not_found::<T>(id)).await
    }

    async fn get_by_name(&self, parent_id: Option<&str>, name: &str) -> Result<T, StoreError> {
        let mut filter = Document::new();
        if let Some(parent) = T::PARENT_FIELD {
            filter.insert(
                parent,
                parent_id.map(|p| Bson::String(p.to_string())).unwrap_or(Bson::Null),
            );
        }
        filter.insert(T::NAME_FIELD, name);
        self.find_one(filter, || StoreError::NotFound(format!("{} '{name}'", T::KIND)))
            .await
    }

    async fn get_by_public_key(&self, public_key: &str) -> Result<T, StoreError> {
        let missing = || StoreError::NotFound(format!("{} with public key {public_key}", T::KIND));
        let Some(field) = T::PUBLIC_KEY_FIELD else {
            return Err(missing());
        };
        let mut filter = Document::new();
        filter.insert(field, public_key);
        self.find_one(filter, missing).await
    }

    async fn list(&self, page: Page) -> Result<Vec<T>, StoreError> {
        self.find_many(Document::new(), page).await
    }

    async fn list_by_parent(&self, parent_id: &str, page: Page) -> Result<Vec<T>, StoreError> {
        let Some(parent) = T::PARENT_FIELD else {
            return Ok(Vec::new());
        };
        let mut filter = Document::new();
        filter.insert(parent, parent_id);
        self.find_many(filter, page).await
    }

    async fn update(&self, mut item: T) -> Result<T, StoreError> {
        item.metadata_mut().touch();
        self.bounded(async {
            let result = self
                .inner
                .replace_one(doc! { "id": item.id() }, &item)
                .await
                .map_err(|e| map_write_error(e, &item))?;
            if result.matched_count == 0 {
                return Err(not_found::<T>(item.id()));
            }
            Ok(item.clone())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.bounded(async {
            let result = self
                .inner
                .delete_one(doc! { "id": id })
                .await
                .map_err(backend)?;
            if result.deleted_count == 0 {
                return Err(not_found::<T>(id));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ClusterHealthStore for MongoStore<Cluster> {
    async fn update_health(&self, id: &str, health: &ClusterHealth) -> Result<Cluster, StoreError> {
        let health = bson::to_bson(health).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.bounded(async {
            self.inner
                .find_one_and_update(doc! { "id": id }, doc! { "$set": { "health": health } })
                .return_document(ReturnDocument::After)
                .await
                .map_err(backend)?
                .ok_or_else(|| not_found::<Cluster>(id))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{Account, ApiUser, Cluster};

    #[test]
    fn test_account_indexes_scope_names_to_operator() {
        let specs = index_specs::<Account>();
        let keys: Vec<Vec<String>> = specs
            .iter()
            .map(|(doc, _)| doc.keys().cloned().collect())
            .collect();
        assert!(keys.contains(&vec!["operator_id".to_string(), "name".to_string()]));
        assert!(keys.contains(&vec!["public_key".to_string()]));
        assert!(specs
            .iter()
            .filter(|(_, opts)| opts.unique == Some(true))
            .count()
            >= 3);
    }

    #[test]
    fn test_api_user_indexes_are_global() {
        let keys: Vec<Vec<String>> = index_specs::<ApiUser>()
            .iter()
            .map(|(doc, _)| doc.keys().cloned().collect())
            .collect();
        assert!(keys.contains(&vec!["username".to_string()]));
        assert!(!keys.iter().any(|k| k.contains(&"public_key".to_string())));
    }

    #[test]
    fn test_cluster_has_no_public_key_index() {
        let keys: Vec<Vec<String>> = index_specs::<Cluster>()
            .iter()
            .map(|(doc, _)| doc.keys().cloned().collect())
            .collect();
        assert!(!keys.iter().any(|k| k.contains(&"public_key".to_string())));
    }
}
