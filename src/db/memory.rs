//! In-process entity store
//!
//! Used in dev mode and by tests. All uniqueness checks happen under the
//! same write lock as the insert, so concurrent creates cannot race past
//! each other.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::db::schemas::{Cluster, ClusterHealth};
use crate::db::store::{not_found, ClusterHealthStore, Entity, EntityStore, Page, StoreError};

/// Vec-backed store; insertion order is creation order
pub struct MemoryStore<T: Entity> {
    items: RwLock<Vec<T>>,
}

impl<T: Entity> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Entity> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn collides<T: Entity>(existing: &T, candidate: &T) -> Option<StoreError> {
    if existing.id() == candidate.id() {
        return Some(StoreError::AlreadyExists(format!(
            "{} {}",
            T::KIND,
            candidate.id()
        )));
    }
    if existing.parent_id() == candidate.parent_id() && existing.name() == candidate.name() {
        return Some(StoreError::AlreadyExists(candidate.label()));
    }
    match (existing.public_key(), candidate.public_key()) {
        (Some(a), Some(b)) if a == b => Some(StoreError::AlreadyExists(format!(
            "{} with public key {b}",
            T::KIND
        ))),
        _ => None,
    }
}

#[async_trait]
impl<T: Entity> EntityStore<T> for MemoryStore<T> {
    async fn create(&self, item: T) -> Result<T, StoreError> {
        let mut items = self.items.write().await;
        if let Some(err) = items.iter().find_map(|existing| collides(existing, &item)) {
            return Err(err);
        }
        items.push(item.clone());
        Ok(item)
    }

    async fn get_by_id(&self, id: &str) -> Result<T, StoreError> {
        self.items
            .read()
            .await
            .iter()
            .find(|item| item.id() == id)
            .cloned()
            .ok_or_else(|| not_found::<T>(id))
    }

    async fn get_by_name(&self, parent_id: Option<&str>, name: &str) -> Result<T, StoreError> {
        self.items
            .read()
            .await
            .iter()
            .find(|item| item.parent_id() == parent_id && item.name() == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{} '{name}'", T::KIND)))
    }

    async fn get_by_public_key(&self, public_key: &str) -> Result<T, StoreError> {
        self.items
            .read()
            .await
            .iter()
            .find(|item| item.public_key() == Some(public_key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{} with public key {public_key}", T::KIND)))
    }

    async fn list(&self, page: Page) -> Result<Vec<T>, StoreError> {
        Ok(page.apply(self.items.read().await.iter().cloned()))
    }

    async fn list_by_parent(&self, parent_id: &str, page: Page) -> Result<Vec<T>, StoreError> {
        let items = self.items.read().await;
        Ok(page.apply(
            items
                .iter()
                .filter(|item| item.parent_id() == Some(parent_id))
                .cloned(),
        ))
    }

    async fn update(&self, mut item: T) -> Result<T, StoreError> {
        let mut items = self.items.write().await;
        let position = items
            .iter()
            .position(|existing| existing.id() == item.id())
            .ok_or_else(|| not_found::<T>(item.id()))?;

        if let Some(err) = items
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != position)
            .find_map(|(_, existing)| collides(existing, &item))
        {
            return Err(err);
        }

        item.metadata_mut().touch();
        items[position] = item.clone();
        Ok(item)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut items = self.items.write().await;
        let position = items
            .iter()
            .position(|existing| existing.id() == id)
            .ok_or_else(|| not_found::<T>(id))?;
        items.remove(position);
        Ok(())
    }
}

#[async_trait]
impl ClusterHealthStore for MemoryStore<Cluster> {
    async fn update_health(&self, id: &str, health: &ClusterHealth) -> Result<Cluster, StoreError> {
        let mut items = self.items.write().await;
        let cluster = items
            .iter_mut()
            .find(|existing| existing.id == id)
            .ok_or_else(|| not_found::<Cluster>(id))?;
        cluster.health = health.clone();
        Ok(cluster.clone())
    }
}
