//! Store wrappers that misbehave on purpose

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use forest_exec::store::{
    Entity, EntityKey, EntityKind, EntityStore, MemoryStore, StoreError, StoreTransaction,
};

/// Fails the next `n` commits with a conflict, as if another writer had won
/// each race, then behaves like the wrapped store.
#[derive(Clone)]
pub struct ConflictingStore {
    pub inner: MemoryStore,
    remaining: Arc<AtomicU32>,
    injected: Arc<AtomicU32>,
}

impl ConflictingStore {
    pub fn new(inner: MemoryStore, conflicts: u32) -> Self {
        Self {
            inner,
            remaining: Arc::new(AtomicU32::new(conflicts)),
            injected: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn injected(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityStore for ConflictingStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(ConflictingTransaction {
            inner: self.inner.begin().await?,
            remaining: self.remaining.clone(),
            injected: self.injected.clone(),
        }))
    }

    async fn keys(&self, kind: EntityKind) -> Result<Vec<EntityKey>, StoreError> {
        self.inner.keys(kind).await
    }
}

struct ConflictingTransaction {
    inner: Box<dyn StoreTransaction>,
    remaining: Arc<AtomicU32>,
    injected: Arc<AtomicU32>,
}

#[async_trait]
impl StoreTransaction for ConflictingTransaction {
    async fn get(&mut self, key: &EntityKey) -> Result<Option<Entity>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&mut self, entity: Entity) -> Result<(), StoreError> {
        self.inner.put(entity).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let lose = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lose {
            self.injected.fetch_add(1, Ordering::SeqCst);
            self.inner.rollback().await?;
            return Err(StoreError::Conflict {
                key: "injected".to_string(),
            });
        }
        self.inner.commit().await
    }

    async fn validate_reads(&mut self) -> Result<(), StoreError> {
        self.inner.validate_reads().await
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

/// Commits a staged record behind the reader's back the next time a parcel is
/// read, as if another writer landed between two reads of one transaction.
#[derive(Clone)]
pub struct InterleavingStore {
    pub inner: MemoryStore,
    staged: Arc<Mutex<Option<Entity>>>,
}

impl InterleavingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            staged: Arc::new(Mutex::new(None)),
        }
    }

    pub fn stage(&self, entity: Entity) {
        *self.staged.lock().unwrap() = Some(entity);
    }
}

#[async_trait]
impl EntityStore for InterleavingStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(InterleavingTransaction {
            inner: self.inner.begin().await?,
            store: self.clone(),
        }))
    }

    async fn keys(&self, kind: EntityKind) -> Result<Vec<EntityKey>, StoreError> {
        self.inner.keys(kind).await
    }
}

struct InterleavingTransaction {
    inner: Box<dyn StoreTransaction>,
    store: InterleavingStore,
}

#[async_trait]
impl StoreTransaction for InterleavingTransaction {
    async fn get(&mut self, key: &EntityKey) -> Result<Option<Entity>, StoreError> {
        if key.kind() == EntityKind::Parcel {
            let staged = self.store.staged.lock().unwrap().take();
            if let Some(entity) = staged {
                let mut writer = self.store.inner.begin().await?;
                writer.put(entity).await?;
                writer.commit().await?;
            }
        }
        self.inner.get(key).await
    }

    async fn put(&mut self, entity: Entity) -> Result<(), StoreError> {
        self.inner.put(entity).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn validate_reads(&mut self) -> Result<(), StoreError> {
        self.inner.validate_reads().await
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
