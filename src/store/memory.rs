// In-process entity store with optimistic concurrency control
//
// Every committed key carries a version. A transaction remembers the version it
// observed for each key it read (0 when absent) and commit validates the whole
// read set under the write lock before publishing its buffered writes, which
// makes committed transactions serializable.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::{Entity, EntityKey, EntityKind, EntityStore, Record, StoreError, StoreTransaction};

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    entity: Entity,
}

type Table = HashMap<EntityKey, Versioned>;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    table: Arc<RwLock<Table>>,
    commits: Arc<AtomicU64>,
    conflicts: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed state of one record, read outside any transaction.
    pub async fn load<R: Record>(&self, key: &R::Key) -> Option<R> {
        let table = self.table.read().await;
        table
            .get(&R::entity_key(key))
            .and_then(|stored| R::from_entity(stored.entity.clone()))
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.is_empty()
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            reads: HashMap::new(),
            writes: Vec::new(),
            finished: false,
        }))
    }

    async fn keys(&self, kind: EntityKind) -> Result<Vec<EntityKey>, StoreError> {
        let table = self.table.read().await;
        Ok(table.keys().filter(|key| key.kind() == kind).cloned().collect())
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    reads: HashMap<EntityKey, u64>,
    /// Buffered writes in issue order; a later write to the same key replaces the earlier one.
    writes: Vec<Entity>,
    finished: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Backend("transaction already finished".to_string()));
        }
        Ok(())
    }

    fn check_read_set(&self, table: &Table) -> Result<(), StoreError> {
        for (key, observed) in &self.reads {
            let current = table.get(key).map_or(0, |s| s.version);
            if current != *observed {
                self.store.conflicts.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, observed, current, "optimistic validation failed");
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, key: &EntityKey) -> Result<Option<Entity>, StoreError> {
        self.ensure_open()?;
        if let Some(buffered) = self.writes.iter().find(|entity| &entity.key() == key) {
            return Ok(Some(buffered.clone()));
        }

        let table = self.store.table.read().await;
        let stored = table.get(key);
        let observed = stored.map_or(0, |s| s.version);
        // Keep the first observation; re-reads must not mask a concurrent change.
        self.reads.entry(key.clone()).or_insert(observed);
        Ok(stored.map(|s| s.entity.clone()))
    }

    async fn put(&mut self, entity: Entity) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = entity.key();
        self.writes.retain(|existing| existing.key() != key);
        self.writes.push(entity);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.finished = true;

        let mut table = self.store.table.write().await;
        self.check_read_set(&table)?;

        for entity in self.writes.drain(..) {
            let key = entity.key();
            let version = table.get(&key).map_or(0, |s| s.version) + 1;
            table.insert(key, Versioned { version, entity });
        }
        self.store.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn validate_reads(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.finished = true;
        self.writes.clear();

        let table = self.store.table.read().await;
        self.check_read_set(&table)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.writes.clear();
        self.reads.clear();
        Ok(())
    }
}
