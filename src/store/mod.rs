//! Transactional entity store abstraction
//!
//! The workflow engine never talks to storage directly. It opens a
//! [`StoreTransaction`], reads every record it needs by key, buffers its
//! writes and commits them atomically. A store reports a concurrent writer on
//! any key in the read set as [`StoreError::Conflict`], which the coordinator
//! treats as the only retryable failure.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::model::{
    Activity, ActivityKey, Operation, OperationKey, ParcelAssignment, ParcelKey, Sheet, SheetKey,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Sheet,
    Operation,
    Parcel,
    Activity,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Sheet(SheetKey),
    Operation(OperationKey),
    Parcel(ParcelKey),
    Activity(ActivityKey),
}

impl EntityKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityKey::Sheet(_) => EntityKind::Sheet,
            EntityKey::Operation(_) => EntityKind::Operation,
            EntityKey::Parcel(_) => EntityKind::Parcel,
            EntityKey::Activity(_) => EntityKind::Activity,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Sheet(key) => key.fmt(f),
            EntityKey::Operation(key) => key.fmt(f),
            EntityKey::Parcel(key) => key.fmt(f),
            EntityKey::Activity(key) => key.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Sheet(Sheet),
    Operation(Operation),
    Parcel(ParcelAssignment),
    Activity(Activity),
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        match self {
            Entity::Sheet(sheet) => EntityKey::Sheet(sheet.key),
            Entity::Operation(op) => EntityKey::Operation(op.key.clone()),
            Entity::Parcel(parcel) => EntityKey::Parcel(parcel.key.clone()),
            Entity::Activity(activity) => EntityKey::Activity(activity.key.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("transaction conflict on {key}")]
    Conflict { key: String },
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// One attempt at an atomic multi-key read-modify-write.
///
/// Reads see the transaction's own buffered writes. Nothing is visible to
/// other transactions until `commit` succeeds.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get(&mut self, key: &EntityKey) -> Result<Option<Entity>, StoreError>;

    async fn put(&mut self, entity: Entity) -> Result<(), StoreError>;

    /// Applies all buffered writes, or fails with `Conflict` if any key read
    /// by this transaction changed since it was read.
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Ends the transaction without writing, failing with `Conflict` if any
    /// key it read changed since it was read. Buffered writes are discarded.
    async fn validate_reads(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Every committed key of one kind. Used by reporting views only.
    async fn keys(&self, kind: EntityKind) -> Result<Vec<EntityKey>, StoreError>;
}

/// A record type with a typed key, stored as one [`Entity`] variant.
pub trait Record: Sized + Clone + Send {
    type Key: Clone + fmt::Display + Send + Sync;

    fn entity_key(key: &Self::Key) -> EntityKey;
    fn from_entity(entity: Entity) -> Option<Self>;
    fn into_entity(self) -> Entity;
}

macro_rules! impl_record {
    ($record:ty, $key:ty, $variant:ident) => {
        impl Record for $record {
            type Key = $key;

            fn entity_key(key: &Self::Key) -> EntityKey {
                EntityKey::$variant(key.to_owned())
            }

            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$variant(record) => Some(record),
                    _ => None,
                }
            }

            fn into_entity(self) -> Entity {
                Entity::$variant(self)
            }
        }
    };
}

impl_record!(Sheet, SheetKey, Sheet);
impl_record!(Operation, OperationKey, Operation);
impl_record!(ParcelAssignment, ParcelKey, Parcel);
impl_record!(Activity, ActivityKey, Activity);

/// Typed wrapper over a boxed store transaction.
pub struct Transaction {
    inner: Box<dyn StoreTransaction>,
}

impl Transaction {
    pub async fn begin(store: &dyn EntityStore) -> Result<Self, StoreError> {
        Ok(Self {
            inner: store.begin().await?,
        })
    }

    pub async fn fetch<R: Record>(&mut self, key: &R::Key) -> Result<Option<R>, StoreError> {
        let entity_key = R::entity_key(key);
        match self.inner.get(&entity_key).await? {
            None => Ok(None),
            Some(entity) => R::from_entity(entity)
                .map(Some)
                .ok_or_else(|| StoreError::Backend(format!("record kind mismatch for {entity_key}"))),
        }
    }

    pub async fn put<R: Record>(&mut self, record: R) -> Result<(), StoreError> {
        self.inner.put(record.into_entity()).await
    }

    pub async fn commit(mut self) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    /// Ends a read-only transaction; `Conflict` means the reads may be torn.
    pub async fn validate_reads(mut self) -> Result<(), StoreError> {
        self.inner.validate_reads().await
    }

    pub async fn rollback(mut self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
