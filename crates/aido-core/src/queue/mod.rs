//! Offline operation queue
//!
//! Ordered, durable collection of pending mutations, stored as one serialized
//! snapshot under [`QUEUE_STORAGE_KEY`]. Storage is the source of truth:
//! several handles (a `sync --watch` next to one-off commands) may share it,
//! so every mutation re-reads the snapshot, applies its change by id and
//! writes it back in one storage transaction, and reads reload it.

mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::models::{Mutation, OperationId, PendingConflict, QueuedOperation, ResourceType};

pub use store::{MemoryStore, QueueStore};

/// Storage key holding the serialized queue.
pub const QUEUE_STORAGE_KEY: &str = "aido.offline_queue";

/// Storage key holding recently dropped operations.
pub const DROPPED_STORAGE_KEY: &str = "aido.dropped_operations";

/// How many dropped operations are remembered.
const DROPPED_HISTORY_LIMIT: usize = 50;

/// An operation that exhausted its retries and left the queue unsynced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedOperation {
    pub operation: QueuedOperation,
    /// Last failure reported by the executor
    pub reason: String,
    pub dropped_at: DateTime<Utc>,
}

struct Inner<S> {
    store: S,
    /// Last snapshot seen in storage; also serializes this handle's storage access
    operations: Mutex<Vec<QueuedOperation>>,
}

/// Shared handle to the pending-operation queue.
///
/// Clones share the same store and cached snapshot. Open one queue per
/// storage connection; separate connections (and processes) coordinate
/// through the store's transactions.
pub struct OperationQueue<S: QueueStore> {
    inner: Arc<Inner<S>>,
}

impl<S: QueueStore> Clone for OperationQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: QueueStore> OperationQueue<S> {
    /// Rehydrate the queue from `store`.
    ///
    /// Unparseable persisted state is logged and treated as an empty queue.
    pub async fn load(store: S) -> Result<Self> {
        let operations = decode_queue(store.read(QUEUE_STORAGE_KEY).await?.as_deref());
        tracing::debug!("Restored {} queued operation(s)", operations.len());

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                operations: Mutex::new(operations),
            }),
        })
    }

    /// Append a new operation with `retry_count = 0` and persist the queue.
    ///
    /// Never fails: a persistence error is logged and the operation is kept
    /// in this handle's cached copy only.
    pub async fn enqueue(&self, resource_type: ResourceType, mutation: Mutation) -> OperationId {
        self.push(QueuedOperation::new(resource_type, mutation)).await
    }

    /// Append a fully built operation and persist the queue.
    pub async fn push(&self, operation: QueuedOperation) -> OperationId {
        let id = operation.id;
        tracing::debug!("Queued {} as {}", operation.describe(), id);
        self.mutate(|operations| operations.push(operation.clone()))
            .await;
        id
    }

    /// Remove an operation by id; absent ids are a no-op.
    pub async fn dequeue(&self, id: &OperationId) -> Option<QueuedOperation> {
        self.mutate(|operations| {
            let index = operations.iter().position(|operation| operation.id == *id)?;
            Some(operations.remove(index))
        })
        .await
    }

    /// Swap an operation for a replacement at the same queue position.
    pub async fn replace(&self, id: &OperationId, replacement: QueuedOperation) -> Result<()> {
        self.mutate(|operations| {
            let slot = operations
                .iter_mut()
                .find(|operation| operation.id == *id)
                .ok_or_else(|| Error::NotFound(format!("queued operation {id}")))?;
            *slot = replacement.clone();
            Ok(())
        })
        .await
    }

    /// Increment an operation's retry count; returns the new count.
    pub async fn bump_retry(&self, id: &OperationId) -> Option<u32> {
        self.mutate(|operations| {
            let operation = operations.iter_mut().find(|operation| operation.id == *id)?;
            operation.retry_count = operation.retry_count.saturating_add(1);
            Some(operation.retry_count)
        })
        .await
    }

    /// Park an operation until its version conflict is resolved.
    pub async fn mark_conflict(&self, id: &OperationId, conflict: PendingConflict) -> bool {
        self.mutate(|operations| {
            let Some(operation) = operations.iter_mut().find(|operation| operation.id == *id)
            else {
                return false;
            };
            operation.conflict = Some(conflict.clone());
            true
        })
        .await
    }

    /// Empty the queue and erase its persisted snapshot.
    ///
    /// Returns the number of discarded operations. The cached queue is only
    /// emptied once storage has been erased.
    pub async fn clear(&self) -> Result<usize> {
        let mut cached = self.inner.operations.lock().await;
        let mut discarded = 0;
        self.inner
            .store
            .update(QUEUE_STORAGE_KEY, |raw| {
                discarded = decode_queue(raw.as_deref()).len();
                Ok(None)
            })
            .await?;
        cached.clear();
        tracing::info!("Cleared offline queue ({discarded} operation(s) discarded)");
        Ok(discarded)
    }

    /// Copy of the queue in enqueue order.
    pub async fn snapshot(&self) -> Vec<QueuedOperation> {
        self.reload().await.clone()
    }

    pub async fn get(&self, id: &OperationId) -> Option<QueuedOperation> {
        self.reload()
            .await
            .iter()
            .find(|operation| operation.id == *id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.reload().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reload().await.is_empty()
    }

    /// Operations that can be attempted by a sync pass.
    pub async fn ready(&self) -> Vec<QueuedOperation> {
        self.reload()
            .await
            .iter()
            .filter(|operation| !operation.is_awaiting_resolution())
            .cloned()
            .collect()
    }

    /// Operations parked on a version conflict.
    pub async fn conflicts(&self) -> Vec<QueuedOperation> {
        self.reload()
            .await
            .iter()
            .filter(|operation| operation.is_awaiting_resolution())
            .cloned()
            .collect()
    }

    /// Ids whose textual form starts with `prefix`, in queue order.
    pub async fn ids_with_prefix(&self, prefix: &str) -> Vec<OperationId> {
        let prefix = prefix.trim().to_ascii_lowercase();
        self.reload()
            .await
            .iter()
            .filter(|operation| operation.id.as_str().starts_with(&prefix))
            .map(|operation| operation.id)
            .collect()
    }

    /// Remember a dropped operation so it can still be surfaced later.
    pub async fn record_dropped(&self, operation: QueuedOperation, reason: impl Into<String>) {
        let entry = DroppedOperation {
            operation,
            reason: reason.into(),
            dropped_at: Utc::now(),
        };

        let _guard = self.inner.operations.lock().await;
        let result = self
            .inner
            .store
            .update(DROPPED_STORAGE_KEY, |raw| {
                let mut history = decode_dropped(raw.as_deref());
                history.push(entry);
                if history.len() > DROPPED_HISTORY_LIMIT {
                    let excess = history.len() - DROPPED_HISTORY_LIMIT;
                    history.drain(..excess);
                }
                Ok(Some(serde_json::to_string(&history)?))
            })
            .await;
        if let Err(error) = result {
            tracing::error!("Failed to persist dropped operation history: {}", error);
        }
    }

    /// Recently dropped operations, oldest first.
    pub async fn dropped(&self) -> Vec<DroppedOperation> {
        let _guard = self.inner.operations.lock().await;
        match self.inner.store.read(DROPPED_STORAGE_KEY).await {
            Ok(raw) => decode_dropped(raw.as_deref()),
            Err(error) => {
                tracing::error!("Failed to read dropped-operation history: {}", error);
                Vec::new()
            }
        }
    }

    /// Forget the dropped-operation history.
    pub async fn clear_dropped(&self) -> Result<()> {
        let _guard = self.inner.operations.lock().await;
        self.inner.store.erase(DROPPED_STORAGE_KEY).await
    }

    /// Apply `change` to the latest stored snapshot and write it back atomically.
    ///
    /// If storage fails, the change is applied to the cached copy instead and
    /// the error is logged.
    async fn mutate<T>(&self, change: impl Fn(&mut Vec<QueuedOperation>) -> T) -> T {
        let mut cached = self.inner.operations.lock().await;
        let mut committed = None;
        let result = self
            .inner
            .store
            .update(QUEUE_STORAGE_KEY, |raw| {
                let mut operations = decode_queue(raw.as_deref());
                let output = change(&mut operations);
                let encoded = serde_json::to_string(&operations)?;
                committed = Some((operations, output));
                Ok(Some(encoded))
            })
            .await;

        match (result, committed) {
            (Ok(()), Some((operations, output))) => {
                *cached = operations;
                output
            }
            (result, _) => {
                if let Err(error) = result {
                    tracing::error!("Failed to persist offline queue: {}", error);
                }
                change(&mut *cached)
            }
        }
    }

    /// Refresh the cached snapshot from storage.
    ///
    /// On a read error the cached copy is kept.
    async fn reload(&self) -> MutexGuard<'_, Vec<QueuedOperation>> {
        let mut cached = self.inner.operations.lock().await;
        match self.inner.store.read(QUEUE_STORAGE_KEY).await {
            Ok(raw) => *cached = decode_queue(raw.as_deref()),
            Err(error) => tracing::error!("Failed to reload offline queue: {}", error),
        }
        cached
    }
}

/// Parse a stored queue snapshot; missing or unreadable state is empty.
fn decode_queue(raw: Option<&str>) -> Vec<QueuedOperation> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str(raw).unwrap_or_else(|error| {
        tracing::warn!("Discarding unreadable offline queue snapshot: {}", error);
        Vec::new()
    })
}

fn decode_dropped(raw: Option<&str>) -> Vec<DroppedOperation> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str(raw).unwrap_or_else(|error| {
        tracing::warn!("Ignoring unreadable dropped-operation history: {}", error);
        Vec::new()
    })
}
