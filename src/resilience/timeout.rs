// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-call time bounds for store adapters.
//!
//! [`BoundedStore`] wraps any [`TaskStore`] and fails a call with
//! [`StorageError::Timeout`] once it exceeds the configured limit, so a hung
//! backend looks exactly like a failed one to the gateway and the reconciler.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::storage::traits::{StorageError, TaskStore};
use crate::task::TaskRecord;

pub struct BoundedStore<S: TaskStore> {
    inner: S,
    limit: Duration,
    timeouts: AtomicU64,
}

impl<S: TaskStore> BoundedStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self {
            inner,
            limit,
            timeouts: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Number of calls cut off so far.
    #[must_use]
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T, Fut>(&self, operation: &'static str, fut: Fut) -> Result<T, StorageError>
    where
        Fut: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(store = %self.inner.name(), operation, limit = ?self.limit, "Store call timed out");
                crate::metrics::record_store_timeout(self.inner.name(), operation);
                Err(StorageError::Timeout(self.limit))
            }
        }
    }
}

#[async_trait]
impl<S: TaskStore> TaskStore for BoundedStore<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn save(&self, record: &TaskRecord) -> Result<TaskRecord, StorageError> {
        self.bounded("save", self.inner.save(record)).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<TaskRecord>, StorageError> {
        self.bounded("find_by_id", self.inner.find_by_id(id)).await
    }

    async fn find_all(&self) -> Result<Vec<TaskRecord>, StorageError> {
        self.bounded("find_all", self.inner.find_all()).await
    }

    async fn exists_by_id(&self, id: i64) -> Result<bool, StorageError> {
        self.bounded("exists_by_id", self.inner.exists_by_id(id)).await
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), StorageError> {
        self.bounded("delete_by_id", self.inner.delete_by_id(id)).await
    }

    async fn count(&self) -> Result<u64, StorageError> {
        self.bounded("count", self.inner.count()).await
    }

    async fn delete_all(&self) -> Result<u64, StorageError> {
        self.bounded("delete_all", self.inner.delete_all()).await
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64, StorageError> {
        self.bounded("delete_many", self.inner.delete_many(ids)).await
    }
}
