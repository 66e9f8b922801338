// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::task::TaskRecord;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Store could not be reached (connection refused, pool exhausted, I/O).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
    /// The store rejected the operation (unique key, NOT NULL, ...).
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Invalid task record: {0}")]
    Validation(String),
    #[error("Corrupt row for task {id}: {reason}")]
    Corruption { id: i64, reason: String },
}

impl StorageError {
    /// Whether this error says something about the store's availability,
    /// as opposed to the request itself being wrong.
    #[must_use]
    pub fn is_availability(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Constraint(_) => "constraint",
            Self::Validation(_) => "validation",
            Self::Corruption { .. } => "corruption",
        }
    }
}

/// Uniform capability surface over one task persistence backend.
///
/// Identifiers are issued by the implementing store and only meaningful there.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Short name used in logs and metrics ("primary", "secondary", ...).
    fn name(&self) -> &str;

    /// Insert when `record.id` is `None` (the store assigns a fresh id),
    /// otherwise update the row with that id. Returns the stored record.
    async fn save(&self, record: &TaskRecord) -> Result<TaskRecord, StorageError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<TaskRecord>, StorageError>;

    async fn find_all(&self) -> Result<Vec<TaskRecord>, StorageError>;

    async fn exists_by_id(&self, id: i64) -> Result<bool, StorageError>;

    /// Deleting a missing id is not an error.
    async fn delete_by_id(&self, id: i64) -> Result<(), StorageError>;

    async fn count(&self) -> Result<u64, StorageError>;

    async fn delete_all(&self) -> Result<u64, StorageError>;

    /// Delete several ids and return how many were actually removed.
    /// Default implementation checks and deletes one id at a time.
    async fn delete_many(&self, ids: &[i64]) -> Result<u64, StorageError> {
        let mut removed = 0;
        for id in ids {
            if self.exists_by_id(*id).await? {
                self.delete_by_id(*id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl<T: TaskStore + ?Sized> TaskStore for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn save(&self, record: &TaskRecord) -> Result<TaskRecord, StorageError> {
        (**self).save(record).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<TaskRecord>, StorageError> {
        (**self).find_by_id(id).await
    }

    async fn find_all(&self) -> Result<Vec<TaskRecord>, StorageError> {
        (**self).find_all().await
    }

    async fn exists_by_id(&self, id: i64) -> Result<bool, StorageError> {
        (**self).exists_by_id(id).await
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), StorageError> {
        (**self).delete_by_id(id).await
    }

    async fn count(&self) -> Result<u64, StorageError> {
        (**self).count().await
    }

    async fn delete_all(&self) -> Result<u64, StorageError> {
        (**self).delete_all().await
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64, StorageError> {
        (**self).delete_many(ids).await
    }
}
