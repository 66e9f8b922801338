// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{StorageError, TaskStore};
use crate::task::TaskRecord;

/// Task store backed by a concurrent map, with its own identity sequence.
pub struct InMemoryTaskStore {
    name: String,
    data: DashMap<i64, TaskRecord>,
    next_id: AtomicI64,
}

impl InMemoryTaskStore {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id_offset(name, 0)
    }

    /// Issue ids starting at `offset + 1`, so two stores can hand out
    /// visibly different id ranges.
    #[must_use]
    pub fn with_id_offset(name: impl Into<String>, offset: i64) -> Self {
        Self {
            name: name.into(),
            data: DashMap::new(),
            next_id: AtomicI64::new(offset + 1),
        }
    }

    /// Get current record count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Snapshot of all records ordered by id.
    #[must_use]
    pub fn records(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.data.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, record: &TaskRecord) -> Result<TaskRecord, StorageError> {
        let mut stored = record.clone();
        let id = match record.id {
            Some(id) => {
                // Explicit ids must never be handed out again by the sequence
                self.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst);
                id
            }
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        stored.id = Some(id);

        let mut entry = self.data.entry(id).or_insert_with(|| stored.clone());
        let created_at = entry.created_at;
        *entry = TaskRecord { created_at, ..stored };
        Ok(entry.value().clone())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<TaskRecord>, StorageError> {
        Ok(self.data.get(&id).map(|r| r.value().clone()))
    }

    async fn find_all(&self) -> Result<Vec<TaskRecord>, StorageError> {
        Ok(self.records())
    }

    async fn exists_by_id(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.data.contains_key(&id))
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), StorageError> {
        self.data.remove(&id);
        Ok(())
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64, StorageError> {
        Ok(ids.iter().filter(|id| self.data.remove(id).is_some()).count() as u64)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }

    async fn delete_all(&self) -> Result<u64, StorageError> {
        let removed = self.data.len() as u64;
        self.data.clear();
        Ok(removed)
    }
}
