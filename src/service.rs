// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Task workflows on top of the gateway.
//!
//! These are the callers the gateway was built for: create, full update,
//! status change, listing and delete. Timestamps are owned here: creation
//! stamps `created_at`, every mutation stamps `updated_at`, and nothing ever
//! rewrites `created_at` of an existing task.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::gateway::{DualStoreGateway, GatewayError};
use crate::task::{TaskPriority, TaskRecord, TaskStatus};

/// Caller-supplied task fields, for create and full update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(default)]
    pub due_at: Option<i64>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub reporter: Option<String>,
}

impl TaskRequest {
    pub fn new(title: impl Into<String>, status: TaskStatus, priority: TaskPriority) -> Self {
        Self {
            title: title.into(),
            description: None,
            status,
            priority,
            due_at: None,
            assignee: None,
            reporter: None,
        }
    }

    /// Overwrite every caller-owned field of `record`. Identity and
    /// timestamps are left alone.
    fn apply_to(self, record: &mut TaskRecord) {
        record.title = self.title;
        record.description = self.description;
        record.status = self.status;
        record.priority = self.priority;
        record.due_at = self.due_at;
        record.assignee = self.assignee;
        record.reporter = self.reporter;
    }
}

pub struct TaskService {
    gateway: Arc<DualStoreGateway>,
}

impl TaskService {
    pub fn new(gateway: Arc<DualStoreGateway>) -> Self {
        Self { gateway }
    }

    /// Persist a new task and return it with its store-assigned id.
    pub async fn create_task(&self, request: TaskRequest) -> Result<TaskRecord, GatewayError> {
        let mut record = TaskRecord::new(String::new(), request.status, request.priority);
        request.apply_to(&mut record);

        let saved = self.gateway.save_with_fallback(&record).await?;
        info!(id = ?saved.id, title = %saved.title, "Task created");
        Ok(saved)
    }

    /// Replace a task's fields. Fails with `NotFound` if no store holds `id`.
    ///
    /// The write goes back to whichever store served the read, so a task
    /// created during an outage is updated in the secondary and still has
    /// exactly one copy when the next reconciliation moves it.
    pub async fn update_task(&self, id: i64, request: TaskRequest) -> Result<TaskRecord, GatewayError> {
        let (owner, mut record) = self.gateway.find_located_with_fallback(id).await?;
        request.apply_to(&mut record);
        record.touch();
        let saved = self.gateway.write_back(owner, &record).await?;
        info!(id, store = %owner, "Task updated");
        Ok(saved)
    }

    pub async fn update_status(&self, id: i64, status: TaskStatus) -> Result<TaskRecord, GatewayError> {
        let (owner, mut record) = self.gateway.find_located_with_fallback(id).await?;
        record.status = status;
        record.touch();
        self.gateway.write_back(owner, &record).await
    }

    pub async fn get_task(&self, id: i64) -> Result<TaskRecord, GatewayError> {
        self.gateway.find_by_id_with_fallback(id).await
    }

    pub async fn get_tasks(&self) -> Result<Vec<TaskRecord>, GatewayError> {
        self.gateway.find_all_with_fallback().await
    }

    /// Delete a task, reporting `NotFound` when neither store holds the id.
    pub async fn delete_task(&self, id: i64) -> Result<(), GatewayError> {
        if !self.gateway.exists_by_id_with_fallback(id).await? {
            return Err(GatewayError::NotFound(id));
        }
        self.gateway.delete_by_id_with_fallback(id).await?;
        info!(id, "Task deleted");
        Ok(())
    }
}
