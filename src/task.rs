// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Task record data structure.
//!
//! The [`TaskRecord`] is the unit of persistence that flows through the
//! gateway and the reconciler. Its identifier is issued by whichever store
//! persisted it and carries no meaning in the other store.

use serde::{Deserialize, Serialize};

use crate::storage::traits::StorageError;

/// Max title length accepted by both stores.
pub const MAX_TITLE_LEN: usize = 100;

/// Max assignee/reporter length accepted by both stores.
pub const MAX_PERSON_LEN: usize = 50;

/// Workflow status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    /// Column/wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TODO" => Some(Self::Todo),
            "IN_PROGRESS" => Some(Self::InProgress),
            "DONE" => Some(Self::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted (or about to be persisted) task.
///
/// # Example
///
/// ```
/// use task_failover::{TaskRecord, TaskStatus, TaskPriority};
///
/// let task = TaskRecord::new("Implement authentication", TaskStatus::InProgress, TaskPriority::High)
///     .with_assignee("alice");
///
/// assert!(task.id.is_none());
/// assert!(task.updated_at.is_none());
/// assert!(task.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Store-local identifier, `None` until first persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Creation timestamp (epoch millis), immutable once set
    pub created_at: i64,
    /// Last mutation timestamp (epoch millis)
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub due_at: Option<i64>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub reporter: Option<String>,
}

impl TaskRecord {
    /// Create a new unsaved task stamped with the current time.
    pub fn new(title: impl Into<String>, status: TaskStatus, priority: TaskPriority) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: None,
            status,
            priority,
            created_at: now_millis(),
            updated_at: None,
            due_at: None,
            assignee: None,
            reporter: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_due_at(mut self, due_at: i64) -> Self {
        self.due_at = Some(due_at);
        self
    }

    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: impl Into<String>) -> Self {
        self.reporter = Some(reporter.into());
        self
    }

    /// Whether this record has been persisted by some store.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Copy of this record without its store-local identifier.
    ///
    /// Used when moving a record to a store with a different identity domain.
    /// Every other field, timestamps included, is kept as is.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            id: None,
            ..self.clone()
        }
    }

    /// Stamp a mutation. Never moves `updated_at` before `created_at`.
    pub fn touch(&mut self) {
        self.updated_at = Some(now_millis().max(self.created_at));
    }

    /// Check field constraints shared by both stores.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.title.trim().is_empty() {
            return Err(StorageError::Validation("title must not be blank".into()));
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(StorageError::Validation(format!(
                "title longer than {} characters",
                MAX_TITLE_LEN
            )));
        }
        for (field, value) in [("assignee", &self.assignee), ("reporter", &self.reporter)] {
            if let Some(v) = value {
                if v.chars().count() > MAX_PERSON_LEN {
                    return Err(StorageError::Validation(format!(
                        "{} longer than {} characters",
                        field, MAX_PERSON_LEN
                    )));
                }
            }
        }
        if let Some(updated) = self.updated_at {
            if updated < self.created_at {
                return Err(StorageError::Validation(
                    "updated_at precedes created_at".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Current wall clock time in epoch millis.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
