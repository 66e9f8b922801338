// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dual-store gateway.
//!
//! Every operation tries the primary store first and, when the primary path
//! fails, repeats the same operation against the secondary store. Callers
//! see one result; only the located read says which store served it.
//!
//! ```text
//!   save / find_by_id / exists_by_id / delete_by_id
//!
//!        ┌─────────┐  ok
//!   ───▶ │ primary │ ─────────────────────▶ result
//!        └─────────┘                          ▲
//!             │ error (policy allows)         │ ok
//!             ▼                               │
//!        ┌───────────┐ ───────────────────────┘
//!        │ secondary │ ── error ──▶ StoreUnavailable (secondary's error)
//!        └───────────┘
//!
//!   find_all: primary (errors degrade to empty) ++ secondary, always both
//! ```
//!
//! Nothing about store liveness is remembered between calls: each call
//! starts at the primary again.
//!
//! # Known gaps
//!
//! - Identifiers are store-local. `find_by_id` falling through to the
//!   secondary only finds the intended task when both stores happen to use
//!   the same id for it.
//! - `delete_by_id` deletes from exactly one store. If the primary delete
//!   fails for any reason, the delete goes to the secondary and may remove an
//!   unrelated task that shares the id there.
//! - Under [`FallbackPolicy::AnyFailure`] a logical error on the primary
//!   (such as a constraint violation) is treated like an outage and the
//!   operation is retried on the secondary.
//! - A save that carries an id and fails on the primary is inserted into the
//!   secondary as a new task with a fresh id, never upserted at the primary's
//!   id. The primary copy stays where it was, so once the primary is back the
//!   listing shows both until one is deleted.
//!
//! Read-modify-write callers should pair [`DualStoreGateway::find_located_with_fallback`]
//! with [`DualStoreGateway::write_back`], which writes to the store that served
//! the read and nowhere else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::FallbackPolicy;
use crate::metrics::LatencyTimer;
use crate::storage::traits::{StorageError, TaskStore};
use crate::task::TaskRecord;

/// Failure surfaced to gateway callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No store holds the requested id.
    #[error("Task {0} not found")]
    NotFound(i64),
    /// The secondary failed after the primary path had already failed (or
    /// for `find_all`, the secondary read failed). Carries the secondary's error.
    #[error("Task storage unavailable: {source}")]
    StoreUnavailable {
        #[source]
        source: StorageError,
    },
    /// The record was rejected before any store was called.
    #[error("Invalid task: {0}")]
    Invalid(String),
    /// The primary refused the operation for a logical reason and the
    /// fallback policy does not retry those.
    #[error("Task store rejected the operation: {0}")]
    Store(StorageError),
}

/// Which of the two stores served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Primary,
    Secondary,
}

impl StoreRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Primary => "primary",
            StoreRole::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for StoreRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for gateway routing decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub calls: u64,
    pub fallbacks: u64,
    pub both_failed: u64,
}

pub struct DualStoreGateway {
    primary: Arc<dyn TaskStore>,
    secondary: Arc<dyn TaskStore>,
    policy: FallbackPolicy,
    calls: AtomicU64,
    fallbacks: AtomicU64,
    both_failed: AtomicU64,
}

impl DualStoreGateway {
    pub fn new(primary: Arc<dyn TaskStore>, secondary: Arc<dyn TaskStore>, policy: FallbackPolicy) -> Self {
        Self {
            primary,
            secondary,
            policy,
            calls: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            both_failed: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            calls: self.calls.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            both_failed: self.both_failed.load(Ordering::Relaxed),
        }
    }

    /// Persist a task. New tasks get an id from whichever store accepts them.
    #[tracing::instrument(level = "debug", skip(self, record), fields(id = ?record.id))]
    pub async fn save_with_fallback(&self, record: &TaskRecord) -> Result<TaskRecord, GatewayError> {
        let _timer = LatencyTimer::new("save");
        self.calls.fetch_add(1, Ordering::Relaxed);
        record.validate().map_err(|e| GatewayError::Invalid(e.to_string()))?;

        let primary_err = match observe(&*self.primary, "save", self.primary.save(record).await) {
            Ok(saved) => return Ok(saved),
            Err(e) => e,
        };
        self.fall_back("save", primary_err)?;

        // The secondary may hold an unrelated task at the primary's id
        let detached;
        let to_secondary = match record.id {
            Some(id) => {
                warn!(id, "Identified save redirected to secondary, inserting as a new task");
                detached = record.detached();
                &detached
            }
            None => record,
        };

        observe(&*self.secondary, "save", self.secondary.save(to_secondary).await)
            .map_err(|e| self.surface("save", e))
    }

    /// Look a task up by id. A miss on the primary counts as a reason to look
    /// in the secondary, same as a primary error.
    pub async fn find_by_id_with_fallback(&self, id: i64) -> Result<TaskRecord, GatewayError> {
        self.find_located_with_fallback(id).await.map(|(_, record)| record)
    }

    /// [`Self::find_by_id_with_fallback`], also reporting which store served
    /// the record.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn find_located_with_fallback(&self, id: i64) -> Result<(StoreRole, TaskRecord), GatewayError> {
        let _timer = LatencyTimer::new("find_by_id");
        self.calls.fetch_add(1, Ordering::Relaxed);

        match observe(&*self.primary, "find_by_id", self.primary.find_by_id(id).await) {
            Ok(Some(record)) => return Ok((StoreRole::Primary, record)),
            Ok(None) => {
                debug!(id, "Task not in primary, searching secondary");
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_fallback("find_by_id", "miss");
            }
            Err(e) => self.fall_back("find_by_id", e)?,
        }

        match observe(&*self.secondary, "find_by_id", self.secondary.find_by_id(id).await) {
            Ok(Some(record)) => Ok((StoreRole::Secondary, record)),
            Ok(None) => {
                crate::metrics::record_operation(self.secondary.name(), "find_by_id", "not_found");
                Err(GatewayError::NotFound(id))
            }
            Err(e) => Err(self.surface("find_by_id", e)),
        }
    }

    /// Everything from both stores, primary's records first.
    ///
    /// Unlike the other operations this is a union, not a substitution: a
    /// failing primary contributes nothing and the secondary is read anyway.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn find_all_with_fallback(&self) -> Result<Vec<TaskRecord>, GatewayError> {
        let _timer = LatencyTimer::new("find_all");
        self.calls.fetch_add(1, Ordering::Relaxed);

        let mut tasks = match observe(&*self.primary, "find_all", self.primary.find_all().await) {
            Ok(tasks) => tasks,
            Err(e) => {
                self.fall_back("find_all", e)?;
                Vec::new()
            }
        };

        let from_secondary = observe(&*self.secondary, "find_all", self.secondary.find_all().await)
            .map_err(|e| self.surface("find_all", e))?;

        debug!(primary = tasks.len(), secondary = from_secondary.len(), "Merged task listings");
        tasks.extend(from_secondary);
        Ok(tasks)
    }

    /// `true` if either store holds the id. A `true` from the primary
    /// short-circuits; the secondary is consulted otherwise.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn exists_by_id_with_fallback(&self, id: i64) -> Result<bool, GatewayError> {
        let _timer = LatencyTimer::new("exists_by_id");
        self.calls.fetch_add(1, Ordering::Relaxed);

        match observe(&*self.primary, "exists_by_id", self.primary.exists_by_id(id).await) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => self.fall_back("exists_by_id", e)?,
        }

        observe(&*self.secondary, "exists_by_id", self.secondary.exists_by_id(id).await)
            .map_err(|e| self.surface("exists_by_id", e))
    }

    /// Delete from the primary, or from the secondary if the primary delete
    /// fails. Never deletes from both.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_by_id_with_fallback(&self, id: i64) -> Result<(), GatewayError> {
        let _timer = LatencyTimer::new("delete_by_id");
        self.calls.fetch_add(1, Ordering::Relaxed);

        let primary_err = match observe(&*self.primary, "delete_by_id", self.primary.delete_by_id(id).await) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        self.fall_back("delete_by_id", primary_err)?;

        observe(&*self.secondary, "delete_by_id", self.secondary.delete_by_id(id).await)
            .map_err(|e| self.surface("delete_by_id", e))
    }

    /// Save a modified task back to the store it was read from.
    ///
    /// There is no fallback: the other store either lacks the task or holds
    /// an unrelated one under the same id, so redirecting the write would
    /// duplicate or overwrite. A failure of the owning store is surfaced as
    /// `StoreUnavailable` (or `Store` for a logical refusal) and the caller
    /// may retry.
    #[tracing::instrument(level = "debug", skip(self, record), fields(id = ?record.id))]
    pub async fn write_back(&self, owner: StoreRole, record: &TaskRecord) -> Result<TaskRecord, GatewayError> {
        let _timer = LatencyTimer::new("write_back");
        self.calls.fetch_add(1, Ordering::Relaxed);
        if record.id.is_none() {
            return Err(GatewayError::Invalid("write-back needs a stored task".into()));
        }
        record.validate().map_err(|e| GatewayError::Invalid(e.to_string()))?;

        let store = match owner {
            StoreRole::Primary => &self.primary,
            StoreRole::Secondary => &self.secondary,
        };
        observe(&**store, "write_back", store.save(record).await).map_err(|err| {
            error!(owner = %owner, error = %err, "Owning store failed, write not redirected");
            if err.is_availability() {
                GatewayError::StoreUnavailable { source: err }
            } else {
                GatewayError::Store(err)
            }
        })
    }

    /// Decide whether a primary error may go to the secondary.
    /// Returns the error to surface when it may not.
    fn fall_back(&self, operation: &'static str, err: StorageError) -> Result<(), GatewayError> {
        let allowed = match self.policy {
            FallbackPolicy::AnyFailure => true,
            FallbackPolicy::AvailabilityOnly => err.is_availability(),
        };

        if !allowed {
            warn!(operation, error = %err, "Primary rejected operation, not falling back");
            return Err(GatewayError::Store(err));
        }

        warn!(operation, error = %err, "Primary store failed, falling back to secondary");
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_fallback(operation, err.kind());
        Ok(())
    }

    /// Classify a secondary failure for the caller.
    fn surface(&self, operation: &'static str, err: StorageError) -> GatewayError {
        error!(operation, error = %err, "Secondary store failed");
        self.both_failed.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_both_failed(operation);
        GatewayError::StoreUnavailable { source: err }
    }
}

/// Record the outcome of one store call and pass it through.
fn observe<T>(
    store: &dyn TaskStore,
    operation: &'static str,
    result: Result<T, StorageError>,
) -> Result<T, StorageError> {
    let status = if result.is_ok() { "success" } else { "error" };
    crate::metrics::record_operation(store.name(), operation, status);
    result
}
