// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Availability probe for the primary store.
//!
//! The probe answers one question, "can the primary take work right now?",
//! and never fails: any error or a timeout is simply `false`. The last answer
//! is kept for metrics and health reporting only. Routing never reads it,
//! because liveness can change between two calls.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::storage::traits::TaskStore;

#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn is_primary_available(&self) -> bool;
}

/// Probe that issues a `count()` against the store under a short timeout.
pub struct StoreProbe {
    store: Arc<dyn TaskStore>,
    timeout: Duration,
    /// Last observed state (observability only)
    available: AtomicBool,
    /// Consecutive failed probes
    failures: AtomicU64,
    /// Serializes probes so a burst of callers doesn't stampede the store
    checking: Mutex<()>,
}

impl StoreProbe {
    pub fn new(store: Arc<dyn TaskStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            available: AtomicBool::new(false),
            failures: AtomicU64::new(0),
            checking: Mutex::new(()),
        }
    }

    /// Result of the most recent probe. Not a routing input.
    #[must_use]
    pub fn last_known(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    fn record(&self, available: bool) {
        if available {
            self.failures.store(0, Ordering::Release);
        } else {
            self.failures.fetch_add(1, Ordering::AcqRel);
        }
        self.available.store(available, Ordering::Release);
        crate::metrics::set_store_available(self.store.name(), available);
    }
}

#[async_trait]
impl AvailabilityProbe for StoreProbe {
    async fn is_primary_available(&self) -> bool {
        let _guard = self.checking.lock().await;

        let available = match tokio::time::timeout(self.timeout, self.store.count()).await {
            Ok(Ok(count)) => {
                debug!(store = %self.store.name(), count, "Probe succeeded");
                true
            }
            Ok(Err(e)) => {
                warn!(store = %self.store.name(), error = %e, "Probe failed");
                false
            }
            Err(_) => {
                warn!(store = %self.store.name(), timeout = ?self.timeout, "Probe timed out");
                false
            }
        };

        self.record(available);
        available
    }
}
