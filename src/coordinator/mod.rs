// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failover engine coordinator.
//!
//! The [`FailoverEngine`] wires the pieces together:
//! - primary and secondary stores, each bounded by the store timeout
//! - the dual-store gateway and the task workflows over it
//! - the availability probe and the reconciler
//! - the reconcile scheduler, started by [`run()`](FailoverEngine::run)
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Ready → Running → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use task_failover::{FailoverEngine, FailoverConfig, EngineState};
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = FailoverConfig::default();
//! let (_tx, rx) = watch::channel(config.clone());
//! let engine = FailoverEngine::new(config, rx);
//!
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! // engine.start().await.expect("Start failed");
//! // assert!(engine.is_ready());
//! # }
//! ```

mod lifecycle;
mod types;

pub use types::{EngineState, HealthCheck};

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::config::FailoverConfig;
use crate::gateway::{DualStoreGateway, GatewayStats};
use crate::reconcile::Reconciler;
use crate::resilience::probe::{AvailabilityProbe, StoreProbe};
use crate::service::TaskService;
use crate::storage::sql::SqlTaskStore;

/// Main failover engine coordinator.
///
/// # Thread Safety
///
/// After [`start()`](Self::start) the engine is shared by reference (or in an
/// `Arc`): `run()` and `shutdown()` both take `&self`.
pub struct FailoverEngine {
    /// Configuration as of the last update
    pub(super) config: RwLock<FailoverConfig>,

    /// Runtime config updates, handed to the scheduler
    pub(super) config_rx: watch::Receiver<FailoverConfig>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Stops the scheduler
    pub(super) shutdown_tx: watch::Sender<bool>,

    pub(super) gateway: Option<Arc<DualStoreGateway>>,
    pub(super) probe: Option<Arc<StoreProbe>>,
    pub(super) reconciler: Option<Arc<Reconciler>>,

    /// SQL stores opened by `start()`, closed on shutdown
    pub(super) sql_stores: Vec<Arc<SqlTaskStore>>,
}

impl FailoverEngine {
    /// Create a new engine.
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// (or [`start_with_stores()`](Self::start_with_stores)) to wire the
    /// stores and transition to `Ready`.
    pub fn new(config: FailoverConfig, config_rx: watch::Receiver<FailoverConfig>) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config: RwLock::new(config),
            config_rx,
            state: state_tx,
            state_rx,
            shutdown_tx,
            gateway: None,
            probe: None,
            reconciler: None,
            sql_stores: Vec::new(),
        }
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if engine is ready to accept requests.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), EngineState::Ready | EngineState::Running)
    }

    #[must_use]
    pub fn config(&self) -> FailoverConfig {
        self.config.read().clone()
    }

    /// The gateway, once started.
    #[must_use]
    pub fn gateway(&self) -> Option<Arc<DualStoreGateway>> {
        self.gateway.clone()
    }

    /// Task workflows over the gateway, once started.
    #[must_use]
    pub fn service(&self) -> Option<TaskService> {
        self.gateway.clone().map(TaskService::new)
    }

    /// The reconciler, for running a pass on demand.
    #[must_use]
    pub fn reconciler(&self) -> Option<Arc<Reconciler>> {
        self.reconciler.clone()
    }

    /// Probe the primary and collect counters.
    ///
    /// The probe is live (one `count()` against the primary, bounded by the
    /// probe timeout); everything else is read from in-memory counters.
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let ready = matches!(state, EngineState::Ready | EngineState::Running);

        let (primary_available, primary_probe_failures) = match self.probe {
            Some(ref probe) => (probe.is_primary_available().await, probe.failure_count()),
            None => (false, 0),
        };

        HealthCheck {
            state,
            ready,
            primary_available,
            primary_probe_failures,
            gateway: self.gateway_stats(),
            reconcile: self
                .reconciler
                .as_ref()
                .map(|r| r.stats())
                .unwrap_or_default(),
        }
    }

    pub(super) fn gateway_stats(&self) -> GatewayStats {
        self.gateway.as_ref().map(|g| g.stats()).unwrap_or_default()
    }
}
