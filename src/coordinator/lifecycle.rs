//! Engine lifecycle management: start, run, shutdown.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::gateway::DualStoreGateway;
use crate::reconcile::{ReconcileOptions, ReconcileScheduler, Reconciler};
use crate::resilience::probe::StoreProbe;
use crate::resilience::timeout::BoundedStore;
use crate::storage::sql::{SqlStoreOptions, SqlTaskStore};
use crate::storage::traits::{StorageError, TaskStore};

use super::{EngineState, FailoverEngine};

impl FailoverEngine {
    /// Start the engine: connect both SQL stores and wire the gateway.
    ///
    /// Startup flow:
    /// 1. Connect the secondary eagerly (with retry). It is the store of last
    ///    resort, so startup fails without it.
    /// 2. Open the primary lazily. A primary that is down now is served by the
    ///    secondary until it comes back.
    /// 3. Wire gateway, probe and reconciler. Ready!
    #[tracing::instrument(skip(self))]
    pub async fn start(&mut self) -> Result<(), StorageError> {
        info!("Starting failover engine...");
        self.set_state(EngineState::Connecting);

        let config = self.config();
        let options = SqlStoreOptions {
            max_connections: config.max_connections,
            ..Default::default()
        };

        let Some(secondary_url) = config.secondary_url.clone() else {
            error!("No secondary URL configured");
            self.set_state(EngineState::Created);
            return Err(StorageError::Unavailable(
                "secondary store URL is required".into(),
            ));
        };

        info!("Connecting to secondary store...");
        let secondary = match SqlTaskStore::connect("secondary", &secondary_url, &options).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(error = %e, "Failed to connect to secondary store - required for startup");
                crate::metrics::set_store_available("secondary", false);
                self.set_state(EngineState::Created);
                return Err(e);
            }
        };
        crate::metrics::set_store_available("secondary", true);

        let primary_url = config.primary_url().to_string();
        info!("Opening primary store (lazy)...");
        let primary = match SqlTaskStore::connect_lazy("primary", &primary_url, &options) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(error = %e, "Invalid primary store URL");
                secondary.close().await;
                self.set_state(EngineState::Created);
                return Err(e);
            }
        };

        self.sql_stores = vec![primary.clone(), secondary.clone()];
        self.wire(primary, secondary);
        Ok(())
    }

    /// Start over caller-supplied stores instead of connecting SQL.
    ///
    /// Each store is still bounded by the configured store timeout.
    #[tracing::instrument(skip(self, primary, secondary), fields(primary = %primary.name(), secondary = %secondary.name()))]
    pub fn start_with_stores(&mut self, primary: Arc<dyn TaskStore>, secondary: Arc<dyn TaskStore>) {
        self.set_state(EngineState::Connecting);
        self.wire(primary, secondary);
    }

    fn wire<P, S>(&mut self, primary: P, secondary: S)
    where
        P: TaskStore + 'static,
        S: TaskStore + 'static,
    {
        let config = self.config();

        let primary: Arc<dyn TaskStore> = Arc::new(BoundedStore::new(primary, config.store_timeout()));
        let secondary: Arc<dyn TaskStore> = Arc::new(BoundedStore::new(secondary, config.store_timeout()));

        let probe = Arc::new(StoreProbe::new(primary.clone(), config.probe_timeout()));
        let gateway = DualStoreGateway::new(primary.clone(), secondary.clone(), config.fallback_policy);
        let reconciler = Reconciler::new(
            primary,
            secondary,
            probe.clone(),
            ReconcileOptions::from_config(&config),
        );

        self.gateway = Some(Arc::new(gateway));
        self.probe = Some(probe);
        self.reconciler = Some(Arc::new(reconciler));

        info!(
            fallback_policy = ?config.fallback_policy,
            purge_policy = ?config.purge_policy,
            "Failover engine ready"
        );
        self.set_state(EngineState::Ready);
    }

    /// Run the reconcile scheduler until [`shutdown()`](Self::shutdown).
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<(), StorageError> {
        let Some(reconciler) = self.reconciler.clone() else {
            warn!("Engine not started, nothing to run");
            return Err(StorageError::Unavailable("engine not started".into()));
        };

        self.set_state(EngineState::Running);
        info!("Failover engine running");

        let scheduler = ReconcileScheduler::from_config(reconciler, &self.config());
        scheduler
            .run(self.shutdown_tx.subscribe(), self.config_rx.clone())
            .await;
        Ok(())
    }

    /// Initiate graceful shutdown
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Initiating failover engine shutdown...");
        self.set_state(EngineState::ShuttingDown);
        self.shutdown_tx.send_replace(true);

        for store in &self.sql_stores {
            store.close().await;
        }

        let stats = self.gateway_stats();
        info!(
            calls = stats.calls,
            fallbacks = stats.fallbacks,
            both_failed = stats.both_failed,
            "Failover engine shutdown complete"
        );
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(&state.to_string());
    }
}
