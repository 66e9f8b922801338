//! Public types for the failover engine.

use crate::gateway::GatewayStats;
use crate::reconcile::ReconcileStats;

/// Engine lifecycle state.
///
/// Use [`super::FailoverEngine::state()`] to check the current state or
/// [`super::FailoverEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Connecting to the stores
    Connecting,
    /// Stores wired, gateway usable
    Ready,
    /// Reconcile scheduler running
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Snapshot for readiness and diagnostics endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub state: EngineState,
    /// Gateway accepts calls
    pub ready: bool,
    /// Live probe result at the time of the check
    pub primary_available: bool,
    /// Consecutive failed probes
    pub primary_probe_failures: u64,
    pub gateway: GatewayStats,
    pub reconcile: ReconcileStats,
}

impl HealthCheck {
    /// Serving from the secondary counts as degraded, not unhealthy.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.ready && !self.primary_available
    }
}
