// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation: draining the secondary store back into the primary.
//!
//! While the primary is down, writes pile up in the secondary. A pass moves
//! them home:
//!
//! ```text
//!   probe primary ──(down)──▶ skip
//!        │
//!        ▼
//!   read secondary ──(error)──▶ report, nothing deleted
//!        │
//!        ▼
//!   for each record: strip id, insert into primary (failures counted)
//!        │
//!        ▼
//!   purge secondary (per PurgePolicy)
//! ```
//!
//! Migrated records get fresh primary ids. Under [`PurgePolicy::All`] a
//! record whose insert failed is still deleted from the secondary and is
//! lost; [`PurgePolicy::MigratedOnly`] keeps it for the next pass.
//!
//! A pass is not atomic with respect to gateway traffic. A task written to
//! the secondary after the read but before the purge is deleted without
//! having been migrated.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{FailoverConfig, PurgePolicy};
use crate::resilience::probe::AvailabilityProbe;
use crate::storage::traits::{StorageError, TaskStore};

/// Why a pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PrimaryUnavailable,
    AlreadyRunning,
}

/// Counts from a pass that got past the read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records read from the secondary (after truncation)
    pub read: usize,
    /// Records inserted into the primary
    pub migrated: usize,
    /// Records whose insert failed
    pub failed: usize,
    /// Records deleted from the secondary
    pub purged: u64,
    /// The secondary held more than `max_records`
    pub truncated: bool,
    /// Set when the purge itself failed; the secondary was left as is
    pub purge_error: Option<StorageError>,
}

impl ReconcileReport {
    /// Every record read made it into the primary and was purged.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.purge_error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    /// Reading the secondary failed; nothing was migrated or deleted.
    ReadFailed(StorageError),
    Completed(ReconcileReport),
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Skipped(SkipReason::PrimaryUnavailable) => "skipped_unavailable",
            Self::Skipped(SkipReason::AlreadyRunning) => "skipped_running",
            Self::ReadFailed(_) => "read_failed",
            Self::Completed(report) if report.is_clean() => "completed",
            Self::Completed(_) => "completed_with_errors",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub max_records: usize,
    pub purge_policy: PurgePolicy,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::from_config(&FailoverConfig::default())
    }
}

impl ReconcileOptions {
    #[must_use]
    pub fn from_config(config: &FailoverConfig) -> Self {
        Self {
            max_records: config.reconcile_max_records,
            purge_policy: config.purge_policy,
        }
    }
}

/// Cumulative counters across passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub passes: u64,
    pub skipped: u64,
    pub migrated: u64,
    pub failed: u64,
    pub running: bool,
}

pub struct Reconciler {
    primary: Arc<dyn TaskStore>,
    secondary: Arc<dyn TaskStore>,
    probe: Arc<dyn AvailabilityProbe>,
    options: ReconcileOptions,
    running: AtomicBool,
    passes: AtomicU64,
    skipped: AtomicU64,
    migrated: AtomicU64,
    failed: AtomicU64,
}

impl Reconciler {
    pub fn new(
        primary: Arc<dyn TaskStore>,
        secondary: Arc<dyn TaskStore>,
        probe: Arc<dyn AvailabilityProbe>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            primary,
            secondary,
            probe,
            options,
            running: AtomicBool::new(false),
            passes: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            migrated: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    #[must_use]
    pub fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            passes: self.passes.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            migrated: self.migrated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Acquire),
        }
    }

    /// Run one pass. Returns immediately if another pass is in progress.
    #[tracing::instrument(skip(self))]
    pub async fn run_pass(&self) -> ReconcileOutcome {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("Reconciliation already in progress, skipping");
            return self.finish(ReconcileOutcome::Skipped(SkipReason::AlreadyRunning), None);
        }
        let _guard = PassGuard(&self.running);
        let start = Instant::now();

        if !self.probe.is_primary_available().await {
            info!("Primary unavailable, skipping reconciliation");
            return self.finish(ReconcileOutcome::Skipped(SkipReason::PrimaryUnavailable), None);
        }

        let mut records = match self.secondary.find_all().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to read secondary store, nothing migrated");
                return self.finish(ReconcileOutcome::ReadFailed(e), Some(start));
            }
        };

        if records.is_empty() {
            debug!("Secondary store is empty");
            return self.finish(ReconcileOutcome::Completed(ReconcileReport::default()), Some(start));
        }

        let truncated = records.len() > self.options.max_records;
        if truncated {
            warn!(
                available = records.len(),
                max_records = self.options.max_records,
                "Secondary holds more than one pass migrates; the rest waits for the next pass"
            );
            records.truncate(self.options.max_records);
        }

        info!(count = records.len(), "Migrating records from secondary to primary");

        let mut report = ReconcileReport {
            read: records.len(),
            truncated,
            ..Default::default()
        };
        let mut migrated_ids = Vec::with_capacity(records.len());

        for record in &records {
            match self.primary.save(&record.detached()).await {
                Ok(saved) => {
                    debug!(from = ?record.id, to = ?saved.id, "Migrated task");
                    report.migrated += 1;
                    migrated_ids.extend(record.id);
                }
                Err(e) => {
                    warn!(id = ?record.id, title = %record.title, error = %e, "Failed to migrate task");
                    report.failed += 1;
                }
            }
        }

        let purge = match self.options.purge_policy {
            PurgePolicy::All if !truncated => self.secondary.delete_all().await,
            PurgePolicy::All => {
                let read_ids: Vec<i64> = records.iter().filter_map(|r| r.id).collect();
                self.secondary.delete_many(&read_ids).await
            }
            PurgePolicy::MigratedOnly => self.secondary.delete_many(&migrated_ids).await,
        };
        match purge {
            Ok(purged) => report.purged = purged,
            Err(e) => {
                error!(error = %e, "Failed to purge secondary store after migration");
                report.purge_error = Some(e);
            }
        }

        info!(
            read = report.read,
            migrated = report.migrated,
            failed = report.failed,
            purged = report.purged,
            "Reconciliation pass complete"
        );
        crate::metrics::record_reconcile_counts(report.read, report.migrated, report.failed, report.purged);
        self.migrated.fetch_add(report.migrated as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);

        self.finish(ReconcileOutcome::Completed(report), Some(start))
    }

    fn finish(&self, outcome: ReconcileOutcome, started: Option<Instant>) -> ReconcileOutcome {
        match outcome {
            ReconcileOutcome::Skipped(_) => self.skipped.fetch_add(1, Ordering::Relaxed),
            _ => self.passes.fetch_add(1, Ordering::Relaxed),
        };
        if let Some(started) = started {
            crate::metrics::record_reconcile_duration(started.elapsed());
        }
        crate::metrics::record_reconcile_pass(outcome.label());
        outcome
    }
}

/// RAII guard to reset the running flag.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic trigger for [`Reconciler::run_pass`].
///
/// The first pass runs one full interval after start unless `run_on_start`
/// is set. Ticks that fall due while a pass is still running are dropped.
pub struct ReconcileScheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    run_on_start: bool,
}

impl ReconcileScheduler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            run_on_start: false,
        }
    }

    #[must_use]
    pub fn from_config(reconciler: Arc<Reconciler>, config: &FailoverConfig) -> Self {
        Self::new(reconciler, config.reconcile_interval()).run_on_start(config.reconcile_on_start)
    }

    #[must_use]
    pub fn run_on_start(mut self, enabled: bool) -> Self {
        self.run_on_start = enabled;
        self
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Tick until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Interval changes arriving on `config_rx` take effect immediately: the
    /// next pass is rescheduled one new interval from now.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        mut config_rx: watch::Receiver<FailoverConfig>,
    ) {
        if *shutdown.borrow() {
            return;
        }
        info!(interval = ?self.interval, run_on_start = self.run_on_start, "Reconcile scheduler started");

        if self.run_on_start {
            self.reconciler.run_pass().await;
        }

        let mut ticker = Self::ticker(self.interval);
        let mut config_open = true;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                changed = config_rx.changed(), if config_open => {
                    if changed.is_err() {
                        config_open = false;
                        continue;
                    }
                    let interval = config_rx.borrow().reconcile_interval();
                    if interval != self.interval {
                        info!(old = ?self.interval, new = ?interval, "Reconcile interval updated");
                        self.interval = interval;
                        ticker = Self::ticker(interval);
                    }
                }

                _ = ticker.tick() => {
                    self.reconciler.run_pass().await;
                }
            }
        }

        info!("Reconcile scheduler stopped");
    }

    fn ticker(period: Duration) -> tokio::time::Interval {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryTaskStore;
    use crate::task::{TaskPriority, TaskRecord, TaskStatus};
    use async_trait::async_trait;

    struct FixedProbe(AtomicBool);

    impl FixedProbe {
        fn new(available: bool) -> Arc<Self> {
            Arc::new(Self(AtomicBool::new(available)))
        }
    }

    #[async_trait]
    impl AvailabilityProbe for FixedProbe {
        async fn is_primary_available(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Probe that parks until released, to hold a pass open.
    struct GateProbe(tokio::sync::Notify);

    #[async_trait]
    impl AvailabilityProbe for GateProbe {
        async fn is_primary_available(&self) -> bool {
            self.0.notified().await;
            true
        }
    }

    fn task(title: &str) -> TaskRecord {
        TaskRecord::new(title, TaskStatus::Todo, TaskPriority::Low)
    }

    async fn seed(store: &InMemoryTaskStore, titles: &[&str]) {
        for title in titles {
            store.save(&task(title)).await.unwrap();
        }
    }

    fn reconciler(
        primary: &Arc<InMemoryTaskStore>,
        secondary: &Arc<InMemoryTaskStore>,
        probe: Arc<dyn AvailabilityProbe>,
        options: ReconcileOptions,
    ) -> Reconciler {
        Reconciler::new(primary.clone(), secondary.clone(), probe, options)
    }

    #[tokio::test]
    async fn test_pass_migrates_with_fresh_ids_and_purges() {
        let primary = Arc::new(InMemoryTaskStore::with_id_offset("primary", 100));
        let secondary = Arc::new(InMemoryTaskStore::new("secondary"));
        seed(&secondary, &["one", "two"]).await;
        let r = reconciler(&primary, &secondary, FixedProbe::new(true), ReconcileOptions::default());

        let ReconcileOutcome::Completed(report) = r.run_pass().await else {
            panic!("expected completed pass");
        };
        assert_eq!(report.read, 2);
        assert_eq!(report.migrated, 2);
        assert_eq!(report.purged, 2);
        assert!(report.is_clean());
        assert!(secondary.is_empty());

        let ids: Vec<Option<i64>> = primary.records().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![Some(101), Some(102)]);
        assert_eq!(primary.records()[0].title, "one");
    }

    #[tokio::test]
    async fn test_migration_keeps_created_at() {
        let primary = Arc::new(InMemoryTaskStore::new("primary"));
        let secondary = Arc::new(InMemoryTaskStore::new("secondary"));
        let mut old = task("old");
        old.created_at = 1_000;
        secondary.save(&old).await.unwrap();
        let r = reconciler(&primary, &secondary, FixedProbe::new(true), ReconcileOptions::default());

        r.run_pass().await;

        assert_eq!(primary.records()[0].created_at, 1_000);
    }

    #[tokio::test]
    async fn test_unavailable_primary_skips_without_touching_stores() {
        let primary = Arc::new(InMemoryTaskStore::new("primary"));
        let secondary = Arc::new(InMemoryTaskStore::new("secondary"));
        seed(&secondary, &["a", "b", "c"]).await;
        let r = reconciler(&primary, &secondary, FixedProbe::new(false), ReconcileOptions::default());

        assert_eq!(r.run_pass().await, ReconcileOutcome::Skipped(SkipReason::PrimaryUnavailable));
        assert_eq!(secondary.len(), 3);
        assert!(primary.is_empty());
        assert_eq!(r.stats().skipped, 1);
    }

    #[tokio::test]
    async fn test_empty_secondary_is_a_noop_pass() {
        let primary = Arc::new(InMemoryTaskStore::new("primary"));
        let secondary = Arc::new(InMemoryTaskStore::new("secondary"));
        let r = reconciler(&primary, &secondary, FixedProbe::new(true), ReconcileOptions::default());

        assert_eq!(r.run_pass().await, ReconcileOutcome::Completed(ReconcileReport::default()));
        assert!(primary.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_read_only_purges_what_was_read() {
        let primary = Arc::new(InMemoryTaskStore::new("primary"));
        let secondary = Arc::new(InMemoryTaskStore::new("secondary"));
        seed(&secondary, &["a", "b", "c", "d", "e"]).await;
        let options = ReconcileOptions { max_records: 2, purge_policy: PurgePolicy::All };
        let r = reconciler(&primary, &secondary, FixedProbe::new(true), options);

        let ReconcileOutcome::Completed(first) = r.run_pass().await else {
            panic!("expected completed pass");
        };
        assert!(first.truncated);
        assert_eq!(first.purged, 2);
        assert_eq!(primary.len(), 2);
        assert_eq!(secondary.len(), 3);

        r.run_pass().await;
        r.run_pass().await;
        assert_eq!(primary.len(), 5);
        assert!(secondary.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let primary = Arc::new(InMemoryTaskStore::new("primary"));
        let secondary = Arc::new(InMemoryTaskStore::new("secondary"));
        seed(&secondary, &["a"]).await;
        let probe = Arc::new(GateProbe(tokio::sync::Notify::new()));
        let r = Arc::new(reconciler(&primary, &secondary, probe.clone(), ReconcileOptions::default()));

        let first = tokio::spawn({
            let r = r.clone();
            async move { r.run_pass().await }
        });
        while !r.stats().running {
            tokio::task::yield_now().await;
        }

        assert_eq!(r.run_pass().await, ReconcileOutcome::Skipped(SkipReason::AlreadyRunning));

        probe.0.notify_one();
        assert!(matches!(first.await.unwrap(), ReconcileOutcome::Completed(_)));
        assert!(!r.stats().running);
        assert_eq!(primary.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_first_pass_after_one_interval() {
        let primary = Arc::new(InMemoryTaskStore::new("primary"));
        let secondary = Arc::new(InMemoryTaskStore::new("secondary"));
        seed(&secondary, &["a"]).await;
        let r = Arc::new(reconciler(&primary, &secondary, FixedProbe::new(true), ReconcileOptions::default()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_config_tx, config_rx) = watch::channel(FailoverConfig::default());
        let scheduler = ReconcileScheduler::new(r.clone(), Duration::from_secs(60));
        let handle = tokio::spawn(scheduler.run(shutdown_rx, config_rx));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(r.stats().passes, 0);
        assert_eq!(secondary.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(r.stats().passes, 1);
        assert!(secondary.is_empty());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_run_on_start() {
        let primary = Arc::new(InMemoryTaskStore::new("primary"));
        let secondary = Arc::new(InMemoryTaskStore::new("secondary"));
        seed(&secondary, &["a"]).await;
        let r = Arc::new(reconciler(&primary, &secondary, FixedProbe::new(true), ReconcileOptions::default()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_config_tx, config_rx) = watch::channel(FailoverConfig::default());
        let scheduler = ReconcileScheduler::new(r.clone(), Duration::from_secs(3600)).run_on_start(true);
        let handle = tokio::spawn(scheduler.run(shutdown_rx, config_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(r.stats().passes, 1);
        assert_eq!(primary.len(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_picks_up_interval_change() {
        let primary = Arc::new(InMemoryTaskStore::new("primary"));
        let secondary = Arc::new(InMemoryTaskStore::new("secondary"));
        let r = Arc::new(reconciler(&primary, &secondary, FixedProbe::new(true), ReconcileOptions::default()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (config_tx, config_rx) = watch::channel(FailoverConfig::default());
        let handle = tokio::spawn(ReconcileScheduler::new(r.clone(), Duration::from_secs(3600)).run(shutdown_rx, config_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        config_tx
            .send(FailoverConfig { reconcile_interval_secs: 5, ..Default::default() })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(r.stats().passes, 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
