// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic task-failover usage example.
//!
//! Demonstrates:
//! 1. Starting the engine with a primary that is not reachable yet
//! 2. Creating tasks (they land in the secondary)
//! 3. Bringing the primary online and running a reconciliation pass
//! 4. Normal workflows against the primary
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! Both stores are SQLite files in a temp dir, so nothing external is needed.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use task_failover::{
    EngineState, FailoverConfig, FailoverEngine, ReconcileOutcome, TaskPriority, TaskRequest, TaskStatus,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures all metrics for display)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           task-failover: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the engine
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    // The primary's directory doesn't exist yet: SQLite can't open it
    let primary_dir = dir.path().join("primary");

    let config = FailoverConfig {
        primary_url: Some(format!("sqlite://{}?mode=rwc", primary_dir.join("tasks.db").display())),
        secondary_url: Some(format!("sqlite://{}?mode=rwc", dir.path().join("secondary.db").display())),
        store_timeout_ms: 2_000,
        probe_timeout_ms: 1_000,
        ..Default::default()
    };

    let (_config_tx, config_rx) = watch::channel(config.clone());
    let mut engine = FailoverEngine::new(config, config_rx);
    println!("   State: {:?}", engine.state());

    println!("\n🚀 Starting engine (primary offline)...");
    engine.start().await?;
    assert_eq!(engine.state(), EngineState::Ready);
    println!("   ✅ Engine ready! Degraded: {}", engine.health_check().await.is_degraded());

    let tasks = engine.service().ok_or("engine not started")?;

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Write during the outage
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Creating tasks while the primary is down...");
    for (title, priority) in [
        ("Implement authentication", TaskPriority::High),
        ("Write release notes", TaskPriority::Low),
        ("Review schema migration", TaskPriority::Medium),
    ] {
        let task = tasks.create_task(TaskRequest::new(title, TaskStatus::Todo, priority)).await?;
        println!("   └─ #{:?} {} ({})", task.id, task.title, task.priority);
    }
    println!("   Listed: {} tasks", tasks.get_tasks().await?.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Primary comes back: reconcile
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔌 Bringing the primary online...");
    std::fs::create_dir_all(&primary_dir)?;

    let reconciler = engine.reconciler().ok_or("engine not started")?;
    match reconciler.run_pass().await {
        ReconcileOutcome::Completed(report) => println!(
            "   ✅ Reconciled: read={} migrated={} failed={} purged={}",
            report.read, report.migrated, report.failed, report.purged
        ),
        other => println!("   ⚠️  Pass did not complete: {:?}", other),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Normal operation
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Tasks after reconciliation (new primary ids):");
    let listed = tasks.get_tasks().await?;
    for task in &listed {
        println!("   └─ #{:?} {} [{}]", task.id, task.title, task.status);
    }

    if let Some(first) = listed.first().and_then(|t| t.id) {
        let done = tasks.update_status(first, TaskStatus::Done).await?;
        println!("\n✏️  Marked #{} as {}", first, done.status);
    }
    if let Some(last) = listed.last().and_then(|t| t.id) {
        tasks.delete_task(last).await?;
        println!("🗑️  Deleted #{}", last);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    let health = engine.health_check().await;
    println!("\n📊 Health:");
    println!("   └─ Primary available: {}", health.primary_available);
    println!(
        "   └─ Gateway calls: {} (fallbacks: {}, both failed: {})",
        health.gateway.calls, health.gateway.fallbacks, health.gateway.both_failed
    );
    println!(
        "   └─ Reconcile passes: {} (migrated total: {})",
        health.reconcile.passes, health.reconcile.migrated
    );

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.shutdown().await;
    println!("   ✅ Shutdown complete! State: {:?}", engine.state());

    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

            let rendered = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => {
                    let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                    format!("count={} sum={:.4}s", samples.len(), sum)
                }
            };
            format!("{}{} = {}", key.name(), label_str, rendered)
        })
        .collect();

    lines.sort();
    for line in lines {
        println!("   └─ {}", line);
    }
}
