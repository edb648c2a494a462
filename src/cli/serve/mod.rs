//! Serve command - runs reconciliation and cache checkpoints until stopped

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::observability::init_metrics;
use crate::infrastructure::services::DashboardSummary;

/// Run the metering runtime's background tasks
pub async fn run() -> anyhow::Result<()> {
    let config = super::bootstrap()?;

    if init_metrics(&config.metrics) {
        info!("Prometheus exporter listening on {}", config.metrics.listen_addr);
    }

    let runtime = crate::create_runtime(&config).await?;
    let cancel = install_signal_handler();

    let reconciler_task = runtime.reconciler.spawn(cancel.child_token());
    let checkpoint_task = runtime.snapshot_store.clone().map(|store| {
        store.spawn_checkpoints(
            runtime.cache.clone(),
            runtime.clock.clone(),
            Duration::from_secs(config.cache.checkpoint_interval_secs),
            cancel.child_token(),
        )
    });

    let mut snapshots = runtime.reconciler.subscribe();
    let mut notifications = runtime.guard.subscribe();
    info!(
        refresh_interval_secs = config.billing.refresh_interval_secs,
        "Metering runtime started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                log_summary(&runtime.dashboard.summarize(&snapshot));
            }
            notification = notifications.recv() => match notification {
                Ok(notification) => {
                    debug!(kind = ?notification.kind, period = %notification.period_key, "Budget notification");
                    log_summary(&runtime.dashboard.summary());
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dropped budget notifications");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    reconciler_task.await?;
    if let Some(task) = checkpoint_task {
        task.await?;
    }

    info!("Shutdown complete");
    Ok(())
}

fn log_summary(summary: &DashboardSummary) {
    info!(
        monthly_spend = summary.monthly_spend,
        daily_spend = summary.daily_spend,
        monthly_estimate = summary.monthly_estimate,
        call_count = summary.call_count,
        free_tier_remaining = summary.free_tier_remaining,
        freshness = ?summary.freshness,
        status = ?summary.status,
        "Dashboard"
    );

    if let Some(discrepancy) = &summary.discrepancy {
        warn!(
            monthly_delta = discrepancy.monthly_delta(),
            daily_delta = discrepancy.daily_delta(),
            "Billed spend diverges from metered estimate"
        );
    }
}

/// Cancel the returned token on SIGINT or SIGTERM
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received SIGINT, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down");
        }

        trigger.cancel();
    });

    token
}
