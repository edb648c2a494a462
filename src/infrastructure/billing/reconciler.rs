//! Periodic billing reconciliation

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::billing::{
    BillingDiscrepancy, BillingPeriod, BillingProvider, BillingSnapshot, BillingStatus,
    BillingTotals, Freshness, RetryPolicy, free_tier_remaining,
};
use crate::domain::usage::{PeriodKind, micros_to_usd};
use crate::domain::{Clock, DomainError};
use crate::infrastructure::observability::metrics;
use crate::infrastructure::usage::{AggregateTotals, CostAggregator};

/// Reconciler tuning
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub account_id: String,
    pub refresh_interval: Duration,
    pub retry: RetryPolicy,
    pub free_tier_micros: i64,
    /// Divergence between actual and estimate that gets surfaced
    pub divergence_threshold_micros: i64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            refresh_interval: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            free_tier_micros: 200_000_000,
            divergence_threshold_micros: 1_000_000,
        }
    }
}

/// Keeps the billing snapshot current without touching metered totals
///
/// The latest snapshot is published on a watch channel; readers never wait
/// on a refresh.
pub struct BillingReconciler {
    provider: Arc<dyn BillingProvider>,
    aggregator: Arc<CostAggregator>,
    clock: Arc<dyn Clock>,
    settings: ReconcilerSettings,
    has_actual: AtomicBool,
    sender: watch::Sender<BillingSnapshot>,
}

impl BillingReconciler {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        aggregator: Arc<CostAggregator>,
        clock: Arc<dyn Clock>,
        settings: ReconcilerSettings,
    ) -> Self {
        let (sender, _) = watch::channel(BillingSnapshot::initial(settings.free_tier_micros));

        Self {
            provider,
            aggregator,
            clock,
            settings,
            has_actual: AtomicBool::new(false),
            sender,
        }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<BillingSnapshot> {
        self.sender.subscribe()
    }

    /// Last published snapshot
    pub fn latest(&self) -> BillingSnapshot {
        self.sender.borrow().clone()
    }

    /// Fetch billing once and publish the outcome
    ///
    /// On failure the previous figures keep being served, flagged `stale`
    /// if an actual snapshot was ever fetched and `estimated` otherwise.
    pub async fn refresh(&self) -> Result<BillingSnapshot, DomainError> {
        let now = self.clock.now();
        let period = BillingPeriod {
            month_key: PeriodKind::Month.key_for(now),
            day_key: PeriodKind::Day.key_for(now),
        };

        let fetched = self
            .provider
            .fetch_billing(&self.settings.account_id, &period)
            .await;
        let estimate = self.aggregator.snapshot()?;

        match fetched {
            Ok(totals) => {
                let snapshot = self.snapshot_from(totals, &estimate, now);
                self.sender.send_replace(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                metrics::record_billing_refresh("failed");
                warn!(account_id = %self.settings.account_id, "Billing refresh failed: {}", e);

                let fallback = self.fallback_snapshot(&estimate);
                self.sender.send_replace(fallback);
                Err(e)
            }
        }
    }

    fn snapshot_from(
        &self,
        totals: BillingTotals,
        estimate: &AggregateTotals,
        now: DateTime<Utc>,
    ) -> BillingSnapshot {
        let authoritative = self.provider.is_authoritative();
        let free_tier = totals.free_tier_remaining_micros.unwrap_or_else(|| {
            free_tier_remaining(self.settings.free_tier_micros, totals.monthly_total_micros)
        });

        let (freshness, status, discrepancy) = if authoritative {
            self.has_actual.store(true, Ordering::SeqCst);
            metrics::record_billing_refresh("actual");
            (
                Freshness::Actual,
                BillingStatus::Active,
                self.detect_discrepancy(&totals, estimate, now),
            )
        } else {
            metrics::record_billing_refresh("estimated");
            (Freshness::Estimated, BillingStatus::NotConfigured, None)
        };

        debug!(
            monthly_usd = micros_to_usd(totals.monthly_total_micros),
            daily_usd = micros_to_usd(totals.daily_total_micros),
            freshness = ?freshness,
            "Billing snapshot refreshed"
        );

        BillingSnapshot {
            monthly_total_micros: totals.monthly_total_micros,
            daily_total_micros: totals.daily_total_micros,
            free_tier_remaining_micros: free_tier,
            breakdown: totals.breakdown,
            fetched_at: Some(now),
            freshness,
            status,
            discrepancy,
        }
    }

    fn fallback_snapshot(&self, estimate: &AggregateTotals) -> BillingSnapshot {
        let previous = self.latest();

        if self.has_actual.load(Ordering::SeqCst) {
            return BillingSnapshot {
                freshness: Freshness::Stale,
                status: BillingStatus::Error,
                ..previous
            };
        }

        BillingSnapshot {
            monthly_total_micros: estimate.month.spent_micros,
            daily_total_micros: estimate.day.spent_micros,
            free_tier_remaining_micros: free_tier_remaining(
                self.settings.free_tier_micros,
                estimate.month.spent_micros,
            ),
            freshness: Freshness::Estimated,
            status: BillingStatus::Error,
            discrepancy: None,
            ..previous
        }
    }

    fn detect_discrepancy(
        &self,
        actual: &BillingTotals,
        estimate: &AggregateTotals,
        now: DateTime<Utc>,
    ) -> Option<BillingDiscrepancy> {
        let threshold = self.settings.divergence_threshold_micros;
        let monthly_gap = (actual.monthly_total_micros - estimate.month.spent_micros).abs();
        let daily_gap = (actual.daily_total_micros - estimate.day.spent_micros).abs();

        if monthly_gap <= threshold && daily_gap <= threshold {
            return None;
        }

        let discrepancy = BillingDiscrepancy {
            monthly_estimate_micros: estimate.month.spent_micros,
            monthly_actual_micros: actual.monthly_total_micros,
            daily_estimate_micros: estimate.day.spent_micros,
            daily_actual_micros: actual.daily_total_micros,
            detected_at: now,
        };

        warn!(
            monthly_actual_usd = micros_to_usd(actual.monthly_total_micros),
            monthly_estimate_usd = micros_to_usd(estimate.month.spent_micros),
            monthly_delta_usd = discrepancy.monthly_delta(),
            daily_delta_usd = discrepancy.daily_delta(),
            "Billed spend diverges from metered estimate"
        );

        Some(discrepancy)
    }

    /// Refresh on the configured interval until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.refresh_interval.as_secs(),
            "Billing reconciler started"
        );

        let mut failures: u32 = 0;
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.refresh() => outcome,
            };

            let delay = match outcome {
                Ok(_) => {
                    failures = 0;
                    self.settings.refresh_interval
                }
                Err(_) => {
                    let delay = self.settings.retry.delay_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    debug!(failures, retry_in_ms = delay.as_millis() as u64, "Retrying billing refresh");
                    delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Billing reconciler stopped");
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(cancel))
    }
}

impl fmt::Debug for BillingReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BillingReconciler")
            .field("settings", &self.settings)
            .field("has_actual", &self.has_actual)
            .finish_non_exhaustive()
    }
}
