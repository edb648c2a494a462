//! Request metering

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::aggregator::{AggregateTotals, CostAggregator, Reservation};
use crate::domain::usage::{
    CallType, PricingTable, UsageEvent, UsageRepository, micros_to_usd,
};
use crate::domain::{Clock, DomainError};
use crate::infrastructure::budget::BudgetGuard;
use crate::infrastructure::observability::metrics;

/// Records every executed billable call as an immutable usage event
#[derive(Debug)]
pub struct RequestMeter {
    pricing: Arc<PricingTable>,
    aggregator: Arc<CostAggregator>,
    repository: Arc<dyn UsageRepository>,
    clock: Arc<dyn Clock>,
    guard: Option<Arc<BudgetGuard>>,
}

impl RequestMeter {
    pub fn new(
        pricing: Arc<PricingTable>,
        aggregator: Arc<CostAggregator>,
        repository: Arc<dyn UsageRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pricing,
            aggregator,
            repository,
            clock,
            guard: None,
        }
    }

    /// Report threshold crossings to `guard` after each recorded call
    pub fn with_budget_guard(mut self, guard: Arc<BudgetGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Record a call that was made without a reservation
    pub async fn record_usage(
        &self,
        call_type: CallType,
        units: u32,
        search_id: Option<&str>,
    ) -> Result<UsageEvent, DomainError> {
        let event = self.build_event(call_type, units, search_id.map(str::to_string))?;

        let totals = self.aggregator.commit(&event)?;
        self.persist(&event).await;

        self.after_commit(&event, &totals)?;
        Ok(event)
    }

    /// Record a call made under `reservation`, releasing its hold
    ///
    /// The call has already executed, so its cost is committed to the
    /// totals even when the usage log cannot be written.
    pub async fn settle(
        &self,
        reservation: Reservation,
        call_type: CallType,
        units: u32,
    ) -> Result<UsageEvent, DomainError> {
        let event = self.build_event(
            call_type,
            units,
            reservation.search_id().map(str::to_string),
        )?;

        if event.cost_micros > reservation.amount_micros() {
            warn!(
                call_type = %call_type,
                reserved_usd = reservation.amount(),
                cost_usd = event.cost(),
                "Call cost more than its reservation; recording actual cost"
            );
        }

        let totals = self.aggregator.commit_reserved(reservation, &event)?;
        self.persist(&event).await;

        self.after_commit(&event, &totals)?;
        Ok(event)
    }

    fn build_event(
        &self,
        call_type: CallType,
        units: u32,
        search_id: Option<String>,
    ) -> Result<UsageEvent, DomainError> {
        let cost_micros = self.pricing.cost_for(call_type, units)?;
        Ok(UsageEvent::new(
            self.clock.now(),
            call_type,
            units,
            cost_micros,
            search_id,
        ))
    }

    async fn persist(&self, event: &UsageEvent) {
        if let Err(e) = self.repository.append(event).await {
            metrics::record_usage_log_failure(event.call_type.as_str());
            error!(
                event_id = %event.id,
                call_type = %event.call_type,
                cost_usd = event.cost(),
                "Failed to append usage event; totals include it but the log does not: {}",
                e
            );
        }
    }

    fn after_commit(&self, event: &UsageEvent, totals: &AggregateTotals) -> Result<(), DomainError> {
        metrics::record_billable_call(event.call_type.as_str(), event.units, event.cost_micros);

        debug!(
            event_id = %event.id,
            call_type = %event.call_type,
            units = event.units,
            cost_usd = event.cost(),
            search_id = ?event.search_id,
            month_spent_usd = micros_to_usd(totals.month.spent_micros),
            "Recorded usage"
        );

        match &self.guard {
            Some(guard) => guard.observe(totals),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::budget::{BudgetLimits, BudgetPolicy, Denial};
    use crate::domain::clock::mock::ManualClock;
    use crate::domain::usage::{PeriodKind, PricingEntry};
    use crate::infrastructure::budget::ReservationOutcome;
    use crate::infrastructure::usage::InMemoryUsageRepository;

    #[derive(Debug, Default)]
    struct UnwritableRepository;

    #[async_trait::async_trait]
    impl UsageRepository for UnwritableRepository {
        async fn append(&self, _event: &UsageEvent) -> Result<(), DomainError> {
            Err(DomainError::persistence("disk full"))
        }

        async fn list_since(
            &self,
            _since: chrono::DateTime<chrono::Utc>,
        ) -> Result<Vec<UsageEvent>, DomainError> {
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<usize, DomainError> {
            Ok(0)
        }
    }

    struct Fixture {
        aggregator: Arc<CostAggregator>,
        repository: Arc<InMemoryUsageRepository>,
        guard: Arc<BudgetGuard>,
        meter: RequestMeter,
    }

    fn fixture(pricing: PricingTable, policy: BudgetPolicy) -> Fixture {
        let clock = Arc::new(ManualClock::at(2026, 2, 3, 14, 30));
        let pricing = Arc::new(pricing);
        let aggregator = Arc::new(CostAggregator::new(clock.clone()));
        let repository = Arc::new(InMemoryUsageRepository::new());
        let guard = Arc::new(BudgetGuard::new(
            aggregator.clone(),
            pricing.clone(),
            policy,
            clock.clone(),
        ));
        let meter = RequestMeter::new(pricing, aggregator.clone(), repository.clone(), clock)
            .with_budget_guard(guard.clone());

        Fixture {
            aggregator,
            repository,
            guard,
            meter,
        }
    }

    #[tokio::test]
    async fn test_record_usage_prices_and_persists() {
        let f = fixture(PricingTable::default(), BudgetPolicy::new());

        let event = f
            .meter
            .record_usage(CallType::PlaceDetails, 2, Some("s-1"))
            .await
            .unwrap();

        assert_eq!(event.cost_micros, 34_000);
        assert_eq!(event.search_id.as_deref(), Some("s-1"));
        assert_eq!(f.repository.count().await.unwrap(), 1);
        assert_eq!(
            f.aggregator.totals(PeriodKind::Day).unwrap().spent_micros,
            34_000
        );
    }

    #[tokio::test]
    async fn test_unknown_call_type_records_nothing() {
        let pricing = PricingTable::new([PricingEntry::new(CallType::Geocoding, 0.005)]);
        let f = fixture(pricing, BudgetPolicy::new());

        let result = f.meter.record_usage(CallType::PlaceDetails, 1, None).await;

        assert!(matches!(result, Err(DomainError::UnknownCallType { .. })));
        assert_eq!(f.repository.count().await.unwrap(), 0);
        assert_eq!(f.aggregator.totals(PeriodKind::Month).unwrap().spent_micros, 0);
    }

    #[tokio::test]
    async fn test_three_dollar_calls_against_ten_dollar_limit() {
        let pricing = PricingTable::new([PricingEntry::new(CallType::PlacesTextSearch, 3.0)]);
        let policy = BudgetPolicy::new().with_daily(BudgetLimits::new(10.0, 10.0).unwrap());
        let f = fixture(pricing, policy);

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            match f
                .guard
                .reserve_call(CallType::PlacesTextSearch, 1, Some("s-1"))
                .unwrap()
            {
                ReservationOutcome::Allowed(reservation) => {
                    f.meter
                        .settle(reservation, CallType::PlacesTextSearch, 1)
                        .await
                        .unwrap();
                    outcomes.push(true);
                }
                ReservationOutcome::Denied(denial) => {
                    assert!(matches!(
                        denial,
                        Denial::Budget {
                            period_kind: PeriodKind::Day,
                            ..
                        }
                    ));
                    outcomes.push(false);
                }
            }
        }

        assert_eq!(outcomes, vec![true, true, true, false]);
        assert_eq!(
            f.aggregator.totals(PeriodKind::Day).unwrap().spent_micros,
            9_000_000
        );
        assert_eq!(f.repository.count().await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_logged_events_sum_to_period_total() {
        let f = Arc::new(fixture(PricingTable::default(), BudgetPolicy::new()));

        let mut handles = Vec::new();
        for i in 0..40u32 {
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                let call_type = CallType::ALL[(i % 5) as usize];
                f.meter.record_usage(call_type, 1 + i % 3, None).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let logged: i64 = f
            .repository
            .list_since(chrono::DateTime::<chrono::Utc>::MIN_UTC)
            .await
            .unwrap()
            .iter()
            .map(|event| event.cost_micros)
            .sum();

        assert_eq!(
            f.aggregator.totals(PeriodKind::Month).unwrap().spent_micros,
            logged
        );
    }

    #[tokio::test]
    async fn test_unwritable_log_still_counts_executed_calls() {
        let clock = Arc::new(ManualClock::at(2026, 2, 3, 14, 30));
        let pricing = Arc::new(PricingTable::default());
        let aggregator = Arc::new(CostAggregator::new(clock.clone()));
        let policy = BudgetPolicy::new().with_daily(BudgetLimits::new(0.005, 0.005).unwrap());
        let guard = Arc::new(BudgetGuard::new(
            aggregator.clone(),
            pricing.clone(),
            policy,
            clock.clone(),
        ));
        let meter = RequestMeter::new(
            pricing,
            aggregator.clone(),
            Arc::new(UnwritableRepository),
            clock,
        )
        .with_budget_guard(guard.clone());

        let reservation = guard
            .reserve_call(CallType::Geocoding, 1, Some("s-1"))
            .unwrap()
            .into_reservation()
            .unwrap();
        let event = meter.settle(reservation, CallType::Geocoding, 1).await.unwrap();

        assert_eq!(event.cost_micros, 5_000);
        let snapshot = aggregator.snapshot().unwrap();
        assert_eq!(snapshot.day.spent_micros, 5_000);
        assert_eq!(snapshot.reserved_micros, 0);
        assert!(
            !guard
                .reserve_call(CallType::Geocoding, 1, Some("s-1"))
                .unwrap()
                .is_allowed()
        );
    }
}
