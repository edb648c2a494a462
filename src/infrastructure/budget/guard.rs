//! Pre-call budget enforcement

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::domain::budget::{
    BudgetNotification, BudgetPolicy, BudgetState, Denial, NotificationKind, PeriodBudgetStatus,
};
use crate::domain::usage::{CallType, PeriodKind, PeriodTotal, PricingTable, micros_to_usd};
use crate::domain::{Clock, DomainError};
use crate::infrastructure::observability::metrics;
use crate::infrastructure::usage::{AggregateTotals, CostAggregator, Reservation};

const NOTIFICATION_BUFFER: usize = 64;

/// Result of asking the guard for permission to spend
#[derive(Debug)]
pub enum ReservationOutcome {
    Allowed(Reservation),
    Denied(Denial),
}

impl ReservationOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    pub fn into_reservation(self) -> Option<Reservation> {
        match self {
            Self::Allowed(reservation) => Some(reservation),
            Self::Denied(_) => None,
        }
    }
}

type RaisedKey = (NotificationKind, PeriodKind, String);

/// Enforces soft and hard spend ceilings before paid calls are made
#[derive(Debug)]
pub struct BudgetGuard {
    aggregator: Arc<CostAggregator>,
    pricing: Arc<PricingTable>,
    policy: BudgetPolicy,
    clock: Arc<dyn Clock>,
    raised: Mutex<HashSet<RaisedKey>>,
    notifications: broadcast::Sender<BudgetNotification>,
}

impl BudgetGuard {
    pub fn new(
        aggregator: Arc<CostAggregator>,
        pricing: Arc<PricingTable>,
        policy: BudgetPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);

        Self {
            aggregator,
            pricing,
            policy,
            clock,
            raised: Mutex::new(HashSet::new()),
            notifications,
        }
    }

    pub fn policy(&self) -> &BudgetPolicy {
        &self.policy
    }

    /// Receive soft-limit, hard-limit and denial notifications
    pub fn subscribe(&self) -> broadcast::Receiver<BudgetNotification> {
        self.notifications.subscribe()
    }

    /// Hold `estimated_cost_micros` if it fits under every hard limit
    pub fn reserve(&self, estimated_cost_micros: i64) -> Result<ReservationOutcome, DomainError> {
        self.reserve_for(estimated_cost_micros, 1, None)
    }

    /// Like [`reserve`](Self::reserve), also counting `calls` against the search ceiling
    pub fn reserve_for_search(
        &self,
        estimated_cost_micros: i64,
        calls: u32,
        search_id: &str,
    ) -> Result<ReservationOutcome, DomainError> {
        self.reserve_for(estimated_cost_micros, calls, Some(search_id))
    }

    /// Reserve the priced cost of `units` calls of `call_type`
    pub fn reserve_call(
        &self,
        call_type: CallType,
        units: u32,
        search_id: Option<&str>,
    ) -> Result<ReservationOutcome, DomainError> {
        let estimate = self.pricing.cost_for(call_type, units)?;
        self.reserve_for(estimate, units, search_id)
    }

    fn reserve_for(
        &self,
        amount_micros: i64,
        calls: u32,
        search_id: Option<&str>,
    ) -> Result<ReservationOutcome, DomainError> {
        if amount_micros < 0 {
            return Err(DomainError::validation(
                "Reservation amount cannot be negative",
            ));
        }

        let policy = &self.policy;
        let result = self
            .aggregator
            .try_reserve(amount_micros, calls, search_id, |exposure| {
                for kind in PeriodKind::ALL {
                    let Some(limits) = policy.limits_for(kind) else {
                        continue;
                    };

                    let state = limits.state_for(exposure.total(kind).spent_micros);
                    let projected = exposure.committed_micros(kind) + amount_micros;

                    if state == BudgetState::Blocked || projected > limits.hard_limit_micros {
                        return Some(Denial::Budget {
                            period_kind: kind,
                            state,
                        });
                    }
                }

                match search_id {
                    Some(id)
                        if policy.max_calls_per_search > 0
                            && exposure.search_calls + u64::from(calls)
                                > u64::from(policy.max_calls_per_search) =>
                    {
                        Some(Denial::SearchCap {
                            search_id: id.to_string(),
                            limit: policy.max_calls_per_search,
                        })
                    }
                    _ => None,
                }
            })?;

        match result {
            Ok(reservation) => Ok(ReservationOutcome::Allowed(reservation)),
            Err(denial) => {
                self.on_denied(&denial)?;
                Ok(ReservationOutcome::Denied(denial))
            }
        }
    }

    fn on_denied(&self, denial: &Denial) -> Result<(), DomainError> {
        match denial {
            Denial::Budget { period_kind, state } => {
                metrics::record_budget_denial(period_kind.as_str());
                debug!(period = %period_kind, state = %state, "Reservation denied by budget");

                if let Some(limits) = self.policy.limits_for(*period_kind) {
                    let total = self.aggregator.totals(*period_kind)?;
                    self.raise(
                        NotificationKind::ReservationDenied,
                        &total,
                        *state,
                        limits.hard_limit_micros,
                    )?;
                }
            }
            Denial::SearchCap { search_id, limit } => {
                metrics::record_budget_denial("search");
                info!(search_id = %search_id, limit, "Search reached its call limit");
            }
        }

        Ok(())
    }

    /// Raise threshold notifications for the given totals
    pub fn observe(&self, totals: &AggregateTotals) -> Result<(), DomainError> {
        for kind in PeriodKind::ALL {
            let Some(limits) = self.policy.limits_for(kind) else {
                continue;
            };

            let total = totals.get(kind);
            let state = limits.state_for(total.spent_micros);
            metrics::record_period_spend(kind.as_str(), total.spent());

            if state >= BudgetState::Warning {
                self.raise(
                    NotificationKind::SoftLimitReached,
                    total,
                    state,
                    limits.soft_limit_micros,
                )?;
            }

            if state == BudgetState::Blocked {
                self.raise(
                    NotificationKind::HardLimitReached,
                    total,
                    state,
                    limits.hard_limit_micros,
                )?;
            }
        }

        Ok(())
    }

    /// Re-evaluate thresholds against current totals, e.g. after a restart
    pub fn check_thresholds(&self) -> Result<(), DomainError> {
        let totals = self.aggregator.snapshot()?;
        self.observe(&totals)
    }

    fn raise(
        &self,
        kind: NotificationKind,
        total: &PeriodTotal,
        state: BudgetState,
        limit_micros: i64,
    ) -> Result<(), DomainError> {
        {
            let mut raised = self
                .raised
                .lock()
                .map_err(|e| DomainError::lock_poisoned("notification", e))?;

            raised.retain(|(_, period_kind, key)| {
                *period_kind != total.period_kind || *key == total.period_key
            });

            if !raised.insert((kind, total.period_kind, total.period_key.clone())) {
                return Ok(());
            }
        }

        let notification = BudgetNotification {
            kind,
            period_kind: total.period_kind,
            period_key: total.period_key.clone(),
            state,
            spent_micros: total.spent_micros,
            limit_micros,
            raised_at: self.clock.now(),
        };

        match kind {
            NotificationKind::HardLimitReached => error!(
                period = %total.period_kind,
                period_key = %total.period_key,
                spent_usd = total.spent(),
                limit_usd = micros_to_usd(limit_micros),
                "Hard spend limit reached; paid calls are blocked"
            ),
            NotificationKind::SoftLimitReached => warn!(
                period = %total.period_kind,
                period_key = %total.period_key,
                spent_usd = total.spent(),
                limit_usd = micros_to_usd(limit_micros),
                "Soft spend limit reached"
            ),
            NotificationKind::ReservationDenied => warn!(
                period = %total.period_kind,
                period_key = %total.period_key,
                spent_usd = total.spent(),
                limit_usd = micros_to_usd(limit_micros),
                "Paid calls are being denied for this period"
            ),
        }

        // No subscribers is fine; the log line above is the record.
        let _ = self.notifications.send(notification);

        Ok(())
    }

    /// Current state of a period kind; unconfigured kinds are always `Ok`
    pub fn state(&self, kind: PeriodKind) -> Result<BudgetState, DomainError> {
        match self.policy.limits_for(kind) {
            Some(limits) => Ok(limits.state_for(self.aggregator.totals(kind)?.spent_micros)),
            None => Ok(BudgetState::Ok),
        }
    }

    /// Budget position of every configured period
    pub fn statuses(&self) -> Result<Vec<PeriodBudgetStatus>, DomainError> {
        let totals = self.aggregator.snapshot()?;

        Ok(PeriodKind::ALL
            .into_iter()
            .filter_map(|kind| {
                self.policy.limits_for(kind).map(|limits| {
                    let total = totals.get(kind);
                    PeriodBudgetStatus {
                        period_kind: kind,
                        period_key: total.period_key.clone(),
                        state: limits.state_for(total.spent_micros),
                        spent: total.spent(),
                        soft_limit: limits.soft_limit(),
                        hard_limit: limits.hard_limit(),
                    }
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::budget::BudgetLimits;
    use crate::domain::clock::mock::ManualClock;
    use crate::domain::usage::{PricingEntry, UsageEvent};

    struct Fixture {
        clock: Arc<ManualClock>,
        aggregator: Arc<CostAggregator>,
        guard: BudgetGuard,
    }

    fn fixture(policy: BudgetPolicy) -> Fixture {
        let clock = Arc::new(ManualClock::at(2026, 6, 15, 9, 0));
        let aggregator = Arc::new(CostAggregator::new(clock.clone()));
        let pricing = Arc::new(PricingTable::new([PricingEntry::new(
            CallType::PlaceDetails,
            3.0,
        )]));
        let guard = BudgetGuard::new(aggregator.clone(), pricing, policy, clock.clone());

        Fixture {
            clock,
            aggregator,
            guard,
        }
    }

    fn monthly(soft: f64, hard: f64) -> BudgetPolicy {
        BudgetPolicy::new().with_monthly(BudgetLimits::new(soft, hard).unwrap())
    }

    fn spend(f: &Fixture, reservation: Reservation) {
        let event = UsageEvent::new(
            f.clock.now(),
            CallType::PlaceDetails,
            1,
            reservation.amount_micros(),
            reservation.search_id().map(str::to_string),
        );
        let totals = f.aggregator.commit_reserved(reservation, &event).unwrap();
        f.guard.observe(&totals).unwrap();
    }

    #[test]
    fn test_fourth_call_denied_under_hard_limit_of_ten() {
        let f = fixture(monthly(8.0, 10.0));

        for _ in 0..3 {
            let outcome = f.guard.reserve(3_000_000).unwrap();
            spend(&f, outcome.into_reservation().unwrap());
        }
        assert_eq!(
            f.aggregator.totals(PeriodKind::Month).unwrap().spent_micros,
            9_000_000
        );

        let fourth = f.guard.reserve(3_000_000).unwrap();
        match fourth {
            ReservationOutcome::Denied(Denial::Budget { period_kind, state }) => {
                assert_eq!(period_kind, PeriodKind::Month);
                assert_eq!(state, BudgetState::Warning);
            }
            other => panic!("expected budget denial, got {:?}", other),
        }
        assert_eq!(
            f.aggregator.totals(PeriodKind::Month).unwrap().spent_micros,
            9_000_000
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_overshoot() {
        let f = Arc::new(fixture(monthly(5.0, 10.0)));

        let mut handles = Vec::new();
        for _ in 0..25 {
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                f.guard.reserve(1_000_000).unwrap().into_reservation()
            }));
        }

        let mut held = Vec::new();
        for handle in handles {
            if let Some(reservation) = handle.await.unwrap() {
                held.push(reservation);
            }
        }

        assert_eq!(held.len(), 10);
        assert_eq!(f.aggregator.snapshot().unwrap().reserved_micros, 10_000_000);
    }

    #[test]
    fn test_reserve_call_prices_through_table() {
        let f = fixture(monthly(5.0, 10.0));

        let reservation = f
            .guard
            .reserve_call(CallType::PlaceDetails, 2, None)
            .unwrap()
            .into_reservation()
            .unwrap();
        assert_eq!(reservation.amount_micros(), 6_000_000);

        let unknown = f.guard.reserve_call(CallType::Geocoding, 1, None);
        assert!(matches!(unknown, Err(DomainError::UnknownCallType { .. })));
    }

    #[test]
    fn test_hard_limit_notification_raised_once() {
        let f = fixture(monthly(5.0, 6.0));
        let mut notifications = f.guard.subscribe();

        for _ in 0..2 {
            let reservation = f.guard.reserve(3_000_000).unwrap().into_reservation().unwrap();
            spend(&f, reservation);
        }
        assert_eq!(f.guard.state(PeriodKind::Month).unwrap(), BudgetState::Blocked);

        // Further denials and re-evaluation stay quiet
        for _ in 0..3 {
            assert!(!f.guard.reserve(1).unwrap().is_allowed());
            f.guard.check_thresholds().unwrap();
        }

        let mut kinds = Vec::new();
        while let Ok(notification) = notifications.try_recv() {
            kinds.push(notification.kind);
        }

        assert_eq!(
            kinds,
            vec![
                NotificationKind::SoftLimitReached,
                NotificationKind::HardLimitReached,
                NotificationKind::ReservationDenied,
            ]
        );
    }

    #[test]
    fn test_notifications_rearm_next_period() {
        let policy = BudgetPolicy::new().with_daily(BudgetLimits::new(2.0, 3.0).unwrap());
        let f = fixture(policy);
        let mut notifications = f.guard.subscribe();

        let reservation = f.guard.reserve(3_000_000).unwrap().into_reservation().unwrap();
        spend(&f, reservation);

        f.clock.advance(chrono::Duration::days(1));
        assert_eq!(f.guard.state(PeriodKind::Day).unwrap(), BudgetState::Ok);

        let reservation = f.guard.reserve(3_000_000).unwrap().into_reservation().unwrap();
        spend(&f, reservation);

        let mut hard = 0;
        while let Ok(notification) = notifications.try_recv() {
            if notification.kind == NotificationKind::HardLimitReached {
                hard += 1;
            }
        }
        assert_eq!(hard, 2);
    }

    #[test]
    fn test_search_call_ceiling() {
        let f = fixture(monthly(50.0, 100.0).with_max_calls_per_search(2));

        let first = f.guard.reserve_for_search(1, 1, "s-1").unwrap();
        let second = f.guard.reserve_for_search(1, 1, "s-1").unwrap();
        let third = f.guard.reserve_for_search(1, 1, "s-1").unwrap();
        let other_search = f.guard.reserve_for_search(1, 1, "s-2").unwrap();

        assert!(first.is_allowed());
        assert!(second.is_allowed());
        assert!(matches!(
            third,
            ReservationOutcome::Denied(Denial::SearchCap { limit: 2, .. })
        ));
        assert!(other_search.is_allowed());
    }

    #[test]
    fn test_unconfigured_period_never_denies() {
        let f = fixture(BudgetPolicy::new());

        let outcome = f.guard.reserve(1_000_000_000).unwrap();
        assert!(outcome.is_allowed());
        assert_eq!(f.guard.state(PeriodKind::Day).unwrap(), BudgetState::Ok);
        assert!(f.guard.statuses().unwrap().is_empty());
    }

    #[test]
    fn test_negative_reservation_rejected() {
        let f = fixture(BudgetPolicy::new());
        assert!(matches!(
            f.guard.reserve(-1),
            Err(DomainError::Validation { .. })
        ));
    }
}
