//! Running spend totals per day and month

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::budget::Denial;
use crate::domain::usage::{
    CallType, PeriodKind, PeriodTotal, SearchTotal, UsageEvent, micros_to_usd,
};
use crate::domain::{Clock, DomainError};

/// Day and month totals read under one lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateTotals {
    pub day: PeriodTotal,
    pub month: PeriodTotal,
    /// Held by outstanding reservations, not yet spent
    pub reserved_micros: i64,
}

impl AggregateTotals {
    pub fn get(&self, kind: PeriodKind) -> &PeriodTotal {
        match kind {
            PeriodKind::Day => &self.day,
            PeriodKind::Month => &self.month,
        }
    }
}

/// What a reservation check sees, taken inside the aggregator's lock
#[derive(Debug)]
pub struct Exposure<'a> {
    pub day: &'a PeriodTotal,
    pub month: &'a PeriodTotal,
    pub reserved_micros: i64,
    /// Calls already made plus calls held for the search being reserved for
    pub search_calls: u64,
}

impl Exposure<'_> {
    pub fn total(&self, kind: PeriodKind) -> &PeriodTotal {
        match kind {
            PeriodKind::Day => self.day,
            PeriodKind::Month => self.month,
        }
    }

    /// Spent plus held amounts for the period
    pub fn committed_micros(&self, kind: PeriodKind) -> i64 {
        self.total(kind).spent_micros + self.reserved_micros
    }
}

#[derive(Debug, Default)]
struct SearchLedger {
    total: SearchTotal,
    reserved_calls: u64,
}

#[derive(Debug)]
struct AggregatorState {
    day: PeriodTotal,
    month: PeriodTotal,
    reserved_micros: i64,
    breakdown: BTreeMap<CallType, i64>,
    call_counts: BTreeMap<CallType, u64>,
    searches: HashMap<String, SearchLedger>,
}

impl AggregatorState {
    fn new(now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            day: PeriodTotal::empty(PeriodKind::Day, now),
            month: PeriodTotal::empty(PeriodKind::Month, now),
            reserved_micros: 0,
            breakdown: BTreeMap::new(),
            call_counts: BTreeMap::new(),
            searches: HashMap::new(),
        }
    }

    /// Lazy rollover: totals reset on the first access after a boundary
    fn roll(&mut self, now: chrono::DateTime<chrono::Utc>) {
        let day_key = PeriodKind::Day.key_for(now);
        if self.day.period_key != day_key {
            info!(
                previous = %self.day.period_key,
                current = %day_key,
                spent_usd = self.day.spent(),
                "Day period rolled over"
            );
            self.day = PeriodTotal::empty(PeriodKind::Day, now);
        }

        let month_key = PeriodKind::Month.key_for(now);
        if self.month.period_key != month_key {
            info!(
                previous = %self.month.period_key,
                current = %month_key,
                spent_usd = self.month.spent(),
                "Month period rolled over"
            );
            self.month = PeriodTotal::empty(PeriodKind::Month, now);
            self.breakdown.clear();
            self.call_counts.clear();
            self.searches.retain(|_, ledger| ledger.reserved_calls > 0);
        }
    }

    fn apply(&mut self, event: &UsageEvent) {
        let mut counted = false;

        if self.day.covers(event) {
            self.day.add(event);
            counted = true;
        }

        if self.month.covers(event) {
            self.month.add(event);
            *self.breakdown.entry(event.call_type).or_insert(0) += event.cost_micros;
            *self.call_counts.entry(event.call_type).or_insert(0) += u64::from(event.units);
            counted = true;
        }

        if let Some(search_id) = &event.search_id {
            let ledger = self.searches.entry(search_id.clone()).or_default();
            ledger.total.spent_micros += event.cost_micros;
            ledger.total.call_count += u64::from(event.units);
        }

        if !counted {
            warn!(
                event_id = %event.id,
                timestamp = %event.timestamp,
                "Usage event falls outside the current periods"
            );
        }
    }

    fn release(&mut self, amount_micros: i64, calls: u32, search_id: Option<&str>) {
        self.reserved_micros = (self.reserved_micros - amount_micros).max(0);

        if let Some(ledger) = search_id.and_then(|id| self.searches.get_mut(id)) {
            ledger.reserved_calls = ledger.reserved_calls.saturating_sub(u64::from(calls));
        }
    }

    fn totals(&self) -> AggregateTotals {
        AggregateTotals {
            day: self.day.clone(),
            month: self.month.clone(),
            reserved_micros: self.reserved_micros,
        }
    }
}

/// Single aggregation path for spend
///
/// Every total change happens under one lock, so the sum of committed event
/// costs in a period always equals that period's total.
#[derive(Debug)]
pub struct CostAggregator {
    clock: Arc<dyn Clock>,
    state: Mutex<AggregatorState>,
}

impl CostAggregator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let state = AggregatorState::new(clock.now());
        Self {
            clock,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, AggregatorState>, DomainError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| DomainError::lock_poisoned("aggregator", e))?;
        state.roll(self.clock.now());
        Ok(state)
    }

    /// Latest committed total for a period kind
    pub fn totals(&self, kind: PeriodKind) -> Result<PeriodTotal, DomainError> {
        Ok(self.snapshot()?.get(kind).clone())
    }

    pub fn snapshot(&self) -> Result<AggregateTotals, DomainError> {
        Ok(self.lock()?.totals())
    }

    /// Month spend per call type
    pub fn breakdown(&self) -> Result<BTreeMap<CallType, i64>, DomainError> {
        Ok(self.lock()?.breakdown.clone())
    }

    /// Month-to-date billable units per call type
    pub fn call_counts(&self) -> Result<BTreeMap<CallType, u64>, DomainError> {
        Ok(self.lock()?.call_counts.clone())
    }

    pub fn search_total(&self, search_id: &str) -> Result<Option<SearchTotal>, DomainError> {
        Ok(self
            .lock()?
            .searches
            .get(search_id)
            .map(|ledger| ledger.total.clone()))
    }

    /// Forget a finished search and return what it spent
    pub fn end_search(&self, search_id: &str) -> Result<Option<SearchTotal>, DomainError> {
        let mut state = self.lock()?;

        match state.searches.get(search_id) {
            Some(ledger) if ledger.reserved_calls > 0 => Ok(Some(ledger.total.clone())),
            Some(_) => Ok(state.searches.remove(search_id).map(|ledger| ledger.total)),
            None => Ok(None),
        }
    }

    /// Check and hold `amount_micros` in one step
    ///
    /// `check` runs inside the lock and returns a denial to refuse the hold.
    pub fn try_reserve<F>(
        self: &Arc<Self>,
        amount_micros: i64,
        calls: u32,
        search_id: Option<&str>,
        check: F,
    ) -> Result<Result<Reservation, Denial>, DomainError>
    where
        F: FnOnce(&Exposure<'_>) -> Option<Denial>,
    {
        let mut state = self.lock()?;

        let search_calls = search_id
            .and_then(|id| state.searches.get(id))
            .map(|ledger| ledger.total.call_count + ledger.reserved_calls)
            .unwrap_or(0);

        let exposure = Exposure {
            day: &state.day,
            month: &state.month,
            reserved_micros: state.reserved_micros,
            search_calls,
        };

        if let Some(denial) = check(&exposure) {
            return Ok(Err(denial));
        }

        state.reserved_micros += amount_micros;
        if let Some(id) = search_id {
            state.searches.entry(id.to_string()).or_default().reserved_calls += u64::from(calls);
        }

        debug!(
            amount_usd = micros_to_usd(amount_micros),
            reserved_usd = micros_to_usd(state.reserved_micros),
            search_id = ?search_id,
            "Reservation held"
        );

        Ok(Ok(Reservation {
            aggregator: Arc::clone(self),
            amount_micros,
            calls,
            search_id: search_id.map(str::to_string),
            armed: true,
        }))
    }

    /// Add an event that was not reserved for
    pub fn commit(&self, event: &UsageEvent) -> Result<AggregateTotals, DomainError> {
        let mut state = self.lock()?;
        state.apply(event);
        Ok(state.totals())
    }

    /// Add an event and release the hold it was reserved under, atomically
    pub fn commit_reserved(
        self: &Arc<Self>,
        mut reservation: Reservation,
        event: &UsageEvent,
    ) -> Result<AggregateTotals, DomainError> {
        if !Arc::ptr_eq(self, &reservation.aggregator) {
            return Err(DomainError::internal(
                "Reservation belongs to a different aggregator",
            ));
        }

        let mut state = self.lock()?;
        reservation.armed = false;
        state.release(
            reservation.amount_micros,
            reservation.calls,
            reservation.search_id.as_deref(),
        );
        state.apply(event);

        Ok(state.totals())
    }

    /// Replace the totals with the sum of `events`, keeping outstanding holds
    pub fn rebuild_from(&self, events: &[UsageEvent]) -> Result<usize, DomainError> {
        let now = self.clock.now();
        let mut state = self.lock()?;

        let reserved_micros = state.reserved_micros;
        *state = AggregatorState::new(now);
        state.reserved_micros = reserved_micros;

        let month_key = state.month.period_key.clone();
        let mut applied = 0;
        for event in events
            .iter()
            .filter(|event| PeriodKind::Month.key_for(event.timestamp) == month_key)
        {
            state.apply(event);
            applied += 1;
        }

        info!(
            applied,
            month_spent_usd = state.month.spent(),
            day_spent_usd = state.day.spent(),
            "Rebuilt spend totals from usage log"
        );

        Ok(applied)
    }

    fn release(&self, amount_micros: i64, calls: u32, search_id: Option<&str>) {
        match self.state.lock() {
            Ok(mut state) => state.release(amount_micros, calls, search_id),
            Err(e) => warn!("Could not release reservation: {}", e),
        }
    }
}

/// Spend held against the budget until the paid call is recorded
///
/// Dropping an unsettled reservation gives the amount back.
pub struct Reservation {
    aggregator: Arc<CostAggregator>,
    amount_micros: i64,
    calls: u32,
    search_id: Option<String>,
    armed: bool,
}

impl Reservation {
    pub fn amount_micros(&self) -> i64 {
        self.amount_micros
    }

    pub fn amount(&self) -> f64 {
        micros_to_usd(self.amount_micros)
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn search_id(&self) -> Option<&str> {
        self.search_id.as_deref()
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("amount_micros", &self.amount_micros)
            .field("calls", &self.calls)
            .field("search_id", &self.search_id)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            debug!(
                amount_usd = micros_to_usd(self.amount_micros),
                search_id = ?self.search_id,
                "Releasing unused reservation"
            );
            self.aggregator
                .release(self.amount_micros, self.calls, self.search_id.as_deref());
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::clock::mock::ManualClock;

    fn aggregator_at(clock: &Arc<ManualClock>) -> Arc<CostAggregator> {
        Arc::new(CostAggregator::new(clock.clone()))
    }

    fn event(clock: &ManualClock, call_type: CallType, cost_micros: i64) -> UsageEvent {
        UsageEvent::new(clock.now(), call_type, 1, cost_micros, None)
    }

    #[test]
    fn test_commit_updates_day_and_month() {
        let clock = Arc::new(ManualClock::at(2026, 4, 10, 12, 0));
        let aggregator = aggregator_at(&clock);

        aggregator.commit(&event(&clock, CallType::Geocoding, 5_000)).unwrap();
        aggregator.commit(&event(&clock, CallType::PlaceDetails, 17_000)).unwrap();

        let totals = aggregator.snapshot().unwrap();
        assert_eq!(totals.day.spent_micros, 22_000);
        assert_eq!(totals.month.spent_micros, 22_000);
        assert_eq!(totals.month.call_count, 2);
        assert_eq!(totals.day.period_key, "2026-04-10");

        let breakdown = aggregator.breakdown().unwrap();
        assert_eq!(breakdown.get(&CallType::PlaceDetails), Some(&17_000));
        assert_eq!(aggregator.call_counts().unwrap().get(&CallType::Geocoding), Some(&1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_sum_exactly() {
        let clock = Arc::new(ManualClock::at(2026, 4, 10, 12, 0));
        let aggregator = aggregator_at(&clock);

        let mut handles = Vec::new();
        for task in 0..16i64 {
            let aggregator = aggregator.clone();
            let clock = clock.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100i64 {
                    let cost = 1_000 + task * 7 + i;
                    aggregator
                        .commit(&UsageEvent::new(clock.now(), CallType::Geocoding, 1, cost, None))
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let expected: i64 = (0..16i64)
            .flat_map(|task| (0..100i64).map(move |i| 1_000 + task * 7 + i))
            .sum();

        let totals = aggregator.snapshot().unwrap();
        assert_eq!(totals.month.spent_micros, expected);
        assert_eq!(totals.day.spent_micros, expected);
        assert_eq!(totals.month.call_count, 1_600);
    }

    #[test]
    fn test_day_rolls_over_lazily_month_keeps_accumulating() {
        let clock = Arc::new(ManualClock::at(2026, 4, 10, 23, 59));
        let aggregator = aggregator_at(&clock);

        aggregator.commit(&event(&clock, CallType::Geocoding, 5_000)).unwrap();
        clock.advance(Duration::minutes(2));

        let day = aggregator.totals(PeriodKind::Day).unwrap();
        assert_eq!(day.period_key, "2026-04-11");
        assert_eq!(day.spent_micros, 0);

        aggregator.commit(&event(&clock, CallType::Geocoding, 5_000)).unwrap();
        assert_eq!(aggregator.totals(PeriodKind::Day).unwrap().spent_micros, 5_000);
        assert_eq!(aggregator.totals(PeriodKind::Month).unwrap().spent_micros, 10_000);
    }

    #[test]
    fn test_month_rollover_resets_month_and_breakdown() {
        let clock = Arc::new(ManualClock::at(2026, 4, 30, 23, 0));
        let aggregator = aggregator_at(&clock);

        aggregator.commit(&event(&clock, CallType::PlaceDetails, 17_000)).unwrap();
        clock.advance(Duration::hours(2));

        let month = aggregator.totals(PeriodKind::Month).unwrap();
        assert_eq!(month.period_key, "2026-05");
        assert_eq!(month.spent_micros, 0);
        assert!(aggregator.breakdown().unwrap().is_empty());
        assert!(aggregator.call_counts().unwrap().is_empty());
    }

    #[test]
    fn test_dropped_reservation_is_released() {
        let clock = Arc::new(ManualClock::at(2026, 4, 10, 12, 0));
        let aggregator = aggregator_at(&clock);

        let reservation = aggregator
            .try_reserve(3_000_000, 1, Some("s-1"), |_| None)
            .unwrap()
            .unwrap();
        assert_eq!(aggregator.snapshot().unwrap().reserved_micros, 3_000_000);

        drop(reservation);
        assert_eq!(aggregator.snapshot().unwrap().reserved_micros, 0);
        assert_eq!(aggregator.totals(PeriodKind::Month).unwrap().spent_micros, 0);
    }

    #[test]
    fn test_commit_reserved_moves_hold_into_spend() {
        let clock = Arc::new(ManualClock::at(2026, 4, 10, 12, 0));
        let aggregator = aggregator_at(&clock);

        let reservation = aggregator
            .try_reserve(5_000, 1, Some("s-1"), |_| None)
            .unwrap()
            .unwrap();
        let event = UsageEvent::new(clock.now(), CallType::Geocoding, 1, 5_000, Some("s-1".into()));

        let totals = aggregator.commit_reserved(reservation, &event).unwrap();
        assert_eq!(totals.reserved_micros, 0);
        assert_eq!(totals.month.spent_micros, 5_000);

        let search = aggregator.search_total("s-1").unwrap().unwrap();
        assert_eq!(search.call_count, 1);
        assert_eq!(search.spent_micros, 5_000);
    }

    #[test]
    fn test_check_sees_held_amounts_and_search_calls() {
        let clock = Arc::new(ManualClock::at(2026, 4, 10, 12, 0));
        let aggregator = aggregator_at(&clock);

        let _held = aggregator
            .try_reserve(2_000_000, 2, Some("s-1"), |_| None)
            .unwrap()
            .unwrap();

        let denied = aggregator
            .try_reserve(1, 1, Some("s-1"), |exposure| {
                assert_eq!(exposure.committed_micros(PeriodKind::Month), 2_000_000);
                assert_eq!(exposure.search_calls, 2);
                Some(Denial::SearchCap {
                    search_id: "s-1".to_string(),
                    limit: 2,
                })
            })
            .unwrap();

        assert!(denied.is_err());
        assert_eq!(aggregator.snapshot().unwrap().reserved_micros, 2_000_000);
    }

    #[test]
    fn test_rebuild_from_counts_only_current_month() {
        let clock = Arc::new(ManualClock::at(2026, 4, 10, 12, 0));
        let aggregator = aggregator_at(&clock);

        let last_month = UsageEvent::new(
            clock.now() - Duration::days(15),
            CallType::PlaceDetails,
            1,
            17_000,
            None,
        );
        let earlier_today = event(&clock, CallType::Geocoding, 5_000);
        let earlier_this_month = UsageEvent::new(
            clock.now() - Duration::days(3),
            CallType::PlacesNearbySearch,
            1,
            32_000,
            Some("s-9".to_string()),
        );

        let applied = aggregator
            .rebuild_from(&[last_month, earlier_today, earlier_this_month])
            .unwrap();

        assert_eq!(applied, 2);
        let totals = aggregator.snapshot().unwrap();
        assert_eq!(totals.month.spent_micros, 37_000);
        assert_eq!(totals.day.spent_micros, 5_000);
        assert_eq!(aggregator.search_total("s-9").unwrap().unwrap().call_count, 1);
    }

    #[test]
    fn test_end_search_forgets_idle_search() {
        let clock = Arc::new(ManualClock::at(2026, 4, 10, 12, 0));
        let aggregator = aggregator_at(&clock);

        aggregator
            .commit(&UsageEvent::new(clock.now(), CallType::Geocoding, 1, 5_000, Some("s-1".into())))
            .unwrap();

        let ended = aggregator.end_search("s-1").unwrap().unwrap();
        assert_eq!(ended.spent_micros, 5_000);
        assert!(aggregator.search_total("s-1").unwrap().is_none());
    }
}
