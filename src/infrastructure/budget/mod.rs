//! Budget enforcement

mod guard;

pub use guard::{BudgetGuard, ReservationOutcome};
