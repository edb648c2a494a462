//! Usage metering infrastructure implementations

mod aggregator;
mod file_repository;
mod in_memory;
mod meter;

pub use aggregator::{AggregateTotals, CostAggregator, Exposure, Reservation};
pub use file_repository::JsonlUsageRepository;
pub use in_memory::InMemoryUsageRepository;
pub use meter::RequestMeter;
