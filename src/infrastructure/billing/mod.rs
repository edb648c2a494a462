//! Billing reconciliation

mod estimate_provider;
mod factory;
mod http_provider;
mod reconciler;

pub use estimate_provider::EstimateBillingProvider;
pub use factory::{create_billing_provider, reconciler_settings};
pub use http_provider::HttpBillingProvider;
pub use reconciler::{BillingReconciler, ReconcilerSettings};
