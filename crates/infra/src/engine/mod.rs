//! Request-scoped services over the account store and usage ledger.

mod bootstrap;
mod policy;
mod reconciler;
mod usage;

pub use bootstrap::AccountBootstrap;
pub use policy::TierPolicyEngine;
pub use reconciler::{BillingReconciler, DropReason, ReconcileOutcome, MAX_ATTEMPTS};
pub use usage::UsageRecorder;
