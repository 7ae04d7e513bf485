//! Entitlement rules (pure).
//!
//! Tier gating, rolling usage windows and the subscription tier state machine,
//! implemented as deterministic logic (no IO, no storage, no clocks).

pub mod account;
pub mod billing;
pub mod policy;
pub mod tier;
pub mod usage;

pub use account::{Account, BillingWatermark};
pub use billing::{
    plan_override, plan_transition, BillingEvent, BillingEventKind, BillingUpdate, Correlation,
    TransitionPlan, UnchangedReason,
};
pub use policy::{Action, Decision, DenialReason, QuotaSnapshot, UsagePolicy};
pub use tier::{Tier, FREE_TIER_LIMIT, USAGE_WINDOW_DAYS};
pub use usage::{DocumentState, UsageKind, UsageRecord, UsageWindow};
