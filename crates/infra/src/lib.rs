//! Infrastructure layer: stores, request-scoped services, config.
//!
//! - [`store`]: account store and usage ledger traits with in-memory and
//!   Postgres (`postgres` feature) implementations
//! - [`engine`]: policy engine, account bootstrap, billing reconciler, usage
//!   recorder
//! - [`config`]: environment-driven engine settings
//! - [`error`]: engine error model and fail-closed helper

pub mod config;
pub mod engine;
pub mod error;
pub mod store;

mod integration_tests;

pub use config::EngineConfig;
pub use engine::{
    AccountBootstrap, BillingReconciler, DropReason, ReconcileOutcome, TierPolicyEngine,
    UsageRecorder,
};
pub use error::{DecisionResultExt, EngineError, EngineResult};
