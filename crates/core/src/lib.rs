//! `tierguard-core`: foundation building blocks shared by the entitlement crates.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, BillingEventId, CustomerId, DocumentId, SubscriptionId};
