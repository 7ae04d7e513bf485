//! Persistence boundary consumed by the entitlement services.
//!
//! Two stores: accounts (tier + billing metadata) and the usage ledger.
//! Both are async because every call is a round-trip to the persistence
//! layer in production.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryAccountStore, InMemoryUsageLedger};
#[cfg(feature = "postgres")]
pub use postgres::{connect_pool, PostgresAccountStore, PostgresUsageLedger};
pub use r#trait::{AccountStore, StoreError, UsageLedger};
