//! Engine error model.
//!
//! Policy denials are **not** errors: they come back as a [`Decision`]. The
//! variants here mean "the engine could not produce an answer".
//!
//! | Source | EngineError |
//! |--------|-------------|
//! | Missing or blank caller identity | `Unauthorized` |
//! | `StoreError::*` | `PersistenceUnavailable` |
//! | Malformed billing payload, bad id | `InvalidEvent` |
//! | Usage window outside the time range | `InvalidConfig` |

use thiserror::Error;
use tracing::warn;

use tierguard_core::DomainError;
use tierguard_entitlements::Decision;

use crate::store::StoreError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// No caller identity.
    #[error("unauthorized: no caller identity")]
    Unauthorized,

    /// The account store or usage ledger failed; nothing was decided.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] StoreError),

    /// A billing event could not be interpreted.
    #[error("invalid billing event: {0}")]
    InvalidEvent(String),

    /// The engine's policy cannot be evaluated at the current time.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    pub(crate) fn config(err: DomainError) -> Self {
        EngineError::InvalidConfig(err.to_string())
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::PersistenceUnavailable(StoreError::Unavailable(_))
                | EngineError::PersistenceUnavailable(StoreError::Conflict(_))
        )
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Unauthorized => EngineError::Unauthorized,
            other => EngineError::InvalidEvent(other.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Collapse an authorization result into a decision that never lets an
/// infrastructure failure through as an allow.
pub trait DecisionResultExt {
    fn or_fail_closed(self) -> Decision;
}

impl DecisionResultExt for EngineResult<Decision> {
    fn or_fail_closed(self) -> Decision {
        match self {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, "authorization could not be evaluated; denying");
                Decision::fail_closed()
            }
        }
    }
}
