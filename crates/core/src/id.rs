//! Strongly-typed identifiers.
//!
//! Account, subscription and customer identifiers come from external systems
//! (identity provider, billing provider) and are treated as opaque strings.
//! Documents are owned by the application and use UUIDv7.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Stable identity of an account (the external identity reference).
///
/// Never reused. A blank value is not an identity at all, so parsing one
/// yields [`DomainError::Unauthorized`] rather than a validation error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

/// Billing-provider subscription reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionId(String);

/// Billing-provider customer reference (used for the customer portal).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CustomerId(String);

/// Provider-assigned id of a single webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingEventId(String);

/// Identifier of a billable document (e.g. a receipt).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

macro_rules! impl_opaque_newtype {
    ($t:ty, $blank:expr) => {
        impl $t {
            /// Parse an identifier, trimming surrounding whitespace.
            pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
                let trimmed = raw.as_ref().trim();
                if trimmed.is_empty() {
                    return Err($blank);
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_opaque_newtype!(AccountId, DomainError::Unauthorized);
impl_opaque_newtype!(
    SubscriptionId,
    DomainError::invalid_id("SubscriptionId: empty")
);
impl_opaque_newtype!(
    CustomerId,
    DomainError::invalid_id("CustomerId: empty")
);
impl_opaque_newtype!(
    BillingEventId,
    DomainError::invalid_id("BillingEventId: empty")
);

impl DocumentId {
    /// Create a new time-ordered document id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for DocumentId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for DocumentId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("DocumentId: {e}")))?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_account_id_is_unauthorized() {
        assert_eq!(AccountId::parse(""), Err(DomainError::Unauthorized));
        assert_eq!(AccountId::parse("   "), Err(DomainError::Unauthorized));
    }

    #[test]
    fn account_id_is_trimmed() {
        let id = AccountId::parse("  acct-1 ").unwrap();
        assert_eq!(id.as_str(), "acct-1");
        assert_eq!(id.to_string(), "acct-1");
    }

    #[test]
    fn blank_subscription_id_is_invalid() {
        match SubscriptionId::parse("") {
            Err(DomainError::InvalidId(msg)) => assert!(msg.contains("SubscriptionId")),
            other => panic!("expected InvalidId, got {other:?}"),
        }
    }

    #[test]
    fn account_id_rejects_blank_on_deserialize() {
        let err = serde_json::from_str::<AccountId>("\"\"");
        assert!(err.is_err());
        let ok: AccountId = serde_json::from_str("\"acct-9\"").unwrap();
        assert_eq!(ok.as_str(), "acct-9");
    }

    #[test]
    fn document_id_parses_uuid() {
        let id = DocumentId::new();
        let parsed: DocumentId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<DocumentId>().is_err());
    }
}
