use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tierguard_core::{AccountId, CustomerId, SubscriptionId};

use crate::tier::Tier;

/// Ordering marker of the last billing events applied to an account.
///
/// Events older than `at` are stale. Every event applied at exactly `at` has
/// its key in `event_keys`, so any of them arriving again is a redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingWatermark {
    pub at: DateTime<Utc>,
    pub event_keys: BTreeSet<String>,
}

impl BillingWatermark {
    pub fn new(at: DateTime<Utc>, event_key: impl Into<String>) -> Self {
        Self {
            at,
            event_keys: BTreeSet::from([event_key.into()]),
        }
    }

    pub fn has_seen(&self, at: DateTime<Utc>, event_key: &str) -> bool {
        self.at == at && self.event_keys.contains(event_key)
    }

    /// Watermark after applying `event_key` at `at` (`at` must not be older).
    ///
    /// Keys accumulate while the time stays the same and reset when it moves
    /// forward.
    pub fn advanced(&self, at: DateTime<Utc>, event_key: impl Into<String>) -> Self {
        let mut next = if at == self.at {
            self.clone()
        } else {
            Self {
                at,
                event_keys: BTreeSet::new(),
            }
        };
        next.event_keys.insert(event_key.into());
        next
    }
}

/// Durable account record read by the policy engine.
///
/// `tier` is only written by the billing reconciler (or an operator
/// override); bootstrap creates accounts at `Free`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub tier: Tier,
    pub subscription_id: Option<SubscriptionId>,
    /// Informational only; not used for gating.
    pub billing_period_end: Option<DateTime<Utc>>,
    pub billing_customer_id: Option<CustomerId>,
    /// Only used for email correlation of billing events, when enabled.
    pub email: Option<String>,
    pub billing_watermark: Option<BillingWatermark>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A brand-new account: Free, no subscription, no billing history.
    pub fn bootstrap(id: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tier: Tier::Free,
            subscription_id: None,
            billing_period_end: None,
            billing_customer_id: None,
            email: None,
            billing_watermark: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn watermark_at(&self) -> Option<DateTime<Utc>> {
        self.billing_watermark.as_ref().map(|w| w.at)
    }
}
