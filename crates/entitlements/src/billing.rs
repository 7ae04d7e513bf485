//! Subscription lifecycle events and the tier state machine.
//!
//! States are `Free` and `Pro`:
//!
//! - `SubscriptionCreated` / `SubscriptionActivated` -> `Pro`
//! - `SubscriptionRevoked` -> `Free`
//! - `SubscriptionCanceled` -> no transition (the account stays `Pro` until the
//!   revoke arrives at period end)
//!
//! Transitions are ordered by the provider's event timestamp. Each account
//! carries a [`BillingWatermark`]; anything older is stale and discarded, so a
//! late `Created` can never resurrect `Pro` after a `Revoked`.

use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tierguard_core::{
    AccountId, BillingEventId, CustomerId, DomainError, DomainResult, SubscriptionId,
};

use crate::account::{Account, BillingWatermark};
use crate::tier::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventKind {
    SubscriptionCreated,
    SubscriptionActivated,
    SubscriptionRevoked,
    SubscriptionCanceled,
}

impl BillingEventKind {
    /// Map a provider webhook `type` to a lifecycle kind.
    pub fn from_provider_type(raw: &str) -> Option<Self> {
        match raw {
            "subscription.created" => Some(Self::SubscriptionCreated),
            "subscription.active" | "subscription.activated" => Some(Self::SubscriptionActivated),
            "subscription.revoked" => Some(Self::SubscriptionRevoked),
            "subscription.canceled" | "subscription.cancelled" => {
                Some(Self::SubscriptionCanceled)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionCreated => "subscription_created",
            Self::SubscriptionActivated => "subscription_activated",
            Self::SubscriptionRevoked => "subscription_revoked",
            Self::SubscriptionCanceled => "subscription_canceled",
        }
    }

    /// Tier this event moves the account to, if any.
    pub fn target_tier(&self) -> Option<Tier> {
        match self {
            Self::SubscriptionCreated | Self::SubscriptionActivated => Some(Tier::Pro),
            Self::SubscriptionRevoked => Some(Tier::Free),
            Self::SubscriptionCanceled => None,
        }
    }
}

/// Keys available to match an event to an account.
///
/// `account_id` comes from checkout metadata and is authoritative. `email` is
/// only honoured when email fallback is switched on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    pub account_id: Option<AccountId>,
    pub email: Option<String>,
}

/// Inbound subscription lifecycle event, already authenticated by transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub event_id: Option<BillingEventId>,
    pub kind: BillingEventKind,
    pub correlation: Correlation,
    pub subscription_id: SubscriptionId,
    pub customer_id: Option<CustomerId>,
    pub period_end: Option<DateTime<Utc>>,
    /// Provider event time; ordering uses this, never receipt time.
    pub occurred_at: DateTime<Utc>,
}

impl BillingEvent {
    /// Key that identifies one logical event across redeliveries.
    pub fn idempotency_key(&self) -> String {
        match &self.event_id {
            Some(id) => format!("evt:{id}"),
            None => format!(
                "sub:{}:{}:{}",
                self.subscription_id,
                self.kind.as_str(),
                self.occurred_at.timestamp_millis()
            ),
        }
    }

    /// Decode a provider webhook body.
    ///
    /// Expected shape:
    ///
    /// ```json
    /// {
    ///   "id": "evt_123",
    ///   "type": "subscription.created",
    ///   "timestamp": "2026-01-01T00:00:00Z",
    ///   "data": {
    ///     "id": "sub_1",
    ///     "customer_id": "cus_1",
    ///     "current_period_end": "2026-02-01T00:00:00Z",
    ///     "metadata": { "account_id": "user_abc" },
    ///     "customer": { "email": "a@example.com" }
    ///   }
    /// }
    /// ```
    ///
    /// `data.user.email` is accepted in place of `data.customer.email`, and
    /// `data.modified_at` in place of a missing top-level `timestamp`.
    pub fn from_webhook_json(body: &JsonValue) -> DomainResult<Self> {
        let envelope: WebhookEnvelope = serde_json::from_value(body.clone())
            .map_err(|e| DomainError::validation(format!("webhook payload: {e}")))?;

        let kind = BillingEventKind::from_provider_type(&envelope.kind).ok_or_else(|| {
            DomainError::validation(format!("unsupported webhook type '{}'", envelope.kind))
        })?;

        // Stores keep microseconds; finer digits would defeat redelivery checks.
        let occurred_at = envelope
            .timestamp
            .or(envelope.data.modified_at)
            .ok_or_else(|| DomainError::validation("webhook payload: missing event timestamp"))?
            .trunc_subsecs(6);

        let account_id = match envelope.data.metadata.get("account_id") {
            Some(JsonValue::String(raw)) => Some(AccountId::parse(raw).map_err(|_| {
                DomainError::validation("webhook payload: blank metadata.account_id")
            })?),
            Some(JsonValue::Null) | None => None,
            Some(other) => {
                return Err(DomainError::validation(format!(
                    "webhook payload: metadata.account_id must be a string, got {other}"
                )));
            }
        };

        let email = envelope
            .data
            .customer
            .and_then(|c| c.email)
            .or_else(|| envelope.data.user.and_then(|u| u.email))
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        let event_id = envelope
            .id
            .as_deref()
            .map(BillingEventId::parse)
            .transpose()?;
        let customer_id = envelope
            .data
            .customer_id
            .as_deref()
            .map(CustomerId::parse)
            .transpose()?;

        Ok(Self {
            event_id,
            kind,
            correlation: Correlation { account_id, email },
            subscription_id: SubscriptionId::parse(&envelope.data.id)?,
            customer_id,
            period_end: envelope.data.current_period_end,
            occurred_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    timestamp: Option<DateTime<Utc>>,
    data: WebhookSubscription,
}

#[derive(Debug, Deserialize)]
struct WebhookSubscription {
    id: String,
    customer_id: Option<String>,
    current_period_end: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: HashMap<String, JsonValue>,
    customer: Option<WebhookParty>,
    user: Option<WebhookParty>,
}

#[derive(Debug, Deserialize)]
struct WebhookParty {
    email: Option<String>,
}

/// Full set of billing fields to write in one atomic update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingUpdate {
    pub tier: Tier,
    pub subscription_id: Option<SubscriptionId>,
    pub billing_period_end: Option<DateTime<Utc>>,
    pub billing_customer_id: Option<CustomerId>,
    pub watermark: BillingWatermark,
    pub updated_at: DateTime<Utc>,
}

impl BillingUpdate {
    pub fn apply_to(&self, account: &mut Account) {
        account.tier = self.tier;
        account.subscription_id = self.subscription_id.clone();
        account.billing_period_end = self.billing_period_end;
        account.billing_customer_id = self.billing_customer_id.clone();
        account.billing_watermark = Some(self.watermark.clone());
        account.updated_at = self.updated_at;
    }
}

/// Why an event leaves the account as it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnchangedReason {
    /// Same event already applied.
    Duplicate,
    /// Cancellation only stops renewal; the revoke does the downgrade.
    CancellationPending,
    /// Revoke for a subscription the account no longer holds.
    ForeignSubscription,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionPlan {
    Apply(BillingUpdate),
    Unchanged(UnchangedReason),
    /// Event predates the last applied one.
    Stale { watermark: DateTime<Utc> },
}

/// Decide what `event` does to `account`; `now` stamps `updated_at`.
pub fn plan_transition(
    account: &Account,
    event: &BillingEvent,
    now: DateTime<Utc>,
) -> TransitionPlan {
    let key = event.idempotency_key();

    if let Some(watermark) = &account.billing_watermark {
        if event.occurred_at < watermark.at {
            return TransitionPlan::Stale {
                watermark: watermark.at,
            };
        }
        if watermark.has_seen(event.occurred_at, &key) {
            return TransitionPlan::Unchanged(UnchangedReason::Duplicate);
        }
    }

    let Some(target) = event.kind.target_tier() else {
        return TransitionPlan::Unchanged(UnchangedReason::CancellationPending);
    };

    let watermark = match &account.billing_watermark {
        Some(current) => current.advanced(event.occurred_at, key),
        None => BillingWatermark::new(event.occurred_at, key),
    };

    match target {
        Tier::Pro => TransitionPlan::Apply(BillingUpdate {
            tier: Tier::Pro,
            subscription_id: Some(event.subscription_id.clone()),
            billing_period_end: event.period_end.or(account.billing_period_end),
            billing_customer_id: event
                .customer_id
                .clone()
                .or_else(|| account.billing_customer_id.clone()),
            watermark,
            updated_at: now,
        }),
        Tier::Free => {
            if let Some(current) = &account.subscription_id {
                if *current != event.subscription_id {
                    return TransitionPlan::Unchanged(UnchangedReason::ForeignSubscription);
                }
            }
            TransitionPlan::Apply(BillingUpdate {
                tier: Tier::Free,
                subscription_id: None,
                billing_period_end: account.billing_period_end,
                billing_customer_id: account.billing_customer_id.clone(),
                watermark,
                updated_at: now,
            })
        }
    }
}

/// Operator override of the tier.
///
/// Moves the watermark to `now` (or keeps a later one) so that provider
/// events older than the override cannot undo it.
pub fn plan_override(account: &Account, tier: Tier, now: DateTime<Utc>) -> BillingUpdate {
    // Same precision as webhook times and the stored watermark.
    let now = now.trunc_subsecs(6);
    let key = format!("override:{}:{}", tier.as_str(), now.timestamp_millis());
    let watermark = match &account.billing_watermark {
        Some(current) if current.at >= now => current.advanced(current.at, key),
        _ => BillingWatermark::new(now, key),
    };
    BillingUpdate {
        tier,
        subscription_id: account.subscription_id.clone(),
        billing_period_end: account.billing_period_end,
        billing_customer_id: account.billing_customer_id.clone(),
        watermark,
        updated_at: now,
    }
}
