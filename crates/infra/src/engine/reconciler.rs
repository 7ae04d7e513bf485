//! Billing event reconciler.
//!
//! Turns subscription lifecycle events into account tier updates.
//!
//! ## Flow
//!
//! ```text
//! BillingEvent
//!   ↓
//! 1. Resolve the account (metadata account id, then optional email fallback)
//!   ↓
//! 2. Plan the transition against the account's billing watermark
//!   ↓
//! 3. Conditional write: succeeds only if the watermark is still the one read
//!   ↓
//! 4. On a lost race, re-read and re-plan (bounded)
//! ```
//!
//! Dropped events (no matching account, stale ordering) are outcomes, logged
//! at `warn`. Store failures are errors so the webhook sender retries the
//! whole event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use tierguard_core::{AccountId, Clock, SystemClock};
use tierguard_entitlements::{
    plan_override, plan_transition, Account, BillingEvent, Tier, TransitionPlan, UnchangedReason,
};

use crate::error::{EngineError, EngineResult};
use crate::store::{AccountStore, StoreError};

/// Conditional-write attempts before giving up with a retryable error.
pub const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied { account_id: AccountId, tier: Tier },
    Unchanged {
        account_id: AccountId,
        reason: UnchangedReason,
    },
    Dropped { reason: DropReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropReason {
    /// No single account matches the event.
    UnresolvedCorrelation,
    /// The event is older than the last one applied to the account.
    StaleEvent {
        account_id: AccountId,
        watermark: DateTime<Utc>,
    },
}

impl ReconcileOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied { .. })
    }
}

pub struct BillingReconciler<A, C = SystemClock> {
    accounts: Arc<A>,
    clock: C,
    email_fallback: bool,
}

impl<A: AccountStore> BillingReconciler<A, SystemClock> {
    pub fn new(accounts: Arc<A>) -> Self {
        Self::with_clock(accounts, SystemClock)
    }
}

impl<A, C> BillingReconciler<A, C>
where
    A: AccountStore,
    C: Clock,
{
    pub fn with_clock(accounts: Arc<A>, clock: C) -> Self {
        Self {
            accounts,
            clock,
            email_fallback: false,
        }
    }

    /// Allow email matching when an event carries no account id.
    pub fn with_email_fallback(mut self, enabled: bool) -> Self {
        self.email_fallback = enabled;
        self
    }

    async fn resolve(&self, event: &BillingEvent) -> EngineResult<Option<Account>> {
        if let Some(account_id) = &event.correlation.account_id {
            return Ok(self.accounts.get_account(account_id).await?);
        }
        if !self.email_fallback {
            return Ok(None);
        }
        let Some(email) = &event.correlation.email else {
            return Ok(None);
        };

        let mut matches = self.accounts.find_by_email(email).await?;
        if matches.len() > 1 {
            warn!(
                candidates = matches.len(),
                "billing email matches several accounts; refusing to guess"
            );
            return Ok(None);
        }
        Ok(matches.pop())
    }

    #[instrument(
        skip(self, event),
        fields(
            kind = event.kind.as_str(),
            subscription_id = %event.subscription_id,
            occurred_at = %event.occurred_at,
        ),
        err
    )]
    pub async fn apply_billing_event(&self, event: &BillingEvent) -> EngineResult<ReconcileOutcome> {
        let Some(mut account) = self.resolve(event).await? else {
            warn!(
                account_id = ?event.correlation.account_id,
                "billing event matches no account; dropping"
            );
            return Ok(ReconcileOutcome::Dropped {
                reason: DropReason::UnresolvedCorrelation,
            });
        };

        for attempt in 1..=MAX_ATTEMPTS {
            let update = match plan_transition(&account, event, self.clock.now()) {
                TransitionPlan::Apply(update) => update,
                TransitionPlan::Unchanged(reason) => {
                    info!(account_id = %account.id, ?reason, "billing event leaves account unchanged");
                    return Ok(ReconcileOutcome::Unchanged {
                        account_id: account.id,
                        reason,
                    });
                }
                TransitionPlan::Stale { watermark } => {
                    warn!(
                        account_id = %account.id,
                        %watermark,
                        "stale billing event; dropping"
                    );
                    return Ok(ReconcileOutcome::Dropped {
                        reason: DropReason::StaleEvent {
                            account_id: account.id,
                            watermark,
                        },
                    });
                }
            };

            let written = self
                .accounts
                .apply_billing_update(&account.id, &update, account.billing_watermark.as_ref())
                .await?;
            if written {
                info!(account_id = %account.id, tier = %update.tier, "billing event applied");
                return Ok(ReconcileOutcome::Applied {
                    account_id: account.id,
                    tier: update.tier,
                });
            }

            warn!(account_id = %account.id, attempt, "billing watermark moved; re-reading");
            account = match self.accounts.get_account(&account.id).await? {
                Some(fresh) => fresh,
                None => {
                    return Ok(ReconcileOutcome::Dropped {
                        reason: DropReason::UnresolvedCorrelation,
                    });
                }
            };
        }

        Err(EngineError::PersistenceUnavailable(StoreError::Conflict(format!(
            "billing update for {} lost {MAX_ATTEMPTS} races",
            account.id
        ))))
    }

    /// Set the tier by hand (support tooling, refunds).
    ///
    /// The watermark moves to now, so provider events older than the override
    /// are treated as stale.
    #[instrument(skip(self), fields(account_id = %account_id, tier = %tier), err)]
    pub async fn override_tier(
        &self,
        account_id: &AccountId,
        tier: Tier,
    ) -> EngineResult<ReconcileOutcome> {
        for attempt in 1..=MAX_ATTEMPTS {
            let Some(account) = self.accounts.get_account(account_id).await? else {
                return Ok(ReconcileOutcome::Dropped {
                    reason: DropReason::UnresolvedCorrelation,
                });
            };
            let update = plan_override(&account, tier, self.clock.now());
            if self
                .accounts
                .apply_billing_update(account_id, &update, account.billing_watermark.as_ref())
                .await?
            {
                info!("tier overridden");
                return Ok(ReconcileOutcome::Applied {
                    account_id: account.id,
                    tier,
                });
            }
            warn!(attempt, "billing watermark moved during override; re-reading");
        }

        Err(EngineError::PersistenceUnavailable(StoreError::Conflict(format!(
            "tier override for {account_id} lost {MAX_ATTEMPTS} races"
        ))))
    }
}
