//! Tier policy engine.
//!
//! Read-only: looks up the account tier and, for Free creations only, the
//! recent usage count, then delegates to [`UsagePolicy::decide`].
//!
//! ## Concurrency
//!
//! The count and the caller's subsequent usage append are not one
//! transaction. Two concurrent creations by the same Free account may both
//! observe `limit - 1` and both be allowed, so the quota can be overshot by
//! the number of in-flight requests. No lock is taken around count+insert.

use std::sync::Arc;

use tracing::{debug, instrument};

use tierguard_core::{AccountId, Clock, SystemClock};
use tierguard_entitlements::{Action, Decision, QuotaSnapshot, Tier, UsagePolicy};

use crate::error::{EngineError, EngineResult};
use crate::store::{AccountStore, UsageLedger};

pub struct TierPolicyEngine<A, U, C = SystemClock> {
    accounts: Arc<A>,
    ledger: Arc<U>,
    clock: C,
    policy: UsagePolicy,
}

impl<A, U> TierPolicyEngine<A, U, SystemClock>
where
    A: AccountStore,
    U: UsageLedger,
{
    pub fn new(accounts: Arc<A>, ledger: Arc<U>) -> Self {
        Self::with_clock(accounts, ledger, SystemClock)
    }
}

impl<A, U, C> TierPolicyEngine<A, U, C>
where
    A: AccountStore,
    U: UsageLedger,
    C: Clock,
{
    pub fn with_clock(accounts: Arc<A>, ledger: Arc<U>, clock: C) -> Self {
        Self {
            accounts,
            ledger,
            clock,
            policy: UsagePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: UsagePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &UsagePolicy {
        &self.policy
    }

    /// Current tier; a missing account is Free.
    async fn tier_of(&self, account_id: &AccountId) -> EngineResult<Tier> {
        let account = self.accounts.get_account(account_id).await?;
        Ok(account.map(|a| a.tier).unwrap_or_default())
    }

    async fn recent_usage(&self, account_id: &AccountId) -> EngineResult<u32> {
        let window = self
            .policy
            .window_at(self.clock.now())
            .map_err(EngineError::config)?;
        Ok(self
            .ledger
            .count_usage(account_id, window.start, true)
            .await?)
    }

    #[instrument(skip(self), fields(account_id = %account_id, action = action.as_str()), err)]
    pub async fn authorize(&self, account_id: &AccountId, action: Action) -> EngineResult<Decision> {
        let tier = self.tier_of(account_id).await?;
        let recent = if self.policy.needs_usage(tier, action) {
            self.recent_usage(account_id).await?
        } else {
            0
        };

        let decision = self.policy.decide(tier, action, recent);
        debug!(
            tier = tier.as_str(),
            recent,
            allowed = decision.allowed,
            reason = decision.reason.map(|r| r.code()),
            "authorization decided"
        );
        Ok(decision)
    }

    /// Authorize a caller-supplied identity. Missing or blank ids are
    /// [`EngineError::Unauthorized`].
    pub async fn authorize_request(
        &self,
        caller: Option<&str>,
        action: Action,
    ) -> EngineResult<Decision> {
        let raw = caller.ok_or(EngineError::Unauthorized)?;
        let account_id = AccountId::parse(raw)?;
        self.authorize(&account_id, action).await
    }

    pub async fn authorize_create(&self, account_id: &AccountId) -> EngineResult<Decision> {
        self.authorize(account_id, Action::Create).await
    }

    pub async fn authorize_edit(&self, account_id: &AccountId) -> EngineResult<Decision> {
        self.authorize(account_id, Action::Edit).await
    }

    pub async fn authorize_delete(&self, account_id: &AccountId) -> EngineResult<Decision> {
        self.authorize(account_id, Action::Delete).await
    }

    /// Always allowed.
    pub async fn authorize_download(&self, account_id: &AccountId) -> EngineResult<Decision> {
        self.authorize(account_id, Action::Download).await
    }

    /// Always allowed.
    pub async fn authorize_view(&self, account_id: &AccountId) -> EngineResult<Decision> {
        self.authorize(account_id, Action::View).await
    }

    /// Usage summary for the current window.
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    pub async fn quota(&self, account_id: &AccountId) -> EngineResult<QuotaSnapshot> {
        let tier = self.tier_of(account_id).await?;
        let used = self.recent_usage(account_id).await?;
        self.policy
            .snapshot(tier, used, self.clock.now())
            .map_err(EngineError::config)
    }
}
