use std::sync::Arc;

use tracing::{debug, instrument};

use tierguard_core::{AccountId, Clock, CustomerId, SystemClock};
use tierguard_entitlements::Account;

use crate::error::EngineResult;
use crate::store::{AccountStore, StoreError};

/// Guarantees an account row exists before anything references it.
///
/// Concurrent first use is resolved by the store's insert-if-absent: the
/// loser of the race re-reads the winner's row, so every caller gets the
/// same account back.
pub struct AccountBootstrap<A, C = SystemClock> {
    accounts: Arc<A>,
    clock: C,
}

impl<A: AccountStore> AccountBootstrap<A, SystemClock> {
    pub fn new(accounts: Arc<A>) -> Self {
        Self::with_clock(accounts, SystemClock)
    }
}

impl<A, C> AccountBootstrap<A, C>
where
    A: AccountStore,
    C: Clock,
{
    pub fn with_clock(accounts: Arc<A>, clock: C) -> Self {
        Self { accounts, clock }
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    pub async fn ensure_account(&self, account_id: &AccountId) -> EngineResult<Account> {
        if let Some(existing) = self.accounts.get_account(account_id).await? {
            return Ok(existing);
        }

        let fresh = Account::bootstrap(account_id.clone(), self.clock.now());
        let created = self.accounts.insert_if_absent(&fresh).await?;
        debug!(created, "account bootstrap");

        match self.accounts.get_account(account_id).await? {
            Some(account) => Ok(account),
            None => Err(StoreError::Unexpected(format!(
                "account {account_id} missing after insert"
            ))
            .into()),
        }
    }

    /// Provider customer id for the billing portal, if the account has one.
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    pub async fn billing_customer_id(
        &self,
        account_id: &AccountId,
    ) -> EngineResult<Option<CustomerId>> {
        Ok(self
            .accounts
            .get_account(account_id)
            .await?
            .and_then(|a| a.billing_customer_id))
    }
}
