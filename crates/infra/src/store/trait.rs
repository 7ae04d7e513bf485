use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use tierguard_core::{AccountId, DocumentId};
use tierguard_entitlements::{Account, BillingUpdate, BillingWatermark, UsageRecord};

/// Store operation error.
///
/// These are **infrastructure errors**. Callers must not read them as a
/// policy outcome: "could not evaluate" is distinct from "denied".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached (connection, pool, timeout).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered, but with something we cannot use.
    #[error("unexpected store result: {0}")]
    Unexpected(String),

    /// A write collided with a concurrent write.
    #[error("write conflict: {0}")]
    Conflict(String),
}

/// Durable account records keyed by account id.
///
/// Writes are single-row: an insert that never overwrites, and one
/// conditional update that sets every billing field at once.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, StoreError>;

    /// All accounts whose email matches (case-insensitive).
    async fn find_by_email(&self, email: &str) -> Result<Vec<Account>, StoreError>;

    /// Insert `account` unless a record with the same id exists.
    ///
    /// Returns `true` if this call created the row. A lost race is `Ok(false)`,
    /// never a duplicate-key error.
    async fn insert_if_absent(&self, account: &Account) -> Result<bool, StoreError>;

    /// Atomically write `update` if the stored watermark still equals
    /// `expected`.
    ///
    /// Returns `false` if the precondition failed or the account is gone.
    async fn apply_billing_update(
        &self,
        id: &AccountId,
        update: &BillingUpdate,
        expected: Option<&BillingWatermark>,
    ) -> Result<bool, StoreError>;
}

/// Append-only ledger of billable actions, joined against document state.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Count records for `account_id` with `occurred_at >= since`.
    ///
    /// With `exclude_deleted`, records whose document is soft-deleted are
    /// skipped.
    async fn count_usage(
        &self,
        account_id: &AccountId,
        since: DateTime<Utc>,
        exclude_deleted: bool,
    ) -> Result<u32, StoreError>;

    /// Append a record and register its document as active.
    ///
    /// A second record for the same document is a [`StoreError::Conflict`].
    async fn append(&self, record: &UsageRecord) -> Result<(), StoreError>;

    /// Move a document to the deleted state.
    ///
    /// Unknown documents (or documents of another account) are
    /// [`StoreError::Unexpected`]. Deleting twice keeps the first timestamp.
    async fn mark_document_deleted(
        &self,
        account_id: &AccountId,
        document_id: DocumentId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        (**self).get_account(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Account>, StoreError> {
        (**self).find_by_email(email).await
    }

    async fn insert_if_absent(&self, account: &Account) -> Result<bool, StoreError> {
        (**self).insert_if_absent(account).await
    }

    async fn apply_billing_update(
        &self,
        id: &AccountId,
        update: &BillingUpdate,
        expected: Option<&BillingWatermark>,
    ) -> Result<bool, StoreError> {
        (**self).apply_billing_update(id, update, expected).await
    }
}

#[async_trait]
impl<S> UsageLedger for Arc<S>
where
    S: UsageLedger + ?Sized,
{
    async fn count_usage(
        &self,
        account_id: &AccountId,
        since: DateTime<Utc>,
        exclude_deleted: bool,
    ) -> Result<u32, StoreError> {
        (**self).count_usage(account_id, since, exclude_deleted).await
    }

    async fn append(&self, record: &UsageRecord) -> Result<(), StoreError> {
        (**self).append(record).await
    }

    async fn mark_document_deleted(
        &self,
        account_id: &AccountId,
        document_id: DocumentId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).mark_document_deleted(account_id, document_id, at).await
    }
}
