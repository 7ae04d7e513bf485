use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tierguard_core::{AccountId, DocumentId};
use tierguard_entitlements::{Account, BillingUpdate, BillingWatermark, DocumentState, UsageRecord};

use super::r#trait::{AccountStore, StoreError, UsageLedger};

/// Simulated outage switch shared by the in-memory stores.
#[derive(Debug, Default)]
struct Outage(AtomicBool);

impl Outage {
    fn check(&self) -> Result<(), StoreError> {
        if self.0.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn set(&self, down: bool) {
        self.0.store(down, Ordering::SeqCst);
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
}

/// In-memory account store.
///
/// Intended for tests/dev. Every write happens under one lock, which gives
/// the same single-row atomicity a database row update would.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
    outage: Outage,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record directly (profile edits, fixtures).
    pub fn put(&self, account: Account) -> Result<(), StoreError> {
        write(&self.accounts)?.insert(account.id.clone(), account);
        Ok(())
    }

    pub fn len(&self) -> usize {
        read(&self.accounts).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        self.outage.check()?;
        Ok(read(&self.accounts)?.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Account>, StoreError> {
        self.outage.check()?;
        let wanted = email.trim();
        let mut found: Vec<Account> = read(&self.accounts)?
            .values()
            .filter(|a| {
                a.email
                    .as_deref()
                    .is_some_and(|e| e.trim().eq_ignore_ascii_case(wanted))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn insert_if_absent(&self, account: &Account) -> Result<bool, StoreError> {
        self.outage.check()?;
        let mut accounts = write(&self.accounts)?;
        if accounts.contains_key(&account.id) {
            return Ok(false);
        }
        accounts.insert(account.id.clone(), account.clone());
        Ok(true)
    }

    async fn apply_billing_update(
        &self,
        id: &AccountId,
        update: &BillingUpdate,
        expected: Option<&BillingWatermark>,
    ) -> Result<bool, StoreError> {
        self.outage.check()?;
        let mut accounts = write(&self.accounts)?;
        let Some(account) = accounts.get_mut(id) else {
            return Ok(false);
        };
        if account.billing_watermark.as_ref() != expected {
            return Ok(false);
        }
        update.apply_to(account);
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<UsageRecord>,
    documents: HashMap<DocumentId, (AccountId, DocumentState)>,
}

/// In-memory usage ledger.
///
/// Intended for tests/dev. Counting scans the account's records.
#[derive(Debug, Default)]
pub struct InMemoryUsageLedger {
    state: RwLock<LedgerState>,
    outage: Outage,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    pub fn document_state(&self, document_id: &DocumentId) -> Option<DocumentState> {
        read(&self.state)
            .ok()?
            .documents
            .get(document_id)
            .map(|(_, s)| *s)
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn count_usage(
        &self,
        account_id: &AccountId,
        since: DateTime<Utc>,
        exclude_deleted: bool,
    ) -> Result<u32, StoreError> {
        self.outage.check()?;
        let state = read(&self.state)?;
        let count = state
            .records
            .iter()
            .filter(|r| &r.account_id == account_id && r.occurred_at >= since)
            .filter(|r| {
                !exclude_deleted
                    || !state
                        .documents
                        .get(&r.document_id)
                        .is_some_and(|(_, s)| s.is_deleted())
            })
            .count();
        u32::try_from(count).map_err(|_| StoreError::Unexpected(format!("usage count {count}")))
    }

    async fn append(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.outage.check()?;
        let mut state = write(&self.state)?;
        if state.documents.contains_key(&record.document_id) {
            return Err(StoreError::Conflict(format!(
                "usage already recorded for document {}",
                record.document_id
            )));
        }
        state.documents.insert(
            record.document_id,
            (record.account_id.clone(), DocumentState::Active),
        );
        state.records.push(record.clone());
        Ok(())
    }

    async fn mark_document_deleted(
        &self,
        account_id: &AccountId,
        document_id: DocumentId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.outage.check()?;
        let mut state = write(&self.state)?;
        match state.documents.get_mut(&document_id) {
            Some((owner, doc_state)) if owner == account_id => {
                if let DocumentState::Active = doc_state {
                    *doc_state = DocumentState::Deleted { at };
                }
                Ok(())
            }
            _ => Err(StoreError::Unexpected(format!(
                "document {document_id} not tracked for account {account_id}"
            ))),
        }
    }
}
