use std::sync::Arc;

use tracing::instrument;

use tierguard_core::{AccountId, Clock, DocumentId, SystemClock};
use tierguard_entitlements::UsageRecord;

use crate::error::EngineResult;
use crate::store::UsageLedger;

/// Caller-side ledger writes that follow an allowed action.
///
/// The policy engine never writes; the document service calls
/// [`record_creation`](Self::record_creation) once the document itself has
/// been stored.
pub struct UsageRecorder<U, C = SystemClock> {
    ledger: Arc<U>,
    clock: C,
}

impl<U: UsageLedger> UsageRecorder<U, SystemClock> {
    pub fn new(ledger: Arc<U>) -> Self {
        Self::with_clock(ledger, SystemClock)
    }
}

impl<U, C> UsageRecorder<U, C>
where
    U: UsageLedger,
    C: Clock,
{
    pub fn with_clock(ledger: Arc<U>, clock: C) -> Self {
        Self { ledger, clock }
    }

    #[instrument(skip(self), fields(account_id = %account_id, document_id = %document_id), err)]
    pub async fn record_creation(
        &self,
        account_id: &AccountId,
        document_id: DocumentId,
    ) -> EngineResult<UsageRecord> {
        let record =
            UsageRecord::document_created(account_id.clone(), document_id, self.clock.now());
        self.ledger.append(&record).await?;
        Ok(record)
    }

    #[instrument(skip(self), fields(account_id = %account_id, document_id = %document_id), err)]
    pub async fn mark_document_deleted(
        &self,
        account_id: &AccountId,
        document_id: DocumentId,
    ) -> EngineResult<()> {
        self.ledger
            .mark_document_deleted(account_id, document_id, self.clock.now())
            .await?;
        Ok(())
    }
}
