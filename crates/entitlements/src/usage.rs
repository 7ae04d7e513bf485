use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use tierguard_core::{AccountId, DocumentId, DomainError, DomainResult};

/// Kind of billable action recorded in the usage ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    DocumentCreated,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::DocumentCreated => "document_created",
        }
    }
}

/// Lifecycle of the document a usage record points at.
///
/// The usage counter joins against this state: records whose document is
/// `Deleted` do not count towards the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DocumentState {
    Active,
    Deleted { at: DateTime<Utc> },
}

impl DocumentState {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DocumentState::Deleted { .. })
    }
}

/// One billable action. Exactly one per successful document creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub account_id: AccountId,
    pub document_id: DocumentId,
    pub kind: UsageKind,
    /// Business time of the action (not ingestion time).
    pub occurred_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn document_created(
        account_id: AccountId,
        document_id: DocumentId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            document_id,
            kind: UsageKind::DocumentCreated,
            occurred_at,
        }
    }
}

/// Trailing usage window ending at evaluation time.
///
/// Sliding, not calendar-aligned. The lower bound is inclusive: a record
/// exactly `days` old is inside the window, one second older is outside.
/// There is no upper bound, matching the ledger's `occurred_at >= since`
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageWindow {
    pub start: DateTime<Utc>,
}

impl UsageWindow {
    /// Window of `days` ending at `now`. Lengths that fall outside the
    /// representable time range are a validation error.
    pub fn trailing(now: DateTime<Utc>, days: i64) -> DomainResult<Self> {
        let start = TimeDelta::try_days(days)
            .and_then(|length| now.checked_sub_signed(length))
            .ok_or_else(|| {
                DomainError::validation(format!("usage window of {days} days is out of range"))
            })?;
        Ok(Self { start })
    }
}
