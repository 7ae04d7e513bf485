//! Postgres-backed account store and usage ledger.
//!
//! ## Schema
//!
//! [`SCHEMA`] holds the DDL both stores expect. `ensure_schema()` applies it
//! idempotently; production deployments usually run it through their own
//! migration tooling instead.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Second usage record for a document |
//! | Database (other) | Any other | `Unexpected` | Constraint or query errors |
//! | Io / Tls / PoolTimedOut / PoolClosed | N/A | `Unavailable` | Database unreachable |
//! | Decode / ColumnDecode / ColumnNotFound | N/A | `Unexpected` | Row does not match the schema |
//! | Other | N/A | `Unexpected` | Anything else |
//!
//! Unknown values in `accounts.tier` are read as `Free`.
//!
//! The billing watermark is `watermark_at` plus `watermark_keys`, the sorted
//! keys of every event applied at that instant.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use tierguard_core::{AccountId, CustomerId, DocumentId, SubscriptionId};
use tierguard_entitlements::{Account, BillingUpdate, BillingWatermark, Tier, UsageRecord};

use super::r#trait::{AccountStore, StoreError, UsageLedger};
use crate::config::EngineConfig;

/// DDL for the `accounts`, `tracked_documents` and `usage_records` tables.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id                   TEXT PRIMARY KEY,
    tier                 TEXT NOT NULL DEFAULT 'free',
    subscription_id      TEXT,
    billing_period_end   TIMESTAMPTZ,
    billing_customer_id  TEXT,
    email                TEXT,
    watermark_at         TIMESTAMPTZ,
    watermark_keys       TEXT[],
    created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS accounts_email_idx ON accounts (LOWER(email));

CREATE TABLE IF NOT EXISTS tracked_documents (
    id          UUID PRIMARY KEY,
    account_id  TEXT NOT NULL,
    deleted_at  TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS usage_records (
    document_id  UUID PRIMARY KEY REFERENCES tracked_documents (id),
    account_id   TEXT NOT NULL,
    kind         TEXT NOT NULL,
    occurred_at  TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS usage_records_account_time_idx
    ON usage_records (account_id, occurred_at);
"#;

const ACCOUNT_COLUMNS: &str = "id, tier, subscription_id, billing_period_end, billing_customer_id, \
     email, watermark_at, watermark_keys, created_at, updated_at";

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if db_err.is_unique_violation() {
                StoreError::Conflict(msg)
            } else {
                StoreError::Unexpected(msg)
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            StoreError::Unavailable(format!("{} in {}", err, operation))
        }
        _ => StoreError::Unexpected(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[derive(Debug)]
struct AccountRow {
    id: String,
    tier: Option<String>,
    subscription_id: Option<String>,
    billing_period_end: Option<DateTime<Utc>>,
    billing_customer_id: Option<String>,
    email: Option<String>,
    watermark_at: Option<DateTime<Utc>>,
    watermark_keys: Option<Vec<String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AccountRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            tier: row.try_get("tier")?,
            subscription_id: row.try_get("subscription_id")?,
            billing_period_end: row.try_get("billing_period_end")?,
            billing_customer_id: row.try_get("billing_customer_id")?,
            email: row.try_get("email")?,
            watermark_at: row.try_get("watermark_at")?,
            watermark_keys: row.try_get("watermark_keys")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl AccountRow {
    fn into_account(self) -> Result<Account, StoreError> {
        let unexpected = |e: tierguard_core::DomainError| {
            StoreError::Unexpected(format!("account row {}: {}", self.id, e))
        };

        // Blank optional references are treated as absent rather than corrupt.
        let subscription_id = self
            .subscription_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(SubscriptionId::parse)
            .transpose()
            .map_err(unexpected)?;
        let billing_customer_id = self
            .billing_customer_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(CustomerId::parse)
            .transpose()
            .map_err(unexpected)?;
        let billing_watermark = match (self.watermark_at, self.watermark_keys.clone()) {
            (Some(at), Some(keys)) if !keys.is_empty() => Some(BillingWatermark {
                at,
                event_keys: keys.into_iter().collect(),
            }),
            _ => None,
        };

        Ok(Account {
            id: AccountId::parse(&self.id).map_err(unexpected)?,
            tier: Tier::from_stored(self.tier.as_deref().unwrap_or_default()),
            subscription_id,
            billing_period_end: self.billing_period_end,
            billing_customer_id,
            email: self.email.clone(),
            billing_watermark,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn sorted_keys(watermark: &BillingWatermark) -> Vec<String> {
    watermark.event_keys.iter().cloned().collect()
}

fn decode_account(row: &sqlx::postgres::PgRow) -> Result<Account, StoreError> {
    let row: AccountRow = sqlx::FromRow::from_row(row)
        .map_err(|e| StoreError::Unexpected(format!("failed to decode account row: {}", e)))?;
    row.into_account()
}

/// Pool for the configured database; no URL means persistence is
/// unavailable.
pub async fn connect_pool(config: &EngineConfig) -> Result<PgPool, StoreError> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| StoreError::Unavailable("no database url configured".into()))?;
    PgPool::connect(url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Postgres-backed account store.
///
/// Uses a SQLx connection pool (Arc + Send + Sync). Every write is a single
/// statement on one row.
#[derive(Debug, Clone)]
pub struct PostgresAccountStore {
    pool: Arc<PgPool>,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `config.database_url`.
    pub async fn connect(config: &EngineConfig) -> Result<Self, StoreError> {
        connect_pool(config).await.map(Self::new)
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?;

        row.as_ref().map(decode_account).transpose()
    }

    #[instrument(skip(self, email), err)]
    async fn find_by_email(&self, email: &str) -> Result<Vec<Account>, StoreError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE LOWER(email) = LOWER($1) ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(email.trim())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_email", e))?;

        rows.iter().map(decode_account).collect()
    }

    #[instrument(skip(self, account), fields(account_id = %account.id), err)]
    async fn insert_if_absent(&self, account: &Account) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (
                id,
                tier,
                subscription_id,
                billing_period_end,
                billing_customer_id,
                email,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(account.id.as_str())
        .bind(account.tier.as_str())
        .bind(account.subscription_id.as_ref().map(|s| s.as_str()))
        .bind(account.billing_period_end)
        .bind(account.billing_customer_id.as_ref().map(|c| c.as_str()))
        .bind(account.email.as_deref())
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_if_absent", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, update, expected), fields(account_id = %id, tier = %update.tier), err)]
    async fn apply_billing_update(
        &self,
        id: &AccountId,
        update: &BillingUpdate,
        expected: Option<&BillingWatermark>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                tier = $2,
                subscription_id = $3,
                billing_period_end = $4,
                billing_customer_id = $5,
                watermark_at = $6,
                watermark_keys = $7,
                updated_at = $8
            WHERE id = $1
              AND watermark_at IS NOT DISTINCT FROM $9
              AND watermark_keys IS NOT DISTINCT FROM $10
            "#,
        )
        .bind(id.as_str())
        .bind(update.tier.as_str())
        .bind(update.subscription_id.as_ref().map(|s| s.as_str()))
        .bind(update.billing_period_end)
        .bind(update.billing_customer_id.as_ref().map(|c| c.as_str()))
        .bind(update.watermark.at)
        .bind(sorted_keys(&update.watermark))
        .bind(update.updated_at)
        .bind(expected.map(|w| w.at))
        .bind(expected.map(sorted_keys))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("apply_billing_update", e))?;

        Ok(result.rows_affected() == 1)
    }
}

/// Postgres-backed usage ledger.
///
/// Document state lives in `tracked_documents.deleted_at`; the count joins
/// against it.
#[derive(Debug, Clone)]
pub struct PostgresUsageLedger {
    pool: Arc<PgPool>,
}

impl PostgresUsageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl UsageLedger for PostgresUsageLedger {
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn count_usage(
        &self,
        account_id: &AccountId,
        since: DateTime<Utc>,
        exclude_deleted: bool,
    ) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS usage_count
            FROM usage_records u
            JOIN tracked_documents d ON d.id = u.document_id
            WHERE u.account_id = $1
              AND u.occurred_at >= $2
              AND ($3 = FALSE OR d.deleted_at IS NULL)
            "#,
        )
        .bind(account_id.as_str())
        .bind(since)
        .bind(exclude_deleted)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_usage", e))?;

        let count: i64 = row
            .try_get("usage_count")
            .map_err(|e| map_sqlx_error("count_usage", e))?;
        u32::try_from(count).map_err(|_| StoreError::Unexpected(format!("usage count {count}")))
    }

    #[instrument(skip(self, record), fields(account_id = %record.account_id, document_id = %record.document_id), err)]
    async fn append(&self, record: &UsageRecord) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("append.begin", e))?;

        sqlx::query("INSERT INTO tracked_documents (id, account_id) VALUES ($1, $2)")
            .bind(record.document_id.as_uuid())
            .bind(record.account_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("append.document", e))?;

        sqlx::query(
            r#"
            INSERT INTO usage_records (document_id, account_id, kind, occurred_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.document_id.as_uuid())
        .bind(record.account_id.as_str())
        .bind(record.kind.as_str())
        .bind(record.occurred_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("append.record", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("append.commit", e))
    }

    #[instrument(skip(self), fields(account_id = %account_id, document_id = %document_id), err)]
    async fn mark_document_deleted(
        &self,
        account_id: &AccountId,
        document_id: DocumentId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tracked_documents
            SET deleted_at = COALESCE(deleted_at, $3)
            WHERE id = $1 AND account_id = $2
            "#,
        )
        .bind(document_id.as_uuid())
        .bind(account_id.as_str())
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_document_deleted", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Unexpected(format!(
                "document {document_id} not tracked for account {account_id}"
            )));
        }
        Ok(())
    }
}
