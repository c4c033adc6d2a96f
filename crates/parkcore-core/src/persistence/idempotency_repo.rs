use parkcore_common::ConfirmOutcome;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::CoreResult;

/// Memoizes `confirm` outcomes by idempotency key, typically
/// `stripe_{sessionId}`. Stored in PS, not CC, so the memoization
/// survives a cache outage.
pub struct IdempotencyRepo {
    pool: PgPool,
}

impl IdempotencyRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Look up a previously memoized outcome within an open transaction,
    /// so the check-then-insert is race-free under the spot row lock.
    pub async fn find_tx(tx: &mut Transaction<'_, Postgres>, key: &str) -> CoreResult<Option<ConfirmOutcome>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT result FROM idempotency_keys WHERE key = $1")
                .bind(key)
                .fetch_optional(&mut **tx)
                .await?;
        Ok(row.map(|(value,)| serde_json::from_value(value).expect("stored ConfirmOutcome is well-formed")))
    }

    pub async fn find(&self, key: &str) -> CoreResult<Option<ConfirmOutcome>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT result FROM idempotency_keys WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| serde_json::from_value(value).expect("stored ConfirmOutcome is well-formed")))
    }

    pub async fn store_tx(tx: &mut Transaction<'_, Postgres>, key: &str, result: &ConfirmOutcome) -> CoreResult<()> {
        let value = serde_json::to_value(result).expect("ConfirmOutcome serializes");
        sqlx::query(
            "INSERT INTO idempotency_keys (key, result, created_at) VALUES ($1, $2, now()) \
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
