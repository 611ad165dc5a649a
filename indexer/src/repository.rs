/// Repository (spec §4.8). Typed persistence over natural composite keys;
/// every entity in spec §3 has one, so unlike the teacher's registry
/// domain no surrogate `Uuid` primary keys are needed anywhere here.
use chrono::{DateTime, Utc};
use shared::{ContractActivity, ContractEvent, ContractListFilter, DeployedContract, Progress, StorageChange};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;

use crate::metrics::{BATCH_SIZE, DB_BATCH_INSERT_SECONDS};
use crate::retry::{Classify, ErrorClass};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Classify for RepositoryError {
    fn classify(&self) -> ErrorClass {
        match &self {
            RepositoryError::Database(sqlx::Error::PoolTimedOut) => ErrorClass::Recoverable,
            RepositoryError::Database(sqlx::Error::Io(_)) => ErrorClass::Recoverable,
            RepositoryError::Database(_) => ErrorClass::Fatal,
        }
    }
}

#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Repository { pool }
    }

    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await?;
        Ok(Repository { pool })
    }

    /// Idempotent by contract ID (spec §4.8): no-op on conflict.
    pub async fn save_deployed_contract(&self, contract: &DeployedContract) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO deployed_contracts
                (contract_id, factory_id, kind, deployer, deployment_ledger, deployment_time,
                 deployment_tx_hash, init_params, cost_cpu_insns, cost_mem_bytes, memo)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (contract_id) DO NOTHING
            "#,
        )
        .bind(&contract.contract_id)
        .bind(&contract.factory_id)
        .bind(&contract.kind)
        .bind(&contract.deployer)
        .bind(contract.deployment_ledger)
        .bind(contract.deployment_time)
        .bind(&contract.deployment_tx_hash)
        .bind(&contract.init_params)
        .bind(contract.cost_cpu_insns)
        .bind(contract.cost_mem_bytes)
        .bind(&contract.memo)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Batch insert in one transaction, rolled back on any row failure
    /// (spec §4.8); duplicates ignored via the composite natural key.
    pub async fn save_events(&self, events: &[ContractEvent]) -> Result<(), RepositoryError> {
        if events.is_empty() {
            return Ok(());
        }
        BATCH_SIZE.with_label_values(&["contract_events"]).observe(events.len() as f64);
        let timer = DB_BATCH_INSERT_SECONDS.with_label_values(&["contract_events"]).start_timer();
        let mut tx = self.pool.begin().await?;
        for event in events {
            insert_event(&mut tx, event).await?;
        }
        tx.commit().await?;
        timer.observe_duration();
        Ok(())
    }

    pub async fn save_storage_changes(&self, changes: &[StorageChange]) -> Result<(), RepositoryError> {
        if changes.is_empty() {
            return Ok(());
        }
        BATCH_SIZE.with_label_values(&["storage_changes"]).observe(changes.len() as f64);
        let timer = DB_BATCH_INSERT_SECONDS.with_label_values(&["storage_changes"]).start_timer();
        let mut tx = self.pool.begin().await?;
        for change in changes {
            insert_storage_change(&mut tx, change).await?;
        }
        tx.commit().await?;
        timer.observe_duration();
        Ok(())
    }

    /// Idempotent by (tx hash, activity index) (spec §4.8).
    pub async fn save_activities(&self, activities: &[ContractActivity]) -> Result<(), RepositoryError> {
        if activities.is_empty() {
            return Ok(());
        }
        BATCH_SIZE.with_label_values(&["contract_activities"]).observe(activities.len() as f64);
        let timer = DB_BATCH_INSERT_SECONDS.with_label_values(&["contract_activities"]).start_timer();
        let mut tx = self.pool.begin().await?;
        for activity in activities {
            insert_activity(&mut tx, activity).await?;
        }
        tx.commit().await?;
        timer.observe_duration();
        Ok(())
    }

    /// Upserts the singleton progress row (spec §4.8 Progress state
    /// machine: absent → present, present → present' with strictly
    /// greater sequence).
    pub async fn save_progress(&self, last_ledger_sequence: i64) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO progress (id, last_ledger_sequence, updated_at)
            VALUES (1, $1, now())
            ON CONFLICT (id) DO UPDATE
                SET last_ledger_sequence = EXCLUDED.last_ledger_sequence, updated_at = EXCLUDED.updated_at
                WHERE progress.last_ledger_sequence < EXCLUDED.last_ledger_sequence
            "#,
        )
        .bind(last_ledger_sequence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_progress(&self) -> Result<Option<Progress>, RepositoryError> {
        let row = sqlx::query_as::<_, Progress>(
            "SELECT last_ledger_sequence, updated_at FROM progress WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Point query used by services to heal cold in-memory caches (spec
    /// §4.4.3, I2).
    pub async fn contract_exists(&self, contract_id: &str) -> Result<bool, RepositoryError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM deployed_contracts WHERE contract_id = $1")
                .bind(contract_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Every contract ID ever persisted as a Deployed Contract, used to
    /// seed the Tracked-Contract Set at startup and at worker construction
    /// (spec §3 Tracked-Contract Set, §5).
    pub async fn all_deployed_contract_ids(&self) -> Result<Vec<String>, RepositoryError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT contract_id FROM deployed_contracts")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Paginated listing, most-recent first (spec §4.8, §6).
    pub async fn list_contracts(&self, filter: &ContractListFilter) -> Result<Vec<DeployedContract>, RepositoryError> {
        let rows = sqlx::query_as::<_, DeployedContract>(
            r#"
            SELECT contract_id, factory_id, kind, deployer, deployment_ledger, deployment_time,
                   deployment_tx_hash, init_params, cost_cpu_insns, cost_mem_bytes, memo
            FROM deployed_contracts
            WHERE ($1::text IS NULL OR kind = $1)
              AND ($2::text IS NULL OR deployer = $2)
            ORDER BY deployment_ledger DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&filter.kind)
        .bind(&filter.deployer)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn insert_event(tx: &mut Transaction<'_, Postgres>, event: &ContractEvent) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO contract_events
            (contract_id, tx_hash, event_index, event_type, topics, data, ledger_sequence, close_time, success)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (contract_id, tx_hash, event_index) DO NOTHING
        "#,
    )
    .bind(&event.contract_id)
    .bind(&event.tx_hash)
    .bind(event.event_index)
    .bind(&event.event_type)
    .bind(&event.topics)
    .bind(&event.data)
    .bind(event.ledger_sequence)
    .bind(event.close_time)
    .bind(event.success)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_storage_change(tx: &mut Transaction<'_, Postgres>, change: &StorageChange) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO storage_changes
            (contract_id, ledger_sequence, tx_hash, key_raw, key_decoded, value_decoded,
             previous_value_decoded, value_raw, previous_raw, durability, kind, close_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (contract_id, ledger_sequence, key_raw) DO NOTHING
        "#,
    )
    .bind(&change.contract_id)
    .bind(change.ledger_sequence)
    .bind(&change.tx_hash)
    .bind(&change.key_raw)
    .bind(&change.key_decoded)
    .bind(&change.value_decoded)
    .bind(&change.previous_value_decoded)
    .bind(&change.value_raw)
    .bind(&change.previous_raw)
    .bind(&change.durability)
    .bind(&change.kind)
    .bind(change.close_time)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_activity(tx: &mut Transaction<'_, Postgres>, activity: &ContractActivity) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO contract_activities
            (tx_hash, activity_index, contract_id, kind, invoker, function_name, params,
             return_value, success, fee, cost_cpu_insns, cost_mem_bytes, ledger_sequence, close_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (tx_hash, activity_index) DO NOTHING
        "#,
    )
    .bind(&activity.tx_hash)
    .bind(activity.activity_index)
    .bind(&activity.contract_id)
    .bind(&activity.kind)
    .bind(&activity.invoker)
    .bind(&activity.function_name)
    .bind(&activity.params)
    .bind(&activity.return_value)
    .bind(activity.success)
    .bind(activity.fee)
    .bind(activity.cost_cpu_insns)
    .bind(activity.cost_mem_bytes)
    .bind(activity.ledger_sequence)
    .bind(activity.close_time)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_pool_timeout_is_recoverable() {
        let err = RepositoryError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.classify(), ErrorClass::Recoverable);
    }

    #[test]
    fn database_row_not_found_is_fatal() {
        let err = RepositoryError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.classify(), ErrorClass::Fatal);
    }
}
