//! PostgreSQL-backed [`ResultStore`] (spec C8).
//!
//! Follows the connection idiom used elsewhere in this codebase for
//! PostgreSQL-backed persistence: one long-lived [`Client`] plus a spawned
//! connection-driver task (see `analysis-db-source`). Aggregate completeness
//! (`check_and_complete_if_ready`) is derived by comparing the number of
//! sub-task advice groups recorded here against the number of rows in the
//! shared tasks table whose `parent_uuid` names the aggregate — the same
//! table `analysis-db-source` populates.

mod error;

pub use error::ResultStoreError;

use analysis_core::analysis::{AdviceGroup, AggregateStatus, ResourceType, RuleTargetType, Suggestion, SuggestionRule, TaskResult};
use analysis_core::processor::ResultStore;
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

fn resource_type_to_str(t: ResourceType) -> &'static str {
    match t {
        ResourceType::Cpu => "cpu",
        ResourceType::App => "app",
        ResourceType::Disk => "disk",
        ResourceType::Memory => "memory",
    }
}

fn target_type_to_str(t: RuleTargetType) -> &'static str {
    match t {
        RuleTargetType::CpuHotness => "cpu-hotness",
        RuleTargetType::GcOverhead => "gc-overhead",
        RuleTargetType::LockContention => "lock-contention",
        RuleTargetType::Reflection => "reflection",
        RuleTargetType::FrequentAllocation => "frequent-allocation",
    }
}

fn target_type_from_str(s: &str) -> Result<RuleTargetType, ResultStoreError> {
    match s {
        "cpu-hotness" => Ok(RuleTargetType::CpuHotness),
        "gc-overhead" => Ok(RuleTargetType::GcOverhead),
        "lock-contention" => Ok(RuleTargetType::LockContention),
        "reflection" => Ok(RuleTargetType::Reflection),
        "frequent-allocation" => Ok(RuleTargetType::FrequentAllocation),
        other => Err(ResultStoreError::Connection(format!("unknown rule target_type '{other}'"))),
    }
}

fn status_to_str(s: AggregateStatus) -> &'static str {
    match s {
        AggregateStatus::Running => "running",
        AggregateStatus::Completed => "completed",
    }
}

pub struct PostgresResultStore {
    client: Client,
    prefix: String,
    tasks_table: String,
}

impl PostgresResultStore {
    /// Connects to `connection_string`, creates `{prefix}_*` tables if absent,
    /// and spawns the connection driver task.
    pub async fn connect(connection_string: &str, prefix: &str, tasks_table: &str) -> Result<Self, ResultStoreError> {
        info!(connection = connection_string, "connecting to postgres for result store");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection error in result store");
            }
        });

        let store = Self {
            client,
            prefix: prefix.to_string(),
            tasks_table: tasks_table.to_string(),
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<(), ResultStoreError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {prefix}_results (
                task_uuid TEXT PRIMARY KEY,
                payload JSONB NOT NULL,
                version INT NOT NULL,
                containers_info JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE TABLE IF NOT EXISTS {prefix}_advice (
                task_uuid TEXT PRIMARY KEY,
                suggestions JSONB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {prefix}_rules (
                target TEXT PRIMARY KEY,
                target_type TEXT NOT NULL,
                threshold DOUBLE PRECISION NOT NULL,
                content_template TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {prefix}_aggregate_groups (
                aggregate_uuid TEXT NOT NULL,
                task_uuid TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                suggestions JSONB NOT NULL,
                PRIMARY KEY (aggregate_uuid, task_uuid)
            );
            CREATE TABLE IF NOT EXISTS {prefix}_aggregate_status (
                aggregate_uuid TEXT PRIMARY KEY,
                status TEXT NOT NULL
            );",
            prefix = self.prefix
        );
        self.client.batch_execute(&ddl).await?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    async fn save_result(&self, result: &TaskResult) -> anyhow::Result<()> {
        let payload = serde_json::to_value(&result.payload).map_err(|source| ResultStoreError::Serialize {
            task_uuid: result.task_uuid.clone(),
            source,
        })?;
        let query = format!(
            "INSERT INTO {prefix}_results (task_uuid, payload, version, containers_info)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (task_uuid) DO UPDATE
             SET payload = excluded.payload, version = excluded.version, containers_info = excluded.containers_info",
            prefix = self.prefix
        );
        self.client
            .execute(
                &query,
                &[&result.task_uuid, &payload, &i32::try_from(result.version).unwrap_or(i32::MAX), &result.containers_info],
            )
            .await
            .map_err(ResultStoreError::from)?;
        Ok(())
    }

    async fn save_suggestions(&self, task_uuid: &str, suggestions: &[Suggestion]) -> anyhow::Result<()> {
        let value = serde_json::to_value(suggestions).map_err(|source| ResultStoreError::Serialize {
            task_uuid: task_uuid.to_string(),
            source,
        })?;
        let query = format!(
            "INSERT INTO {prefix}_advice (task_uuid, suggestions)
             VALUES ($1, $2)
             ON CONFLICT (task_uuid) DO UPDATE SET suggestions = excluded.suggestions",
            prefix = self.prefix
        );
        self.client.execute(&query, &[&task_uuid, &value]).await.map_err(ResultStoreError::from)?;
        Ok(())
    }

    async fn get_rules(&self) -> anyhow::Result<Vec<SuggestionRule>> {
        let query = format!(
            "SELECT target, target_type, threshold, content_template FROM {prefix}_rules",
            prefix = self.prefix
        );
        let rows = self.client.query(&query, &[]).await.map_err(ResultStoreError::from)?;
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let target: String = row.try_get("target").map_err(ResultStoreError::from)?;
            let target_type_str: String = row.try_get("target_type").map_err(ResultStoreError::from)?;
            let threshold: f64 = row.try_get("threshold").map_err(ResultStoreError::from)?;
            let content_template: String = row.try_get("content_template").map_err(ResultStoreError::from)?;
            rules.push(SuggestionRule {
                target,
                target_type: target_type_from_str(&target_type_str)?,
                threshold,
                content_template,
            });
        }
        Ok(rules)
    }

    async fn update_suggestions(&self, aggregate_uuid: &str, group: AdviceGroup) -> anyhow::Result<()> {
        let suggestions = serde_json::to_value(&group.suggestions).map_err(|source| ResultStoreError::Serialize {
            task_uuid: group.task_uuid.clone(),
            source,
        })?;
        let query = format!(
            "INSERT INTO {prefix}_aggregate_groups (aggregate_uuid, task_uuid, resource_type, suggestions)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (aggregate_uuid, task_uuid) DO UPDATE
             SET resource_type = excluded.resource_type, suggestions = excluded.suggestions",
            prefix = self.prefix
        );
        self.client
            .execute(
                &query,
                &[&aggregate_uuid, &group.task_uuid, &resource_type_to_str(group.resource_type), &suggestions],
            )
            .await
            .map_err(ResultStoreError::from)?;
        Ok(())
    }

    async fn check_and_complete_if_ready(&self, aggregate_uuid: &str) -> anyhow::Result<AggregateStatus> {
        let completed_query = format!(
            "SELECT COUNT(*) FROM {prefix}_aggregate_groups WHERE aggregate_uuid = $1",
            prefix = self.prefix
        );
        let completed_row = self
            .client
            .query_one(&completed_query, &[&aggregate_uuid])
            .await
            .map_err(ResultStoreError::from)?;
        let completed: i64 = completed_row.try_get(0).map_err(ResultStoreError::from)?;

        let total_query = format!("SELECT COUNT(*) FROM {table} WHERE parent_uuid = $1", table = self.tasks_table);
        let total_row = self
            .client
            .query_one(&total_query, &[&aggregate_uuid])
            .await
            .map_err(ResultStoreError::from)?;
        let total: i64 = total_row.try_get(0).map_err(ResultStoreError::from)?;

        let status = if total > 0 && completed >= total {
            AggregateStatus::Completed
        } else {
            AggregateStatus::Running
        };

        let upsert = format!(
            "INSERT INTO {prefix}_aggregate_status (aggregate_uuid, status)
             VALUES ($1, $2)
             ON CONFLICT (aggregate_uuid) DO UPDATE SET status = excluded.status",
            prefix = self.prefix
        );
        self.client
            .execute(&upsert, &[&aggregate_uuid, &status_to_str(status)])
            .await
            .map_err(ResultStoreError::from)?;

        Ok(status)
    }
}
