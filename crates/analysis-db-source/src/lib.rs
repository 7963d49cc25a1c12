//! Database-backed [`Source`]: polls a pending-task table, locks each row
//! with a conditional update before emitting it, and records ack/nack back
//! onto the row's `analysis_status`.
//!
//! Follows the connection idiom used elsewhere in this codebase for
//! PostgreSQL-backed persistence: one long-lived [`Client`] plus a spawned
//! connection-driver task, identifiers validated before interpolation into
//! DDL, and a dedicated `thiserror` error type wrapping `tokio_postgres::Error`.

mod error;

pub use error::DbSourceError;

use analysis_core::config::SourceConfig;
use analysis_core::error::SourceError;
use analysis_core::source::{Source, SourceConstructor};
use analysis_core::task::{AckToken, AnalysisStatus, Priority, ProfilerType, RequestParams, Task, TaskEvent, TaskType};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_TABLE_NAME: &str = "dashflow_analysis_tasks";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_BATCH_SIZE: i64 = 10;
const DEFAULT_PRIORITY_THRESHOLD_MS: u64 = 5_000;

/// Validates a PostgreSQL identifier (table name). Identifiers must start
/// with a letter or underscore, contain only alphanumerics and underscores,
/// and be at most 63 characters — PostgreSQL's own unquoted-identifier limit.
fn validate_identifier(name: &str) -> Result<(), DbSourceError> {
    if name.is_empty() {
        return Err(DbSourceError::InvalidIdentifier("identifier cannot be empty".to_string()));
    }
    if name.len() > 63 {
        return Err(DbSourceError::InvalidIdentifier(format!(
            "identifier '{name}' exceeds maximum length of 63 characters"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().expect("non-empty checked above");
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(DbSourceError::InvalidIdentifier(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }
    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(DbSourceError::InvalidIdentifier(format!(
                "identifier '{name}' contains invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

fn task_type_to_str(t: TaskType) -> &'static str {
    match t {
        TaskType::Generic => "generic",
        TaskType::JavaCpu => "java-cpu",
        TaskType::Tracing => "tracing",
        TaskType::Timing => "timing",
        TaskType::MemLeak => "mem-leak",
        TaskType::PprofMemory => "pprof-memory",
        TaskType::JavaHeap => "java-heap",
    }
}

fn task_type_from_str(s: &str) -> Result<TaskType, DbSourceError> {
    match s {
        "generic" => Ok(TaskType::Generic),
        "java-cpu" => Ok(TaskType::JavaCpu),
        "tracing" => Ok(TaskType::Tracing),
        "timing" => Ok(TaskType::Timing),
        "mem-leak" => Ok(TaskType::MemLeak),
        "pprof-memory" => Ok(TaskType::PprofMemory),
        "java-heap" => Ok(TaskType::JavaHeap),
        other => Err(DbSourceError::RowDecode(format!("unknown task_type '{other}'"))),
    }
}

fn profiler_type_to_str(t: ProfilerType) -> &'static str {
    match t {
        ProfilerType::Perf => "perf",
        ProfilerType::AsyncAlloc => "async-alloc",
        ProfilerType::Pprof => "pprof",
    }
}

fn profiler_type_from_str(s: &str) -> Result<ProfilerType, DbSourceError> {
    match s {
        "perf" => Ok(ProfilerType::Perf),
        "async-alloc" => Ok(ProfilerType::AsyncAlloc),
        "pprof" => Ok(ProfilerType::Pprof),
        other => Err(DbSourceError::RowDecode(format!("unknown profiler_type '{other}'"))),
    }
}

fn analysis_status_to_str(s: AnalysisStatus) -> &'static str {
    match s {
        AnalysisStatus::Pending => "pending",
        AnalysisStatus::Running => "running",
        AnalysisStatus::Completed => "completed",
        AnalysisStatus::Failed => "failed",
    }
}

fn row_to_task(row: &Row) -> Result<Task, DbSourceError> {
    let task_type = task_type_from_str(row.try_get::<_, &str>("task_type").map_err(|e| DbSourceError::RowDecode(e.to_string()))?)?;
    let profiler_type =
        profiler_type_from_str(row.try_get::<_, &str>("profiler_type").map_err(|e| DbSourceError::RowDecode(e.to_string()))?)?;
    let duration_hint_ms: Option<i64> = row.try_get("duration_hint_ms").map_err(|e| DbSourceError::RowDecode(e.to_string()))?;

    Ok(Task {
        id: row.try_get("id").map_err(|e| DbSourceError::RowDecode(e.to_string()))?,
        uuid: row.try_get("uuid").map_err(|e| DbSourceError::RowDecode(e.to_string()))?,
        task_type,
        profiler_type,
        input_reference: row.try_get("input_reference").map_err(|e| DbSourceError::RowDecode(e.to_string()))?,
        parent_uuid: row.try_get("parent_uuid").map_err(|e| DbSourceError::RowDecode(e.to_string()))?,
        request_params: RequestParams {
            duration_hint_ms: duration_hint_ms.map(|v| v.max(0) as u64),
            extra: HashMap::new(),
        },
        created_at: row.try_get("created_at").map_err(|e| DbSourceError::RowDecode(e.to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|e| DbSourceError::RowDecode(e.to_string()))?,
    })
}

/// Connection, table name and polling configuration shared between the
/// source handle and its spawned producer loop.
struct DbInner {
    name: String,
    client: Client,
    table_name: String,
    poll_interval: Duration,
    batch_size: i64,
    priority_threshold_ms: u64,
    event_seq: AtomicU64,
}

impl DbInner {
    async fn initialize_schema(&self) -> Result<(), DbSourceError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                uuid TEXT NOT NULL UNIQUE,
                task_type TEXT NOT NULL,
                profiler_type TEXT NOT NULL,
                input_reference TEXT NOT NULL,
                parent_uuid TEXT,
                duration_hint_ms BIGINT,
                analysis_status TEXT NOT NULL DEFAULT 'pending',
                status_info TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            table = self.table_name
        );
        self.client.batch_execute(&ddl).await.map_err(DbSourceError::Postgres)?;

        let index_ddl = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_pending ON {table} (analysis_status, created_at)",
            table = self.table_name
        );
        self.client.batch_execute(&index_ddl).await.map_err(DbSourceError::Postgres)?;
        Ok(())
    }

    async fn get_pending_tasks(&self, limit: i64) -> Result<Vec<Row>, DbSourceError> {
        let query = format!(
            "SELECT id, uuid, task_type, profiler_type, input_reference, parent_uuid, duration_hint_ms, created_at, updated_at
             FROM {table} WHERE analysis_status = 'pending' ORDER BY created_at ASC LIMIT $1",
            table = self.table_name
        );
        self.client
            .query(&query, &[&limit])
            .await
            .map_err(DbSourceError::Postgres)
    }

    /// Atomic test-and-set: succeeds iff the row was still pending.
    async fn lock_task_for_analysis(&self, id: i64) -> Result<bool, DbSourceError> {
        let query = format!(
            "UPDATE {table} SET analysis_status = 'running', updated_at = now()
             WHERE id = $1 AND analysis_status = 'pending'",
            table = self.table_name
        );
        let rows = self.client.execute(&query, &[&id]).await.map_err(DbSourceError::Postgres)?;
        Ok(rows == 1)
    }

    async fn update_analysis_status(&self, id: i64, status: AnalysisStatus) -> Result<(), DbSourceError> {
        let query = format!(
            "UPDATE {table} SET analysis_status = $2, updated_at = now() WHERE id = $1",
            table = self.table_name
        );
        self.client
            .execute(&query, &[&id, &analysis_status_to_str(status)])
            .await
            .map_err(DbSourceError::Postgres)?;
        Ok(())
    }

    async fn update_analysis_status_with_info(&self, id: i64, status: AnalysisStatus, info: &str) -> Result<(), DbSourceError> {
        let query = format!(
            "UPDATE {table} SET analysis_status = $2, status_info = $3, updated_at = now() WHERE id = $1",
            table = self.table_name
        );
        self.client
            .execute(&query, &[&id, &analysis_status_to_str(status), &info])
            .await
            .map_err(DbSourceError::Postgres)?;
        Ok(())
    }

    fn next_event_id(&self) -> String {
        format!("db:{}:{}", self.name, self.event_seq.fetch_add(1, Ordering::Relaxed))
    }

    async fn poll_once(&self) -> Result<Vec<TaskEvent>, DbSourceError> {
        let rows = self.get_pending_tasks(self.batch_size).await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let task = row_to_task(row)?;
            if !self.lock_task_for_analysis(task.id).await? {
                // Another instance won the race for this row; skip it.
                continue;
            }
            let priority = if task.is_high_priority(self.priority_threshold_ms) {
                Priority::HIGH
            } else {
                Priority::NORMAL
            };
            let mut metadata = HashMap::new();
            metadata.insert("table".to_string(), self.table_name.clone());
            metadata.insert("row_id".to_string(), task.id.to_string());
            metadata.insert("task_type".to_string(), task_type_to_str(task.task_type).to_string());
            metadata.insert("profiler_type".to_string(), profiler_type_to_str(task.profiler_type).to_string());

            events.push(TaskEvent {
                event_id: self.next_event_id(),
                ack_token: AckToken::RowId(task.id),
                task,
                source_type: "database".to_string(),
                source_name: self.name.clone(),
                priority,
                metadata,
            });
        }
        Ok(events)
    }
}

/// Polls a pending-task table, locking and emitting rows as [`TaskEvent`]s.
pub struct DatabaseSource {
    inner: Arc<DbInner>,
    tx: mpsc::Sender<TaskEvent>,
    rx: StdMutex<Option<mpsc::Receiver<TaskEvent>>>,
    stop_token: AsyncMutex<Option<CancellationToken>>,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl DatabaseSource {
    /// Connects to `connection_string`, validates `table_name`, and ensures
    /// the pending-task table and its lookup index exist.
    pub async fn new(
        name: impl Into<String>,
        connection_string: &str,
        table_name: &str,
        poll_interval: Duration,
        batch_size: i64,
        priority_threshold_ms: u64,
    ) -> Result<Self, DbSourceError> {
        validate_identifier(table_name)?;

        info!(connection = connection_string, "connecting to postgres for database source");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| DbSourceError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection error in database source");
            }
        });

        let inner = Arc::new(DbInner {
            name: name.into(),
            client,
            table_name: table_name.to_string(),
            poll_interval,
            batch_size,
            priority_threshold_ms,
            event_seq: AtomicU64::new(0),
        });
        inner.initialize_schema().await?;

        let (tx, rx) = mpsc::channel((batch_size.max(1) as usize) * 2);
        Ok(Self {
            inner,
            tx,
            rx: StdMutex::new(Some(rx)),
            stop_token: AsyncMutex::new(None),
            handle: AsyncMutex::new(None),
        })
    }

    async fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        let connection_string = config.options.require_string("database", "connection_string")?;
        let table_name = config.options.get_string("table_name").unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string());
        let poll_interval = config
            .options
            .get_duration("poll_interval_secs")
            .unwrap_or(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS));
        let batch_size = config.options.get_int("batch_size").unwrap_or(DEFAULT_BATCH_SIZE);
        let priority_threshold_ms = config
            .options
            .get_int("priority_threshold_ms")
            .map(|v| v.max(0) as u64)
            .unwrap_or(DEFAULT_PRIORITY_THRESHOLD_MS);

        Self::new(
            config.name.clone(),
            &connection_string,
            &table_name,
            poll_interval,
            batch_size,
            priority_threshold_ms,
        )
        .await
        .map_err(SourceError::from)
    }

    /// Returns the constructor this type registers under the `"database"`
    /// tag in a [`analysis_core::source::SourceRegistry`].
    #[must_use]
    pub fn constructor() -> SourceConstructor {
        Arc::new(|config: SourceConfig| {
            Box::pin(async move {
                let source = DatabaseSource::from_config(&config).await?;
                Ok(Arc::new(source) as Arc<dyn Source>)
            })
        })
    }
}

async fn run_producer_loop(inner: Arc<DbInner>, tx: mpsc::Sender<TaskEvent>, stop_token: CancellationToken) {
    let mut interval = tokio::time::interval(inner.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = stop_token.cancelled() => {
                debug!(source = inner.name, "database source producer observed stop signal");
                break;
            }
            _ = interval.tick() => {
                match inner.poll_once().await {
                    Ok(events) => {
                        for event in events {
                            if tx.send(event).await.is_err() {
                                debug!(source = inner.name, "database source channel receiver dropped");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(source = inner.name, error = %e, "transient error polling for pending tasks");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Source for DatabaseSource {
    fn source_type(&self) -> &str {
        "database"
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), SourceError> {
        let mut handle_guard = self.handle.lock().await;
        if handle_guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        let stop_token = ctx.child_token();
        *self.stop_token.lock().await = Some(stop_token.clone());
        *handle_guard = Some(tokio::spawn(run_producer_loop(
            Arc::clone(&self.inner),
            self.tx.clone(),
            stop_token,
        )));
        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.stop_token.lock().await.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(source = self.inner.name, error = %e, "database source producer task panicked");
            }
        }
    }

    fn tasks(&self) -> BoxStream<'static, TaskEvent> {
        let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner()).take();
        match rx {
            Some(rx) => ReceiverStream::new(rx).boxed(),
            None => Box::pin(futures::stream::empty()),
        }
    }

    async fn ack(&self, event: &TaskEvent) -> Result<(), SourceError> {
        let AckToken::RowId(id) = &event.ack_token else {
            return Err(SourceError::AckNack(
                "database source received a non-row-id ack token".to_string(),
            ));
        };
        self.inner
            .update_analysis_status(*id, AnalysisStatus::Completed)
            .await
            .map_err(SourceError::from)
    }

    async fn nack(&self, event: &TaskEvent, reason: &str) -> Result<(), SourceError> {
        let AckToken::RowId(id) = &event.ack_token else {
            return Err(SourceError::AckNack(
                "database source received a non-row-id ack token".to_string(),
            ));
        };
        self.inner
            .update_analysis_status_with_info(*id, AnalysisStatus::Failed, reason)
            .await
            .map_err(SourceError::from)
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        self.inner
            .client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| SourceError::Transient(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_identifier_accepts_simple_names() {
        assert!(validate_identifier("dashflow_analysis_tasks").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn validate_identifier_rejects_empty_and_leading_digit() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1tasks").is_err());
    }

    #[test]
    fn validate_identifier_rejects_injection_attempt() {
        assert!(validate_identifier("tasks; DROP TABLE users;--").is_err());
    }

    #[test]
    fn task_type_round_trips_through_its_string_form() {
        for t in [
            TaskType::Generic,
            TaskType::JavaCpu,
            TaskType::Tracing,
            TaskType::Timing,
            TaskType::MemLeak,
            TaskType::PprofMemory,
            TaskType::JavaHeap,
        ] {
            assert_eq!(task_type_from_str(task_type_to_str(t)).unwrap(), t);
        }
    }

    #[test]
    fn profiler_type_round_trips_through_its_string_form() {
        for t in [ProfilerType::Perf, ProfilerType::AsyncAlloc, ProfilerType::Pprof] {
            assert_eq!(profiler_type_from_str(profiler_type_to_str(t)).unwrap(), t);
        }
    }

    #[test]
    fn unknown_task_type_string_is_a_row_decode_error() {
        assert!(matches!(task_type_from_str("bogus"), Err(DbSourceError::RowDecode(_))));
    }
}
