//! Kafka-backed [`Source`]: consumes task submissions from a topic under a
//! consumer-group discipline, acking by storing/committing the consumed
//! offset and nacking by routing the submission to a dead-letter topic.
//!
//! Follows the teacher's `StreamConsumer` + manual offset-store idiom
//! (`enable.auto.offset.store = false`, explicit `store_offset` once a
//! message has been fully handled) and its `FutureProducer`-driven
//! dead-letter path.

mod error;

pub use error::BusSourceError;

use analysis_core::config::SourceConfig;
use analysis_core::error::SourceError;
use analysis_core::source::{Source, SourceConstructor};
use analysis_core::task::{AckToken, Priority, ProfilerType, RequestParams, Task, TaskEvent, TaskType};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::message::Message;
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const DEFAULT_GROUP_ID: &str = "dashflow-analysis";
const DEFAULT_PRIORITY_THRESHOLD_MS: u64 = 5_000;
const DEFAULT_PRODUCE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SESSION_TIMEOUT_MS: &str = "30000";

/// Wire format of one task submission as it arrives on the topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskSubmission {
    uuid: String,
    task_type: TaskType,
    profiler_type: ProfilerType,
    input_reference: String,
    #[serde(default)]
    parent_uuid: Option<String>,
    #[serde(default)]
    duration_hint_ms: Option<u64>,
}

impl TaskSubmission {
    fn into_task(self, id: i64) -> Task {
        let now = SystemTime::now();
        Task {
            id,
            uuid: self.uuid,
            task_type: self.task_type,
            profiler_type: self.profiler_type,
            input_reference: self.input_reference,
            parent_uuid: self.parent_uuid,
            request_params: RequestParams {
                duration_hint_ms: self.duration_hint_ms,
                extra: HashMap::new(),
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn from_task(task: &Task) -> Self {
        Self {
            uuid: task.uuid.clone(),
            task_type: task.task_type,
            profiler_type: task.profiler_type,
            input_reference: task.input_reference.clone(),
            parent_uuid: task.parent_uuid.clone(),
            duration_hint_ms: task.request_params.duration_hint_ms,
        }
    }
}

/// Record written to the dead-letter topic, carrying enough context to
/// replay or diagnose the original submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DlqRecord {
    original_payload: String,
    reason: String,
    source_topic: String,
    source_partition: i32,
    source_offset: i64,
}

struct BusInner {
    name: String,
    consumer: Arc<StreamConsumer>,
    producer: FutureProducer,
    topic: String,
    dlq_topic: String,
    priority_threshold_ms: u64,
    produce_timeout: Duration,
}

async fn send_to_dlq(inner: &BusInner, source_topic: &str, partition: i32, offset: i64, payload: &[u8], reason: &str) {
    let record = DlqRecord {
        original_payload: String::from_utf8_lossy(payload).to_string(),
        reason: reason.to_string(),
        source_topic: source_topic.to_string(),
        source_partition: partition,
        source_offset: offset,
    };
    let json = match serde_json::to_string(&record) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "failed to serialize dead-letter record");
            return;
        }
    };
    let kafka_record = FutureRecord::to(&inner.dlq_topic).payload(&json).key(source_topic);
    if let Err((e, _)) = inner.producer.send(kafka_record, Timeout::After(inner.produce_timeout)).await {
        error!(error = %e, topic = inner.dlq_topic, "failed to send message to dead-letter topic");
    }
}

async fn run_consumer_loop(inner: Arc<BusInner>, tx: mpsc::Sender<TaskEvent>, stop_token: CancellationToken) {
    let mut seq: u64 = 0;
    loop {
        tokio::select! {
            biased;
            () = stop_token.cancelled() => {
                debug!(source = inner.name, "message-bus source producer observed stop signal");
                break;
            }
            recv_result = inner.consumer.recv() => {
                match recv_result {
                    Ok(message) => {
                        let partition = message.partition();
                        let offset = message.offset();
                        let topic = message.topic().to_string();
                        let payload = message.payload().map(<[u8]>::to_vec);
                        drop(message);

                        match payload {
                            None => {
                                warn!(source = inner.name, partition, offset, "message with empty payload; skipping");
                                if let Err(e) = inner.consumer.store_offset(&topic, partition, offset) {
                                    error!(error = %e, "failed to store offset for empty payload");
                                }
                            }
                            Some(bytes) => match serde_json::from_slice::<TaskSubmission>(&bytes) {
                                Ok(submission) => {
                                    seq += 1;
                                    let task = submission.into_task(offset);
                                    let priority = if task.is_high_priority(inner.priority_threshold_ms) {
                                        Priority::HIGH
                                    } else {
                                        Priority::NORMAL
                                    };
                                    let mut metadata = HashMap::new();
                                    metadata.insert("topic".to_string(), topic.clone());
                                    metadata.insert("partition".to_string(), partition.to_string());
                                    metadata.insert("offset".to_string(), offset.to_string());

                                    let event = TaskEvent {
                                        event_id: format!("bus:{}:{offset}:{seq}", inner.name),
                                        task,
                                        source_type: "message-bus".to_string(),
                                        source_name: inner.name.clone(),
                                        priority,
                                        metadata,
                                        ack_token: AckToken::Offset { partition, offset },
                                    };
                                    if tx.send(event).await.is_err() {
                                        debug!(source = inner.name, "message-bus channel receiver dropped");
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!(source = inner.name, error = %e, "failed to decode task submission; routing to dead-letter topic");
                                    send_to_dlq(&inner, &topic, partition, offset, &bytes, &format!("decode error: {e}")).await;
                                    if let Err(e) = inner.consumer.store_offset(&topic, partition, offset) {
                                        error!(error = %e, "failed to store offset after dead-lettering");
                                    }
                                }
                            },
                        }
                    }
                    Err(e) => {
                        warn!(source = inner.name, error = %e, "transient kafka consumer error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Consumes task submissions from a Kafka topic.
pub struct MessageBusSource {
    inner: Arc<BusInner>,
    tx: mpsc::Sender<TaskEvent>,
    rx: StdMutex<Option<mpsc::Receiver<TaskEvent>>>,
    stop_token: AsyncMutex<Option<CancellationToken>>,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl MessageBusSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        brokers: &str,
        topic: &str,
        group_id: &str,
        dlq_topic: &str,
        priority_threshold_ms: u64,
        produce_timeout: Duration,
        channel_capacity: usize,
    ) -> Result<Self, BusSourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", DEFAULT_SESSION_TIMEOUT_MS)
            .create()?;
        consumer.subscribe(&[topic])?;

        let producer: FutureProducer = ClientConfig::new().set("bootstrap.servers", brokers).create()?;

        let inner = Arc::new(BusInner {
            name: name.into(),
            consumer: Arc::new(consumer),
            producer,
            topic: topic.to_string(),
            dlq_topic: dlq_topic.to_string(),
            priority_threshold_ms,
            produce_timeout,
        });

        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        Ok(Self {
            inner,
            tx,
            rx: StdMutex::new(Some(rx)),
            stop_token: AsyncMutex::new(None),
            handle: AsyncMutex::new(None),
        })
    }

    async fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        let brokers = config.options.require_string("message-bus", "brokers")?;
        let topic = config.options.require_string("message-bus", "topic")?;
        let group_id = config.options.get_string("group_id").unwrap_or_else(|| DEFAULT_GROUP_ID.to_string());
        let dlq_topic = config.options.get_string("dlq_topic").unwrap_or_else(|| format!("{topic}-dlq"));
        let priority_threshold_ms = config
            .options
            .get_int("priority_threshold_ms")
            .map(|v| v.max(0) as u64)
            .unwrap_or(DEFAULT_PRIORITY_THRESHOLD_MS);
        let produce_timeout = config
            .options
            .get_duration("produce_timeout_secs")
            .unwrap_or(Duration::from_secs(DEFAULT_PRODUCE_TIMEOUT_SECS));
        let channel_capacity = config.options.get_int("channel_capacity").unwrap_or(64).max(1) as usize;

        Self::new(
            config.name.clone(),
            &brokers,
            &topic,
            &group_id,
            &dlq_topic,
            priority_threshold_ms,
            produce_timeout,
            channel_capacity,
        )
        .map_err(SourceError::from)
    }

    /// Returns the constructor this type registers under the
    /// `"message-bus"` tag in a [`analysis_core::source::SourceRegistry`].
    #[must_use]
    pub fn constructor() -> SourceConstructor {
        Arc::new(|config: SourceConfig| Box::pin(async move {
            let source = MessageBusSource::from_config(&config).await?;
            Ok(Arc::new(source) as Arc<dyn Source>)
        }))
    }
}

#[async_trait]
impl Source for MessageBusSource {
    fn source_type(&self) -> &str {
        "message-bus"
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
        *handle_guard = Some(tokio::spawn(run_consumer_loop(Arc::clone(&self.inner), self.tx.clone(), stop_token)));
        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.stop_token.lock().await.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(source = self.inner.name, error = %e, "message-bus source producer task panicked");
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
        let AckToken::Offset { partition, offset } = &event.ack_token else {
            return Err(SourceError::AckNack("message-bus source received a non-offset ack token".to_string()));
        };
        self.inner
            .consumer
            .store_offset(&self.inner.topic, *partition, *offset)
            .map_err(|e| SourceError::AckNack(e.to_string()))
    }

    async fn nack(&self, event: &TaskEvent, reason: &str) -> Result<(), SourceError> {
        let AckToken::Offset { partition, offset } = &event.ack_token else {
            return Err(SourceError::AckNack("message-bus source received a non-offset ack token".to_string()));
        };
        let payload = serde_json::to_vec(&TaskSubmission::from_task(&event.task)).unwrap_or_default();
        send_to_dlq(&self.inner, &self.inner.topic, *partition, *offset, &payload, reason).await;
        self.inner
            .consumer
            .store_offset(&self.inner.topic, *partition, *offset)
            .map_err(|e| SourceError::AckNack(e.to_string()))
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        let consumer = Arc::clone(&self.inner.consumer);
        let topic = self.inner.topic.clone();
        tokio::task::spawn_blocking(move || consumer.fetch_metadata(Some(&topic), Duration::from_secs(5)))
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))?
            .map(|_| ())
            .map_err(|e| SourceError::Transient(e.to_string()))
    }
}
