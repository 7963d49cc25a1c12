//! HTTP [`Source`]: accepts task submissions over a POST endpoint and emits
//! one `TaskEvent` per accepted request. Ack is a no-op (the client already
//! received its "accepted" response); nack optionally invokes a
//! caller-supplied callback URL.
//!
//! Grounded on the teacher's API-server idiom: a route under a shared
//! `AppState`, a request-body-size-limit layer, JSON error bodies, and
//! `axum::serve(...).with_graceful_shutdown(...)` driven by a cancellation
//! token.

mod error;

pub use error::WebhookSourceError;

use analysis_core::config::SourceConfig;
use analysis_core::error::SourceError;
use analysis_core::source::{Source, SourceConstructor};
use analysis_core::task::{AckToken, Priority, ProfilerType, RequestParams, Task, TaskEvent, TaskType};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const DEFAULT_PATH: &str = "/v1/tasks";
const DEFAULT_MAX_BODY_BYTES: i64 = 1_048_576;
const DEFAULT_PRIORITY_THRESHOLD_MS: u64 = 5_000;
const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CHANNEL_CAPACITY: i64 = 64;

/// Body of an accepted submission.
#[derive(Debug, Clone, Deserialize)]
struct WebhookSubmission {
    uuid: String,
    task_type: TaskType,
    profiler_type: ProfilerType,
    input_reference: String,
    #[serde(default)]
    parent_uuid: Option<String>,
    #[serde(default)]
    duration_hint_ms: Option<u64>,
    /// Invoked with the failure reason if this task is later nacked.
    #[serde(default)]
    callback_url: Option<String>,
}

impl WebhookSubmission {
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
}

#[derive(Debug, Serialize)]
struct AcceptedResponse {
    status: &'static str,
    request_handle: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct NackCallbackBody<'a> {
    request_handle: &'a str,
    reason: &'a str,
}

struct WebhookInner {
    name: String,
    bind_addr: SocketAddr,
    path: String,
    priority_threshold_ms: u64,
    callback_timeout: Duration,
    http_client: reqwest::Client,
    tx: mpsc::Sender<TaskEvent>,
    pending_callbacks: DashMap<String, Option<String>>,
    next_id: AtomicI64,
}

impl WebhookInner {
    fn next_request_handle(&self) -> (i64, String) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        (id, format!("webhook:{}:{id}", self.name))
    }
}

async fn submit_task(
    State(inner): State<Arc<WebhookInner>>,
    Json(submission): Json<WebhookSubmission>,
) -> Result<(StatusCode, Json<AcceptedResponse>), (StatusCode, Json<ErrorBody>)> {
    let (id, request_handle) = inner.next_request_handle();
    let callback_url = submission.callback_url.clone();
    let task = submission.into_task(id);
    let priority = if task.is_high_priority(inner.priority_threshold_ms) {
        Priority::HIGH
    } else {
        Priority::NORMAL
    };

    let mut metadata = HashMap::new();
    metadata.insert("request_handle".to_string(), request_handle.clone());

    let event = TaskEvent {
        event_id: request_handle.clone(),
        task,
        source_type: "webhook".to_string(),
        source_name: inner.name.clone(),
        priority,
        metadata,
        ack_token: AckToken::RequestHandle(request_handle.clone()),
    };

    inner.pending_callbacks.insert(request_handle.clone(), callback_url);

    if inner.tx.send(event).await.is_err() {
        inner.pending_callbacks.remove(&request_handle);
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                error: "webhook source is shutting down".to_string(),
            }),
        ));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted",
            request_handle,
        }),
    ))
}

fn build_router(inner: Arc<WebhookInner>, max_body_bytes: usize) -> Router {
    Router::new()
        .route(inner.path.as_str(), post(submit_task))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(inner)
}

/// Accepts task submissions over HTTP.
pub struct WebhookSource {
    inner: Arc<WebhookInner>,
    rx: StdMutex<Option<mpsc::Receiver<TaskEvent>>>,
    max_body_bytes: usize,
    stop_token: AsyncMutex<Option<CancellationToken>>,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl WebhookSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        bind_addr: SocketAddr,
        path: impl Into<String>,
        max_body_bytes: usize,
        priority_threshold_ms: u64,
        callback_timeout: Duration,
        channel_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let inner = Arc::new(WebhookInner {
            name: name.into(),
            bind_addr,
            path: path.into(),
            priority_threshold_ms,
            callback_timeout,
            http_client: reqwest::Client::new(),
            tx,
            pending_callbacks: DashMap::new(),
            next_id: AtomicI64::new(1),
        });
        Self {
            inner,
            rx: StdMutex::new(Some(rx)),
            max_body_bytes,
            stop_token: AsyncMutex::new(None),
            handle: AsyncMutex::new(None),
        }
    }

    async fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        let bind_addr_str = config.options.require_string("webhook", "bind_addr")?;
        let bind_addr: SocketAddr = bind_addr_str
            .parse()
            .map_err(|_| WebhookSourceError::InvalidBindAddr(bind_addr_str.clone()))?;
        let path = config.options.get_string("path").unwrap_or_else(|| DEFAULT_PATH.to_string());
        let max_body_bytes = config.options.get_int("max_body_bytes").unwrap_or(DEFAULT_MAX_BODY_BYTES).max(1) as usize;
        let priority_threshold_ms = config
            .options
            .get_int("priority_threshold_ms")
            .map(|v| v.max(0) as u64)
            .unwrap_or(DEFAULT_PRIORITY_THRESHOLD_MS);
        let callback_timeout = config
            .options
            .get_duration("callback_timeout_secs")
            .unwrap_or(Duration::from_secs(DEFAULT_CALLBACK_TIMEOUT_SECS));
        let channel_capacity = config.options.get_int("channel_capacity").unwrap_or(DEFAULT_CHANNEL_CAPACITY).max(1) as usize;

        Ok(Self::new(
            config.name.clone(),
            bind_addr,
            path,
            max_body_bytes,
            priority_threshold_ms,
            callback_timeout,
            channel_capacity,
        ))
    }

    /// Returns the constructor this type registers under the `"webhook"` tag
    /// in a [`analysis_core::source::SourceRegistry`].
    #[must_use]
    pub fn constructor() -> SourceConstructor {
        Arc::new(|config: SourceConfig| Box::pin(async move {
            let source = WebhookSource::from_config(&config).await?;
            Ok(Arc::new(source) as Arc<dyn Source>)
        }))
    }
}

#[async_trait]
impl Source for WebhookSource {
    fn source_type(&self) -> &str {
        "webhook"
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), SourceError> {
        let mut handle_guard = self.handle.lock().await;
        if handle_guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let listener = TcpListener::bind(self.inner.bind_addr)
            .await
            .map_err(WebhookSourceError::Bind)
            .map_err(SourceError::from)?;

        let stop_token = ctx.child_token();
        *self.stop_token.lock().await = Some(stop_token.clone());

        let router = build_router(Arc::clone(&self.inner), self.max_body_bytes);
        let name = self.inner.name.clone();
        let shutdown = stop_token.clone();
        *handle_guard = Some(tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(source = name, error = %e, "webhook source server exited with an error");
            }
        }));
        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.stop_token.lock().await.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(source = self.inner.name, error = %e, "webhook source server task panicked");
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
        let AckToken::RequestHandle(handle) = &event.ack_token else {
            return Err(SourceError::AckNack("webhook source received a non-request-handle ack token".to_string()));
        };
        self.inner.pending_callbacks.remove(handle);
        Ok(())
    }

    async fn nack(&self, event: &TaskEvent, reason: &str) -> Result<(), SourceError> {
        let AckToken::RequestHandle(handle) = &event.ack_token else {
            return Err(SourceError::AckNack("webhook source received a non-request-handle ack token".to_string()));
        };
        let Some((_, callback_url)) = self.inner.pending_callbacks.remove(handle) else {
            return Ok(());
        };
        let Some(callback_url) = callback_url else {
            debug!(source = self.inner.name, handle, "nacked webhook task carried no callback url");
            return Ok(());
        };

        let body = NackCallbackBody { request_handle: handle, reason };
        let result = self
            .inner
            .http_client
            .post(&callback_url)
            .timeout(self.inner.callback_timeout)
            .json(&body)
            .send()
            .await;
        if let Err(e) = result {
            warn!(source = self.inner.name, callback_url, error = %e, "failed to deliver nack callback");
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        let finished = self.handle.lock().await.as_ref().is_some_and(JoinHandle::is_finished);
        if finished {
            return Err(SourceError::Transient("webhook server task is no longer running".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_submission_into_task_preserves_fields() {
        let submission = WebhookSubmission {
            uuid: "U1".to_string(),
            task_type: TaskType::Tracing,
            profiler_type: ProfilerType::AsyncAlloc,
            input_reference: "raw/U1.pb".to_string(),
            parent_uuid: Some("M1".to_string()),
            duration_hint_ms: Some(250),
            callback_url: Some("https://example.test/hook".to_string()),
        };
        let task = submission.into_task(7);
        assert_eq!(task.id, 7);
        assert_eq!(task.uuid, "U1");
        assert_eq!(task.parent_uuid.as_deref(), Some("M1"));
        assert_eq!(task.request_params.duration_hint_ms, Some(250));
    }

    #[test]
    fn webhook_submission_rejects_unknown_profiler_type() {
        let json = r#"{"uuid":"U1","task_type":"generic","profiler_type":"not-real","input_reference":"x"}"#;
        assert!(serde_json::from_str::<WebhookSubmission>(json).is_err());
    }

    #[test]
    fn next_request_handle_is_monotonic_and_scoped_to_the_source_name() {
        let (tx, _rx) = mpsc::channel(1);
        let inner = WebhookInner {
            name: "primary".to_string(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            path: DEFAULT_PATH.to_string(),
            priority_threshold_ms: DEFAULT_PRIORITY_THRESHOLD_MS,
            callback_timeout: Duration::from_secs(DEFAULT_CALLBACK_TIMEOUT_SECS),
            http_client: reqwest::Client::new(),
            tx,
            pending_callbacks: DashMap::new(),
            next_id: AtomicI64::new(1),
        };
        let (id_a, handle_a) = inner.next_request_handle();
        let (id_b, handle_b) = inner.next_request_handle();
        assert_eq!(id_a + 1, id_b);
        assert_ne!(handle_a, handle_b);
        assert!(handle_a.starts_with("webhook:primary:"));
    }
}
