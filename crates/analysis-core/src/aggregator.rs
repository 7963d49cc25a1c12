//! Fans N heterogeneous [`Source`]s into a single event stream and routes
//! ack/nack back to the originating source (spec §4.3).

use crate::error::SourceError;
use crate::source::Source;
use crate::task::TaskEvent;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type RoutingKey = (String, String);

/// Owns one output stream and one forwarder task per configured source.
pub struct SourceAggregator {
    sources: Vec<Arc<dyn Source>>,
    buffer_size: usize,
    by_key: DashMap<RoutingKey, Arc<dyn Source>>,
    forwarders: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    stop_token: CancellationToken,
}

impl SourceAggregator {
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn Source>>, buffer_size: usize) -> Self {
        let by_key = DashMap::new();
        for source in &sources {
            by_key.insert(
                (source.source_type().to_string(), source.name().to_string()),
                Arc::clone(source),
            );
        }
        Self {
            sources,
            buffer_size,
            by_key,
            forwarders: tokio::sync::Mutex::new(Vec::new()),
            stop_token: CancellationToken::new(),
        }
    }

    /// Starts all sources in configured order. If any `start` fails, stops
    /// the sources already started and returns the error (fail-fast on
    /// boot). Returns the aggregated stream on success.
    pub async fn start(&self, ctx: CancellationToken) -> Result<BoxStream<'static, TaskEvent>, SourceError> {
        let mut started = Vec::new();
        for source in &self.sources {
            let child = ctx.child_token();
            if let Err(err) = source.start(child).await {
                error!(
                    source_type = source.source_type(),
                    source_name = source.name(),
                    error = %err,
                    "source failed to start; stopping sources already started"
                );
                for started_source in started {
                    let started_source: &Arc<dyn Source> = started_source;
                    started_source.stop().await;
                }
                return Err(err);
            }
            started.push(source);
        }

        let (tx, rx) = mpsc::channel(self.buffer_size);
        let mut handles = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let source = Arc::clone(source);
            let tx = tx.clone();
            let stop_token = self.stop_token.clone();
            handles.push(tokio::spawn(forward(source, tx, stop_token)));
        }
        drop(tx);
        *self.forwarders.lock().await = handles;

        info!(sources = self.sources.len(), "aggregator started");
        Ok(ReceiverStream::new(rx).boxed())
    }

    /// Signals all forwarders to exit, stops each source, waits for the
    /// forwarders to complete, implicitly closing the aggregated stream.
    pub async fn stop(&self) {
        self.stop_token.cancel();
        for source in &self.sources {
            source.stop().await;
        }
        let handles = std::mem::take(&mut *self.forwarders.lock().await);
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "forwarder task panicked during shutdown");
            }
        }
        info!("aggregator stopped");
    }

    /// Routes `ack` to the source named by the event's routing key. Events
    /// whose source is no longer present are treated as no-ops.
    pub async fn ack(&self, event: &TaskEvent) -> Result<(), SourceError> {
        let key = event.routing_key();
        match self.by_key.get(&key) {
            Some(source) => source.ack(event).await,
            None => {
                debug!(?key, "ack for event with no live source; ignoring");
                Ok(())
            }
        }
    }

    /// Routes `nack` to the source named by the event's routing key.
    pub async fn nack(&self, event: &TaskEvent, reason: &str) -> Result<(), SourceError> {
        let key = event.routing_key();
        match self.by_key.get(&key) {
            Some(source) => source.nack(event, reason).await,
            None => {
                debug!(?key, reason, "nack for event with no live source; ignoring");
                Ok(())
            }
        }
    }

    /// Returns the first error observed across all sources' health checks.
    pub async fn health_check(&self) -> Result<(), SourceError> {
        for source in &self.sources {
            source.health_check().await?;
        }
        Ok(())
    }

    /// The configured sources, in start order. Used by the observability
    /// layer to poll per-source health independently of the aggregate
    /// [`SourceAggregator::health_check`].
    #[must_use]
    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }
}

async fn forward(source: Arc<dyn Source>, tx: mpsc::Sender<TaskEvent>, stop_token: CancellationToken) {
    let source_type = source.source_type().to_string();
    let source_name = source.name().to_string();
    let mut stream = source.tasks();
    loop {
        tokio::select! {
            biased;
            () = stop_token.cancelled() => {
                debug!(source_type, source_name, "forwarder observed stop signal");
                break;
            }
            next = stream.next() => {
                match next {
                    Some(mut event) => {
                        // Stamp the routing key, overriding whatever the source set,
                        // so acks return to the correct instance even if two sources
                        // share a type tag.
                        event.source_type = source_type.clone();
                        event.source_name = source_name.clone();
                        if tx.send(event).await.is_err() {
                            debug!(source_type, source_name, "aggregated stream receiver dropped");
                            break;
                        }
                    }
                    None => {
                        debug!(source_type, source_name, "source stream ended");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_testing::FakeSource;
    use futures::StreamExt;

    #[tokio::test]
    async fn events_are_stamped_with_routing_key_and_forwarded() {
        let source = Arc::new(FakeSource::new("database", "primary"));
        source.push_pending_task("U1");
        let aggregator = SourceAggregator::new(vec![source.clone()], 8);

        let mut stream = aggregator.start(CancellationToken::new()).await.unwrap();
        let event = stream.next().await.expect("one event forwarded");
        assert_eq!(event.source_type, "database");
        assert_eq!(event.source_name, "primary");

        aggregator.stop().await;
    }

    #[tokio::test]
    async fn ack_routes_to_originating_source() {
        let source = Arc::new(FakeSource::new("database", "primary"));
        source.push_pending_task("U1");
        let aggregator = SourceAggregator::new(vec![source.clone()], 8);
        let mut stream = aggregator.start(CancellationToken::new()).await.unwrap();
        let event = stream.next().await.unwrap();

        aggregator.ack(&event).await.unwrap();
        assert_eq!(source.acked_count(), 1);

        aggregator.stop().await;
    }

    #[tokio::test]
    async fn ack_for_unknown_source_is_a_noop() {
        let source = Arc::new(FakeSource::new("database", "primary"));
        source.push_pending_task("U1");
        let aggregator = SourceAggregator::new(vec![source.clone()], 8);
        let mut stream = aggregator.start(CancellationToken::new()).await.unwrap();
        let mut event = stream.next().await.unwrap();
        event.source_name = "ghost".to_string();

        // Should not error even though no source is registered under "ghost".
        aggregator.ack(&event).await.unwrap();
        assert_eq!(source.acked_count(), 0);

        aggregator.stop().await;
    }

    #[tokio::test]
    async fn failing_start_stops_already_started_sources() {
        let good = Arc::new(FakeSource::new("database", "good"));
        let bad = Arc::new(FakeSource::new("database", "bad"));
        bad.fail_next_start("misconfigured");
        let aggregator = SourceAggregator::new(vec![good.clone(), bad.clone()], 8);

        let err = aggregator.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::Fatal(_)));
        assert!(good.was_stopped());
    }
}
