use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use metrics::counter;
use railfeed_common::health::HealthHandle;
use railfeed_common::normalize::decode;
use railfeed_common::sink::RowSink;
use railfeed_common::topics::TopicDescriptor;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, TransportError};
use crate::stomp::{broker_error, FeedEvent};

const METRIC_MESSAGES_RECEIVED: &str = "railfeed_messages_received_total";
const METRIC_ROWS_WRITTEN: &str = "railfeed_rows_written_total";
const METRIC_MALFORMED_MESSAGES: &str = "railfeed_malformed_messages_total";
const METRIC_SINK_ERRORS: &str = "railfeed_sink_errors_total";
const METRIC_TRANSPORT_ERRORS: &str = "railfeed_transport_errors_total";

const MIN_LIVENESS_INTERVAL: Duration = Duration::from_millis(1);

/// Turns delivered messages into rows for one topic, one message at a time.
pub struct Dispatcher {
    descriptor: TopicDescriptor,
    sink: Arc<dyn RowSink>,
    liveness: HealthHandle,
    liveness_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        descriptor: TopicDescriptor,
        sink: Arc<dyn RowSink>,
        liveness: HealthHandle,
        liveness_interval: Duration,
    ) -> Self {
        Self {
            descriptor,
            sink,
            liveness,
            liveness_interval: liveness_interval.max(MIN_LIVENESS_INTERVAL),
        }
    }

    /// Normalize one message body and write its rows in order. Returns the number of rows
    /// written. A malformed message writes nothing; a failing write stops at that row.
    pub async fn dispatch(&self, body: &[u8]) -> Result<usize, DispatchError> {
        let message = decode(body)?;
        let rows = self
            .descriptor
            .topic
            .normalizer()
            .normalize(&message, &self.descriptor.schema)?;

        let mut written = 0;
        for row in rows {
            self.sink.write(row).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Handle one event. Nothing that happens here ends the session.
    pub async fn handle_event(&self, event: FeedEvent) {
        let topic = self.descriptor.topic.id();

        match event {
            FeedEvent::Message(frame) => {
                counter!(METRIC_MESSAGES_RECEIVED, "topic" => topic).increment(1);

                match self.dispatch(&frame.body).await {
                    Ok(rows) => {
                        counter!(METRIC_ROWS_WRITTEN, "topic" => topic).increment(rows as u64);
                        debug!(
                            topic,
                            rows,
                            message_id = frame.header("message-id").unwrap_or_default(),
                            "message handled"
                        );
                    }
                    Err(DispatchError::Malformed(e)) => {
                        counter!(METRIC_MALFORMED_MESSAGES, "topic" => topic).increment(1);
                        warn!(
                            topic,
                            message_id = frame.header("message-id").unwrap_or_default(),
                            "skipping message: {}",
                            e
                        );
                    }
                    Err(DispatchError::Sink(e)) => {
                        counter!(METRIC_SINK_ERRORS, "topic" => topic).increment(1);
                        error!(topic, "failed to store message rows: {}", e);
                    }
                }
            }
            FeedEvent::Error(frame) => {
                counter!(METRIC_TRANSPORT_ERRORS, "topic" => topic).increment(1);
                warn!(topic, "{}", broker_error(&frame));
            }
        }
    }

    /// Process events until `shutdown` is cancelled or the event stream ends.
    ///
    /// A message being handled when shutdown is requested is finished first. The end of
    /// the stream, or a transport failure inside it, is returned as an error: there is
    /// no reconnection.
    pub async fn run<S>(
        &self,
        events: &mut S,
        shutdown: &CancellationToken,
    ) -> Result<(), TransportError>
    where
        S: Stream<Item = Result<FeedEvent, TransportError>> + Unpin,
    {
        let topic = self.descriptor.topic.id();
        let mut ticker = tokio::time::interval(self.liveness_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(topic, "dispatcher shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.liveness.report_healthy();
                }
                event = events.next() => match event {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(e)) => {
                        counter!(METRIC_TRANSPORT_ERRORS, "topic" => topic).increment(1);
                        return Err(e);
                    }
                    None => return Err(TransportError::ConnectionClosed { expected: "MESSAGE" }),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::stream;
    use railfeed_common::error::SinkError;
    use railfeed_common::health::HealthRegistry;
    use railfeed_common::row::{Row, Value};
    use railfeed_common::topics::{Topic, TopicRegistry};
    use tokio::sync::Mutex;

    use super::*;
    use crate::stomp::{Command, Frame};

    #[derive(Default)]
    struct MemorySink {
        rows: Mutex<Vec<Row>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl RowSink for MemorySink {
        async fn write(&self, row: Row) -> Result<(), SinkError> {
            let mut rows = self.rows.lock().await;
            if self.fail_after.is_some_and(|limit| rows.len() >= limit) {
                return Err(SinkError::SinkClosed);
            }
            rows.push(row);
            Ok(())
        }

        async fn close(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn dispatcher(topic: Topic, sink: Arc<MemorySink>) -> Dispatcher {
        let registry = TopicRegistry::default();
        let liveness = HealthRegistry::new("liveness");
        Dispatcher::new(
            registry.lookup(topic.id()).unwrap().clone(),
            sink,
            liveness.register("dispatcher", time::Duration::seconds(30)),
            Duration::from_secs(1),
        )
    }

    fn message(body: &'static str) -> Result<FeedEvent, TransportError> {
        Ok(FeedEvent::Message(
            Frame::new(Command::Message).with_body(body.as_bytes()),
        ))
    }

    fn broker_failure() -> Result<FeedEvent, TransportError> {
        Ok(FeedEvent::Error(
            Frame::new(Command::Error).with_header("message", "subscription problem"),
        ))
    }

    #[tokio::test]
    async fn test_dispatch_writes_rows_in_order() {
        let sink = Arc::new(MemorySink::default());
        let dispatcher = dispatcher(Topic::TrainDescriber, sink.clone());

        let written = dispatcher
            .dispatch(br#"[{"CA_MSG": {"time": "1"}}, {"CB_MSG": {"time": "2"}}]"#)
            .await
            .unwrap();

        assert_eq!(written, 2);
        let rows = sink.rows.lock().await;
        assert_eq!(rows[0].get(0), Some(&Value::Text("CA_MSG".to_owned())));
        assert_eq!(rows[1].get(0), Some(&Value::Text("CB_MSG".to_owned())));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_malformed_message_without_writing() {
        let sink = Arc::new(MemorySink::default());
        let dispatcher = dispatcher(Topic::Movement, sink.clone());

        let result = dispatcher
            .dispatch(br#"[{"body": {"event_type": "ARRIVAL"}}, {"header": {}}]"#)
            .await;
        assert!(matches!(result, Err(DispatchError::Malformed(_))));

        let result = dispatcher.dispatch(b"not json").await;
        assert!(matches!(result, Err(DispatchError::Malformed(_))));

        assert!(sink.rows.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_stops_at_failing_write() {
        let sink = Arc::new(MemorySink {
            fail_after: Some(1),
            ..Default::default()
        });
        let dispatcher = dispatcher(Topic::TrainDescriber, sink.clone());

        let result = dispatcher.dispatch(br#"[{"CA_MSG": {}}, {"CB_MSG": {}}]"#).await;

        assert!(matches!(result, Err(DispatchError::Sink(SinkError::SinkClosed))));
        assert_eq!(sink.rows.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_broker_error_does_not_stop_later_messages() {
        let sink = Arc::new(MemorySink::default());
        let dispatcher = dispatcher(Topic::TrainDescriber, sink.clone());
        let mut events = stream::iter(vec![
            message(r#"[{"CA_MSG": {"area_id": "AR"}}]"#),
            broker_failure(),
            message("{broken"),
            message(r#"[{"SF_MSG": {"area_id": "SK"}}]"#),
        ]);

        let shutdown = CancellationToken::new();
        let result = dispatcher.run(&mut events, &shutdown).await;

        assert!(matches!(result, Err(TransportError::ConnectionClosed { .. })));
        let rows = sink.rows.lock().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get(0), Some(&Value::Text("SF_MSG".to_owned())));
    }

    #[tokio::test]
    async fn test_run_returns_on_cancellation() {
        let sink = Arc::new(MemorySink::default());
        let dispatcher = dispatcher(Topic::Movement, sink.clone());
        let mut events = stream::pending::<Result<FeedEvent, TransportError>>();

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        dispatcher.run(&mut events, &shutdown).await.unwrap();
        assert!(sink.rows.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_with_zero_liveness_interval() {
        let sink = Arc::new(MemorySink::default());
        let dispatcher = Dispatcher::new(
            TopicRegistry::default().lookup("TD").unwrap().clone(),
            sink.clone(),
            HealthRegistry::new("liveness").register("dispatcher", time::Duration::seconds(30)),
            Duration::ZERO,
        );
        let mut events = stream::iter(vec![message(r#"[{"CA_MSG": {}}]"#)]);

        let shutdown = CancellationToken::new();
        let result = dispatcher.run(&mut events, &shutdown).await;

        assert!(matches!(result, Err(TransportError::ConnectionClosed { .. })));
        assert_eq!(sink.rows.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_returns_transport_failure() {
        let sink = Arc::new(MemorySink::default());
        let dispatcher = dispatcher(Topic::Movement, sink);
        let mut events = stream::iter(vec![Err(TransportError::Protocol("garbage".to_owned()))]);

        let shutdown = CancellationToken::new();
        let result = dispatcher.run(&mut events, &shutdown).await;

        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }
}
