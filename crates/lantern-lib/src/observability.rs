//! Observability infrastructure for the synchronisation pipeline
//!
//! Provides:
//! - Prometheus metrics (subscribers, broadcasts, shedding, watch activity, poll latency)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for poll duration (in seconds)
const POLL_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    subscribers_connected: IntGauge,
    events_broadcast: IntCounter,
    subscribers_shed: IntCounter,
    encode_failures: IntCounter,
    watch_events: IntCounterVec,
    watch_restarts: IntCounterVec,
    poll_duration_seconds: Histogram,
    metrics_fetch_failures: IntCounter,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            subscribers_connected: register_int_gauge!(
                "lantern_subscribers_connected",
                "Number of subscribers currently registered with the hub"
            )
            .expect("Failed to register subscribers_connected"),

            events_broadcast: register_int_counter!(
                "lantern_events_broadcast_total",
                "Events encoded and fanned out by the hub"
            )
            .expect("Failed to register events_broadcast"),

            subscribers_shed: register_int_counter!(
                "lantern_subscribers_shed_total",
                "Subscribers dropped because their queue was full"
            )
            .expect("Failed to register subscribers_shed"),

            encode_failures: register_int_counter!(
                "lantern_encode_failures_total",
                "Events that could not be encoded and were not delivered"
            )
            .expect("Failed to register encode_failures"),

            watch_events: register_int_counter_vec!(
                "lantern_watch_events_total",
                "Change events emitted by the aggregator",
                &["type"]
            )
            .expect("Failed to register watch_events"),

            watch_restarts: register_int_counter_vec!(
                "lantern_watch_restarts_total",
                "Watch streams re-established after closing",
                &["resource"]
            )
            .expect("Failed to register watch_restarts"),

            poll_duration_seconds: register_histogram!(
                "lantern_metrics_poll_duration_seconds",
                "Time spent on one metrics poll tick",
                POLL_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_duration_seconds"),

            metrics_fetch_failures: register_int_counter!(
                "lantern_metrics_fetch_failures_total",
                "Per-resource metrics fetches skipped in a poll tick"
            )
            .expect("Failed to register metrics_fetch_failures"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the process-wide metrics; clones share the same
/// underlying collectors.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn set_subscribers(&self, count: usize) {
        self.inner().subscribers_connected.set(count as i64);
    }

    pub fn inc_events_broadcast(&self) {
        self.inner().events_broadcast.inc();
    }

    pub fn inc_subscribers_shed(&self) {
        self.inner().subscribers_shed.inc();
    }

    pub fn inc_encode_failures(&self) {
        self.inner().encode_failures.inc();
    }

    pub fn inc_watch_event(&self, event_type: &str) {
        self.inner()
            .watch_events
            .with_label_values(&[event_type])
            .inc();
    }

    pub fn inc_watch_restart(&self, resource: &str) {
        self.inner()
            .watch_restarts
            .with_label_values(&[resource])
            .inc();
    }

    pub fn observe_poll_duration(&self, duration_secs: f64) {
        self.inner().poll_duration_seconds.observe(duration_secs);
    }

    pub fn inc_metrics_fetch_failures(&self) {
        self.inner().metrics_fetch_failures.inc();
    }
}

/// Structured logger for lifecycle events
///
/// Emits `event = "..."` records with stable field names so that log
/// pipelines can key on them.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_startup(&self, version: &str, port: u16) {
        info!(
            event = "service_started",
            service = %self.service,
            version = %version,
            port = port,
            "Lantern started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "Lantern shutting down"
        );
    }

    pub fn log_subscriber_connected(&self, subscriber: u64) {
        info!(
            event = "subscriber_connected",
            service = %self.service,
            subscriber = subscriber,
            "Subscriber connected"
        );
    }

    pub fn log_subscriber_disconnected(&self, subscriber: u64, reason: &str) {
        info!(
            event = "subscriber_disconnected",
            service = %self.service,
            subscriber = subscriber,
            reason = %reason,
            "Subscriber disconnected"
        );
    }

    pub fn log_subscriber_shed(&self, subscriber: u64, queue_capacity: usize) {
        warn!(
            event = "subscriber_shed",
            service = %self.service,
            subscriber = subscriber,
            queue_capacity = queue_capacity,
            "Subscriber queue full, dropping slow consumer"
        );
    }

    pub fn log_watch_dropped(&self, resource: &str, backoff_ms: u128) {
        warn!(
            event = "watch_dropped",
            service = %self.service,
            resource = %resource,
            backoff_ms = backoff_ms,
            "Watch stream closed"
        );
    }

    pub fn log_watch_resumed(&self, resource: &str, reconciled: usize) {
        info!(
            event = "watch_resumed",
            service = %self.service,
            resource = %resource,
            reconciled = reconciled,
            "Watch stream re-established"
        );
    }
}

/// Records the `event` field of every emitted record
#[cfg(test)]
pub(crate) mod testing {
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing::{Event, Metadata, Subscriber};

    #[derive(Clone, Default)]
    pub(crate) struct EventCapture {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl EventCapture {
        pub(crate) fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct EventField(Option<String>);

    impl Visit for EventField {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "event" {
                self.0 = Some(value.to_string());
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
    }

    impl Subscriber for EventCapture {
        fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _span: &Attributes<'_>) -> Id {
            Id::from_u64(1)
        }

        fn record(&self, _span: &Id, _values: &Record<'_>) {}

        fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

        fn event(&self, event: &Event<'_>) {
            let mut field = EventField::default();
            event.record(&mut field);
            if let Some(name) = field.0 {
                self.events.lock().unwrap().push(name);
            }
        }

        fn enter(&self, _span: &Id) {}

        fn exit(&self, _span: &Id) {}
    }
}
