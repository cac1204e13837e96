use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Publish path
    pub events_published_total: IntCounterVec,
    pub publish_failures_total: IntCounter,

    // Fan-out
    pub broadcast_messages_total: IntCounterVec,
    pub observers_pruned_total: IntCounter,
    pub websocket_connections: IntGauge,

    // Summary stream
    pub summaries_forwarded_total: IntCounter,
    pub summary_decode_failures_total: IntCounterVec,
    pub summary_consume_errors_total: IntCounter,
    pub insight_results_total: IntCounterVec,

    pub scenario_runs_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_published_total = IntCounterVec::new(
            Opts::new("events_published_total", "Envelopes acknowledged by the event log"),
            &["origin"], // simulate|scenario
        )
        .expect("metric");

        let publish_failures_total =
            IntCounter::new("publish_failures_total", "Publishes that were not acknowledged")
                .expect("metric");

        let broadcast_messages_total = IntCounterVec::new(
            Opts::new("broadcast_messages_total", "Messages fanned out to observers"),
            &["type"], // event_sent|scenario_started|scenario_completed|ai_alert
        )
        .expect("metric");

        let observers_pruned_total = IntCounter::new(
            "observers_pruned_total",
            "Observers removed after a failed send",
        )
        .expect("metric");

        let websocket_connections =
            IntGauge::new("websocket_connections", "Currently registered observers")
                .expect("metric");

        let summaries_forwarded_total = IntCounter::new(
            "summaries_forwarded_total",
            "Summaries decoded and broadcast as ai_alert",
        )
        .expect("metric");

        let summary_decode_failures_total = IntCounterVec::new(
            Opts::new(
                "summary_decode_failures_total",
                "Summary records skipped because no decoder accepted them",
            ),
            &["kind"], // empty|foreign|corrupt
        )
        .expect("metric");

        let summary_consume_errors_total = IntCounter::new(
            "summary_consume_errors_total",
            "Broker errors while polling the summary stream",
        )
        .expect("metric");

        let insight_results_total = IntCounterVec::new(
            Opts::new("insight_results_total", "Insight generation outcomes"),
            &["status"], // success|unavailable|error
        )
        .expect("metric");

        let scenario_runs_total = IntCounterVec::new(
            Opts::new("scenario_runs_total", "Finished scenario runs"),
            &["status"], // completed|failed
        )
        .expect("metric");

        registry
            .register(Box::new(events_published_total.clone()))
            .unwrap();
        registry
            .register(Box::new(publish_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(broadcast_messages_total.clone()))
            .unwrap();
        registry
            .register(Box::new(observers_pruned_total.clone()))
            .unwrap();
        registry
            .register(Box::new(websocket_connections.clone()))
            .unwrap();
        registry
            .register(Box::new(summaries_forwarded_total.clone()))
            .unwrap();
        registry
            .register(Box::new(summary_decode_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(summary_consume_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(insight_results_total.clone()))
            .unwrap();
        registry
            .register(Box::new(scenario_runs_total.clone()))
            .unwrap();

        Self {
            registry,
            events_published_total,
            publish_failures_total,
            broadcast_messages_total,
            observers_pruned_total,
            websocket_connections,
            summaries_forwarded_total,
            summary_decode_failures_total,
            summary_consume_errors_total,
            insight_results_total,
            scenario_runs_total,
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&mf, &mut buf)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
