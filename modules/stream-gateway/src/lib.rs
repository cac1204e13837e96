//! Stream gateway: simulated operational events in, health summaries out
//!
//! Events are published onto the durable log through one shared
//! [`Publisher`]; summaries are read back per observer, optionally
//! augmented with an AI insight, and fanned out by the
//! [`broadcast::BroadcastManager`]. Every shared service is built once in
//! [`AppState::new`] and handed to handlers and background tasks.

pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod history;
pub mod insight;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod scenario;
pub mod summary_reader;

pub use routes::router;

use event_bus::{BusConnector, Publisher, SchemaSource, Subscriber, SubscriberConfig};
use std::sync::Arc;

use broadcast::BroadcastManager;
use catalog::Catalog;
use config::Config;
use insight::{InsightAugmenter, InsightGenerator};
use metrics::Metrics;
use scenario::ScenarioRunner;
use summary_reader::SummaryReader;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connector: Arc<dyn BusConnector>,
    pub schema_source: Option<Arc<dyn SchemaSource>>,
    pub catalog: Arc<Catalog>,
    pub publisher: Arc<Publisher>,
    pub broadcaster: Arc<BroadcastManager>,
    pub scenarios: Arc<ScenarioRunner>,
    pub augmenter: Arc<InsightAugmenter>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        config: Config,
        connector: Arc<dyn BusConnector>,
        generator: Arc<dyn InsightGenerator>,
        schema_source: Option<Arc<dyn SchemaSource>>,
    ) -> Self {
        let metrics = Metrics::new();
        let catalog = Arc::new(Catalog::builtin());

        let publisher = Arc::new(Publisher::new(
            connector.clone(),
            config.events_topic.clone(),
            config.publish_ack_timeout,
        ));
        let broadcaster = Arc::new(BroadcastManager::new(metrics.clone()));
        let scenarios = Arc::new(
            ScenarioRunner::new(
                catalog.clone(),
                publisher.clone(),
                broadcaster.clone(),
                metrics.clone(),
            )
            .with_pacing(config.scenario_pacing),
        );
        let augmenter = Arc::new(InsightAugmenter::new(generator, metrics.clone()));

        Self {
            config: Arc::new(config),
            connector,
            schema_source,
            catalog,
            publisher,
            broadcaster,
            scenarios,
            augmenter,
            metrics,
        }
    }

    fn subscriber(&self, group_id: &str, from_earliest: bool) -> Subscriber {
        let subscriber = Subscriber::new(
            self.connector.clone(),
            SubscriberConfig {
                topic: self.config.summary_topic.clone(),
                group_id: group_id.to_string(),
                from_earliest,
            },
        );
        match &self.schema_source {
            Some(source) => subscriber.with_schema_source(source.clone()),
            None => subscriber,
        }
    }

    /// Live reader on the shared summary group
    pub fn summary_reader(&self) -> SummaryReader {
        SummaryReader::new(
            self.subscriber(&self.config.summary_group_id, false),
            self.augmenter.clone(),
            self.broadcaster.clone(),
            self.metrics.clone(),
        )
        .with_poll_timeout(self.config.poll_timeout)
        .with_pacing(self.config.insight_pacing)
    }

    /// Replaying subscriber for the history endpoint
    pub fn history_subscriber(&self) -> Subscriber {
        self.subscriber(&self.config.history_group_id, true)
    }
}
