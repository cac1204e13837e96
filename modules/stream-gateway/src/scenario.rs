//! Timed runs of the catalog's scenarios
//!
//! A run is `Idle -> Running -> Completed`: `scenario_started` is broadcast,
//! every event is published and then broadcast as `event_sent`, and
//! `scenario_completed` closes the run whether it succeeded or not.
//! Concurrent runs share the Publisher and the BroadcastManager and may
//! interleave freely.

use event_bus::{EventEnvelope, Publisher, Severity};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::BroadcastManager;
use crate::catalog::{Catalog, ScenarioPlan, ScenarioStep, SeverityWeights};
use crate::metrics::Metrics;
use crate::models::{RunStatus, StreamMessage};

pub const DEFAULT_PACING: Duration = Duration::from_secs(2);

/// Upper bounds applied to caller-supplied distribution runs
pub const MAX_DURATION_SECONDS: u64 = 3600;
pub const MAX_EVENTS_PER_MINUTE: u32 = 600;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("Scenario '{0}' not found")]
    NotFound(String),
}

/// Shape of a distribution run; sequence runs ignore it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub duration_seconds: u64,
    pub events_per_minute: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            duration_seconds: 60,
            events_per_minute: 30,
        }
    }
}

impl RunOptions {
    pub fn clamped(self) -> Self {
        Self {
            duration_seconds: self.duration_seconds.min(MAX_DURATION_SECONDS),
            events_per_minute: self.events_per_minute.min(MAX_EVENTS_PER_MINUTE),
        }
    }

    pub fn event_count(&self) -> u64 {
        self.duration_seconds
            .saturating_mul(u64::from(self.events_per_minute))
            / 60
    }

    pub fn interval(&self) -> Duration {
        if self.events_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / f64::from(self.events_per_minute))
        }
    }
}

/// Returned to the trigger before the run begins
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioStarted {
    pub scenario: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub events_sent: u64,
}

pub struct ScenarioRunner {
    catalog: Arc<Catalog>,
    publisher: Arc<Publisher>,
    broadcaster: Arc<BroadcastManager>,
    metrics: Metrics,
    pacing: Duration,
}

impl ScenarioRunner {
    pub fn new(
        catalog: Arc<Catalog>,
        publisher: Arc<Publisher>,
        broadcaster: Arc<BroadcastManager>,
        metrics: Metrics,
    ) -> Self {
        Self {
            catalog,
            publisher,
            broadcaster,
            metrics,
            pacing: DEFAULT_PACING,
        }
    }

    /// Delay between the steps of a sequence scenario
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    /// Spawn a run and return immediately
    ///
    /// An unknown name publishes and broadcasts nothing. The run itself is
    /// supervised: if it panics, the failure is logged and
    /// `scenario_completed` is still broadcast with status `failed`.
    pub fn start(
        self: &Arc<Self>,
        name: &str,
        options: RunOptions,
    ) -> Result<ScenarioStarted, ScenarioError> {
        let definition = self
            .catalog
            .scenario(name)
            .ok_or_else(|| ScenarioError::NotFound(name.to_string()))?;

        let started = ScenarioStarted {
            scenario: name.to_string(),
            name: definition.name.to_string(),
            description: definition.description.to_string(),
        };

        let scenario = name.to_string();
        let sent = Arc::new(AtomicU64::new(0));

        let run = {
            let runner = Arc::clone(self);
            let scenario = scenario.clone();
            let sent = sent.clone();
            tokio::spawn(async move { runner.run(&scenario, options, &sent).await })
        };

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let status = match run.await {
                Ok(status) => status,
                Err(e) => {
                    tracing::error!(scenario = %scenario, error = %e, "Scenario run aborted");
                    RunStatus::Failed
                }
            };
            runner
                .finish(&scenario, status, sent.load(Ordering::SeqCst))
                .await;
        });

        tracing::info!(scenario = %name, "Scenario started");
        Ok(started)
    }

    /// Run a scenario to completion on the calling task
    pub async fn execute(
        &self,
        name: &str,
        options: RunOptions,
    ) -> Result<RunOutcome, ScenarioError> {
        if self.catalog.scenario(name).is_none() {
            return Err(ScenarioError::NotFound(name.to_string()));
        }

        let sent = AtomicU64::new(0);
        let status = self.run(name, options, &sent).await;
        let events_sent = sent.load(Ordering::SeqCst);
        self.finish(name, status, events_sent).await;

        Ok(RunOutcome {
            status,
            events_sent,
        })
    }

    async fn run(&self, scenario: &str, options: RunOptions, sent: &AtomicU64) -> RunStatus {
        let Some(definition) = self.catalog.scenario(scenario) else {
            return RunStatus::Failed;
        };

        self.broadcaster
            .broadcast(&StreamMessage::ScenarioStarted {
                scenario: scenario.to_string(),
                name: definition.name.to_string(),
            })
            .await;

        match &definition.plan {
            ScenarioPlan::Events(steps) => self.run_sequence(scenario, steps, sent).await,
            ScenarioPlan::Distribution(weights) => {
                self.run_distribution(scenario, *weights, options, sent)
                    .await
            }
        }
    }

    async fn run_sequence(
        &self,
        scenario: &str,
        steps: &[ScenarioStep],
        sent: &AtomicU64,
    ) -> RunStatus {
        for step in steps {
            let envelope = scenario_event(
                scenario,
                step.source,
                step.event_type,
                step.severity,
                step.subject,
                step.category(),
            )
            .with_correlation_id(step.correlation_id.map(str::to_string));

            if !self.emit(scenario, envelope).await {
                return RunStatus::Failed;
            }
            sent.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.pacing).await;
        }
        RunStatus::Completed
    }

    async fn run_distribution(
        &self,
        scenario: &str,
        weights: SeverityWeights,
        options: RunOptions,
        sent: &AtomicU64,
    ) -> RunStatus {
        let mut rng = StdRng::from_entropy();
        let interval = options.interval();

        for _ in 0..options.event_count() {
            let severity = weights.pick(&mut rng);
            let Some((source, template)) = self.catalog.random_template(&mut rng, severity) else {
                tracing::warn!(scenario = %scenario, "No templates to draw events from");
                return RunStatus::Failed;
            };

            let envelope = scenario_event(
                scenario,
                source,
                template.event_type,
                template.severity,
                template.subject,
                template.category,
            );

            if !self.emit(scenario, envelope).await {
                return RunStatus::Failed;
            }
            sent.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(interval).await;
        }
        RunStatus::Completed
    }

    /// Publish then broadcast one event; false when the publish failed
    async fn emit(&self, scenario: &str, envelope: EventEnvelope) -> bool {
        if let Err(e) = self.publisher.publish(&envelope).await {
            self.metrics.publish_failures_total.inc();
            tracing::error!(
                scenario = %scenario,
                event_id = %envelope.id,
                error = %e,
                "Error executing scenario"
            );
            return false;
        }

        self.metrics
            .events_published_total
            .with_label_values(&["scenario"])
            .inc();
        tracing::debug!(scenario = %scenario, event_id = %envelope.id, "Scenario event sent");

        self.broadcaster
            .broadcast(&StreamMessage::EventSent { event: envelope })
            .await;
        true
    }

    async fn finish(&self, scenario: &str, status: RunStatus, events_sent: u64) {
        self.metrics
            .scenario_runs_total
            .with_label_values(&[status.as_str()])
            .inc();

        self.broadcaster
            .broadcast(&StreamMessage::ScenarioCompleted {
                scenario: scenario.to_string(),
                status,
                events_sent,
            })
            .await;

        match status {
            RunStatus::Completed => {
                tracing::info!(scenario = %scenario, events_sent, "Scenario completed")
            }
            RunStatus::Failed => {
                tracing::warn!(scenario = %scenario, events_sent, "Scenario stopped early")
            }
        }
    }
}

fn scenario_event(
    scenario: &str,
    source: &str,
    event_type: &str,
    severity: Severity,
    subject: &str,
    category: &str,
) -> EventEnvelope {
    EventEnvelope::simulated(source, event_type)
        .with_subject(subject)
        .with_severity(severity)
        .with_category(category)
        .with_data(serde_json::json!({ "simulated": true, "scenario": scenario }))
}
