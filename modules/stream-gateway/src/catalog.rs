//! Built-in event templates and scenarios
//!
//! Reference data only: nothing here talks to the event log.

use event_bus::Severity;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

/// One kind of event a source can emit
#[derive(Debug, Clone, Serialize)]
pub struct EventTemplate {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub severity: Severity,
    pub category: &'static str,
    pub subject: &'static str,
}

/// One step of a fixed scenario sequence
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioStep {
    pub source: &'static str,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub severity: Severity,
    pub subject: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<&'static str>,
}

impl ScenarioStep {
    pub const DEFAULT_CATEGORY: &'static str = "other";

    pub fn category(&self) -> &'static str {
        self.category.unwrap_or(Self::DEFAULT_CATEGORY)
    }
}

/// Relative weight of each severity in a distribution scenario
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SeverityWeights {
    pub info: u32,
    pub warning: u32,
    pub error: u32,
    pub critical: u32,
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Info => self.info,
            Severity::Warning => self.warning,
            Severity::Error => self.error,
            Severity::Critical => self.critical,
        }
    }

    pub fn total(&self) -> u32 {
        self.info + self.warning + self.error + self.critical
    }

    /// Pick a severity proportionally to its weight
    ///
    /// All-zero weights fall back to [`Severity::Info`].
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Severity {
        let total = self.total();
        if total == 0 {
            return Severity::Info;
        }

        let mut roll = rng.gen_range(0..total);
        for severity in Severity::ALL {
            let weight = self.weight(severity);
            if roll < weight {
                return severity;
            }
            roll -= weight;
        }
        Severity::Info
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioPlan {
    Events(Vec<ScenarioStep>),
    Distribution(SeverityWeights),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(flatten)]
    pub plan: ScenarioPlan,
}

#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    templates: BTreeMap<&'static str, Vec<EventTemplate>>,
    scenarios: BTreeMap<&'static str, ScenarioDefinition>,
}

const fn template(
    event_type: &'static str,
    severity: Severity,
    category: &'static str,
    subject: &'static str,
) -> EventTemplate {
    EventTemplate {
        event_type,
        severity,
        category,
        subject,
    }
}

const fn step(
    source: &'static str,
    event_type: &'static str,
    severity: Severity,
    subject: &'static str,
) -> ScenarioStep {
    ScenarioStep {
        source,
        event_type,
        severity,
        subject,
        category: None,
        correlation_id: None,
    }
}

const fn correlated(step: ScenarioStep, correlation_id: &'static str) -> ScenarioStep {
    ScenarioStep {
        correlation_id: Some(correlation_id),
        ..step
    }
}

impl Catalog {
    pub fn new(
        templates: BTreeMap<&'static str, Vec<EventTemplate>>,
        scenarios: BTreeMap<&'static str, ScenarioDefinition>,
    ) -> Self {
        Self {
            templates,
            scenarios,
        }
    }

    /// The demo catalog: five sources and four scenarios
    pub fn builtin() -> Self {
        use Severity::*;

        let mut templates = BTreeMap::new();
        templates.insert(
            "github",
            vec![
                template("com.github.push", Info, "cicd", "Push to main branch"),
                template("com.github.pull_request.opened", Info, "cicd", "New PR opened"),
                template("com.github.pull_request.merged", Info, "cicd", "PR merged"),
            ],
        );
        templates.insert(
            "datadog",
            vec![
                template("com.datadog.alert.warning", Warning, "alert", "High latency detected"),
                template("com.datadog.alert.error", Error, "alert", "Service unavailable"),
                template(
                    "com.datadog.alert.critical",
                    Critical,
                    "alert",
                    "Database connection failed",
                ),
            ],
        );
        templates.insert(
            "kubernetes",
            vec![
                template("io.k8s.pod.started", Info, "infrastructure", "Pod started successfully"),
                template("io.k8s.pod.crash", Critical, "infrastructure", "Pod crashed (OOMKilled)"),
                template(
                    "io.k8s.deployment.scaled",
                    Info,
                    "infrastructure",
                    "Deployment scaled up",
                ),
            ],
        );
        templates.insert(
            "jenkins",
            vec![
                template("com.jenkins.build.success", Info, "cicd", "Build #142 succeeded"),
                template("com.jenkins.build.failure", Error, "cicd", "Build #143 failed"),
                template(
                    "com.jenkins.deployment.started",
                    Info,
                    "cicd",
                    "Deployment to production",
                ),
            ],
        );
        templates.insert(
            "pagerduty",
            vec![
                template(
                    "com.pagerduty.incident.triggered",
                    Critical,
                    "incident",
                    "P1 Incident - Service Down",
                ),
                template(
                    "com.pagerduty.incident.acknowledged",
                    Warning,
                    "incident",
                    "Incident acknowledged by team",
                ),
                template("com.pagerduty.incident.resolved", Info, "incident", "Incident resolved"),
            ],
        );

        let mut scenarios = BTreeMap::new();
        scenarios.insert(
            "normal_operations",
            ScenarioDefinition {
                name: "Normal Operations",
                description: "Typical daily operations with mostly info events",
                plan: ScenarioPlan::Distribution(SeverityWeights {
                    info: 80,
                    warning: 15,
                    error: 4,
                    critical: 1,
                }),
            },
        );
        scenarios.insert(
            "deployment",
            ScenarioDefinition {
                name: "Deployment in Progress",
                description: "Simulates a production deployment with related events",
                plan: ScenarioPlan::Events(vec![
                    step("github", "com.github.push", Info, "Deploy commit abc123"),
                    step("jenkins", "com.jenkins.build.success", Info, "Build #200 succeeded"),
                    step("kubernetes", "io.k8s.deployment.scaled", Info, "Scaled to 10 replicas"),
                    step("datadog", "com.datadog.alert.warning", Warning, "Brief latency spike"),
                ]),
            },
        );
        scenarios.insert(
            "incident",
            ScenarioDefinition {
                name: "Production Incident",
                description: "Simulates a cascading failure scenario",
                plan: ScenarioPlan::Events(
                    [
                        step("kubernetes", "io.k8s.pod.crash", Critical, "payment-service crashed (OOM)"),
                        step(
                            "datadog",
                            "com.datadog.alert.critical",
                            Critical,
                            "High error rate: payment-service",
                        ),
                        step(
                            "pagerduty",
                            "com.pagerduty.incident.triggered",
                            Critical,
                            "P1: Payment service down",
                        ),
                        step(
                            "github",
                            "com.github.pull_request.opened",
                            Info,
                            "Hotfix: Increase memory limits",
                        ),
                        step("jenkins", "com.jenkins.deployment.started", Info, "Deploying hotfix"),
                        step("pagerduty", "com.pagerduty.incident.resolved", Info, "Incident resolved"),
                    ]
                    .into_iter()
                    .map(|s| correlated(s, "incident-001"))
                    .collect(),
                ),
            },
        );
        scenarios.insert(
            "traffic_spike",
            ScenarioDefinition {
                name: "Traffic Spike",
                description: "Sudden increase in traffic causing performance issues",
                plan: ScenarioPlan::Events(vec![
                    step("datadog", "com.datadog.alert.warning", Warning, "Traffic increased 300%"),
                    step("kubernetes", "io.k8s.deployment.scaled", Info, "Auto-scaled to 20 replicas"),
                    step("datadog", "com.datadog.alert.warning", Warning, "High CPU usage"),
                ]),
            },
        );

        Self::new(templates, scenarios)
    }

    pub fn sources(&self) -> Vec<&'static str> {
        self.templates.keys().copied().collect()
    }

    pub fn templates(&self) -> &BTreeMap<&'static str, Vec<EventTemplate>> {
        &self.templates
    }

    pub fn scenarios(&self) -> &BTreeMap<&'static str, ScenarioDefinition> {
        &self.scenarios
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioDefinition> {
        self.scenarios.get(name)
    }

    /// A random template of the given severity, or of any severity if the
    /// catalog has none at that level
    pub fn random_template<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        severity: Severity,
    ) -> Option<(&'static str, &EventTemplate)> {
        let all: Vec<(&'static str, &EventTemplate)> = self
            .templates
            .iter()
            .flat_map(|(source, templates)| templates.iter().map(move |t| (*source, t)))
            .collect();

        let matching: Vec<_> = all
            .iter()
            .copied()
            .filter(|(_, t)| t.severity == severity)
            .collect();

        if matching.is_empty() {
            all.choose(rng).copied()
        } else {
            matching.choose(rng).copied()
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}
