use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::catalog::{EventTemplate, ScenarioDefinition};
use crate::models::{
    ErrorResponse, ScenarioQuery, ScenarioResponse, SimulateRequest, SimulateResponse,
    StreamMessage,
};
use crate::scenario::{RunOptions, ScenarioError};
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Serialize)]
pub struct TemplatesResponse {
    pub sources: Vec<&'static str>,
    pub templates: BTreeMap<&'static str, Vec<EventTemplate>>,
    pub scenarios: BTreeMap<&'static str, ScenarioDefinition>,
}

pub async fn templates(State(state): State<AppState>) -> Json<TemplatesResponse> {
    Json(TemplatesResponse {
        sources: state.catalog.sources(),
        templates: state.catalog.templates().clone(),
        scenarios: state.catalog.scenarios().clone(),
    })
}

/// Publish one event and broadcast it as `event_sent`
pub async fn simulate_event(
    State(state): State<AppState>,
    Json(request): Json<SimulateRequest>,
) -> Result<Json<SimulateResponse>, ApiError> {
    let source = request.source.clone();
    let envelope = request.into_envelope();

    if let Err(e) = state.publisher.publish(&envelope).await {
        state.metrics.publish_failures_total.inc();
        tracing::error!(event_id = %envelope.id, error = %e, "Error simulating event");
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("publish_failed", e.to_string())),
        ));
    }

    state
        .metrics
        .events_published_total
        .with_label_values(&["simulate"])
        .inc();
    tracing::info!(
        event_id = %envelope.id,
        event_type = %envelope.event_type,
        source = %source,
        "Simulated event"
    );

    let event_id = envelope.id.clone();
    state
        .broadcaster
        .broadcast(&StreamMessage::EventSent { event: envelope })
        .await;

    Ok(Json(SimulateResponse {
        status: "success",
        event_id,
        message: format!("Event sent to topic: {}", state.publisher.default_topic()),
    }))
}

/// Start a catalog scenario in the background
pub async fn run_scenario(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ScenarioQuery>,
) -> Result<Json<ScenarioResponse>, ApiError> {
    let defaults = RunOptions::default();
    let options = RunOptions {
        duration_seconds: query.duration_seconds.unwrap_or(defaults.duration_seconds),
        events_per_minute: query.events_per_minute.unwrap_or(defaults.events_per_minute),
    }
    .clamped();

    match state.scenarios.start(&name, options) {
        Ok(started) => Ok(Json(ScenarioResponse {
            status: "started",
            message: format!("Scenario '{}' is running", started.name),
            scenario: started.scenario,
            description: started.description,
        })),
        Err(e @ ScenarioError::NotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", e.to_string())),
        )),
    }
}
