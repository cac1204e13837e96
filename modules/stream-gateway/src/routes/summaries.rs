use axum::{
    extract::{Query, State},
    Json,
};

use crate::history::{clamp_limit, fetch_summaries, DEFAULT_MAX_POLLS};
use crate::models::{SummariesQuery, SummariesResponse};
use crate::AppState;

/// Replay recent summaries from the start of the summary topic
///
/// Broker trouble is reported in the body, not as an HTTP error.
pub async fn get_summaries(
    State(state): State<AppState>,
    Query(query): Query<SummariesQuery>,
) -> Json<SummariesResponse> {
    let limit = clamp_limit(query.limit);
    let topic = state.config.summary_topic.clone();
    let mut subscriber = state.history_subscriber();

    tracing::info!(topic = %topic, limit, group_id = %subscriber.group_id(), "Fetching summaries");

    let fetched = fetch_summaries(
        &mut subscriber,
        limit,
        DEFAULT_MAX_POLLS,
        state.config.poll_timeout,
    )
    .await;

    if let Err(e) = subscriber.close().await {
        tracing::warn!(error = %e, "Failed to close history subscriber");
    }

    match fetched {
        Ok(summaries) => Json(SummariesResponse {
            topic,
            count: summaries.len(),
            error: None,
            summaries,
        }),
        Err(e) => {
            tracing::error!(error = %e, "Error fetching summaries");
            Json(SummariesResponse {
                topic,
                count: 0,
                error: Some(e.to_string()),
                summaries: Vec::new(),
            })
        }
    }
}
