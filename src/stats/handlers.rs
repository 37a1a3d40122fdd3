use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tracing::{error, instrument};

use super::narrative::{build_request, NarrativeRequest};
use super::{extract, DailyStatistics};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/today/statistics", get(today_statistics))
        .route("/today/narrative-input", get(narrative_input))
        .route("/today/narrative", get(narrative))
}

#[derive(Debug, Serialize)]
pub struct NarrativeResponse {
    pub date: String,
    pub summary: String,
}

/// Placeholders are excluded; statistics only see logged records.
#[instrument(skip(state))]
pub async fn today_statistics(State(state): State<AppState>) -> Json<DailyStatistics> {
    let records = state.ledger.lock().await.today_logged();
    Json(extract(&records))
}

#[instrument(skip(state))]
pub async fn narrative_input(State(state): State<AppState>) -> Json<NarrativeRequest> {
    Json(today_request(&state).await)
}

#[instrument(skip(state))]
pub async fn narrative(
    State(state): State<AppState>,
) -> Result<Json<NarrativeResponse>, (StatusCode, String)> {
    let request = today_request(&state).await;
    if request.records.is_empty() {
        return Err((StatusCode::NOT_FOUND, "Nothing logged today".into()));
    }
    let summary = state.narrative.summarize(&request).await.map_err(|e| {
        error!(error = %e, "narrative service failed");
        (StatusCode::BAD_GATEWAY, "narrative service failed".to_string())
    })?;
    Ok(Json(NarrativeResponse {
        date: request.date,
        summary,
    }))
}

async fn today_request(state: &AppState) -> NarrativeRequest {
    let records = state.ledger.lock().await.today_logged();
    let statistics = extract(&records);
    build_request(state.clock.today(), &records, statistics)
}
