use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64ct::{Base64, Encoding};
use bytes::Bytes;
use tracing::{debug, instrument};

use crate::error::capture_rejection;
use crate::meals::model::MealType;
use crate::state::AppState;

use super::dto::{CaptureBase64, CaptureQuery};
use super::pipeline::{CaptureOutcome, CaptureState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/captures", post(capture_multipart))
        .route("/captures/base64", post(capture_base64))
        .route("/captures/state", get(capture_state))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

/// POST /captures?meal_type=lunch (multipart, field `file`)
#[instrument(skip(state, mp))]
pub async fn capture_multipart(
    State(state): State<AppState>,
    Query(q): Query<CaptureQuery>,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<CaptureOutcome>), (StatusCode, String)> {
    let meal_type = meal_type_param(q.meal_type.as_deref())?;

    let mut image: Option<Bytes> = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if matches!(field.name(), Some("file") | Some("image")) {
            let data = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
            image = Some(data);
            break;
        }
    }
    let Some(image) = image.filter(|b| !b.is_empty()) else {
        return Err((StatusCode::BAD_REQUEST, "file is required".into()));
    };

    run_capture(&state, image, meal_type).await
}

/// POST /captures/base64
#[instrument(skip(state, body))]
pub async fn capture_base64(
    State(state): State<AppState>,
    Json(body): Json<CaptureBase64>,
) -> Result<(StatusCode, Json<CaptureOutcome>), (StatusCode, String)> {
    let raw = Base64::decode_vec(body.image_b64.trim())
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid base64".to_string()))?;
    if raw.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "image_b64 is required".into()));
    }
    run_capture(&state, Bytes::from(raw), body.meal_type).await
}

#[instrument(skip(state))]
pub async fn capture_state(State(state): State<AppState>) -> Json<CaptureState> {
    Json(state.pipeline.state())
}

async fn run_capture(
    state: &AppState,
    image: Bytes,
    meal_type: Option<MealType>,
) -> Result<(StatusCode, Json<CaptureOutcome>), (StatusCode, String)> {
    let outcome = state
        .pipeline
        .capture(image, meal_type)
        .await
        .map_err(capture_rejection)?;
    debug!(records = outcome.records.len(), dropped = outcome.dropped, "capture response");
    Ok((StatusCode::CREATED, Json(outcome)))
}

fn meal_type_param(raw: Option<&str>) -> Result<Option<MealType>, (StatusCode, String)> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => MealType::parse(s)
            .map(Some)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown meal_type {:?}", s))),
    }
}
