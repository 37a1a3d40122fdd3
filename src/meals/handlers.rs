use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{capture_rejection, ledger_rejection};
use crate::images::services::presign_image;
use crate::ledger::{AppendOutcome, TotalsScope};
use crate::state::AppState;

use super::dto::{
    EstimateRequest, HistoryQuery, HistoryResponse, SaveRecordRequest, SavedRecordResponse,
    TodayResponse, TotalsQuery,
};
use super::model::{MealType, Nutrients, NutritionRecord, RecordEdit};
use crate::ledger::NutritionTotals;

const MAX_HISTORY_DAYS: u32 = 366;

// --- public routers ---

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/today", get(get_today))
        .route("/totals", get(get_totals))
        .route("/history", get(get_history))
        .route("/records/:id/photo", get(get_presigned_photo)) // 307 to the image url
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/records", post(save_record))
        .route("/records/estimate", post(log_by_name))
        .route("/records/:id", patch(update_record).delete(delete_record))
}

// --- handlers ---

#[instrument(skip(state))]
pub async fn get_today(State(state): State<AppState>) -> Json<TodayResponse> {
    let ledger = state.ledger.lock().await;
    Json(TodayResponse {
        date: state.clock.today().to_string(),
        records: ledger.today(),
        totals: ledger.totals(TotalsScope::Today),
        analyzing: ledger.pending_placeholder().is_some(),
    })
}

/// GET /totals?scope=today|all|days:N|date:YYYY-MM-DD
#[instrument(skip(state))]
pub async fn get_totals(
    State(state): State<AppState>,
    Query(q): Query<TotalsQuery>,
) -> Result<Json<NutritionTotals>, (StatusCode, String)> {
    let raw = q.scope.unwrap_or_default();
    let scope = TotalsScope::parse(&raw)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown scope {:?}", raw)))?;
    Ok(Json(state.ledger.lock().await.totals(scope)))
}

#[instrument(skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let days = q.days.clamp(1, MAX_HISTORY_DAYS);
    Json(HistoryResponse {
        days: state.ledger.lock().await.history(days),
    })
}

/// POST /records. The explicit save action for a fully typed-in entry.
#[instrument(skip(state, body), fields(name = %body.name))]
pub async fn save_record(
    State(state): State<AppState>,
    Json(body): Json<SaveRecordRequest>,
) -> Result<(StatusCode, Json<SavedRecordResponse>), (StatusCode, String)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name is required".into()));
    }
    let timestamp = body.timestamp.unwrap_or_else(|| state.clock.now());
    let typed = Nutrients {
        calories: body.calories,
        protein: body.protein,
        carbs: body.carbs,
        fat: body.fat,
        fiber: body.fiber,
        sugar: body.sugar,
        sodium: body.sodium,
    };
    let mut record = NutritionRecord::new(
        name,
        typed,
        timestamp,
        MealType::resolve(body.meal_type, timestamp),
    );
    if record.nutrients != typed {
        warn!(record_id = %record.id, ?typed, "invalid nutrient amounts clamped to zero");
    }
    record.ingredients = body.ingredients;
    record.location = body.location;
    record.portion_size = body.portion_size;

    let outcome = state
        .ledger
        .lock()
        .await
        .append(record.clone())
        .await
        .map_err(ledger_rejection)?;
    Ok(saved(record, outcome))
}

/// POST /records/estimate { name, meal_type? }
#[instrument(skip(state, body), fields(name = %body.name))]
pub async fn log_by_name(
    State(state): State<AppState>,
    Json(body): Json<EstimateRequest>,
) -> Result<(StatusCode, Json<SavedRecordResponse>), (StatusCode, String)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name is required".into()));
    }
    let (record, outcome) = state
        .pipeline
        .log_by_name(name, body.meal_type)
        .await
        .map_err(capture_rejection)?;
    Ok(saved(record, outcome))
}

#[instrument(skip(state, edit))]
pub async fn update_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(edit): Json<RecordEdit>,
) -> Result<Json<NutritionRecord>, (StatusCode, String)> {
    let updated = state
        .ledger
        .lock()
        .await
        .update(id, &edit)
        .await
        .map_err(ledger_rejection)?;
    Ok(Json(updated))
}

#[instrument(skip(state))]
pub async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .ledger
        .lock()
        .await
        .remove(id)
        .await
        .map_err(ledger_rejection)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn get_presigned_photo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Redirect, (StatusCode, String)> {
    let image_id = {
        let ledger = state.ledger.lock().await;
        let record = ledger
            .get(id)
            .ok_or_else(|| (StatusCode::NOT_FOUND, "Record not found".to_string()))?;
        record
            .image_id
            .ok_or_else(|| (StatusCode::NOT_FOUND, "Photo not found".to_string()))?
    };

    let url = presign_image(state.storage.as_ref(), image_id).await.map_err(|e| {
        error!(error = %e, record_id = %id, %image_id, "presign failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "presign failed".to_string())
    })?;
    Ok(Redirect::temporary(&url))
}

fn saved(record: NutritionRecord, outcome: AppendOutcome) -> (StatusCode, Json<SavedRecordResponse>) {
    match outcome {
        AppendOutcome::Appended => (
            StatusCode::CREATED,
            Json(SavedRecordResponse { record, stored: true }),
        ),
        AppendOutcome::DroppedNotToday => {
            info!(record_id = %record.id, "save skipped: record not dated today");
            (StatusCode::OK, Json(SavedRecordResponse { record, stored: false }))
        }
    }
}
