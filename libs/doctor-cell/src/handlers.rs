use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::error;

use shared_database::{DbHandle, StoreError};
use shared_models::error::AppError;

use crate::models::{DaySlots, SlotQuery, WeeklySchedule};
use crate::services::availability::AvailabilityIndex;

fn storage_error(e: StoreError) -> AppError {
    error!("Availability lookup failed: {}", e);
    AppError::Internal(e.to_string())
}

// ==============================================================================
// PUBLIC AVAILABILITY HANDLERS
// ==============================================================================

pub async fn get_open_slots(
    State(store): State<DbHandle>,
    Path(doctor_id): Path<i64>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let index = AvailabilityIndex::new(store);

    let slots = index
        .open_slots(doctor_id, query.date)
        .await
        .map_err(storage_error)?;

    let day = DaySlots {
        doctor_id,
        date: query.date,
        total_slots: slots.len(),
        slots,
    };

    Ok(Json(json!({
        "success": true,
        "data": day
    })))
}

pub async fn get_weekly_schedule(
    State(store): State<DbHandle>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let index = AvailabilityIndex::new(store);

    let windows = index.weekly_schedule(doctor_id).await.map_err(storage_error)?;

    Ok(Json(json!({
        "success": true,
        "data": WeeklySchedule { doctor_id, windows }
    })))
}
