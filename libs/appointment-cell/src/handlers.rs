use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::Appointment;
use shared_utils::extractor::{ValidatedJson, ValidatedQuery};

use crate::models::{
    BookAppointmentRequest, CallbackRequest, FailureQuery, GatewayDataQuery, RejectAppointmentRequest,
    VerifyQuery,
};
use crate::services::{
    AppointmentBookingService, AppointmentLifecycleService, CheckInVerifier, ReconciliationEngine,
};
use crate::state::LifecycleState;

fn caller_id(user: &User) -> Result<i64, AppError> {
    user.numeric_id()
        .ok_or_else(|| AppError::Auth("Token subject is not a clinic user id".to_string()))
}

fn can_view(user: &User, appointment: &Appointment) -> bool {
    user.is_admin() || user.is_patient(appointment.patient_id) || user.is_doctor(appointment.doctor_id)
}

fn can_manage(user: &User, appointment: &Appointment) -> bool {
    user.is_admin() || user.is_doctor(appointment.doctor_id)
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

pub async fn book_appointment(
    State(state): State<LifecycleState>,
    Extension(user): Extension<User>,
    ValidatedJson(request): ValidatedJson<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let patient_id = if user.is_admin() {
        request
            .patient_id
            .ok_or_else(|| AppError::BadRequest {
                code: "VALIDATION_ERROR",
                message: "patient_id is required when booking as admin".to_string(),
            })?
    } else {
        let own_id = caller_id(&user)?;
        if !user.is_patient(own_id) || request.patient_id.map_or(false, |id| id != own_id) {
            return Err(AppError::Forbidden(
                "Patients can only book appointments for themselves".to_string(),
            ));
        }
        own_id
    };

    let receipt = AppointmentBookingService::new(&state)
        .book(patient_id, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment reserved; complete payment to keep it",
        "data": receipt
    })))
}

pub async fn get_appointment(
    State(state): State<LifecycleState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentLifecycleService::new(&state).get(appointment_id).await?;

    if !can_view(&user, &appointment) {
        return Err(AppError::Forbidden("Not authorized to view this appointment".to_string()));
    }

    Ok(Json(json!({
        "success": true,
        "data": appointment
    })))
}

pub async fn confirm_appointment(
    State(state): State<LifecycleState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentLifecycleService::new(&state);
    let appointment = service.get(appointment_id).await?;

    if !can_manage(&user, &appointment) {
        return Err(AppError::Forbidden(
            "Only the appointment's doctor or an admin can confirm it".to_string(),
        ));
    }

    let confirmed = service.confirm(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment confirmed",
        "data": confirmed
    })))
}

pub async fn reject_appointment(
    State(state): State<LifecycleState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<i64>,
    request: Option<Json<RejectAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentLifecycleService::new(&state);
    let appointment = service.get(appointment_id).await?;

    if !can_manage(&user, &appointment) {
        return Err(AppError::Forbidden(
            "Only the appointment's doctor or an admin can reject it".to_string(),
        ));
    }

    let reason = request.and_then(|Json(body)| body.reason);
    let rejected = service.reject(appointment_id, reason.as_deref()).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment rejected",
        "data": rejected
    })))
}

// ==============================================================================
// PAYMENT HANDLERS
// ==============================================================================

pub async fn payment_success(
    State(state): State<LifecycleState>,
    ValidatedQuery(query): ValidatedQuery<GatewayDataQuery>,
) -> Result<Json<Value>, AppError> {
    let outcome = ReconciliationEngine::new(&state)
        .settle_from_redirect(&query.data, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "code": outcome.code(),
        "data": outcome
    })))
}

pub async fn payment_callback(
    State(state): State<LifecycleState>,
    ValidatedJson(request): ValidatedJson<CallbackRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = ReconciliationEngine::new(&state)
        .settle_from_callback(&request.data, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "code": outcome.code()
    })))
}

pub async fn payment_failure(
    State(state): State<LifecycleState>,
    ValidatedQuery(query): ValidatedQuery<FailureQuery>,
) -> Result<Json<Value>, AppError> {
    let resolution = ReconciliationEngine::new(&state)
        .handle_failure(&query.transaction_uuid, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "code": resolution.code(),
        "data": resolution
    })))
}

pub async fn poll_payment(
    State(state): State<LifecycleState>,
    Extension(user): Extension<User>,
    Path(transaction_uuid): Path<String>,
) -> Result<Json<Value>, AppError> {
    let engine = ReconciliationEngine::new(&state);
    let payment = engine.payment(&transaction_uuid).await?;

    if !user.is_admin() && !user.is_patient(payment.patient_id) {
        return Err(AppError::Forbidden("Not authorized to poll this payment".to_string()));
    }

    let outcome = engine.poll(&transaction_uuid, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "code": outcome.code(),
        "data": outcome
    })))
}

// ==============================================================================
// CHECK-IN HANDLER (PUBLIC)
// ==============================================================================

pub async fn verify_check_in(
    State(state): State<LifecycleState>,
    ValidatedQuery(query): ValidatedQuery<VerifyQuery>,
) -> Result<Json<Value>, AppError> {
    let result = CheckInVerifier::new(&state).verify(&query.token).await?;
    debug!("Check-in accepted for appointment {}", result.appointment_id);

    Ok(Json(json!({
        "success": true,
        "code": "VALID",
        "message": "Check-in successful",
        "data": result
    })))
}
