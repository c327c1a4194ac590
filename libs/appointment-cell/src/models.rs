use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use payment_cell::{GatewayStatus, PaymentForm};
use shared_models::{Appointment, Payment};

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: i64,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub reason: Option<String>,
    /// Only admins may book on behalf of a patient.
    pub patient_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayDataQuery {
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct FailureQuery {
    pub transaction_uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    /// Missing is treated like any other malformed credential.
    #[serde(default)]
    pub token: String,
}

// ==============================================================================
// RESULTS
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    pub appointment: Appointment,
    pub payment: Payment,
    pub payment_form: PaymentForm,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedAppointment {
    pub appointment: Appointment,
    pub qr_image: String,
}

/// Claims carried by a check-in credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialClaims {
    pub appointment_id: i64,
    pub doctor_id: i64,
    pub patient_id: i64,
    pub token_number: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub credential: String,
    pub token_number: String,
    pub token_seq: i32,
    pub expires_at: DateTime<Utc>,
    pub qr_image: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileOutcome {
    Reconciled { payment: Payment, appointment: Appointment },
    AlreadyProcessed { transaction_uuid: String },
}

impl ReconcileOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            ReconcileOutcome::Reconciled { .. } => "RECONCILED",
            ReconcileOutcome::AlreadyProcessed { .. } => "ALREADY_PROCESSED",
        }
    }
}

/// What the gateway's answer meant for a payment the client abandoned or that
/// has been pending too long.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "resolution", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Settled { outcome: ReconcileOutcome },
    Failed { payment: Payment, appointment: Appointment },
    StillPending { gateway_status: GatewayStatus },
}

impl Resolution {
    pub fn code(&self) -> &'static str {
        match self {
            Resolution::Settled { outcome } => outcome.code(),
            Resolution::Failed { .. } => "PAYMENT_FAILED",
            Resolution::StillPending { .. } => "PAYMENT_PENDING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResult {
    pub appointment_id: i64,
    pub doctor_id: i64,
    pub patient_id: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub checked: usize,
    pub reconciled: usize,
    pub failed: usize,
    pub pending: usize,
    pub errors: usize,
}
