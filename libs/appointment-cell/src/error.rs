use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use tracing::error;

use payment_cell::GatewayError;
use shared_database::StoreError;
use shared_models::error::AppError;
use shared_models::{Amount, TransitionError};

/// Failures of booking, confirmation and payment reconciliation.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),

    #[error("Doctor {doctor_id} is not available on {date} at {time}")]
    DoctorNotAvailable {
        doctor_id: i64,
        date: NaiveDate,
        time: NaiveTime,
    },

    #[error("The requested slot is already taken")]
    SlotTaken,

    #[error("Amount mismatch: expected {expected}, gateway reported {actual}")]
    AmountMismatch { expected: Amount, actual: Amount },

    #[error("Gateway reported status {0}, payment is not complete")]
    StatusNotComplete(String),

    #[error("Payment verification failed: {0}")]
    VerificationFailed(String),

    #[error("{0}")]
    StateConflict(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Fatal configuration error: {0}")]
    Fatal(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl LifecycleError {
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::Validation(_) => "VALIDATION_ERROR",
            LifecycleError::DoctorNotAvailable { .. } => "DOCTOR_NOT_AVAILABLE",
            LifecycleError::SlotTaken => "SLOT_TAKEN",
            LifecycleError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            LifecycleError::StatusNotComplete(_) => "STATUS_NOT_COMPLETE",
            LifecycleError::VerificationFailed(_) => "VERIFICATION_FAILED",
            LifecycleError::StateConflict(_) => "STATE_CONFLICT",
            LifecycleError::GatewayUnavailable(_) => "GATEWAY_UNREACHABLE",
            LifecycleError::Fatal(_) => "CONFIGURATION_ERROR",
            LifecycleError::NotFound(_) => "NOT_FOUND",
            LifecycleError::Forbidden(_) => "FORBIDDEN",
            LifecycleError::Storage(_) => "INTERNAL_ERROR",
        }
    }

    /// Callers should retry later instead of re-booking.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LifecycleError::GatewayUnavailable(_))
    }
}

impl From<TransitionError> for LifecycleError {
    fn from(e: TransitionError) -> Self {
        LifecycleError::StateConflict(e.to_string())
    }
}

impl From<GatewayError> for LifecycleError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotConfigured(msg) => LifecycleError::Fatal(msg),
            GatewayError::Unreachable(msg) => LifecycleError::GatewayUnavailable(msg),
            other => LifecycleError::VerificationFailed(other.to_string()),
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(e: LifecycleError) -> Self {
        let code = e.code();
        let message = e.to_string();
        match e {
            LifecycleError::Validation(_) => AppError::BadRequest { code, message },
            LifecycleError::DoctorNotAvailable { .. }
            | LifecycleError::SlotTaken
            | LifecycleError::StateConflict(_) => AppError::Conflict { code, message },
            LifecycleError::AmountMismatch { .. }
            | LifecycleError::StatusNotComplete(_)
            | LifecycleError::VerificationFailed(_) => AppError::Unprocessable { code, message },
            LifecycleError::GatewayUnavailable(_) => AppError::Unavailable {
                code,
                message: "Payment gateway did not answer; retry later".to_string(),
            },
            LifecycleError::NotFound(_) => AppError::NotFound { code, message },
            LifecycleError::Forbidden(_) => AppError::Forbidden(message),
            LifecycleError::Fatal(_) | LifecycleError::Storage(_) => {
                error!("Lifecycle operation aborted: {}", message);
                AppError::Internal(message)
            }
        }
    }
}

/// Reasons a check-in credential is refused. `code()` is what the desk sees.
#[derive(Error, Debug)]
pub enum CheckInError {
    #[error("Credential is not a well-formed token")]
    InvalidFormat,

    #[error("Credential signature or claims are invalid")]
    InvalidToken,

    #[error("Credential has expired")]
    Expired,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Credential does not belong to this appointment")]
    TokenMismatch,

    #[error("Credential has already been used")]
    AlreadyUsed,

    #[error("Appointment is not in a state that allows check-in")]
    InvalidStatus,

    #[error("Fatal configuration error: {0}")]
    Fatal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl CheckInError {
    pub fn code(&self) -> &'static str {
        match self {
            CheckInError::InvalidFormat => "INVALID_FORMAT",
            CheckInError::InvalidToken => "INVALID_TOKEN",
            CheckInError::Expired => "EXPIRED",
            CheckInError::AppointmentNotFound => "APPOINTMENT_NOT_FOUND",
            CheckInError::TokenMismatch => "TOKEN_MISMATCH",
            CheckInError::AlreadyUsed => "ALREADY_USED",
            CheckInError::InvalidStatus => "INVALID_STATUS",
            CheckInError::Fatal(_) => "CONFIGURATION_ERROR",
            CheckInError::Storage(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<CheckInError> for AppError {
    fn from(e: CheckInError) -> Self {
        let code = e.code();
        let message = e.to_string();
        match e {
            CheckInError::InvalidFormat => AppError::BadRequest { code, message },
            CheckInError::InvalidToken | CheckInError::TokenMismatch => AppError::Credential { code, message },
            CheckInError::Expired => AppError::Gone { code, message },
            CheckInError::AppointmentNotFound => AppError::NotFound { code, message },
            CheckInError::AlreadyUsed | CheckInError::InvalidStatus => AppError::Conflict { code, message },
            CheckInError::Fatal(_) | CheckInError::Storage(_) => {
                error!("Check-in aborted: {}", message);
                AppError::Internal(message)
            }
        }
    }
}
