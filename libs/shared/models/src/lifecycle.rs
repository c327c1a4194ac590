use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amount::Amount;

// ==============================================================================
// STATUS ENUMS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Expired,
}

/// Actions that move an appointment between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentAction {
    Confirm,
    CheckIn,
    Cancel,
    Expire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
}

/// Status of a payment row, as opposed to the appointment's payment flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {action} from status '{from}'")]
pub struct TransitionError {
    pub from: String,
    pub action: String,
}

impl TransitionError {
    fn new(from: impl fmt::Display, action: impl fmt::Display) -> Self {
        Self {
            from: from.to_string(),
            action: action.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::Expired
        )
    }

    pub fn apply(self, action: AppointmentAction) -> Result<AppointmentStatus, TransitionError> {
        use AppointmentAction::*;
        use AppointmentStatus::*;

        match (self, action) {
            (Pending, Confirm) => Ok(Confirmed),
            (Pending, Cancel) => Ok(Cancelled),
            (Confirmed, CheckIn) => Ok(Completed),
            (Confirmed, Cancel) => Ok(Cancelled),
            (Confirmed, Expire) => Ok(Expired),
            (Pending, CheckIn | Expire)
            | (Confirmed, Confirm)
            | (Completed | Cancelled | Expired, _) => Err(TransitionError::new(self, action)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for AppointmentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            AppointmentAction::Confirm => "confirm",
            AppointmentAction::CheckIn => "check in",
            AppointmentAction::Cancel => "cancel",
            AppointmentAction::Expire => "expire",
        };
        f.write_str(verb)
    }
}

impl PaymentStatus {
    pub fn settle(self) -> Result<PaymentStatus, TransitionError> {
        match self {
            PaymentStatus::Unpaid => Ok(PaymentStatus::Paid),
            PaymentStatus::Paid | PaymentStatus::Failed => Err(TransitionError::new(self, "settle payment")),
        }
    }

    pub fn fail(self) -> Result<PaymentStatus, TransitionError> {
        match self {
            PaymentStatus::Unpaid => Ok(PaymentStatus::Failed),
            PaymentStatus::Paid | PaymentStatus::Failed => Err(TransitionError::new(self, "fail payment")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl TransactionStatus {
    pub fn complete(self) -> Result<TransactionStatus, TransitionError> {
        match self {
            TransactionStatus::Pending => Ok(TransactionStatus::Completed),
            TransactionStatus::Completed | TransactionStatus::Failed => {
                Err(TransitionError::new(self, "complete transaction"))
            }
        }
    }

    pub fn fail(self) -> Result<TransactionStatus, TransitionError> {
        match self {
            TransactionStatus::Pending => Ok(TransactionStatus::Failed),
            TransactionStatus::Completed | TransactionStatus::Failed => {
                Err(TransitionError::new(self, "fail transaction"))
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

macro_rules! status_text {
    ($ty:ident, $kind:literal, [$($variant:ident),+]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s == $ty::$variant.as_str() {
                        return Ok($ty::$variant);
                    }
                )+
                Err(UnknownStatus { kind: $kind, value: s.to_string() })
            }
        }
    };
}

status_text!(AppointmentStatus, "appointment status", [Pending, Confirmed, Completed, Cancelled, Expired]);
status_text!(PaymentStatus, "payment status", [Unpaid, Paid, Failed]);
status_text!(TransactionStatus, "transaction status", [Pending, Completed, Failed]);

// ==============================================================================
// ENTITIES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub reason: Option<String>,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub qr_token: Option<String>,
    pub token_number: Option<String>,
    pub token_seq: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_used: bool,
    pub verification_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Scheduled start, with the stored date and time read as UTC.
    pub fn scheduled_at(&self) -> DateTime<Utc> {
        NaiveDateTime::new(self.appointment_date, self.appointment_time).and_utc()
    }

    /// A pending appointment keeps its slot while paid or inside its provisional hold.
    pub fn holds_slot(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            AppointmentStatus::Confirmed | AppointmentStatus::Completed => true,
            AppointmentStatus::Pending => {
                self.payment_status == PaymentStatus::Paid
                    || self.expires_at.map_or(false, |deadline| deadline > now)
            }
            AppointmentStatus::Cancelled | AppointmentStatus::Expired => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: i64,
    pub doctor_id: i64,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub reason: Option<String>,
    pub token_number: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub appointment_id: i64,
    pub patient_id: i64,
    pub amount: Amount,
    pub transaction_uuid: String,
    pub status: TransactionStatus,
    pub ref_id: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub appointment_id: i64,
    pub patient_id: i64,
    pub amount: Amount,
    pub transaction_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLog {
    pub id: i64,
    pub appointment_id: i64,
    pub qr_token: String,
    pub verification_result: String,
    pub is_valid: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTokenLog {
    pub appointment_id: i64,
    pub qr_token: String,
    pub verification_result: String,
    pub is_valid: bool,
    pub timestamp: DateTime<Utc>,
}

/// One weekly opening window of a doctor. `day_of_week` runs 0 (Sunday) to 6 (Saturday).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: i64,
    pub doctor_id: i64,
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_minutes: i32,
    pub is_available: bool,
}
