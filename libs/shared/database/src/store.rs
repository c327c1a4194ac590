use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use shared_models::{
    Appointment, AvailabilityWindow, NewAppointment, NewPayment, NewTokenLog, Payment, TokenLog,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Stored row is inconsistent: {0}")]
    Corrupt(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Injected database handle shared by every component.
pub type DbHandle = Arc<dyn Store>;

/// Entry point to persistent state. Writes only happen through a [`StoreTx`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a transaction. Dropping it without [`StoreTx::commit`] rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError>;

    async fn payment_for_appointment(&self, appointment_id: i64) -> Result<Option<Payment>, StoreError>;

    async fn token_logs(&self, appointment_id: i64) -> Result<Vec<TokenLog>, StoreError>;

    /// Pending payments created before `cutoff`, oldest first.
    async fn stale_pending_payments(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError>;

    async fn availability_windows(&self, doctor_id: i64) -> Result<Vec<AvailabilityWindow>, StoreError>;
}

/// An open transaction. Every `lock_*` call holds its row lock until commit or rollback.
#[async_trait]
pub trait StoreTx: Send {
    /// Serialises writers for one doctor's day, including days with no rows yet.
    async fn lock_doctor_day(&mut self, doctor_id: i64, date: NaiveDate) -> Result<(), StoreError>;

    async fn day_appointments(
        &mut self,
        doctor_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn insert_appointment(&mut self, new: &NewAppointment) -> Result<Appointment, StoreError>;

    async fn find_appointment(&mut self, id: i64) -> Result<Option<Appointment>, StoreError>;

    async fn lock_appointment(&mut self, id: i64) -> Result<Option<Appointment>, StoreError>;

    /// Locks the appointment only if its stored credential is exactly `qr_token`.
    async fn lock_appointment_with_token(
        &mut self,
        id: i64,
        qr_token: &str,
    ) -> Result<Option<Appointment>, StoreError>;

    async fn save_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn insert_payment(&mut self, new: &NewPayment) -> Result<Payment, StoreError>;

    async fn find_payment(&mut self, transaction_uuid: &str) -> Result<Option<Payment>, StoreError>;

    /// Locks the payment only while it is still pending.
    async fn lock_pending_payment(&mut self, transaction_uuid: &str) -> Result<Option<Payment>, StoreError>;

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    async fn has_valid_token_log(&mut self, appointment_id: i64, qr_token: &str) -> Result<bool, StoreError>;

    async fn insert_token_log(&mut self, log: &NewTokenLog) -> Result<TokenLog, StoreError>;

    /// Expires every confirmed, unused appointment whose deadline is before `now`.
    async fn expire_stale(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
