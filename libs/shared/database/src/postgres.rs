use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_models::{
    Amount, Appointment, AvailabilityWindow, NewAppointment, NewPayment, NewTokenLog, Payment,
    TokenLog,
};

use crate::store::{Store, StoreError, StoreTx};

const APPOINTMENT_COLUMNS: &str = "id, patient_id, doctor_id, appointment_date, appointment_time, \
    reason, status, payment_status, qr_token, token_number, token_seq, expires_at, is_used, \
    verification_time, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, appointment_id, patient_id, amount_minor, transaction_uuid, \
    status, ref_id, verified_at, created_at";

const TOKEN_LOG_COLUMNS: &str = "id, appointment_id, qr_token, verification_result, is_valid, timestamp";

// ==============================================================================
// ROW MAPPING
// ==============================================================================

#[derive(Debug, FromRow)]
struct AppointmentRow {
    id: i64,
    patient_id: i64,
    doctor_id: i64,
    appointment_date: NaiveDate,
    appointment_time: NaiveTime,
    reason: Option<String>,
    status: String,
    payment_status: String,
    qr_token: Option<String>,
    token_number: Option<String>,
    token_seq: Option<i32>,
    expires_at: Option<DateTime<Utc>>,
    is_used: bool,
    verification_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            id: row.id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            appointment_date: row.appointment_date,
            appointment_time: row.appointment_time,
            reason: row.reason,
            status: row.status.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            payment_status: row
                .payment_status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            qr_token: row.qr_token,
            token_number: row.token_number,
            token_seq: row.token_seq,
            expires_at: row.expires_at,
            is_used: row.is_used,
            verification_time: row.verification_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: i64,
    appointment_id: i64,
    patient_id: i64,
    amount_minor: i64,
    transaction_uuid: String,
    status: String,
    ref_id: Option<String>,
    verified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            appointment_id: row.appointment_id,
            patient_id: row.patient_id,
            amount: Amount::from_minor(row.amount_minor),
            transaction_uuid: row.transaction_uuid,
            status: row.status.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            ref_id: row.ref_id,
            verified_at: row.verified_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TokenLogRow {
    id: i64,
    appointment_id: i64,
    qr_token: String,
    verification_result: String,
    is_valid: bool,
    timestamp: DateTime<Utc>,
}

impl From<TokenLogRow> for TokenLog {
    fn from(row: TokenLogRow) -> Self {
        TokenLog {
            id: row.id,
            appointment_id: row.appointment_id,
            qr_token: row.qr_token,
            verification_result: row.verification_result,
            is_valid: row.is_valid,
            timestamp: row.timestamp,
        }
    }
}

#[derive(Debug, FromRow)]
struct AvailabilityRow {
    id: i64,
    doctor_id: i64,
    day_of_week: i16,
    start_time: NaiveTime,
    end_time: NaiveTime,
    slot_minutes: i32,
    is_available: bool,
}

impl From<AvailabilityRow> for AvailabilityWindow {
    fn from(row: AvailabilityRow) -> Self {
        AvailabilityWindow {
            id: row.id,
            doctor_id: row.doctor_id,
            day_of_week: row.day_of_week,
            start_time: row.start_time,
            end_time: row.end_time,
            slot_minutes: row.slot_minutes,
            is_available: row.is_available,
        }
    }
}

fn map_write_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::UniqueViolation(db.message().to_string())
        }
        _ => StoreError::Database(error),
    }
}

// ==============================================================================
// POOL
// ==============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &AppConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.database_url)
            .await?;

        info!("Connected to Postgres (max {} connections)", config.database_max_connections);
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1");
        sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Appointment::try_from)
            .transpose()
    }

    async fn payment_for_appointment(&self, appointment_id: i64) -> Result<Option<Payment>, StoreError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE appointment_id = $1");
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(appointment_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn token_logs(&self, appointment_id: i64) -> Result<Vec<TokenLog>, StoreError> {
        let sql = format!(
            "SELECT {TOKEN_LOG_COLUMNS} FROM token_logs WHERE appointment_id = $1 ORDER BY id"
        );
        let rows = sqlx::query_as::<_, TokenLogRow>(&sql)
            .bind(appointment_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(TokenLog::from).collect())
    }

    async fn stale_pending_payments(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE status = 'pending' AND created_at < $1 \
             ORDER BY created_at LIMIT $2"
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    async fn availability_windows(&self, doctor_id: i64) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let rows = sqlx::query_as::<_, AvailabilityRow>(
            "SELECT id, doctor_id, day_of_week, start_time, end_time, slot_minutes, is_available \
             FROM doctor_availability WHERE doctor_id = $1 \
             ORDER BY day_of_week, start_time",
        )
        .bind(doctor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AvailabilityWindow::from).collect())
    }
}

// ==============================================================================
// TRANSACTION
// ==============================================================================

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_doctor_day(&mut self, doctor_id: i64, date: NaiveDate) -> Result<(), StoreError> {
        // Key collisions only over-serialise unrelated doctors; they never under-lock.
        let doctor_key = (doctor_id % i64::from(i32::MAX)) as i32;
        let day_key = date.num_days_from_ce();
        debug!("Taking day lock for doctor {} on {}", doctor_id, date);

        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(doctor_key)
            .bind(day_key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn day_appointments(
        &mut self,
        doctor_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE doctor_id = $1 AND appointment_date = $2 ORDER BY id"
        );
        sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(doctor_id)
            .bind(date)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(Appointment::try_from)
            .collect()
    }

    async fn insert_appointment(&mut self, new: &NewAppointment) -> Result<Appointment, StoreError> {
        let sql = format!(
            "INSERT INTO appointments \
             (patient_id, doctor_id, appointment_date, appointment_time, reason, status, \
              payment_status, token_number, expires_at, is_used) \
             VALUES ($1, $2, $3, $4, $5, 'pending', 'unpaid', $6, $7, FALSE) \
             RETURNING {APPOINTMENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(new.patient_id)
            .bind(new.doctor_id)
            .bind(new.appointment_date)
            .bind(new.appointment_time)
            .bind(&new.reason)
            .bind(&new.token_number)
            .bind(new.expires_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_write_error)?;
        Appointment::try_from(row)
    }

    async fn find_appointment(&mut self, id: i64) -> Result<Option<Appointment>, StoreError> {
        let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1");
        sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Appointment::try_from)
            .transpose()
    }

    async fn lock_appointment(&mut self, id: i64) -> Result<Option<Appointment>, StoreError> {
        let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Appointment::try_from)
            .transpose()
    }

    async fn lock_appointment_with_token(
        &mut self,
        id: i64,
        qr_token: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE id = $1 AND qr_token = $2 FOR UPDATE"
        );
        sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id)
            .bind(qr_token)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Appointment::try_from)
            .transpose()
    }

    async fn save_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE appointments SET \
               status = $2, payment_status = $3, qr_token = $4, token_number = $5, \
               token_seq = $6, expires_at = $7, is_used = $8, verification_time = $9, \
               updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(appointment.id)
        .bind(appointment.status.as_str())
        .bind(appointment.payment_status.as_str())
        .bind(&appointment.qr_token)
        .bind(&appointment.token_number)
        .bind(appointment.token_seq)
        .bind(appointment.expires_at)
        .bind(appointment.is_used)
        .bind(appointment.verification_time)
        .execute(&mut *self.tx)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn insert_payment(&mut self, new: &NewPayment) -> Result<Payment, StoreError> {
        let sql = format!(
            "INSERT INTO payments (appointment_id, patient_id, amount_minor, transaction_uuid, status) \
             VALUES ($1, $2, $3, $4, 'pending') RETURNING {PAYMENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(new.appointment_id)
            .bind(new.patient_id)
            .bind(new.amount.minor())
            .bind(&new.transaction_uuid)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_write_error)?;
        Payment::try_from(row)
    }

    async fn find_payment(&mut self, transaction_uuid: &str) -> Result<Option<Payment>, StoreError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE transaction_uuid = $1");
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(transaction_uuid)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn lock_pending_payment(&mut self, transaction_uuid: &str) -> Result<Option<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE transaction_uuid = $1 AND status = 'pending' FOR UPDATE"
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(transaction_uuid)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query("UPDATE payments SET status = $2, ref_id = $3, verified_at = $4 WHERE id = $1")
            .bind(payment.id)
            .bind(payment.status.as_str())
            .bind(&payment.ref_id)
            .bind(payment.verified_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn has_valid_token_log(&mut self, appointment_id: i64, qr_token: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM token_logs \
             WHERE appointment_id = $1 AND qr_token = $2 AND is_valid)",
        )
        .bind(appointment_id)
        .bind(qr_token)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_token_log(&mut self, log: &NewTokenLog) -> Result<TokenLog, StoreError> {
        let sql = format!(
            "INSERT INTO token_logs (appointment_id, qr_token, verification_result, is_valid, timestamp) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {TOKEN_LOG_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TokenLogRow>(&sql)
            .bind(log.appointment_id)
            .bind(&log.qr_token)
            .bind(&log.verification_result)
            .bind(log.is_valid)
            .bind(log.timestamp)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_write_error)?;
        Ok(row.into())
    }

    async fn expire_stale(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE appointments SET status = 'expired', updated_at = NOW() \
             WHERE status = 'confirmed' AND is_used = FALSE AND expires_at < $1",
        )
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
