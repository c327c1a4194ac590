use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use shared_models::{
    Appointment, AppointmentStatus, AvailabilityWindow, NewAppointment, NewPayment, NewTokenLog,
    Payment, PaymentStatus, TokenLog, TransactionStatus,
};

use crate::store::{Store, StoreError, StoreTx};

#[derive(Debug, Clone, Default)]
struct Tables {
    appointments: Vec<Appointment>,
    payments: Vec<Payment>,
    token_logs: Vec<TokenLog>,
    availability: Vec<AvailabilityWindow>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store for tests and database-less runs.
///
/// A transaction holds the only lock on all tables from `begin` until it is
/// committed or dropped, and works on a private copy that replaces the shared
/// tables on commit. Every transaction is therefore serialisable.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the read-only availability table.
    pub async fn add_availability(&self, mut window: AvailabilityWindow) -> AvailabilityWindow {
        let mut tables = self.tables.lock().await;
        window.id = tables.next_id();
        tables.availability.push(window.clone());
        window
    }

    pub async fn all_appointments(&self) -> Vec<Appointment> {
        self.tables.lock().await.appointments.clone()
    }

    pub async fn all_payments(&self) -> Vec<Payment> {
        self.tables.lock().await.payments.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.appointments.iter().find(|a| a.id == id).cloned())
    }

    async fn payment_for_appointment(&self, appointment_id: i64) -> Result<Option<Payment>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .iter()
            .find(|p| p.appointment_id == appointment_id)
            .cloned())
    }

    async fn token_logs(&self, appointment_id: i64) -> Result<Vec<TokenLog>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .token_logs
            .iter()
            .filter(|log| log.appointment_id == appointment_id)
            .cloned()
            .collect())
    }

    async fn stale_pending_payments(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables.lock().await;
        let mut pending: Vec<Payment> = tables
            .payments
            .iter()
            .filter(|p| p.status == TransactionStatus::Pending && p.created_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.created_at);
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn availability_windows(&self, doctor_id: i64) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let tables = self.tables.lock().await;
        let mut windows: Vec<AvailabilityWindow> = tables
            .availability
            .iter()
            .filter(|w| w.doctor_id == doctor_id)
            .cloned()
            .collect();
        windows.sort_by_key(|w| (w.day_of_week, w.start_time));
        Ok(windows)
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

impl MemoryTx {
    fn appointment_mut(&mut self, id: i64) -> Option<&mut Appointment> {
        self.work.appointments.iter_mut().find(|a| a.id == id)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_doctor_day(&mut self, _doctor_id: i64, _date: NaiveDate) -> Result<(), StoreError> {
        // The transaction already excludes every other writer.
        Ok(())
    }

    async fn day_appointments(
        &mut self,
        doctor_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .work
            .appointments
            .iter()
            .filter(|a| a.doctor_id == doctor_id && a.appointment_date == date)
            .cloned()
            .collect())
    }

    async fn insert_appointment(&mut self, new: &NewAppointment) -> Result<Appointment, StoreError> {
        let now = Utc::now();
        let appointment = Appointment {
            id: self.work.next_id(),
            patient_id: new.patient_id,
            doctor_id: new.doctor_id,
            appointment_date: new.appointment_date,
            appointment_time: new.appointment_time,
            reason: new.reason.clone(),
            status: AppointmentStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            qr_token: None,
            token_number: Some(new.token_number.clone()),
            token_seq: None,
            expires_at: Some(new.expires_at),
            is_used: false,
            verification_time: None,
            created_at: now,
            updated_at: now,
        };
        self.work.appointments.push(appointment.clone());
        Ok(appointment)
    }

    async fn find_appointment(&mut self, id: i64) -> Result<Option<Appointment>, StoreError> {
        Ok(self.work.appointments.iter().find(|a| a.id == id).cloned())
    }

    async fn lock_appointment(&mut self, id: i64) -> Result<Option<Appointment>, StoreError> {
        self.find_appointment(id).await
    }

    async fn lock_appointment_with_token(
        &mut self,
        id: i64,
        qr_token: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        Ok(self
            .work
            .appointments
            .iter()
            .find(|a| a.id == id && a.qr_token.as_deref() == Some(qr_token))
            .cloned())
    }

    async fn save_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        let duplicate_seq = appointment.token_seq.is_some()
            && self.work.appointments.iter().any(|other| {
                other.id != appointment.id
                    && other.doctor_id == appointment.doctor_id
                    && other.appointment_date == appointment.appointment_date
                    && other.token_seq == appointment.token_seq
            });
        if duplicate_seq {
            return Err(StoreError::UniqueViolation(format!(
                "token sequence {:?} already used for doctor {} on {}",
                appointment.token_seq, appointment.doctor_id, appointment.appointment_date
            )));
        }

        let stored = self
            .appointment_mut(appointment.id)
            .ok_or_else(|| StoreError::Corrupt(format!("appointment {} does not exist", appointment.id)))?;
        *stored = Appointment {
            updated_at: Utc::now(),
            ..appointment.clone()
        };
        Ok(())
    }

    async fn insert_payment(&mut self, new: &NewPayment) -> Result<Payment, StoreError> {
        if self.work.payments.iter().any(|p| p.transaction_uuid == new.transaction_uuid) {
            return Err(StoreError::UniqueViolation(format!(
                "transaction_uuid {} already exists",
                new.transaction_uuid
            )));
        }
        if self.work.payments.iter().any(|p| p.appointment_id == new.appointment_id) {
            return Err(StoreError::UniqueViolation(format!(
                "appointment {} already has a payment",
                new.appointment_id
            )));
        }

        let payment = Payment {
            id: self.work.next_id(),
            appointment_id: new.appointment_id,
            patient_id: new.patient_id,
            amount: new.amount,
            transaction_uuid: new.transaction_uuid.clone(),
            status: TransactionStatus::Pending,
            ref_id: None,
            verified_at: None,
            created_at: Utc::now(),
        };
        self.work.payments.push(payment.clone());
        Ok(payment)
    }

    async fn find_payment(&mut self, transaction_uuid: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .work
            .payments
            .iter()
            .find(|p| p.transaction_uuid == transaction_uuid)
            .cloned())
    }

    async fn lock_pending_payment(&mut self, transaction_uuid: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .work
            .payments
            .iter()
            .find(|p| p.transaction_uuid == transaction_uuid && p.status == TransactionStatus::Pending)
            .cloned())
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        let stored = self
            .work
            .payments
            .iter_mut()
            .find(|p| p.id == payment.id)
            .ok_or_else(|| StoreError::Corrupt(format!("payment {} does not exist", payment.id)))?;
        *stored = payment.clone();
        Ok(())
    }

    async fn has_valid_token_log(&mut self, appointment_id: i64, qr_token: &str) -> Result<bool, StoreError> {
        Ok(self
            .work
            .token_logs
            .iter()
            .any(|log| log.appointment_id == appointment_id && log.qr_token == qr_token && log.is_valid))
    }

    async fn insert_token_log(&mut self, log: &NewTokenLog) -> Result<TokenLog, StoreError> {
        if log.is_valid && self.has_valid_token_log(log.appointment_id, &log.qr_token).await? {
            return Err(StoreError::UniqueViolation(format!(
                "valid token log already recorded for appointment {}",
                log.appointment_id
            )));
        }

        let entry = TokenLog {
            id: self.work.next_id(),
            appointment_id: log.appointment_id,
            qr_token: log.qr_token.clone(),
            verification_result: log.verification_result.clone(),
            is_valid: log.is_valid,
            timestamp: log.timestamp,
        };
        self.work.token_logs.push(entry.clone());
        Ok(entry)
    }

    async fn expire_stale(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut expired = 0;
        for appointment in self.work.appointments.iter_mut() {
            let stale = appointment.status == AppointmentStatus::Confirmed
                && !appointment.is_used
                && appointment.expires_at.map_or(false, |deadline| deadline < now);
            if stale {
                appointment.status = AppointmentStatus::Expired;
                appointment.updated_at = Utc::now();
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
