use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use shared_database::{DbHandle, StoreTx};
use shared_models::{Appointment, AppointmentAction, AppointmentStatus, PaymentStatus};
use shared_utils::notification::{dispatch, Notification, NotificationKind, Notifier};

use crate::error::LifecycleError;
use crate::models::ConfirmedAppointment;
use crate::services::token::TokenIssuer;
use crate::state::LifecycleState;

// ==============================================================================
// TRANSITIONS INSIDE AN OPEN TRANSACTION
// ==============================================================================

async fn locked(tx: &mut dyn StoreTx, appointment_id: i64) -> Result<Appointment, LifecycleError> {
    tx.lock_appointment(appointment_id)
        .await?
        .ok_or_else(|| LifecycleError::NotFound(format!("Appointment {} not found", appointment_id)))
}

/// Records a settled payment on the appointment.
pub async fn mark_paid(tx: &mut dyn StoreTx, appointment_id: i64) -> Result<Appointment, LifecycleError> {
    let mut appointment = locked(tx, appointment_id).await?;
    appointment.payment_status = appointment.payment_status.settle()?;
    if appointment.status.is_terminal() {
        warn!(
            "Payment settled for appointment {} which is already {}",
            appointment.id, appointment.status
        );
    }
    tx.save_appointment(&appointment).await?;
    Ok(appointment)
}

/// Records a failed payment and releases a still-pending booking.
pub async fn mark_payment_failed(
    tx: &mut dyn StoreTx,
    appointment_id: i64,
) -> Result<Appointment, LifecycleError> {
    let mut appointment = locked(tx, appointment_id).await?;
    appointment.payment_status = appointment.payment_status.fail()?;
    if appointment.status == AppointmentStatus::Pending {
        appointment.status = appointment.status.apply(AppointmentAction::Cancel)?;
    }
    tx.save_appointment(&appointment).await?;
    Ok(appointment)
}

pub async fn cancel(tx: &mut dyn StoreTx, appointment_id: i64) -> Result<Appointment, LifecycleError> {
    let mut appointment = locked(tx, appointment_id).await?;
    appointment.status = appointment.status.apply(AppointmentAction::Cancel)?;
    tx.save_appointment(&appointment).await?;
    Ok(appointment)
}

/// Redeems a credential on an appointment the caller has already locked.
pub async fn complete_check_in(
    tx: &mut dyn StoreTx,
    appointment: &mut Appointment,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    appointment.status = appointment.status.apply(AppointmentAction::CheckIn)?;
    appointment.is_used = true;
    appointment.verification_time = Some(now);
    tx.save_appointment(appointment).await?;
    Ok(())
}

// ==============================================================================
// APPOINTMENT LIFECYCLE SERVICE
// ==============================================================================

pub struct AppointmentLifecycleService {
    store: DbHandle,
    issuer: TokenIssuer,
    notifier: Arc<dyn Notifier>,
}

impl AppointmentLifecycleService {
    pub fn new(state: &LifecycleState) -> Self {
        Self {
            store: Arc::clone(&state.store),
            issuer: TokenIssuer::new(state.config.qr_jwt_secret.clone()),
            notifier: Arc::clone(&state.notifier),
        }
    }

    pub async fn get(&self, appointment_id: i64) -> Result<Appointment, LifecycleError> {
        self.store
            .appointment(appointment_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("Appointment {} not found", appointment_id)))
    }

    /// Confirms a paid appointment and issues its check-in credential.
    ///
    /// Locks are taken day first, then row, so concurrent confirmations for the
    /// same doctor and date queue behind each other and draw consecutive sequences.
    #[instrument(skip(self))]
    pub async fn confirm_at(
        &self,
        appointment_id: i64,
        now: DateTime<Utc>,
    ) -> Result<ConfirmedAppointment, LifecycleError> {
        let snapshot = self.get(appointment_id).await?;

        let mut tx = self.store.begin().await?;
        tx.lock_doctor_day(snapshot.doctor_id, snapshot.appointment_date).await?;
        let mut appointment = locked(tx.as_mut(), appointment_id).await?;

        if appointment.doctor_id != snapshot.doctor_id
            || appointment.appointment_date != snapshot.appointment_date
        {
            return Err(LifecycleError::StateConflict(
                "Appointment moved while it was being confirmed".to_string(),
            ));
        }
        if appointment.status != AppointmentStatus::Pending {
            return Err(LifecycleError::StateConflict(format!(
                "Only pending appointments can be confirmed; this one is {}",
                appointment.status
            )));
        }
        if appointment.payment_status != PaymentStatus::Paid {
            return Err(LifecycleError::StateConflict(format!(
                "Appointment payment is {}; it must be paid before confirmation",
                appointment.payment_status
            )));
        }

        let day = tx
            .day_appointments(appointment.doctor_id, appointment.appointment_date)
            .await?;
        let slot_taken = day.iter().any(|other| {
            other.id != appointment.id
                && other.appointment_time == appointment.appointment_time
                && matches!(other.status, AppointmentStatus::Confirmed | AppointmentStatus::Completed)
        });
        if slot_taken {
            return Err(LifecycleError::SlotTaken);
        }

        let issued = self.issuer.issue(tx.as_mut(), &appointment, now).await?;

        appointment.status = appointment.status.apply(AppointmentAction::Confirm)?;
        appointment.qr_token = Some(issued.credential);
        appointment.token_number = Some(issued.token_number.clone());
        appointment.token_seq = Some(issued.token_seq);
        appointment.expires_at = Some(issued.expires_at);

        tx.save_appointment(&appointment).await?;
        tx.commit().await?;

        info!(
            "Appointment {} confirmed as {} (expires {})",
            appointment.id, issued.token_number, issued.expires_at
        );

        let payment = match self.store.payment_for_appointment(appointment.id).await {
            Ok(payment) => payment,
            Err(e) => {
                warn!("Could not load payment for confirmation notice {}: {}", appointment.id, e);
                None
            }
        };
        dispatch(
            Arc::clone(&self.notifier),
            Notification {
                kind: NotificationKind::AppointmentConfirmed,
                appointment: appointment.clone(),
                payment,
                qr_image: Some(issued.qr_image.clone()),
            },
        );

        Ok(ConfirmedAppointment {
            appointment,
            qr_image: issued.qr_image,
        })
    }

    pub async fn confirm(&self, appointment_id: i64) -> Result<ConfirmedAppointment, LifecycleError> {
        self.confirm_at(appointment_id, Utc::now()).await
    }

    /// Cancels a pending or confirmed appointment.
    #[instrument(skip(self))]
    pub async fn reject(
        &self,
        appointment_id: i64,
        reason: Option<&str>,
    ) -> Result<Appointment, LifecycleError> {
        let mut tx = self.store.begin().await?;
        let appointment = cancel(tx.as_mut(), appointment_id).await?;
        tx.commit().await?;

        info!(
            "Appointment {} rejected: {}",
            appointment_id,
            reason.unwrap_or("no reason given")
        );
        Ok(appointment)
    }
}
