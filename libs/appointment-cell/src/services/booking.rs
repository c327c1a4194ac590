use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use doctor_cell::AvailabilityIndex;
use payment_cell::EsewaGateway;
use shared_database::DbHandle;
use shared_models::{Amount, NewAppointment, NewPayment};

use crate::error::LifecycleError;
use crate::models::{BookAppointmentRequest, BookingReceipt};
use crate::state::LifecycleState;

const MAX_REASON_CHARS: usize = 500;

pub struct AppointmentBookingService {
    store: DbHandle,
    gateway: Arc<EsewaGateway>,
    availability: AvailabilityIndex,
    consultation_fee: String,
    provisional_hold: Duration,
}

impl AppointmentBookingService {
    pub fn new(state: &LifecycleState) -> Self {
        Self {
            store: Arc::clone(&state.store),
            gateway: Arc::clone(&state.gateway),
            availability: AvailabilityIndex::new(Arc::clone(&state.store)),
            consultation_fee: state.config.consultation_fee.clone(),
            provisional_hold: Duration::minutes(state.config.provisional_hold_minutes),
        }
    }

    /// Reserves the slot and opens a pending payment for it.
    ///
    /// The appointment, its payment and the signed gateway form are produced in
    /// one transaction: if the form cannot be signed nothing is kept.
    #[instrument(skip(self, request), fields(doctor_id = request.doctor_id))]
    pub async fn book_at(
        &self,
        patient_id: i64,
        request: BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingReceipt, LifecycleError> {
        validate_request(&request, now)?;

        let open = self
            .availability
            .is_available(request.doctor_id, request.appointment_date, request.appointment_time)
            .await?;
        if !open {
            return Err(LifecycleError::DoctorNotAvailable {
                doctor_id: request.doctor_id,
                date: request.appointment_date,
                time: request.appointment_time,
            });
        }

        let fee: Amount = self
            .consultation_fee
            .parse()
            .map_err(|e| LifecycleError::Fatal(format!("consultation fee is invalid: {}", e)))?;

        let mut tx = self.store.begin().await?;
        tx.lock_doctor_day(request.doctor_id, request.appointment_date).await?;

        let day = tx
            .day_appointments(request.doctor_id, request.appointment_date)
            .await?;
        if day
            .iter()
            .any(|a| a.appointment_time == request.appointment_time && a.holds_slot(now))
        {
            return Err(LifecycleError::SlotTaken);
        }

        let appointment = tx
            .insert_appointment(&NewAppointment {
                patient_id,
                doctor_id: request.doctor_id,
                appointment_date: request.appointment_date,
                appointment_time: request.appointment_time,
                reason: request.reason.clone(),
                token_number: placeholder_token_number(),
                expires_at: now + self.provisional_hold,
            })
            .await?;

        let payment = tx
            .insert_payment(&NewPayment {
                appointment_id: appointment.id,
                patient_id,
                amount: fee,
                transaction_uuid: EsewaGateway::transaction_uuid(appointment.id, now),
            })
            .await?;

        let payment_form = self.gateway.payment_form(&payment)?;

        tx.commit().await?;

        info!(
            "Appointment {} booked for patient {} with doctor {} at {} {}",
            appointment.id, patient_id, appointment.doctor_id, appointment.appointment_date, appointment.appointment_time
        );
        debug!("Pending payment {} for {}", payment.transaction_uuid, payment.amount);

        Ok(BookingReceipt {
            appointment,
            payment,
            payment_form,
        })
    }

    pub async fn book(
        &self,
        patient_id: i64,
        request: BookAppointmentRequest,
    ) -> Result<BookingReceipt, LifecycleError> {
        self.book_at(patient_id, request, Utc::now()).await
    }
}

fn validate_request(request: &BookAppointmentRequest, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    if request.doctor_id <= 0 {
        return Err(LifecycleError::Validation("doctor_id must be a positive id".to_string()));
    }

    if let Some(reason) = &request.reason {
        if reason.chars().count() > MAX_REASON_CHARS {
            return Err(LifecycleError::Validation(format!(
                "reason must be at most {} characters",
                MAX_REASON_CHARS
            )));
        }
    }

    let scheduled = request.appointment_date.and_time(request.appointment_time).and_utc();
    if scheduled <= now {
        return Err(LifecycleError::Validation(
            "appointment must be scheduled in the future".to_string(),
        ));
    }
    Ok(())
}

/// Shown until confirmation assigns the real ticket number.
fn placeholder_token_number() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("TMP-{}", &id[..8])
}
