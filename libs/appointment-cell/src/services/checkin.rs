use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use shared_database::DbHandle;
use shared_models::{Appointment, AppointmentStatus, NewTokenLog};

use crate::error::{CheckInError, LifecycleError};
use crate::models::{CheckInResult, CredentialClaims};
use crate::services::lifecycle;
use crate::services::token::TokenIssuer;
use crate::state::LifecycleState;

const VALID: &str = "VALID";

/// Redeems check-in credentials, each at most once.
pub struct CheckInVerifier {
    store: DbHandle,
    issuer: TokenIssuer,
}

impl CheckInVerifier {
    pub fn new(state: &LifecycleState) -> Self {
        Self {
            store: Arc::clone(&state.store),
            issuer: TokenIssuer::new(state.config.qr_jwt_secret.clone()),
        }
    }

    #[instrument(skip(self, token))]
    pub async fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<CheckInResult, CheckInError> {
        let claims = self.issuer.decode(token, now)?;

        match self.redeem(&claims, token, now).await {
            Ok(result) => {
                info!(
                    "Appointment {} checked in with {}",
                    claims.appointment_id, claims.token_number
                );
                Ok(result)
            }
            Err(e) => {
                if !matches!(
                    e,
                    CheckInError::AppointmentNotFound | CheckInError::Storage(_) | CheckInError::Fatal(_)
                ) {
                    self.log_rejection(claims.appointment_id, token, e.code(), now).await;
                }
                Err(e)
            }
        }
    }

    pub async fn verify(&self, token: &str) -> Result<CheckInResult, CheckInError> {
        self.verify_at(token, Utc::now()).await
    }

    /// The whole redemption is one transaction: any error drops it and rolls back.
    async fn redeem(
        &self,
        claims: &CredentialClaims,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckInResult, CheckInError> {
        let mut tx = self.store.begin().await?;

        let Some(mut appointment) = tx.lock_appointment_with_token(claims.appointment_id, token).await? else {
            // Diagnostic read only; it never authorises anything.
            let existing = tx.find_appointment(claims.appointment_id).await?;
            return Err(match existing {
                None => CheckInError::AppointmentNotFound,
                Some(_) => CheckInError::TokenMismatch,
            });
        };

        if let Some(rejection) = refusal(&appointment, claims, now) {
            return Err(rejection);
        }

        lifecycle::complete_check_in(tx.as_mut(), &mut appointment, now)
            .await
            .map_err(|e| match e {
                LifecycleError::Storage(e) => CheckInError::Storage(e),
                _ => CheckInError::InvalidStatus,
            })?;

        if !tx.has_valid_token_log(appointment.id, token).await? {
            tx.insert_token_log(&NewTokenLog {
                appointment_id: appointment.id,
                qr_token: token.to_string(),
                verification_result: VALID.to_string(),
                is_valid: true,
                timestamp: now,
            })
            .await?;
        }

        tx.commit().await?;

        Ok(CheckInResult {
            appointment_id: appointment.id,
            doctor_id: appointment.doctor_id,
            patient_id: appointment.patient_id,
        })
    }

    /// Audit entry for a refused attempt, in its own transaction. Failure is only logged.
    async fn log_rejection(&self, appointment_id: i64, token: &str, code: &str, now: DateTime<Utc>) {
        let entry = NewTokenLog {
            appointment_id,
            qr_token: token.to_string(),
            verification_result: code.to_string(),
            is_valid: false,
            timestamp: now,
        };

        let result = async {
            let mut tx = self.store.begin().await?;
            tx.insert_token_log(&entry).await?;
            tx.commit().await
        }
        .await;

        if let Err(e) = result {
            warn!("Could not record rejected check-in for {}: {}", appointment_id, e);
        }
    }
}

/// Why a row matching the exact credential still cannot be redeemed.
fn refusal(appointment: &Appointment, claims: &CredentialClaims, now: DateTime<Utc>) -> Option<CheckInError> {
    if appointment.doctor_id != claims.doctor_id || appointment.patient_id != claims.patient_id {
        return Some(CheckInError::TokenMismatch);
    }
    if appointment.is_used {
        return Some(CheckInError::AlreadyUsed);
    }
    if appointment.status == AppointmentStatus::Expired
        || appointment.expires_at.map_or(true, |deadline| deadline <= now)
    {
        return Some(CheckInError::Expired);
    }
    if appointment.status != AppointmentStatus::Confirmed {
        return Some(CheckInError::InvalidStatus);
    }
    None
}
