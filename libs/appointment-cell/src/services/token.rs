use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use qrcode::{render::svg, QrCode};
use serde_json::Value;
use tracing::{debug, warn};

use shared_database::StoreTx;
use shared_models::Appointment;

use crate::error::{CheckInError, LifecycleError};
use crate::models::{CredentialClaims, IssuedToken};

/// Signs check-in credentials and allocates the per-doctor, per-day ticket numbers.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// `TKN-007-20250301-0001`
    pub fn display_sequence(doctor_id: i64, date: NaiveDate, seq: i32) -> String {
        format!("TKN-{:03}-{}-{:04}", doctor_id, date.format("%Y%m%d"), seq)
    }

    /// Never less than a day from confirmation, never less than an hour past the visit.
    pub fn credential_expiry(now: DateTime<Utc>, scheduled_at: DateTime<Utc>) -> DateTime<Utc> {
        (now + Duration::hours(24)).max(scheduled_at + Duration::hours(1))
    }

    /// Next free sequence for the doctor's day. The caller must hold the doctor/day lock.
    pub async fn next_sequence(
        tx: &mut dyn StoreTx,
        doctor_id: i64,
        date: NaiveDate,
    ) -> Result<i32, LifecycleError> {
        let day = tx.day_appointments(doctor_id, date).await?;
        let current = day.iter().filter_map(|a| a.token_seq).max().unwrap_or(0);
        Ok(current + 1)
    }

    /// Issues the credential for an appointment being confirmed inside `tx`.
    pub async fn issue(
        &self,
        tx: &mut dyn StoreTx,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, LifecycleError> {
        if self.secret.is_empty() {
            return Err(LifecycleError::Fatal("check-in signing secret is not set".to_string()));
        }

        let token_seq = Self::next_sequence(tx, appointment.doctor_id, appointment.appointment_date).await?;
        let token_number = Self::display_sequence(appointment.doctor_id, appointment.appointment_date, token_seq);
        let expires_at = Self::credential_expiry(now, appointment.scheduled_at());

        let claims = CredentialClaims {
            appointment_id: appointment.id,
            doctor_id: appointment.doctor_id,
            patient_id: appointment.patient_id,
            token_number: token_number.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let credential = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| LifecycleError::Fatal(format!("credential signing failed: {}", e)))?;

        let qr_image = render_qr(&credential)?;

        debug!(
            "Issued {} for appointment {} valid until {}",
            token_number, appointment.id, expires_at
        );

        Ok(IssuedToken {
            credential,
            token_number,
            token_seq,
            expires_at,
            qr_image,
        })
    }

    /// Checks structure, signature and expiry against `now`. No database access.
    pub fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<CredentialClaims, CheckInError> {
        if self.secret.is_empty() {
            return Err(CheckInError::Fatal("check-in signing secret is not set".to_string()));
        }

        check_structure(token)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<CredentialClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            warn!("Rejected check-in credential: {}", e);
            CheckInError::InvalidToken
        })?;

        if data.claims.exp <= now.timestamp() {
            return Err(CheckInError::Expired);
        }
        Ok(data.claims)
    }
}

/// Three base64url segments whose first two are JSON objects.
fn check_structure(token: &str) -> Result<(), CheckInError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(CheckInError::InvalidFormat);
    }

    for segment in &parts[..2] {
        let bytes = URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|_| CheckInError::InvalidFormat)?;
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(_)) => {}
            _ => return Err(CheckInError::InvalidFormat),
        }
    }

    URL_SAFE_NO_PAD
        .decode(parts[2])
        .map_err(|_| CheckInError::InvalidFormat)?;
    Ok(())
}

/// SVG QR code of `payload` as a `data:` URI.
pub fn render_qr(payload: &str) -> Result<String, LifecycleError> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| LifecycleError::Fatal(format!("QR generation failed: {}", e)))?;

    let svg_string = code
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .quiet_zone(true)
        .build();

    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg_string)))
}
