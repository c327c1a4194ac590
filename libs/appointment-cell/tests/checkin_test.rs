mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use futures::future::join_all;
use jsonwebtoken::{encode, EncodingKey, Header};

use appointment_cell::services::{CheckInVerifier, ExpirySweeper};
use appointment_cell::{CheckInError, CredentialClaims};
use shared_database::{DbHandle, Store};
use shared_models::{Appointment, AppointmentStatus};
use shared_utils::test_utils::TestConfig;

use common::*;

/// Confirmed at 08:00 on the day; the credential lasts until 08:00 the next day.
async fn confirmed(h: &Harness, slot: &str) -> Appointment {
    let receipt = h.book_paid(slot).await;
    h.lifecycle()
        .confirm_at(receipt.appointment.id, at(2025, 3, 1, 8, 0))
        .await
        .unwrap()
        .appointment
}

fn verifier(h: &Harness) -> CheckInVerifier {
    CheckInVerifier::new(&h.state)
}

fn credential(appointment: &Appointment) -> String {
    appointment.qr_token.clone().unwrap()
}

fn claims_for(appointment: &Appointment) -> CredentialClaims {
    CredentialClaims {
        appointment_id: appointment.id,
        doctor_id: appointment.doctor_id,
        patient_id: appointment.patient_id,
        token_number: appointment.token_number.clone().unwrap(),
        iat: at(2025, 3, 1, 8, 0).timestamp(),
        exp: at(2025, 3, 2, 8, 0).timestamp(),
    }
}

fn sign_claims(claims: &CredentialClaims, secret: &str) -> String {
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

#[tokio::test]
async fn test_valid_credential_checks_in_once() {
    let h = Harness::new().await;
    let appointment = confirmed(&h, "10:00").await;
    let token = credential(&appointment);
    let now = at(2025, 3, 1, 9, 55);

    let result = verifier(&h).verify_at(&token, now).await.unwrap();
    assert_eq!(result.appointment_id, appointment.id);
    assert_eq!(result.doctor_id, DOCTOR);
    assert_eq!(result.patient_id, PATIENT);

    let stored = h.appointment(appointment.id).await;
    assert_eq!(stored.status, AppointmentStatus::Completed);
    assert!(stored.is_used);
    assert_eq!(stored.verification_time, Some(now));

    let again = verifier(&h).verify_at(&token, now).await;
    assert_matches!(again, Err(CheckInError::AlreadyUsed));

    let logs = h.store.token_logs(appointment.id).await.unwrap();
    assert_eq!(logs.iter().filter(|l| l.is_valid).count(), 1);
    assert!(logs
        .iter()
        .any(|l| !l.is_valid && l.verification_result == "ALREADY_USED"));
}

#[tokio::test]
async fn test_concurrent_scans_redeem_exactly_once() {
    let h = Harness::new().await;
    let appointment = confirmed(&h, "10:00").await;
    let token = credential(&appointment);
    let verifier = Arc::new(verifier(&h));

    let scans = (0..10).map(|_| {
        let verifier = Arc::clone(&verifier);
        let token = token.clone();
        async move { verifier.verify_at(&token, at(2025, 3, 1, 9, 55)).await }
    });
    let results = join_all(scans).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(CheckInError::AlreadyUsed)))
            .count(),
        9
    );

    let logs = h.store.token_logs(appointment.id).await.unwrap();
    assert_eq!(logs.iter().filter(|l| l.is_valid).count(), 1);
}

#[tokio::test]
async fn test_credential_past_deadline_is_expired() {
    let h = Harness::new().await;
    let appointment = confirmed(&h, "10:00").await;

    let result = verifier(&h)
        .verify_at(&credential(&appointment), at(2025, 3, 2, 8, 0))
        .await;

    assert_matches!(result, Err(CheckInError::Expired));
    assert_eq!(h.appointment(appointment.id).await.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn test_swept_appointment_is_expired_even_with_live_credential() {
    let h = Harness::new().await;
    let appointment = confirmed(&h, "10:00").await;
    let store: DbHandle = Arc::new(h.store.clone());

    let swept = ExpirySweeper::new(store, std::time::Duration::from_secs(60))
        .sweep_once(at(2025, 3, 2, 9, 0))
        .await
        .unwrap();
    assert_eq!(swept, 1);

    let result = verifier(&h)
        .verify_at(&credential(&appointment), at(2025, 3, 1, 10, 0))
        .await;
    assert_matches!(result, Err(CheckInError::Expired));

    let logs = h.store.token_logs(appointment.id).await.unwrap();
    assert!(logs.iter().any(|l| !l.is_valid && l.verification_result == "EXPIRED"));
}

#[tokio::test]
async fn test_malformed_credentials_are_rejected_before_lookup() {
    let h = Harness::new().await;
    let now = at(2025, 3, 1, 10, 0);

    for garbage in ["", "not-a-token", "a.b.c", "e30.e30", "bm90IGpzb24.e30.c2ln"] {
        let result = verifier(&h).verify_at(garbage, now).await;
        assert_matches!(result, Err(CheckInError::InvalidFormat), "input {:?}", garbage);
    }
}

#[tokio::test]
async fn test_forged_credentials_are_invalid() {
    let h = Harness::new().await;
    let appointment = confirmed(&h, "10:00").await;
    let now = at(2025, 3, 1, 10, 0);

    let foreign = sign_claims(&claims_for(&appointment), "some-other-secret");
    assert_matches!(verifier(&h).verify_at(&foreign, now).await, Err(CheckInError::InvalidToken));

    // Rewrite the payload but keep the original signature.
    let token = credential(&appointment);
    let parts: Vec<&str> = token.split('.').collect();
    let mut claims = claims_for(&appointment);
    claims.patient_id = 4242;
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    let tampered = format!("{}.{}.{}", parts[0], payload, parts[2]);
    assert_matches!(verifier(&h).verify_at(&tampered, now).await, Err(CheckInError::InvalidToken));

    assert_eq!(h.appointment(appointment.id).await.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn test_correctly_signed_but_unissued_credential_is_a_mismatch() {
    let h = Harness::new().await;
    let appointment = confirmed(&h, "10:00").await;
    let secret = TestConfig::default().qr_jwt_secret;

    let mut claims = claims_for(&appointment);
    claims.patient_id = 4242;
    let reissued = sign_claims(&claims, &secret);

    let result = verifier(&h).verify_at(&reissued, at(2025, 3, 1, 10, 0)).await;

    assert_matches!(result, Err(CheckInError::TokenMismatch));
    assert!(!h.appointment(appointment.id).await.is_used);
}

#[tokio::test]
async fn test_credential_for_missing_appointment_is_not_found() {
    let h = Harness::new().await;
    let appointment = confirmed(&h, "10:00").await;
    let secret = TestConfig::default().qr_jwt_secret;

    let mut claims = claims_for(&appointment);
    claims.appointment_id = 999;
    let token = sign_claims(&claims, &secret);

    let result = verifier(&h).verify_at(&token, at(2025, 3, 1, 10, 0)).await;

    assert_matches!(result, Err(CheckInError::AppointmentNotFound));
    assert!(h.store.token_logs(999).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_appointment_cannot_check_in() {
    let h = Harness::new().await;
    let appointment = confirmed(&h, "10:00").await;
    h.lifecycle().reject(appointment.id, None).await.unwrap();

    let result = verifier(&h)
        .verify_at(&credential(&appointment), at(2025, 3, 1, 10, 0))
        .await;

    assert_matches!(result, Err(CheckInError::InvalidStatus));
}

#[tokio::test]
async fn test_missing_signing_secret_is_fatal() {
    let h = Harness::new().await;
    let appointment = confirmed(&h, "10:00").await;

    let mut config = TestConfig::default();
    config.qr_jwt_secret = String::new();
    let unconfigured = Harness::with_config(config).await;

    let result = CheckInVerifier::new(&unconfigured.state)
        .verify_at(&credential(&appointment), at(2025, 3, 1, 10, 0))
        .await;
    assert_matches!(result, Err(CheckInError::Fatal(_)));
}
