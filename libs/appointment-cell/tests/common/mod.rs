#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::json;

use appointment_cell::services::{AppointmentBookingService, AppointmentLifecycleService, ReconciliationEngine};
use appointment_cell::{BookAppointmentRequest, BookingReceipt, LifecycleState, ReconcileOutcome};
use payment_cell::services::signature::{sign, signing_message};
use shared_database::{DbHandle, MemoryStore};
use shared_models::{Appointment, Payment};
use shared_utils::notification::Notifier;
use shared_utils::test_utils::{availability_window, RecordingNotifier, TestConfig};

pub const DOCTOR: i64 = 7;
pub const PATIENT: i64 = 42;
pub const SECRET: &str = "8gBm/:&EnhH.1/q";

pub struct Harness {
    pub store: MemoryStore,
    pub state: LifecycleState,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(config: TestConfig) -> Self {
        let store = MemoryStore::new();
        // Saturdays 09:00-17:00 for doctor 7, every day for doctor 8.
        store.add_availability(availability_window(DOCTOR, 6, "09:00", "17:00")).await;
        for day in 0..7 {
            store.add_availability(availability_window(8, day, "09:00", "12:00")).await;
        }

        let notifier = RecordingNotifier::new();
        let handle: DbHandle = Arc::new(store.clone());
        let dyn_notifier: Arc<dyn Notifier> = notifier.clone();
        let state = LifecycleState::new(config.to_arc(), handle, dyn_notifier).unwrap();

        Self { store, state, notifier }
    }

    pub fn booking(&self) -> AppointmentBookingService {
        AppointmentBookingService::new(&self.state)
    }

    pub fn lifecycle(&self) -> AppointmentLifecycleService {
        AppointmentLifecycleService::new(&self.state)
    }

    pub fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(&self.state)
    }

    pub async fn book(&self, time: &str) -> BookingReceipt {
        self.book_at(time, booking_time()).await
    }

    pub async fn book_at(&self, time: &str, now: DateTime<Utc>) -> BookingReceipt {
        self.booking()
            .book_at(PATIENT, request(DOCTOR, time), now)
            .await
            .unwrap()
    }

    /// Books and settles through a signed callback.
    pub async fn book_paid(&self, time: &str) -> BookingReceipt {
        let receipt = self.book(time).await;
        let data = callback_data(&receipt.payment, "COMPLETE", &receipt.payment.amount.to_string());
        let outcome = self.engine().settle_from_callback(&data, booking_time()).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Reconciled { .. }));
        receipt
    }

    pub async fn appointment(&self, id: i64) -> Appointment {
        self.store
            .all_appointments()
            .await
            .into_iter()
            .find(|a| a.id == id)
            .unwrap()
    }

    pub async fn payment(&self, appointment_id: i64) -> Payment {
        self.store
            .all_payments()
            .await
            .into_iter()
            .find(|p| p.appointment_id == appointment_id)
            .unwrap()
    }
}

pub fn saturday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

pub fn time(text: &str) -> NaiveTime {
    NaiveTime::parse_from_str(text, "%H:%M").unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// The day before the Saturday clinic.
pub fn booking_time() -> DateTime<Utc> {
    at(2025, 2, 28, 9, 0)
}

pub fn request(doctor_id: i64, slot: &str) -> BookAppointmentRequest {
    BookAppointmentRequest {
        doctor_id,
        appointment_date: saturday(),
        appointment_time: time(slot),
        reason: Some("Follow-up".to_string()),
        patient_id: None,
    }
}

/// Base64 callback payload signed the way the gateway signs it.
pub fn callback_data(payment: &Payment, status: &str, total_amount: &str) -> String {
    signed_payload(&payment.transaction_uuid, status, total_amount, "REF1", SECRET)
}

pub fn signed_payload(uuid: &str, status: &str, total_amount: &str, code: &str, secret: &str) -> String {
    let names = "transaction_code,status,total_amount,transaction_uuid,product_code,signed_field_names";
    let message = signing_message(&[
        ("transaction_code", code),
        ("status", status),
        ("total_amount", total_amount),
        ("transaction_uuid", uuid),
        ("product_code", "EPAYTEST"),
        ("signed_field_names", names),
    ]);
    let body = json!({
        "transaction_code": code,
        "status": status,
        "total_amount": total_amount,
        "transaction_uuid": uuid,
        "product_code": "EPAYTEST",
        "signed_field_names": names,
        "signature": sign(secret, &message).unwrap(),
    });
    STANDARD.encode(body.to_string())
}

/// Gives spawned notification tasks a chance to run.
pub async fn settle_background() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Harness whose gateway status endpoint is served by `server`.
pub async fn harness_with_gateway(server: &wiremock::MockServer) -> Harness {
    Harness::with_config(TestConfig::default().with_status_url(format!("{}/status", server.uri()))).await
}

/// Status endpoint answer for one transaction.
pub async fn mount_status(server: &wiremock::MockServer, uuid: &str, status: &str, total_amount: &str) {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    Mock::given(method("GET"))
        .and(path("/status"))
        .and(query_param("transaction_uuid", uuid))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "product_code": "EPAYTEST",
            "transaction_uuid": uuid,
            "total_amount": total_amount,
            "status": status,
            "ref_id": "0007ABC"
        })))
        .mount(server)
        .await;
}
