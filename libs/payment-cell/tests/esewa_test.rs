use std::time::Duration;

use assert_matches::assert_matches;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use payment_cell::services::signature::{sign, signing_message, verify};
use payment_cell::{EsewaGateway, GatewayError, GatewayStatus};
use shared_models::{Amount, Payment, TransactionStatus};
use shared_utils::test_utils::TestConfig;

const SECRET: &str = "8gBm/:&EnhH.1/q";

fn gateway_for(status_url: &str) -> EsewaGateway {
    let config = TestConfig::default().with_status_url(status_url).to_app_config();
    EsewaGateway::new(&config).unwrap()
}

fn pending_payment(uuid: &str, amount: &str) -> Payment {
    Payment {
        id: 1,
        appointment_id: 42,
        patient_id: 7,
        amount: amount.parse().unwrap(),
        transaction_uuid: uuid.to_string(),
        status: TransactionStatus::Pending,
        ref_id: None,
        verified_at: None,
        created_at: Utc::now(),
    }
}

/// Builds callback data the way the gateway does: JSON signed over its own field list, then base64.
fn signed_callback(mut body: Value, secret: &str) -> String {
    let names = "transaction_code,status,total_amount,transaction_uuid,product_code,signed_field_names";
    body["signed_field_names"] = json!(names);
    let pairs: Vec<(String, String)> = names
        .split(',')
        .map(|name| {
            let value = match &body[name] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.to_string(), value)
        })
        .collect();
    let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();
    body["signature"] = json!(sign(secret, &signing_message(&borrowed)).unwrap());
    STANDARD.encode(body.to_string())
}

fn complete_body(uuid: &str, amount: Value) -> Value {
    json!({
        "transaction_code": "000AWEO",
        "status": "COMPLETE",
        "total_amount": amount,
        "transaction_uuid": uuid,
        "product_code": "EPAYTEST"
    })
}

#[test]
fn test_known_signature_vector() {
    let message = signing_message(&[
        ("total_amount", "100"),
        ("transaction_uuid", "11-201-13"),
        ("product_code", "EPAYTEST"),
    ]);
    assert_eq!(message, "total_amount=100,transaction_uuid=11-201-13,product_code=EPAYTEST");
    assert_eq!(
        sign(SECRET, &message).unwrap(),
        "5DZywcrTKD0gia/rsSMcrRHmJl+4Tbol6S+lWgdJ94E="
    );
}

#[test]
fn test_payment_form_is_signed_over_declared_fields() {
    let gateway = gateway_for("http://localhost:9/status");
    let payment = pending_payment("APPT-42-1740823200000", "500.00");

    let form = gateway.payment_form(&payment).unwrap();

    assert_eq!(form.total_amount, "500.00");
    assert_eq!(form.tax_amount, "0");
    assert_eq!(form.product_code, "EPAYTEST");
    assert_eq!(form.signed_field_names, "total_amount,transaction_uuid,product_code");
    assert_eq!(form.success_url, "http://localhost:3000/payments/success");
    assert!(form.failure_url.ends_with("transaction_uuid=APPT-42-1740823200000"));

    let message = signing_message(&[
        ("total_amount", &form.total_amount),
        ("transaction_uuid", &form.transaction_uuid),
        ("product_code", &form.product_code),
    ]);
    assert!(verify(SECRET, &message, &form.signature).is_ok());
}

#[test]
fn test_payment_form_requires_secret() {
    let mut config = TestConfig::default().to_app_config();
    config.esewa_secret_key = String::new();
    let gateway = EsewaGateway::new(&config).unwrap();

    let result = gateway.payment_form(&pending_payment("APPT-1-1", "500.00"));
    assert_matches!(result, Err(GatewayError::NotConfigured(_)));
}

#[test]
fn test_transaction_uuid_embeds_appointment_and_millis() {
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
    assert_eq!(EsewaGateway::transaction_uuid(42, now), "APPT-42-1740823200000");
}

#[test]
fn test_decode_valid_callback() {
    let gateway = gateway_for("http://localhost:9/status");
    let data = signed_callback(complete_body("APPT-42-1", json!("250.00")), SECRET);

    let callback = gateway.decode_callback(&data).unwrap();

    assert_eq!(callback.status, GatewayStatus::Complete);
    assert_eq!(callback.total_amount, Amount::from_minor(25_000));
    assert_eq!(callback.transaction_uuid, "APPT-42-1");
    assert_eq!(callback.transaction_code, "000AWEO");
}

#[test]
fn test_decode_callback_signed_over_numeric_amount() {
    let gateway = gateway_for("http://localhost:9/status");
    let data = signed_callback(complete_body("APPT-42-1", json!(1000.5)), SECRET);

    let callback = gateway.decode_callback(&data).unwrap();
    assert_eq!(callback.total_amount.to_string(), "1000.50");
}

#[test]
fn test_decode_callback_survives_query_decoding_of_plus() {
    let gateway = gateway_for("http://localhost:9/status");
    let data = signed_callback(complete_body("APPT-42-1", json!("250.00")), SECRET);
    let mangled = data.replace('+', " ");

    assert!(gateway.decode_callback(&mangled).is_ok());
}

#[test]
fn test_decode_rejects_tampered_amount() {
    let gateway = gateway_for("http://localhost:9/status");
    let data = signed_callback(complete_body("APPT-42-1", json!("250.00")), SECRET);

    let mut body: Value = serde_json::from_slice(&STANDARD.decode(&data).unwrap()).unwrap();
    body["total_amount"] = json!("2.50");
    let tampered = STANDARD.encode(body.to_string());

    assert_matches!(gateway.decode_callback(&tampered), Err(GatewayError::SignatureMismatch));
}

#[test]
fn test_decode_rejects_wrong_secret() {
    let gateway = gateway_for("http://localhost:9/status");
    let data = signed_callback(complete_body("APPT-42-1", json!("250.00")), "some-other-secret");

    assert_matches!(gateway.decode_callback(&data), Err(GatewayError::SignatureMismatch));
}

#[test]
fn test_decode_rejects_foreign_product_code() {
    let gateway = gateway_for("http://localhost:9/status");
    let mut body = complete_body("APPT-42-1", json!("250.00"));
    body["product_code"] = json!("OTHERSHOP");
    let data = signed_callback(body, SECRET);

    assert_matches!(
        gateway.decode_callback(&data),
        Err(GatewayError::ProductMismatch { .. })
    );
}

#[test]
fn test_decode_rejects_garbage() {
    let gateway = gateway_for("http://localhost:9/status");

    assert_matches!(gateway.decode_callback("%%%"), Err(GatewayError::MalformedPayload(_)));
    let not_json = STANDARD.encode("hello");
    assert_matches!(gateway.decode_callback(&not_json), Err(GatewayError::MalformedPayload(_)));
    let unsigned = STANDARD.encode(complete_body("APPT-42-1", json!("250.00")).to_string());
    assert_matches!(gateway.decode_callback(&unsigned), Err(GatewayError::MalformedPayload(_)));
}

#[tokio::test]
async fn test_query_status_complete() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/epay/transaction/status/"))
        .and(query_param("product_code", "EPAYTEST"))
        .and(query_param("transaction_uuid", "APPT-42-1"))
        .and(query_param("total_amount", "250.00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "product_code": "EPAYTEST",
            "transaction_uuid": "APPT-42-1",
            "total_amount": 250.0,
            "status": "COMPLETE",
            "ref_id": "0001TS9"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&format!("{}/api/epay/transaction/status/", mock_server.uri()));
    let report = gateway
        .query_status("APPT-42-1", "250.00".parse().unwrap())
        .await
        .unwrap();

    assert_eq!(report.status, GatewayStatus::Complete);
    assert_eq!(report.total_amount, Amount::from_minor(25_000));
    assert_eq!(report.ref_id.as_deref(), Some("0001TS9"));
}

#[tokio::test]
async fn test_query_status_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "product_code": "EPAYTEST",
            "transaction_uuid": "APPT-42-1",
            "total_amount": "250.00",
            "status": "NOT_FOUND",
            "ref_id": null
        })))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&format!("{}/status", mock_server.uri()));
    let report = gateway
        .query_status("APPT-42-1", "250.00".parse().unwrap())
        .await
        .unwrap();

    assert!(report.status.is_terminal_failure());
}

#[tokio::test]
async fn test_query_status_server_error_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&format!("{}/status", mock_server.uri()));
    let err = gateway
        .query_status("APPT-42-1", "250.00".parse().unwrap())
        .await
        .unwrap_err();

    assert_matches!(err, GatewayError::Unreachable(_));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_query_status_timeout_is_unreachable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "COMPLETE"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&format!("{}/status", mock_server.uri()));
    let err = gateway
        .query_status("APPT-42-1", "250.00".parse().unwrap())
        .await
        .unwrap_err();

    assert_matches!(err, GatewayError::Unreachable(_));
}

#[tokio::test]
async fn test_query_status_client_error_is_not_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad signature"))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&format!("{}/status", mock_server.uri()));
    let err = gateway
        .query_status("APPT-42-1", "250.00".parse().unwrap())
        .await
        .unwrap_err();

    assert_matches!(err, GatewayError::UnexpectedResponse(_));
    assert!(!err.is_retryable());
}
