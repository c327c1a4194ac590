use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, NaiveTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tokio::sync::Mutex;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::AvailabilityWindow;

use crate::notification::{Notification, Notifier};

pub struct TestConfig {
    pub auth_jwt_secret: String,
    pub qr_jwt_secret: String,
    pub esewa_secret_key: String,
    pub esewa_status_url: String,
    pub consultation_fee: String,
    pub auto_confirm_on_payment: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            auth_jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            qr_jwt_secret: "test-qr-signing-secret-for-check-in-credentials".to_string(),
            esewa_secret_key: "8gBm/:&EnhH.1/q".to_string(),
            esewa_status_url: "http://localhost:9/api/epay/transaction/status/".to_string(),
            consultation_fee: "500.00".to_string(),
            auto_confirm_on_payment: false,
        }
    }
}

impl TestConfig {
    pub fn with_status_url(mut self, url: impl Into<String>) -> Self {
        self.esewa_status_url = url.into();
        self
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/clinic_test".to_string(),
            database_max_connections: 2,
            auth_jwt_secret: self.auth_jwt_secret.clone(),
            qr_jwt_secret: self.qr_jwt_secret.clone(),
            esewa_secret_key: self.esewa_secret_key.clone(),
            esewa_product_code: "EPAYTEST".to_string(),
            esewa_payment_url: "https://rc-epay.esewa.com.np/api/epay/main/v2/form".to_string(),
            esewa_status_url: self.esewa_status_url.clone(),
            app_base_url: "http://localhost:3000".to_string(),
            consultation_fee: self.consultation_fee.clone(),
            gateway_timeout_secs: 2,
            provisional_hold_minutes: 15,
            sweeper_interval_secs: 3600,
            payment_poll_interval_secs: 300,
            payment_poll_min_age_secs: 1200,
            auto_confirm_on_payment: self.auto_confirm_on_payment,
            notification_webhook_url: None,
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: i64,
    pub email: String,
    pub role: String,
}

impl TestUser {
    pub fn new(id: i64, role: &str) -> Self {
        Self {
            id,
            email: format!("{}-{}@example.com", role, id),
            role: role.to_string(),
        }
    }

    pub fn doctor(id: i64) -> Self {
        Self::new(id, "doctor")
    }

    pub fn patient(id: i64) -> Self {
        Self::new(id, "patient")
    }

    pub fn admin(id: i64) -> Self {
        Self::new(id, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.to_string(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id.to_string(),
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn bearer(user: &TestUser, secret: &str) -> String {
        format!("Bearer {}", Self::create_test_token(user, secret, None))
    }
}

/// Opening window used to seed availability in tests.
pub fn availability_window(doctor_id: i64, day_of_week: i16, start: &str, end: &str) -> AvailabilityWindow {
    AvailabilityWindow {
        id: 0,
        doctor_id,
        day_of_week,
        start_time: NaiveTime::parse_from_str(start, "%H:%M").expect("valid start time"),
        end_time: NaiveTime::parse_from_str(end, "%H:%M").expect("valid end time"),
        slot_minutes: 30,
        is_available: true,
    }
}

/// Keeps every notification it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Fails every send.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _notification: &Notification) -> Result<()> {
        Err(anyhow!("mail relay unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::validate_token;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default().to_app_config();

        assert!(config.is_configured());
        assert!(config.is_payment_configured());
        assert_eq!(config.consultation_fee, "500.00");
    }

    #[test]
    fn test_user_creation() {
        let user = TestUser::doctor(7);
        assert_eq!(user.role, "doctor");

        let user_model = user.to_user();
        assert_eq!(user_model.numeric_id(), Some(7));
        assert!(user_model.is_doctor(7));
        assert!(!user_model.is_doctor(8));
        assert!(!user_model.is_admin());
    }

    #[test]
    fn test_jwt_token_round_trip() {
        let secret = "test-secret";
        let user = TestUser::patient(42);
        let token = JwtTestUtils::create_test_token(&user, secret, Some(1));

        let validated = validate_token(&token, secret).unwrap();
        assert_eq!(validated.id, "42");
        assert!(validated.is_patient(42));
    }

    #[test]
    fn test_jwt_rejections() {
        let secret = "test-secret";
        let user = TestUser::patient(42);

        assert_eq!(
            validate_token(&JwtTestUtils::create_expired_token(&user, secret), secret).unwrap_err(),
            "Token expired"
        );
        assert_eq!(
            validate_token(&JwtTestUtils::create_invalid_signature_token(&user), secret).unwrap_err(),
            "Invalid token signature"
        );
        assert_eq!(
            validate_token("not-a-token", secret).unwrap_err(),
            "Invalid token format"
        );
        assert!(validate_token("a.b.c", "").is_err());
    }
}
