use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;
use shared_models::{Amount, Payment};

use crate::error::GatewayError;
use crate::models::{GatewayCallback, PaymentForm, StatusReport};
use crate::services::signature::{sign, signing_message, verify};

const OUTBOUND_SIGNED_FIELDS: &str = "total_amount,transaction_uuid,product_code";

/// Talks to the eSewa ePay v2 gateway: signed forms out, signed callbacks in,
/// and the server-to-server status endpoint.
pub struct EsewaGateway {
    client: Client,
    secret_key: String,
    product_code: String,
    payment_url: String,
    status_url: String,
    base_url: String,
}

impl EsewaGateway {
    pub fn new(config: &AppConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_secs))
            .build()
            .map_err(|e| GatewayError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            secret_key: config.esewa_secret_key.clone(),
            product_code: config.esewa_product_code.clone(),
            payment_url: config.esewa_payment_url.clone(),
            status_url: config.esewa_status_url.clone(),
            base_url: config.app_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn product_code(&self) -> &str {
        &self.product_code
    }

    /// Transaction ids look like `APPT-42-1740823200000`.
    pub fn transaction_uuid(appointment_id: i64, now: DateTime<Utc>) -> String {
        format!("APPT-{}-{}", appointment_id, now.timestamp_millis())
    }

    /// Builds the signed form for a pending payment.
    pub fn payment_form(&self, payment: &Payment) -> Result<PaymentForm, GatewayError> {
        let total_amount = payment.amount.to_string();
        let message = signing_message(&[
            ("total_amount", &total_amount),
            ("transaction_uuid", &payment.transaction_uuid),
            ("product_code", &self.product_code),
        ]);
        let signature = sign(&self.secret_key, &message)?;

        Ok(PaymentForm {
            amount: total_amount.clone(),
            tax_amount: "0".to_string(),
            product_service_charge: "0".to_string(),
            product_delivery_charge: "0".to_string(),
            total_amount,
            transaction_uuid: payment.transaction_uuid.clone(),
            product_code: self.product_code.clone(),
            signed_field_names: OUTBOUND_SIGNED_FIELDS.to_string(),
            signature,
            success_url: format!("{}/payments/success", self.base_url),
            failure_url: format!(
                "{}/payments/failure?transaction_uuid={}",
                self.base_url, payment.transaction_uuid
            ),
            callback_url: format!("{}/payments/callback", self.base_url),
            payment_url: self.payment_url.clone(),
        })
    }

    /// Decodes base64 callback data and checks its signature over the fields it names.
    pub fn decode_callback(&self, data: &str) -> Result<GatewayCallback, GatewayError> {
        // Query-string decoding turns '+' into ' '.
        let normalised = data.trim().replace(' ', "+");
        let bytes = STANDARD
            .decode(normalised.as_bytes())
            .map_err(|e| GatewayError::MalformedPayload(format!("invalid base64: {}", e)))?;

        let fields: Map<String, Value> = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::MalformedPayload(format!("invalid JSON: {}", e)))?;

        let signed_field_names = text_field(&fields, "signed_field_names")?;
        let signature = text_field(&fields, "signature")?;

        let mut pairs = Vec::new();
        for name in signed_field_names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            pairs.push((name.to_string(), text_field(&fields, name)?));
        }
        if !pairs.iter().any(|(name, _)| name == "transaction_uuid")
            || !pairs.iter().any(|(name, _)| name == "total_amount")
        {
            return Err(GatewayError::MalformedPayload(
                "signature does not cover transaction_uuid and total_amount".to_string(),
            ));
        }

        let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();
        verify(&self.secret_key, &signing_message(&borrowed), &signature).map_err(|e| {
            warn!("Rejected gateway callback: {}", e);
            e
        })?;

        let callback: GatewayCallback = serde_json::from_value(Value::Object(fields))
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        if callback.product_code != self.product_code {
            return Err(GatewayError::ProductMismatch {
                expected: self.product_code.clone(),
                actual: callback.product_code,
            });
        }

        debug!("Decoded gateway callback for {}", callback.transaction_uuid);
        Ok(callback)
    }

    /// Asks the gateway for the authoritative state of a transaction.
    #[instrument(skip(self))]
    pub async fn query_status(
        &self,
        transaction_uuid: &str,
        total_amount: Amount,
    ) -> Result<StatusReport, GatewayError> {
        let total_amount = total_amount.to_string();
        let signature = sign(
            &self.secret_key,
            &signing_message(&[
                ("total_amount", &total_amount),
                ("transaction_uuid", transaction_uuid),
                ("product_code", &self.product_code),
            ]),
        )?;

        let response = self
            .client
            .get(&self.status_url)
            .query(&[
                ("product_code", self.product_code.as_str()),
                ("total_amount", total_amount.as_str()),
                ("transaction_uuid", transaction_uuid),
                ("signature", signature.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                warn!("Status query for {} failed: {}", transaction_uuid, e);
                GatewayError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unreachable(format!("gateway returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::UnexpectedResponse(format!("{}: {}", status, body)));
        }

        let report: StatusReport = response
            .json()
            .await
            .map_err(|e| GatewayError::UnexpectedResponse(e.to_string()))?;

        if let Some(code) = &report.product_code {
            if code != &self.product_code {
                return Err(GatewayError::ProductMismatch {
                    expected: self.product_code.clone(),
                    actual: code.clone(),
                });
            }
        }

        info!(
            "Gateway reports {} for {} ({})",
            report.status, report.transaction_uuid, report.total_amount
        );
        Ok(report)
    }
}

/// Signed values are compared as the gateway wrote them, so numbers keep their literal text.
fn text_field(fields: &Map<String, Value>, name: &str) -> Result<String, GatewayError> {
    match fields.get(name) {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Number(number)) => Ok(number.to_string()),
        Some(Value::Bool(flag)) => Ok(flag.to_string()),
        Some(_) | None => Err(GatewayError::MalformedPayload(format!("missing field {}", name))),
    }
}
