use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use shared_models::Amount;

/// Form fields the client posts to the gateway to start a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentForm {
    pub amount: String,
    pub tax_amount: String,
    pub product_service_charge: String,
    pub product_delivery_charge: String,
    pub total_amount: String,
    pub transaction_uuid: String,
    pub product_code: String,
    pub signed_field_names: String,
    pub signature: String,
    pub success_url: String,
    pub failure_url: String,
    pub callback_url: String,
    pub payment_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Complete,
    Pending,
    FullRefund,
    PartialRefund,
    Ambiguous,
    NotFound,
    Canceled,
    Other(String),
}

impl GatewayStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "COMPLETE" => GatewayStatus::Complete,
            "PENDING" => GatewayStatus::Pending,
            "FULL_REFUND" => GatewayStatus::FullRefund,
            "PARTIAL_REFUND" => GatewayStatus::PartialRefund,
            "AMBIGUOUS" => GatewayStatus::Ambiguous,
            "NOT_FOUND" => GatewayStatus::NotFound,
            "CANCELED" | "CANCELLED" => GatewayStatus::Canceled,
            _ => GatewayStatus::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GatewayStatus::Complete => "COMPLETE",
            GatewayStatus::Pending => "PENDING",
            GatewayStatus::FullRefund => "FULL_REFUND",
            GatewayStatus::PartialRefund => "PARTIAL_REFUND",
            GatewayStatus::Ambiguous => "AMBIGUOUS",
            GatewayStatus::NotFound => "NOT_FOUND",
            GatewayStatus::Canceled => "CANCELED",
            GatewayStatus::Other(raw) => raw,
        }
    }

    /// The gateway has definitively given up on the transaction.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, GatewayStatus::Canceled | GatewayStatus::NotFound)
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for GatewayStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for GatewayStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(GatewayStatus::parse(&raw))
    }
}

/// Decoded, signature-checked body of a gateway callback or success redirect.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayCallback {
    pub transaction_code: String,
    pub status: GatewayStatus,
    pub total_amount: Amount,
    pub transaction_uuid: String,
    pub product_code: String,
}

/// Response of the server-to-server transaction status endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusReport {
    pub product_code: Option<String>,
    pub transaction_uuid: String,
    pub total_amount: Amount,
    pub status: GatewayStatus,
    pub ref_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationSource {
    Callback,
    Redirect,
    Poll,
}

/// What the gateway asserts about one transaction, whichever way it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfirmation {
    pub transaction_uuid: String,
    pub status: GatewayStatus,
    pub total_amount: Amount,
    pub ref_id: Option<String>,
    pub source: ConfirmationSource,
}

impl GatewayConfirmation {
    pub fn from_callback(callback: GatewayCallback, source: ConfirmationSource) -> Self {
        Self {
            transaction_uuid: callback.transaction_uuid,
            status: callback.status,
            total_amount: callback.total_amount,
            ref_id: Some(callback.transaction_code),
            source,
        }
    }

    pub fn from_report(report: StatusReport) -> Self {
        Self {
            transaction_uuid: report.transaction_uuid,
            status: report.status,
            total_amount: report.total_amount,
            ref_id: report.ref_id,
            source: ConfirmationSource::Poll,
        }
    }
}
